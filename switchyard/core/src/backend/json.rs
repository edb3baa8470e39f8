//! Default JSON response validator

use serde_json::Value;

use super::traits::{ExpectedSchema, RawResponse, ResponseValidator, SchemaValidationError};

/// Parses the body as JSON and checks required top-level fields
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonValidator;

impl ResponseValidator for JsonValidator {
    fn decode(
        &self,
        raw: &RawResponse,
        schema: &ExpectedSchema,
    ) -> Result<Value, SchemaValidationError> {
        let value: Value = serde_json::from_str(raw.body.trim())
            .map_err(|e| SchemaValidationError::InvalidJson(e.to_string()))?;

        if schema.required_fields.is_empty() {
            return Ok(value);
        }

        let object = value.as_object().ok_or(SchemaValidationError::NotAnObject)?;
        if let Some(missing) = schema
            .required_fields
            .iter()
            .find(|field| !object.contains_key(field.as_str()))
        {
            return Err(SchemaValidationError::MissingField(missing.clone()));
        }

        Ok(value)
    }
}
