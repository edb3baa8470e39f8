//! Backend Collaborator Traits
//!
//! The dispatcher never talks to a network endpoint or parses a payload
//! itself. It relies on two collaborators:
//!
//! - [`BackendTransport`]: sends a prompt to a backend by id and returns the
//!   raw body plus token counts
//! - [`ResponseValidator`]: turns a raw body into structured content that
//!   satisfies the policy's [`ExpectedSchema`]
//!
//! Implementations handle provider-specific details (API formats, auth,
//! retries at the wire level, etc.)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::registry::TokenUsage;

/// Raw, undecoded backend reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    /// Response body as returned by the backend
    pub body: String,
    /// Token counts the backend reported
    pub tokens: TokenUsage,
}

impl RawResponse {
    /// Create a raw response
    pub fn new(body: impl Into<String>, tokens: TokenUsage) -> Self {
        Self {
            body: body.into(),
            tokens,
        }
    }
}

/// Failure reported by a transport for one call
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// The endpoint could not be reached
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with an error status
    #[error("backend returned status {status}: {message}")]
    Status {
        /// Provider status code
        status: u16,
        /// Provider error message
        message: String,
    },

    /// The backend refused the request (quota, content filter, ...)
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

/// Transport contract used by the dispatcher
///
/// `timeout` is advisory: the dispatcher also bounds every call itself and
/// drops the future when the bound elapses.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Send `prompt` to the backend with id `backend_id`
    async fn invoke(
        &self,
        backend_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<RawResponse, InvocationError>;
}

// ============================================================================
// Response Validation
// ============================================================================

/// Shape a decoded response must have
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedSchema {
    /// Top-level fields that must be present
    pub required_fields: Vec<String>,
}

impl ExpectedSchema {
    /// Schema requiring the given top-level fields
    #[must_use]
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }

    /// Add a required field
    #[must_use]
    pub fn requires(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }
}

/// A response that did not decode into the expected shape
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SchemaValidationError {
    /// Body is not valid JSON
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    /// Fields were required but the body is not an object
    #[error("response is not a JSON object")]
    NotAnObject,

    /// A required field is absent
    #[error("response is missing required field '{0}'")]
    MissingField(String),
}

/// Decoder contract used by the dispatcher
pub trait ResponseValidator: Send + Sync {
    /// Decode `raw` and check it against `schema`
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaValidationError`] when the body cannot be decoded or
    /// lacks a required field.
    fn decode(
        &self,
        raw: &RawResponse,
        schema: &ExpectedSchema,
    ) -> Result<serde_json::Value, SchemaValidationError>;
}
