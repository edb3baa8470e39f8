//! Backend Collaborators
//!
//! Abstracted access to generation backends and response decoding through
//! trait interfaces. The wire-level client lives outside this crate; it only
//! has to implement [`BackendTransport`].
//!
//! # Usage
//!
//! ```ignore
//! use switchyard_core::backend::{BackendTransport, JsonValidator};
//!
//! let switchyard = Switchyard::builder(config)
//!     .transport(Arc::new(MyHttpTransport::new()))
//!     .validator(Arc::new(JsonValidator))
//!     .build()?;
//! ```

mod json;
mod traits;

pub use json::JsonValidator;
pub use traits::{
    BackendTransport, ExpectedSchema, InvocationError, RawResponse, ResponseValidator,
    SchemaValidationError,
};
