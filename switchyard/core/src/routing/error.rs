//! Routing and dispatch errors
//!
//! Only [`DispatchError`] escapes `generate`. Per-attempt failures
//! ([`AttemptError`]) are absorbed by the fallback loop and surface through
//! the attempt trail.

use std::time::Duration;

use thiserror::Error;

use super::fallback::{summarize, AttemptRecord};
use crate::backend::{InvocationError, SchemaValidationError};
use crate::config::ConfigError;

/// Why a single attempt against one backend failed
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// The backend did not answer within its timeout
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The transport reported an error
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// The response did not decode into the expected shape
    #[error(transparent)]
    SchemaValidation(#[from] SchemaValidationError),
}

impl AttemptError {
    /// Whether this was a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Failure to produce a routing decision
#[derive(Debug, Error)]
pub enum RoutingError {
    /// No policy, or an invalid catalog
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every candidate of the policy is currently unavailable
    #[error("no available candidate for policy '{policy}': {}", summarize(.skipped))]
    Exhausted {
        /// Policy entry that was resolved
        policy: String,
        /// Every candidate with the reason it was dropped
        skipped: Vec<AttemptRecord>,
    },
}

/// Terminal error of a dispatch
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Configuration problem (including no matching policy); never retried
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every candidate was skipped or failed
    #[error("all candidates exhausted: {}", summarize(.attempts))]
    ExhaustedFallbacks {
        /// Every backend considered, in order, with its outcome
        attempts: Vec<AttemptRecord>,
    },

    /// The caller's deadline expired before a candidate succeeded
    #[error("deadline of {}ms exceeded: {}", .deadline.as_millis(), summarize(.attempts))]
    DeadlineExceeded {
        /// Deadline the caller supplied
        deadline: Duration,
        /// Attempts made before the deadline
        attempts: Vec<AttemptRecord>,
    },
}

impl DispatchError {
    /// Attempt trail carried by the error (empty for configuration errors)
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Config(_) => &[],
            Self::ExhaustedFallbacks { attempts } | Self::DeadlineExceeded { attempts, .. } => {
                attempts
            }
        }
    }
}

impl From<RoutingError> for DispatchError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::Config(e) => Self::Config(e),
            RoutingError::Exhausted { skipped, .. } => Self::ExhaustedFallbacks { attempts: skipped },
        }
    }
}
