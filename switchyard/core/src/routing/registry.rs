//! Backend Registry
//!
//! Static description of every backend the router may dispatch to: cost
//! rates, per-call timeout, and capability tags. The registry is validated
//! once when it is built and is read-only afterwards.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

// ============================================================================
// Capability Tags
// ============================================================================

/// Capability tier of a backend (quality and price class)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierCapability {
    /// Small, cheap models
    Economy,
    /// General-purpose models
    #[default]
    Standard,
    /// Large, expensive models
    Premium,
}

// ============================================================================
// Token Accounting
// ============================================================================

/// Token counts reported by a backend for one call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed
    pub input: u64,
    /// Completion tokens produced
    pub output: u64,
}

impl TokenUsage {
    /// Create a usage record
    #[must_use]
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Input plus output
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input.saturating_add(self.output)
    }
}

// ============================================================================
// Backend Descriptor
// ============================================================================

/// Everything the router knows about one backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend identifier
    pub id: String,

    /// Price per 1,000 input tokens
    pub input_cost_per_k_tokens: Decimal,

    /// Price per 1,000 output tokens
    pub output_cost_per_k_tokens: Decimal,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,

    /// Capability tier
    pub tier: TierCapability,

    /// Maximum context window (tokens)
    pub max_context_tokens: u32,
}

impl BackendDescriptor {
    /// Create a descriptor with the given rates and timeout
    pub fn new(
        id: impl Into<String>,
        input_cost_per_k_tokens: Decimal,
        output_cost_per_k_tokens: Decimal,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            input_cost_per_k_tokens,
            output_cost_per_k_tokens,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            tier: TierCapability::default(),
            max_context_tokens: 8_192,
        }
    }

    /// Set the capability tier
    #[must_use]
    pub fn with_tier(mut self, tier: TierCapability) -> Self {
        self.tier = tier;
        self
    }

    /// Set the context window
    #[must_use]
    pub fn with_max_context(mut self, tokens: u32) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    /// Per-call timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Actual cost of a call that consumed `tokens` on this backend
    #[must_use]
    pub fn cost_for(&self, tokens: TokenUsage) -> Decimal {
        let per_k = Decimal::ONE_THOUSAND;
        let input = Decimal::from(tokens.input) * self.input_cost_per_k_tokens / per_k;
        let output = Decimal::from(tokens.output) * self.output_cost_per_k_tokens / per_k;
        (input + output).normalize()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend id must not be empty".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                backend: self.id.clone(),
            });
        }
        if self.input_cost_per_k_tokens < Decimal::ZERO {
            return Err(ConfigError::NegativeRate {
                backend: self.id.clone(),
                rate: "input",
            });
        }
        if self.output_cost_per_k_tokens < Decimal::ZERO {
            return Err(ConfigError::NegativeRate {
                backend: self.id.clone(),
                rate: "output",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Validated, immutable set of backends keyed by id
#[derive(Clone, Debug, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, BackendDescriptor>,
    /// Declaration order, for stable listings
    order: Vec<String>,
}

impl BackendRegistry {
    /// Build a registry, rejecting duplicate ids, zero timeouts and negative rates
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; any error is fatal for the
    /// configuration being loaded.
    pub fn new(descriptors: Vec<BackendDescriptor>) -> Result<Self, ConfigError> {
        let mut backends = HashMap::with_capacity(descriptors.len());
        let mut order = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            descriptor.validate()?;
            if backends.contains_key(&descriptor.id) {
                return Err(ConfigError::DuplicateBackend(descriptor.id));
            }
            order.push(descriptor.id.clone());
            backends.insert(descriptor.id.clone(), descriptor);
        }

        Ok(Self { backends, order })
    }

    /// Look up a backend by id
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BackendNotFound`] for an unregistered id.
    pub fn describe(&self, id: &str) -> Result<&BackendDescriptor, ConfigError> {
        self.backends
            .get(id)
            .ok_or_else(|| ConfigError::BackendNotFound(id.to_string()))
    }

    /// Whether an id is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    /// Backend ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Descriptors in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.order.iter().filter_map(|id| self.backends.get(id))
    }

    /// Number of backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry has no backends
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
