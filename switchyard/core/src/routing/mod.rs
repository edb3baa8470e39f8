//! Request Routing and Dispatch
//!
//! Cost-differentiated routing with health-aware failover.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |    Dispatcher    |  <-- generate(prompt, context, deadline)
//! +--------+---------+
//!          |
//!          v
//! +------------------+      +-----------------+
//! |  select_backend  | <--- |  HealthMonitor  |  (snapshot)
//! +--------+---------+      +-----------------+
//!          |                         ^
//!          v                         | success / failure
//! +------------------+               |
//! |  FallbackChain   | --------------+
//! +--------+---------+
//!          |
//!          v
//! +------------------+      +-------------------+
//! | BackendTransport | ---> | MetricsAggregator |
//! +------------------+      +-------------------+
//! ```
//!
//! The [`Catalog`] (backend registry plus policy table) is immutable and
//! swapped as a unit on reload.
//!
//! # Design Principles
//!
//! 1. **Health before cost**: a Healthy backend always precedes a Degraded one
//! 2. **No silent defaults**: a context without a policy is an error
//! 3. **Bounded failover**: each candidate is tried at most once per request

pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod router;

pub use dispatcher::{Dispatcher, GenerationResult};
pub use error::{AttemptError, DispatchError, RoutingError};
pub use fallback::{AttemptOutcome, AttemptRecord, FallbackChain};
pub use health::{
    AttemptKind, HealthConfig, HealthMonitor, HealthRecord, HealthSnapshot, HealthState,
};
pub use metrics::{BackendMetrics, MetricsAggregator, MetricsSnapshot, RequestOutcome};
pub use policy::{ContextMatch, PolicyEntry, PolicyTable};
pub use registry::{BackendDescriptor, BackendRegistry, TierCapability, TokenUsage};
pub use router::{select_backend, RoutingDecision, PRIMARY_UNHEALTHY};

use chrono::{DateTime, Utc};

use crate::config::ConfigError;
use crate::context::RequestContext;

/// Validated backend registry and policy table
#[derive(Clone, Debug)]
pub struct Catalog {
    registry: BackendRegistry,
    policies: PolicyTable,
    loaded_at: DateTime<Utc>,
}

impl Catalog {
    /// Validate backends, then policies against them
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] from either.
    pub fn new(backends: Vec<BackendDescriptor>, policies: Vec<PolicyEntry>) -> Result<Self, ConfigError> {
        let registry = BackendRegistry::new(backends)?;
        let policies = PolicyTable::new(policies, &registry)?;
        Ok(Self {
            registry,
            policies,
            loaded_at: Utc::now(),
        })
    }

    /// Empty catalog (every request fails with no policy match)
    #[must_use]
    pub fn empty() -> Self {
        Self {
            registry: BackendRegistry::default(),
            policies: PolicyTable::default(),
            loaded_at: Utc::now(),
        }
    }

    /// Backend registry
    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Policy table
    #[must_use]
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// When this catalog was validated
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Route a request against this catalog
    ///
    /// # Errors
    ///
    /// See [`select_backend`].
    pub fn select_backend(
        &self,
        context: &RequestContext,
        health: &HealthSnapshot,
    ) -> Result<RoutingDecision, RoutingError> {
        router::select_backend(&self.policies, context, health)
    }
}
