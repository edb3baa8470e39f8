//! Composition root
//!
//! [`Switchyard`] builds the catalog, health monitor and metrics aggregator
//! once and injects them into the dispatcher. Nothing in the crate is a
//! global: two `Switchyard`s in one process are fully independent.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{BackendTransport, JsonValidator, ResponseValidator};
use crate::config::{ConfigError, SwitchyardConfig};
use crate::context::RequestContext;
use crate::routing::{
    Catalog, DispatchError, Dispatcher, GenerationResult, HealthMonitor, HealthRecord,
    MetricsAggregator, MetricsSnapshot, RoutingDecision, RoutingError,
};

/// Metrics and health, as returned by [`Switchyard::observe`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// When the active catalog was loaded
    pub catalog_loaded_at: DateTime<Utc>,
    /// Current metrics generation
    pub metrics: MetricsSnapshot,
    /// Every backend's health, sorted by id
    pub health: Vec<HealthRecord>,
}

/// Builder for [`Switchyard`]
pub struct SwitchyardBuilder {
    config: SwitchyardConfig,
    transport: Option<Arc<dyn BackendTransport>>,
    validator: Arc<dyn ResponseValidator>,
}

impl SwitchyardBuilder {
    /// Set the transport (required)
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn BackendTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default [`JsonValidator`]
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Validate the configuration and wire everything together
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid health settings, an invalid
    /// catalog, or a missing transport.
    pub fn build(self) -> Result<Switchyard, ConfigError> {
        let transport = self.transport.ok_or_else(|| {
            ConfigError::ValidationError("a backend transport is required".to_string())
        })?;

        self.config.health.validate()?;
        let catalog = self.config.build_catalog()?;

        let health = Arc::new(HealthMonitor::with_backends(
            self.config.health.clone(),
            catalog.registry().ids(),
        ));
        let metrics = Arc::new(MetricsAggregator::new());

        tracing::info!(
            backends = catalog.registry().len(),
            policies = catalog.policies().len(),
            source = %self.config.source(),
            "Catalog loaded"
        );

        let catalog = Arc::new(ArcSwap::from_pointee(catalog));
        let dispatcher = Dispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&health),
            Arc::clone(&metrics),
            transport,
            self.validator,
        );

        Ok(Switchyard {
            catalog,
            health,
            metrics,
            dispatcher,
        })
    }
}

/// Routing and dispatch engine
pub struct Switchyard {
    catalog: Arc<ArcSwap<Catalog>>,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsAggregator>,
    dispatcher: Dispatcher,
}

impl Switchyard {
    /// Start building from a loaded configuration
    #[must_use]
    pub fn builder(config: SwitchyardConfig) -> SwitchyardBuilder {
        SwitchyardBuilder {
            config,
            transport: None,
            validator: Arc::new(JsonValidator),
        }
    }

    /// Generate content for `prompt`, routed by `context`, within `deadline`
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::generate`].
    pub async fn generate(
        &self,
        prompt: &str,
        context: &RequestContext,
        deadline: Duration,
    ) -> Result<GenerationResult, DispatchError> {
        self.dispatcher.generate(prompt, context, deadline).await
    }

    /// Routing decision a request would get right now, without dispatching
    ///
    /// # Errors
    ///
    /// See [`crate::routing::select_backend`].
    pub fn select_backend(&self, context: &RequestContext) -> Result<RoutingDecision, RoutingError> {
        self.catalog
            .load()
            .select_backend(context, &self.health.snapshot())
    }

    /// Active catalog
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.load_full()
    }

    /// Shared health monitor
    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Shared metrics aggregator
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Metrics snapshot plus every health record
    #[must_use]
    pub fn observe(&self) -> Observation {
        Observation {
            catalog_loaded_at: self.catalog.load().loaded_at(),
            metrics: self.metrics.snapshot(),
            health: self.health.snapshot().records(),
        }
    }

    /// Metrics in Prometheus text exposition format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        self.metrics.to_prometheus()
    }

    /// Administrative reset of one backend to Healthy
    pub fn reset_backend(&self, backend_id: &str) -> bool {
        self.health.reset(backend_id)
    }

    /// Validate a new configuration and swap its catalog in atomically
    ///
    /// Health records of surviving backends keep their history; new backends
    /// start Healthy and removed ones are dropped. Health thresholds are fixed
    /// for the lifetime of the instance. On error the previous catalog stays
    /// active.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] that rejected the new catalog.
    pub fn reload(&self, config: &SwitchyardConfig) -> Result<(), ConfigError> {
        let catalog = match config.build_catalog() {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(error = %e, "Reload rejected, keeping previous catalog");
                return Err(e);
            }
        };

        if config.health != *self.health.config() {
            tracing::warn!("Health thresholds changed; they apply after restart");
        }

        self.health.reconcile(catalog.registry().ids());
        tracing::info!(
            backends = catalog.registry().len(),
            policies = catalog.policies().len(),
            "Catalog reloaded"
        );
        self.catalog.store(Arc::new(catalog));
        Ok(())
    }
}

impl std::fmt::Debug for Switchyard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switchyard")
            .field("backends", &self.catalog.load().registry().len())
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}
