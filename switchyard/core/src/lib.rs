//! Switchyard Core - Routing and Dispatch for Cost-Differentiated AI Backends
//!
//! Routes each generation request to one of several backends chosen by a
//! declarative policy keyed on the request context, fails over along a
//! health-aware candidate chain, and returns verified content together with
//! its latency, token counts and actual cost.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Switchyard                             │
//! │                                                                  │
//! │  generate(prompt, context, deadline)                             │
//! │        │                                                         │
//! │        v                                                         │
//! │  ┌────────────┐   ┌────────────────┐   ┌──────────────────────┐  │
//! │  │  Catalog   │──>│ select_backend │<──│    HealthMonitor     │  │
//! │  │ (registry, │   └───────┬────────┘   └──────────▲───────────┘  │
//! │  │  policies) │           │ RoutingDecision       │              │
//! │  └────────────┘           v                       │              │
//! │                   ┌────────────────┐              │              │
//! │                   │   Dispatcher   │──────────────┘              │
//! │                   └───────┬────────┘──────> MetricsAggregator    │
//! └───────────────────────────┼──────────────────────────────────────┘
//!                             │
//!                 BackendTransport / ResponseValidator
//! ```
//!
//! # Key Types
//!
//! - [`Switchyard`]: composition root; owns the catalog, health and metrics
//! - [`RequestContext`]: audience tier, content domain and workflow stage
//! - [`RoutingDecision`]: primary plus ordered fallbacks for one request
//! - [`GenerationResult`]: content with latency, tokens, cost and attempt trail
//! - [`DispatchError`]: configuration error, exhaustion, or deadline expiry
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use switchyard_core::{config, RequestContext, Switchyard};
//!
//! let config = config::load_config()?;
//! let switchyard = Switchyard::builder(config)
//!     .transport(Arc::new(MyHttpTransport::new()))
//!     .build()?;
//!
//! let context = RequestContext::parse("early", "math", "learn")?;
//! let result = switchyard
//!     .generate("Explain fractions with pizza", &context, Duration::from_secs(20))
//!     .await?;
//! println!("{} cost {}", result.model_used, result.cost);
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: transport and validator collaborator traits
//! - [`config`]: TOML configuration with environment overrides
//! - [`context`]: closed request-context enumerations
//! - [`routing`]: registry, policy, health, selection, dispatch and metrics

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod context;
pub mod routing;
mod switchyard;

// Re-exports for convenience
pub use backend::{
    BackendTransport, ExpectedSchema, InvocationError, JsonValidator, RawResponse,
    ResponseValidator, SchemaValidationError,
};
pub use config::{load_config, load_config_from_path, ConfigError, ConfigSource, SwitchyardConfig};
pub use context::{AudienceTier, ContentDomain, ContextError, RequestContext, WorkflowStage};
pub use routing::{
    AttemptOutcome, AttemptRecord, BackendDescriptor, Catalog, DispatchError, GenerationResult,
    HealthConfig, HealthRecord, HealthState, MetricsSnapshot, RoutingDecision, TierCapability,
    TokenUsage,
};
pub use switchyard::{Observation, Switchyard, SwitchyardBuilder};
