//! Switchyard Configuration
//!
//! Loads the health settings, backend registry and policy table from a TOML
//! file at `~/.config/switchyard/switchyard.toml`.
//!
//! # Configuration Priority
//!
//! Highest priority first:
//! 1. Environment variables (health settings only)
//! 2. TOML configuration file
//! 3. Default values
//!
//! # File Location
//!
//! `$XDG_CONFIG_HOME/switchyard/switchyard.toml`, resolved by [`default_config_path`].
//!
//! # Example Configuration
//!
//! ```toml
//! [health]
//! failure_threshold = 3
//! failure_window_ms = 60000
//! cooldown_ms = 30000
//!
//! [[backends]]
//! id = "low"
//! input_cost_per_k_tokens = "0.0005"
//! output_cost_per_k_tokens = "0.0015"
//! timeout_ms = 10000
//! tier = "economy"
//!
//! [[backends]]
//! id = "mid"
//! input_cost_per_k_tokens = "0.003"
//! output_cost_per_k_tokens = "0.015"
//! timeout_ms = 20000
//!
//! [[policies]]
//! name = "early-learners"
//! audience_tier = "early"
//! candidates = ["low", "mid"]
//! estimated_cost = "0.002"
//! required_fields = ["title", "body"]
//! ```
//!
//! Money is written as a string so it is parsed exactly as a decimal.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ExpectedSchema;
use crate::context::{AudienceTier, ContentDomain, RequestContext, WorkflowStage};
use crate::routing::health::HealthConfig;
use crate::routing::policy::{ContextMatch, PolicyEntry};
use crate::routing::registry::{BackendDescriptor, TierCapability};
use crate::routing::Catalog;

/// Overrides the number of failures within the window that degrades a backend
pub const ENV_FAILURE_THRESHOLD: &str = "SWITCHYARD_FAILURE_THRESHOLD";
/// Overrides the failure window, in milliseconds
pub const ENV_FAILURE_WINDOW_MS: &str = "SWITCHYARD_FAILURE_WINDOW_MS";
/// Overrides the cool-down, in milliseconds
pub const ENV_COOLDOWN_MS: &str = "SWITCHYARD_COOLDOWN_MS";

// =============================================================================
// Error Types
// =============================================================================

/// Errors in configuration, fatal for whatever was being loaded or resolved
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Two backends share an id
    #[error("Duplicate backend id '{0}'")]
    DuplicateBackend(String),

    /// A backend with a zero timeout
    #[error("Backend '{backend}' must have a positive timeout")]
    InvalidTimeout {
        /// Offending backend
        backend: String,
    },

    /// A backend with a negative cost rate
    #[error("Backend '{backend}' has a negative {rate} cost rate")]
    NegativeRate {
        /// Offending backend
        backend: String,
        /// `"input"` or `"output"`
        rate: &'static str,
    },

    /// Lookup of an id that is not registered
    #[error("Backend '{0}' not found in registry")]
    BackendNotFound(String),

    /// A policy candidate that is not registered
    #[error("Policy '{policy}' names unknown backend '{backend}'")]
    UnknownBackend {
        /// Policy entry name
        policy: String,
        /// Unregistered id
        backend: String,
    },

    /// A policy without candidates
    #[error("Policy '{policy}' has no candidates")]
    EmptyCandidates {
        /// Policy entry name
        policy: String,
    },

    /// A policy listing the same backend twice
    #[error("Policy '{policy}' lists backend '{backend}' more than once")]
    DuplicateCandidate {
        /// Policy entry name
        policy: String,
        /// Repeated id
        backend: String,
    },

    /// Two policies with identical predicates
    #[error("Policies '{first}' and '{second}' have identical predicates")]
    AmbiguousPolicy {
        /// Earlier entry
        first: String,
        /// Later entry
        second: String,
    },

    /// No policy entry applies to a request context
    #[error("No policy matches context ({context})")]
    NoPolicyMatch {
        /// The unmatched context
        context: RequestContext,
    },
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Health section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthToml {
    /// Failures within the window that degrade a backend
    pub failure_threshold: Option<u32>,

    /// Failure window in milliseconds
    pub failure_window_ms: Option<u64>,

    /// Cool-down before an unavailable backend is probed, in milliseconds
    pub cooldown_ms: Option<u64>,
}

/// One `[[backends]]` entry
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendToml {
    /// Unique backend id
    pub id: String,

    /// Price per 1,000 input tokens
    pub input_cost_per_k_tokens: Decimal,

    /// Price per 1,000 output tokens
    pub output_cost_per_k_tokens: Decimal,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,

    /// Capability tier (defaults to standard)
    #[serde(default)]
    pub tier: Option<TierCapability>,

    /// Context window in tokens
    #[serde(default)]
    pub max_context_tokens: Option<u32>,
}

impl BackendToml {
    fn to_descriptor(&self) -> BackendDescriptor {
        let mut descriptor = BackendDescriptor::new(
            self.id.clone(),
            self.input_cost_per_k_tokens,
            self.output_cost_per_k_tokens,
            Duration::from_millis(self.timeout_ms),
        );
        if let Some(tier) = self.tier {
            descriptor = descriptor.with_tier(tier);
        }
        if let Some(tokens) = self.max_context_tokens {
            descriptor = descriptor.with_max_context(tokens);
        }
        descriptor
    }
}

/// One `[[policies]]` entry
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyToml {
    /// Entry name
    pub name: String,

    /// Required audience tier (omit for any)
    #[serde(default)]
    pub audience_tier: Option<AudienceTier>,

    /// Required content domain (omit for any)
    #[serde(default)]
    pub content_domain: Option<ContentDomain>,

    /// Required workflow stage (omit for any)
    #[serde(default)]
    pub workflow_stage: Option<WorkflowStage>,

    /// Backend ids in preference order
    pub candidates: Vec<String>,

    /// Expected cost of a typical request
    #[serde(default)]
    pub estimated_cost: Option<Decimal>,

    /// Top-level fields the decoded response must carry
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl PolicyToml {
    fn to_entry(&self) -> PolicyEntry {
        let predicate = ContextMatch {
            audience_tier: self.audience_tier,
            content_domain: self.content_domain,
            workflow_stage: self.workflow_stage,
        };
        PolicyEntry::new(self.name.clone(), predicate, self.candidates.clone())
            .with_estimated_cost(self.estimated_cost.unwrap_or(Decimal::ZERO))
            .with_schema(ExpectedSchema::new(self.required_fields.clone()))
    }
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwitchyardToml {
    /// Health monitor section
    pub health: HealthToml,

    /// Backend registry
    pub backends: Vec<BackendToml>,

    /// Policy table, in resolution order
    pub policies: Vec<PolicyToml>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Loaded (but not yet validated) configuration
///
/// Use [`load_config`] to load it with proper priority handling and
/// [`SwitchyardConfig::build_catalog`] to validate the backends and policies.
#[derive(Clone, Debug)]
pub struct SwitchyardConfig {
    /// Health monitor thresholds
    pub health: HealthConfig,

    /// Backends in declaration order
    pub backends: Vec<BackendDescriptor>,

    /// Policy entries in declaration order
    pub policies: Vec<PolicyEntry>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            health: HealthConfig::default(),
            backends: Vec::new(),
            policies: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SwitchyardConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text (no environment overrides)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] for malformed TOML, unknown keys
    /// or unknown context values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let toml_config: SwitchyardToml = toml::from_str(content)?;
        let mut config = Self::default();
        apply_toml_config(&mut config, &toml_config);
        config.source = ConfigSource::File;
        Ok(config)
    }

    /// Add a backend
    #[must_use]
    pub fn with_backend(mut self, backend: BackendDescriptor) -> Self {
        self.backends.push(backend);
        self
    }

    /// Append a policy entry
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyEntry) -> Self {
        self.policies.push(policy);
        self
    }

    /// Replace the health settings
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Validate backends and policies into an immutable catalog
    ///
    /// # Errors
    ///
    /// Returns the first registry or policy [`ConfigError`].
    pub fn build_catalog(&self) -> Result<Catalog, ConfigError> {
        Catalog::new(self.backends.clone(), self.policies.clone())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchyard/switchyard.toml` or
/// `~/.config/switchyard/switchyard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchyard").join("switchyard.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting health settings are invalid. A missing config file is not
/// an error (an empty catalog is used).
pub fn load_config() -> Result<SwitchyardConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the health settings fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SwitchyardConfig, ConfigError> {
    let mut config = SwitchyardConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SwitchyardToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                backends = config.backends.len(),
                policies = config.policies.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using empty catalog"
            );
        }
    }

    apply_env_config(&mut config);
    config.health.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut SwitchyardConfig, toml: &SwitchyardToml) {
    if let Some(threshold) = toml.health.failure_threshold {
        config.health.failure_threshold = threshold;
    }
    if let Some(ms) = toml.health.failure_window_ms {
        config.health.failure_window = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.health.cooldown_ms {
        config.health.cooldown = Duration::from_millis(ms);
    }

    config.backends = toml.backends.iter().map(BackendToml::to_descriptor).collect();
    config.policies = toml.policies.iter().map(PolicyToml::to_entry).collect();
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut SwitchyardConfig) {
    if let Some(threshold) = env_number::<u32>(ENV_FAILURE_THRESHOLD) {
        config.health.failure_threshold = threshold;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_number::<u64>(ENV_FAILURE_WINDOW_MS) {
        config.health.failure_window = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_number::<u64>(ENV_COOLDOWN_MS) {
        config.health.cooldown = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring non-numeric environment override");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
