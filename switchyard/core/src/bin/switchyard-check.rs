//! Switchyard Configuration Check
//!
//! Loads a configuration file, validates the backend registry and policy
//! table, and logs what would be served. Performs no dispatch.
//!
//! # Usage
//!
//! ```bash
//! # Check the default file ($XDG_CONFIG_HOME/switchyard/switchyard.toml)
//! switchyard-check
//!
//! # Check a specific file
//! switchyard-check ./switchyard.toml
//!
//! # With verbose logging
//! RUST_LOG=debug switchyard-check
//! ```
//!
//! Exits non-zero on any configuration error.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};

use switchyard_core::config;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("switchyard_core=info".parse()?)
                .add_directive("switchyard_check=info".parse()?),
        )
        .with_target(true)
        .init();

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(config::default_config_path);

    let Some(path) = path else {
        anyhow::bail!("no configuration path given and no config directory available");
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found; every request would fail with no policy match");
    }

    let loaded = config::load_config_from_path(Some(path.clone()))
        .with_context(|| format!("loading {}", path.display()))?;

    info!(
        source = %loaded.source(),
        failure_threshold = loaded.health.failure_threshold,
        failure_window_ms = loaded.health.failure_window.as_millis(),
        cooldown_ms = loaded.health.cooldown.as_millis(),
        "Health settings"
    );

    let catalog = loaded
        .build_catalog()
        .with_context(|| format!("validating {}", path.display()))?;

    for backend in catalog.registry().iter() {
        info!(
            backend = %backend.id,
            tier = ?backend.tier,
            input_per_k = %backend.input_cost_per_k_tokens,
            output_per_k = %backend.output_cost_per_k_tokens,
            timeout_ms = backend.timeout_ms,
            max_context_tokens = backend.max_context_tokens,
            "Backend"
        );
    }

    for (position, policy) in catalog.policies().entries().iter().enumerate() {
        info!(
            position,
            policy = %policy.name,
            predicate = %policy.predicate,
            candidates = %policy.candidates.join(" -> "),
            estimated_cost = %policy.estimated_cost,
            required_fields = ?policy.schema.required_fields,
            "Policy"
        );
    }

    info!(
        backends = catalog.registry().len(),
        policies = catalog.policies().len(),
        "Configuration OK"
    );
    Ok(())
}
