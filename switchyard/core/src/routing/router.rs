//! Backend Selection
//!
//! Pure, deterministic selection: the same context, policy table and health
//! snapshot always produce the same decision.
//!
//! # Selection
//!
//! ```text
//! 1. Resolve the policy entry (no match is fatal)
//! 2. Drop Unavailable candidates
//! 3. Stable-sort Healthy before Degraded (policy order kept per class)
//! 4. primary = first, fallbacks = rest
//! 5. Mark the decision as a fallback if the primary is not the policy's first choice
//! ```
//!
//! Health always outranks cost: a Healthy expensive backend is preferred over
//! a Degraded cheap one.

use rust_decimal::Decimal;
use serde::Serialize;

use super::error::RoutingError;
use super::fallback::AttemptRecord;
use super::health::{HealthRecord, HealthSnapshot, HealthState};
use super::policy::{PolicyEntry, PolicyTable};
use crate::context::RequestContext;

/// Reason recorded when routing passes over the policy's first choice
pub const PRIMARY_UNHEALTHY: &str = "primary unhealthy";

/// Outcome of routing one request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Name of the policy entry that matched
    pub policy: String,
    /// Backend to try first
    pub primary: String,
    /// Backends to try next, in order (never contains `primary`)
    pub fallbacks: Vec<String>,
    /// Estimated cost from the policy entry
    pub estimated_cost: Decimal,
    /// Whether the primary is not the policy's first choice
    pub is_fallback: bool,
    /// Why a fallback was used
    pub fallback_reason: Option<String>,
}

impl RoutingDecision {
    /// `primary` followed by `fallbacks`
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }

    /// Number of candidates
    #[must_use]
    pub fn len(&self) -> usize {
        self.fallbacks.len() + 1
    }

    /// Always false: a decision has a primary
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Copy annotated with a fallback that happened during dispatch
    #[must_use]
    pub fn annotated(&self, used: &str, reason: Option<String>) -> Self {
        let mut decision = self.clone();
        if used != self.primary {
            decision.is_fallback = true;
            decision.fallback_reason = match (decision.fallback_reason.take(), reason) {
                (Some(routing), Some(dispatch)) => Some(format!("{routing}; {dispatch}")),
                (routing, dispatch) => routing.or(dispatch),
            };
        }
        decision
    }
}

/// Route a request: resolve its policy, then order the candidates
///
/// # Errors
///
/// [`RoutingError::Config`] when no policy matches, and
/// [`RoutingError::Exhausted`] when every candidate is unavailable.
pub fn select_backend(
    policies: &PolicyTable,
    context: &RequestContext,
    health: &HealthSnapshot,
) -> Result<RoutingDecision, RoutingError> {
    let entry = policies.resolve(context)?;
    order_candidates(entry, health)
}

/// Order one policy entry's candidates by health
///
/// # Errors
///
/// [`RoutingError::Exhausted`] when every candidate is unavailable.
pub fn order_candidates(
    entry: &PolicyEntry,
    health: &HealthSnapshot,
) -> Result<RoutingDecision, RoutingError> {
    let mut selectable: Vec<&String> = entry
        .candidates
        .iter()
        .filter(|id| health.is_selectable(id))
        .collect();

    // Stable: policy order is kept within each class.
    selectable.sort_by_key(|id| health.state(id) == HealthState::Degraded);

    let Some((primary, fallbacks)) = selectable.split_first() else {
        let skipped = entry
            .candidates
            .iter()
            .map(|id| AttemptRecord::skipped(id.as_str(), unavailable_reason(health, id)))
            .collect();
        tracing::warn!(policy = %entry.name, "No available candidate");
        return Err(RoutingError::Exhausted {
            policy: entry.name.clone(),
            skipped,
        });
    };

    let is_fallback = entry.candidates.first() != Some(*primary);
    if is_fallback {
        tracing::warn!(
            policy = %entry.name,
            primary = %primary,
            "Policy's first choice is unhealthy, routing to fallback"
        );
    }

    Ok(RoutingDecision {
        policy: entry.name.clone(),
        primary: (*primary).clone(),
        fallbacks: fallbacks.iter().map(|id| (*id).clone()).collect(),
        estimated_cost: entry.estimated_cost,
        is_fallback,
        fallback_reason: is_fallback.then(|| PRIMARY_UNHEALTHY.to_string()),
    })
}

fn unavailable_reason(health: &HealthSnapshot, backend_id: &str) -> String {
    health
        .get(backend_id)
        .map_or_else(|| "unavailable".to_string(), HealthRecord::skip_reason)
}
