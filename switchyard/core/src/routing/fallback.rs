//! Fallback Chain
//!
//! Walks a routing decision's candidates in order and keeps the trail of
//! what happened to each one.
//!
//! ```text
//! primary (low) fails
//!         |
//!         v
//! FallbackChain::next_candidate()
//!         |
//!         v
//! fallback 1: mid (skipped if it went unavailable meanwhile)
//!         |
//!         v
//! fallback 2: high (last resort)
//!         |
//!         v
//! exhausted
//! ```
//!
//! Each candidate is yielded at most once, so the number of attempts is
//! bounded by the length of the decision.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::router::RoutingDecision;

// ============================================================================
// Attempt Trail
// ============================================================================

/// What happened to one candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Invoked and produced a valid result
    Succeeded,
    /// Invoked and failed (error, timeout or invalid response)
    Failed,
    /// Not invoked: unavailable or its probe was claimed elsewhere
    Skipped,
    /// Invoked but cut short by the caller's deadline
    Interrupted,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Interrupted => "interrupted",
        })
    }
}

/// One entry of the attempt trail
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// Backend considered
    pub backend_id: String,
    /// Outcome
    pub outcome: AttemptOutcome,
    /// Failure or skip reason
    pub reason: Option<String>,
    /// Time spent on this attempt, in milliseconds
    pub latency_ms: u64,
}

impl AttemptRecord {
    /// Successful attempt
    pub fn succeeded(backend_id: impl Into<String>, latency: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            outcome: AttemptOutcome::Succeeded,
            reason: None,
            latency_ms: millis(latency),
        }
    }

    /// Failed attempt
    pub fn failed(backend_id: impl Into<String>, reason: impl Into<String>, latency: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            outcome: AttemptOutcome::Failed,
            reason: Some(reason.into()),
            latency_ms: millis(latency),
        }
    }

    /// Candidate passed over without invocation
    pub fn skipped(backend_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            outcome: AttemptOutcome::Skipped,
            reason: Some(reason.into()),
            latency_ms: 0,
        }
    }

    /// Attempt cut short by the deadline
    pub fn interrupted(backend_id: impl Into<String>, latency: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            outcome: AttemptOutcome::Interrupted,
            reason: Some("deadline exceeded".to_string()),
            latency_ms: millis(latency),
        }
    }
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.backend_id, self.outcome)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Render a trail as `"low failed (timed out after 100ms), mid skipped (...)"`
pub(crate) fn summarize(attempts: &[AttemptRecord]) -> String {
    if attempts.is_empty() {
        return "no candidates attempted".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// Ordered, single-pass walk over a decision's candidates
#[derive(Clone, Debug)]
pub struct FallbackChain {
    candidates: Vec<String>,
    position: usize,
    trail: Vec<AttemptRecord>,
}

impl FallbackChain {
    /// Chain over `primary` followed by the fallbacks
    #[must_use]
    pub fn from_decision(decision: &RoutingDecision) -> Self {
        Self {
            candidates: decision.candidates().map(str::to_string).collect(),
            position: 0,
            trail: Vec::with_capacity(decision.fallbacks.len() + 1),
        }
    }

    /// Next candidate to try, or `None` when exhausted
    pub fn next_candidate(&mut self) -> Option<String> {
        let next = self.candidates.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }
        next
    }

    /// Append to the trail
    pub fn record(&mut self, attempt: AttemptRecord) {
        self.trail.push(attempt);
    }

    /// Candidates not yet yielded
    #[must_use]
    pub fn remaining(&self) -> &[String] {
        &self.candidates[self.position.min(self.candidates.len())..]
    }

    /// Total number of candidates
    #[must_use]
    pub fn depth(&self) -> usize {
        self.candidates.len()
    }

    /// Trail so far
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.trail
    }

    /// Consume the chain, keeping the trail
    #[must_use]
    pub fn into_attempts(self) -> Vec<AttemptRecord> {
        self.trail
    }

    /// Reason for landing on a later candidate, if any earlier one was passed over
    #[must_use]
    pub fn fallback_reason(&self) -> Option<String> {
        let passed_over: Vec<_> = self
            .trail
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Succeeded)
            .collect();
        if passed_over.is_empty() {
            return None;
        }
        Some(
            passed_over
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}
