//! Backend Health Monitor
//!
//! Tracks a rolling failure history per backend and exposes a three-state
//! health machine the router uses to skip or de-prioritize backends.
//!
//! # State Machine
//!
//! ```text
//! +---------+  F failures within W  +----------+   1 failure   +-------------+
//! | Healthy | --------------------> | Degraded | ------------> | Unavailable |
//! +---------+                       +----------+               +-------------+
//!    ^  ^             1 success          |                        |      ^
//!    |  +--------------------------------+                        |      |
//!    |                                                            |      |
//!    |      cool-down C elapsed (probe pending)                   |      |
//!    +------------------------------------------------------------+      |
//!    |                          probe failure                            |
//!    +-------------------------------------------------------------------+
//! ```
//!
//! - **Healthy**: failures are counted in a window of width `W`; a failure
//!   arriving after `W` has elapsed since the window opened starts a new one
//! - **Degraded**: still selectable, ordered after Healthy backends
//! - **Unavailable**: never selected until the cool-down elapses; the backend
//!   then returns to Healthy with a pending probe, and only one request may
//!   claim that probe
//!
//! # Probe Ownership
//!
//! [`HealthMonitor::begin_attempt`] hands back an [`AttemptKind`]. Only the
//! holder of the current `Probe` claim can settle or release the probe;
//! outcomes of ordinary attempts that started before the backend went down
//! arrive late and only update `last_failure`.
//!
//! # Thread Safety
//!
//! Each backend has its own `parking_lot::Mutex`, reached through a `DashMap`.
//! The map guard is released before the mutex is taken and no code path
//! holds two record locks at once.
//!
//! Time comes from `tokio::time::Instant`, so paused-clock tests drive the
//! window and cool-down deterministically.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::ConfigError;

// ============================================================================
// Health Configuration
// ============================================================================

/// Thresholds for the health state machine
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthConfig {
    /// Failures within the window that move Healthy to Degraded (`F`)
    pub failure_threshold: u32,

    /// Width of the failure window (`W`)
    pub failure_window: Duration,

    /// Time an Unavailable backend waits before its probe (`C`)
    pub cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

impl HealthConfig {
    /// Check the thresholds
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the threshold is zero or
    /// either duration is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.failure_window.is_zero() {
            return Err(ConfigError::ValidationError(
                "failure window must be positive".to_string(),
            ));
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::ValidationError(
                "cool-down must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Health State
// ============================================================================

/// Health of one backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Normal operation
    #[default]
    Healthy,
    /// Failing; selectable but ordered last
    Degraded,
    /// Excluded from selection until the cool-down elapses
    Unavailable,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        })
    }
}

/// How [`HealthMonitor::begin_attempt`] admitted a call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttemptKind {
    /// Ordinary call on a selectable backend
    Normal,
    /// The recovery probe, tagged with its claim number
    Probe(u64),
}

impl AttemptKind {
    /// Whether this attempt is a recovery probe
    #[must_use]
    pub fn is_probe(self) -> bool {
        matches!(self, Self::Probe(_))
    }
}

/// Copy of one backend's health record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    /// Backend id
    pub backend_id: String,
    /// Current state
    pub state: HealthState,
    /// Failures in the current window
    pub consecutive_failures: u32,
    /// When the current failure window opened
    pub window_start: Option<DateTime<Utc>>,
    /// Reason of the most recent failure
    pub last_failure: Option<String>,
    /// When the most recent failure happened
    pub last_failure_at: Option<DateTime<Utc>>,
    /// The next dispatch to this backend is a recovery probe
    pub probe_pending: bool,
    /// The pending probe has been claimed by a request
    pub probe_in_flight: bool,
}

impl HealthRecord {
    /// Fresh Healthy record
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            state: HealthState::Healthy,
            consecutive_failures: 0,
            window_start: None,
            last_failure: None,
            last_failure_at: None,
            probe_pending: false,
            probe_in_flight: false,
        }
    }

    /// Set the state
    #[must_use]
    pub fn with_state(mut self, state: HealthState) -> Self {
        self.state = state;
        self
    }

    /// Set the last failure reason
    #[must_use]
    pub fn with_last_failure(mut self, reason: impl Into<String>) -> Self {
        self.last_failure = Some(reason.into());
        self
    }

    /// Whether the router may offer this backend
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        self.state != HealthState::Unavailable && !self.probe_in_flight
    }

    /// Why this backend is passed over, with its last failure when known
    #[must_use]
    pub fn skip_reason(&self) -> String {
        let why = if self.state != HealthState::Unavailable && self.probe_in_flight {
            "probe in flight"
        } else {
            "unavailable"
        };
        match &self.last_failure {
            Some(reason) => format!("{why}: {reason}"),
            None => why.to_string(),
        }
    }
}

// ============================================================================
// Health Snapshot
// ============================================================================

/// Point-in-time copy of every health record, consumed by the router
///
/// Backends absent from the snapshot are treated as Healthy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    records: HashMap<String, HealthRecord>,
}

impl HealthSnapshot {
    /// Build a snapshot from records
    pub fn from_records(records: impl IntoIterator<Item = HealthRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.backend_id.clone(), r))
                .collect(),
        }
    }

    /// Add or replace a record
    #[must_use]
    pub fn with_record(mut self, record: HealthRecord) -> Self {
        self.records.insert(record.backend_id.clone(), record);
        self
    }

    /// Record for a backend
    #[must_use]
    pub fn get(&self, backend_id: &str) -> Option<&HealthRecord> {
        self.records.get(backend_id)
    }

    /// State of a backend (Healthy when unknown)
    #[must_use]
    pub fn state(&self, backend_id: &str) -> HealthState {
        self.records
            .get(backend_id)
            .map_or(HealthState::Healthy, |r| r.state)
    }

    /// Whether the router may offer a backend
    #[must_use]
    pub fn is_selectable(&self, backend_id: &str) -> bool {
        self.records
            .get(backend_id)
            .map_or(true, HealthRecord::is_selectable)
    }

    /// Last known failure reason for a backend
    #[must_use]
    pub fn last_failure(&self, backend_id: &str) -> Option<&str> {
        self.records
            .get(backend_id)
            .and_then(|r| r.last_failure.as_deref())
    }

    /// Records sorted by backend id
    #[must_use]
    pub fn records(&self) -> Vec<HealthRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        records
    }
}

// ============================================================================
// Per-Backend Entry
// ============================================================================

#[derive(Debug)]
struct HealthEntry {
    state: HealthState,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    window_started_at: Option<DateTime<Utc>>,
    last_failure: Option<String>,
    last_failure_at: Option<DateTime<Utc>>,
    unavailable_since: Option<Instant>,
    probe_pending: bool,
    /// Claim number of the probe in flight
    probe_claim: Option<u64>,
    /// Claims handed out so far; survives reset so stale claims never match
    probe_claims: u64,
}

impl HealthEntry {
    fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            window_start: None,
            window_started_at: None,
            last_failure: None,
            last_failure_at: None,
            unavailable_since: None,
            probe_pending: false,
            probe_claim: None,
            probe_claims: 0,
        }
    }

    fn holds_probe(&self, kind: AttemptKind) -> bool {
        match kind {
            AttemptKind::Probe(claim) => self.probe_claim == Some(claim),
            AttemptKind::Normal => false,
        }
    }

    fn clear_window(&mut self) {
        self.consecutive_failures = 0;
        self.window_start = None;
        self.window_started_at = None;
    }

    fn mark_unavailable(&mut self, now: Instant) {
        self.state = HealthState::Unavailable;
        self.unavailable_since = Some(now);
        self.probe_pending = false;
        self.probe_claim = None;
        self.clear_window();
    }

    /// Apply an elapsed cool-down
    fn refresh(&mut self, backend_id: &str, config: &HealthConfig, now: Instant) {
        if self.state != HealthState::Unavailable {
            return;
        }
        let Some(since) = self.unavailable_since else {
            return;
        };
        if now.saturating_duration_since(since) >= config.cooldown {
            self.state = HealthState::Healthy;
            self.unavailable_since = None;
            self.probe_pending = true;
            self.probe_claim = None;
            self.clear_window();
            tracing::info!(backend = %backend_id, "Cool-down elapsed, backend awaiting probe");
        }
    }

    fn to_record(&self, backend_id: &str) -> HealthRecord {
        HealthRecord {
            backend_id: backend_id.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            window_start: self.window_started_at,
            last_failure: self.last_failure.clone(),
            last_failure_at: self.last_failure_at,
            probe_pending: self.probe_pending,
            probe_in_flight: self.probe_claim.is_some(),
        }
    }
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Owner of every backend's health record
pub struct HealthMonitor {
    config: HealthConfig,
    records: DashMap<String, Arc<Mutex<HealthEntry>>>,
}

impl HealthMonitor {
    /// Create a monitor with no backends
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    /// Create a monitor tracking the given backends
    pub fn with_backends<'a>(config: HealthConfig, ids: impl IntoIterator<Item = &'a str>) -> Self {
        let monitor = Self::new(config);
        for id in ids {
            monitor.register(id);
        }
        monitor
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Start tracking a backend (no-op if already tracked)
    pub fn register(&self, backend_id: &str) {
        self.records
            .entry(backend_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HealthEntry::new())));
    }

    /// Track exactly `ids`: add new backends, drop missing ones, keep history
    /// for the rest
    pub fn reconcile<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let wanted: std::collections::HashSet<&str> = ids.into_iter().collect();
        self.records.retain(|id, _| {
            let keep = wanted.contains(id.as_str());
            if !keep {
                tracing::info!(backend = %id, "Backend removed, dropping health record");
            }
            keep
        });
        for id in wanted {
            self.register(id);
        }
    }

    /// Whether a backend is tracked
    #[must_use]
    pub fn contains(&self, backend_id: &str) -> bool {
        self.records.contains_key(backend_id)
    }

    fn entry(&self, backend_id: &str) -> Option<Arc<Mutex<HealthEntry>>> {
        self.records.get(backend_id).map(|e| Arc::clone(e.value()))
    }

    /// Current state of a backend, with any elapsed cool-down applied
    #[must_use]
    pub fn state(&self, backend_id: &str) -> Option<HealthState> {
        self.record(backend_id).map(|r| r.state)
    }

    /// Copy of one backend's record
    #[must_use]
    pub fn record(&self, backend_id: &str) -> Option<HealthRecord> {
        let entry = self.entry(backend_id)?;
        let mut guard = entry.lock();
        guard.refresh(backend_id, &self.config, Instant::now());
        Some(guard.to_record(backend_id))
    }

    /// Copy of every record
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let entries: Vec<(String, Arc<Mutex<HealthEntry>>)> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let now = Instant::now();
        HealthSnapshot::from_records(entries.into_iter().map(|(id, entry)| {
            let mut guard = entry.lock();
            guard.refresh(&id, &self.config, now);
            guard.to_record(&id)
        }))
    }

    /// Claim the right to invoke a backend right now
    ///
    /// Returns `None` if the backend is Unavailable, untracked, or its
    /// recovery probe is already claimed by another request. On a backend
    /// with a pending probe the caller receives [`AttemptKind::Probe`] and
    /// must report back with that same kind through
    /// [`record_success_as`](Self::record_success_as),
    /// [`record_failure_as`](Self::record_failure_as) or
    /// [`abandon_attempt`](Self::abandon_attempt).
    pub fn begin_attempt(&self, backend_id: &str) -> Option<AttemptKind> {
        let entry = self.entry(backend_id)?;
        let mut guard = entry.lock();
        guard.refresh(backend_id, &self.config, Instant::now());

        if guard.state == HealthState::Unavailable {
            return None;
        }
        if !guard.probe_pending {
            return Some(AttemptKind::Normal);
        }
        if guard.probe_claim.is_some() {
            return None;
        }
        guard.probe_claims += 1;
        let claim = guard.probe_claims;
        guard.probe_claim = Some(claim);
        tracing::debug!(backend = %backend_id, claim, "Recovery probe claimed");
        Some(AttemptKind::Probe(claim))
    }

    /// Release a probe claim without an outcome (the attempt never ran to
    /// completion for reasons unrelated to the backend)
    ///
    /// Ordinary attempts and stale claims release nothing.
    pub fn abandon_attempt(&self, backend_id: &str, kind: AttemptKind) {
        if let Some(entry) = self.entry(backend_id) {
            let mut guard = entry.lock();
            if guard.holds_probe(kind) {
                guard.probe_claim = None;
                tracing::debug!(backend = %backend_id, "Recovery probe released unsettled");
            }
        }
    }

    /// Record a successful ordinary call
    pub fn record_success(&self, backend_id: &str) {
        self.record_success_as(backend_id, AttemptKind::Normal);
    }

    /// Record a successful call admitted as `kind`
    pub fn record_success_as(&self, backend_id: &str, kind: AttemptKind) {
        let Some(entry) = self.entry(backend_id) else {
            tracing::debug!(backend = %backend_id, "Success for untracked backend ignored");
            return;
        };
        let mut guard = entry.lock();
        guard.refresh(backend_id, &self.config, Instant::now());

        let (state, probe_pending, holds_probe) =
            (guard.state, guard.probe_pending, guard.holds_probe(kind));
        match state {
            HealthState::Unavailable => {
                // Only the probe recovers an Unavailable backend.
                tracing::debug!(backend = %backend_id, "Late success ignored while unavailable");
            }
            HealthState::Degraded => {
                guard.state = HealthState::Healthy;
                guard.clear_window();
                tracing::info!(backend = %backend_id, "Backend recovered from degraded");
            }
            HealthState::Healthy if holds_probe => {
                guard.clear_window();
                guard.probe_pending = false;
                guard.probe_claim = None;
                tracing::info!(backend = %backend_id, "Recovery probe succeeded");
            }
            HealthState::Healthy if probe_pending => {
                tracing::debug!(backend = %backend_id, "Late success ignored while probe pending");
            }
            HealthState::Healthy => guard.clear_window(),
        }
    }

    /// Record a failed ordinary call
    pub fn record_failure(&self, backend_id: &str, reason: &str) {
        self.record_failure_as(backend_id, AttemptKind::Normal, reason);
    }

    /// Record a failed call admitted as `kind`
    pub fn record_failure_as(&self, backend_id: &str, kind: AttemptKind, reason: &str) {
        let Some(entry) = self.entry(backend_id) else {
            tracing::debug!(backend = %backend_id, "Failure for untracked backend ignored");
            return;
        };
        let now = Instant::now();
        let mut guard = entry.lock();
        guard.refresh(backend_id, &self.config, now);

        guard.last_failure = Some(reason.to_string());
        guard.last_failure_at = Some(Utc::now());

        let (state, probe_pending, holds_probe) =
            (guard.state, guard.probe_pending, guard.holds_probe(kind));
        match state {
            // Late outcomes only leave their reason behind.
            HealthState::Unavailable => {}
            HealthState::Healthy if probe_pending && !holds_probe => {}
            HealthState::Healthy if holds_probe => {
                guard.mark_unavailable(now);
                tracing::warn!(
                    backend = %backend_id,
                    reason = %reason,
                    cooldown_ms = self.config.cooldown.as_millis(),
                    "Recovery probe failed, backend unavailable again"
                );
            }
            HealthState::Healthy => {
                let window_open = guard.window_start.is_some_and(|start| {
                    now.saturating_duration_since(start) < self.config.failure_window
                });
                if window_open {
                    guard.consecutive_failures += 1;
                } else {
                    guard.window_start = Some(now);
                    guard.window_started_at = Some(Utc::now());
                    guard.consecutive_failures = 1;
                }

                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = HealthState::Degraded;
                    tracing::warn!(
                        backend = %backend_id,
                        consecutive_failures = guard.consecutive_failures,
                        reason = %reason,
                        "Backend degraded"
                    );
                }
            }
            HealthState::Degraded => {
                guard.mark_unavailable(now);
                tracing::warn!(
                    backend = %backend_id,
                    reason = %reason,
                    cooldown_ms = self.config.cooldown.as_millis(),
                    "Backend unavailable"
                );
            }
        }
    }

    /// Administrative reset to Healthy from any state
    ///
    /// Returns `false` for an untracked backend.
    pub fn reset(&self, backend_id: &str) -> bool {
        let Some(entry) = self.entry(backend_id) else {
            return false;
        };
        let mut guard = entry.lock();
        let previous = guard.state;
        let probe_claims = guard.probe_claims;
        *guard = HealthEntry::new();
        guard.probe_claims = probe_claims;
        tracing::info!(backend = %backend_id, previous = %previous, "Health record reset");
        true
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("backends", &self.records.len())
            .finish()
    }
}
