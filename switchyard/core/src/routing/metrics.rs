//! Dispatch Metrics
//!
//! Cumulative accounting for the dispatch engine:
//! - Per-backend requests, successes, failures, timeouts
//! - Per-backend cost, input/output tokens and latency (with a histogram for
//!   p50/p90/p99)
//! - Request-level totals: requests, fallbacks, exhausted, deadline exceeded,
//!   configuration failures
//!
//! # Generations
//!
//! All tallies live in a generation held by an `ArcSwap`. [`MetricsAggregator::reset`]
//! swaps in a fresh generation and returns the final snapshot of the old one,
//! so periodic rollups never lose or double-count a request that completed
//! before the swap. No per-request history is kept.
//!
//! Each backend has its own lock; request-level counters are atomics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;

use super::registry::TokenUsage;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// Default latency bucket upper bounds, in milliseconds
pub const LATENCY_BUCKETS_MS: [u64; 13] = [
    10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000, 120_000,
];

/// A histogram for tracking latency distributions
///
/// Values above the last bound land in the last bucket.
#[derive(Clone, Debug)]
pub struct Histogram {
    buckets: Vec<u64>,
    counts: Vec<u64>,
    total: u64,
    sum: u64,
    min: u64,
    max: u64,
}

impl Histogram {
    /// Create a new histogram with the given (ascending, non-empty) bucket bounds
    #[must_use]
    pub fn new(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len()];
        Self {
            buckets,
            counts,
            total: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
        }
    }

    /// Create with default latency buckets (in milliseconds)
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(LATENCY_BUCKETS_MS.to_vec())
    }

    /// Record a value
    pub fn record(&mut self, value: u64) {
        let Some(last) = self.buckets.len().checked_sub(1) else {
            return;
        };
        let idx = self.buckets.iter().position(|&b| value <= b).unwrap_or(last);

        self.counts[idx] += 1;
        self.total += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Get histogram snapshot
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts: self.counts.clone(),
            total: self.total,
            sum: self.sum,
            min: if self.total == 0 { 0 } else { self.min },
            max: self.max,
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    pub buckets: Vec<u64>,
    /// Count per bucket
    pub counts: Vec<u64>,
    /// Number of samples
    pub total: u64,
    /// Sum of samples
    pub sum: u64,
    /// Smallest sample (0 when empty)
    pub min: u64,
    /// Largest sample
    pub max: u64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket holding the `p` quantile, capped at the
    /// largest sample
    #[must_use]
    pub fn percentile(&self, p: f64) -> u64 {
        if self.total == 0 {
            return 0;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let target = ((self.total as f64 * p.clamp(0.0, 1.0)).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets[i].min(self.max);
            }
        }

        self.max
    }

    /// Get p50
    #[must_use]
    pub fn p50(&self) -> u64 {
        self.percentile(0.5)
    }

    /// Get p90
    #[must_use]
    pub fn p90(&self) -> u64 {
        self.percentile(0.9)
    }

    /// Get p99
    #[must_use]
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }
}

// ============================================================================
// Per-Backend Tally
// ============================================================================

#[derive(Debug)]
struct BackendTally {
    requests: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    interrupted: u64,
    cost: Decimal,
    input_tokens: u64,
    output_tokens: u64,
    latency_ms_sum: u64,
    latency: Histogram,
}

impl BackendTally {
    fn new() -> Self {
        Self {
            requests: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            interrupted: 0,
            cost: Decimal::ZERO,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms_sum: 0,
            latency: Histogram::latency_default(),
        }
    }

    fn observe_latency(&mut self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.requests += 1;
        self.latency_ms_sum = self.latency_ms_sum.saturating_add(ms);
        self.latency.record(ms);
    }

    fn to_metrics(&self) -> BackendMetrics {
        let latency = self.latency.snapshot();
        BackendMetrics {
            requests: self.requests,
            successes: self.successes,
            failures: self.failures,
            timeouts: self.timeouts,
            interrupted: self.interrupted,
            cost: self.cost,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            latency_ms_sum: self.latency_ms_sum,
            latency_p50_ms: latency.p50(),
            latency_p90_ms: latency.p90(),
            latency_p99_ms: latency.p99(),
            latency,
        }
    }
}

/// Copy of one backend's counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackendMetrics {
    /// Invocations started
    pub requests: u64,
    /// Invocations that produced a valid result
    pub successes: u64,
    /// Invocations that failed (timeouts included)
    pub failures: u64,
    /// Failures that were timeouts
    pub timeouts: u64,
    /// Invocations cut short by a caller deadline
    pub interrupted: u64,
    /// Summed actual cost
    pub cost: Decimal,
    /// Summed input tokens
    pub input_tokens: u64,
    /// Summed output tokens
    pub output_tokens: u64,
    /// Summed latency
    pub latency_ms_sum: u64,
    /// Median latency
    pub latency_p50_ms: u64,
    /// 90th percentile latency
    pub latency_p90_ms: u64,
    /// 99th percentile latency
    pub latency_p99_ms: u64,
    /// Full latency distribution
    pub latency: HistogramSnapshot,
}

impl BackendMetrics {
    /// Fraction of invocations that failed (0.0 when idle)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}

// ============================================================================
// Request Outcome
// ============================================================================

/// How a whole `generate` call ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A result was returned
    Succeeded {
        /// The backend used was not the policy's first choice
        fallback: bool,
    },
    /// Every candidate was skipped or failed
    Exhausted,
    /// The caller's deadline expired
    DeadlineExceeded,
    /// No policy matched or the catalog was invalid
    ConfigFailure,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Copy-out view of every counter in one generation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// When this generation started
    pub since: DateTime<Utc>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// `generate` calls
    pub total_requests: u64,
    /// Calls that returned a result
    pub successful_requests: u64,
    /// Successful calls served by a fallback
    pub fallback_requests: u64,
    /// Calls that ended in exhaustion
    pub exhausted_requests: u64,
    /// Calls that hit the caller deadline
    pub deadline_exceeded: u64,
    /// Calls rejected by configuration (no policy match)
    pub config_failures: u64,
    /// Summed actual cost across backends
    pub total_cost: Decimal,
    /// Summed input tokens across backends
    pub total_input_tokens: u64,
    /// Summed output tokens across backends
    pub total_output_tokens: u64,
    /// Invocations per backend
    pub requests_by_backend: BTreeMap<String, u64>,
    /// Full per-backend counters
    pub backends: BTreeMap<String, BackendMetrics>,
}

impl MetricsSnapshot {
    /// Counters for one backend
    #[must_use]
    pub fn backend(&self, backend_id: &str) -> Option<&BackendMetrics> {
        self.backends.get(backend_id)
    }
}

// ============================================================================
// Aggregator
// ============================================================================

#[derive(Debug)]
struct Generation {
    since: DateTime<Utc>,
    backends: DashMap<String, Arc<Mutex<BackendTally>>>,
    requests: AtomicU64,
    successes: AtomicU64,
    fallbacks: AtomicU64,
    exhausted: AtomicU64,
    deadline_exceeded: AtomicU64,
    config_failures: AtomicU64,
}

impl Generation {
    fn new() -> Self {
        Self {
            since: Utc::now(),
            backends: DashMap::new(),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            deadline_exceeded: AtomicU64::new(0),
            config_failures: AtomicU64::new(0),
        }
    }

    fn tally(&self, backend_id: &str) -> Arc<Mutex<BackendTally>> {
        if let Some(existing) = self.backends.get(backend_id) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.backends
                .entry(backend_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(BackendTally::new())))
                .value(),
        )
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let tallies: Vec<(String, Arc<Mutex<BackendTally>>)> = self
            .backends
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let backends: BTreeMap<String, BackendMetrics> = tallies
            .into_iter()
            .map(|(id, tally)| (id, tally.lock().to_metrics()))
            .collect();

        MetricsSnapshot {
            since: self.since,
            taken_at: Utc::now(),
            total_requests: self.requests.load(Ordering::Relaxed),
            successful_requests: self.successes.load(Ordering::Relaxed),
            fallback_requests: self.fallbacks.load(Ordering::Relaxed),
            exhausted_requests: self.exhausted.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
            config_failures: self.config_failures.load(Ordering::Relaxed),
            total_cost: backends.values().map(|b| b.cost).sum(),
            total_input_tokens: backends.values().map(|b| b.input_tokens).sum(),
            total_output_tokens: backends.values().map(|b| b.output_tokens).sum(),
            requests_by_backend: backends.iter().map(|(id, b)| (id.clone(), b.requests)).collect(),
            backends,
        }
    }
}

/// Thread-safe metrics sink shared by every dispatch
#[derive(Debug)]
pub struct MetricsAggregator {
    current: ArcSwap<Generation>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Generation::new()),
        }
    }

    /// Count a successful invocation
    pub fn record_success(&self, backend_id: &str, latency: Duration, tokens: TokenUsage, cost: Decimal) {
        let tally = self.current.load().tally(backend_id);
        let mut tally = tally.lock();
        tally.observe_latency(latency);
        tally.successes += 1;
        tally.cost += cost;
        tally.input_tokens = tally.input_tokens.saturating_add(tokens.input);
        tally.output_tokens = tally.output_tokens.saturating_add(tokens.output);
    }

    /// Count a failed invocation
    pub fn record_failure(&self, backend_id: &str, latency: Duration, timed_out: bool) {
        let tally = self.current.load().tally(backend_id);
        let mut tally = tally.lock();
        tally.observe_latency(latency);
        tally.failures += 1;
        if timed_out {
            tally.timeouts += 1;
        }
    }

    /// Count an invocation cut short by the caller's deadline
    pub fn record_interrupted(&self, backend_id: &str, latency: Duration) {
        let tally = self.current.load().tally(backend_id);
        let mut tally = tally.lock();
        tally.observe_latency(latency);
        tally.interrupted += 1;
    }

    /// Count a finished `generate` call
    pub fn record_request(&self, outcome: RequestOutcome) {
        let generation = self.current.load();
        generation.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            RequestOutcome::Succeeded { fallback } => {
                if fallback {
                    generation.fallbacks.fetch_add(1, Ordering::Relaxed);
                }
                &generation.successes
            }
            RequestOutcome::Exhausted => &generation.exhausted,
            RequestOutcome::DeadlineExceeded => &generation.deadline_exceeded,
            RequestOutcome::ConfigFailure => &generation.config_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out the current generation
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.current.load().snapshot()
    }

    /// Start a new generation, returning the final snapshot of the old one
    pub fn reset(&self) -> MetricsSnapshot {
        let old = self.current.swap(Arc::new(Generation::new()));
        tracing::debug!(since = %old.since, "Metrics generation rolled over");
        old.snapshot()
    }

    /// Render the current generation in Prometheus text exposition format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut output = String::new();

        let totals = [
            ("switchyard_requests_total", "Generate calls", snap.total_requests),
            ("switchyard_requests_succeeded_total", "Generate calls that returned a result", snap.successful_requests),
            ("switchyard_fallbacks_total", "Successful calls served by a fallback backend", snap.fallback_requests),
            ("switchyard_exhausted_total", "Calls where every candidate failed or was skipped", snap.exhausted_requests),
            ("switchyard_deadline_exceeded_total", "Calls that hit the caller deadline", snap.deadline_exceeded),
            ("switchyard_config_failures_total", "Calls rejected by configuration", snap.config_failures),
        ];
        for (name, help, value) in totals {
            output.push_str(&format!(
                "# HELP {name} {help}\n\
                 # TYPE {name} counter\n\
                 {name} {value}\n\n"
            ));
        }

        output.push_str(&format!(
            "# HELP switchyard_cost_total Summed actual cost\n\
             # TYPE switchyard_cost_total counter\n\
             switchyard_cost_total {}\n\n",
            snap.total_cost
        ));

        if snap.backends.is_empty() {
            return output;
        }

        let per_backend: [(&str, &str, &str, fn(&BackendMetrics) -> String); 9] = [
            ("switchyard_backend_requests_total", "Invocations per backend", "counter", |b| b.requests.to_string()),
            ("switchyard_backend_failures_total", "Failed invocations per backend", "counter", |b| b.failures.to_string()),
            ("switchyard_backend_timeouts_total", "Timed out invocations per backend", "counter", |b| b.timeouts.to_string()),
            ("switchyard_backend_input_tokens_total", "Input tokens per backend", "counter", |b| b.input_tokens.to_string()),
            ("switchyard_backend_output_tokens_total", "Output tokens per backend", "counter", |b| b.output_tokens.to_string()),
            ("switchyard_backend_cost_total", "Actual cost per backend", "counter", |b| b.cost.to_string()),
            ("switchyard_backend_latency_p50_ms", "Median invocation latency", "gauge", |b| b.latency_p50_ms.to_string()),
            ("switchyard_backend_latency_p90_ms", "90th percentile invocation latency", "gauge", |b| b.latency_p90_ms.to_string()),
            ("switchyard_backend_latency_p99_ms", "99th percentile invocation latency", "gauge", |b| b.latency_p99_ms.to_string()),
        ];
        for (name, help, kind, value) in per_backend {
            output.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n"));
            for (backend, metrics) in &snap.backends {
                output.push_str(&format!("{name}{{backend=\"{backend}\"}} {}\n", value(metrics)));
            }
            output.push('\n');
        }

        output
    }
}
