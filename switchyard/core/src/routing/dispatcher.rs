//! Request Dispatch
//!
//! Executes a routing decision against the transport, one candidate at a
//! time:
//!
//! ```text
//! Pending -> Invoking(backend) -> Success
//!                |
//!                +-> Fail -> Invoking(next) ... -> Exhausted
//! ```
//!
//! - Every attempt is bounded by `min(backend timeout, remaining deadline)`;
//!   the transport future is dropped when the bound elapses
//! - A backend timeout, a transport error and a response that fails schema
//!   validation are all failed attempts, recorded with the health monitor
//! - The caller's deadline stops everything: the in-flight call is dropped,
//!   remaining candidates are skipped and the backend is not penalized. A
//!   deadline too large to represent means no deadline
//! - Before each attempt the live health record is consulted; a candidate
//!   that went Unavailable since routing, or whose recovery probe is already
//!   claimed, is skipped without counting as a failure

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::{AttemptError, DispatchError};
use super::fallback::{AttemptRecord, FallbackChain};
use super::health::{AttemptKind, HealthMonitor, HealthRecord};
use super::metrics::{MetricsAggregator, RequestOutcome};
use super::registry::TokenUsage;
use super::router::{order_candidates, RoutingDecision};
use super::Catalog;
use crate::backend::{BackendTransport, ResponseValidator};
use crate::context::RequestContext;

/// Verified output of a successful dispatch
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationResult {
    /// Id assigned to this request (appears in logs)
    pub request_id: Uuid,
    /// Decoded, schema-checked content
    pub content: serde_json::Value,
    /// Backend that produced the content
    pub model_used: String,
    /// Wall time of the whole dispatch, fallbacks included
    pub latency: Duration,
    /// Actual cost, from the tokens used and the rates of `model_used`
    pub cost: Decimal,
    /// Tokens reported by `model_used`
    pub tokens: TokenUsage,
    /// Routing decision, annotated if dispatch fell back
    pub routing_decision: RoutingDecision,
    /// What happened to each candidate considered
    pub attempts: Vec<AttemptRecord>,
}

/// Reports one admitted attempt back to the health monitor under the kind
/// it was admitted as; releases a probe claim if dropped unresolved
struct AttemptGuard<'a> {
    health: &'a HealthMonitor,
    backend_id: &'a str,
    kind: AttemptKind,
    settled: bool,
}

impl<'a> AttemptGuard<'a> {
    fn new(health: &'a HealthMonitor, backend_id: &'a str, kind: AttemptKind) -> Self {
        Self {
            health,
            backend_id,
            kind,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.health.record_success_as(self.backend_id, self.kind);
    }

    fn fail(mut self, reason: &str) {
        self.settled = true;
        self.health
            .record_failure_as(self.backend_id, self.kind, reason);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.health.abandon_attempt(self.backend_id, self.kind);
        }
    }
}

/// Runs requests through routing, failover and accounting
pub struct Dispatcher {
    catalog: Arc<ArcSwap<Catalog>>,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsAggregator>,
    transport: Arc<dyn BackendTransport>,
    validator: Arc<dyn ResponseValidator>,
}

impl Dispatcher {
    /// Wire a dispatcher to its shared state and collaborators
    pub fn new(
        catalog: Arc<ArcSwap<Catalog>>,
        health: Arc<HealthMonitor>,
        metrics: Arc<MetricsAggregator>,
        transport: Arc<dyn BackendTransport>,
        validator: Arc<dyn ResponseValidator>,
    ) -> Self {
        Self {
            catalog,
            health,
            metrics,
            transport,
            validator,
        }
    }

    /// Generate content for `prompt`, routed by `context`, within `deadline`
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Config`] if no policy matches the context
    /// - [`DispatchError::ExhaustedFallbacks`] if every candidate was skipped
    ///   or failed
    /// - [`DispatchError::DeadlineExceeded`] if the deadline expired first
    pub async fn generate(
        &self,
        prompt: &str,
        context: &RequestContext,
        deadline: Duration,
    ) -> Result<GenerationResult, DispatchError> {
        let started = Instant::now();
        let deadline_at = started.checked_add(deadline);
        let request_id = Uuid::new_v4();

        // One catalog for the whole request, even if a reload lands meanwhile.
        let catalog = self.catalog.load_full();

        let entry = match catalog.policies().resolve(context) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(request_id = %request_id, context = %context, "No routing policy");
                self.metrics.record_request(RequestOutcome::ConfigFailure);
                return Err(e.into());
            }
        };

        let decision = match order_candidates(entry, &self.health.snapshot()) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(request_id = %request_id, policy = %entry.name, "Candidates exhausted before dispatch");
                self.metrics.record_request(RequestOutcome::Exhausted);
                return Err(e.into());
            }
        };

        let mut chain = FallbackChain::from_decision(&decision);
        let mut attempt = 0u32;

        tracing::debug!(
            request_id = %request_id,
            policy = %decision.policy,
            primary = %decision.primary,
            candidates = chain.depth(),
            "Routed request"
        );

        while let Some(backend_id) = chain.next_candidate() {
            let now = Instant::now();
            let remaining = match deadline_at {
                Some(at) if now >= at => {
                    return Err(self.deadline_exceeded(request_id, deadline, chain));
                }
                Some(at) => Some(at - now),
                None => None,
            };

            let Some(kind) = self.health.begin_attempt(&backend_id) else {
                let reason = self
                    .health
                    .record(&backend_id)
                    .map_or_else(|| "not tracked".to_string(), |r| HealthRecord::skip_reason(&r));
                tracing::debug!(request_id = %request_id, backend = %backend_id, reason = %reason, "Skipping candidate");
                chain.record(AttemptRecord::skipped(backend_id, reason));
                continue;
            };
            let guard = AttemptGuard::new(&self.health, &backend_id, kind);

            let descriptor = match catalog.registry().describe(&backend_id) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    drop(guard);
                    self.metrics.record_request(RequestOutcome::ConfigFailure);
                    return Err(e.into());
                }
            };

            let timeout = descriptor.timeout();
            let limited_by_deadline = remaining.is_some_and(|r| r <= timeout);
            let budget = remaining.map_or(timeout, |r| r.min(timeout));
            attempt += 1;

            tracing::debug!(
                request_id = %request_id,
                backend = %backend_id,
                attempt,
                probe = kind.is_probe(),
                budget_ms = budget.as_millis(),
                "Invoking backend"
            );

            let attempt_started = Instant::now();
            let outcome =
                tokio::time::timeout(budget, self.transport.invoke(&backend_id, prompt, budget)).await;
            let elapsed = attempt_started.elapsed();

            let failure = match outcome {
                Err(_) if limited_by_deadline => {
                    drop(guard);
                    self.metrics.record_interrupted(&backend_id, elapsed);
                    chain.record(AttemptRecord::interrupted(backend_id.as_str(), elapsed));
                    return Err(self.deadline_exceeded(request_id, deadline, chain));
                }
                Err(_) => AttemptError::Timeout(budget),
                Ok(Err(e)) => AttemptError::Invocation(e),
                Ok(Ok(raw)) => match self.validator.decode(&raw, &entry.schema) {
                    Err(e) => AttemptError::SchemaValidation(e),
                    Ok(content) => {
                        guard.succeed();
                        let cost = descriptor.cost_for(raw.tokens);
                        self.metrics
                            .record_success(&backend_id, elapsed, raw.tokens, cost);
                        chain.record(AttemptRecord::succeeded(backend_id.as_str(), elapsed));

                        let routing_decision = decision.annotated(&backend_id, chain.fallback_reason());
                        self.metrics.record_request(RequestOutcome::Succeeded {
                            fallback: routing_decision.is_fallback,
                        });

                        let latency = started.elapsed();
                        tracing::debug!(
                            request_id = %request_id,
                            backend = %backend_id,
                            latency_ms = latency.as_millis(),
                            cost = %cost,
                            "Request completed"
                        );

                        return Ok(GenerationResult {
                            request_id,
                            content,
                            model_used: backend_id,
                            latency,
                            cost,
                            tokens: raw.tokens,
                            routing_decision,
                            attempts: chain.into_attempts(),
                        });
                    }
                },
            };

            let reason = failure.to_string();
            guard.fail(&reason);
            self.metrics
                .record_failure(&backend_id, elapsed, failure.is_timeout());
            tracing::warn!(
                request_id = %request_id,
                backend = %backend_id,
                attempt,
                error = %reason,
                remaining = chain.remaining().len(),
                "Attempt failed, falling back"
            );
            chain.record(AttemptRecord::failed(backend_id.as_str(), reason, elapsed));
        }

        tracing::warn!(
            request_id = %request_id,
            policy = %decision.policy,
            attempts = chain.attempts().len(),
            "All candidates exhausted"
        );
        self.metrics.record_request(RequestOutcome::Exhausted);
        Err(DispatchError::ExhaustedFallbacks {
            attempts: chain.into_attempts(),
        })
    }

    fn deadline_exceeded(&self, request_id: Uuid, deadline: Duration, chain: FallbackChain) -> DispatchError {
        tracing::warn!(
            request_id = %request_id,
            deadline_ms = deadline.as_millis(),
            attempted = chain.attempts().len(),
            skipped = chain.remaining().len(),
            "Deadline exceeded"
        );
        self.metrics.record_request(RequestOutcome::DeadlineExceeded);
        DispatchError::DeadlineExceeded {
            deadline,
            attempts: chain.into_attempts(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}
