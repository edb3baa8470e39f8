//! Shared fixtures for integration tests
//!
//! [`ScriptedTransport`] answers per backend from a queue of scripted steps,
//! falling back to a standing step once the queue is empty. Delays use
//! `tokio::time::sleep`, so tests run on a paused clock.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use switchyard_core::routing::{ContextMatch, PolicyEntry};
use switchyard_core::{
    AudienceTier, BackendDescriptor, BackendTransport, ContentDomain, ExpectedSchema, HealthConfig,
    InvocationError, RawResponse, RequestContext, Switchyard, SwitchyardConfig, TokenUsage,
    WorkflowStage,
};

/// Valid lesson body for the `title`/`body` schema
pub const LESSON: &str = r#"{"title": "Fractions", "body": "Cut the pizza in halves."}"#;

/// What a backend does when invoked
#[derive(Clone, Debug)]
pub enum Step {
    Reply { body: String, tokens: TokenUsage },
    Fail(InvocationError),
    Delay(Duration, Box<Step>),
}

impl Step {
    pub fn lesson() -> Self {
        Self::Reply {
            body: LESSON.to_string(),
            tokens: TokenUsage::new(1_000, 500),
        }
    }

    pub fn body(body: &str) -> Self {
        Self::Reply {
            body: body.to_string(),
            tokens: TokenUsage::new(1_000, 500),
        }
    }

    pub fn server_error() -> Self {
        Self::Fail(InvocationError::Status {
            status: 503,
            message: "overloaded".to_string(),
        })
    }

    /// Reply with a lesson after `delay`
    pub fn slow(delay: Duration) -> Self {
        Self::Delay(delay, Box::new(Self::lesson()))
    }
}

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Transport driven by per-backend scripts
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Step>>>,
    standing: Mutex<HashMap<String, Step>>,
    calls: Mutex<Vec<String>>,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call to `backend_id` performs `step` (after any queued steps)
    pub fn always(&self, backend_id: &str, step: Step) {
        self.standing.lock().insert(backend_id.to_string(), step);
    }

    /// Next call to `backend_id` performs `step`
    pub fn then(&self, backend_id: &str, step: Step) {
        self.queued
            .lock()
            .entry(backend_id.to_string())
            .or_default()
            .push_back(step);
    }

    /// Run `hook` with the backend id at the start of every call
    pub fn on_invoke(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    /// Backends invoked so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, backend_id: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == backend_id).count()
    }

    fn next_step(&self, backend_id: &str) -> Step {
        if let Some(step) = self
            .queued
            .lock()
            .get_mut(backend_id)
            .and_then(VecDeque::pop_front)
        {
            return step;
        }
        self.standing
            .lock()
            .get(backend_id)
            .cloned()
            .unwrap_or_else(|| Step::Fail(InvocationError::Unreachable(backend_id.to_string())))
    }
}

#[async_trait]
impl BackendTransport for ScriptedTransport {
    async fn invoke(
        &self,
        backend_id: &str,
        _prompt: &str,
        _timeout: Duration,
    ) -> Result<RawResponse, InvocationError> {
        self.calls.lock().push(backend_id.to_string());
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(backend_id);
        }

        let mut step = self.next_step(backend_id);
        loop {
            match step {
                Step::Reply { body, tokens } => return Ok(RawResponse::new(body, tokens)),
                Step::Fail(e) => return Err(e),
                Step::Delay(delay, then) => {
                    tokio::time::sleep(delay).await;
                    step = *then;
                }
            }
        }
    }
}

pub fn backend(id: &str, timeout_ms: u64) -> BackendDescriptor {
    let (input, output) = match id {
        "low" => (dec!(0.2), dec!(0.6)),
        "mid" => (dec!(3), dec!(15)),
        _ => (dec!(15), dec!(75)),
    };
    BackendDescriptor::new(id, input, output, Duration::from_millis(timeout_ms))
}

fn lesson_schema() -> ExpectedSchema {
    ExpectedSchema::default().requires("title").requires("body")
}

/// Three backends; early learners route `[low, mid, high]`, everything
/// else `[mid, high]`
pub fn three_tier_config(health: HealthConfig) -> SwitchyardConfig {
    SwitchyardConfig::new()
        .with_health(health)
        .with_backend(backend("low", 100))
        .with_backend(backend("mid", 10_000))
        .with_backend(backend("high", 10_000))
        .with_policy(
            PolicyEntry::new(
                "early-learners",
                ContextMatch::any().tier(AudienceTier::Early),
                vec!["low".into(), "mid".into(), "high".into()],
            )
            .with_estimated_cost(dec!(0.001))
            .with_schema(lesson_schema()),
        )
        .with_policy(
            PolicyEntry::new("default", ContextMatch::any(), vec!["mid".into(), "high".into()])
                .with_estimated_cost(dec!(0.01))
                .with_schema(lesson_schema()),
        )
}

pub fn health_config() -> HealthConfig {
    HealthConfig {
        failure_threshold: 3,
        failure_window: Duration::from_secs(60),
        cooldown: Duration::from_secs(30),
    }
}

pub fn switchyard(transport: &Arc<ScriptedTransport>) -> Switchyard {
    switchyard_with(three_tier_config(health_config()), transport)
}

pub fn switchyard_with(config: SwitchyardConfig, transport: &Arc<ScriptedTransport>) -> Switchyard {
    Switchyard::builder(config)
        .transport(Arc::clone(transport) as Arc<dyn BackendTransport>)
        .build()
        .expect("valid test configuration")
}

pub fn early_math() -> RequestContext {
    RequestContext::new(AudienceTier::Early, ContentDomain::Math, WorkflowStage::Learn)
}

pub fn high_science() -> RequestContext {
    RequestContext::new(AudienceTier::High, ContentDomain::Science, WorkflowStage::Discover)
}

/// Drive a backend to Unavailable with threshold + 1 failures
pub fn knock_out(switchyard: &Switchyard, backend_id: &str) {
    let threshold = switchyard.health().config().failure_threshold;
    for _ in 0..=threshold {
        switchyard.health().record_failure(backend_id, "connection refused");
    }
}
