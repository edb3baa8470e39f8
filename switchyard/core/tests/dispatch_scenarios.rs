//! End-to-end dispatch scenarios on a paused clock
//!
//! Every test builds a full [`Switchyard`] over a [`ScriptedTransport`] and
//! drives it through `generate`, checking the result, the attempt trail, the
//! health records and the metrics together.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use common::{
    backend, early_math, health_config, high_science, knock_out, switchyard, switchyard_with,
    three_tier_config, ScriptedTransport, Step,
};
use switchyard_core::routing::{ContextMatch, PolicyEntry, RoutingError, PRIMARY_UNHEALTHY};
use switchyard_core::{
    AttemptOutcome, AudienceTier, ConfigError, ContentDomain, DispatchError, HealthState,
    RequestContext, Switchyard, SwitchyardConfig, WorkflowStage,
};

const DEADLINE: Duration = Duration::from_secs(30);

// ============================================================================
// Routing scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_healthy_primary_is_used() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::lesson());
    let switchyard = switchyard(&transport);

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();

    assert_eq!(result.model_used, "low");
    assert_eq!(result.routing_decision.primary, "low");
    assert_eq!(result.routing_decision.fallbacks, vec!["mid", "high"]);
    assert!(!result.routing_decision.is_fallback);
    assert_eq!(result.routing_decision.fallback_reason, None);
    assert_eq!(result.routing_decision.estimated_cost, dec!(0.001));
    // 1000 * 0.2 / 1000 + 500 * 0.6 / 1000
    assert_eq!(result.cost, dec!(0.5));
    assert_eq!(result.content["title"], "Fractions");
    assert_eq!(transport.calls(), vec!["low"]);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_primary_routes_to_next_candidate() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::lesson());
    transport.always("mid", Step::lesson());
    let switchyard = switchyard(&transport);
    knock_out(&switchyard, "low");

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();

    assert_eq!(result.model_used, "mid");
    assert_eq!(result.routing_decision.primary, "mid");
    assert!(result.routing_decision.is_fallback);
    assert_eq!(
        result.routing_decision.fallback_reason.as_deref(),
        Some(PRIMARY_UNHEALTHY)
    );
    assert_eq!(transport.calls(), vec!["mid"]);
    // 1000 * 3 / 1000 + 500 * 15 / 1000
    assert_eq!(result.cost, dec!(10.5));
}

#[tokio::test(start_paused = true)]
async fn test_degraded_primary_is_ordered_last() {
    let transport = ScriptedTransport::new();
    transport.always("mid", Step::lesson());
    let switchyard = switchyard(&transport);
    for _ in 0..3 {
        switchyard.health().record_failure("low", "slow");
    }
    assert_eq!(switchyard.health().state("low"), Some(HealthState::Degraded));

    let decision = switchyard.select_backend(&early_math()).unwrap();

    assert_eq!(decision.primary, "mid");
    assert_eq!(decision.fallbacks, vec!["high", "low"]);
    assert!(decision.is_fallback);
}

#[tokio::test(start_paused = true)]
async fn test_all_candidates_unavailable_exhausts_without_invoking() {
    let transport = ScriptedTransport::new();
    let switchyard = switchyard(&transport);
    for id in ["low", "mid", "high"] {
        knock_out(&switchyard, id);
    }

    let routing = switchyard.select_backend(&early_math()).unwrap_err();
    assert!(matches!(routing, RoutingError::Exhausted { ref policy, .. } if policy == "early-learners"));

    let err = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap_err();

    let DispatchError::ExhaustedFallbacks { attempts } = &err else {
        panic!("expected exhaustion, got {err}");
    };
    let ids: Vec<_> = attempts.iter().map(|a| a.backend_id.as_str()).collect();
    assert_eq!(ids, vec!["low", "mid", "high"]);
    assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::Skipped));
    assert_eq!(
        attempts[0].reason.as_deref(),
        Some("unavailable: connection refused")
    );
    assert!(transport.calls().is_empty());
    assert_eq!(switchyard.metrics().snapshot().exhausted_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_matching_policy_is_a_configuration_error() {
    let transport = ScriptedTransport::new();
    let config = SwitchyardConfig::new()
        .with_backend(backend("low", 1_000))
        .with_policy(PolicyEntry::new(
            "early-only",
            ContextMatch::any().tier(AudienceTier::Early),
            vec!["low".into()],
        ));
    let switchyard = switchyard_with(config, &transport);

    let err = switchyard
        .generate("Photosynthesis", &high_science(), DEADLINE)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Config(ConfigError::NoPolicyMatch { ref context }) if *context == high_science()
    ));
    assert!(err.attempts().is_empty());
    assert!(transport.calls().is_empty());
    assert_eq!(switchyard.metrics().snapshot().config_failures, 1);
}

// ============================================================================
// Failover during dispatch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_backend_timeout_falls_back_and_counts_failure() {
    let transport = ScriptedTransport::new();
    // low times out at 100ms
    transport.always("low", Step::slow(Duration::from_secs(5)));
    transport.always("mid", Step::lesson());
    let switchyard = switchyard(&transport);

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();

    assert_eq!(result.model_used, "mid");
    assert!(result.routing_decision.is_fallback);
    assert_eq!(result.routing_decision.primary, "low");
    assert_eq!(
        result.routing_decision.fallback_reason.as_deref(),
        Some("low failed (timed out after 100ms)")
    );
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed);
    assert_eq!(result.attempts[0].latency_ms, 100);
    assert_eq!(result.attempts[1].outcome, AttemptOutcome::Succeeded);
    assert_eq!(result.latency, Duration::from_millis(100));

    let low = switchyard.health().record("low").unwrap();
    assert_eq!(low.state, HealthState::Healthy);
    assert_eq!(low.consecutive_failures, 1);
    assert_eq!(low.last_failure.as_deref(), Some("timed out after 100ms"));

    let metrics = switchyard.metrics().snapshot();
    assert_eq!(metrics.fallback_requests, 1);
    assert_eq!(metrics.backend("low").unwrap().timeouts, 1);
    assert_eq!(metrics.backend("mid").unwrap().successes, 1);
    assert_eq!(metrics.total_cost, dec!(10.5));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_response_falls_back() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::body("Sure! Here is a lesson about fractions."));
    transport.always("mid", Step::body(r#"{"title": "Fractions"}"#));
    transport.always("high", Step::lesson());
    let switchyard = switchyard(&transport);

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();

    assert_eq!(result.model_used, "high");
    assert_eq!(transport.calls(), vec!["low", "mid", "high"]);
    assert_eq!(
        switchyard.health().record("mid").unwrap().last_failure.as_deref(),
        Some("response is missing required field 'body'")
    );
    assert!(switchyard
        .health()
        .record("low")
        .unwrap()
        .last_failure
        .unwrap()
        .starts_with("response is not valid JSON"));
}

#[tokio::test(start_paused = true)]
async fn test_every_candidate_failing_reports_each_attempt() {
    let transport = ScriptedTransport::new();
    transport.always("mid", Step::server_error());
    let switchyard = switchyard(&transport);

    let err = switchyard
        .generate("Photosynthesis", &high_science(), DEADLINE)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "all candidates exhausted: mid failed (backend returned status 503: overloaded), \
         high failed (backend unreachable: high)"
    );
    assert_eq!(transport.calls(), vec!["mid", "high"]);
}

#[tokio::test(start_paused = true)]
async fn test_candidate_going_unavailable_mid_request_is_skipped() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::server_error());
    transport.always("mid", Step::lesson());
    transport.always("high", Step::lesson());
    let switchyard = switchyard(&transport);

    // While low is being invoked, other traffic takes mid down.
    let health = Arc::clone(switchyard.health());
    transport.on_invoke(move |id| {
        if id == "low" {
            for _ in 0..4 {
                health.record_failure("mid", "connection refused");
            }
        }
    });

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();

    assert_eq!(result.model_used, "high");
    assert_eq!(transport.calls(), vec!["low", "high"]);
    let outcomes: Vec<_> = result.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![AttemptOutcome::Failed, AttemptOutcome::Skipped, AttemptOutcome::Succeeded]
    );
    assert_eq!(
        result.attempts[1].reason.as_deref(),
        Some("unavailable: connection refused")
    );
    // Skipping is not a failure of mid.
    assert_eq!(
        switchyard.metrics().snapshot().backend("mid").map(|m| m.failures),
        None
    );
}

// ============================================================================
// Deadline
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_without_penalizing_backend() {
    let transport = ScriptedTransport::new();
    // mid allows 10s but answers after 5s; the caller only grants 2s.
    transport.always("mid", Step::slow(Duration::from_secs(5)));
    transport.always("high", Step::lesson());
    let switchyard = switchyard(&transport);

    let err = switchyard
        .generate("Photosynthesis", &high_science(), Duration::from_secs(2))
        .await
        .unwrap_err();

    let DispatchError::DeadlineExceeded { deadline, attempts } = &err else {
        panic!("expected deadline, got {err}");
    };
    assert_eq!(*deadline, Duration::from_secs(2));
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].backend_id, "mid");
    assert_eq!(attempts[0].outcome, AttemptOutcome::Interrupted);
    assert_eq!(attempts[0].latency_ms, 2_000);
    assert_eq!(transport.calls(), vec!["mid"]);

    let mid = switchyard.health().record("mid").unwrap();
    assert_eq!(mid.state, HealthState::Healthy);
    assert_eq!(mid.consecutive_failures, 0);
    assert_eq!(mid.last_failure, None);

    let metrics = switchyard.metrics().snapshot();
    assert_eq!(metrics.deadline_exceeded, 1);
    assert_eq!(metrics.backend("mid").unwrap().interrupted, 1);
    assert_eq!(metrics.backend("mid").unwrap().failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_spent_on_failures_stops_fallback() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::slow(Duration::from_secs(5)));
    transport.always("mid", Step::slow(Duration::from_secs(5)));
    let switchyard = switchyard(&transport);

    // low times out at 100ms, leaving 50ms for mid.
    let err = switchyard
        .generate("Explain fractions", &early_math(), Duration::from_millis(150))
        .await
        .unwrap_err();

    let outcomes: Vec<_> = err.attempts().iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![AttemptOutcome::Failed, AttemptOutcome::Interrupted]);
    assert_eq!(transport.call_count("high"), 0);
    assert_eq!(switchyard.health().record("low").unwrap().consecutive_failures, 1);
    assert_eq!(switchyard.health().record("mid").unwrap().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_deadline_still_applies_backend_timeouts() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::slow(Duration::from_secs(1)));
    transport.always("mid", Step::lesson());
    let switchyard = switchyard(&transport);

    let result = switchyard
        .generate("Explain fractions", &early_math(), Duration::MAX)
        .await
        .unwrap();

    assert_eq!(result.model_used, "mid");
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed);
    assert_eq!(switchyard.health().record("low").unwrap().consecutive_failures, 1);
    assert_eq!(switchyard.metrics().snapshot().deadline_exceeded, 0);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cooldown_then_successful_probe_recovers() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::lesson());
    transport.always("mid", Step::lesson());
    let switchyard = switchyard(&transport);
    knock_out(&switchyard, "low");

    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(switchyard.health().state("low"), Some(HealthState::Unavailable));

    tokio::time::advance(Duration::from_secs(1)).await;
    let low = switchyard.health().record("low").unwrap();
    assert_eq!(low.state, HealthState::Healthy);
    assert!(low.probe_pending);

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();

    assert_eq!(result.model_used, "low");
    let low = switchyard.health().record("low").unwrap();
    assert!(!low.probe_pending);
    assert!(!low.probe_in_flight);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_restarts_cooldown() {
    let transport = ScriptedTransport::new();
    transport.then("low", Step::server_error());
    transport.always("low", Step::lesson());
    transport.always("mid", Step::lesson());
    let switchyard = switchyard(&transport);
    knock_out(&switchyard, "low");
    tokio::time::advance(Duration::from_secs(30)).await;

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();
    assert_eq!(result.model_used, "mid");
    assert_eq!(switchyard.health().state("low"), Some(HealthState::Unavailable));

    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(switchyard.health().state("low"), Some(HealthState::Unavailable));
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(switchyard.health().state("low"), Some(HealthState::Healthy));
}

#[tokio::test(start_paused = true)]
async fn test_only_one_request_probes_a_recovering_backend() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::slow(Duration::from_millis(50)));
    transport.always("mid", Step::lesson());
    let switchyard = switchyard(&transport);
    knock_out(&switchyard, "low");
    tokio::time::advance(Duration::from_secs(30)).await;

    let context = early_math();
    let (first, second) = tokio::join!(
        switchyard.generate("a", &context, DEADLINE),
        switchyard.generate("b", &context, DEADLINE),
    );

    let mut used = vec![first.unwrap().model_used, second.unwrap().model_used];
    used.sort();
    assert_eq!(used, vec!["low", "mid"]);
    assert_eq!(transport.call_count("low"), 1);
    assert_eq!(switchyard.health().state("low"), Some(HealthState::Healthy));
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_ordinary_attempt_keeps_recovery_exclusive() {
    let transport = ScriptedTransport::new();
    transport.then("mid", Step::slow(Duration::from_secs(50)));
    transport.then("mid", Step::slow(Duration::from_secs(20)));
    transport.always("high", Step::lesson());
    let config = SwitchyardConfig::new()
        .with_health(health_config())
        .with_backend(backend("mid", 60_000))
        .with_backend(backend("high", 10_000))
        .with_policy(PolicyEntry::new(
            "everyone",
            ContextMatch::any(),
            vec!["mid".into(), "high".into()],
        ));
    let switchyard = Arc::new(switchyard_with(config, &transport));
    let context = high_science();

    // Admitted while healthy; mid goes down underneath it.
    let first = tokio::spawn({
        let switchyard = Arc::clone(&switchyard);
        async move { switchyard.generate("a", &context, Duration::from_secs(40)).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(transport.call_count("mid"), 1);
    knock_out(&switchyard, "mid");

    // Cool-down over: the next request claims recovery.
    tokio::time::sleep(Duration::from_secs(31)).await;
    let second = tokio::spawn({
        let switchyard = Arc::clone(&switchyard);
        async move { switchyard.generate("b", &context, Duration::from_secs(60)).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(transport.call_count("mid"), 2);

    // The first request hits its deadline while recovery is still running.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, DispatchError::DeadlineExceeded { .. }));
    assert!(switchyard.health().record("mid").unwrap().probe_in_flight);

    let third = switchyard
        .generate("c", &context, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(third.model_used, "high");
    assert_eq!(transport.call_count("mid"), 2);

    let recovered = second.await.unwrap().unwrap();
    assert_eq!(recovered.model_used, "mid");
    let mid = switchyard.health().record("mid").unwrap();
    assert_eq!(mid.state, HealthState::Healthy);
    assert!(!mid.probe_pending);
    assert!(!mid.probe_in_flight);
}

#[tokio::test(start_paused = true)]
async fn test_reset_backend_restores_healthy() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::lesson());
    let switchyard = switchyard(&transport);
    knock_out(&switchyard, "low");

    assert!(switchyard.reset_backend("low"));
    assert!(!switchyard.reset_backend("nonexistent"));

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();
    assert_eq!(result.model_used, "low");
}

// ============================================================================
// Reload, observation and configuration files
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reload_swaps_catalog_and_keeps_health_history() {
    let transport = ScriptedTransport::new();
    transport.always("mid", Step::lesson());
    transport.always("premium", Step::lesson());
    let switchyard = switchyard(&transport);
    knock_out(&switchyard, "low");
    let first_loaded = switchyard.catalog().loaded_at();

    let replacement = SwitchyardConfig::new()
        .with_backend(backend("low", 1_000))
        .with_backend(backend("mid", 1_000))
        .with_backend(backend("premium", 1_000))
        .with_policy(PolicyEntry::new(
            "everyone",
            ContextMatch::any(),
            vec!["low".into(), "premium".into()],
        ));
    switchyard.reload(&replacement).unwrap();

    assert!(!switchyard.health().contains("high"));
    assert_eq!(switchyard.health().state("premium"), Some(HealthState::Healthy));
    assert_eq!(switchyard.health().state("low"), Some(HealthState::Unavailable));
    assert!(switchyard.catalog().loaded_at() >= first_loaded);

    let result = switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();
    assert_eq!(result.routing_decision.policy, "everyone");
    assert_eq!(result.model_used, "premium");
}

#[tokio::test(start_paused = true)]
async fn test_rejected_reload_keeps_previous_catalog() {
    let transport = ScriptedTransport::new();
    let switchyard = switchyard(&transport);

    let broken = SwitchyardConfig::new()
        .with_backend(backend("low", 1_000))
        .with_policy(PolicyEntry::new("everyone", ContextMatch::any(), vec!["ghost".into()]));

    let err = switchyard.reload(&broken).unwrap_err();

    assert!(matches!(err, ConfigError::UnknownBackend { ref backend, .. } if backend == "ghost"));
    assert_eq!(switchyard.catalog().registry().len(), 3);
    assert!(switchyard.health().contains("high"));
}

#[tokio::test(start_paused = true)]
async fn test_observe_and_prometheus_reflect_traffic() {
    let transport = ScriptedTransport::new();
    transport.always("low", Step::lesson());
    let switchyard = switchyard(&transport);

    switchyard
        .generate("Explain fractions", &early_math(), DEADLINE)
        .await
        .unwrap();

    let observation = switchyard.observe();
    assert_eq!(observation.metrics.total_requests, 1);
    assert_eq!(observation.metrics.requests_by_backend.get("low"), Some(&1));
    let ids: Vec<_> = observation.health.iter().map(|r| r.backend_id.as_str()).collect();
    assert_eq!(ids, vec!["high", "low", "mid"]);

    let text = switchyard.to_prometheus();
    assert!(text.contains("switchyard_requests_total 1\n"));
    assert!(text.contains("switchyard_backend_requests_total{backend=\"low\"} 1\n"));
    assert!(text.contains("switchyard_cost_total 0.5\n"));

    let previous = switchyard.metrics().reset();
    assert_eq!(previous.total_requests, 1);
    assert_eq!(switchyard.metrics().snapshot().total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_example_configuration_routes_every_audience() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("switchyard.example.toml");
    let loaded = SwitchyardConfig::from_toml_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(loaded.health, health_config());

    let transport = ScriptedTransport::new();
    let switchyard = switchyard_with(loaded, &transport);

    let cases = [
        (RequestContext::new(AudienceTier::Middle, ContentDomain::Math, WorkflowStage::Assessment), "assessment", "high"),
        (early_math(), "early-learners", "low"),
        (high_science(), "high-school-science", "mid"),
        (RequestContext::new(AudienceTier::Middle, ContentDomain::Ela, WorkflowStage::Learn), "default", "mid"),
    ];
    for (context, policy, primary) in cases {
        let decision = switchyard.select_backend(&context).unwrap();
        assert_eq!(decision.policy, policy, "{context}");
        assert_eq!(decision.primary, primary, "{context}");
    }
}

#[tokio::test]
async fn test_fresh_instances_share_nothing() {
    let transport = ScriptedTransport::new();
    let first = switchyard(&transport);
    let second: Switchyard = switchyard_with(three_tier_config(health_config()), &transport);

    first.health().record_failure("low", "boom");

    assert_eq!(first.health().record("low").unwrap().consecutive_failures, 1);
    assert_eq!(second.health().record("low").unwrap().consecutive_failures, 0);
}
