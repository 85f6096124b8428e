//! Tests for the three-level fan-out.

use std::sync::Arc;
use std::time::Duration;

use psachecker::admission::{
    EvalContext, EvaluateError, EvaluationRequest, LevelFailure, ParallelAdmission,
};
use psachecker::cluster::NoPods;
use psachecker::types::SecurityLevel;

use crate::support::{
    baseline_spec, default_policy, deployment_object, engine_with, host_network_spec,
    pod_object, restricted_spec, workload_engine, BrokenNamespaces, PanicAt, StalledNamespaces,
    TrackedStall,
};

fn create(object: serde_json::Value) -> Arc<EvaluationRequest> {
    let kind = object["kind"].as_str().expect("kind").to_owned();
    let name = object["metadata"]["name"].as_str().expect("name").to_owned();
    Arc::new(EvaluationRequest::create(kind, "team", name, object))
}

#[tokio::test]
async fn compliant_pod_is_restricted() {
    let engine = workload_engine(default_policy());
    let result = engine
        .evaluate(
            &EvalContext::background(),
            create(pod_object("team", "web", restricted_spec())),
        )
        .await
        .expect("evaluates");
    for outcome in [&result.restricted, &result.baseline, &result.privileged] {
        assert!(outcome.as_ref().expect("no failure").allowed);
    }
    assert_eq!(result.most_restrictive_policy(), SecurityLevel::Restricted);
}

#[tokio::test]
async fn host_network_pod_is_privileged() {
    let engine = workload_engine(default_policy());
    let result = engine
        .evaluate(
            &EvalContext::background(),
            create(pod_object("team", "web", host_network_spec())),
        )
        .await
        .expect("evaluates");
    let restricted = result.restricted.as_ref().expect("no failure");
    let baseline = result.baseline.as_ref().expect("no failure");
    assert!(!restricted.allowed);
    assert!(!baseline.allowed);
    assert!(result.privileged.as_ref().expect("no failure").allowed);
    assert!(baseline
        .reason
        .as_deref()
        .is_some_and(|r| r.contains("host namespaces") && r.contains("hostNetwork=true")));
    assert_eq!(result.most_restrictive_policy(), SecurityLevel::Privileged);
}

#[tokio::test]
async fn windows_host_process_pod_is_privileged() {
    let engine = workload_engine(default_policy());
    let mut spec = restricted_spec();
    spec["securityContext"]["windowsOptions"] = serde_json::json!({"hostProcess": true});
    let result = engine
        .evaluate(
            &EvalContext::background(),
            create(pod_object("team", "agent", spec)),
        )
        .await
        .expect("evaluates");
    assert_eq!(result.most_restrictive_policy(), SecurityLevel::Privileged);
}

#[tokio::test]
async fn deployment_template_is_evaluated() {
    let engine = workload_engine(default_policy());
    let result = engine
        .evaluate(
            &EvalContext::background(),
            create(deployment_object("team", "api", baseline_spec())),
        )
        .await
        .expect("evaluates");
    assert_eq!(result.most_restrictive_policy(), SecurityLevel::Baseline);
    let reason = result
        .restricted
        .as_ref()
        .expect("no failure")
        .reason
        .clone()
        .expect("denied with reason");
    assert!(reason.starts_with("Deployment \"api\" violates PodSecurity \"restricted:latest\""));
}

#[tokio::test]
async fn denial_records_audit_annotation() {
    let engine = workload_engine(default_policy());
    let result = engine
        .evaluate(
            &EvalContext::background(),
            create(pod_object("team", "web", baseline_spec())),
        )
        .await
        .expect("evaluates");
    let restricted = result.restricted.as_ref().expect("no failure");
    assert!(restricted
        .audit_annotations
        .get("audit-violations")
        .is_some_and(|v| v.contains("restricted:latest")));
    assert_eq!(
        restricted.audit_annotations.get("enforce-policy").map(String::as_str),
        Some("restricted:latest")
    );
}

#[tokio::test]
async fn panicking_level_becomes_unknown() {
    let engine = workload_engine(Arc::new(PanicAt(SecurityLevel::Baseline)));
    let result = engine
        .evaluate(
            &EvalContext::background(),
            create(pod_object("team", "web", restricted_spec())),
        )
        .await
        .expect("a panic is a slot failure, not a call failure");
    assert!(matches!(result.baseline, Err(LevelFailure::Panicked(_))));
    assert!(result.restricted.is_ok());
    assert!(result.privileged.is_ok());
    assert_eq!(result.most_restrictive_policy(), SecurityLevel::Unknown);
}

#[tokio::test]
async fn lookup_failure_fails_every_slot() {
    let engine = engine_with(default_policy(), Arc::new(BrokenNamespaces), Arc::new(NoPods));
    let result = engine
        .evaluate(
            &EvalContext::background(),
            create(pod_object("team", "web", restricted_spec())),
        )
        .await
        .expect("evaluates");
    assert!(matches!(result.restricted, Err(LevelFailure::Failed(_))));
    assert_eq!(result.most_restrictive_policy(), SecurityLevel::Unknown);
}

#[tokio::test]
async fn malformed_template_is_a_level_failure() {
    let engine = workload_engine(default_policy());
    let object = serde_json::json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "broken", "namespace": "team"},
        "spec": {}
    });
    let result = engine
        .evaluate(&EvalContext::background(), create(object))
        .await
        .expect("evaluates");
    assert_eq!(result.most_restrictive_policy(), SecurityLevel::Unknown);
}

#[tokio::test]
async fn already_cancelled_context_fails_fast() {
    let engine = workload_engine(default_policy());
    let (ctx, cancel) = EvalContext::new();
    cancel.cancel();
    let err = engine
        .evaluate(&ctx, create(pod_object("team", "web", restricted_spec())))
        .await
        .expect_err("cancelled");
    assert_eq!(err, EvaluateError::Cancelled);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_evaluations() {
    let engine: ParallelAdmission =
        engine_with(default_policy(), Arc::new(StalledNamespaces), Arc::new(NoPods));
    let (ctx, cancel) = EvalContext::new();
    let request = create(pod_object("team", "web", restricted_spec()));
    let handle = tokio::spawn({
        let ctx = ctx.clone();
        async move { engine.evaluate(&ctx, request).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("returns promptly")
        .expect("task joins");
    assert_eq!(outcome, Err(EvaluateError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn deadline_is_reported() {
    let engine = engine_with(default_policy(), Arc::new(StalledNamespaces), Arc::new(NoPods));
    let ctx = EvalContext::background().with_timeout(Duration::from_secs(1));
    let err = engine
        .evaluate(&ctx, create(pod_object("team", "web", restricted_spec())))
        .await
        .expect_err("deadline passes first");
    assert_eq!(err, EvaluateError::DeadlineExceeded);
}

#[tokio::test]
async fn dropping_an_evaluation_aborts_its_level_tasks() {
    let lookup = Arc::new(TrackedStall::default());
    let dropped = Arc::clone(&lookup.dropped);
    let engine = engine_with(default_policy(), lookup, Arc::new(NoPods));
    let pending = tokio::time::timeout(
        Duration::from_millis(50),
        engine.evaluate(
            &EvalContext::background(),
            create(pod_object("team", "web", restricted_spec())),
        ),
    )
    .await;
    assert!(pending.is_err(), "lookup never answers");
    // Aborted tasks are dropped the next time the runtime schedules them.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dropped.load(std::sync::atomic::Ordering::SeqCst), 3);
}
