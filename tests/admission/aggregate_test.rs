//! Tests for resource aggregation and the per-namespace reducer.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;

use psachecker::admission::{
    most_restrictive_policy_per_namespace, EvalContext, EvaluateError, LevelFailure,
    LevelResult, ParallelResult, ResultKey, ResultsMap, ValidateError,
};
use psachecker::source::SourceError;
use psachecker::types::SecurityLevel;

use crate::support::{
    baseline_spec, default_policy, deployment_object, host_network_spec, pod_object, resource,
    restricted_spec, workload_engine,
};

// ---------------------------------------------------------------------------
// validate_resources
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resources_are_keyed_by_kind_namespace_and_name() {
    let engine = workload_engine(default_policy());
    let resources = vec![
        resource(pod_object("a", "web", restricted_spec())),
        resource(deployment_object("a", "web", baseline_spec())),
        resource(pod_object("b", "web", host_network_spec())),
    ];
    let results = engine
        .validate_resources(&EvalContext::background(), false, None, resources, 2)
        .await
        .expect("evaluates");
    assert_eq!(results.len(), 3);

    let key = |kind: &str, ns: &str| ResultKey {
        kind: kind.to_owned(),
        namespace: ns.to_owned(),
        name: "web".to_owned(),
    };
    let level = |k: ResultKey| results.get(&k).map(ParallelResult::most_restrictive_policy);
    assert_eq!(level(key("Pod", "a")), Some(SecurityLevel::Restricted));
    assert_eq!(level(key("Deployment", "a")), Some(SecurityLevel::Baseline));
    assert_eq!(level(key("Pod", "b")), Some(SecurityLevel::Privileged));

    let recommendation = most_restrictive_policy_per_namespace(&results);
    assert_eq!(recommendation.get("a"), Some(&SecurityLevel::Baseline));
    assert_eq!(recommendation.get("b"), Some(&SecurityLevel::Privileged));
}

#[tokio::test]
async fn local_resources_without_namespace_use_default() {
    let engine = workload_engine(default_policy());
    let mut object = pod_object("ignored", "web", restricted_spec());
    object["metadata"]
        .as_object_mut()
        .expect("metadata")
        .remove("namespace");
    let results = engine
        .validate_resources(
            &EvalContext::background(),
            true,
            Some("team"),
            vec![resource(object)],
            4,
        )
        .await
        .expect("evaluates");
    let namespaces: Vec<_> = results.iter().map(|(k, _)| k.namespace.clone()).collect();
    assert_eq!(namespaces, vec!["team".to_owned()]);
}

#[tokio::test]
async fn missing_namespace_without_default_fails_the_run() {
    let engine = workload_engine(default_policy());
    let mut object = pod_object("ignored", "orphan", restricted_spec());
    object["metadata"]
        .as_object_mut()
        .expect("metadata")
        .remove("namespace");
    let err = engine
        .validate_resources(&EvalContext::background(), true, None, vec![resource(object)], 4)
        .await
        .expect_err("no namespace");
    match err {
        ValidateError::Source(SourceError::MissingNamespace { resource }) => {
            assert!(resource.contains("orphan"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn duplicate_resources_keep_the_first_result() {
    let engine = workload_engine(default_policy());
    let resources = vec![
        resource(pod_object("a", "web", restricted_spec())),
        resource(pod_object("a", "web", host_network_spec())),
    ];
    let results = engine
        .validate_resources(&EvalContext::background(), true, None, resources, 4)
        .await
        .expect("evaluates");
    assert_eq!(results.len(), 1);
    let recommendation = most_restrictive_policy_per_namespace(&results);
    assert_eq!(recommendation.get("a"), Some(&SecurityLevel::Restricted));
}

#[tokio::test]
async fn cancelled_run_surfaces_one_error() {
    let engine = workload_engine(default_policy());
    let (ctx, cancel) = EvalContext::new();
    cancel.cancel();
    let resources = (0..10)
        .map(|i| resource(pod_object("a", &format!("web-{i}"), restricted_spec())))
        .collect();
    let err = engine
        .validate_resources(&ctx, false, None, resources, 3)
        .await
        .expect_err("cancelled");
    assert!(matches!(
        err,
        ValidateError::Evaluate(EvaluateError::Cancelled)
    ));
}

#[tokio::test]
async fn empty_input_yields_empty_results() {
    let engine = workload_engine(default_policy());
    let results = engine
        .validate_resources(&EvalContext::background(), false, None, Vec::new(), 4)
        .await
        .expect("evaluates");
    assert!(results.is_empty());
    assert!(most_restrictive_policy_per_namespace(&results).is_empty());
}

// ---------------------------------------------------------------------------
// most_restrictive_policy_per_namespace
// ---------------------------------------------------------------------------

fn fixed(level: SecurityLevel) -> ParallelResult {
    let allowed = || Ok(LevelResult::allowed());
    let denied = || Ok(LevelResult::denied("no"));
    match level {
        SecurityLevel::Restricted => ParallelResult {
            restricted: allowed(),
            baseline: allowed(),
            privileged: allowed(),
        },
        SecurityLevel::Baseline => ParallelResult {
            restricted: denied(),
            baseline: allowed(),
            privileged: allowed(),
        },
        SecurityLevel::Privileged => ParallelResult {
            restricted: denied(),
            baseline: denied(),
            privileged: allowed(),
        },
        SecurityLevel::Unknown => ParallelResult {
            restricted: Err(LevelFailure::Failed("boom".to_owned())),
            baseline: allowed(),
            privileged: allowed(),
        },
    }
}

fn entries() -> Vec<(ResultKey, ParallelResult)> {
    let levels = [
        ("a", SecurityLevel::Restricted),
        ("a", SecurityLevel::Baseline),
        ("a", SecurityLevel::Restricted),
        ("b", SecurityLevel::Restricted),
        ("b", SecurityLevel::Privileged),
        ("c", SecurityLevel::Baseline),
        ("c", SecurityLevel::Unknown),
        ("c", SecurityLevel::Restricted),
        ("d", SecurityLevel::Restricted),
    ];
    levels
        .iter()
        .enumerate()
        .map(|(i, (ns, level))| {
            (
                ResultKey {
                    kind: "Pod".to_owned(),
                    namespace: (*ns).to_owned(),
                    name: format!("pod-{i}"),
                },
                fixed(*level),
            )
        })
        .collect()
}

#[test]
fn reducer_takes_least_restrictive_per_namespace() {
    let results: ResultsMap = entries().into_iter().collect();
    let recommendation = most_restrictive_policy_per_namespace(&results);
    let expected = HashMap::from([
        ("a".to_owned(), SecurityLevel::Baseline),
        ("b".to_owned(), SecurityLevel::Privileged),
        ("c".to_owned(), SecurityLevel::Unknown),
        ("d".to_owned(), SecurityLevel::Restricted),
    ]);
    assert_eq!(recommendation, expected);
}

#[test]
fn reducer_is_order_independent() {
    let reference = most_restrictive_policy_per_namespace(&entries().into_iter().collect());
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    for _ in 0..50 {
        let mut shuffled = entries();
        shuffled.shuffle(&mut rng);
        let results: ResultsMap = shuffled.into_iter().collect();
        assert_eq!(most_restrictive_policy_per_namespace(&results), reference);
    }
}

#[test]
fn reducer_is_idempotent() {
    let results: ResultsMap = entries().into_iter().collect();
    let first = most_restrictive_policy_per_namespace(&results);
    let second = most_restrictive_policy_per_namespace(&results);
    assert_eq!(first, second);
}
