//! Tests for level ordering and result precedence.

use psachecker::admission::{LevelFailure, LevelResult, ParallelResult, ResultKey, ResultsMap};
use psachecker::types::SecurityLevel;

fn allowed() -> Result<LevelResult, LevelFailure> {
    Ok(LevelResult::allowed())
}

fn denied() -> Result<LevelResult, LevelFailure> {
    Ok(LevelResult::denied("no"))
}

fn result(
    restricted: Result<LevelResult, LevelFailure>,
    baseline: Result<LevelResult, LevelFailure>,
    privileged: Result<LevelResult, LevelFailure>,
) -> ParallelResult {
    ParallelResult {
        restricted,
        baseline,
        privileged,
    }
}

#[test]
fn levels_are_totally_ordered() {
    use SecurityLevel::*;
    assert!(Restricted < Baseline);
    assert!(Baseline < Privileged);
    assert!(Privileged < Unknown);
    let mut shuffled = vec![Unknown, Baseline, Privileged, Restricted];
    shuffled.sort();
    assert_eq!(shuffled, vec![Restricted, Baseline, Privileged, Unknown]);
}

#[test]
fn least_restrictive_is_the_maximum() {
    assert_eq!(
        SecurityLevel::Restricted.least_restrictive(SecurityLevel::Baseline),
        SecurityLevel::Baseline
    );
    assert_eq!(
        SecurityLevel::Unknown.least_restrictive(SecurityLevel::Privileged),
        SecurityLevel::Unknown
    );
}

#[test]
fn levels_round_trip_through_labels() {
    for level in SecurityLevel::ALL {
        assert_eq!(level.as_str().parse::<SecurityLevel>(), Ok(level));
    }
    assert!("Restricted".parse::<SecurityLevel>().is_err());
}

#[test]
fn restricted_wins_when_allowed() {
    let r = result(allowed(), allowed(), allowed());
    assert_eq!(r.most_restrictive_policy(), SecurityLevel::Restricted);
}

#[test]
fn baseline_when_only_restricted_denies() {
    let r = result(denied(), allowed(), allowed());
    assert_eq!(r.most_restrictive_policy(), SecurityLevel::Baseline);
}

#[test]
fn privileged_when_restricted_and_baseline_deny() {
    let r = result(denied(), denied(), allowed());
    assert_eq!(r.most_restrictive_policy(), SecurityLevel::Privileged);
}

#[test]
fn privileged_is_the_fallback_even_if_privileged_denies() {
    let r = result(denied(), denied(), denied());
    assert_eq!(r.most_restrictive_policy(), SecurityLevel::Privileged);
}

#[test]
fn any_failed_slot_is_unknown() {
    let failed = || Err(LevelFailure::Failed("boom".to_owned()));
    assert_eq!(
        result(allowed(), allowed(), failed()).most_restrictive_policy(),
        SecurityLevel::Unknown
    );
    assert_eq!(
        result(failed(), allowed(), allowed()).most_restrictive_policy(),
        SecurityLevel::Unknown
    );
    assert_eq!(
        result(
            allowed(),
            Err(LevelFailure::Panicked("oops".to_owned())),
            allowed()
        )
        .most_restrictive_policy(),
        SecurityLevel::Unknown
    );
}

#[test]
fn display_lists_each_level() {
    let r = result(
        Ok(LevelResult::denied("Pod \"web\" violates PodSecurity")),
        allowed(),
        allowed(),
    );
    let text = r.to_string();
    assert!(text.contains("privileged: allowed"));
    assert!(text.contains("baseline: allowed"));
    assert!(text.contains("restricted: denied: Pod \"web\" violates PodSecurity"));
}

#[test]
fn results_map_keeps_first_entry() {
    let key = ResultKey {
        kind: "Pod".to_owned(),
        namespace: "team".to_owned(),
        name: "web".to_owned(),
    };
    let mut map = ResultsMap::new();
    assert!(map.insert(key.clone(), result(allowed(), allowed(), allowed())));
    assert!(!map.insert(key.clone(), result(denied(), denied(), allowed())));
    assert_eq!(map.len(), 1);
    assert_eq!(
        map.get(&key).map(ParallelResult::most_restrictive_policy),
        Some(SecurityLevel::Restricted)
    );
}
