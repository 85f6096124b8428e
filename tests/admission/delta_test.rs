//! Tests for the "updates only" filter.

use std::collections::HashMap;

use psachecker::admission::delta::{enforce_labels, filter_unchanged};
use psachecker::admission::NamespaceRecommendation;
use psachecker::types::SecurityLevel;

use crate::support::namespace;

fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn drops_namespaces_already_at_their_level() {
    let mut recommendation = NamespaceRecommendation::from([
        ("a".to_owned(), SecurityLevel::Baseline),
        ("b".to_owned(), SecurityLevel::Restricted),
    ]);
    filter_unchanged(
        &mut recommendation,
        &labels(&[("a", "baseline"), ("b", "privileged")]),
    );
    assert_eq!(
        recommendation,
        NamespaceRecommendation::from([("b".to_owned(), SecurityLevel::Restricted)])
    );
}

#[test]
fn unlabelled_namespaces_are_kept() {
    let mut recommendation =
        NamespaceRecommendation::from([("fresh".to_owned(), SecurityLevel::Restricted)]);
    filter_unchanged(&mut recommendation, &HashMap::new());
    assert_eq!(recommendation.len(), 1);
}

#[test]
fn unknown_never_matches_a_label() {
    let mut recommendation =
        NamespaceRecommendation::from([("odd".to_owned(), SecurityLevel::Unknown)]);
    filter_unchanged(&mut recommendation, &labels(&[("odd", "privileged")]));
    assert_eq!(recommendation.get("odd"), Some(&SecurityLevel::Unknown));
}

#[test]
fn labels_come_from_namespace_objects() {
    let namespaces = [
        namespace("a", Some("baseline")),
        namespace("b", Some("privileged")),
        namespace("c", None),
    ];
    let current = enforce_labels(&namespaces);
    assert_eq!(current, labels(&[("a", "baseline"), ("b", "privileged")]));
}
