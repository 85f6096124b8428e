//! Keep only namespaces whose recommendation differs from what they enforce.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::Namespace;

use super::NamespaceRecommendation;
use crate::cluster::namespace_labels;
use crate::types::ENFORCE_LEVEL_LABEL;

/// Enforce label value per namespace, for namespaces that set one.
pub fn enforce_labels<'a>(
    namespaces: impl IntoIterator<Item = &'a Namespace>,
) -> HashMap<String, String> {
    namespaces
        .into_iter()
        .filter_map(|ns| {
            let name = ns.metadata.name.clone()?;
            let level = enforce_label(&namespace_labels(ns))?;
            Some((name, level))
        })
        .collect()
}

fn enforce_label(labels: &BTreeMap<String, String>) -> Option<String> {
    labels.get(ENFORCE_LEVEL_LABEL).cloned()
}

/// Drop entries whose level equals the namespace's enforce label.
///
/// Namespaces without a label in `current` are kept.
pub fn filter_unchanged(
    recommendation: &mut NamespaceRecommendation,
    current: &HashMap<String, String>,
) {
    recommendation.retain(|namespace, level| {
        !matches!(current.get(namespace), Some(label) if label == level.as_str())
    });
}
