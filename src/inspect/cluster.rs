//! `inspect-cluster`: recommend a level per namespace from its running pods.

use std::sync::Arc;

use tracing::info;

use super::InspectError;
use crate::admission::delta::{enforce_labels, filter_unchanged};
use crate::admission::{
    EvalContext, EvaluateError, LevelEvaluatorSet, OrderedLevelMap, ParallelAdmission,
};
use crate::cluster::{NamespaceLister, NeutralNamespaceLookup, PodLister};
use crate::policy::PolicyEvaluator;
use crate::scheme::ResourceScheme;
use crate::types::PolicyVersion;

/// Options of `inspect-cluster`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterOptions {
    /// Only inspect this namespace.
    pub namespace: Option<String>,
    /// Drop namespaces already enforcing their recommendation.
    pub updates_only: bool,
    /// Policy version to evaluate at.
    pub version: PolicyVersion,
}

/// Probe each namespace at stricter enforce levels and recommend the
/// strictest one its pods satisfy.
///
/// # Errors
///
/// Returns [`InspectError`] naming the phase that failed.
pub async fn inspect_cluster(
    ctx: &EvalContext,
    options: &ClusterOptions,
    policy: Arc<dyn PolicyEvaluator>,
    namespaces: &dyn NamespaceLister,
    pods: Arc<dyn PodLister>,
) -> Result<OrderedLevelMap, InspectError> {
    let evaluators = LevelEvaluatorSet::new(
        policy,
        options.version,
        Arc::new(NeutralNamespaceLookup),
        pods,
        ResourceScheme::workloads(),
    )?;
    let engine = ParallelAdmission::new(evaluators);

    let listed = ctx
        .run(namespaces.list_namespaces(options.namespace.as_deref()))
        .await
        .map_err(EvaluateError::from)??;
    info!(count = listed.len(), "inspecting namespaces");

    let mut recommendation = engine.validate_namespaces(ctx, &listed).await?;
    if options.updates_only {
        filter_unchanged(&mut recommendation, &enforce_labels(&listed));
    }
    Ok(OrderedLevelMap::from(recommendation))
}
