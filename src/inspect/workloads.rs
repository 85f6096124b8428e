//! `inspect-workloads`: recommend a level per namespace from its workloads.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::InspectError;
use crate::admission::delta::{enforce_labels, filter_unchanged};
use crate::admission::{
    most_restrictive_policy_per_namespace, EvalContext, EvaluateError, LevelEvaluatorSet,
    OrderedLevelMap, ParallelAdmission, ResultsMap,
};
use crate::cluster::{NamespaceLister, NeutralNamespaceLookup, NoPods};
use crate::policy::PolicyEvaluator;
use crate::scheme::ResourceScheme;
use crate::source::live::NamespaceScope;
use crate::source::ResourceSource;
use crate::types::PolicyVersion;

/// Options of `inspect-workloads`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadsOptions {
    /// Namespace given with `--namespace`.
    pub namespace: Option<String>,
    /// Put namespace-less manifests into `namespace`.
    pub default_namespaces: bool,
    /// Read workloads from every namespace.
    pub all_namespaces: bool,
    /// Manifest files and directories.
    pub files: Vec<PathBuf>,
    /// Descend into subdirectories of `files`.
    pub recursive: bool,
    /// Resource type to read from the cluster.
    pub resource_type: Option<String>,
    /// Names of `resource_type` objects; all when empty.
    pub names: Vec<String>,
    /// Drop namespaces already enforcing their recommendation.
    pub updates_only: bool,
    /// Policy version to evaluate at.
    pub version: PolicyVersion,
    /// Resources evaluated at the same time.
    pub max_concurrent: usize,
}

impl Default for WorkloadsOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            default_namespaces: false,
            all_namespaces: false,
            files: Vec::new(),
            recursive: false,
            resource_type: None,
            names: Vec::new(),
            updates_only: false,
            version: PolicyVersion::Latest,
            max_concurrent: 8,
        }
    }
}

impl WorkloadsOptions {
    /// Check the options are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`InspectError::Options`] describing the first conflict.
    pub fn validate(&self) -> Result<(), InspectError> {
        if self.default_namespaces && self.namespace.is_none() {
            return Err(InspectError::Options(
                "--default-namespaces requires --namespace".to_owned(),
            ));
        }
        if self.all_namespaces && self.namespace.is_some() {
            return Err(InspectError::Options(
                "--all-namespaces cannot be combined with --namespace".to_owned(),
            ));
        }
        match (self.files.is_empty(), &self.resource_type) {
            (true, None) => Err(InspectError::Options(
                "specify manifest files with -f or a resource type to read from the cluster"
                    .to_owned(),
            )),
            (false, Some(_)) => Err(InspectError::Options(
                "manifest files and a resource type cannot be combined".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Whether workloads come from local manifests.
    pub fn is_local(&self) -> bool {
        !self.files.is_empty()
    }

    /// Namespace scope for cluster reads, falling back to `current` when no
    /// namespace was given.
    pub fn scope(&self, current: &str) -> NamespaceScope {
        if self.all_namespaces {
            NamespaceScope::All
        } else {
            NamespaceScope::Namespace(
                self.namespace
                    .clone()
                    .unwrap_or_else(|| current.to_owned()),
            )
        }
    }
}

/// Outcome of `inspect-workloads`.
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    /// Recommended level per namespace.
    pub recommendation: OrderedLevelMap,
    /// Per-resource results behind the recommendation.
    pub results: ResultsMap,
}

/// Evaluate every workload `source` yields and recommend a level per
/// namespace.
///
/// `labels` supplies the namespaces' current enforce labels for
/// `updates_only`; it is ignored for local sources.
///
/// # Errors
///
/// Returns [`InspectError`] naming the phase that failed.
pub async fn inspect_workloads(
    ctx: &EvalContext,
    options: &WorkloadsOptions,
    source: &dyn ResourceSource,
    policy: Arc<dyn PolicyEvaluator>,
    labels: Option<&dyn NamespaceLister>,
) -> Result<WorkloadReport, InspectError> {
    options.validate()?;

    let evaluators = LevelEvaluatorSet::new(
        policy,
        options.version,
        Arc::new(NeutralNamespaceLookup),
        Arc::new(NoPods),
        ResourceScheme::workloads(),
    )?;
    let engine = ParallelAdmission::new(evaluators);

    let resources = ctx
        .run(source.resources())
        .await
        .map_err(EvaluateError::from)??;
    info!(count = resources.len(), local = source.is_local(), "collected workloads");
    let default_namespace = if options.default_namespaces {
        options.namespace.as_deref()
    } else {
        None
    };
    let results = engine
        .validate_resources(
            ctx,
            source.is_local(),
            default_namespace,
            resources,
            options.max_concurrent,
        )
        .await?;

    let mut recommendation = most_restrictive_policy_per_namespace(&results);
    if options.updates_only {
        match labels {
            _ if source.is_local() => {
                warn!("--updates-only has no effect on local manifests; showing all namespaces");
            }
            Some(lister) => {
                let filter = if options.all_namespaces {
                    None
                } else {
                    options.namespace.as_deref()
                };
                let namespaces = ctx
                    .run(lister.list_namespaces(filter))
                    .await
                    .map_err(EvaluateError::from)??;
                filter_unchanged(&mut recommendation, &enforce_labels(&namespaces));
            }
            None => warn!("no cluster connection for --updates-only; showing all namespaces"),
        }
    }

    Ok(WorkloadReport {
        recommendation: OrderedLevelMap::from(recommendation),
        results,
    })
}
