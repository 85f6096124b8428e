//! Run the engine over many resources or namespaces and reduce the results.

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{
    EvalContext, EvaluateError, EvaluationRequest, LevelFailure, NamespaceRecommendation,
    ParallelAdmission, ResultKey, ResultsMap,
};
use crate::source::{ResourceInfo, SourceError};
use crate::types::{SecurityLevel, ENFORCE_LEVEL_LABEL};

/// Failures of a resource run.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    /// A resource could not be turned into a request.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The run was interrupted.
    #[error(transparent)]
    Evaluate(#[from] EvaluateError),
    /// An evaluation task ended without producing a result.
    #[error("evaluation task failed: {0}")]
    Task(String),
}

/// Resolve the key a resource is stored under.
fn resolve_key(
    resource: &ResourceInfo,
    is_local: bool,
    default_namespace: Option<&str>,
) -> Result<ResultKey, SourceError> {
    let namespace = match (&resource.namespace, is_local, default_namespace) {
        (Some(ns), _, _) => ns.clone(),
        (None, true, Some(default)) => default.to_owned(),
        (None, _, _) => {
            return Err(SourceError::MissingNamespace {
                resource: resource.to_string(),
            })
        }
    };
    Ok(ResultKey {
        kind: resource.kind.clone(),
        namespace,
        name: resource.name.clone(),
    })
}

impl ParallelAdmission {
    /// Evaluate every resource and key the results by kind, namespace and
    /// name.
    ///
    /// Every resource is resolved before the first evaluation starts. A
    /// namespace-less resource takes `default_namespace` when it comes from
    /// a local source; otherwise the run fails. At most `max_concurrent`
    /// resources are evaluated at once.
    ///
    /// # Errors
    ///
    /// Returns [`ValidateError::Source`] for unresolvable resources and
    /// [`ValidateError::Evaluate`] when the run is interrupted.
    pub async fn validate_resources(
        &self,
        ctx: &EvalContext,
        is_local: bool,
        default_namespace: Option<&str>,
        resources: Vec<ResourceInfo>,
        max_concurrent: usize,
    ) -> Result<ResultsMap, ValidateError> {
        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(resources.len());
        for resource in resources {
            let key = resolve_key(&resource, is_local, default_namespace)?;
            if !seen.insert(key.clone()) {
                debug!(resource = %key, origin = %resource.origin, "skipping duplicate resource");
                continue;
            }
            let request = EvaluationRequest::create(
                resource.kind,
                key.namespace.clone(),
                resource.name,
                resource.object,
            );
            pending.push((key, Arc::new(request)));
        }
        info!(resources = pending.len(), "evaluating resources");

        let limit = max_concurrent.max(1);
        let mut results = ResultsMap::new();
        let mut tasks = JoinSet::new();
        let mut queue = pending.into_iter();
        loop {
            while tasks.len() < limit {
                let Some((key, request)) = queue.next() else {
                    break;
                };
                ctx.check().map_err(EvaluateError::from)?;
                let engine = self.clone();
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    let result = engine.evaluate(&ctx, request).await;
                    (key, result)
                });
            }
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (key, result) = joined.map_err(|e| ValidateError::Task(e.to_string()))?;
            let result = result?;
            debug!(resource = %key, level = %result.most_restrictive_policy(), "evaluated");
            results.insert(key, result);
        }
        Ok(results)
    }

    /// Find the strictest enforce level each namespace could move to without
    /// its running pods violating it.
    ///
    /// Namespaces start at `privileged` and are probed at `baseline`, then
    /// `restricted`. The first probe that produces warnings ends the scan. A
    /// probe that fails sets the namespace to `unknown`.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluateError`] when the run is interrupted.
    pub async fn validate_namespaces(
        &self,
        ctx: &EvalContext,
        namespaces: &[Namespace],
    ) -> Result<NamespaceRecommendation, EvaluateError> {
        let probe = self.evaluators().namespace_probe();
        let mut recommendation = NamespaceRecommendation::new();

        for namespace in namespaces {
            ctx.check()?;
            let Some(name) = namespace.metadata.name.clone() else {
                warn!("skipping namespace without a name");
                continue;
            };
            let old = match serde_json::to_value(namespace) {
                Ok(old) => old,
                Err(e) => {
                    warn!(namespace = %name, error = %e, "failed to serialize namespace");
                    recommendation.insert(name, SecurityLevel::Unknown);
                    continue;
                }
            };

            let mut level = SecurityLevel::Privileged;
            for candidate in [SecurityLevel::Baseline, SecurityLevel::Restricted] {
                let new = with_enforce_label(&old, candidate);
                let request = EvaluationRequest::namespace_update(name.clone(), old.clone(), new);
                match probe.validate(ctx, &request).await {
                    Ok(result) if result.warnings.is_empty() => level = candidate,
                    Ok(result) => {
                        debug!(
                            namespace = %name,
                            %candidate,
                            warnings = result.warnings.len(),
                            "namespace not compatible"
                        );
                        break;
                    }
                    Err(LevelFailure::Interrupted(reason)) => return Err(reason.into()),
                    Err(failure) => {
                        warn!(namespace = %name, %candidate, error = %failure, "namespace probe failed");
                        level = SecurityLevel::Unknown;
                        break;
                    }
                }
            }
            recommendation.insert(name, level);
        }
        Ok(recommendation)
    }
}

/// Copy of a namespace object with its enforce label set to `level`.
fn with_enforce_label(object: &serde_json::Value, level: SecurityLevel) -> serde_json::Value {
    let mut copy = object.clone();
    if let Some(fields) = copy.as_object_mut() {
        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            let labels = metadata
                .entry("labels")
                .or_insert_with(|| serde_json::json!({}));
            if labels.is_null() {
                *labels = serde_json::json!({});
            }
            if let Some(labels) = labels.as_object_mut() {
                labels.insert(ENFORCE_LEVEL_LABEL.to_owned(), level.as_str().into());
            }
        }
    }
    copy
}

/// Reduce per-resource results to one level per namespace.
///
/// Each namespace gets the least restrictive of its resources' levels, so a
/// single `unknown` resource makes the namespace `unknown`.
pub fn most_restrictive_policy_per_namespace(results: &ResultsMap) -> NamespaceRecommendation {
    let mut recommendation = NamespaceRecommendation::new();
    for (key, result) in results.iter() {
        let level = result.most_restrictive_policy();
        recommendation
            .entry(key.namespace.clone())
            .and_modify(|current: &mut SecurityLevel| *current = current.least_restrictive(level))
            .or_insert(level);
    }
    recommendation
}
