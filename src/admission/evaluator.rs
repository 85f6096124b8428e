//! Single-level admission evaluators.
//!
//! A [`LevelEvaluator`] behaves like the Pod Security admission plugin
//! configured with enforce, audit and warn defaults all pinned to one level.
//! The effective policy for an object comes from its namespace's labels when
//! set and from those defaults otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use tracing::{debug, instrument};

use super::{EvalContext, EvaluationRequest, LevelFailure, LevelResult};
use crate::cluster::{namespace_labels, NamespaceLookup, PodLister};
use crate::policy::{PodSpecExtractor, PolicyEvaluator, RuleSetError};
use crate::scheme::{ResourceScheme, NAMESPACE_KIND};
use crate::types::{
    LevelVersion, ParseError, PolicyVersion, SecurityLevel, AUDIT_LEVEL_LABEL,
    AUDIT_VERSION_LABEL, ENFORCE_LEVEL_LABEL, ENFORCE_VERSION_LABEL, WARN_LEVEL_LABEL,
    WARN_VERSION_LABEL,
};

/// Audit annotation holding the violations at the audit level.
pub const AUDIT_VIOLATIONS_ANNOTATION: &str = "audit-violations";
/// Audit annotation naming the enforced level.
pub const ENFORCE_POLICY_ANNOTATION: &str = "enforce-policy";

/// Evaluator construction failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// The policy rule set is malformed.
    #[error("invalid pod security rule set: {0}")]
    RuleSet(#[from] RuleSetError),
    /// No checks exist for the requested policy version.
    #[error("unsupported pod security version {0}")]
    UnsupportedVersion(PolicyVersion),
    /// `unknown` is not a level evaluators can be pinned to.
    #[error("cannot build an evaluator for level {0}")]
    InvalidLevel(SecurityLevel),
}

// ---------------------------------------------------------------------------
// Namespace policy
// ---------------------------------------------------------------------------

/// Effective enforce, audit and warn settings for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespacePolicy {
    /// Level objects are denied at.
    pub enforce: LevelVersion,
    /// Level violations are recorded as audit annotations at.
    pub audit: LevelVersion,
    /// Level violations are returned as warnings at.
    pub warn: LevelVersion,
}

impl NamespacePolicy {
    /// All three modes at `level`.
    pub fn uniform(level: LevelVersion) -> Self {
        Self {
            enforce: level,
            audit: level,
            warn: level,
        }
    }

    /// Resolve the policy from namespace labels, filling unset modes from
    /// `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when a Pod Security label holds an invalid value.
    pub fn from_labels(
        labels: &BTreeMap<String, String>,
        defaults: &NamespacePolicy,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            enforce: mode_from_labels(
                labels,
                ENFORCE_LEVEL_LABEL,
                ENFORCE_VERSION_LABEL,
                defaults.enforce,
            )?,
            audit: mode_from_labels(labels, AUDIT_LEVEL_LABEL, AUDIT_VERSION_LABEL, defaults.audit)?,
            warn: mode_from_labels(labels, WARN_LEVEL_LABEL, WARN_VERSION_LABEL, defaults.warn)?,
        })
    }
}

fn mode_from_labels(
    labels: &BTreeMap<String, String>,
    level_label: &str,
    version_label: &str,
    default: LevelVersion,
) -> Result<LevelVersion, ParseError> {
    let level = match labels.get(level_label) {
        Some(raw) => raw.parse()?,
        None => default.level,
    };
    let version = match labels.get(version_label) {
        Some(raw) => clamp_version(raw.parse()?, raw)?,
        None => default.version,
    };
    Ok(LevelVersion::new(level, version))
}

/// Versions newer than the checks know about evaluate as `latest`.
fn clamp_version(version: PolicyVersion, raw: &str) -> Result<PolicyVersion, ParseError> {
    match version {
        PolicyVersion::Pinned { major: 1, .. } if !version.is_supported() => {
            Ok(PolicyVersion::Latest)
        }
        PolicyVersion::Pinned { major: 1, .. } | PolicyVersion::Latest => Ok(version),
        PolicyVersion::Pinned { .. } => Err(ParseError::Version(raw.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Admission evaluator pinned to one level.
#[derive(Clone)]
pub struct LevelEvaluator {
    level: SecurityLevel,
    defaults: NamespacePolicy,
    policy: Arc<dyn PolicyEvaluator>,
    namespaces: Arc<dyn NamespaceLookup>,
    pods: Arc<dyn PodLister>,
    extractor: PodSpecExtractor,
}

impl std::fmt::Debug for LevelEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelEvaluator")
            .field("level", &self.level)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl LevelEvaluator {
    /// Build an evaluator with every mode defaulting to `level` at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] for `unknown` or an unsupported version.
    pub fn new(
        level: SecurityLevel,
        version: PolicyVersion,
        policy: Arc<dyn PolicyEvaluator>,
        namespaces: Arc<dyn NamespaceLookup>,
        pods: Arc<dyn PodLister>,
        scheme: ResourceScheme,
    ) -> Result<Self, SetupError> {
        if level == SecurityLevel::Unknown {
            return Err(SetupError::InvalidLevel(level));
        }
        if !version.is_supported() {
            return Err(SetupError::UnsupportedVersion(version));
        }
        Ok(Self {
            level,
            defaults: NamespacePolicy::uniform(LevelVersion::new(level, version)),
            policy,
            namespaces,
            pods,
            extractor: PodSpecExtractor::new(scheme),
        })
    }

    /// Level this evaluator is pinned to.
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Policy applied to namespaces without Pod Security labels.
    pub fn defaults(&self) -> &NamespacePolicy {
        &self.defaults
    }

    /// Run one admission request.
    ///
    /// # Errors
    ///
    /// Returns [`LevelFailure`] when the request cannot be evaluated, or
    /// [`LevelFailure::Interrupted`] when `ctx` finishes first.
    #[instrument(skip_all, fields(level = %self.level, kind = request.kind(), name = request.name()))]
    pub async fn validate(
        &self,
        ctx: &EvalContext,
        request: &EvaluationRequest,
    ) -> Result<LevelResult, LevelFailure> {
        ctx.check().map_err(LevelFailure::Interrupted)?;
        if request.kind() == NAMESPACE_KIND {
            self.validate_namespace(ctx, request).await
        } else {
            self.validate_workload(ctx, request).await
        }
    }

    async fn validate_workload(
        &self,
        ctx: &EvalContext,
        request: &EvaluationRequest,
    ) -> Result<LevelResult, LevelFailure> {
        let namespace = ctx
            .run(self.namespaces.get_namespace(request.namespace()))
            .await
            .map_err(LevelFailure::Interrupted)?
            .map_err(|e| LevelFailure::Failed(e.to_string()))?;
        let policy = NamespacePolicy::from_labels(&namespace_labels(&namespace), &self.defaults)
            .map_err(|e| {
                LevelFailure::Failed(format!(
                    "namespace \"{}\" has invalid pod security labels: {e}",
                    request.namespace()
                ))
            })?;

        let Some((metadata, spec)) = self
            .extractor
            .extract(request.kind(), request.object())
            .map_err(|e| LevelFailure::Failed(e.to_string()))?
        else {
            debug!("kind carries no pod template");
            return Ok(LevelResult::allowed());
        };

        let enforce = self.policy.evaluate_pod(policy.enforce, &metadata, &spec);
        let mut result = if enforce.allowed() {
            LevelResult::allowed()
        } else {
            LevelResult::denied(format!(
                "{} \"{}\" violates PodSecurity \"{}\": {}",
                request.kind(),
                request.name(),
                policy.enforce,
                enforce.summary()
            ))
        };
        result
            .audit_annotations
            .insert(ENFORCE_POLICY_ANNOTATION.to_owned(), policy.enforce.to_string());

        let verdict_at = |level: LevelVersion| {
            if level == policy.enforce {
                enforce.clone()
            } else {
                self.policy.evaluate_pod(level, &metadata, &spec)
            }
        };

        // A denial already carries the enforce violations.
        if result.allowed || policy.warn != policy.enforce {
            let warn = verdict_at(policy.warn);
            if !warn.allowed() {
                result.warnings.push(format!(
                    "would violate PodSecurity \"{}\": {}",
                    policy.warn,
                    warn.summary()
                ));
            }
        }

        let audit = verdict_at(policy.audit);
        if !audit.allowed() {
            result.audit_annotations.insert(
                AUDIT_VIOLATIONS_ANNOTATION.to_owned(),
                format!(
                    "would violate PodSecurity \"{}\": {}",
                    policy.audit,
                    audit.summary()
                ),
            );
        }
        Ok(result)
    }

    /// Namespace updates are never denied for their pods. Moving to a
    /// stricter enforce level reports the pods that would no longer be
    /// admitted as warnings.
    async fn validate_namespace(
        &self,
        ctx: &EvalContext,
        request: &EvaluationRequest,
    ) -> Result<LevelResult, LevelFailure> {
        let new_policy =
            match NamespacePolicy::from_labels(&labels_of(request.object())?, &self.defaults) {
                Ok(policy) => policy,
                Err(e) => return Ok(LevelResult::denied(e.to_string())),
            };
        let Some(old) = request.old_object() else {
            return Ok(LevelResult::allowed());
        };
        // An old namespace with broken labels counts as unlabelled.
        let old_policy = NamespacePolicy::from_labels(&labels_of(old)?, &self.defaults).ok();

        if new_policy.enforce.level == SecurityLevel::Privileged
            || old_policy.is_some_and(|p| p.enforce == new_policy.enforce)
        {
            return Ok(LevelResult::allowed());
        }

        let pods = ctx
            .run(self.pods.list_pods(request.namespace()))
            .await
            .map_err(LevelFailure::Interrupted)?
            .map_err(|e| LevelFailure::Failed(e.to_string()))?;

        let mut violations = Vec::new();
        for pod in &pods {
            ctx.check().map_err(LevelFailure::Interrupted)?;
            let Some(spec) = pod.spec.as_ref() else {
                continue;
            };
            let verdict = self
                .policy
                .evaluate_pod(new_policy.enforce, &pod.metadata, spec);
            if !verdict.allowed() {
                let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
                violations.push(format!("{name}: {}", verdict.summary()));
            }
        }

        let mut result = LevelResult::allowed();
        if !violations.is_empty() {
            debug!(
                namespace = request.namespace(),
                violating = violations.len(),
                "existing pods violate new enforce level"
            );
            result.warnings.push(format!(
                "existing pods in namespace \"{}\" violate the new PodSecurity enforce level \"{}\"",
                request.namespace(),
                new_policy.enforce
            ));
            result.warnings.extend(violations);
        }
        Ok(result)
    }
}

fn labels_of(object: &serde_json::Value) -> Result<BTreeMap<String, String>, LevelFailure> {
    let namespace: Namespace = serde_json::from_value(object.clone())
        .map_err(|e| LevelFailure::Failed(format!("malformed namespace object: {e}")))?;
    Ok(namespace_labels(&namespace))
}

// ---------------------------------------------------------------------------
// Evaluator set
// ---------------------------------------------------------------------------

/// The three evaluators, sharing one policy instance.
#[derive(Debug, Clone)]
pub struct LevelEvaluatorSet {
    restricted: LevelEvaluator,
    baseline: LevelEvaluator,
    privileged: LevelEvaluator,
}

impl LevelEvaluatorSet {
    /// Build one evaluator per level at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] when `version` is unsupported.
    pub fn new(
        policy: Arc<dyn PolicyEvaluator>,
        version: PolicyVersion,
        namespaces: Arc<dyn NamespaceLookup>,
        pods: Arc<dyn PodLister>,
        scheme: ResourceScheme,
    ) -> Result<Self, SetupError> {
        let build = |level| {
            LevelEvaluator::new(
                level,
                version,
                Arc::clone(&policy),
                Arc::clone(&namespaces),
                Arc::clone(&pods),
                scheme.clone(),
            )
        };
        Ok(Self {
            restricted: build(SecurityLevel::Restricted)?,
            baseline: build(SecurityLevel::Baseline)?,
            privileged: build(SecurityLevel::Privileged)?,
        })
    }

    /// Evaluator pinned to `level`, `None` for `unknown`.
    pub fn get(&self, level: SecurityLevel) -> Option<&LevelEvaluator> {
        match level {
            SecurityLevel::Restricted => Some(&self.restricted),
            SecurityLevel::Baseline => Some(&self.baseline),
            SecurityLevel::Privileged => Some(&self.privileged),
            SecurityLevel::Unknown => None,
        }
    }

    /// Evaluator used for namespace label probes.
    ///
    /// Pinned to `privileged` so an unlabelled namespace counts as
    /// privileged on the old side of the comparison.
    pub fn namespace_probe(&self) -> &LevelEvaluator {
        &self.privileged
    }
}
