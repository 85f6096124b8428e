//! Pod Security policy evaluation seam.
//!
//! The admission engine never inspects pod fields itself. It extracts the pod
//! template from a workload with [`PodSpecExtractor`] and hands it to a
//! [`PolicyEvaluator`] together with the level being checked.
//!
//! [`checks::PodSecurityChecks`] is the evaluator the binary ships with.

use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::scheme::ResourceScheme;
use crate::types::LevelVersion;

pub mod checks;

/// One failed control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenReason {
    /// Short name of the control, e.g. `host namespaces`.
    pub reason: String,
    /// Which fields violated it.
    pub detail: String,
}

impl std::fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.detail.is_empty() {
            f.write_str(&self.reason)
        } else {
            write!(f, "{} ({})", self.reason, self.detail)
        }
    }
}

/// Outcome of evaluating one pod spec at one level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyVerdict {
    /// Every control the pod failed. Empty means allowed.
    pub forbidden: Vec<ForbiddenReason>,
}

impl PolicyVerdict {
    /// A verdict with no violations.
    pub fn allow() -> Self {
        Self::default()
    }

    /// Whether the pod passed every control.
    pub fn allowed(&self) -> bool {
        self.forbidden.is_empty()
    }

    /// Comma separated list of violations, in check order.
    pub fn summary(&self) -> String {
        self.forbidden
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Evaluates a pod specification against a Pod Security level.
pub trait PolicyEvaluator: Send + Sync {
    /// Check `spec` (with its template `metadata`) against `level`.
    fn evaluate_pod(&self, level: LevelVersion, metadata: &ObjectMeta, spec: &PodSpec)
        -> PolicyVerdict;
}

/// Rule set construction failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleSetError {
    /// No checks were supplied.
    #[error("rule set is empty")]
    Empty,
    /// Two checks share an id.
    #[error("duplicate check id {0:?}")]
    DuplicateId(String),
    /// A check is registered for a level that has no controls.
    #[error("check {id:?} is registered for level {level}, expected baseline or restricted")]
    InvalidLevel {
        /// Offending check id.
        id: String,
        /// Level it was registered for.
        level: String,
    },
}

/// Pod template extraction failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The object has no pod template where its kind keeps one.
    #[error("{kind} has no pod template at {pointer:?}")]
    MissingTemplate {
        /// Kind of the object.
        kind: String,
        /// Pointer that was looked up.
        pointer: String,
    },
    /// The template is present but has no `spec`.
    #[error("{kind} pod template has no spec")]
    MissingSpec {
        /// Kind of the object.
        kind: String,
    },
    /// The template does not deserialize into a pod template.
    #[error("{kind} pod template is malformed: {source}")]
    Malformed {
        /// Kind of the object.
        kind: String,
        /// Deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// Pulls pod templates out of workload objects.
#[derive(Debug, Clone)]
pub struct PodSpecExtractor {
    scheme: ResourceScheme,
}

impl PodSpecExtractor {
    /// Extractor for the kinds registered in `scheme`.
    pub fn new(scheme: ResourceScheme) -> Self {
        Self { scheme }
    }

    /// Extract the pod template of `object`.
    ///
    /// Returns `Ok(None)` for kinds that do not carry pods.
    ///
    /// # Errors
    ///
    /// Returns an error when a pod-bearing kind has no usable template.
    pub fn extract(
        &self,
        kind: &str,
        object: &Value,
    ) -> Result<Option<(ObjectMeta, PodSpec)>, ExtractError> {
        let Some(registered) = self.scheme.by_kind(kind) else {
            return Ok(None);
        };
        let template = object
            .pointer(registered.template_pointer)
            .ok_or_else(|| ExtractError::MissingTemplate {
                kind: kind.to_owned(),
                pointer: registered.template_pointer.to_owned(),
            })?;
        let parsed: PodTemplateSpec =
            serde_json::from_value(template.clone()).map_err(|source| {
                ExtractError::Malformed {
                    kind: kind.to_owned(),
                    source,
                }
            })?;
        let spec = parsed.spec.ok_or_else(|| ExtractError::MissingSpec {
            kind: kind.to_owned(),
        })?;
        Ok(Some((parsed.metadata.unwrap_or_default(), spec)))
    }
}
