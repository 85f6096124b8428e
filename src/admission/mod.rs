//! Multi-level admission engine.
//!
//! Every candidate object is evaluated at `restricted`, `baseline` and
//! `privileged` at the same time. Per-object outcomes are then reduced to the
//! strictest level each namespace could enforce without rejecting any of its
//! workloads.
//!
//! - [`evaluator`]: one admission evaluator per level
//! - [`parallel`]: the three-way fan-out and join
//! - [`aggregate`]: per-resource and per-namespace runs, and the reducer
//! - [`ordered`]: sorted view over the final recommendation
//! - [`delta`]: drop namespaces that already enforce the recommended level

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::types::SecurityLevel;

pub mod aggregate;
pub mod context;
pub mod delta;
pub mod evaluator;
pub mod ordered;
pub mod parallel;

pub use aggregate::{most_restrictive_policy_per_namespace, ValidateError};
pub use context::{CancelHandle, EvalContext, Interrupted};
pub use evaluator::{LevelEvaluator, LevelEvaluatorSet, SetupError};
pub use ordered::OrderedLevelMap;
pub use parallel::{EvaluateError, ParallelAdmission};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Admission operation being simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Object creation.
    Create,
    /// Update of an existing object; the request carries the old object.
    Update,
}

/// One candidate object.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    namespace: String,
    name: String,
    kind: String,
    operation: Operation,
    object: Value,
    old_object: Option<Value>,
}

impl EvaluationRequest {
    /// Request to admit a new object.
    pub fn create(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        object: Value,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: kind.into(),
            operation: Operation::Create,
            object,
            old_object: None,
        }
    }

    /// Request to update a namespace from `old` to `new`.
    pub fn namespace_update(name: impl Into<String>, old: Value, new: Value) -> Self {
        let name = name.into();
        Self {
            namespace: name.clone(),
            name,
            kind: crate::scheme::NAMESPACE_KIND.to_owned(),
            operation: Operation::Update,
            object: new,
            old_object: Some(old),
        }
    }

    /// Namespace the object lives in. For namespaces, their own name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Simulated operation.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Object content (the new object for updates).
    pub fn object(&self) -> &Value {
        &self.object
    }

    /// Previous object content for updates.
    pub fn old_object(&self) -> Option<&Value> {
        self.old_object.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one request at one level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelResult {
    /// Whether the object would be admitted.
    pub allowed: bool,
    /// Why the object was denied.
    pub reason: Option<String>,
    /// Warnings returned with the decision.
    pub warnings: Vec<String>,
    /// Audit annotations recorded with the decision.
    pub audit_annotations: HashMap<String, String>,
}

impl LevelResult {
    /// Allowed with no caveats.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }

    /// Denied with `reason`.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Why a level produced no result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LevelFailure {
    /// The evaluator returned an error.
    #[error("evaluation failed: {0}")]
    Failed(String),
    /// The evaluator task panicked.
    #[error("evaluator panicked: {0}")]
    Panicked(String),
    /// The evaluator observed cancellation.
    #[error("evaluation interrupted: {0}")]
    Interrupted(Interrupted),
}

/// Result slot for one level.
pub type LevelOutcome = Result<LevelResult, LevelFailure>;

/// Outcomes of one request at all three levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelResult {
    /// Outcome at `restricted`.
    pub restricted: LevelOutcome,
    /// Outcome at `baseline`.
    pub baseline: LevelOutcome,
    /// Outcome at `privileged`.
    pub privileged: LevelOutcome,
}

impl ParallelResult {
    /// Strictest level that admits the object.
    ///
    /// `unknown` when any level failed to produce a result.
    pub fn most_restrictive_policy(&self) -> SecurityLevel {
        let (Ok(restricted), Ok(baseline), Ok(_)) =
            (&self.restricted, &self.baseline, &self.privileged)
        else {
            return SecurityLevel::Unknown;
        };
        if restricted.allowed {
            SecurityLevel::Restricted
        } else if baseline.allowed {
            SecurityLevel::Baseline
        } else {
            SecurityLevel::Privileged
        }
    }

    /// Outcome at `level`, `None` for `unknown`.
    pub fn outcome(&self, level: SecurityLevel) -> Option<&LevelOutcome> {
        match level {
            SecurityLevel::Restricted => Some(&self.restricted),
            SecurityLevel::Baseline => Some(&self.baseline),
            SecurityLevel::Privileged => Some(&self.privileged),
            SecurityLevel::Unknown => None,
        }
    }
}

impl fmt::Display for ParallelResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for level in [
            SecurityLevel::Privileged,
            SecurityLevel::Baseline,
            SecurityLevel::Restricted,
        ] {
            let Some(outcome) = self.outcome(level) else {
                continue;
            };
            match outcome {
                Ok(result) if result.allowed => writeln!(f, "{level}: allowed")?,
                Ok(result) => writeln!(
                    f,
                    "{level}: denied: {}",
                    result.reason.as_deref().unwrap_or("no reason given")
                )?,
                Err(failure) => writeln!(f, "{level}: {failure}")?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Keys and maps
// ---------------------------------------------------------------------------

/// Identity of one evaluated resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultKey {
    /// Object kind.
    pub kind: String,
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Per-resource results of one run.
///
/// Entries are write-once: inserting a key that is already present is
/// rejected and the original result kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsMap {
    entries: HashMap<ResultKey, ParallelResult>,
}

impl ResultsMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result. Returns `false` and keeps the existing entry when
    /// `key` is already present.
    pub fn insert(&mut self, key: ResultKey, result: ParallelResult) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, result);
        true
    }

    /// Result for `key`.
    pub fn get(&self, key: &ResultKey) -> Option<&ParallelResult> {
        self.entries.get(key)
    }

    /// Whether `key` has a result.
    pub fn contains_key(&self, key: &ResultKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResultKey, &ParallelResult)> {
        self.entries.iter()
    }
}

impl FromIterator<(ResultKey, ParallelResult)> for ResultsMap {
    fn from_iter<T: IntoIterator<Item = (ResultKey, ParallelResult)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, result) in iter {
            map.insert(key, result);
        }
        map
    }
}

/// Recommended level per namespace.
pub type NamespaceRecommendation = HashMap<String, SecurityLevel>;
