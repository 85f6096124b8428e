//! The `inspect-workloads` and `inspect-cluster` commands.
//!
//! Each command validates its options, wires the sources and evaluators
//! together, runs the engine, and optionally drops namespaces that already
//! enforce their recommended level. Cluster access comes in through the
//! collaborator traits so the commands run the same against fakes.

use crate::admission::{EvaluateError, OrderedLevelMap, ResultsMap, SetupError, ValidateError};
use crate::cluster::ListError;
use crate::source::SourceError;

pub mod cluster;
pub mod workloads;

pub use cluster::{inspect_cluster, ClusterOptions};
pub use workloads::{inspect_workloads, WorkloadReport, WorkloadsOptions};

/// Failures of an inspect command, tagged by phase.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    /// Command-line options are inconsistent.
    #[error("invalid options: {0}")]
    Options(String),
    /// Evaluators could not be built.
    #[error("setting up evaluators: {0}")]
    Setup(#[from] SetupError),
    /// Resources could not be read.
    #[error("reading resources: {0}")]
    Source(#[from] SourceError),
    /// Evaluating resources failed.
    #[error("evaluating resources: {0}")]
    Validate(#[from] ValidateError),
    /// The run was cancelled or its deadline passed.
    #[error("run stopped: {0}")]
    Evaluate(#[from] EvaluateError),
    /// Namespaces could not be listed.
    #[error("listing namespaces: {0}")]
    List(#[from] ListError),
    /// The recommendation could not be rendered.
    #[error("rendering output: {0}")]
    Render(#[from] serde_json::Error),
}

/// Output format of the recommendation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `namespace: level` per line.
    #[default]
    Text,
    /// A JSON object keyed by namespace.
    Json,
}

/// Render a recommendation in namespace order.
///
/// # Errors
///
/// Returns [`InspectError::Render`] if JSON serialisation fails.
pub fn render(recommendation: &mut OrderedLevelMap, format: OutputFormat) -> Result<String, InspectError> {
    match format {
        OutputFormat::Text => Ok(recommendation
            .iter()
            .map(|(namespace, level)| format!("{namespace}: {level}\n"))
            .collect()),
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(recommendation)?;
            out.push('\n');
            Ok(out)
        }
    }
}

/// Per-resource, per-level breakdown in key order.
pub fn render_breakdown(results: &ResultsMap) -> String {
    let mut entries: Vec<_> = results.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
    let mut out = String::new();
    for (key, result) in entries {
        out.push_str(&format!("{key} => {}\n", result.most_restrictive_policy()));
        for line in result.to_string().lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
