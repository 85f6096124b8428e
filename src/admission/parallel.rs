//! Evaluate one request at all three levels concurrently.

use std::sync::Arc;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use super::{
    EvalContext, EvaluationRequest, Interrupted, LevelEvaluatorSet, LevelFailure, LevelOutcome,
    ParallelResult,
};
use crate::types::SecurityLevel;

/// Failures that abort a whole evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EvaluateError {
    /// The run was cancelled before all levels finished.
    #[error("evaluation cancelled")]
    Cancelled,
    /// The run's deadline passed before all levels finished.
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for EvaluateError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Fans a request out to the restricted, baseline and privileged evaluators.
#[derive(Debug, Clone)]
pub struct ParallelAdmission {
    evaluators: Arc<LevelEvaluatorSet>,
}

impl ParallelAdmission {
    /// Engine over `evaluators`.
    pub fn new(evaluators: LevelEvaluatorSet) -> Self {
        Self {
            evaluators: Arc::new(evaluators),
        }
    }

    /// The evaluators behind this engine.
    pub fn evaluators(&self) -> &LevelEvaluatorSet {
        &self.evaluators
    }

    /// Evaluate `request` at every level and wait for all three results.
    ///
    /// A level that fails or panics gets a failure slot; the other slots are
    /// still filled.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluateError`] when `ctx` is cancelled or times out, or when
    /// any evaluator observes that itself. In-flight evaluations are aborted
    /// and no partial result is returned.
    pub async fn evaluate(
        &self,
        ctx: &EvalContext,
        request: Arc<EvaluationRequest>,
    ) -> Result<ParallelResult, EvaluateError> {
        ctx.check()?;

        let restricted = self.spawn_level(ctx, &request, SecurityLevel::Restricted);
        let baseline = self.spawn_level(ctx, &request, SecurityLevel::Baseline);
        let privileged = self.spawn_level(ctx, &request, SecurityLevel::Privileged);
        let _guard = AbortOnDrop([
            restricted.abort_handle(),
            baseline.abort_handle(),
            privileged.abort_handle(),
        ]);

        let joined = tokio::select! {
            biased;
            reason = ctx.done() => {
                debug!(%reason, name = request.name(), "evaluation interrupted");
                return Err(reason.into());
            }
            joined = async { tokio::join!(restricted, baseline, privileged) } => joined,
        };

        let result = ParallelResult {
            restricted: settle(SecurityLevel::Restricted, joined.0),
            baseline: settle(SecurityLevel::Baseline, joined.1),
            privileged: settle(SecurityLevel::Privileged, joined.2),
        };
        for slot in [&result.restricted, &result.baseline, &result.privileged] {
            if let Err(LevelFailure::Interrupted(reason)) = slot {
                return Err((*reason).into());
            }
        }
        Ok(result)
    }

    fn spawn_level(
        &self,
        ctx: &EvalContext,
        request: &Arc<EvaluationRequest>,
        level: SecurityLevel,
    ) -> JoinHandle<LevelOutcome> {
        let evaluators = Arc::clone(&self.evaluators);
        let request = Arc::clone(request);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match evaluators.get(level) {
                Some(evaluator) => evaluator.validate(&ctx, &request).await,
                None => Err(LevelFailure::Failed(format!("no evaluator for level {level}"))),
            }
        })
    }
}

/// Aborts the level tasks when an evaluation ends or its future is dropped.
/// Tasks that already finished are unaffected.
struct AbortOnDrop([AbortHandle; 3]);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn settle(
    level: SecurityLevel,
    joined: Result<LevelOutcome, tokio::task::JoinError>,
) -> LevelOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_owned());
            warn!(%level, %message, "evaluator panicked");
            Err(LevelFailure::Panicked(message))
        }
        Err(err) => Err(LevelFailure::Failed(format!("evaluator task ended: {err}"))),
    }
}
