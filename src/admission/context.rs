//! Cancellation and deadline carried through an evaluation run.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a run stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    /// The run was cancelled.
    #[error("evaluation cancelled")]
    Cancelled,
    /// The run's deadline passed.
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal plus optional deadline.
///
/// Cheap to clone; every clone observes the same cancellation.
#[derive(Debug, Clone)]
pub struct EvalContext {
    cancel_rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Trips the cancellation of the [`EvalContext`] it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every clone of the paired context.
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }
}

impl EvalContext {
    /// A cancellable context with no deadline.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, cancel_rx) = watch::channel(false);
        (
            Self {
                cancel_rx,
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (ctx, _handle) = Self::new();
        ctx
    }

    /// Stop at `deadline` at the latest.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Stop after `timeout` from now at the latest.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.with_deadline(deadline)
    }

    /// Current deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Return the interruption if the context is already done.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] once cancelled or past the deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if *self.cancel_rx.borrow() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolve when the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a context without deadline whose handle was
    /// dropped without cancelling.
    pub async fn done(&self) -> Interrupted {
        let mut rx = self.cancel_rx.clone();
        let cancelled = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = cancelled => Interrupted::Cancelled,
                () = tokio::time::sleep_until(deadline) => Interrupted::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                Interrupted::Cancelled
            }
        }
    }

    /// Run `fut` unless the context finishes first.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] when cancellation or the deadline wins.
    pub async fn run<F: std::future::Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            out = fut => Ok(out),
        }
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::background()
    }
}

fn far_future() -> Instant {
    // About 30 years, the same horizon tokio uses for "never".
    Instant::now()
        .checked_add(Duration::from_secs(86_400 * 365 * 30))
        .unwrap_or_else(Instant::now)
}
