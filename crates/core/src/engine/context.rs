//! Per-attempt execution context.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

/// Sender half of a cancellation signal.
///
/// Held by the runner's cancellation watcher; flipping it tells the
/// in-flight executor to abandon the attempt.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers may already be gone if the attempt finished first.
        let _ = self.tx.send(true);
    }
}

/// Create a linked cancel handle and receiver.
pub fn cancellation_channel() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, rx)
}

/// Everything an executor needs for one attempt besides the task
/// itself: the deadline, a cancellation signal and an optional progress
/// channel.
pub struct ExecutionContext {
    /// Wall-clock budget for this attempt.
    pub deadline: Duration,
    cancel: watch::Receiver<bool>,
    /// Progress reports in percent, best effort. Executors must never
    /// block on this channel.
    pub progress: Option<mpsc::Sender<f32>>,
}

impl ExecutionContext {
    pub fn new(
        deadline: Duration,
        cancel: watch::Receiver<bool>,
        progress: Option<mpsc::Sender<f32>>,
    ) -> Self {
        Self {
            deadline,
            cancel,
            progress,
        }
    }

    /// Context with no external cancellation, for tests and one-shot
    /// tooling.
    pub fn detached(deadline: Duration) -> Self {
        let (_handle, rx) = cancellation_channel();
        Self::new(deadline, rx, None)
    }

    /// Snapshot of the cancellation flag.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// A receiver an executor can await cancellation on.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    /// Report progress without blocking.
    pub fn report_progress(&self, pct: f32) {
        if let Some(progress) = &self.progress {
            let _ = progress.try_send(pct.clamp(0.0, 100.0));
        }
    }
}

/// Resolve once the receiver observes a true cancellation flag.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    loop {
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling; this attempt can never
            // be cancelled any more, so park forever and let the
            // surrounding select pick another branch.
            std::future::pending::<()>().await;
        }
        if *rx.borrow() {
            return;
        }
    }
}
