use tokio::sync::mpsc::UnboundedSender;

use super::{FailureReason, RunOutcome, Stage};

/// Receives progress from a lifecycle run, typically to drive a dialog
pub trait ProgressReporter: Send + Sync {
    fn stage(&self, stage: Stage);

    fn failure(&self, reason: FailureReason);

    /// Called exactly once when the run terminates
    fn finished(&self, outcome: RunOutcome);
}

/// Progress notifications as plain values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Stage(Stage),
    Failure(FailureReason),
    Finished(RunOutcome),
}

/// Forwards progress into a channel drained by the UI loop
pub struct ChannelReporter {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressReporter for ChannelReporter {
    fn stage(&self, stage: Stage) {
        // Ignore send errors (e.g. if the UI already closed)
        let _ = self.tx.send(ProgressEvent::Stage(stage));
    }

    fn failure(&self, reason: FailureReason) {
        let _ = self.tx.send(ProgressEvent::Failure(reason));
    }

    fn finished(&self, outcome: RunOutcome) {
        let _ = self.tx.send(ProgressEvent::Finished(outcome));
    }
}

/// Reporter for headless runs: progress only goes to the log
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn stage(&self, stage: Stage) {
        tracing::info!("{}", stage.message());
    }

    fn failure(&self, reason: FailureReason) {
        tracing::error!("{}", reason.message());
    }

    fn finished(&self, outcome: RunOutcome) {
        tracing::info!(?outcome, "Run finished");
    }
}
