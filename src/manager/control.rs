//! Cooperative pause/cancel control for one job
//!
//! Phase code never gets preempted; it polls a `JobControl` at suspension
//! points (per URL, per document, at substate boundaries). Pause is a gate:
//! a closed gate parks the task until reopened. Cancel is a token observed
//! at the same points; cancelling also wakes a paused task so it can exit.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Signal returned from a suspension point when the job was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Shared pause gate and cancel token for one job
#[derive(Clone)]
pub struct JobControl {
    cancel: CancellationToken,
    gate: watch::Sender<bool>,
}

impl JobControl {
    /// New control with the gate open and no cancel requested
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            cancel: CancellationToken::new(),
            gate,
        }
    }

    /// Closes the gate; executing tasks park at their next suspension point
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Reopens the gate, waking any parked task
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Requests cancellation; also wakes a paused task
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.gate.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        !*self.gate.borrow()
    }

    /// Suspension point
    ///
    /// Returns immediately while running; parks while paused; returns
    /// `Err(Cancelled)` once cancellation has been requested, including
    /// while parked.
    pub async fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if *self.gate.borrow() {
            return Ok(());
        }

        let mut gate = self.gate.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Cancelled),
            opened = gate.wait_for(|open| *open) => match opened {
                Ok(_) => {
                    if self.cancel.is_cancelled() {
                        Err(Cancelled)
                    } else {
                        Ok(())
                    }
                }
                Err(_) => Err(Cancelled),
            },
        }
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}
