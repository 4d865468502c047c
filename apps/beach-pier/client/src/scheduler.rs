use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::connection::TimerId;

/// A delayed notification that is aborted when cancelled or dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    timer: TimerId,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn timer(&self) -> TimerId {
        self.timer
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        // Drop aborts.
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Holds at most one pending reconnect timer and reports its expiry on a
/// channel owned by the driver.
#[derive(Debug)]
pub struct ReconnectScheduler {
    fired: mpsc::UnboundedSender<TimerId>,
    pending: Option<ScheduledTask>,
}

impl ReconnectScheduler {
    pub fn new(fired: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            fired,
            pending: None,
        }
    }

    /// Replaces any pending timer.
    pub fn schedule(&mut self, timer: TimerId, delay: Duration) {
        let fired = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(target: "beach_pier::scheduler", timer = timer.0, "reconnect timer fired");
            let _ = fired.send(timer);
        });
        self.pending = Some(ScheduledTask { timer, handle });
    }

    pub fn cancel(&mut self, timer: TimerId) {
        if self.pending.as_ref().map(ScheduledTask::timer) == Some(timer) {
            if let Some(task) = self.pending.take() {
                task.cancel();
            }
        }
    }

    pub fn cancel_all(&mut self) {
        self.pending.take();
    }

    pub fn pending(&self) -> Option<TimerId> {
        self.pending
            .as_ref()
            .filter(|task| !task.is_finished())
            .map(ScheduledTask::timer)
    }
}
