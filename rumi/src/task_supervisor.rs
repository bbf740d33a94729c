use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct SupervisorState {
    active: AtomicUsize,
    stop: CancellationToken,
    idle: CancellationToken,
}

/// Tracks spawned tasks so shutdown can wait for all of them to wind down.
///
/// `stop` requests shutdown, `join` resolves once every tracked task has
/// dropped its guard. Dropping the supervisor requests shutdown as well.
#[derive(Debug)]
pub struct TaskSupervisor(Arc<SupervisorState>);

/// Guard for one tracked task; dropping it reports the task as finished.
#[derive(Debug)]
pub struct TaskGuard(Arc<SupervisorState>);

impl TaskSupervisor {
    #[must_use]
    pub fn create() -> Self {
        let supervisor = Self(Arc::default());

        // Sentinel guard: keeps the active count positive until stop is
        // requested, so idle cannot fire while the supervisor still accepts
        // new tasks.
        let sentinel = supervisor.track();
        tokio::spawn(async move {
            sentinel.stopped().await;
        });

        supervisor
    }

    /// Requests all tracked tasks to stop.
    pub fn stop(&self) {
        self.0.stop.cancel();
    }

    /// Resolves when `stop` has been requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Resolves when shutdown was requested and every task has finished.
    pub async fn join(&self) {
        self.0.idle.cancelled().await;
    }

    /// Registers one task. Keep the guard alive for the task's duration.
    #[must_use]
    pub fn track(&self) -> TaskGuard {
        self.0.active.fetch_add(1, Ordering::AcqRel);
        TaskGuard(self.0.clone())
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TaskGuard {
    /// Resolves when the supervisor's `stop` has been requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.cancel();
        }
    }
}
