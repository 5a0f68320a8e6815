//! Detached background tasks.
//!
//! A detached task is spawned and never awaited by whoever started it.
//! Its errors stop at the task boundary: they are logged and dropped.
//! The set only counts what is in flight so a host can wait for quiescence
//! before shutting down.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Handle for spawning detached tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    inner: Arc<Inner>,
}

struct InFlightGuard(Arc<Inner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` on the current Tokio runtime and drop its handle.
    ///
    /// Must be called from within a runtime.
    pub fn spawn_detached<F, E>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(Arc::clone(&self.inner));

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = task.await {
                debug!(task = label, error = %e, "Detached task failed");
            }
        });
    }

    /// Number of tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no task is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_wait_idle_with_nothing_running() {
        let tasks = TaskSet::new();
        tasks.wait_idle().await;
        assert_eq!(tasks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_spawn_does_not_block_caller() {
        let tasks = TaskSet::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let done = Arc::new(AtomicBool::new(false));
        let done_in_task = Arc::clone(&done);

        tasks.spawn_detached("gate", async move {
            let _ = release_rx.await;
            done_in_task.store(true, Ordering::SeqCst);
            Ok::<(), String>(())
        });

        assert_eq!(tasks.in_flight(), 1);
        assert!(!done.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        tasks.wait_idle().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_errors_are_swallowed() {
        let tasks = TaskSet::new();
        tasks.spawn_detached("failing", async { Err::<(), _>("network down") });
        tasks.wait_idle().await;
        assert_eq!(tasks.in_flight(), 0);
    }
}
