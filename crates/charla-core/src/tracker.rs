//! In-flight background task tracking for graceful shutdown.
//!
//! Every piece of background work (embedding indexing, trace flush, summaries,
//! dataset curation, memory mirror sync) goes through [`TaskTracker::spawn`].
//! Shutdown stops accepting new work, waits for pending items up to a
//! deadline, then cancels the stragglers cooperatively.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct TaskTracker {
    inner: Arc<Inner>,
}

struct Inner {
    pending: DashMap<u64, String>,
    seq: AtomicU64,
    accepting: AtomicBool,
    drained: Notify,
    cancel: CancellationToken,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                seq: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
                drained: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Token cooperative children select on to observe shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Number of registered, not-yet-finished tasks.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Spawn `fut` as tracked background work.
    ///
    /// Returns `false` (and drops the future) once shutdown has begun. The
    /// future races against the tracker's cancellation token; at the shutdown
    /// deadline it is dropped at its next await point.
    pub fn spawn<F>(&self, label: &str, fut: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            debug!(label, "task rejected: tracker is shutting down");
            return false;
        }

        let id = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.insert(id, label.to_string());

        let inner = Arc::clone(&self.inner);
        let token = self.inner.cancel.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = fut => {}
                _ = token.cancelled() => {
                    debug!(label = %label, "task cancelled at shutdown deadline");
                }
            }
            inner.pending.remove(&id);
            if inner.pending.is_empty() {
                inner.drained.notify_waiters();
            }
        });
        true
    }

    /// Stop accepting new tasks, wait up to `deadline` for pending ones, then
    /// cancel whatever remains. Returns the number of tasks that were cut off.
    pub async fn shutdown(&self, deadline: Duration) -> usize {
        self.inner.accepting.store(false, Ordering::SeqCst);

        let wait = async {
            while !self.inner.pending.is_empty() {
                // Re-check after each notification; notify_waiters has no permit
                // so the emptiness check must come first.
                let notified = self.inner.drained.notified();
                if self.inner.pending.is_empty() {
                    break;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(deadline, wait).await.is_err() {
            let remaining = self.inner.pending.len();
            warn!(remaining, "shutdown deadline reached, cancelling tasks");
            self.inner.cancel.cancel();
            return remaining;
        }
        0
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_waits_for_fast_tasks() {
        let tracker = TaskTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        assert!(tracker.spawn("fast", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(());
        }));

        let cut = tracker.shutdown(Duration::from_secs(2)).await;
        assert_eq!(cut, 0);
        assert!(rx.await.is_ok());
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_slow_tasks_at_deadline() {
        let tracker = TaskTracker::new();
        assert!(tracker.spawn("slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));

        let cut = tracker.shutdown(Duration::from_millis(50)).await;
        assert_eq!(cut, 1);
    }

    #[tokio::test]
    async fn no_new_tasks_after_shutdown() {
        let tracker = TaskTracker::new();
        tracker.shutdown(Duration::from_millis(10)).await;
        assert!(!tracker.spawn("late", async {}));
    }
}
