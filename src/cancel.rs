//! Cancellation handles for in-flight calls.
//!
//! A [`CancellationHandle`] is a cheaply clonable trigger shared between the
//! caller and every layer of one call: the HTTP transport, the SSE parser,
//! the retry loop, tool handlers, and the agent loop all observe the same
//! handle. Triggering is idempotent, and every waiter registered through
//! [`CancellationHandle::cancelled`] is released exactly once.
//!
//! The client façade derives one *call-scoped* handle per request from the
//! disjunction of the caller's own handle and an internal deadline timer
//! ([`CancellationHandle::linked`]). The returned [`LinkGuard`] aborts the
//! watcher task when dropped, so the timer and the parent listener are
//! always cleared when the call completes, whichever way it completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    triggered: AtomicBool,
    tx: watch::Sender<bool>,
}

/// A shared, idempotent cancellation trigger.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Trigger cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.inner.triggered.swap(true, Ordering::SeqCst) {
            let _ = self.inner.tx.send(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Wait until the handle is triggered. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender lives inside our own Arc, so this only happens if
                // every handle was dropped mid-wait.
                return;
            }
        }
    }

    /// Derive a call-scoped handle that fires when any of `parents` fires
    /// or when `deadline` elapses. The watcher task is aborted when the
    /// returned [`LinkGuard`] drops, releasing the timer and all parent
    /// subscriptions.
    pub fn linked(
        parents: Vec<CancellationHandle>,
        deadline: Option<Duration>,
    ) -> (CancellationHandle, LinkGuard) {
        let child = CancellationHandle::new();

        // Already-triggered parents short-circuit without spawning.
        if parents.iter().any(|p| p.is_cancelled()) {
            child.cancel();
            return (child.clone(), LinkGuard { task: None });
        }

        let watched = child.clone();
        let task = tokio::spawn(async move {
            let any_parent = async {
                if parents.is_empty() {
                    std::future::pending::<()>().await;
                } else {
                    let waits = parents.iter().map(|p| Box::pin(p.cancelled()));
                    futures::future::select_all(waits).await;
                }
            };
            match deadline {
                Some(d) => {
                    tokio::select! {
                        _ = any_parent => watched.cancel(),
                        _ = tokio::time::sleep(d) => watched.cancel(),
                    }
                }
                None => {
                    any_parent.await;
                    watched.cancel();
                }
            }
        });

        (child, LinkGuard { task: Some(task) })
    }
}

/// Aborts the linking watcher (and with it the deadline timer) on drop.
#[derive(Debug)]
pub struct LinkGuard {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let handle = CancellationHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter must wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_triggered() {
        let handle = CancellationHandle::new();
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(100), handle.cancelled())
            .await
            .expect("must not block");
    }

    #[tokio::test]
    async fn test_linked_fires_on_parent() {
        let parent = CancellationHandle::new();
        let (child, _guard) = CancellationHandle::linked(vec![parent.clone()], None);
        assert!(!child.is_cancelled());
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child must fire");
    }

    #[tokio::test]
    async fn test_linked_fires_on_deadline() {
        let (child, _guard) =
            CancellationHandle::linked(Vec::new(), Some(Duration::from_millis(20)));
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("deadline must fire");
    }

    #[tokio::test]
    async fn test_linked_short_circuits_triggered_parent() {
        let parent = CancellationHandle::new();
        parent.cancel();
        let (child, _guard) = CancellationHandle::linked(vec![parent], None);
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_drop_clears_watcher() {
        let parent = CancellationHandle::new();
        let (child, guard) =
            CancellationHandle::linked(vec![parent.clone()], Some(Duration::from_millis(10)));
        drop(guard);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Neither the deadline nor a later parent trigger reaches the child
        // once the guard is gone.
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!child.is_cancelled());
    }
}
