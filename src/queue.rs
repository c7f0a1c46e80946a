//! Single-flight request queue with minimum inter-request spacing
//!
//! Every outbound operation in a session goes through one [`RequestQueue`].
//! The queue dispatches strictly one operation at a time, in FIFO order, and
//! never lets two dispatches happen closer together than the configured
//! minimum interval. This is the mechanism that keeps the archive's abuse
//! detection quiet: it is sensitive to request concurrency and spacing more
//! than raw volume.
//!
//! The drain loop is an explicit two-state machine (Idle/Draining) guarded by
//! a flag inside the queue state, so at most one drain task ever runs. The
//! queue enforces *inter-operation* spacing only; per-operation backoff is
//! [`crate::retry`]'s job, and the two policies compose because a queued
//! operation may retry internally while it holds its single slot.

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, oneshot};

type QueuedOperation = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A pending operation: an opaque async thunk plus a label for log output.
///
/// Created on enqueue, destroyed once its oneshot settles and the drain loop
/// moves on.
struct RequestDescriptor {
    label: String,
    run: QueuedOperation,
}

/// Drain loop state. Exactly one drain task exists while Draining.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DrainState {
    /// No drain loop is running
    Idle,
    /// A drain task owns the queue and is dispatching
    Draining,
}

struct QueueInner {
    pending: VecDeque<RequestDescriptor>,
    state: DrainState,
    last_dispatch: Option<Instant>,
}

/// Handle to an enqueued operation's eventual result.
pub struct QueuedRequest<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> QueuedRequest<T> {
    /// Wait for the operation to dispatch and settle.
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::QueueClosed),
        }
    }
}

/// FIFO queue serializing all outbound operations for a session
///
/// Cheap to clone; clones share the same queue state.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Mutex<QueueInner>>,
    config: QueueConfig,
}

impl RequestQueue {
    /// Create an empty queue with the given pacing configuration.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                pending: VecDeque::new(),
                state: DrainState::Idle,
                last_dispatch: None,
            })),
            config,
        }
    }

    /// Append an operation and return a handle to its eventual result.
    ///
    /// The push completes before this returns, so sequential `submit` calls
    /// dispatch in call order. Starts the drain loop if it is idle.
    pub async fn submit<T, F, Fut>(&self, label: &str, operation: F) -> QueuedRequest<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let descriptor = RequestDescriptor {
            label: label.to_string(),
            run: Box::new(move || {
                Box::pin(async move {
                    let result = operation().await;
                    // The caller may have given up waiting; that is not the
                    // queue's problem.
                    let _ = tx.send(result);
                })
            }),
        };

        let start_drain = {
            let mut inner = self.inner.lock().await;
            inner.pending.push_back(descriptor);
            if inner.state == DrainState::Idle {
                inner.state = DrainState::Draining;
                true
            } else {
                false
            }
        };

        if start_drain {
            let inner = Arc::clone(&self.inner);
            let config = self.config.clone();
            tokio::spawn(drain(inner, config));
        }

        QueuedRequest { rx }
    }

    /// Append an operation and wait for it to dispatch and settle.
    pub async fn enqueue<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(label, operation).await.wait().await
    }

    /// Number of operations waiting behind the one in flight.
    ///
    /// Advisory telemetry for "N requests queued" feedback; the queue itself
    /// is unbounded.
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Whether a drain loop is currently running.
    pub async fn is_draining(&self) -> bool {
        self.inner.lock().await.state == DrainState::Draining
    }
}

/// The drain loop body. Only ever entered by the task that flipped the state
/// to Draining, which is what makes the one-in-flight invariant hold without
/// any further locking.
async fn drain(inner: Arc<Mutex<QueueInner>>, config: QueueConfig) {
    loop {
        let descriptor = {
            let mut guard = inner.lock().await;
            match guard.pending.pop_front() {
                Some(descriptor) => descriptor,
                None => {
                    guard.state = DrainState::Idle;
                    tracing::debug!("request queue drained, going idle");
                    return;
                }
            }
        };

        // Enforce the minimum gap since the previous dispatch. Only the
        // drain loop blocks here; concurrent submits still append freely.
        let wait = {
            let guard = inner.lock().await;
            guard
                .last_dispatch
                .and_then(|last| config.min_interval.checked_sub(last.elapsed()))
        };
        if let Some(wait) = wait {
            tracing::debug!(
                label = %descriptor.label,
                wait_ms = wait.as_millis() as u64,
                "spacing out queued operation"
            );
            tokio::time::sleep(wait).await;
        }

        {
            inner.lock().await.last_dispatch = Some(Instant::now());
        }

        tracing::debug!(label = %descriptor.label, "dispatching queued operation");
        (descriptor.run)().await;

        // Small fixed pause after every item, even when spacing was already
        // satisfied, to smooth bursts.
        tokio::time::sleep(config.inter_item_pause).await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_queue() -> RequestQueue {
        RequestQueue::new(QueueConfig {
            min_interval: Duration::from_millis(10),
            inter_item_pause: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn operations_dispatch_in_submission_order() {
        let queue = fast_queue();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let order = order.clone();
            let handle = queue
                .submit("ordered", move || async move {
                    order.lock().await.push(i);
                    Ok::<_, Error>(i)
                })
                .await;
            handles.push(handle);
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait().await.unwrap(), i as u32);
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dispatches_respect_minimum_spacing() {
        let queue = RequestQueue::new(QueueConfig {
            min_interval: Duration::from_millis(100),
            inter_item_pause: Duration::from_millis(1),
        });
        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let ts = timestamps.clone();
            let handle = queue
                .submit("spaced", move || async move {
                    ts.lock().await.push(Instant::now());
                    Ok::<_, Error>(())
                })
                .await;
            handles.push(handle);
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 3);
        for pair in ts.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(
                gap >= Duration::from_millis(95),
                "dispatch gap {gap:?} violates the 100ms minimum"
            );
        }
    }

    #[tokio::test]
    async fn failing_operations_do_not_stall_later_ones() {
        let queue = fast_queue();
        let ran = Arc::new(AtomicU32::new(0));

        let mut failures = Vec::new();
        for _ in 0..3 {
            let ran = ran.clone();
            let handle = queue
                .submit("failing", move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Other("boom".into()))
                })
                .await;
            failures.push(handle);
        }
        let ran_ok = ran.clone();
        let success = queue
            .submit("succeeding", move || async move {
                ran_ok.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>("made it")
            })
            .await;

        for handle in failures {
            assert!(handle.wait().await.is_err());
        }
        assert_eq!(success.wait().await.unwrap(), "made it");
        assert_eq!(ran.load(Ordering::SeqCst), 4, "every descriptor must run");
    }

    #[tokio::test]
    async fn depth_counts_waiting_items_not_the_one_in_flight() {
        let queue = RequestQueue::new(QueueConfig {
            min_interval: Duration::from_millis(1),
            inter_item_pause: Duration::from_millis(1),
        });
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = queue
            .submit("blocker", move || async move {
                let _ = release_rx.await;
                Ok::<_, Error>(())
            })
            .await;
        // Give the drain loop a chance to pop the blocker into flight.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = queue.submit("waiting-1", || async { Ok::<_, Error>(()) }).await;
        let third = queue.submit("waiting-2", || async { Ok::<_, Error>(()) }).await;

        assert_eq!(queue.depth().await, 2);
        assert!(queue.is_draining().await);

        release_tx.send(()).unwrap();
        blocker.wait().await.unwrap();
        second.wait().await.unwrap();
        third.wait().await.unwrap();

        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn queue_returns_to_idle_after_draining() {
        let queue = fast_queue();
        queue
            .enqueue("single", || async { Ok::<_, Error>(()) })
            .await
            .unwrap();
        // The drain loop still sleeps the inter-item pause after the last
        // item before noticing the queue is empty.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!queue.is_draining().await);

        // And a later enqueue starts a fresh drain.
        queue
            .enqueue("again", || async { Ok::<_, Error>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn enqueue_propagates_operation_error() {
        let queue = fast_queue();
        let result = queue
            .enqueue("failing", || async {
                Err::<(), _>(Error::Other("op failed".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::Other(_))));
    }
}
