//! Per task type slot accounting
//!
//! A [`SlotTracker`] counts how many executions of one task type may still be
//! started. Every change is submitted as a signed adjustment into a bounded
//! queue that a single background task drains in arrival order, so the
//! counter has exactly one writer. Readers take a snapshot under the same lock.
//!
//! ```text
//!  increase(+n) ─┐
//!  consume(-1)  ─┼──► [ bounded queue ] ──► drain task ──► Mutex<i64>
//!  guard drop(+1)┘                                            ▲
//!                                               get() ────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, trace, warn};

/// Slot tracker errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SlotTrackerError {
    /// The drain task is gone; no further adjustments can be applied
    #[error("slot tracker for task type {0} is closed")]
    Closed(String),
}

enum Adjustment {
    Delta(i64),
    Flush(oneshot::Sender<()>),
}

struct Shared {
    available: Mutex<i64>,
    capacity_returned: Notify,
}

/// Single-writer slot counter for one task type
///
/// Cloning is cheap; all clones feed the same queue. The drain task exits once
/// every clone and every outstanding [`SlotGuard`] is dropped.
///
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct SlotTracker {
    task_type: Arc<str>,
    tx: mpsc::Sender<Adjustment>,
    shared: Arc<Shared>,
}

impl SlotTracker {
    /// Create a tracker with zero available slots and spawn its drain task
    ///
    /// `idle_timeout` bounds each wait for the next adjustment. Hitting it is
    /// a normal idle tick, not an error.
    pub fn new(task_type: &str, queue_capacity: usize, idle_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let shared = Arc::new(Shared {
            available: Mutex::new(0),
            capacity_returned: Notify::new(),
        });
        let task_type: Arc<str> = Arc::from(task_type);

        tokio::spawn(drain(
            Arc::clone(&task_type),
            rx,
            Arc::clone(&shared),
            idle_timeout,
        ));

        Self {
            task_type,
            tx,
            shared,
        }
    }

    /// Task type this tracker accounts for
    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// Add `n` slots
    pub async fn increase(&self, n: u32) -> Result<(), SlotTrackerError> {
        self.submit(Adjustment::Delta(i64::from(n))).await
    }

    /// Remove `n` slots in a single adjustment
    pub async fn reduce(&self, n: u32) -> Result<(), SlotTrackerError> {
        self.submit(Adjustment::Delta(-i64::from(n))).await
    }

    /// Take one slot without a release guard
    ///
    /// The caller is responsible for a matching `increase(1)`. Prefer
    /// [`SlotTracker::consume`].
    pub async fn decrease(&self) -> Result<(), SlotTrackerError> {
        self.submit(Adjustment::Delta(-1)).await
    }

    /// Take one slot and get a guard that returns it when dropped
    pub async fn consume(&self) -> Result<SlotGuard, SlotTrackerError> {
        self.decrease().await?;
        Ok(SlotGuard {
            task_type: Arc::clone(&self.task_type),
            tx: self.tx.clone(),
        })
    }

    /// Current number of free slots
    ///
    /// Adjustments still sitting in the queue are not reflected.
    pub fn get(&self) -> i64 {
        *self.shared.available.lock()
    }

    /// Wait until every adjustment submitted before this call is applied
    pub async fn sync(&self) -> Result<(), SlotTrackerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.submit(Adjustment::Flush(ack_tx)).await?;
        ack_rx.await.map_err(|_| self.closed())
    }

    /// Wait until slots are added or returned, or `timeout` elapses
    ///
    /// Returns `true` if woken by new capacity.
    pub async fn wait_for_capacity(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.shared.capacity_returned.notified())
            .await
            .is_ok()
    }

    /// Whether the drain task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn submit(&self, adjustment: Adjustment) -> Result<(), SlotTrackerError> {
        self.tx.send(adjustment).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> SlotTrackerError {
        SlotTrackerError::Closed(self.task_type.to_string())
    }
}

impl std::fmt::Debug for SlotTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTracker")
            .field("task_type", &self.task_type)
            .field("available", &self.get())
            .finish()
    }
}

/// One consumed slot
///
/// Dropping the guard returns the slot to its tracker exactly once, including
/// when the owning task unwinds from a panic.
pub struct SlotGuard {
    task_type: Arc<str>,
    tx: mpsc::Sender<Adjustment>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        match self.tx.try_send(Adjustment::Delta(1)) {
            Ok(()) => {}
            Err(TrySendError::Full(adjustment)) => {
                // Drop can't await; hand the send to the runtime
                let tx = self.tx.clone();
                let task_type = Arc::clone(&self.task_type);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if tx.send(adjustment).await.is_err() {
                                debug!(%task_type, "Slot tracker closed before slot was returned");
                            }
                        });
                    }
                    Err(_) => {
                        warn!(%task_type, "No runtime available, slot not returned");
                    }
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(task_type = %self.task_type, "Slot tracker closed before slot was returned");
            }
        }
    }
}

async fn drain(
    task_type: Arc<str>,
    mut rx: mpsc::Receiver<Adjustment>,
    shared: Arc<Shared>,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(Adjustment::Delta(delta))) => {
                let available = {
                    let mut available = shared.available.lock();
                    *available += delta;
                    *available
                };
                trace!(%task_type, delta, available, "Applied slot adjustment");

                if available < 0 {
                    warn!(%task_type, available, "Slot count went negative");
                }
                if delta > 0 {
                    shared.capacity_returned.notify_one();
                }
            }
            Ok(Some(Adjustment::Flush(ack))) => {
                let _ = ack.send(());
            }
            Ok(None) => {
                debug!(%task_type, "Slot tracker drained, all senders dropped");
                break;
            }
            Err(_) => {
                trace!(
                    %task_type,
                    idle_ms = idle_timeout.as_millis() as u64,
                    "No slot adjustments within idle timeout"
                );
            }
        }
    }
}
