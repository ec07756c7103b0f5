//! Per task type poll-and-dispatch loop
//!
//! Turns free slots into in-flight executions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use super::execution::TaskExecutor;
use super::handler::TaskHandler;
use crate::client::{ClientError, PollRequest, TaskClient};
use crate::config::EngineConfig;
use crate::slots::{SlotTracker, SlotTrackerError};
use crate::task::Task;

/// Extra time a poll may take beyond its long-poll timeout before it is abandoned
const POLL_GRACE: Duration = Duration::from_secs(5);

/// Registration of a handler for one task type
pub struct TaskRegistration {
    pub task_type: String,
    pub handler: TaskHandler,
    /// Slots added by this registration
    pub concurrency: u32,
    /// Idle poll interval; the engine default when `None`
    pub poll_interval: Option<Duration>,
    pub domain: Option<String>,
}

impl TaskRegistration {
    pub fn new(task_type: impl Into<String>, handler: TaskHandler) -> Self {
        Self {
            task_type: task_type.into(),
            handler,
            concurrency: 1,
            poll_interval: None,
            domain: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

impl std::fmt::Debug for TaskRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistration")
            .field("task_type", &self.task_type)
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .field("domain", &self.domain)
            .finish()
    }
}

/// Dispatch loop and slot tracker for one task type
///
/// Each cycle reads the free slot count, polls for at most that many tasks,
/// consumes one slot per returned task and spawns its execution without
/// waiting for it. Poll errors and empty polls never stop the loop; only the
/// shutdown signal or a closed slot tracker do.
pub struct TaskWorker {
    task_type: String,
    domain: Option<String>,
    slots: SlotTracker,
    client: Arc<dyn TaskClient>,
    executor: Arc<TaskExecutor>,
    worker_id: String,
    poll_timeout: Duration,
    max_batch_size: Option<usize>,
    poll_interval: RwLock<Duration>,
    paused: AtomicBool,
    in_flight: TaskTracker,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskWorker {
    /// Create the worker and start its dispatch loop
    ///
    /// The worker starts with zero slots; add capacity with
    /// [`TaskWorker::add_capacity`].
    pub(crate) fn spawn(
        registration: TaskRegistration,
        client: Arc<dyn TaskClient>,
        config: &EngineConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let slots = SlotTracker::new(
            &registration.task_type,
            config.slot_queue_capacity,
            config.slot_idle_timeout,
        );

        let executor = Arc::new(TaskExecutor {
            handler: registration.handler,
            client: Arc::clone(&client),
            worker_id: Arc::from(config.worker_id.as_str()),
            report_retry: config.report_retry.clone(),
        });

        let worker = Arc::new(Self {
            task_type: registration.task_type,
            domain: registration.domain,
            slots,
            client,
            executor,
            worker_id: config.worker_id.clone(),
            poll_timeout: config.poll_timeout,
            max_batch_size: config.max_batch_size,
            poll_interval: RwLock::new(
                registration
                    .poll_interval
                    .unwrap_or(config.default_poll_interval),
            ),
            paused: AtomicBool::new(false),
            in_flight: TaskTracker::new(),
            loop_handle: Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&worker).run(shutdown_rx));
        *worker.loop_handle.lock() = Some(handle);

        worker
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Free slots as last applied by the slot tracker
    pub fn available_slots(&self) -> i64 {
        self.slots.get()
    }

    /// Executions currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Add `n` slots
    pub async fn add_capacity(&self, n: u32) -> Result<(), SlotTrackerError> {
        self.slots.increase(n).await
    }

    /// Remove `n` slots in one adjustment
    pub async fn remove_capacity(&self, n: u32) -> Result<(), SlotTrackerError> {
        self.slots.reduce(n).await
    }

    /// Wait until all submitted slot adjustments are applied
    pub async fn sync_slots(&self) -> Result<(), SlotTrackerError> {
        self.slots.sync().await
    }

    pub fn poll_interval(&self) -> Duration {
        *self.poll_interval.read()
    }

    pub fn set_poll_interval(&self, interval: Duration) {
        *self.poll_interval.write() = interval;
    }

    /// Stop polling; in-flight executions keep running
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        info!(task_type = %self.task_type, "Paused polling");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        info!(task_type = %self.task_type, "Resumed polling");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Whether the dispatch loop has exited
    pub fn is_stopped(&self) -> bool {
        self.loop_handle
            .lock()
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the dispatch loop to exit and in-flight executions to finish
    pub(crate) async fn drain(&self) {
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(task_type = %self.task_type, error = %e, "Dispatch loop terminated abnormally");
            }
        }

        self.in_flight.close();
        self.in_flight.wait().await;
        debug!(task_type = %self.task_type, "Worker drained");
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            task_type = %self.task_type,
            domain = ?self.domain,
            poll_interval_ms = self.poll_interval().as_millis() as u64,
            "Dispatch loop started"
        );

        loop {
            if *shutdown_rx.borrow() {
                debug!(task_type = %self.task_type, "Dispatch loop: shutdown requested");
                break;
            }

            if self.is_paused() {
                if self.idle(&mut shutdown_rx).await {
                    break;
                }
                continue;
            }

            let available = self.slots.get();
            if available < 1 {
                trace!(task_type = %self.task_type, available, "No free slots, skipping poll");
                tokio::select! {
                    _ = self.slots.wait_for_capacity(self.poll_interval()) => {}
                    _ = shutdown_rx.changed() => break,
                }
                continue;
            }

            let polled = tokio::select! {
                polled = self.poll(available as usize) => polled,
                _ = shutdown_rx.changed() => break,
            };

            match polled {
                Ok(tasks) if tasks.is_empty() => {
                    trace!(task_type = %self.task_type, "No work, backing off");
                    if self.idle(&mut shutdown_rx).await {
                        break;
                    }
                }
                Ok(tasks) => {
                    if let Err(e) = self.dispatch(tasks).await {
                        error!(task_type = %self.task_type, error = %e, "Stopping dispatch loop");
                        break;
                    }
                }
                Err(e) => {
                    error!(task_type = %self.task_type, error = %e, "Poll error");
                    if self.idle(&mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        info!(task_type = %self.task_type, "Dispatch loop exited");
    }

    /// Poll for at most `available` tasks (further capped by the batch size)
    ///
    /// A poll that outlives its long-poll timeout by more than [`POLL_GRACE`]
    /// is abandoned and treated as a transport error.
    async fn poll(&self, available: usize) -> Result<Vec<Task>, ClientError> {
        let count = self
            .max_batch_size
            .map_or(available, |cap| available.min(cap));

        let request = PollRequest {
            task_type: self.task_type.clone(),
            count,
            timeout: self.poll_timeout,
            domain: self.domain.clone(),
            worker_id: self.worker_id.clone(),
        };

        let tasks = tokio::time::timeout(self.poll_timeout + POLL_GRACE, self.client.poll(request))
            .await
            .map_err(|_| ClientError::transport("poll did not return within its timeout"))??
            .into_tasks();

        // Extra tasks are already leased to this worker, so they still run;
        // the counter dips below zero until they return their slots.
        if tasks.len() > count {
            warn!(
                task_type = %self.task_type,
                requested = count,
                received = tasks.len(),
                "Task service returned more tasks than requested"
            );
        }
        if !tasks.is_empty() {
            debug!(task_type = %self.task_type, count = tasks.len(), "Polled tasks");
        }

        Ok(tasks)
    }

    /// Consume one slot per task and spawn its execution
    async fn dispatch(&self, tasks: Vec<Task>) -> Result<(), SlotTrackerError> {
        for task in tasks {
            let slot = self.slots.consume().await?;
            let executor = Arc::clone(&self.executor);
            self.in_flight.spawn(async move {
                // Outcome is logged by the executor
                let _ = executor.run(task, slot).await;
            });
        }

        // Next cycle must see the consumed slots
        self.slots.sync().await
    }

    /// Sleep for the poll interval; returns `true` if shutdown was signaled
    async fn idle(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval()) => false,
            _ = shutdown_rx.changed() => true,
        }
    }
}

impl std::fmt::Debug for TaskWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWorker")
            .field("task_type", &self.task_type)
            .field("domain", &self.domain)
            .field("available", &self.available_slots())
            .field("in_flight", &self.in_flight())
            .field("paused", &self.is_paused())
            .finish()
    }
}
