//! Engine registry mapping task types to their workers

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::client::TaskClient;
use crate::config::{ConfigError, EngineConfig};
use crate::slots::SlotTrackerError;
use crate::worker::{TaskHandler, TaskRegistration, TaskWorker};

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No worker registered for the task type
    #[error("no worker registered for task type: {0}")]
    UnknownTaskType(String),

    /// The engine was shut down
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Workers did not drain within the allowed time
    #[error("workers still draining after {0:?}")]
    DrainTimeout(Duration),

    #[error(transparent)]
    SlotTracker(#[from] SlotTrackerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Runs one [`TaskWorker`] per registered task type
///
/// # Example
///
/// ```ignore
/// use tasklane_worker::{handler_fn, EngineConfig, TaskEngine};
///
/// let engine = TaskEngine::new(client, EngineConfig::from_env())?;
///
/// engine
///     .start(
///         "resize_image",
///         handler_fn(|task| async move { resize(task.input_data).await }),
///         4,
///         Duration::from_millis(500),
///     )
///     .await?;
///
/// // ... later
/// engine.shutdown();
/// engine.wait_all().await;
/// ```
pub struct TaskEngine {
    client: Arc<dyn TaskClient>,
    config: EngineConfig,
    workers: DashMap<String, Arc<TaskWorker>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskEngine {
    /// Create an engine with no task types registered
    pub fn new(client: Arc<dyn TaskClient>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            client,
            config,
            workers: DashMap::new(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Register a task type, or add capacity to an existing one
    ///
    /// The first registration of a task type creates its worker and starts
    /// its dispatch loop. Every registration, first or not, adds
    /// `concurrency` slots. Handler, poll interval and domain of a repeated
    /// registration are ignored.
    #[instrument(skip(self, registration), fields(task_type = %registration.task_type))]
    pub async fn register(
        &self,
        registration: TaskRegistration,
    ) -> Result<Arc<TaskWorker>, EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }

        let concurrency = registration.concurrency;
        let worker = match self.workers.entry(registration.task_type.clone()) {
            Entry::Occupied(entry) => {
                warn!(
                    task_type = %registration.task_type,
                    "Task type already registered, keeping the existing handler"
                );
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                info!(
                    task_type = %registration.task_type,
                    concurrency,
                    domain = ?registration.domain,
                    "Starting worker"
                );
                let worker = TaskWorker::spawn(
                    registration,
                    Arc::clone(&self.client),
                    &self.config,
                    self.shutdown_rx.clone(),
                );
                Arc::clone(entry.insert(worker).value())
            }
        };

        worker.add_capacity(concurrency).await?;
        Ok(worker)
    }

    /// Start polling `task_type` with `concurrency` slots
    pub async fn start(
        &self,
        task_type: &str,
        handler: TaskHandler,
        concurrency: u32,
        poll_interval: Duration,
    ) -> Result<(), EngineError> {
        self.register(
            TaskRegistration::new(task_type, handler)
                .with_concurrency(concurrency)
                .with_poll_interval(poll_interval),
        )
        .await
        .map(|_| ())
    }

    /// Start polling `task_type` in `domain` with `concurrency` slots
    pub async fn start_with_domain(
        &self,
        task_type: &str,
        handler: TaskHandler,
        concurrency: u32,
        poll_interval: Duration,
        domain: &str,
    ) -> Result<(), EngineError> {
        self.register(
            TaskRegistration::new(task_type, handler)
                .with_concurrency(concurrency)
                .with_poll_interval(poll_interval)
                .with_domain(domain),
        )
        .await
        .map(|_| ())
    }

    /// Remove `amount` slots from a task type
    ///
    /// Applied as a single adjustment. In-flight executions are not
    /// interrupted; the free count may go negative until they return.
    #[instrument(skip(self))]
    pub async fn remove(&self, task_type: &str, amount: u32) -> Result<(), EngineError> {
        let worker = self.get(task_type)?;
        worker.remove_capacity(amount).await?;
        info!(task_type, amount, "Removed capacity");
        Ok(())
    }

    /// Stop polling a task type until resumed
    pub fn pause(&self, task_type: &str) -> Result<(), EngineError> {
        self.get(task_type)?.pause();
        Ok(())
    }

    pub fn resume(&self, task_type: &str) -> Result<(), EngineError> {
        self.get(task_type)?.resume();
        Ok(())
    }

    pub fn set_poll_interval(
        &self,
        task_type: &str,
        interval: Duration,
    ) -> Result<(), EngineError> {
        self.get(task_type)?.set_poll_interval(interval);
        Ok(())
    }

    pub fn poll_interval(&self, task_type: &str) -> Option<Duration> {
        self.worker(task_type).map(|w| w.poll_interval())
    }

    /// Free slots for a task type
    pub fn available_slots(&self, task_type: &str) -> Option<i64> {
        self.worker(task_type).map(|w| w.available_slots())
    }

    pub fn worker(&self, task_type: &str) -> Option<Arc<TaskWorker>> {
        self.workers.get(task_type).map(|w| Arc::clone(w.value()))
    }

    /// Registered task types, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.workers.iter().map(|w| w.key().clone()).collect();
        types.sort();
        types
    }

    /// Signal every dispatch loop to stop polling
    ///
    /// In-flight executions run to completion; use [`TaskEngine::wait_all`]
    /// to wait for them.
    pub fn shutdown(&self) {
        info!(worker_id = %self.config.worker_id, "Initiating shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Wait until every dispatch loop has stopped and drained its executions
    ///
    /// Loops only stop after [`TaskEngine::shutdown`], so this blocks until
    /// shutdown is signaled.
    pub async fn wait_all(&self) {
        let workers: Vec<Arc<TaskWorker>> =
            self.workers.iter().map(|w| Arc::clone(w.value())).collect();

        for worker in workers {
            worker.drain().await;
        }

        info!(worker_id = %self.config.worker_id, "All workers drained");
    }

    /// [`TaskEngine::wait_all`] bounded by `timeout`
    ///
    /// Executions still running when the timeout hits are left to finish in
    /// the background.
    pub async fn wait_all_timeout(&self, timeout: Duration) -> Result<(), EngineError> {
        tokio::time::timeout(timeout, self.wait_all())
            .await
            .map_err(|_| {
                warn!(worker_id = %self.config.worker_id, ?timeout, "Drain timeout reached");
                EngineError::DrainTimeout(timeout)
            })
    }

    fn get(&self, task_type: &str) -> Result<Arc<TaskWorker>, EngineError> {
        self.worker(task_type)
            .ok_or_else(|| EngineError::UnknownTaskType(task_type.to_string()))
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("worker_id", &self.config.worker_id)
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::InMemoryTaskClient;
    use crate::task::Task;
    use crate::worker::handler_fn;

    fn engine(client: Arc<InMemoryTaskClient>) -> TaskEngine {
        TaskEngine::new(client, EngineConfig::default().with_worker_id("engine-test")).unwrap()
    }

    fn noop() -> TaskHandler {
        handler_fn(|_task: Task| async move { Ok::<_, String>(json!({})) })
    }

    #[test]
    fn test_invalid_config_rejected() {
        let client = Arc::new(InMemoryTaskClient::new());
        let result = TaskEngine::new(client, EngineConfig::default().with_slot_queue_capacity(0));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let client = Arc::new(InMemoryTaskClient::new());
        let config = EngineConfig {
            max_batch_size: Some(0),
            ..EngineConfig::default()
        };
        assert!(matches!(
            TaskEngine::new(client, config),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_all_timeout_with_stuck_handler() {
        let client = Arc::new(InMemoryTaskClient::new());
        client.enqueue(Task::new("t-1", "encode", "wf-1"));
        let engine = engine(client.clone());

        let stuck = handler_fn(|_task: Task| async move {
            futures::future::pending::<()>().await;
            Ok::<_, String>(json!({}))
        });
        engine
            .start("encode", stuck, 1, Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.pending_count("encode"), 0);

        engine.shutdown();
        let result = engine.wait_all_timeout(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(EngineError::DrainTimeout(d)) if d == Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_all_timeout_when_idle() {
        let client = Arc::new(InMemoryTaskClient::new());
        let engine = engine(client);
        engine
            .start("encode", noop(), 1, Duration::from_millis(100))
            .await
            .unwrap();

        engine.shutdown();
        engine.wait_all_timeout(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregistration_adds_capacity_only() {
        let client = Arc::new(InMemoryTaskClient::new());
        let engine = engine(client);

        engine
            .start("encode", noop(), 2, Duration::from_millis(100))
            .await
            .unwrap();
        engine
            .start("encode", noop(), 3, Duration::from_secs(9))
            .await
            .unwrap();

        let worker = engine.worker("encode").unwrap();
        worker.sync_slots().await.unwrap();

        assert_eq!(engine.available_slots("encode"), Some(5));
        assert_eq!(engine.poll_interval("encode"), Some(Duration::from_millis(100)));
        assert_eq!(engine.task_types(), vec!["encode".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_applies_single_adjustment() {
        let client = Arc::new(InMemoryTaskClient::new());
        let engine = engine(client);

        engine
            .start("encode", noop(), 5, Duration::from_millis(100))
            .await
            .unwrap();
        engine.remove("encode", 3).await.unwrap();
        engine.worker("encode").unwrap().sync_slots().await.unwrap();

        assert_eq!(engine.available_slots("encode"), Some(2));
    }

    #[tokio::test]
    async fn test_unknown_task_type() {
        let client = Arc::new(InMemoryTaskClient::new());
        let engine = engine(client);

        assert!(matches!(
            engine.remove("missing", 1).await,
            Err(EngineError::UnknownTaskType(t)) if t == "missing"
        ));
        assert!(engine.pause("missing").is_err());
        assert!(engine.set_poll_interval("missing", Duration::from_secs(1)).is_err());
        assert_eq!(engine.available_slots("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_shutdown_rejected() {
        let client = Arc::new(InMemoryTaskClient::new());
        let engine = engine(client);
        engine.shutdown();

        let result = engine
            .start("encode", noop(), 1, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(EngineError::ShuttingDown)));
        assert!(engine.task_types().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_poll_interval() {
        let client = Arc::new(InMemoryTaskClient::new());
        let engine = engine(client);

        engine
            .start_with_domain("encode", noop(), 1, Duration::from_millis(100), "blue")
            .await
            .unwrap();
        engine
            .set_poll_interval("encode", Duration::from_secs(2))
            .unwrap();

        assert_eq!(engine.poll_interval("encode"), Some(Duration::from_secs(2)));
        assert_eq!(engine.worker("encode").unwrap().domain(), Some("blue"));
    }
}
