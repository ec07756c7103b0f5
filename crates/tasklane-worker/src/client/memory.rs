//! In-memory implementation of TaskClient for testing

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{ClientError, PollOutcome, PollRequest, TaskClient};
use crate::task::{Task, TaskResult};

/// A poll observed by the in-memory client
#[derive(Debug, Clone)]
pub struct PollRecord {
    pub request: PollRequest,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    pending: HashMap<String, VecDeque<Task>>,
    polls: Vec<PollRecord>,
    poll_failures: usize,
    report_failures: usize,
    fail_all_reports: bool,
    report_attempts: usize,
    reported: Vec<TaskResult>,
}

/// In-memory task service
///
/// Tasks are queued per task type and handed out in FIFO order, at most
/// `count` per poll. An empty queue answers [`PollOutcome::NoWork`]. Poll and
/// report failures can be injected, and every call is recorded.
///
/// # Example
///
/// ```
/// use tasklane_worker::client::InMemoryTaskClient;
/// use tasklane_worker::task::Task;
///
/// let client = InMemoryTaskClient::new();
/// client.enqueue(Task::new("t-1", "encode", "wf-1"));
/// assert_eq!(client.pending_count("encode"), 1);
/// ```
#[derive(Default)]
pub struct InMemoryTaskClient {
    state: RwLock<State>,
}

impl InMemoryTaskClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task for its task type
    pub fn enqueue(&self, task: Task) {
        self.state
            .write()
            .pending
            .entry(task.task_type.clone())
            .or_default()
            .push_back(task);
    }

    /// Queue several tasks
    pub fn enqueue_all(&self, tasks: impl IntoIterator<Item = Task>) {
        for task in tasks {
            self.enqueue(task);
        }
    }

    /// Make the next `n` polls fail with a transport error
    pub fn fail_next_polls(&self, n: usize) {
        self.state.write().poll_failures = n;
    }

    /// Make the next `n` report attempts fail with a transport error
    pub fn fail_next_reports(&self, n: usize) {
        self.state.write().report_failures = n;
    }

    /// Make every report attempt fail
    pub fn fail_all_reports(&self, fail: bool) {
        self.state.write().fail_all_reports = fail;
    }

    /// Tasks still waiting to be polled for a task type
    pub fn pending_count(&self, task_type: &str) -> usize {
        self.state
            .read()
            .pending
            .get(task_type)
            .map_or(0, VecDeque::len)
    }

    /// Every poll received so far
    pub fn polls(&self) -> Vec<PollRecord> {
        self.state.read().polls.clone()
    }

    /// Number of report attempts, successful or not
    pub fn report_attempts(&self) -> usize {
        self.state.read().report_attempts
    }

    /// Results that were accepted
    pub fn reported(&self) -> Vec<TaskResult> {
        self.state.read().reported.clone()
    }
}

#[async_trait]
impl TaskClient for InMemoryTaskClient {
    async fn poll(&self, request: PollRequest) -> Result<PollOutcome, ClientError> {
        let mut state = self.state.write();
        state.polls.push(PollRecord {
            request: request.clone(),
            at: Instant::now(),
        });

        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(ClientError::transport("injected poll failure"));
        }

        let Some(queue) = state.pending.get_mut(&request.task_type) else {
            return Ok(PollOutcome::NoWork);
        };

        let take = request.count.min(queue.len());
        if take == 0 {
            return Ok(PollOutcome::NoWork);
        }

        let tasks = queue
            .drain(..take)
            .map(|mut task| {
                task.domain = request.domain.clone();
                task
            })
            .collect();
        Ok(PollOutcome::Tasks(tasks))
    }

    async fn report_result(&self, result: &TaskResult) -> Result<(), ClientError> {
        let mut state = self.state.write();
        state.report_attempts += 1;

        if state.fail_all_reports {
            return Err(ClientError::transport("injected report failure"));
        }
        if state.report_failures > 0 {
            state.report_failures -= 1;
            return Err(ClientError::transport("injected report failure"));
        }

        state.reported.push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn request(task_type: &str, count: usize) -> PollRequest {
        PollRequest {
            task_type: task_type.to_string(),
            count,
            timeout: Duration::from_millis(100),
            domain: None,
            worker_id: "worker-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_poll_respects_count() {
        let client = InMemoryTaskClient::new();
        client.enqueue_all((0..5).map(|i| Task::new(format!("t-{i}"), "encode", "wf")));

        let tasks = client.poll(request("encode", 3)).await.unwrap().into_tasks();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].task_id, "t-0");
        assert_eq!(client.pending_count("encode"), 2);
    }

    #[tokio::test]
    async fn test_empty_queue_reports_no_work() {
        let client = InMemoryTaskClient::new();
        client.enqueue(Task::new("t-1", "other", "wf"));

        let outcome = client.poll(request("encode", 3)).await.unwrap();
        assert_eq!(outcome, PollOutcome::NoWork);
        assert_eq!(client.polls().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let client = InMemoryTaskClient::new();
        client.fail_next_polls(1);
        client.fail_next_reports(1);

        assert!(client.poll(request("encode", 1)).await.is_err());
        assert!(client.poll(request("encode", 1)).await.is_ok());

        let task = Task::new("t-1", "encode", "wf");
        let result = TaskResult::completed(&task, serde_json::json!({}));
        assert!(client.report_result(&result).await.is_err());
        assert!(client.report_result(&result).await.is_ok());
        assert_eq!(client.report_attempts(), 2);
        assert_eq!(client.reported(), vec![result]);
    }
}
