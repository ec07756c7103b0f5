//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reliability::RetryPolicy;

/// Configuration shared by every task type the engine runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Worker ID sent with polls and stamped on results (generated if not provided)
    pub worker_id: String,

    /// Long-poll timeout passed to the task service
    #[serde(with = "duration_millis")]
    pub poll_timeout: Duration,

    /// Poll interval used when a task type is started without one
    #[serde(with = "duration_millis")]
    pub default_poll_interval: Duration,

    /// Upper bound on tasks requested per poll, below the free slot count
    #[serde(default)]
    pub max_batch_size: Option<usize>,

    /// Capacity of each slot tracker's adjustment queue
    pub slot_queue_capacity: usize,

    /// How long a slot tracker waits for an adjustment before an idle tick
    #[serde(with = "duration_millis")]
    pub slot_idle_timeout: Duration,

    /// Retry policy for reporting results
    #[serde(default)]
    pub report_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            poll_timeout: Duration::from_millis(100),
            default_poll_interval: Duration::from_millis(100),
            max_batch_size: None,
            slot_queue_capacity: 1024,
            slot_idle_timeout: Duration::from_secs(30),
            report_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// - `TASKLANE_WORKER_ID`: worker ID (default: `worker-<uuid>`)
    /// - `TASKLANE_POLL_TIMEOUT_MS`: poll timeout in milliseconds (default: 100)
    /// - `TASKLANE_POLL_INTERVAL_MS`: default poll interval in milliseconds (default: 100)
    /// - `TASKLANE_MAX_BATCH_SIZE`: cap on tasks per poll (default: unbounded)
    ///
    /// Unparseable values fall back to the defaults, as does a batch size of 0.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_id = std::env::var("TASKLANE_WORKER_ID").unwrap_or(defaults.worker_id);

        let poll_timeout = env_millis("TASKLANE_POLL_TIMEOUT_MS").unwrap_or(defaults.poll_timeout);

        let default_poll_interval =
            env_millis("TASKLANE_POLL_INTERVAL_MS").unwrap_or(defaults.default_poll_interval);

        let max_batch_size = std::env::var("TASKLANE_MAX_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&size: &usize| size > 0);

        Self {
            worker_id,
            poll_timeout,
            default_poll_interval,
            max_batch_size,
            ..defaults
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_default_poll_interval(mut self, interval: Duration) -> Self {
        self.default_poll_interval = interval;
        self
    }

    /// Cap the number of tasks requested per poll
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size.max(1));
        self
    }

    pub fn with_slot_queue_capacity(mut self, capacity: usize) -> Self {
        self.slot_queue_capacity = capacity;
        self
    }

    pub fn with_slot_idle_timeout(mut self, timeout: Duration) -> Self {
        self.slot_idle_timeout = timeout;
        self
    }

    pub fn with_report_retry(mut self, policy: RetryPolicy) -> Self {
        self.report_retry = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_id.is_empty() {
            return Err(ConfigError::Invalid("worker_id must not be empty".into()));
        }
        if self.slot_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "slot_queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_batch_size == Some(0) {
            return Err(ConfigError::Invalid(
                "max_batch_size must be at least 1".into(),
            ));
        }
        if self.slot_idle_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "slot_idle_timeout must be greater than zero".into(),
            ));
        }
        if self.report_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "report_retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Invalid(String),
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
