// Logging setup for processes embedding the engine
//
// The engine itself only emits `tracing` events; installing a subscriber is
// left to the embedding application, which can use `init_tracing` or its own.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "tasklane_worker=info";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log filter (e.g., "info", "tasklane_worker=debug")
    pub log_filter: Option<String>,
    /// Whether to include the event target in console output
    pub with_target: bool,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tasklane-worker".to_string(),
            log_filter: None,
            with_target: true,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// - `SERVICE_NAME`: service name (default: "tasklane-worker")
    /// - `RUST_LOG` or `LOG_LEVEL`: log filter
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "tasklane-worker".to_string()),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            with_target: true,
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    /// Resolve the configured filter, falling back to [`DEFAULT_LOG_FILTER`]
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install a global `tracing` subscriber
///
/// Returns `false` if a global subscriber was already installed.
///
/// # Example
///
/// ```no_run
/// use tasklane_worker::telemetry::{init_tracing, TelemetryConfig};
///
/// init_tracing(TelemetryConfig::from_env());
/// ```
pub fn init_tracing(config: TelemetryConfig) -> bool {
    let filter = config.env_filter();

    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    if installed {
        tracing::debug!(service = %config.service_name, "Tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_falls_back_to_default() {
        let config = TelemetryConfig {
            log_filter: Some("tasklane_worker=notalevel".to_string()),
            ..Default::default()
        };
        assert_eq!(config.env_filter().to_string(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_explicit_filter_is_used() {
        let config = TelemetryConfig {
            log_filter: Some("debug".to_string()),
            ..Default::default()
        };
        assert_eq!(config.env_filter().to_string(), "debug");
    }
}
