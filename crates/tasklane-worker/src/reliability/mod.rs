//! Reliability patterns for result reporting
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`report_with_retry`] - Result submission wrapped in a retry policy

mod report;
mod retry;

pub use report::{report_with_retry, ReportError};
pub use retry::RetryPolicy;
