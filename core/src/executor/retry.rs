use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::task::Task;

/// Decides how long a failed task waits before it goes back to the ready
/// list.
///
/// The retry budget is the task's own `max_retries`; a strategy only shapes
/// the delay and may veto retries for errors it knows are permanent. The
/// queue's `retry_task` still has the final word.
pub trait RetryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Delay before the `retry`-th retry (1-based).
    fn backoff(&self, retry: u32) -> Duration;

    /// Matches against the error message the queue stored for the task.
    fn is_fatal_error(&self, _error: &str) -> bool {
        false
    }

    /// `None` when the task is not Failed, has spent its budget or failed
    /// with a fatal error.
    fn retry_after(&self, task: &Task) -> Option<Duration> {
        if !task.can_retry() {
            return None;
        }
        if self.is_fatal_error(task.error().unwrap_or_default()) {
            tracing::debug!(
                "Task {} failed with a fatal error; not retrying",
                task.id()
            );
            return None;
        }
        Some(self.backoff(task.retry_count() + 1))
    }
}

/// Base delay doubling on every retry, capped.
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    fatal_errors: Vec<String>,
}

/// Base delay times the retry number, capped.
pub struct LinearRetry {
    base: Duration,
    cap: Duration,
    fatal_errors: Vec<String>,
}

/// Leaves every failed task Failed.
pub struct NoRetry;

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            fatal_errors: Vec::new(),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_fatal_errors(config.fatal_errors.iter().cloned())
    }

    pub fn with_fatal_errors<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fatal_errors = patterns.into_iter().map(Into::into).collect();
        self
    }
}

impl LinearRetry {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            fatal_errors: Vec::new(),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_fatal_errors(config.fatal_errors.iter().cloned())
    }

    pub fn with_fatal_errors<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fatal_errors = patterns.into_iter().map(Into::into).collect();
        self
    }
}

fn matches_any(patterns: &[String], error: &str) -> bool {
    let error = error.to_ascii_lowercase();
    patterns
        .iter()
        .any(|p| !p.is_empty() && error.contains(&p.to_ascii_lowercase()))
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base.saturating_mul(factor).min(self.cap)
    }

    fn is_fatal_error(&self, error: &str) -> bool {
        matches_any(&self.fatal_errors, error)
    }
}

impl RetryStrategy for LinearRetry {
    fn name(&self) -> &str {
        "linear"
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.base.saturating_mul(retry.max(1)).min(self.cap)
    }

    fn is_fatal_error(&self, error: &str) -> bool {
        matches_any(&self.fatal_errors, error)
    }
}

impl RetryStrategy for NoRetry {
    fn name(&self) -> &str {
        "none"
    }

    fn backoff(&self, _retry: u32) -> Duration {
        Duration::ZERO
    }

    fn retry_after(&self, _task: &Task) -> Option<Duration> {
        None
    }
}

pub fn retry_strategy_from_config(config: &RetryConfig) -> Arc<dyn RetryStrategy> {
    match config.strategy.trim().to_ascii_lowercase().as_str() {
        "linear" => Arc::new(LinearRetry::from_config(config)),
        "none" | "off" => Arc::new(NoRetry),
        "exponential-backoff" | "exponential" => Arc::new(ExponentialBackoff::from_config(config)),
        other => {
            tracing::warn!(
                "Unknown retry strategy '{}', falling back to exponential-backoff",
                other
            );
            Arc::new(ExponentialBackoff::from_config(config))
        }
    }
}
