//! Workflow execution on top of the shared queue.
//!
//! The queue only tracks state; this module supplies the loop that claims
//! ready tasks, runs them through a [`TaskRunner`] and reports the outcome
//! back.
//!
//! # Architecture
//!
//! ```text
//! QueueHandle::validate() → stages (rejects cycles / unknown deps)
//!   ↓
//! claim_ready(capacity) → Running
//!   ↓
//! tokio::spawn(TaskRunner::run) ──▶ FuturesUnordered
//!   ↓
//! Completed ──▶ propagate to dependents
//! Failed    ──▶ RetryStrategy delay → retry_task → Ready
//!   ↓
//! nothing running, nothing ready → WorkflowSummary
//! ```

mod driver;
mod progress;
mod retry;
mod runner;
mod summary;

pub use driver::WorkflowDriver;
pub use progress::ProgressMonitor;
pub use retry::{retry_strategy_from_config, ExponentialBackoff, LinearRetry, NoRetry, RetryStrategy};
pub use runner::{FnRunner, TaskRunner};
pub use summary::WorkflowSummary;
