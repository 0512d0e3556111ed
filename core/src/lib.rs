//! Dependency-aware task orchestration.
//!
//! [`Task`] carries the per-task state machine, [`TaskQueue`] tracks
//! readiness and propagates results to dependents, [`QueueHandle`] shares a
//! queue across async workers and [`WorkflowDriver`] runs it to completion.

pub mod config;
pub mod error;
pub mod executor;
pub mod queue;
pub mod state;
pub mod task;

pub use config::AppConfig;
pub use error::{ExecutorError, QueueError};
pub use executor::{TaskRunner, WorkflowDriver, WorkflowSummary};
pub use queue::{CancelPolicy, QueueEvent, QueueStats, TaskQueue};
pub use state::QueueHandle;
pub use task::{Task, TaskRecord, TaskStatus, TransitionError};
