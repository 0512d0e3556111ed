use thiserror::Error;

use taskq_core::error::{ExecutorError, QueueError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("plan error: {0}")]
    Plan(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("workflow failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl From<QueueError> for CliError {
    fn from(e: QueueError) -> Self {
        if is_plan_error(&e) {
            CliError::Plan(e.to_string())
        } else {
            CliError::Executor(ExecutorError::Queue(e))
        }
    }
}

/// Errors caused by the plan's contents rather than by a run.
fn is_plan_error(e: &QueueError) -> bool {
    matches!(
        e,
        QueueError::DuplicateTaskId(_)
            | QueueError::DependencyNotFound { .. }
            | QueueError::CircularDependency(_)
    )
}

impl CliError {
    // 0: success
    // 1: a task failed or stalled (returned as a normal exit code)
    // 11: config or plan error
    // 50: internal/uncategorized
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Plan(_) => 11,
            CliError::Executor(ExecutorError::Queue(e)) if is_plan_error(e) => 11,
            CliError::Executor(ExecutorError::Queue(_)) => 50,
            CliError::Executor(ExecutorError::Runner(_)) => 50,
            CliError::Io(_) => 50,
            CliError::Anyhow(_) => 50,
        }
    }
}
