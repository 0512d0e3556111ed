use thiserror::Error;

use crate::task::TransitionError;

/// Errors raised by the task queue for caller bugs and invalid graphs.
///
/// Expected runtime conditions (unknown ids on update, exhausted retries,
/// results for undeclared dependencies) are not errors; they are logged and
/// reported through return values instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Duplicate task ID: {0}")]
    DuplicateTaskId(String),

    #[error("Dependency not found: task '{task_id}' depends on '{missing_dep}'")]
    DependencyNotFound {
        task_id: String,
        missing_dep: String,
    },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Task '{task_id}': {source}")]
    InvalidTransition {
        task_id: String,
        #[source]
        source: TransitionError,
    },
}

impl QueueError {
    pub fn invalid_transition(task_id: &str, source: TransitionError) -> Self {
        Self::InvalidTransition {
            task_id: task_id.to_string(),
            source,
        }
    }
}
