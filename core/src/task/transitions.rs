//! Task state machine rules

use super::status::TaskStatus;
use thiserror::Error;

/// Illegal task status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("Cannot transition from terminal state {state}")]
    FromTerminalState { state: TaskStatus },
    #[error("Retry budget exhausted ({retry_count}/{max_retries})")]
    RetryExhausted { retry_count: u32, max_retries: u32 },
}

/// Legal-transition table for [`TaskStatus`].
pub struct TaskTransition;

impl TaskTransition {
    /// Checks whether `from -> to` is a permitted status change.
    ///
    /// Retry bookkeeping (`Failed -> Ready`) is checked against the budget by
    /// the task itself; this table only says the edge exists.
    pub fn validate(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if from.is_terminal() {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = match (from, to) {
            (TaskStatus::Pending, TaskStatus::Ready) => true,
            (TaskStatus::Ready, TaskStatus::Running) => true,
            (TaskStatus::Running, TaskStatus::Completed) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Failed, TaskStatus::Ready) => true,

            (TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Running, TaskStatus::Cancelled) => {
                true
            }

            _ => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }
}
