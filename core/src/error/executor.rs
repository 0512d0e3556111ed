use thiserror::Error;

use super::queue::QueueError;

/// Errors raised while driving a workflow through the queue.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Runner error: {0}")]
    Runner(String),
}
