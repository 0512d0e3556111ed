use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::task::Task;

/// Executes the work behind a task.
///
/// The task handed over is a snapshot taken when it was claimed; its
/// `dependency_results` hold every upstream result. `Err` carries the failure
/// message the queue stores verbatim.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    fn name(&self) -> &str {
        "runner"
    }

    async fn run(&self, task: &Task) -> Result<Value, String>;
}

/// Adapts an async closure into a [`TaskRunner`].
pub struct FnRunner<F> {
    f: F,
}

impl<F> FnRunner<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskRunner for FnRunner<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    fn name(&self) -> &str {
        "fn"
    }

    async fn run(&self, task: &Task) -> Result<Value, String> {
        (self.f)(task.clone()).await
    }
}
