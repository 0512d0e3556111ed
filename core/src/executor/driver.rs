use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, QueueError};
use crate::state::QueueHandle;
use crate::task::{TaskStatus, TransitionError};

use super::progress::ProgressMonitor;
use super::retry::{retry_strategy_from_config, NoRetry, RetryStrategy};
use super::runner::TaskRunner;
use super::summary::WorkflowSummary;

type StepFuture = Pin<Box<dyn Future<Output = Step> + Send>>;

enum Step {
    Finished {
        task_id: String,
        outcome: Result<Value, String>,
        elapsed: Duration,
    },
    RetryDue {
        task_id: String,
    },
    Aborted {
        task_id: String,
        reason: String,
    },
}

/// Drives a [`QueueHandle`] to a settled state.
///
/// Ready tasks are claimed head first and handed to the runner on their own
/// tokio task, at most `max_parallel` at a time. Failures go back to the
/// queue through `retry_task` once the retry strategy's delay has passed.
/// The run ends when nothing is running, nothing is waiting on a retry delay
/// and no task is ready.
pub struct WorkflowDriver {
    runner: Arc<dyn TaskRunner>,
    retry_strategy: Arc<dyn RetryStrategy>,
    max_parallel: usize,
    cancel_blocked: bool,
    progress_bar: bool,
}

impl WorkflowDriver {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            runner,
            retry_strategy: Arc::new(NoRetry),
            max_parallel: 1,
            cancel_blocked: false,
            progress_bar: false,
        }
    }

    pub fn from_config(runner: Arc<dyn TaskRunner>, config: &ExecutorConfig) -> Self {
        Self {
            runner,
            retry_strategy: retry_strategy_from_config(&config.retry),
            max_parallel: config.max_parallel.max(1),
            cancel_blocked: config.cancel_blocked,
            progress_bar: config.progress_bar,
        }
    }

    pub fn with_retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Cancel Pending tasks whose dependencies failed instead of reporting
    /// them as stalled.
    pub fn with_cancel_blocked(mut self, cancel_blocked: bool) -> Self {
        self.cancel_blocked = cancel_blocked;
        self
    }

    pub fn with_progress_bar(mut self, progress_bar: bool) -> Self {
        self.progress_bar = progress_bar;
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub async fn run(&self, handle: &QueueHandle) -> Result<WorkflowSummary, ExecutorError> {
        let stages = handle.validate().await?;
        let start = Instant::now();
        let (total, cancel_policy) = handle
            .read(|queue| (queue.len(), queue.cancel_policy()))
            .await;

        tracing::info!(
            "Starting workflow: {} tasks in {} stages (runner={}, retry={}, max_parallel={}, cancel_policy={})",
            total,
            stages.len(),
            self.runner.name(),
            self.retry_strategy.name(),
            self.max_parallel,
            cancel_policy
        );

        let mut progress = ProgressMonitor::new(total, self.progress_bar);
        let mut pending: FuturesUnordered<StepFuture> = FuturesUnordered::new();
        let mut running = 0usize;
        let mut retries = 0u32;

        loop {
            let capacity = self.max_parallel.saturating_sub(running);
            if capacity > 0 {
                for task in handle.claim_ready(capacity).await {
                    let task_id = task.id().to_string();
                    tracing::debug!("Task {} started (attempt {})", task_id, task.retry_count() + 1);
                    progress.start_task(&task_id, task.retry_count());

                    let runner = Arc::clone(&self.runner);
                    running += 1;
                    pending.push(Box::pin(async move {
                        let started = Instant::now();
                        let joined = tokio::spawn(async move { runner.run(&task).await }).await;
                        let outcome = match joined {
                            Ok(outcome) => outcome,
                            Err(e) if e.is_panic() => Err(format!("runner panicked: {}", e)),
                            Err(e) => {
                                return Step::Aborted {
                                    task_id,
                                    reason: e.to_string(),
                                }
                            }
                        };
                        Step::Finished {
                            task_id,
                            outcome,
                            elapsed: started.elapsed(),
                        }
                    }));
                }
            }

            let Some(step) = pending.next().await else {
                if self.cancel_blocked {
                    let cancelled = self.cancel_blocked_tasks(handle).await?;
                    if cancelled > 0 {
                        progress.skip_tasks(cancelled);
                        continue;
                    }
                }
                break;
            };

            match step {
                Step::Finished {
                    task_id,
                    outcome,
                    elapsed,
                } => {
                    running -= 1;
                    let duration_ms = elapsed.as_millis() as u64;
                    match outcome {
                        Ok(value) => {
                            let reported = self
                                .report(handle, &task_id, TaskStatus::Completed, Some(value), None)
                                .await?;
                            if reported {
                                tracing::info!("Task {} completed in {}ms", task_id, duration_ms);
                            }
                            progress.finish_task(&task_id, reported, duration_ms, true);
                        }
                        Err(message) => {
                            let reported = self
                                .report(
                                    handle,
                                    &task_id,
                                    TaskStatus::Failed,
                                    None,
                                    Some(message.clone()),
                                )
                                .await?;
                            if !reported {
                                progress.finish_task(&task_id, false, duration_ms, true);
                                continue;
                            }

                            let delay = handle
                                .get_task(&task_id)
                                .await
                                .and_then(|task| self.retry_strategy.retry_after(&task));
                            match delay {
                                Some(delay) => {
                                    tracing::warn!(
                                        "Task {} failed: {} (retrying in {}ms)",
                                        task_id,
                                        message,
                                        delay.as_millis()
                                    );
                                    progress.finish_task(&task_id, false, duration_ms, false);
                                    pending.push(Box::pin(async move {
                                        tokio::time::sleep(delay).await;
                                        Step::RetryDue { task_id }
                                    }));
                                }
                                None => {
                                    tracing::error!("Task {} failed: {}", task_id, message);
                                    progress.finish_task(&task_id, false, duration_ms, true);
                                }
                            }
                        }
                    }
                }
                Step::Aborted { task_id, reason } => {
                    tracing::error!("Runner for task {} was aborted: {}", task_id, reason);
                    return Err(ExecutorError::Runner(format!("task {}: {}", task_id, reason)));
                }
                Step::RetryDue { task_id } => {
                    if handle.retry_task(&task_id).await {
                        retries += 1;
                    } else {
                        progress.skip_tasks(1);
                    }
                }
            }

            let stats = handle.stats().await;
            progress.set_message(&format!(
                "{} running, {} ready, {} waiting",
                stats.running, stats.ready, stats.pending
            ));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let summary = handle
            .read(|queue| WorkflowSummary::collect(queue, stages, retries, duration_ms))
            .await;

        if !summary.stalled.is_empty() {
            tracing::warn!(
                "Workflow stalled: {} task(s) can never run: {:?}",
                summary.stalled.len(),
                summary.stalled
            );
        }
        tracing::info!(
            "Workflow finished: {}/{} completed, {} failed, {} cancelled, {} retries in {}ms",
            summary.completed,
            summary.total,
            summary.failed,
            summary.cancelled,
            summary.retries,
            summary.duration_ms
        );
        progress.finish(summary.is_success());

        Ok(summary)
    }

    /// Applies a status change to the queue. Returns `false` when the task was
    /// already settled from outside (e.g. cancelled while its runner was busy);
    /// the change is dropped and the run carries on.
    async fn report(
        &self,
        handle: &QueueHandle,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<bool, ExecutorError> {
        match handle.update_task_status(task_id, status, result, error).await {
            Ok(()) => Ok(true),
            Err(QueueError::InvalidTransition {
                source: TransitionError::FromTerminalState { state },
                ..
            }) => {
                tracing::warn!(
                    "Task {} is already {}; {} update dropped",
                    task_id,
                    state,
                    status
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_blocked_tasks(&self, handle: &QueueHandle) -> Result<usize, ExecutorError> {
        let blocked = handle.blocked_tasks().await;
        let mut cancelled = 0;
        for task in blocked {
            // A cascade from an earlier cancel may already have reached it.
            if handle
                .get_task(task.id())
                .await
                .is_some_and(|t| t.status() == TaskStatus::Pending)
            {
                if self
                    .report(handle, task.id(), TaskStatus::Cancelled, None, None)
                    .await?
                {
                    tracing::warn!("Task {} cancelled: an upstream task did not complete", task.id());
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::retry::LinearRetry;
    use crate::executor::runner::FnRunner;
    use crate::queue::{CancelPolicy, TaskQueue};
    use crate::task::Task;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn echo_runner() -> Arc<dyn TaskRunner> {
        Arc::new(FnRunner::new(|task: Task| async move {
            let mut deps: Vec<&String> = task.dependency_results().keys().collect();
            deps.sort();
            Ok::<Value, String>(json!({ "id": task.id(), "deps": deps }))
        }))
    }

    fn fast_retry() -> Arc<dyn RetryStrategy> {
        Arc::new(LinearRetry::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
        ))
    }

    #[tokio::test]
    async fn test_runs_dependency_chain() {
        let handle = QueueHandle::default();
        handle
            .add_tasks([
                Task::with_id("a", "first"),
                Task::with_id("b", "second").with_dependencies(["a"]),
                Task::with_id("c", "third").with_dependencies(["a", "b"]),
            ])
            .await
            .unwrap();

        let summary = WorkflowDriver::new(echo_runner())
            .with_max_parallel(2)
            .run(&handle)
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.durations_ms.len(), 3);
        assert_eq!(summary.completion_percentage, 100.0);
        assert_eq!(summary.stages, vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(summary.results["c"], json!({ "id": "c", "deps": ["a", "b"] }));
        assert!(handle.all_completed_successfully().await);
    }

    #[tokio::test]
    async fn test_flaky_task_is_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let runner = Arc::new(FnRunner::new(move |_task: Task| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(json!("done"))
                }
            }
        }));

        let handle = QueueHandle::default();
        handle
            .add_task(Task::with_id("flaky", "eventually works").with_max_retries(3))
            .await
            .unwrap();

        let summary = WorkflowDriver::new(runner)
            .with_retry_strategy(fast_retry())
            .run(&handle)
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.retries, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let task = handle.get_task("flaky").await.unwrap();
        assert_eq!(task.retry_count(), 2);
        assert_eq!(task.error(), None);
    }

    #[tokio::test]
    async fn test_retry_budget_is_respected() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let runner = Arc::new(FnRunner::new(move |_task: Task| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>("always broken".to_string())
            }
        }));

        let handle = QueueHandle::default();
        handle
            .add_tasks([
                Task::with_id("broken", "never works").with_max_retries(2),
                Task::with_id("after", "downstream").with_dependencies(["broken"]),
            ])
            .await
            .unwrap();

        let summary = WorkflowDriver::new(runner)
            .with_retry_strategy(fast_retry())
            .run(&handle)
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.errors["broken"], "always broken");
        assert_eq!(summary.stalled, vec!["after".to_string()]);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_cancel_blocked_settles_downstream() {
        let runner = Arc::new(FnRunner::new(|task: Task| async move {
            if task.id() == "root" {
                Err("boom".to_string())
            } else {
                Ok(Value::Null)
            }
        }));

        let handle = QueueHandle::new(TaskQueue::with_cancel_policy(CancelPolicy::Isolate));
        handle
            .add_tasks([
                Task::with_id("root", "fails").with_max_retries(0),
                Task::with_id("mid", "blocked").with_dependencies(["root"]),
                Task::with_id("leaf", "blocked later").with_dependencies(["mid"]),
                Task::with_id("side", "independent"),
            ])
            .await
            .unwrap();

        let summary = WorkflowDriver::new(runner)
            .with_cancel_blocked(true)
            .run(&handle)
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 2);
        assert!(summary.stalled.is_empty());
        assert!(handle.is_settled().await);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let runner = Arc::new(FnRunner::new(move |_task: Task| {
            let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<Value, String>(Value::Null)
            }
        }));

        let handle = QueueHandle::default();
        handle
            .add_tasks((0..10).map(|i| Task::with_id(format!("t{i}"), "parallel")))
            .await
            .unwrap();

        let summary = WorkflowDriver::new(runner)
            .with_max_parallel(3)
            .run(&handle)
            .await
            .unwrap();

        assert_eq!(summary.completed, 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panicking_runner_fails_task() {
        let runner = Arc::new(FnRunner::new(|task: Task| async move {
            if task.id() == "bad" {
                panic!("runner blew up");
            }
            Ok::<Value, String>(Value::Null)
        }));

        let handle = QueueHandle::default();
        handle
            .add_tasks([
                Task::with_id("bad", "panics").with_max_retries(0),
                Task::with_id("good", "fine"),
            ])
            .await
            .unwrap();

        let summary = WorkflowDriver::new(runner).run(&handle).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.errors["bad"].contains("panicked"));
    }

    #[tokio::test]
    async fn test_fatal_error_skips_remaining_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let runner = Arc::new(FnRunner::new(move |_task: Task| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>("deploy: permission denied".to_string())
            }
        }));

        let handle = QueueHandle::default();
        handle
            .add_task(Task::with_id("deploy", "needs rights").with_max_retries(3))
            .await
            .unwrap();

        let strategy = LinearRetry::new(Duration::from_millis(1), Duration::from_millis(5))
            .with_fatal_errors(["permission denied"]);
        let summary = WorkflowDriver::new(runner)
            .with_retry_strategy(Arc::new(strategy))
            .run(&handle)
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(summary.retries, 0);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_task_cancelled_while_running_does_not_abort_run() {
        let runner = Arc::new(FnRunner::new(|task: Task| async move {
            let millis = if task.id() == "slow" { 50 } else { 20 };
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<Value, String>(json!(task.id()))
        }));

        let handle = QueueHandle::default();
        handle
            .add_tasks([
                Task::with_id("slow", "gets cancelled"),
                Task::with_id("other", "keeps running"),
                Task::with_id("after", "needs slow").with_dependencies(["slow"]),
            ])
            .await
            .unwrap();

        let canceller = handle.clone();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller
                .update_task_status("slow", TaskStatus::Cancelled, None, None)
                .await
        });

        let summary = WorkflowDriver::new(runner)
            .with_max_parallel(2)
            .run(&handle)
            .await
            .unwrap();
        cancel.await.unwrap().unwrap();

        assert_eq!(
            handle.get_task("slow").await.unwrap().status(),
            TaskStatus::Cancelled
        );
        assert_eq!(
            handle.get_task("other").await.unwrap().status(),
            TaskStatus::Completed
        );
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.stalled, vec!["after".to_string()]);
        assert!(!summary.results.contains_key("slow"));
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_before_running() {
        let handle = QueueHandle::default();
        handle
            .add_tasks([
                Task::with_id("a", "one").with_dependencies(["b"]),
                Task::with_id("b", "two").with_dependencies(["a"]),
            ])
            .await
            .unwrap();

        let err = WorkflowDriver::new(echo_runner())
            .run(&handle)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Queue(crate::error::QueueError::CircularDependency(_))
        ));
    }
}
