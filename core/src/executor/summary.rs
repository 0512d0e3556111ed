use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::queue::TaskQueue;
use crate::task::TaskStatus;

/// Outcome of a workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    /// Total number of tasks in the queue
    pub total: usize,

    pub completed: usize,

    /// Tasks that exhausted their retries
    pub failed: usize,

    pub cancelled: usize,

    /// Tasks left Pending because an upstream task never completed
    pub stalled: Vec<String>,

    /// Number of times a failed task was put back in the ready list
    pub retries: u32,

    pub duration_ms: u64,

    /// Share of tasks that completed or failed, from 0 to 100
    pub completion_percentage: f64,

    /// Topological stages, for display
    pub stages: Vec<Vec<String>>,

    /// Result of every completed task
    pub results: BTreeMap<String, Value>,

    /// Final error message of every failed task
    pub errors: BTreeMap<String, String>,

    /// Wall time of the last attempt, for tasks that started and finished
    pub durations_ms: BTreeMap<String, i64>,
}

impl WorkflowSummary {
    pub(crate) fn collect(
        queue: &TaskQueue,
        stages: Vec<Vec<String>>,
        retries: u32,
        duration_ms: u64,
    ) -> Self {
        let stats = queue.stats();
        let mut results = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut stalled = Vec::new();
        let mut durations_ms = BTreeMap::new();

        for task in queue.tasks() {
            if !task.status().is_finished() {
                tracing::debug!(
                    "Task {} is {} and still waiting on {:?}",
                    task.id(),
                    task.status(),
                    task.missing_dependencies()
                );
                stalled.push(task.id().to_string());
                continue;
            }
            if let Some(duration) = task.get_duration() {
                durations_ms.insert(task.id().to_string(), duration.num_milliseconds());
            }
            match task.status() {
                TaskStatus::Completed => {
                    results.insert(
                        task.id().to_string(),
                        task.result().cloned().unwrap_or(Value::Null),
                    );
                }
                TaskStatus::Failed => {
                    errors.insert(
                        task.id().to_string(),
                        task.error().unwrap_or_default().to_string(),
                    );
                }
                _ => {}
            }
        }

        Self {
            total: stats.total,
            completed: stats.completed,
            failed: stats.failed,
            cancelled: stats.cancelled,
            stalled,
            retries,
            duration_ms,
            completion_percentage: queue.get_completion_percentage(),
            stages,
            results,
            errors,
            durations_ms,
        }
    }

    /// Every task completed.
    pub fn is_success(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}
