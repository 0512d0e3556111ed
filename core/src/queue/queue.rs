use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::task::{Task, TaskStatus, TransitionError};

use super::events::QueueEvent;
use super::graph::DependencyGraph;
use super::policy::CancelPolicy;

/// Owns a workflow's tasks, tracks which are ready to run and delivers
/// completion results to dependents.
///
/// Invariants kept by every mutating operation:
/// - `ready_tasks` holds exactly the ids whose task status is Ready, in the
///   order they became ready;
/// - `completed_tasks`, `failed_tasks` and `cancelled_tasks` are disjoint and
///   mirror the Completed, Failed and Cancelled statuses;
/// - `dependents[d]` lists the tasks declaring `d` as a dependency, in table
///   insertion order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
    dependents: HashMap<String, Vec<String>>,
    ready_tasks: Vec<String>,
    completed_tasks: HashSet<String>,
    failed_tasks: HashSet<String>,
    cancelled_tasks: HashSet<String>,
    cancel_policy: CancelPolicy,
    events: Vec<QueueEvent>,
}

/// Task counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_policy(cancel_policy: CancelPolicy) -> Self {
        Self {
            cancel_policy,
            ..Self::default()
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::with_cancel_policy(config.cancel_policy)
    }

    pub fn cancel_policy(&self) -> CancelPolicy {
        self.cancel_policy
    }

    /// Inserts a task.
    ///
    /// A task whose dependencies are all satisfied (always the case with no
    /// dependencies) becomes Ready right away. Results of dependencies that
    /// already completed are delivered on insertion.
    pub fn add_task(&mut self, mut task: Task) -> Result<(), QueueError> {
        if self.tasks.contains_key(task.id()) {
            return Err(QueueError::DuplicateTaskId(task.id().to_string()));
        }

        let task_id = task.id().to_string();
        for dep in task.dependencies() {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .push(task_id.clone());
        }

        let backfill: Vec<(String, Value)> = task
            .dependencies()
            .iter()
            .filter(|dep| self.completed_tasks.contains(dep.as_str()))
            .filter_map(|dep| {
                let result = self.tasks.get(dep)?.result().cloned();
                Some((dep.clone(), result.unwrap_or(Value::Null)))
            })
            .collect();
        for (dep, result) in backfill {
            if task.add_dependency_result(&dep, result) {
                self.events.push(QueueEvent::DependencyResolved {
                    task_id: task_id.clone(),
                    dependency_id: dep,
                    timestamp: Utc::now(),
                });
            }
        }

        let status = task.status();
        let ready_now = task.is_ready();
        let restored_result = task.result().cloned();

        self.events.push(QueueEvent::TaskAdded {
            task_id: task_id.clone(),
            status,
            timestamp: Utc::now(),
        });
        self.order.push(task_id.clone());
        self.tasks.insert(task_id.clone(), task);

        match status {
            TaskStatus::Pending if ready_now => self.promote(&task_id),
            TaskStatus::Ready => self.push_ready(&task_id),
            TaskStatus::Completed => {
                self.completed_tasks.insert(task_id.clone());
                self.propagate_result(&task_id, &restored_result.unwrap_or(Value::Null));
            }
            TaskStatus::Failed => {
                self.failed_tasks.insert(task_id.clone());
            }
            TaskStatus::Cancelled => {
                self.cancelled_tasks.insert(task_id.clone());
            }
            TaskStatus::Pending | TaskStatus::Running => {}
        }

        tracing::debug!("Added task {} to queue", task_id);
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ready tasks in the order they became ready.
    pub fn get_ready_tasks(&self) -> Vec<&Task> {
        self.ready_tasks
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .collect()
    }

    /// Head of the ready list. Does not dequeue: the task leaves the list
    /// only when its status moves on.
    pub fn get_next_task(&self) -> Option<&Task> {
        self.ready_tasks.first().and_then(|id| self.tasks.get(id))
    }

    pub fn ready_ids(&self) -> &[String] {
        &self.ready_tasks
    }

    pub fn completed_ids(&self) -> &HashSet<String> {
        &self.completed_tasks
    }

    pub fn failed_ids(&self) -> &HashSet<String> {
        &self.failed_tasks
    }

    pub fn cancelled_ids(&self) -> &HashSet<String> {
        &self.cancelled_tasks
    }

    /// Applies a lifecycle transition reported by the driver.
    ///
    /// Unknown ids are logged and ignored. Transitions the task state machine
    /// forbids are rejected without touching the queue. Asking for Ready on a
    /// task that is not Pending is a no-op.
    pub fn update_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let Some(task) = self.tasks.get_mut(task_id) else {
            tracing::warn!("Attempted to update non-existent task: {}", task_id);
            return Ok(());
        };
        let from = task.status();

        match status {
            TaskStatus::Running => {
                task.mark_running()
                    .map_err(|e| QueueError::invalid_transition(task_id, e))?;
                self.remove_ready(task_id);
            }
            TaskStatus::Completed => {
                let result = result.unwrap_or(Value::Null);
                task.mark_completed(result.clone())
                    .map_err(|e| QueueError::invalid_transition(task_id, e))?;
                self.completed_tasks.insert(task_id.to_string());
                self.remove_ready(task_id);
                self.record_change(task_id, from, status);
                self.propagate_result(task_id, &result);
                return Ok(());
            }
            TaskStatus::Failed => {
                task.mark_failed(error.unwrap_or_default())
                    .map_err(|e| QueueError::invalid_transition(task_id, e))?;
                self.failed_tasks.insert(task_id.to_string());
                self.remove_ready(task_id);
            }
            TaskStatus::Ready => {
                if task.mark_ready() {
                    self.push_ready(task_id);
                } else {
                    tracing::debug!(
                        "Task {} is {}, not pending; ready request ignored",
                        task_id,
                        from
                    );
                    if from == TaskStatus::Ready {
                        self.push_ready(task_id);
                    }
                    return Ok(());
                }
            }
            TaskStatus::Cancelled => {
                task.mark_cancelled()
                    .map_err(|e| QueueError::invalid_transition(task_id, e))?;
                self.cancelled_tasks.insert(task_id.to_string());
                self.remove_ready(task_id);
                self.record_change(task_id, from, status);
                if self.cancel_policy == CancelPolicy::CascadePending {
                    self.cascade_cancel(task_id);
                }
                return Ok(());
            }
            TaskStatus::Pending => {
                return Err(QueueError::invalid_transition(
                    task_id,
                    TransitionError::InvalidTransition { from, to: status },
                ));
            }
        }

        self.record_change(task_id, from, status);
        Ok(())
    }

    /// Puts a failed task back in the ready list if its retry budget allows.
    ///
    /// Returns `false`, without changing anything, for unknown ids and for
    /// tasks that are not Failed or have used up their retries.
    pub fn retry_task(&mut self, task_id: &str) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            tracing::warn!("Attempted to retry non-existent task: {}", task_id);
            return false;
        };

        if !task.can_retry() {
            tracing::warn!("Task {} cannot be retried", task_id);
            return false;
        }
        if let Err(e) = task.retry() {
            tracing::warn!("Task {} cannot be retried: {}", task_id, e);
            return false;
        }

        let attempt = task.retry_count();
        let max_retries = task.max_retries();
        self.failed_tasks.remove(task_id);
        self.push_ready(task_id);
        self.record_change(task_id, TaskStatus::Failed, TaskStatus::Ready);
        self.events.push(QueueEvent::TaskRetried {
            task_id: task_id.to_string(),
            attempt,
            max_retries,
            timestamp: Utc::now(),
        });
        true
    }

    /// Every task counted as completed or failed.
    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty()
            && self.completed_tasks.len() + self.failed_tasks.len() == self.tasks.len()
    }

    pub fn all_completed_successfully(&self) -> bool {
        !self.tasks.is_empty() && self.completed_tasks.len() == self.tasks.len()
    }

    /// Like [`is_complete`](Self::is_complete) but cancelled tasks count as
    /// settled too.
    pub fn is_settled(&self) -> bool {
        !self.tasks.is_empty()
            && self.completed_tasks.len() + self.failed_tasks.len() + self.cancelled_tasks.len()
                == self.tasks.len()
    }

    /// Share of tasks that completed or failed, from 0 to 100.
    pub fn get_completion_percentage(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let finished = self.completed_tasks.len() + self.failed_tasks.len();
        finished as f64 / self.tasks.len() as f64 * 100.0
    }

    /// Tasks with the given status, in insertion order.
    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks().filter(|task| task.status() == status).collect()
    }

    /// Pending tasks that can no longer become ready on their own because a
    /// dependency failed or was cancelled.
    pub fn blocked_tasks(&self) -> Vec<&Task> {
        self.tasks()
            .filter(|task| task.status() == TaskStatus::Pending)
            .filter(|task| {
                task.dependencies().iter().any(|dep| {
                    self.failed_tasks.contains(dep) || self.cancelled_tasks.contains(dep)
                })
            })
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.tasks.len(),
            ..QueueStats::default()
        };
        for task in self.tasks.values() {
            match task.status() {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Ready => stats.ready += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Checks the task table for unknown dependencies and cycles and returns
    /// the topological stages.
    pub fn validate(&self) -> Result<Vec<Vec<String>>, QueueError> {
        DependencyGraph::new(self.tasks()).stages()
    }

    /// Drains the buffered change events.
    pub fn take_events(&mut self) -> Vec<QueueEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drops every task so the queue can serve another workflow run.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.order.clear();
        self.dependents.clear();
        self.ready_tasks.clear();
        self.completed_tasks.clear();
        self.failed_tasks.clear();
        self.cancelled_tasks.clear();
        self.events.clear();
        self.events.push(QueueEvent::QueueReset {
            timestamp: Utc::now(),
        });
        tracing::debug!("Task queue reset");
    }

    /// Delivers a completed task's result to each dependent and promotes the
    /// ones whose last missing result just arrived.
    fn propagate_result(&mut self, task_id: &str, result: &Value) {
        let Some(dependents) = self.dependents.get(task_id).cloned() else {
            return;
        };

        for dependent_id in dependents {
            let Some(dependent) = self.tasks.get_mut(&dependent_id) else {
                continue;
            };
            if dependent.add_dependency_result(task_id, result.clone()) {
                self.events.push(QueueEvent::DependencyResolved {
                    task_id: dependent_id.clone(),
                    dependency_id: task_id.to_string(),
                    timestamp: Utc::now(),
                });
            }
            if dependent.is_ready() {
                self.promote(&dependent_id);
            }
        }
    }

    fn cascade_cancel(&mut self, root: &str) {
        let mut queue: VecDeque<String> = VecDeque::from([root.to_string()]);

        while let Some(current) = queue.pop_front() {
            let Some(dependents) = self.dependents.get(&current).cloned() else {
                continue;
            };
            for dependent_id in dependents {
                let Some(dependent) = self.tasks.get_mut(&dependent_id) else {
                    continue;
                };
                if dependent.status() != TaskStatus::Pending {
                    continue;
                }
                if dependent.mark_cancelled().is_ok() {
                    tracing::warn!(
                        "Task {} cancelled because upstream task {} was cancelled",
                        dependent_id,
                        current
                    );
                    self.cancelled_tasks.insert(dependent_id.clone());
                    self.record_change(&dependent_id, TaskStatus::Pending, TaskStatus::Cancelled);
                    queue.push_back(dependent_id);
                }
            }
        }
    }

    fn promote(&mut self, task_id: &str) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            if task.mark_ready() {
                self.push_ready(task_id);
                self.record_change(task_id, TaskStatus::Pending, TaskStatus::Ready);
            }
        }
    }

    fn push_ready(&mut self, task_id: &str) {
        if !self.ready_tasks.iter().any(|id| id == task_id) {
            self.ready_tasks.push(task_id.to_string());
        }
    }

    fn remove_ready(&mut self, task_id: &str) {
        self.ready_tasks.retain(|id| id != task_id);
    }

    fn record_change(&mut self, task_id: &str, from: TaskStatus, to: TaskStatus) {
        self.events.push(QueueEvent::StatusChanged {
            task_id: task_id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }
}
