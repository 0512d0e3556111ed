use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::status::TaskStatus;
use super::transitions::{TaskTransition, TransitionError};

/// Retry budget applied when the caller does not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A unit of work with declared dependencies and a lifecycle status.
///
/// Identity and dependencies are fixed at construction. After the task is
/// handed to a [`TaskQueue`](crate::queue::TaskQueue) its state changes only
/// through the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    id: String,
    description: String,
    status: TaskStatus,
    dependencies: Vec<String>,
    dependency_results: HashMap<String, Value>,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: u32,
    max_retries: u32,
    metadata: BTreeMap<String, Value>,
}

impl Task {
    /// Creates a task with a freshly generated UUID.
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), description)
    }

    /// Creates a task with a caller-chosen identifier.
    pub fn with_id(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            dependency_results: HashMap::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata: BTreeMap::new(),
        }
    }

    /// Declares the dependencies of this task.
    ///
    /// Duplicates collapse onto their first occurrence; a self-reference is
    /// dropped since it could never be satisfied.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if dep == self.id {
                tracing::warn!("Task {} cannot depend on itself; dropping dependency", self.id);
                continue;
            }
            if !deduped.contains(&dep) {
                deduped.push(dep);
            }
        }
        self.dependencies = deduped;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn dependency_results(&self) -> &HashMap<String, Value> {
        &self.dependency_results
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn depends_on(&self, task_id: &str) -> bool {
        self.dependencies.iter().any(|dep| dep == task_id)
    }

    /// Pending with a result recorded for every declared dependency.
    pub fn is_ready(&self) -> bool {
        self.status == TaskStatus::Pending
            && self.dependency_results.len() == self.dependencies.len()
    }

    /// Declared dependencies whose results have not arrived yet, in
    /// declaration order.
    pub fn missing_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|dep| !self.dependency_results.contains_key(dep.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Pending -> Ready. Any other source status is left untouched, so
    /// calling this twice is harmless. Returns whether the status changed.
    pub fn mark_ready(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Ready;
        tracing::debug!("Task {} is now ready for execution", self.id);
        true
    }

    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        TaskTransition::validate(self.status, TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        tracing::debug!("Task {} is now running", self.id);
        Ok(())
    }

    pub fn mark_completed(&mut self, result: Value) -> Result<(), TransitionError> {
        TaskTransition::validate(self.status, TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        tracing::debug!("Task {} completed successfully", self.id);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        TaskTransition::validate(self.status, TaskStatus::Failed)?;
        let error = error.into();
        tracing::error!("Task {} failed: {}", self.id, error);
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), TransitionError> {
        TaskTransition::validate(self.status, TaskStatus::Cancelled)?;
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        tracing::warn!("Task {} was cancelled", self.id);
        Ok(())
    }

    /// Records the result of one of this task's dependencies.
    ///
    /// Values for ids that are not declared dependencies are rejected and
    /// leave the task unchanged. Returns whether the value was accepted.
    pub fn add_dependency_result(&mut self, task_id: &str, result: Value) -> bool {
        if !self.depends_on(task_id) {
            tracing::warn!(
                "Attempted to add result for non-dependency {} to task {}",
                task_id,
                self.id
            );
            return false;
        }
        self.dependency_results.insert(task_id.to_string(), result);
        tracing::debug!("Added result from dependency {} to task {}", task_id, self.id);
        true
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// Failed -> Ready, spending one unit of the retry budget.
    ///
    /// Clears the error and both execution timestamps so the next attempt
    /// reports its own duration.
    pub fn retry(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Failed {
            TaskTransition::validate(self.status, TaskStatus::Ready)?;
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Ready,
            });
        }
        if self.retry_count >= self.max_retries {
            return Err(TransitionError::RetryExhausted {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }

        self.status = TaskStatus::Ready;
        self.retry_count += 1;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        tracing::info!(
            "Retrying task {} (attempt {}/{})",
            self.id,
            self.retry_count,
            self.max_retries
        );
        Ok(())
    }

    /// Wall time between start and the last finishing transition.
    pub fn get_duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    pub(crate) fn restore(
        id: String,
        description: String,
        status: TaskStatus,
        dependencies: Vec<String>,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        retry_count: u32,
        max_retries: u32,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        let mut task = Self::with_id(id, description).with_dependencies(dependencies);
        task.status = status;
        task.created_at = created_at;
        task.started_at = started_at;
        task.completed_at = completed_at;
        task.retry_count = retry_count;
        task.max_retries = max_retries;
        task.metadata = metadata;
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running(id: &str) -> Task {
        let mut task = Task::with_id(id, "work");
        task.mark_ready();
        task.mark_running().unwrap();
        task
    }

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("summarize");
        assert!(Uuid::parse_str(task.id()).is_ok());
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.retry_count(), 0);
        assert_eq!(task.max_retries(), DEFAULT_MAX_RETRIES);
        assert!(task.started_at().is_none());
        assert!(task.get_duration().is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(Task::new("a").id(), Task::new("a").id());
    }

    #[test]
    fn test_dependencies_are_deduplicated_in_order() {
        let task = Task::with_id("c", "join").with_dependencies(["b", "a", "b", "c", "a"]);
        assert_eq!(task.dependencies(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_mark_ready_is_idempotent() {
        let mut task = Task::with_id("a", "work");
        assert!(task.mark_ready());
        assert!(!task.mark_ready());
        assert_eq!(task.status(), TaskStatus::Ready);

        let mut running = running("b");
        assert!(!running.mark_ready());
        assert_eq!(running.status(), TaskStatus::Running);
    }

    #[test]
    fn test_readiness_requires_every_dependency() {
        let mut task = Task::with_id("c", "join").with_dependencies(["a", "b"]);
        assert!(!task.is_ready());

        assert!(task.add_dependency_result("a", json!("ra")));
        assert!(!task.is_ready());
        assert_eq!(task.missing_dependencies(), vec!["b"]);

        assert!(task.add_dependency_result("b", json!("rb")));
        assert!(task.is_ready());
        assert!(task.missing_dependencies().is_empty());
    }

    #[test]
    fn test_undeclared_dependency_result_is_rejected() {
        let mut task = Task::with_id("b", "work").with_dependencies(["a"]);
        assert!(!task.add_dependency_result("z", json!(1)));
        assert!(task.dependency_results().is_empty());
    }

    #[test]
    fn test_complete_lifecycle_sets_timestamps() {
        let mut task = running("a");
        assert!(task.started_at().is_some());
        task.mark_completed(json!({"answer": 42})).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result(), Some(&json!({"answer": 42})));
        assert!(task.get_duration().unwrap() >= Duration::zero());
    }

    #[test]
    fn test_illegal_transitions_do_not_mutate() {
        let mut task = Task::with_id("a", "work");
        assert!(task.mark_running().is_err());
        assert!(task.mark_completed(json!(null)).is_err());
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.started_at().is_none());

        let mut done = running("b");
        done.mark_completed(json!(1)).unwrap();
        assert!(done.mark_cancelled().is_err());
        assert_eq!(done.status(), TaskStatus::Completed);
    }

    #[test]
    fn test_retry_budget() {
        let mut task = Task::with_id("a", "flaky").with_max_retries(2);
        task.mark_ready();

        for attempt in 1..=2 {
            task.mark_running().unwrap();
            task.mark_failed("boom").unwrap();
            assert!(task.can_retry());
            task.retry().unwrap();
            assert_eq!(task.retry_count(), attempt);
            assert_eq!(task.status(), TaskStatus::Ready);
            assert!(task.error().is_none());
            assert!(task.started_at().is_none());
            assert!(task.completed_at().is_none());
        }

        task.mark_running().unwrap();
        task.mark_failed("boom again").unwrap();
        assert!(!task.can_retry());
        assert_eq!(
            task.retry(),
            Err(TransitionError::RetryExhausted {
                retry_count: 2,
                max_retries: 2
            })
        );
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error(), Some("boom again"));
    }

    #[test]
    fn test_retry_requires_failed_status() {
        let mut task = Task::with_id("a", "work");
        assert!(task.retry().is_err());
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn test_cancel_from_any_open_state() {
        let mut pending = Task::with_id("a", "work").with_dependencies(["x"]);
        pending.mark_cancelled().unwrap();
        assert_eq!(pending.status(), TaskStatus::Cancelled);
        assert!(pending.completed_at().is_some());

        let mut live = running("b");
        live.mark_cancelled().unwrap();
        assert!(!live.mark_ready());
        assert_eq!(live.status(), TaskStatus::Cancelled);
    }
}
