//! Shared, lock-guarded access to a [`TaskQueue`].

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::queue::{QueueEvent, QueueStats, TaskQueue};
use crate::task::{Task, TaskRecord, TaskStatus};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Cloneable handle to a queue shared between a driver and its workers.
///
/// Every mutation runs under the write lock, so multi-step updates such as
/// completion plus propagation are never interleaved. Reads return owned
/// snapshots. Events produced by a mutation are broadcast after the lock is
/// released.
#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<QueueHandleInner>,
}

struct QueueHandleInner {
    queue: RwLock<TaskQueue>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueHandle {
    pub fn new(queue: TaskQueue) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = QueueHandleInner {
            queue: RwLock::new(queue),
            event_tx,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(TaskQueue::from_config(config))
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.event_tx.subscribe()
    }

    fn publish(&self, events: Vec<QueueEvent>) {
        for event in events {
            // No receivers is fine
            let _ = self.inner.event_tx.send(event);
        }
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut TaskQueue) -> R) -> R {
        let (out, events) = {
            let mut queue = self.inner.queue.write().await;
            let out = f(&mut queue);
            (out, queue.take_events())
        };
        self.publish(events);
        out
    }

    /// Run a read-only closure against the queue.
    pub async fn read<R>(&self, f: impl FnOnce(&TaskQueue) -> R) -> R {
        let queue = self.inner.queue.read().await;
        f(&queue)
    }

    pub async fn add_task(&self, task: Task) -> Result<(), QueueError> {
        self.mutate(|queue| queue.add_task(task)).await
    }

    /// Adds several tasks under one lock; stops at the first duplicate.
    pub async fn add_tasks<I>(&self, tasks: I) -> Result<(), QueueError>
    where
        I: IntoIterator<Item = Task>,
    {
        self.mutate(|queue| tasks.into_iter().try_for_each(|task| queue.add_task(task)))
            .await
    }

    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        self.mutate(|queue| queue.update_task_status(task_id, status, result, error))
            .await
    }

    pub async fn retry_task(&self, task_id: &str) -> bool {
        self.mutate(|queue| queue.retry_task(task_id)).await
    }

    /// Marks up to `limit` ready tasks as running, head first, and returns
    /// them. Claiming under a single lock keeps two workers from starting the
    /// same task.
    pub async fn claim_ready(&self, limit: usize) -> Vec<Task> {
        self.mutate(|queue| {
            let ids: Vec<String> = queue.ready_ids().iter().take(limit).cloned().collect();
            let mut claimed = Vec::with_capacity(ids.len());
            for id in ids {
                match queue.update_task_status(&id, TaskStatus::Running, None, None) {
                    Ok(()) => {
                        if let Some(task) = queue.get_task(&id) {
                            claimed.push(task.clone());
                        }
                    }
                    Err(e) => tracing::warn!("Failed to claim task {}: {}", id, e),
                }
            }
            claimed
        })
        .await
    }

    pub async fn reset(&self) {
        self.mutate(|queue| queue.reset()).await
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.read(|queue| queue.get_task(task_id).cloned()).await
    }

    pub async fn get_ready_tasks(&self) -> Vec<Task> {
        self.read(|queue| queue.get_ready_tasks().into_iter().cloned().collect())
            .await
    }

    pub async fn get_next_task(&self) -> Option<Task> {
        self.read(|queue| queue.get_next_task().cloned()).await
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.read(|queue| {
            queue
                .get_tasks_by_status(status)
                .into_iter()
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn blocked_tasks(&self) -> Vec<Task> {
        self.read(|queue| queue.blocked_tasks().into_iter().cloned().collect())
            .await
    }

    pub async fn is_complete(&self) -> bool {
        self.read(|queue| queue.is_complete()).await
    }

    pub async fn all_completed_successfully(&self) -> bool {
        self.read(|queue| queue.all_completed_successfully()).await
    }

    pub async fn is_settled(&self) -> bool {
        self.read(|queue| queue.is_settled()).await
    }

    pub async fn get_completion_percentage(&self) -> f64 {
        self.read(|queue| queue.get_completion_percentage()).await
    }

    pub async fn stats(&self) -> QueueStats {
        self.read(|queue| queue.stats()).await
    }

    pub async fn validate(&self) -> Result<Vec<Vec<String>>, QueueError> {
        self.read(|queue| queue.validate()).await
    }

    /// Externalized records of every task, in insertion order.
    pub async fn records(&self) -> Vec<TaskRecord> {
        self.read(|queue| queue.tasks().map(Task::to_record).collect())
            .await
    }
}

impl Default for QueueHandle {
    fn default() -> Self {
        Self::new(TaskQueue::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handle_lifecycle() {
        let handle = QueueHandle::default();
        handle
            .add_tasks([
                Task::with_id("a", "first"),
                Task::with_id("b", "second").with_dependencies(["a"]),
            ])
            .await
            .unwrap();

        let claimed = handle.claim_ready(4).await;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status(), TaskStatus::Running);
        assert!(handle.get_next_task().await.is_none());

        handle
            .update_task_status("a", TaskStatus::Completed, Some(json!("ra")), None)
            .await
            .unwrap();

        let ready = handle.get_ready_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id(), "b");
        assert_eq!(ready[0].dependency_results().get("a"), Some(&json!("ra")));
        assert_eq!(handle.get_completion_percentage().await, 50.0);
    }

    #[tokio::test]
    async fn test_event_subscription() {
        let handle = QueueHandle::default();
        let mut rx = handle.subscribe();

        handle.add_task(Task::with_id("a", "only")).await.unwrap();

        match rx.recv().await {
            Ok(QueueEvent::TaskAdded { task_id, .. }) => assert_eq!(task_id, "a"),
            other => panic!("Expected TaskAdded event, got {:?}", other),
        }
        match rx.recv().await {
            Ok(QueueEvent::StatusChanged { task_id, to, .. }) => {
                assert_eq!(task_id, "a");
                assert_eq!(to, TaskStatus::Ready);
            }
            other => panic!("Expected StatusChanged event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_share_a_task() {
        let handle = QueueHandle::default();
        handle
            .add_tasks((0..32).map(|i| Task::with_id(format!("t{i}"), "parallel")))
            .await
            .unwrap();

        let mut joins = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            joins.push(tokio::spawn(async move { handle.claim_ready(5).await }));
        }

        let mut seen = std::collections::HashSet::new();
        for join in joins {
            for task in join.await.unwrap() {
                assert!(seen.insert(task.id().to_string()), "claimed twice");
            }
        }
        assert_eq!(seen.len(), 32);
        assert_eq!(handle.stats().await.running, 32);
    }
}
