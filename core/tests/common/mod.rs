#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use taskq_core::executor::TaskRunner;
use taskq_core::{Task, TaskQueue};

/// Routes `tracing` output through the test harness so it only shows for
/// failing tests.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("taskq_core=debug")
        .with_test_writer()
        .try_init();
}

/// A(deps=[]), B(deps=[A]), C(deps=[A, B]).
pub fn chain_tasks() -> Vec<Task> {
    vec![
        Task::with_id("A", "fetch"),
        Task::with_id("B", "transform").with_dependencies(["A"]),
        Task::with_id("C", "report").with_dependencies(["A", "B"]),
    ]
}

pub fn chain_queue() -> TaskQueue {
    let mut queue = TaskQueue::new();
    for task in chain_tasks() {
        queue.add_task(task).expect("unique ids");
    }
    queue
}

/// Records the order tasks ran in and fails the ids listed in `failing`.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<String>>,
    pub failing: Vec<String>,
}

impl RecordingRunner {
    pub fn failing(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing: ids.iter().map(|id| id.to_string()).collect(),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl TaskRunner for RecordingRunner {
    fn name(&self) -> &str {
        "recording"
    }

    async fn run(&self, task: &Task) -> Result<Value, String> {
        self.calls
            .lock()
            .map_err(|e| e.to_string())?
            .push(task.id().to_string());
        if self.failing.iter().any(|id| id == task.id()) {
            return Err(format!("{} failed", task.id()));
        }
        Ok(json!(format!("r{}", task.id().to_lowercase())))
    }
}
