use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::TaskStatus;
use super::task::{Task, DEFAULT_MAX_RETRIES};

/// Externalized view of a task for logs and callers.
///
/// Carries identity, status and bookkeeping only: the result, the last
/// error and the collected dependency results stay in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Task {
    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id().to_string(),
            description: self.description().to_string(),
            status: self.status(),
            dependencies: self.dependencies().to_vec(),
            created_at: self.created_at(),
            started_at: self.started_at(),
            completed_at: self.completed_at(),
            retry_count: self.retry_count(),
            max_retries: self.max_retries(),
            metadata: self.metadata().clone(),
        }
    }

    /// Rebuilds a task from its record. Result, error and dependency results
    /// start out empty because the record never carries them.
    pub fn from_record(record: TaskRecord) -> Self {
        Task::restore(
            record.id,
            record.description,
            record.status,
            record.dependencies,
            record.created_at,
            record.started_at,
            record.completed_at,
            record.retry_count,
            record.max_retries,
            record.metadata,
        )
    }
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        task.to_record()
    }
}
