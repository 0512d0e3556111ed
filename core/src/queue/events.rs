use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::TaskStatus;

/// Change performed by the queue, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    TaskAdded {
        task_id: String,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    DependencyResolved {
        task_id: String,
        dependency_id: String,
        timestamp: DateTime<Utc>,
    },
    TaskRetried {
        task_id: String,
        attempt: u32,
        max_retries: u32,
        timestamp: DateTime<Utc>,
    },
    QueueReset {
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskAdded { timestamp, .. }
            | Self::StatusChanged { timestamp, .. }
            | Self::DependencyResolved { timestamp, .. }
            | Self::TaskRetried { timestamp, .. }
            | Self::QueueReset { timestamp } => *timestamp,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskAdded { task_id, .. }
            | Self::StatusChanged { task_id, .. }
            | Self::DependencyResolved { task_id, .. }
            | Self::TaskRetried { task_id, .. } => Some(task_id),
            Self::QueueReset { .. } => None,
        }
    }
}
