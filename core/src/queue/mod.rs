//! Dependency-aware task queue.
//!
//! # Architecture
//!
//! ```text
//! add_task(Task)
//!   ↓
//! tasks + dependents index ──▶ Ready (no pending dependencies)
//!   ↓
//! update_task_status(id, Completed, result)
//!   ↓
//! propagate_result → dependents[id] → add_dependency_result → Ready
//! ```

mod events;
mod graph;
mod policy;
mod queue;

pub use events::QueueEvent;
pub use graph::DependencyGraph;
pub use policy::CancelPolicy;
pub use queue::{QueueStats, TaskQueue};
