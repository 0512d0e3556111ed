//! Task entity and its state machine.
//!
//! ```text
//! Pending ──(all dependency results)──▶ Ready ──▶ Running ──▶ Completed
//!                                        ▲           │
//!                                        └─ retry ── Failed
//! Pending | Ready | Running ──▶ Cancelled
//! ```

pub mod record;
pub mod status;
pub mod task;
pub mod transitions;

pub use record::TaskRecord;
pub use status::{ParseStatusError, TaskStatus};
pub use task::{Task, DEFAULT_MAX_RETRIES};
pub use transitions::{TaskTransition, TransitionError};
