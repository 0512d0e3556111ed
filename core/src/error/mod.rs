pub mod executor;
pub mod queue;

pub use executor::ExecutorError;
pub use queue::QueueError;
