//! # Shared queue state
//!
//! The queue itself is single-threaded; [`QueueHandle`] serializes every
//! mutation behind one lock so drivers and workers on different tasks can
//! report transitions safely, and fans the resulting [`QueueEvent`]s out to
//! subscribers.
//!
//! [`QueueEvent`]: crate::queue::QueueEvent

pub mod manager;

pub use manager::QueueHandle;
