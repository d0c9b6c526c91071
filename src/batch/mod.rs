//! Batch execution: bounded concurrency, retry with backoff, ordered results.
//!
//! [`BatchExecutor`] runs an ordered list of [`WorkItem`]s and returns a
//! [`BatchResult`](crate::types::BatchResult) whose successes and failures
//! are both in submission order. Lifecycle events go to an injected
//! [`EventSink`].

pub mod events;
pub mod executor;

pub use events::{BatchContext, BatchEvent, EventSink, RecordingSink, TracingSink};
pub use executor::{BatchExecutor, PANIC_CODE, TIMEOUT_CODE, WorkItem, work_item};
