//! # sift
//!
//! Bounded-concurrency batch execution with a multi-query fan-out and merge
//! protocol on top.
//!
//! ## Design
//!
//! - [`BatchExecutor`] runs an ordered list of async work items under a
//!   concurrency cap (1–10) with per-item retry and exponential or flat
//!   backoff. Results always come back in submission order.
//! - Fail-fast batches (`continue_on_error = false`) run strictly
//!   sequentially and stop at the first exhausted item.
//! - [`FanoutMerger`] normalises N queries, runs them through the executor,
//!   and merges their items into a deduplicated union with deterministic
//!   tie-breaks (score, then recency, then identifier).
//! - [`budget::enforce_limit`] halves the longest shrinkable string fields
//!   until the serialized report fits a byte ceiling.
//! - Work items are opaque: sift knows nothing about transport, upstream
//!   APIs, or caching.
//!
//! ## Logging
//!
//! Batch lifecycle events (`batch.started`, `batch.retried`,
//! `batch.progress`, `batch.finished`) go to an injected [`EventSink`]. The
//! default [`TracingSink`] writes them as `tracing` info records carrying a
//! per-run batch id.

pub mod batch;
pub mod budget;
pub mod config;
pub mod error;
pub mod fanout;
pub mod types;

pub use batch::{BatchEvent, BatchExecutor, EventSink, RecordingSink, TracingSink, WorkItem, work_item};
pub use config::{BatchOptions, ExecutionPolicy, SiftConfig};
pub use error::{ItemError, Result, SiftError};
pub use fanout::{FanoutMerger, FanoutOptions, Hit, QueryOutput, ScorePolarity, UnionItem};
pub use types::{BatchFailure, BatchResult, FanoutReport, Outcome, QueryFailure, UnionReport};

use std::future::Future;

use serde::Serialize;

/// Run `operation` for every query and merge the outputs.
///
/// Convenience wrapper around [`FanoutMerger::run`] using `config` and the
/// default tracing executor.
///
/// # Errors
///
/// Returns [`SiftError::Validation`] for an empty or oversized query list
/// and [`SiftError::Config`] for an invalid configuration. Individual query
/// failures are reported in [`FanoutReport::failed`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> sift::Result<()> {
/// use sift::{FanoutOptions, Hit, ItemError, ScorePolarity, SiftConfig};
///
/// let options = FanoutOptions::new(ScorePolarity::LowerIsBetter, ["tags", "title"]);
/// let report = sift::fanout(&["Groceries", "errands"], &SiftConfig::default(), &options, |query| async move {
///     Ok::<_, ItemError>(vec![Hit::new(format!("task-{query}"), query).with_score(0.1)])
/// })
/// .await?;
/// println!("{} unique results", report.union.deduped_count);
/// # Ok(())
/// # }
/// ```
pub async fn fanout<S, O, F, Fut>(
    queries: &[S],
    config: &SiftConfig,
    options: &FanoutOptions,
    operation: F,
) -> Result<FanoutReport<O, O::Item>>
where
    S: AsRef<str>,
    O: QueryOutput + Serialize + Send,
    O::Item: Serialize,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<O, ItemError>> + Send,
{
    FanoutMerger::new(config.clone())
        .run(queries, options, operation)
        .await
}
