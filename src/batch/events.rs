//! Structured batch lifecycle events and the sinks that receive them.
//!
//! Events are observational only: the executor never reads anything back
//! from a sink, and a sink cannot influence scheduling.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use uuid::Uuid;

/// Correlation context for one batch run, passed explicitly to every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchContext {
    /// Unique id of the run.
    pub id: Uuid,
    /// Caller-chosen label, e.g. `fanout`.
    pub label: String,
}

impl BatchContext {
    /// Create a context with a fresh random id.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

/// A lifecycle event emitted by the batch executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// The batch was accepted.
    Started {
        /// Number of submitted items.
        total: usize,
    },
    /// An attempt failed and the item will be retried after `delay_ms`.
    Retried {
        /// Item index.
        index: usize,
        /// 1-based number of the attempt that just failed.
        attempt: u32,
        /// Backoff before the next attempt.
        delay_ms: u64,
    },
    /// An item reached a terminal outcome.
    Progress {
        /// Items with a terminal outcome so far.
        completed: usize,
        /// Items that succeeded so far.
        succeeded: usize,
        /// Items that failed so far.
        failed: usize,
        /// Number of submitted items.
        total: usize,
    },
    /// The batch was finalized.
    Finished {
        /// Items that succeeded.
        succeeded: usize,
        /// Items that failed.
        failed: usize,
        /// Wall-clock duration of the run.
        elapsed_ms: u64,
    },
}

impl BatchEvent {
    /// Stable event name used as the log message.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "batch.started",
            Self::Retried { .. } => "batch.retried",
            Self::Progress { .. } => "batch.progress",
            Self::Finished { .. } => "batch.finished",
        }
    }
}

/// Receiver for batch lifecycle events.
pub trait EventSink: Send + Sync {
    /// Record one event for the batch identified by `context`.
    fn info(&self, context: &BatchContext, event: &BatchEvent);
}

/// Default sink: writes every event as a `tracing` info record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn info(&self, context: &BatchContext, event: &BatchEvent) {
        let batch_id = context.id;
        let label = context.label.as_str();
        match *event {
            BatchEvent::Started { total } => {
                tracing::info!(%batch_id, label, total, "batch.started");
            }
            BatchEvent::Retried {
                index,
                attempt,
                delay_ms,
            } => {
                tracing::info!(%batch_id, label, index, attempt, delay_ms, "batch.retried");
            }
            BatchEvent::Progress {
                completed,
                succeeded,
                failed,
                total,
            } => {
                tracing::info!(
                    %batch_id,
                    label,
                    completed,
                    succeeded,
                    failed,
                    total,
                    "batch.progress"
                );
            }
            BatchEvent::Finished {
                succeeded,
                failed,
                elapsed_ms,
            } => {
                tracing::info!(%batch_id, label, succeeded, failed, elapsed_ms, "batch.finished");
            }
        }
    }
}

/// In-memory sink that keeps every event, for diagnostics and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(BatchContext, BatchEvent)>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in emission order.
    pub fn events(&self) -> Vec<BatchEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Snapshot of recorded event names in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, event)| event.name())
            .collect()
    }

    /// Contexts of every recorded event, in emission order.
    pub fn contexts(&self) -> Vec<BatchContext> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(context, _)| context.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn info(&self, context: &BatchContext, event: &BatchEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((context.clone(), event.clone()));
    }
}
