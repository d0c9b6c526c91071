//! Bounded-concurrency executor with per-item retry.
//!
//! Worker slots are plain futures joined inside the future returned by
//! [`BatchExecutor::run`]; nothing is spawned, so work items may borrow from
//! the caller. All shared run state lives in one [`RunState`] owned by the
//! run. Its mutex is only ever taken between suspension points.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};

use super::events::{BatchContext, BatchEvent, EventSink, TracingSink};
use crate::config::{BatchOptions, ExecutionPolicy};
use crate::error::ItemError;
use crate::types::{BatchFailure, BatchResult, Outcome};

/// A deferred, re-invokable asynchronous operation.
///
/// The executor calls it once per attempt, so it must be `Fn`.
pub type WorkItem<'a, T> =
    Box<dyn Fn() -> BoxFuture<'a, Result<T, ItemError>> + Send + Sync + 'a>;

/// Box a closure returning a future into a [`WorkItem`].
pub fn work_item<'a, T, F, Fut>(operation: F) -> WorkItem<'a, T>
where
    F: Fn() -> Fut + Send + Sync + 'a,
    Fut: Future<Output = Result<T, ItemError>> + Send + 'a,
{
    Box::new(move || operation().boxed())
}

/// Error code recorded when an attempt exceeds the per-item deadline.
pub const TIMEOUT_CODE: &str = "timeout";
/// Error code recorded when a work item panics.
pub const PANIC_CODE: &str = "panic";

/// Runs ordered batches of work items under a concurrency cap.
#[derive(Clone)]
pub struct BatchExecutor {
    sink: Arc<dyn EventSink>,
    label: String,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl BatchExecutor {
    /// Create an executor that reports to `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            label: "batch".to_owned(),
        }
    }

    /// Set the label attached to every event from this executor.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run `items` under `options`.
    ///
    /// Never fails: per-item errors (including panics) are captured in
    /// [`BatchResult::failed`]. Both result lists are in item order.
    pub async fn run<'a, T>(
        &self,
        items: Vec<WorkItem<'a, T>>,
        options: &BatchOptions,
    ) -> BatchResult<T>
    where
        T: Send + 'a,
    {
        self.run_with_policy(items, &options.resolve()).await
    }

    /// Run `items` under an already-resolved policy.
    pub async fn run_with_policy<'a, T>(
        &self,
        items: Vec<WorkItem<'a, T>>,
        policy: &ExecutionPolicy,
    ) -> BatchResult<T>
    where
        T: Send + 'a,
    {
        let context = BatchContext::new(self.label.clone());
        let started = Instant::now();
        let total = items.len();
        self.sink.info(&context, &BatchEvent::Started { total });

        let state = Mutex::new(RunState::new(total));
        let slots = policy.effective_concurrency().min(total);
        tracing::debug!(batch_id = %context.id, total, slots, "dispatching batch");

        let workers = (0..slots).map(|_| self.worker(&context, &items, policy, &state));
        join_all(workers).await;

        let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        self.finalize(&context, state, started)
    }

    /// One concurrency slot: claim, execute, record, repeat.
    async fn worker<'a, T>(
        &self,
        context: &BatchContext,
        items: &[WorkItem<'a, T>],
        policy: &ExecutionPolicy,
        state: &Mutex<RunState<T>>,
    ) where
        T: Send + 'a,
    {
        loop {
            let claimed = lock(state).claim();
            let Some(index) = claimed else {
                break;
            };

            let outcome = Outcome::from(self.execute(context, index, &items[index], policy).await);

            let progress = {
                let mut guard = lock(state);
                guard.record(index, outcome, policy.continue_on_error);
                guard.progress()
            };
            self.sink.info(context, &progress);
        }
    }

    /// Attempt one item until it succeeds or runs out of attempts.
    async fn execute<T>(
        &self,
        context: &BatchContext,
        index: usize,
        item: &WorkItem<'_, T>,
        policy: &ExecutionPolicy,
    ) -> Result<T, ItemError> {
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match invoke(item, policy.item_timeout).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                tracing::warn!(
                    batch_id = %context.id,
                    index,
                    attempts = attempt,
                    error = %err,
                    "work item failed"
                );
                return Err(err);
            }

            let delay = policy.delay_for_attempt(attempt - 1);
            tracing::debug!(batch_id = %context.id, index, attempt, error = %err, "retrying work item");
            self.sink.info(
                context,
                &BatchEvent::Retried {
                    index,
                    attempt,
                    delay_ms: duration_ms(delay),
                },
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Sort by index, emit `finished`, and produce the result.
    ///
    /// Consumes the run state, so a run can only be finalized once.
    fn finalize<T>(
        &self,
        context: &BatchContext,
        state: RunState<T>,
        started: Instant,
    ) -> BatchResult<T> {
        let result = state.into_result();
        self.sink.info(
            context,
            &BatchEvent::Finished {
                succeeded: result.successful.len(),
                failed: result.failed.len(),
                elapsed_ms: duration_ms(started.elapsed()),
            },
        );
        result
    }
}

/// Invoke a work item once, converting deadlines and panics into errors.
async fn invoke<T>(item: &WorkItem<'_, T>, deadline: Option<Duration>) -> Result<T, ItemError> {
    let attempt = AssertUnwindSafe(async { item().await }).catch_unwind();
    let caught = match deadline {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(caught) => caught,
            Err(_) => {
                return Err(ItemError::with_code(
                    TIMEOUT_CODE,
                    format!("attempt exceeded {}ms", duration_ms(limit)),
                ));
            }
        },
        None => attempt.await,
    };
    caught.unwrap_or_else(|payload| Err(ItemError::with_code(PANIC_CODE, panic_message(payload))))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "work item panicked".to_owned()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable state of one run: cursor, stop flag, and accumulators.
struct RunState<T> {
    total: usize,
    cursor: usize,
    stopped: bool,
    successes: Vec<(usize, T)>,
    failures: Vec<BatchFailure>,
}

impl<T> RunState<T> {
    fn new(total: usize) -> Self {
        Self {
            total,
            cursor: 0,
            stopped: false,
            successes: Vec::with_capacity(total),
            failures: Vec::new(),
        }
    }

    /// Claim the next unstarted index, unless the run has stopped.
    fn claim(&mut self) -> Option<usize> {
        if self.stopped || self.cursor >= self.total {
            return None;
        }
        let index = self.cursor;
        self.cursor += 1;
        Some(index)
    }

    fn record(&mut self, index: usize, outcome: Outcome<T>, continue_on_error: bool) {
        match outcome {
            Outcome::Success(value) => self.successes.push((index, value)),
            Outcome::Failure { message, code } => {
                self.failures.push(BatchFailure {
                    index,
                    error: message,
                    code,
                });
                if !continue_on_error {
                    self.stopped = true;
                }
            }
        }
    }

    fn progress(&self) -> BatchEvent {
        BatchEvent::Progress {
            completed: self.successes.len() + self.failures.len(),
            succeeded: self.successes.len(),
            failed: self.failures.len(),
            total: self.total,
        }
    }

    fn into_result(mut self) -> BatchResult<T> {
        self.successes.sort_by_key(|(index, _)| *index);
        self.failures.sort_by_key(|failure| failure.index);
        BatchResult {
            total: self.total,
            successful: self.successes.into_iter().map(|(_, value)| value).collect(),
            failed: self.failures,
        }
    }
}
