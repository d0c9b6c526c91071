//! Multi-query fan-out: validate, normalise, dispatch, merge, budget.
//!
//! # Pipeline
//!
//! 1. Reject an empty query list or one longer than `max_queries`
//! 2. Normalise query text (trim, lowercase, dedupe)
//! 3. Run one work item per query through the [`BatchExecutor`] with
//!    continue-on-error forced on
//! 4. Collect per-query outputs and failures in query order
//! 5. Build the deduplicated union with deterministic tie-breaks
//! 6. Shrink the report to the configured byte budget

use std::future::Future;

use indexmap::IndexMap;
use serde::Serialize;

use super::normalize::normalize_queries;
use super::union::{ScorePolarity, UnionBuilder, UnionItem};
use crate::batch::{BatchExecutor, WorkItem, work_item};
use crate::budget::{Truncatable, enforce_limit};
use crate::config::{BatchOptions, SiftConfig};
use crate::error::{ItemError, Result, SiftError};
use crate::types::{FanoutReport, QueryFailure, UnionReport};

/// Output of a single query: a list of union items.
pub trait QueryOutput {
    /// Item type contributed to the union.
    type Item: UnionItem;

    /// Items in the order the query returned them.
    fn items(&self) -> &[Self::Item];

    /// Mutable access for output budgeting.
    fn items_mut(&mut self) -> &mut [Self::Item];
}

impl<I: UnionItem> QueryOutput for Vec<I> {
    type Item = I;

    fn items(&self) -> &[I] {
        self
    }

    fn items_mut(&mut self) -> &mut [I] {
        self
    }
}

impl<O> Truncatable for FanoutReport<O, O::Item>
where
    O: QueryOutput + Serialize,
    O::Item: Serialize,
{
    /// Union results first, then each per-query output in query order.
    fn truncatable_fields(&mut self, field: &str) -> Vec<&mut String> {
        let mut found = Vec::new();
        for item in &mut self.union.results {
            found.extend(item.truncatable_fields(field));
        }
        for output in self.per_query.values_mut() {
            for item in output.items_mut() {
                found.extend(item.truncatable_fields(field));
            }
        }
        found
    }

    fn mark_truncated(&mut self, guidance: &str) {
        self.truncated = Some(true);
        self.guidance = Some(guidance.to_owned());
    }
}

/// Per-call fan-out options.
#[derive(Debug, Clone, Default)]
pub struct FanoutOptions {
    /// Batch overrides layered over the configured defaults.
    /// `continue_on_error` is always forced on.
    pub batch: BatchOptions,
    /// Score direction of the call site.
    pub polarity: ScorePolarity,
    /// Shrinkable fields in the order they are given up, e.g.
    /// `["snippet", "title"]` or `["tags", "title"]`.
    pub shrink_priority: Vec<String>,
}

impl FanoutOptions {
    /// Options for a call site with the given polarity and shrink order.
    pub fn new<S: Into<String>>(
        polarity: ScorePolarity,
        shrink_priority: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            batch: BatchOptions::default(),
            polarity,
            shrink_priority: shrink_priority.into_iter().map(Into::into).collect(),
        }
    }

    /// Replace the batch overrides.
    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }
}

/// Runs independent queries concurrently and merges their results.
#[derive(Debug, Clone)]
pub struct FanoutMerger {
    config: SiftConfig,
    executor: BatchExecutor,
}

impl Default for FanoutMerger {
    fn default() -> Self {
        Self::new(SiftConfig::default())
    }
}

impl FanoutMerger {
    /// Create a merger with the given configuration and a tracing executor.
    pub fn new(config: SiftConfig) -> Self {
        Self {
            config,
            executor: BatchExecutor::default().with_label("fanout"),
        }
    }

    /// Use a specific executor, e.g. one with a recording sink.
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    /// Run `operation` once per normalised query and merge the outputs.
    ///
    /// # Errors
    ///
    /// Returns [`SiftError::Validation`] if `queries` is empty or longer
    /// than `max_queries`, [`SiftError::Config`] if the configuration is
    /// invalid, and [`SiftError::Serialize`] if the report cannot be
    /// measured. Individual query failures are reported in
    /// [`FanoutReport::failed`], never as an error.
    pub async fn run<S, O, F, Fut>(
        &self,
        queries: &[S],
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
        self.config.validate()?;
        self.validate_queries(queries)?;

        let normalized = normalize_queries(queries);
        if normalized.is_empty() {
            tracing::debug!("no non-blank queries, skipping dispatch");
            return Ok(FanoutReport::default());
        }

        let batch = BatchOptions {
            continue_on_error: Some(true),
            ..options.batch.clone().or(&self.config.batch)
        };

        let operation = &operation;
        let items: Vec<WorkItem<'_, (String, O)>> = normalized
            .iter()
            .map(|query| {
                work_item(move || {
                    let query = query.clone();
                    let pending = operation(query.clone());
                    async move { pending.await.map(|output| (query, output)) }
                })
            })
            .collect();

        let outcome = self.executor.run(items, &batch).await;
        tracing::debug!(
            queries = normalized.len(),
            succeeded = outcome.successful.len(),
            failed = outcome.failed.len(),
            "fan-out batch complete"
        );

        let per_query: IndexMap<String, O> = outcome.successful.into_iter().collect();
        let failed = outcome
            .failed
            .into_iter()
            .map(|failure| QueryFailure {
                query: normalized[failure.index].clone(),
                error: failure.error,
                code: failure.code,
            })
            .collect();

        let mut builder = UnionBuilder::new(options.polarity);
        for output in per_query.values() {
            builder.extend(output.items().iter().cloned());
        }
        let results = builder.finish();

        let mut report = FanoutReport {
            per_query,
            union: UnionReport {
                deduped_count: results.len(),
                results,
            },
            failed,
            truncated: None,
            guidance: None,
        };

        let priority: Vec<&str> = options.shrink_priority.iter().map(String::as_str).collect();
        if enforce_limit(&mut report, self.config.fanout.output_limit_bytes, &priority)? {
            tracing::info!(
                limit_bytes = self.config.fanout.output_limit_bytes,
                "fan-out report trimmed to output budget"
            );
        }

        Ok(report)
    }

    fn validate_queries<S: AsRef<str>>(&self, queries: &[S]) -> Result<()> {
        if queries.is_empty() {
            return Err(SiftError::Validation(
                "at least one query is required".into(),
            ));
        }
        let max = self.config.fanout.max_queries;
        if queries.len() > max {
            return Err(SiftError::Validation(format!(
                "at most {max} queries are allowed, got {}",
                queries.len()
            )));
        }
        Ok(())
    }
}
