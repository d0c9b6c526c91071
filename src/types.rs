//! Core types for batch outcomes and fan-out reports.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ItemError;

/// The terminal outcome of one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The item produced a value.
    Success(T),
    /// The item exhausted its attempts.
    Failure {
        /// Stringified error message.
        message: String,
        /// Typed error code, when the item reported one.
        code: Option<String>,
    },
}

impl<T> Outcome<T> {
    /// Returns `true` for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl<T> From<Result<T, ItemError>> for Outcome<T> {
    fn from(result: Result<T, ItemError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure {
                message: err.message,
                code: err.code,
            },
        }
    }
}

/// A work item that was recorded as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Position of the item in the submitted batch.
    pub index: usize,
    /// Stringified error from the final attempt.
    pub error: String,
    /// Typed error code from the final attempt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Outcome of one batch run.
///
/// `successful` and `failed` are both in original item order, never in
/// completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<T> {
    /// Number of items submitted.
    pub total: usize,
    /// Values of items that succeeded, by ascending index.
    pub successful: Vec<T>,
    /// Items that failed, by ascending index.
    pub failed: Vec<BatchFailure>,
}

impl<T> BatchResult<T> {
    /// An empty result for a zero-item batch.
    pub fn empty() -> Self {
        Self {
            total: 0,
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Number of items that never ran because a fail-fast batch stopped early.
    ///
    /// `successful.len() + failed.len() + skipped() == total` always holds;
    /// `skipped()` is zero unless the batch ran fail-fast.
    pub fn skipped(&self) -> usize {
        self.total - self.successful.len() - self.failed.len()
    }

    /// Per-index view of the items that ran.
    ///
    /// Items are claimed in index order and a fail-fast batch stops at its
    /// first failure, so completed items always form the prefix
    /// `0..successful.len() + failed.len()`. Skipped items are not included.
    pub fn into_outcomes(self) -> Vec<Outcome<T>> {
        let completed = self.successful.len() + self.failed.len();
        let mut successes = self.successful.into_iter();
        let mut failures = self.failed.into_iter().peekable();
        let mut outcomes = Vec::with_capacity(completed);
        for index in 0..completed {
            match failures.next_if(|failure| failure.index == index) {
                Some(failure) => outcomes.push(Outcome::Failure {
                    message: failure.error,
                    code: failure.code,
                }),
                None => match successes.next() {
                    Some(value) => outcomes.push(Outcome::Success(value)),
                    None => break,
                },
            }
        }
        outcomes
    }

    /// Returns `true` when every submitted item succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.successful.len() == self.total
    }
}

/// One failed fan-out query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailure {
    /// Normalized query text.
    pub query: String,
    /// Stringified error.
    pub error: String,
    /// Typed error code reported by the query operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Deduplicated cross-query union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnionReport<I> {
    /// Winning items in final rank order.
    pub results: Vec<I>,
    /// Number of entries after deduplication.
    pub deduped_count: usize,
}

impl<I> Default for UnionReport<I> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            deduped_count: 0,
        }
    }
}

/// Result of a multi-query fan-out.
///
/// Serializes to
/// `{perQuery, union: {results, dedupedCount}, failed, truncated?, guidance?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutReport<O, I> {
    /// Output per normalized query, in query order. Failed queries are absent.
    pub per_query: IndexMap<String, O>,
    /// Deduplicated union of every successful query's items.
    pub union: UnionReport<I>,
    /// Failed queries in query order.
    pub failed: Vec<QueryFailure>,
    /// Set when the report was shrunk to fit the output budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    /// Explanation attached when the report was shrunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl<O, I> Default for FanoutReport<O, I> {
    fn default() -> Self {
        Self {
            per_query: IndexMap::new(),
            union: UnionReport::default(),
            failed: Vec::new(),
            truncated: None,
            guidance: None,
        }
    }
}
