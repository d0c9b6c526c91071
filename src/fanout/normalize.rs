//! Query normalisation for fan-out dispatch.

use std::collections::HashSet;

/// Trim, lowercase and dedupe raw queries, keeping first-occurrence order.
///
/// Queries that are empty after trimming are dropped.
pub fn normalize_queries<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(raw.len());
    raw.iter()
        .map(|query| query.as_ref().trim().to_lowercase())
        .filter(|query| !query.is_empty())
        .filter(|query| seen.insert(query.clone()))
        .collect()
}
