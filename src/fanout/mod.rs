//! Fan-out: concurrent queries, cross-query dedup, ranking, budgeting.
//!
//! This module runs independent queries through the batch executor,
//! deduplicates their items by natural identifier, ranks the union
//! deterministically for the call site's score polarity, and caps the
//! serialized report size.

pub mod hit;
pub mod merge;
pub mod normalize;
pub mod union;

pub use hit::Hit;
pub use merge::{FanoutMerger, FanoutOptions, QueryOutput};
pub use normalize::normalize_queries;
pub use union::{ScorePolarity, UnionBuilder, UnionItem};
