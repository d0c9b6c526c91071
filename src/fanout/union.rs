//! Cross-query deduplication and deterministic ranking.
//!
//! Items from every successful query are grouped by dedup key: the item's
//! natural identifier, or a synthetic `auto:<n>` key for items without one.
//! Each key keeps a single winner. The finished union is ordered by score,
//! then recency, then composite identifier, then key, so no two entries ever
//! compare equal.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of synthetic dedup keys.
pub const AUTO_KEY_PREFIX: &str = "auto:";

/// Direction of a call site's similarity metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolarity {
    /// Larger scores rank first (relevance scores). Missing scores count as
    /// `-inf`.
    #[default]
    HigherIsBetter,
    /// Smaller scores rank first (distance / fuzzy-match scores). Missing
    /// scores count as `+inf`.
    LowerIsBetter,
}

impl ScorePolarity {
    /// Map a raw score onto a scale where larger is always better.
    ///
    /// Missing and non-finite scores map to `-inf`, the worst value for
    /// either polarity, so they never win a comparison against a real score.
    pub fn comparable(self, score: Option<f64>) -> f64 {
        match score.filter(|value| value.is_finite()) {
            Some(value) => match self {
                Self::HigherIsBetter => value,
                Self::LowerIsBetter => -value,
            },
            None => f64::NEG_INFINITY,
        }
    }
}

/// An item that can take part in a cross-query union.
pub trait UnionItem: Clone {
    /// Natural identifier (task or page id). `None` or empty means the item
    /// gets a synthetic key.
    fn natural_key(&self) -> Option<String>;

    /// Raw similarity score, interpreted through a [`ScorePolarity`].
    fn score(&self) -> Option<f64>;

    /// Recency used to break score ties. `None` is older than any timestamp.
    fn timestamp(&self) -> Option<DateTime<Utc>>;

    /// Composite natural identifier used as the final ordering key.
    fn composite_id(&self) -> String;

    /// Every instance of a shrinkable string field, for output budgeting.
    fn truncatable_fields(&mut self, _field: &str) -> Vec<&mut String> {
        Vec::new()
    }
}

/// Current winner for one dedup key.
#[derive(Debug, Clone)]
struct UnionEntry<I> {
    key: String,
    item: I,
    score: f64,
    timestamp: Option<DateTime<Utc>>,
}

impl<I: UnionItem> UnionEntry<I> {
    fn new(key: String, item: I, polarity: ScorePolarity) -> Self {
        let score = polarity.comparable(item.score());
        let timestamp = item.timestamp();
        Self {
            key,
            item,
            score,
            timestamp,
        }
    }

    /// Strictly better score, or equal score and strictly newer timestamp.
    fn beats(&self, incumbent: &Self) -> bool {
        match self.score.partial_cmp(&incumbent.score) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => self.timestamp > incumbent.timestamp,
            _ => false,
        }
    }
}

/// Snapshot of an entry's ranking fields, taken when the union is finished.
struct RankKey {
    key: String,
    score: f64,
    timestamp: Option<DateTime<Utc>>,
    composite_id: String,
}

/// Best score, newest timestamp, composite id, key.
fn rank(a: &RankKey, b: &RankKey) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.composite_id.cmp(&b.composite_id))
        .then_with(|| a.key.cmp(&b.key))
}

/// Accumulates items from many queries into one deduplicated union.
///
/// One builder serves one merge; its synthetic key counter starts fresh.
#[derive(Debug)]
pub struct UnionBuilder<I> {
    polarity: ScorePolarity,
    entries: HashMap<String, UnionEntry<I>>,
    next_auto: u64,
}

impl<I: UnionItem> UnionBuilder<I> {
    /// Create an empty builder for a call site with the given polarity.
    pub fn new(polarity: ScorePolarity) -> Self {
        Self {
            polarity,
            entries: HashMap::new(),
            next_auto: 0,
        }
    }

    /// Offer one item. It becomes the winner for its key if there is no
    /// incumbent or it beats the incumbent.
    pub fn push(&mut self, item: I) {
        let key = match item.natural_key().filter(|key| !key.is_empty()) {
            Some(key) => key,
            None => {
                self.next_auto += 1;
                format!("{AUTO_KEY_PREFIX}{}", self.next_auto)
            }
        };

        let candidate = UnionEntry::new(key, item, self.polarity);
        match self.entries.get_mut(&candidate.key) {
            Some(incumbent) => {
                if candidate.beats(incumbent) {
                    tracing::trace!(key = %candidate.key, "union entry replaced");
                    *incumbent = candidate;
                }
            }
            None => {
                self.entries.insert(candidate.key.clone(), candidate);
            }
        }
    }

    /// Offer every item from an iterator, in order.
    pub fn extend<It: IntoIterator<Item = I>>(&mut self, items: It) {
        for item in items {
            self.push(item);
        }
    }

    /// Number of distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no item has been pushed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the builder, returning winners in rank order.
    pub fn finish(self) -> Vec<I> {
        let mut ranked: Vec<_> = self
            .entries
            .into_values()
            .map(|entry| {
                let rank_key = RankKey {
                    composite_id: entry.item.composite_id(),
                    key: entry.key,
                    score: entry.score,
                    timestamp: entry.timestamp,
                };
                (rank_key, entry.item)
            })
            .collect();
        ranked.sort_by(|(a, _), (b, _)| rank(a, b));
        ranked.into_iter().map(|(_, item)| item).collect()
    }
}
