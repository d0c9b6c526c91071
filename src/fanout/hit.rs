//! A general-purpose search hit usable as a union item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::union::UnionItem;

/// One result returned by a query: a task, a page, or similar record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    /// Natural identifier, when the upstream record has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display title or task name.
    pub title: String,
    /// Matched excerpt.
    #[serde(default)]
    pub snippet: String,
    /// Tag strings attached to the record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Similarity score; polarity depends on the call site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Hit {
    /// Create a hit with an id and title and nothing else.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: title.into(),
            snippet: String::new(),
            tags: Vec::new(),
            score: None,
            updated_at: None,
        }
    }

    /// Set the score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Set the snippet.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Set the tags.
    pub fn with_tags<T: Into<String>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the modification time.
    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}

impl UnionItem for Hit {
    fn natural_key(&self) -> Option<String> {
        self.id.clone()
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn composite_id(&self) -> String {
        format!("{}|{}", self.id.as_deref().unwrap_or_default(), self.title)
    }

    fn truncatable_fields(&mut self, field: &str) -> Vec<&mut String> {
        match field {
            "title" => vec![&mut self.title],
            "snippet" => vec![&mut self.snippet],
            "tags" => self.tags.iter_mut().collect(),
            _ => Vec::new(),
        }
    }
}
