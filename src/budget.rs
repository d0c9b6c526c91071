//! Output budget enforcement.
//!
//! Shrinks variable-length string fields of a payload until its JSON
//! serialization fits a byte ceiling. Fields are shrunk in caller-defined
//! priority order. Within one priority field the single longest instance is
//! halved at a time, so short values survive as long as possible.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Guidance attached to any payload that had to be shrunk.
pub const TRUNCATION_GUIDANCE: &str = "Output trimmed to character_limit";

/// A payload whose string fields may be shortened to meet a size budget.
pub trait Truncatable: Serialize {
    /// Every instance of the named field, in a stable scan order.
    fn truncatable_fields(&mut self, field: &str) -> Vec<&mut String>;

    /// Flag the payload as truncated and attach `guidance`.
    fn mark_truncated(&mut self, guidance: &str);
}

/// Shrink `payload` until it serializes to at most `limit_bytes`.
///
/// Returns `Ok(true)` if the payload was over budget (and is now marked
/// truncated), `Ok(false)` if it already fit. When every priority field is
/// exhausted and the payload is still too large it stays marked truncated;
/// the ceiling is best-effort, not guaranteed.
///
/// # Errors
///
/// Returns [`crate::SiftError::Serialize`] if the payload cannot be
/// serialized.
pub fn enforce_limit<P>(payload: &mut P, limit_bytes: usize, priority: &[&str]) -> Result<bool>
where
    P: Truncatable + ?Sized,
{
    let initial = serialized_len(payload)?;
    if initial <= limit_bytes {
        return Ok(false);
    }

    // Marked up front so the markers count against the budget.
    payload.mark_truncated(TRUNCATION_GUIDANCE);

    for field in priority {
        while shrink_longest(payload, field) {
            if serialized_len(payload)? <= limit_bytes {
                tracing::debug!(initial, limit_bytes, field, "payload fits after shrinking");
                return Ok(true);
            }
        }
    }

    tracing::debug!(
        initial,
        limit_bytes,
        remaining = serialized_len(payload)?,
        "payload still over budget after exhausting shrink targets"
    );
    Ok(true)
}

/// Halve the longest non-empty instance of `field`. Returns `false` once
/// every instance is empty.
fn shrink_longest<P>(payload: &mut P, field: &str) -> bool
where
    P: Truncatable + ?Sized,
{
    let mut fields = payload.truncatable_fields(field);
    let mut longest: Option<(usize, usize)> = None;
    for (position, value) in fields.iter().enumerate() {
        let len = value.chars().count();
        if len > 0 && longest.is_none_or(|(_, best)| len > best) {
            longest = Some((position, len));
        }
    }
    match longest {
        Some((position, len)) => {
            truncate_chars(fields[position], len / 2);
            true
        }
        None => false,
    }
}

/// Truncate `value` to its first `keep` characters.
fn truncate_chars(value: &mut String, keep: usize) {
    let cut = value
        .char_indices()
        .nth(keep)
        .map_or(value.len(), |(index, _)| index);
    value.truncate(cut);
}

fn serialized_len<P>(payload: &P) -> Result<usize>
where
    P: Serialize + ?Sized,
{
    Ok(serde_json::to_vec(payload)?.len())
}

impl Truncatable for Value {
    /// Strings stored under an object key equal to `field`, including the
    /// string elements of an array under that key. Objects are scanned in
    /// document order, arrays in element order.
    fn truncatable_fields(&mut self, field: &str) -> Vec<&mut String> {
        let mut found = Vec::new();
        collect_fields(self, field, &mut found);
        found
    }

    /// Sets `truncated` and `guidance` on a top-level object; other values
    /// have nowhere to carry the flag.
    fn mark_truncated(&mut self, guidance: &str) {
        if let Value::Object(map) = self {
            map.insert("truncated".to_owned(), Value::Bool(true));
            map.insert("guidance".to_owned(), Value::String(guidance.to_owned()));
        }
    }
}

fn collect_fields<'v>(value: &'v mut Value, field: &str, found: &mut Vec<&'v mut String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key != field {
                    collect_fields(child, field, found);
                    continue;
                }
                match child {
                    Value::String(text) => found.push(text),
                    Value::Array(elements) => {
                        for element in elements.iter_mut() {
                            match element {
                                Value::String(text) => found.push(text),
                                other => collect_fields(other, field, found),
                            }
                        }
                    }
                    other => collect_fields(other, field, found),
                }
            }
        }
        Value::Array(elements) => {
            for element in elements.iter_mut() {
                collect_fields(element, field, found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn size(value: &Value) -> usize {
        serde_json::to_vec(value).expect("serialize").len()
    }

    #[test]
    fn payload_within_limit_is_untouched() {
        let mut payload = json!({"results": [{"title": "short"}]});
        let before = payload.clone();
        let truncated = enforce_limit(&mut payload, 1_000, &["title"]).expect("enforce");
        assert!(!truncated);
        assert_eq!(payload, before);
    }

    #[test]
    fn oversized_payload_is_shrunk_and_marked_once() {
        let mut payload = json!({
            "results": [
                {"title": "a".repeat(100), "snippet": "b".repeat(150)},
                {"title": "c".repeat(100), "snippet": "d".repeat(100)},
            ]
        });
        assert!(size(&payload) >= 450);

        let truncated = enforce_limit(&mut payload, 60, &["snippet", "title"]).expect("enforce");
        assert!(truncated);
        assert_eq!(payload["truncated"], json!(true));
        assert_eq!(payload["guidance"], json!(TRUNCATION_GUIDANCE));

        let snippets_exhausted = payload
            .truncatable_fields("snippet")
            .into_iter()
            .all(|s| s.is_empty());
        let titles_exhausted = payload
            .truncatable_fields("title")
            .into_iter()
            .all(|s| s.is_empty());
        assert!(size(&payload) <= 60 || (snippets_exhausted && titles_exhausted));

        let text = serde_json::to_string(&payload).expect("serialize");
        assert_eq!(text.matches("guidance").count(), 1);
    }

    #[test]
    fn higher_priority_field_is_exhausted_first() {
        let mut payload = json!({
            "items": [{"snippet": "s".repeat(200), "title": "t".repeat(40)}]
        });
        // The truncation markers add 64 bytes, so the snippet must give up 84.
        let limit = size(&payload) - 20;
        enforce_limit(&mut payload, limit, &["snippet", "title"]).expect("enforce");
        let snippet = payload["items"][0]["snippet"].as_str().expect("snippet");
        let title = payload["items"][0]["title"].as_str().expect("title");
        assert_eq!(snippet.len(), 100);
        assert_eq!(title.len(), 40);
    }

    #[test]
    fn longest_value_is_halved_first() {
        let mut payload = json!({
            "items": [{"snippet": "x".repeat(10)}, {"snippet": "y".repeat(30)}]
        });
        assert!(shrink_longest(&mut payload, "snippet"));
        assert_eq!(payload["items"][0]["snippet"], json!("x".repeat(10)));
        assert_eq!(payload["items"][1]["snippet"], json!("y".repeat(15)));
    }

    #[test]
    fn equal_lengths_shrink_first_encountered() {
        let mut payload = json!({
            "items": [{"snippet": "aaaa"}, {"snippet": "bbbb"}]
        });
        assert!(shrink_longest(&mut payload, "snippet"));
        assert_eq!(payload["items"][0]["snippet"], json!("aa"));
        assert_eq!(payload["items"][1]["snippet"], json!("bbbb"));
    }

    #[test]
    fn equal_lengths_resolved_by_document_order_not_key_order() {
        let mut payload = json!({
            "zz": {"snippet": "b".repeat(200)},
            "aa": {"snippet": "a".repeat(200)},
        });
        let limit = size(&payload) - 30;
        assert!(enforce_limit(&mut payload, limit, &["snippet"]).expect("enforce"));
        assert_eq!(payload["zz"]["snippet"].as_str().map(str::len), Some(100));
        assert_eq!(payload["aa"]["snippet"].as_str().map(str::len), Some(200));
    }

    #[test]
    fn single_char_shrinks_to_empty_then_reports_exhausted() {
        let mut payload = json!({"snippet": "z"});
        assert!(shrink_longest(&mut payload, "snippet"));
        assert_eq!(payload["snippet"], json!(""));
        assert!(!shrink_longest(&mut payload, "snippet"));
    }

    #[test]
    fn array_of_strings_under_field_is_truncatable() {
        let mut payload = json!({"tags": ["alpha", "beta-long-tag"]});
        let fields = payload.truncatable_fields("tags");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut value = String::from("héllo wörld");
        truncate_chars(&mut value, 5);
        assert_eq!(value, "héllo");
        truncate_chars(&mut value, 0);
        assert!(value.is_empty());
    }

    #[test]
    fn unshrinkable_payload_still_marked_truncated() {
        let mut payload = json!({"id": "x".repeat(200)});
        let truncated = enforce_limit(&mut payload, 10, &["snippet"]).expect("enforce");
        assert!(truncated);
        assert_eq!(payload["truncated"], json!(true));
        assert_eq!(payload["id"], json!("x".repeat(200)));
    }
}
