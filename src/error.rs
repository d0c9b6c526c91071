//! Error types for the sift crate.
//!
//! [`SiftError`] covers failures of the crate's own entry points
//! (validation, configuration, serialization). [`ItemError`] is the typed
//! failure a single work item reports back to the batch executor; it is
//! captured as data and never escapes a batch run.

use std::fmt;

/// Errors returned by sift entry points.
#[derive(Debug, thiserror::Error)]
pub enum SiftError {
    /// Malformed input rejected before any work was dispatched.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A payload could not be serialized for size measurement.
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// I/O error while reading or writing configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for sift results.
pub type Result<T> = std::result::Result<T, SiftError>;

/// Failure reported by a single work item.
///
/// `code` carries a machine-readable classification when the underlying
/// operation has one (for example `rate_limited` or `not_found`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    /// Human-readable failure message.
    pub message: String,
    /// Optional typed error code.
    pub code: Option<String>,
}

impl ItemError {
    /// Create an error with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an error with a message and a typed code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ItemError {}

impl From<String> for ItemError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ItemError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
