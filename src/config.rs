//! Batch execution and fan-out configuration.
//!
//! [`BatchOptions`] is the partial, caller-facing form: every field is
//! optional and out-of-range values are clamped rather than rejected.
//! [`BatchOptions::resolve`] turns it into an immutable [`ExecutionPolicy`]
//! that the executor consumes. [`SiftConfig`] groups batch defaults with
//! fan-out settings and loads from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiftError};

/// Default number of concurrently running work items.
pub const DEFAULT_CONCURRENCY: usize = 5;
/// Upper bound for the concurrency option.
pub const MAX_CONCURRENCY: usize = 10;
/// Default number of retries after the first attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 0;
/// Upper bound for the retry-count option.
pub const MAX_RETRY_COUNT: u32 = 6;
/// Default base delay before a retry, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;
/// Default cap on raw queries accepted by one fan-out call.
pub const DEFAULT_MAX_QUERIES: usize = 10;
/// Default byte ceiling for a serialized fan-out report.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 25_000;

/// Partial batch execution options.
///
/// Numeric fields are `f64` so that values arriving from JSON tool arguments
/// can be accepted as-is: fractional values are truncated, out-of-range
/// values are clamped, and non-finite values fall back to the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Maximum concurrently running items, clamped to `1..=10`.
    pub concurrency: Option<f64>,
    /// Retries after the first attempt, clamped to `0..=6`.
    #[serde(alias = "retryCount")]
    pub retry_count: Option<f64>,
    /// Base delay between attempts in milliseconds, at least 0.
    #[serde(alias = "retryDelayMs")]
    pub retry_delay_ms: Option<f64>,
    /// Double the delay on every retry when true.
    #[serde(alias = "exponentialBackoff")]
    pub exponential_backoff: Option<bool>,
    /// Keep running remaining items after a failure when true.
    /// When false the batch runs strictly sequentially and stops at the
    /// first exhausted item.
    #[serde(alias = "continueOnError")]
    pub continue_on_error: Option<bool>,
    /// Optional deadline per attempt in milliseconds. Unset means an
    /// attempt may run indefinitely.
    #[serde(alias = "itemTimeoutMs")]
    pub item_timeout_ms: Option<f64>,
}

impl BatchOptions {
    /// Set the requested concurrency.
    pub fn concurrency(mut self, value: usize) -> Self {
        self.concurrency = Some(value as f64);
        self
    }

    /// Set the retry count.
    pub fn retry_count(mut self, value: u32) -> Self {
        self.retry_count = Some(f64::from(value));
        self
    }

    /// Set the base retry delay in milliseconds.
    pub fn retry_delay_ms(mut self, value: u64) -> Self {
        self.retry_delay_ms = Some(value as f64);
        self
    }

    /// Enable or disable exponential backoff.
    pub fn exponential_backoff(mut self, value: bool) -> Self {
        self.exponential_backoff = Some(value);
        self
    }

    /// Enable or disable continue-on-error.
    pub fn continue_on_error(mut self, value: bool) -> Self {
        self.continue_on_error = Some(value);
        self
    }

    /// Set a per-attempt deadline in milliseconds.
    pub fn item_timeout_ms(mut self, value: u64) -> Self {
        self.item_timeout_ms = Some(value as f64);
        self
    }

    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: &BatchOptions) -> BatchOptions {
        BatchOptions {
            concurrency: self.concurrency.or(fallback.concurrency),
            retry_count: self.retry_count.or(fallback.retry_count),
            retry_delay_ms: self.retry_delay_ms.or(fallback.retry_delay_ms),
            exponential_backoff: self.exponential_backoff.or(fallback.exponential_backoff),
            continue_on_error: self.continue_on_error.or(fallback.continue_on_error),
            item_timeout_ms: self.item_timeout_ms.or(fallback.item_timeout_ms),
        }
    }

    /// Apply defaults and clamping, producing the policy for one batch.
    pub fn resolve(&self) -> ExecutionPolicy {
        let concurrency = resolve_number(
            self.concurrency,
            DEFAULT_CONCURRENCY as f64,
            1.0,
            MAX_CONCURRENCY as f64,
        ) as usize;
        let retry_count = resolve_number(
            self.retry_count,
            f64::from(DEFAULT_RETRY_COUNT),
            0.0,
            f64::from(MAX_RETRY_COUNT),
        ) as u32;
        let retry_delay_ms = resolve_number(
            self.retry_delay_ms,
            DEFAULT_RETRY_DELAY_MS as f64,
            0.0,
            u64::MAX as f64,
        ) as u64;
        let item_timeout = self
            .item_timeout_ms
            .filter(|ms| ms.is_finite() && *ms >= 1.0)
            .map(|ms| Duration::from_millis(ms.trunc() as u64));

        ExecutionPolicy {
            concurrency,
            retry_count,
            retry_delay: Duration::from_millis(retry_delay_ms),
            exponential_backoff: self.exponential_backoff.unwrap_or(true),
            continue_on_error: self.continue_on_error.unwrap_or(true),
            item_timeout,
        }
    }
}

/// Truncate and clamp `value`, falling back to `default` when absent or
/// non-finite.
fn resolve_number(value: Option<f64>, default: f64, min: f64, max: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.trunc().clamp(min, max),
        _ => default,
    }
}

/// Fully resolved execution policy for one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Requested concurrency after clamping.
    pub concurrency: usize,
    /// Retries after the first attempt.
    pub retry_count: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// Whether the delay doubles on each retry.
    pub exponential_backoff: bool,
    /// Whether the batch keeps going after an item is exhausted.
    pub continue_on_error: bool,
    /// Optional per-attempt deadline.
    pub item_timeout: Option<Duration>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        BatchOptions::default().resolve()
    }
}

impl ExecutionPolicy {
    /// Number of worker slots actually used.
    ///
    /// Fail-fast batches always run with a single slot so the stop point is
    /// the first exhausted item in index order.
    pub fn effective_concurrency(&self) -> usize {
        if self.continue_on_error {
            self.concurrency
        } else {
            1
        }
    }

    /// Total attempts an item gets before it is recorded as failed.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count + 1
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (0-based): `retry_delay * 2^attempt` with exponential backoff,
    /// otherwise the flat `retry_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.retry_delay;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }
}

/// Fan-out settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutSettings {
    /// Maximum number of raw queries accepted per call.
    pub max_queries: usize,
    /// Byte ceiling for the serialized report.
    pub output_limit_bytes: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_queries: DEFAULT_MAX_QUERIES,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Default batch options for fan-out calls.
    pub batch: BatchOptions,
    /// Fan-out limits.
    pub fanout: FanoutSettings,
}

impl SiftConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`SiftError::Config`] if the input is not valid TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SiftError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SiftError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates this configuration.
    ///
    /// Batch options are clamped rather than rejected, so only the fan-out
    /// limits are checked:
    /// - `max_queries` must be greater than 0
    /// - `output_limit_bytes` must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.fanout.max_queries == 0 {
            return Err(SiftError::Config(
                "max_queries must be greater than 0".into(),
            ));
        }
        if self.fanout.output_limit_bytes == 0 {
            return Err(SiftError::Config(
                "output_limit_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
