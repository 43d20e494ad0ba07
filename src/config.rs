//! Run configuration.
//!
//! A `RunConfig` is plain data: it can be built in code, or deserialized from
//! JSON supplied by whatever loads configuration upstream.

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::{days_between, is_month_start, week_of, DateRange};

/// Dates, besides the horizon end, at which point-in-time quantities are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyframeSchedule {
    /// Only the horizon end.
    #[default]
    None,
    /// Every configured week-start day.
    WeekStart,
    /// The first day of every month.
    MonthStart,
    /// Every `n` days counted from the horizon start (the start included).
    EveryDays(u32),
}

/// What to do for week sub-periods with no inward feed.
///
/// The estimate is opt-in: with it on, a week whose sales exceed its opening
/// stock books an estimated receipt, so stock can rise on sales-only input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InwardFallback {
    /// Treat the period as having no receipts.
    #[default]
    Disabled,
    /// Estimate receipts from the sales deficit.
    EstimateFromSales,
}

/// How negative reconstructed stock is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStockPolicy {
    /// Clamp and log at debug level only.
    #[default]
    Silent,
    /// Clamp, log a warning, and surface an alert in the run report.
    Alert,
}

/// What a location failure does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the location as failed and keep going.
    #[default]
    Isolate,
    /// Cancel remaining work and fail the run.
    FailFast,
}

/// Backoff settings for loader reads and sink flushes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (>= 1.0).
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// Configuration for one reconstruction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// First day to reconstruct (inclusive).
    pub horizon_start: NaiveDate,
    /// Last day to reconstruct (inclusive); always a checkpoint date.
    pub horizon_end: NaiveDate,
    /// First day of the trading week.
    pub week_start: Weekday,
    pub keyframes: KeyframeSchedule,
    pub inward_fallback: InwardFallback,
    pub negative_stock: NegativeStockPolicy,
    pub failure_policy: FailurePolicy,
    pub retry: RetryConfig,
    /// Number of location workers.
    pub workers: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
    /// Split large locations into item batches of this size.
    pub item_batch_size: Option<usize>,
    /// Keep the merged result in memory for the run report.
    pub collect_results: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        let today = chrono::Utc::now().date_naive();
        Self {
            horizon_start: today,
            horizon_end: today,
            week_start: Weekday::Mon,
            keyframes: KeyframeSchedule::None,
            inward_fallback: InwardFallback::Disabled,
            negative_stock: NegativeStockPolicy::Silent,
            failure_policy: FailurePolicy::Isolate,
            retry: RetryConfig::default(),
            workers: 4,
            queue_capacity: 1024,
            item_batch_size: None,
            collect_results: true,
        }
    }
}

impl RunConfig {
    /// Creates a configuration for the given horizon with default policies.
    #[must_use]
    pub fn for_horizon(horizon_start: NaiveDate, horizon_end: NaiveDate) -> Self {
        Self {
            horizon_start,
            horizon_end,
            ..Self::default()
        }
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on malformed JSON or invalid
    /// settings.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// This must be called before constructing a run context.
    pub fn validate(&self) -> Result<(), ValidationError> {
        DateRange::new(self.horizon_start, self.horizon_end)?;
        if self.workers == 0 {
            return Err(invalid("workers must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be > 0"));
        }
        if self.item_batch_size == Some(0) {
            return Err(invalid("item_batch_size must be > 0 when set"));
        }
        if self.keyframes == KeyframeSchedule::EveryDays(0) {
            return Err(invalid("keyframe interval must be > 0"));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(invalid("retry.multiplier must be >= 1.0"));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.initial_delay_ms must not exceed retry.max_delay_ms"));
        }
        Ok(())
    }

    /// The reconstruction horizon.
    #[must_use]
    pub fn horizon(&self) -> DateRange {
        DateRange {
            start: self.horizon_start,
            end: self.horizon_end,
        }
    }

    /// Returns true if `date` is a checkpoint date for this run.
    #[must_use]
    pub fn is_checkpoint(&self, date: NaiveDate) -> bool {
        if !self.horizon().contains(date) {
            return false;
        }
        if date == self.horizon_end {
            return true;
        }
        match self.keyframes {
            KeyframeSchedule::None => false,
            KeyframeSchedule::WeekStart => week_of(date, self.week_start) == date,
            KeyframeSchedule::MonthStart => is_month_start(date),
            KeyframeSchedule::EveryDays(n) => {
                n > 0 && days_between(self.horizon_start, date) % i64::from(n) == 0
            }
        }
    }
}

fn invalid(reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.to_string(),
    }
}
