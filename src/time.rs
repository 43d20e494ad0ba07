//! Calendar types for day-granular reconstruction.
//!
//! Everything in stockroll is measured in whole days. Ranges are inclusive
//! on both ends because that is how merchandising horizons are stated
//! ("2024-01-01 through 2024-03-31").

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An inclusive range of calendar days: `[start, end]`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use stockroll::DateRange;
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
/// let end = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
/// let week = DateRange::new(start, end).unwrap();
///
/// assert_eq!(week.len_days(), 7);
/// assert!(week.contains(end));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day (inclusive).
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range from two days.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a single-day range.
    #[must_use]
    pub const fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Check if a day falls within this range.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of days in the range (always at least one).
    #[must_use]
    pub fn len_days(&self) -> u64 {
        // start <= end is guaranteed by construction.
        u64::try_from((self.end - self.start).num_days()).unwrap_or(0) + 1
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns the intersection of two ranges, if any.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Iterates over every day in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Splits the range into week-like sub-periods.
    ///
    /// A new sub-period begins on every `week_start` day; the first and last
    /// sub-periods may be partial weeks.
    #[must_use]
    pub fn split_weeks(&self, week_start: Weekday) -> Vec<Self> {
        let mut periods = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            let next_week = next_week_start(current, week_start);
            let end = match next_week.and_then(|d| d.pred_opt()) {
                Some(last) if last < self.end => last,
                _ => self.end,
            };
            periods.push(Self {
                start: current,
                end,
            });
            match end.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        periods
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} ..= {}]", self.start, self.end)
    }
}

/// Returns the most recent `week_start` day on or before `date`.
#[must_use]
pub fn week_of(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset = (7 + date.weekday().num_days_from_monday()
        - week_start.num_days_from_monday())
        % 7;
    date.checked_sub_days(Days::new(u64::from(offset)))
        .unwrap_or(date)
}

/// Returns the first `week_start` day strictly after `date`.
fn next_week_start(date: NaiveDate, week_start: Weekday) -> Option<NaiveDate> {
    week_of(date, week_start).checked_add_days(Days::new(7))
}

/// Returns true if `date` is the first day of its month.
#[must_use]
pub fn is_month_start(date: NaiveDate) -> bool {
    date.day() == 1
}

/// Number of whole days from `from` to `to` (negative if `to` is earlier).
#[must_use]
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}
