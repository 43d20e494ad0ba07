//! Inward (receipt) strategies.
//!
//! The stock roll needs receipts. When the location reports them, they are
//! used as-is; when a week has no inward feed at all, a fallback strategy
//! decides what to assume. Strategies plan a whole week-like sub-period at
//! once, given the opening stock at its first day.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;

use crate::model::DayMovements;
use crate::time::DateRange;

/// One week-like sub-period of an item's window.
#[derive(Debug, Clone, Copy)]
pub struct InwardPeriod<'a> {
    pub range: DateRange,
    /// True (unclamped) opening stock on `range.start`.
    pub opening: i64,
    /// The item's movements for the whole window, keyed by day.
    pub movements: &'a BTreeMap<NaiveDate, DayMovements>,
}

impl<'a> InwardPeriod<'a> {
    /// Movements dated inside the period.
    pub fn days(&self) -> impl Iterator<Item = (&'a NaiveDate, &'a DayMovements)> {
        self.movements.range(self.range.start..=self.range.end)
    }

    #[must_use]
    pub fn total_sales(&self) -> i64 {
        self.days().fold(0i64, |total, (_, m)| total.saturating_add(m.sales))
    }

    #[must_use]
    pub fn first_sale_day(&self) -> Option<NaiveDate> {
        self.days().find(|(_, m)| m.sales > 0).map(|(d, _)| *d)
    }
}

/// Decides the inward quantity per day for a sub-period.
pub trait InwardStrategy: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Inward quantity per day; days without receipts are omitted.
    fn plan(&self, period: &InwardPeriod<'_>) -> BTreeMap<NaiveDate, i64>;

    /// Latest day in the period on which this strategy could add stock,
    /// whatever the opening turns out to be.
    ///
    /// The simulator uses this to stop early once stock can only fall.
    fn last_supply_day(&self, period: &InwardPeriod<'_>) -> Option<NaiveDate>;
}

/// Uses the reported inward rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealInwardFeed;

impl InwardStrategy for RealInwardFeed {
    fn name(&self) -> &'static str {
        "real_feed"
    }

    fn plan(&self, period: &InwardPeriod<'_>) -> BTreeMap<NaiveDate, i64> {
        period
            .days()
            .filter(|(_, m)| m.inward > 0)
            .map(|(d, m)| (*d, m.inward))
            .collect()
    }

    fn last_supply_day(&self, period: &InwardPeriod<'_>) -> Option<NaiveDate> {
        period
            .days()
            .filter(|(_, m)| m.inward > 0)
            .map(|(d, _)| *d)
            .last()
    }
}

/// Estimates receipts as the sales the opening stock could not cover.
///
/// `estimate = max(0, total_sales - max(opening, 0))`, booked on the first
/// day of the period with a sale. Rows reported as inward are ignored: this
/// strategy only runs for periods whose feed is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SalesDeficitEstimator;

impl SalesDeficitEstimator {
    /// The estimated receipt for a period, if any.
    #[must_use]
    pub fn estimate(period: &InwardPeriod<'_>) -> Option<(NaiveDate, i64)> {
        let day = period.first_sale_day()?;
        let deficit = period.total_sales().saturating_sub(period.opening.max(0));
        (deficit > 0).then_some((day, deficit))
    }
}

impl InwardStrategy for SalesDeficitEstimator {
    fn name(&self) -> &'static str {
        "sales_deficit_estimate"
    }

    fn plan(&self, period: &InwardPeriod<'_>) -> BTreeMap<NaiveDate, i64> {
        Self::estimate(period).into_iter().collect()
    }

    fn last_supply_day(&self, period: &InwardPeriod<'_>) -> Option<NaiveDate> {
        period.first_sale_day()
    }
}

/// Assumes no receipts at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInward;

impl InwardStrategy for NoInward {
    fn name(&self) -> &'static str {
        "none"
    }

    fn plan(&self, _period: &InwardPeriod<'_>) -> BTreeMap<NaiveDate, i64> {
        BTreeMap::new()
    }

    fn last_supply_day(&self, _period: &InwardPeriod<'_>) -> Option<NaiveDate> {
        None
    }
}
