//! Daily simulator: the stock roll across one window.
//!
//! For each anchored item the opening stock of the window's first day is the
//! snapshot quantity. Each later day's opening is the previous opening plus
//! that previous day's returns and inward, minus its sales and outward. An
//! item is live on a day iff its opening stock is positive.
//!
//! Inward quantities are planned per week-like sub-period by an
//! `InwardStrategy`: the real feed when the location reported any inward
//! rows that week, otherwise the configured fallback.

pub mod inward;

pub use inward::{InwardPeriod, InwardStrategy, NoInward, RealInwardFeed, SalesDeficitEstimator};

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::trace;

use crate::aggregate::LocationAccumulator;
use crate::config::RunConfig;
use crate::diagnostics::{Diagnostics, NegativeStockAlert};
use crate::ids::ItemId;
use crate::loader::WindowInputs;
use crate::model::{DailyState, DayMovements};
use crate::time::{week_of, DateRange};

/// Work counters for one simulated window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub items: usize,
    /// Item-days stepped through.
    pub days_simulated: u64,
    /// Item-days skipped by early termination.
    pub days_skipped: u64,
}

impl WindowStats {
    pub fn add(&mut self, other: Self) {
        self.items += other.items;
        self.days_simulated += other.days_simulated;
        self.days_skipped += other.days_skipped;
    }
}

/// Runs the stock roll for every anchored item of a window.
pub struct DailySimulator<'a> {
    config: &'a RunConfig,
    real_feed: &'a dyn InwardStrategy,
    fallback: &'a dyn InwardStrategy,
}

impl<'a> DailySimulator<'a> {
    pub fn new(
        config: &'a RunConfig,
        real_feed: &'a dyn InwardStrategy,
        fallback: &'a dyn InwardStrategy,
    ) -> Self {
        Self {
            config,
            real_feed,
            fallback,
        }
    }

    /// Simulates every anchored item in `inputs`, folding each reconstructed
    /// day that falls inside the run horizon into `acc`.
    pub fn simulate_window(
        &self,
        inputs: &WindowInputs,
        acc: &mut LocationAccumulator,
        diagnostics: &mut Diagnostics,
    ) -> WindowStats {
        let mut stats = WindowStats::default();
        let window = inputs.window.range();
        let Some(recorded) = window.intersection(&self.config.horizon()) else {
            return stats;
        };

        let periods: Vec<(DateRange, &dyn InwardStrategy)> = window
            .split_weeks(self.config.week_start)
            .into_iter()
            .map(|period| {
                let week = week_of(period.start, self.config.week_start);
                let strategy = if inputs.has_inward_feed(week) {
                    self.real_feed
                } else {
                    self.fallback
                };
                (period, strategy)
            })
            .collect();

        let empty = BTreeMap::new();
        for (item, &anchor) in &inputs.anchors {
            let movements = inputs.movements_for(item).unwrap_or(&empty);
            let item_stats = self.simulate_item(
                inputs,
                item,
                anchor,
                movements,
                &periods,
                recorded,
                acc,
                diagnostics,
            );
            stats.add(item_stats);
        }
        stats
    }

    #[allow(clippy::too_many_arguments)]
    fn simulate_item(
        &self,
        inputs: &WindowInputs,
        item: &ItemId,
        anchor: i64,
        movements: &BTreeMap<NaiveDate, DayMovements>,
        periods: &[(DateRange, &dyn InwardStrategy)],
        recorded: DateRange,
        acc: &mut LocationAccumulator,
        diagnostics: &mut Diagnostics,
    ) -> WindowStats {
        let window = &inputs.window;
        let location = &window.location;
        let mut stats = WindowStats {
            items: 1,
            ..WindowStats::default()
        };

        let last_inflow = last_inflow_day(movements, periods);
        let mut opening = anchor;
        let mut negative_seen = false;

        for (period, strategy) in periods {
            let plan = strategy.plan(&InwardPeriod {
                range: *period,
                opening,
                movements,
            });
            trace!(
                location = %location,
                item = %item,
                period_start = %period.start,
                strategy = strategy.name(),
                planned_inward = plan.values().fold(0i64, |t, q| t.saturating_add(*q)),
                "planned inward"
            );

            for day in period.days() {
                stats.days_simulated += 1;
                let state = DailyState::new(location, item, day, opening);
                if recorded.contains(day) {
                    acc.fold(&state, self.config.is_checkpoint(day), window.start);
                }

                if opening < 0 && !negative_seen {
                    negative_seen = true;
                    self.report_negative(inputs, item, day, opening, diagnostics);
                }

                // Stock can only fall from here: the rest of the window is not live.
                if opening <= 0 && last_inflow.map_or(true, |last| last < day) {
                    stats.days_skipped += self.finish_depleted(
                        inputs,
                        item,
                        day,
                        opening,
                        negative_seen,
                        movements,
                        recorded,
                        acc,
                        diagnostics,
                    );
                    return stats;
                }

                let moved = movements.get(&day).copied().unwrap_or_default();
                opening = opening
                    .saturating_add(moved.net_without_inward())
                    .saturating_add(plan.get(&day).copied().unwrap_or(0));
            }
        }
        stats
    }

    /// Handles the days after `day` for an item whose stock can no longer
    /// rise. Returns the number of skipped days.
    #[allow(clippy::too_many_arguments)]
    fn finish_depleted(
        &self,
        inputs: &WindowInputs,
        item: &ItemId,
        day: NaiveDate,
        opening: i64,
        negative_seen: bool,
        movements: &BTreeMap<NaiveDate, DayMovements>,
        recorded: DateRange,
        acc: &mut LocationAccumulator,
        diagnostics: &mut Diagnostics,
    ) -> u64 {
        let window = &inputs.window;
        let Some(next) = day.succ_opt().filter(|d| *d <= window.end) else {
            return 0;
        };
        let rest = DateRange {
            start: next,
            end: window.end,
        };

        // Every remaining day is non-live with a clamped quantity of zero.
        if let Some(rest_recorded) = rest.intersection(&recorded) {
            for checkpoint in rest_recorded.days().filter(|d| self.config.is_checkpoint(*d)) {
                acc.record_checkpoint(item, checkpoint, 0, window.start);
            }
        }

        // Find where the stock first dips below zero, so alerts match a full roll.
        if !negative_seen {
            let mut running = opening;
            for (moved_on, moved) in movements.range(day..window.end) {
                running = running.saturating_add(moved.net_without_inward());
                if running < 0 {
                    if let Some(first_negative) = moved_on.succ_opt() {
                        self.report_negative(inputs, item, first_negative, running, diagnostics);
                    }
                    break;
                }
            }
        }

        rest.len_days()
    }

    fn report_negative(
        &self,
        inputs: &WindowInputs,
        item: &ItemId,
        date: NaiveDate,
        quantity: i64,
        diagnostics: &mut Diagnostics,
    ) {
        diagnostics.negative_stock(
            NegativeStockAlert {
                location: inputs.window.location.clone(),
                item: item.clone(),
                date,
                quantity,
            },
            self.config.negative_stock,
        );
    }
}

/// Latest day on which anything could add stock to the item.
fn last_inflow_day(
    movements: &BTreeMap<NaiveDate, DayMovements>,
    periods: &[(DateRange, &dyn InwardStrategy)],
) -> Option<NaiveDate> {
    let last_return = movements
        .iter()
        .rev()
        .find(|(_, m)| m.returns > 0)
        .map(|(d, _)| *d);
    let last_planned = periods
        .iter()
        .filter_map(|(range, strategy)| {
            // Opening does not affect which days a strategy could supply on.
            strategy.last_supply_day(&InwardPeriod {
                range: *range,
                opening: 0,
                movements,
            })
        })
        .max();
    last_return.max(last_planned)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use chrono::Weekday;

    use crate::config::{KeyframeSchedule, NegativeStockPolicy};
    use crate::ids::LocationId;
    use crate::model::{AnalysisWindow, DeltaKind};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn config(end: u32) -> RunConfig {
        let mut c = RunConfig::for_horizon(d(1), d(end));
        c.week_start = Weekday::Mon;
        c
    }

    fn inputs(
        start: u32,
        end: u32,
        anchor: i64,
        rows: &[(u32, DeltaKind, i64)],
    ) -> WindowInputs {
        let item = ItemId::from("A");
        let mut movements: BTreeMap<NaiveDate, DayMovements> = BTreeMap::new();
        let mut inward_feed_weeks = BTreeSet::new();
        for (day, kind, qty) in rows {
            if *kind == DeltaKind::Inward {
                inward_feed_weeks.insert(week_of(d(*day), Weekday::Mon));
            }
            movements.entry(d(*day)).or_default().add(*kind, *qty);
        }
        WindowInputs {
            window: AnalysisWindow {
                location: LocationId::from("1"),
                start: d(start),
                end: d(end),
            },
            anchors: [(item.clone(), anchor)].into_iter().collect(),
            movements: [(item, movements)].into_iter().collect(),
            inward_feed_weeks,
            unanchored_rows: BTreeMap::new(),
        }
    }

    fn run(
        config: &RunConfig,
        inputs: &WindowInputs,
        fallback: &dyn InwardStrategy,
    ) -> (crate::aggregate::LocationRecords, Diagnostics, WindowStats) {
        let sim = DailySimulator::new(config, &RealInwardFeed, fallback);
        let mut acc = LocationAccumulator::new(inputs.window.location.clone());
        let mut diag = Diagnostics::new();
        let stats = sim.simulate_window(inputs, &mut acc, &mut diag);
        (acc.into_records(), diag, stats)
    }

    fn live_days(records: &crate::aggregate::LocationRecords) -> Vec<NaiveDate> {
        records.live_days.iter().map(|r| r.date).collect()
    }

    #[test]
    fn sales_roll_into_the_following_day() {
        let c = config(6);
        let inputs = inputs(1, 6, 10, &[(2, DeltaKind::Sale, 3), (5, DeltaKind::Sale, 8)]);
        let (records, _, _) = run(&c, &inputs, &NoInward);

        assert_eq!(live_days(&records), vec![d(1), d(2), d(3), d(4), d(5)]);
        assert_eq!(records.checkpoints.len(), 1);
        assert_eq!(records.checkpoints[0].date, d(6));
        assert_eq!(records.checkpoints[0].quantity, 0);
    }

    #[test]
    fn keyframes_capture_intermediate_quantities() {
        let mut c = config(6);
        c.keyframes = KeyframeSchedule::EveryDays(1);
        let inputs = inputs(1, 6, 10, &[(2, DeltaKind::Sale, 3), (5, DeltaKind::Sale, 8)]);
        let (records, _, _) = run(&c, &inputs, &NoInward);

        let quantities: Vec<_> = records.checkpoints.iter().map(|r| r.quantity).collect();
        assert_eq!(quantities, vec![10, 10, 7, 7, 7, 0]);
    }

    #[test]
    fn all_movement_kinds_apply() {
        let mut c = config(4);
        c.keyframes = KeyframeSchedule::EveryDays(1);
        let inputs = inputs(
            1,
            4,
            5,
            &[
                (1, DeltaKind::Sale, 2),
                (1, DeltaKind::Return, 1),
                (2, DeltaKind::Outward, 3),
                (2, DeltaKind::Inward, 10),
            ],
        );
        let (records, _, _) = run(&c, &inputs, &NoInward);
        let quantities: Vec<_> = records.checkpoints.iter().map(|r| r.quantity).collect();
        assert_eq!(quantities, vec![5, 4, 11, 11]);
    }

    #[test]
    fn estimated_inward_fills_week_without_feed() {
        // 2024-01-01 is a Monday: the whole window is one week.
        let mut c = config(7);
        c.keyframes = KeyframeSchedule::EveryDays(1);
        let inputs = inputs(1, 7, 5, &[(3, DeltaKind::Sale, 4), (5, DeltaKind::Sale, 8)]);
        let (records, _, _) = run(&c, &inputs, &SalesDeficitEstimator);

        // Estimate 7 lands on day 3 before its sale: 5 + 7 - 4 = 8, then 8 - 8 = 0.
        let quantities: Vec<_> = records.checkpoints.iter().map(|r| r.quantity).collect();
        assert_eq!(quantities, vec![5, 5, 5, 8, 8, 0, 0]);
        assert_eq!(live_days(&records), vec![d(1), d(2), d(3), d(4), d(5)]);
    }

    #[test]
    fn real_feed_takes_precedence_over_estimate() {
        let mut c = config(7);
        c.keyframes = KeyframeSchedule::EveryDays(1);
        let inputs = inputs(
            1,
            7,
            5,
            &[(2, DeltaKind::Inward, 1), (3, DeltaKind::Sale, 12)],
        );
        let (records, diag, _) = run(&c, &inputs, &SalesDeficitEstimator);
        let quantities: Vec<_> = records.checkpoints.iter().map(|r| r.quantity).collect();
        // 5, 5, +1 -> 6, -12 -> -6 (clamped)
        assert_eq!(quantities, vec![5, 5, 6, 0, 0, 0, 0]);
        assert!(diag.negative_stock.is_empty(), "silent policy keeps the report clean");
    }

    #[test]
    fn negative_stock_alert_reports_true_quantity() {
        let mut c = config(6);
        c.negative_stock = NegativeStockPolicy::Alert;
        let inputs = inputs(1, 6, 10, &[(2, DeltaKind::Sale, 3), (5, DeltaKind::Sale, 8)]);
        let (_, diag, _) = run(&c, &inputs, &NoInward);
        assert_eq!(diag.negative_stock.len(), 1);
        assert_eq!(diag.negative_stock[0].date, d(6));
        assert_eq!(diag.negative_stock[0].quantity, -1);
    }

    #[test]
    fn early_termination_skips_days_without_changing_output() {
        let mut c = config(31);
        c.keyframes = KeyframeSchedule::WeekStart;
        c.negative_stock = NegativeStockPolicy::Alert;
        let inputs = inputs(1, 31, 0, &[(10, DeltaKind::Sale, 2), (20, DeltaKind::Outward, 1)]);
        let (records, diag, stats) = run(&c, &inputs, &NoInward);

        assert!(records.live_days.is_empty());
        assert_eq!(stats.days_simulated, 1);
        assert_eq!(stats.days_skipped, 30);
        // Mondays 1, 8, 15, 22, 29 plus horizon end 31, all zero.
        let cps: Vec<_> = records.checkpoints.iter().map(|r| (r.date, r.quantity)).collect();
        assert_eq!(
            cps,
            vec![(d(1), 0), (d(8), 0), (d(15), 0), (d(22), 0), (d(29), 0), (d(31), 0)]
        );
        // The alert still lands on the day the roll would first go negative.
        assert_eq!(diag.negative_stock.len(), 1);
        assert_eq!(diag.negative_stock[0].date, d(11));
        assert_eq!(diag.negative_stock[0].quantity, -2);
    }

    #[test]
    fn pending_return_prevents_early_termination() {
        let mut c = config(10);
        c.keyframes = KeyframeSchedule::EveryDays(1);
        let inputs = inputs(1, 10, 0, &[(5, DeltaKind::Return, 2)]);
        let (records, _, stats) = run(&c, &inputs, &NoInward);
        assert_eq!(live_days(&records), vec![d(6), d(7), d(8), d(9), d(10)]);
        assert_eq!(stats.days_skipped, 0);
    }

    #[test]
    fn days_before_horizon_are_simulated_but_not_recorded() {
        let mut c = RunConfig::for_horizon(d(5), d(8));
        c.keyframes = KeyframeSchedule::EveryDays(1);
        let inputs = inputs(1, 8, 4, &[(2, DeltaKind::Sale, 1)]);
        let (records, _, _) = run(&c, &inputs, &NoInward);
        assert_eq!(live_days(&records), vec![d(5), d(6), d(7), d(8)]);
        assert!(records.checkpoints.iter().all(|r| r.quantity == 3));
        assert_eq!(records.checkpoints.first().map(|r| r.date), Some(d(5)));
    }

    #[test]
    fn window_outside_horizon_records_nothing() {
        let c = RunConfig::for_horizon(d(20), d(25));
        let inputs = inputs(1, 10, 4, &[]);
        let (records, _, stats) = run(&c, &inputs, &NoInward);
        assert!(records.live_days.is_empty());
        assert_eq!(stats, WindowStats::default());
    }

    #[test]
    fn extreme_quantities_saturate_instead_of_overflowing() {
        let mut c = config(4);
        c.keyframes = KeyframeSchedule::EveryDays(1);
        let inputs = inputs(
            1,
            4,
            i64::MAX,
            &[
                (1, DeltaKind::Return, 5),
                (2, DeltaKind::Sale, i64::MAX),
                (2, DeltaKind::Sale, i64::MAX),
                (2, DeltaKind::Outward, i64::MAX),
            ],
        );
        let (records, _, _) = run(&c, &inputs, &SalesDeficitEstimator);

        // MAX + 5 holds at MAX; MAX - (MAX + MAX) bottoms out at MAX + MIN = -1.
        let quantities: Vec<_> = records.checkpoints.iter().map(|r| r.quantity).collect();
        assert_eq!(quantities, vec![i64::MAX, i64::MAX, 0, 0]);
        assert_eq!(live_days(&records), vec![d(1), d(2)]);
    }
}
