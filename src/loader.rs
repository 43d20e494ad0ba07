//! Scoped data loader: one window's inputs for one location.
//!
//! The loader reads only the anchor snapshot and the deltas dated inside the
//! window, normalizes raw item ids through the catalog, drops out-of-scope
//! items, and sums movements per canonical item and day.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Weekday};
use tracing::debug;

use crate::catalog::CatalogResolver;
use crate::diagnostics::{Diagnostics, OrphanDeltaWarning};
use crate::error::ReconstructionError;
use crate::ids::ItemId;
use crate::model::{AnalysisWindow, DayMovements, DeltaKind};
use crate::retry::RetryPolicy;
use crate::storage::InventorySource;
use crate::time::{week_of, DateRange};

/// Everything the simulator needs for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInputs {
    pub window: AnalysisWindow,
    /// Opening stock per canonical item on the window's first day.
    pub anchors: BTreeMap<ItemId, i64>,
    /// Summed movements per anchored item and day.
    pub movements: BTreeMap<ItemId, BTreeMap<NaiveDate, DayMovements>>,
    /// Week starts (per the run's week start day) in which the location
    /// reported any inward row at all.
    pub inward_feed_weeks: BTreeSet<NaiveDate>,
    /// Delta rows for items that are known at the location but have no
    /// snapshot on this window's anchor date.
    pub unanchored_rows: BTreeMap<ItemId, usize>,
}

impl WindowInputs {
    /// Returns true if the location reported inward rows in the week of `date`.
    #[must_use]
    pub fn has_inward_feed(&self, week: NaiveDate) -> bool {
        self.inward_feed_weeks.contains(&week)
    }

    /// Movements for one item; empty when the item had no activity.
    #[must_use]
    pub fn movements_for(&self, item: &ItemId) -> Option<&BTreeMap<NaiveDate, DayMovements>> {
        self.movements.get(item)
    }
}

/// Which items a load may return.
#[derive(Debug, Clone, Copy)]
pub struct LoadScope<'a> {
    /// Canonical, in-scope items with at least one snapshot at the location.
    pub known_items: &'a BTreeSet<ItemId>,
    /// Optional item batch; items outside it are skipped silently.
    pub batch: Option<&'a BTreeSet<ItemId>>,
    /// Whether this load reports orphan deltas. Only one batch per location
    /// should, so warnings are not repeated.
    pub report_orphans: bool,
}

impl LoadScope<'_> {
    fn admits(&self, item: &ItemId) -> bool {
        self.batch.map_or(true, |b| b.contains(item))
    }
}

/// Loads window inputs from an `InventorySource`.
pub struct ScopedLoader<'a> {
    source: &'a dyn InventorySource,
    catalog: &'a dyn CatalogResolver,
    retry: RetryPolicy,
    week_start: Weekday,
}

impl<'a> ScopedLoader<'a> {
    pub fn new(
        source: &'a dyn InventorySource,
        catalog: &'a dyn CatalogResolver,
        retry: RetryPolicy,
        week_start: Weekday,
    ) -> Self {
        Self {
            source,
            catalog,
            retry,
            week_start,
        }
    }

    /// Canonical, in-scope items ever snapshotted at the window's location.
    pub fn known_items(
        &self,
        location: &crate::ids::LocationId,
    ) -> Result<BTreeSet<ItemId>, ReconstructionError> {
        let raw = self
            .retry
            .run("snapshot_items", || self.source.snapshot_items(location))?;
        Ok(raw
            .iter()
            .map(|item| self.catalog.canonical(item))
            .filter(|item| self.catalog.in_scope(item))
            .collect())
    }

    /// Reports in-scope deltas in `range` whose item is not in `known_items`
    /// as orphaned.
    ///
    /// Covers the days no window loads: the whole horizon for a location
    /// without snapshots, or the days before its first snapshot.
    pub fn report_orphans(
        &self,
        location: &crate::ids::LocationId,
        range: &DateRange,
        known_items: &BTreeSet<ItemId>,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ReconstructionError> {
        let deltas = self
            .retry
            .run("deltas_between", || self.source.deltas_between(location, range))?;
        let mut orphan_rows: BTreeMap<ItemId, usize> = BTreeMap::new();
        for delta in deltas.iter().filter(|d| range.contains(d.date)) {
            let item = self.catalog.canonical(&delta.item);
            if self.catalog.in_scope(&item) && !known_items.contains(&item) {
                *orphan_rows.entry(item).or_insert(0) += 1;
            }
        }
        for (item, rows) in orphan_rows {
            diagnostics.orphan_delta(OrphanDeltaWarning {
                location: location.clone(),
                item,
                window_start: range.start,
                rows,
            });
        }
        Ok(())
    }

    /// Loads the anchor snapshot and in-window deltas.
    ///
    /// Deltas for items never snapshotted at the location are reported as
    /// `OrphanDeltaWarning`s and dropped.
    pub fn load(
        &self,
        window: &AnalysisWindow,
        scope: LoadScope<'_>,
        diagnostics: &mut Diagnostics,
    ) -> Result<WindowInputs, ReconstructionError> {
        let location = &window.location;

        let snapshots = self
            .retry
            .run("snapshots_on", || self.source.snapshots_on(location, window.start))?;
        let mut anchors: BTreeMap<ItemId, i64> = BTreeMap::new();
        for snapshot in snapshots {
            let item = self.catalog.canonical(&snapshot.item);
            if !self.catalog.in_scope(&item) || !scope.admits(&item) {
                continue;
            }
            let anchor = anchors.entry(item).or_insert(0);
            *anchor = anchor.saturating_add(snapshot.quantity);
        }

        let range = window.range();
        let deltas = self
            .retry
            .run("deltas_between", || self.source.deltas_between(location, &range))?;

        let mut movements: BTreeMap<ItemId, BTreeMap<NaiveDate, DayMovements>> = BTreeMap::new();
        let mut inward_feed_weeks = BTreeSet::new();
        let mut unanchored_rows: BTreeMap<ItemId, usize> = BTreeMap::new();
        let mut orphan_rows: BTreeMap<ItemId, usize> = BTreeMap::new();
        let mut loaded = 0usize;

        for delta in deltas {
            if !range.contains(delta.date) {
                continue;
            }
            // Feed presence is a property of the location, not of one item.
            if delta.kind == DeltaKind::Inward {
                inward_feed_weeks.insert(week_of(delta.date, self.week_start));
            }
            let item = self.catalog.canonical(&delta.item);
            if !self.catalog.in_scope(&item) {
                continue;
            }
            if !scope.known_items.contains(&item) {
                if scope.report_orphans {
                    *orphan_rows.entry(item).or_insert(0) += 1;
                }
                continue;
            }
            if !scope.admits(&item) {
                continue;
            }
            if anchors.contains_key(&item) {
                movements
                    .entry(item)
                    .or_default()
                    .entry(delta.date)
                    .or_default()
                    .add(delta.kind, delta.quantity);
                loaded += 1;
            } else {
                *unanchored_rows.entry(item).or_insert(0) += 1;
            }
        }

        for (item, rows) in orphan_rows {
            diagnostics.orphan_delta(OrphanDeltaWarning {
                location: location.clone(),
                item,
                window_start: window.start,
                rows,
            });
        }

        debug!(
            location = %location,
            window_start = %window.start,
            window_end = %window.end,
            anchored_items = anchors.len(),
            delta_rows = loaded,
            unanchored_items = unanchored_rows.len(),
            "loaded window inputs"
        );

        Ok(WindowInputs {
            window: window.clone(),
            anchors,
            movements,
            inward_feed_weeks,
            unanchored_rows,
        })
    }
}
