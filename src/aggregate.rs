//! Result aggregation and flushing.
//!
//! Each worker owns one `LocationAccumulator` per job; nothing here is
//! shared between workers. When a job's windows are done the accumulator
//! becomes `LocationRecords`, which are written to the sink as one unit and
//! then merged into the run-wide `ReconstructionResult`. Item batches of a
//! location are absorbed into one `LocationRecords` before that write.

use std::collections::{BTreeMap, BTreeSet};

use blake3::Hasher;
use chrono::NaiveDate;
use tracing::debug;

use crate::error::ReconstructionError;
use crate::ids::{ItemId, LocationId};
use crate::model::{CheckpointQuantityRecord, DailyState, LiveDayRecord};
use crate::retry::RetryPolicy;
use crate::storage::RecordSink;
use crate::time::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CheckpointValue {
    window_start: NaiveDate,
    quantity: i64,
}

/// Per-worker buffer for one location (or one item batch of a location).
#[derive(Debug)]
pub struct LocationAccumulator {
    location: LocationId,
    live: BTreeMap<ItemId, BTreeSet<NaiveDate>>,
    checkpoints: BTreeMap<(ItemId, NaiveDate), CheckpointValue>,
}

impl LocationAccumulator {
    #[must_use]
    pub fn new(location: LocationId) -> Self {
        Self {
            location,
            live: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn location(&self) -> &LocationId {
        &self.location
    }

    /// Folds one day of simulator state into the buffer.
    ///
    /// Checkpoint quantities are clamped to zero. If two windows ever write
    /// the same checkpoint, the one anchored on the later snapshot wins.
    pub fn fold(&mut self, state: &DailyState<'_>, checkpoint: bool, window_start: NaiveDate) {
        if state.is_live {
            self.live
                .entry(state.item.clone())
                .or_default()
                .insert(state.date);
        }
        if checkpoint {
            self.record_checkpoint(state.item, state.date, state.recorded_quantity(), window_start);
        }
    }

    /// Records a checkpoint quantity for a day the simulator did not step
    /// through (after early termination).
    pub fn record_checkpoint(
        &mut self,
        item: &ItemId,
        date: NaiveDate,
        quantity: i64,
        window_start: NaiveDate,
    ) {
        let value = CheckpointValue {
            window_start,
            quantity: quantity.max(0),
        };
        self.checkpoints
            .entry((item.clone(), date))
            .and_modify(|existing| {
                if window_start >= existing.window_start {
                    *existing = value;
                }
            })
            .or_insert(value);
    }

    /// Number of buffered live days.
    #[must_use]
    pub fn live_day_count(&self) -> usize {
        self.live.values().map(BTreeSet::len).sum()
    }

    /// Converts the buffer into sorted output records.
    #[must_use]
    pub fn into_records(self) -> LocationRecords {
        let location = self.location;
        let live_days = self
            .live
            .into_iter()
            .flat_map(|(item, dates)| {
                let location = location.clone();
                dates.into_iter().map(move |date| LiveDayRecord {
                    item: item.clone(),
                    date,
                    location: location.clone(),
                })
            })
            .collect();
        let checkpoints = self
            .checkpoints
            .into_iter()
            .map(|((item, date), value)| CheckpointQuantityRecord {
                item,
                date,
                location: location.clone(),
                quantity: value.quantity,
            })
            .collect();
        LocationRecords {
            location,
            live_days,
            checkpoints,
        }
    }
}

/// Output records of one flush unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRecords {
    pub location: LocationId,
    pub live_days: Vec<LiveDayRecord>,
    pub checkpoints: Vec<CheckpointQuantityRecord>,
}

impl LocationRecords {
    /// Folds in the records of another item batch of the same location.
    ///
    /// Batches cover disjoint items, so records are appended and re-sorted.
    pub fn absorb(&mut self, other: Self) {
        self.live_days.extend(other.live_days);
        self.live_days.sort();
        self.checkpoints.extend(other.checkpoints);
        self.checkpoints.sort();
    }

    /// Writes the records to the sink in one call, with retries.
    pub fn write_to(
        &self,
        sink: &dyn RecordSink,
        retry: &RetryPolicy,
    ) -> Result<(), ReconstructionError> {
        retry.run("write_location", || {
            sink.write_location(&self.location, &self.live_days, &self.checkpoints)
        })?;
        debug!(
            location = %self.location,
            live_days = self.live_days.len(),
            checkpoints = self.checkpoints.len(),
            "flushed location"
        );
        Ok(())
    }
}

/// Run-wide reconstruction result.
///
/// - `live_days[item][date]` is the set of locations where the item was live.
/// - `quantity_at[item][date][location]` holds checkpoint quantities only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructionResult {
    live_days: BTreeMap<ItemId, BTreeMap<NaiveDate, BTreeSet<LocationId>>>,
    quantity_at: BTreeMap<ItemId, BTreeMap<NaiveDate, BTreeMap<LocationId, i64>>>,
}

impl ReconstructionResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one flushed unit.
    pub fn merge(&mut self, records: &LocationRecords) {
        for rec in &records.live_days {
            self.live_days
                .entry(rec.item.clone())
                .or_default()
                .entry(rec.date)
                .or_default()
                .insert(rec.location.clone());
        }
        for rec in &records.checkpoints {
            self.quantity_at
                .entry(rec.item.clone())
                .or_default()
                .entry(rec.date)
                .or_default()
                .insert(rec.location.clone(), rec.quantity);
        }
    }

    /// Locations where `item` was live on `date`.
    #[must_use]
    pub fn live_locations(&self, item: &ItemId, date: NaiveDate) -> Option<&BTreeSet<LocationId>> {
        self.live_days.get(item).and_then(|by_date| by_date.get(&date))
    }

    #[must_use]
    pub fn is_live(&self, item: &ItemId, date: NaiveDate, location: &LocationId) -> bool {
        self.live_locations(item, date)
            .is_some_and(|locations| locations.contains(location))
    }

    /// Number of days in `range` on which `item` was live at `location`.
    #[must_use]
    pub fn days_live(&self, item: &ItemId, location: &LocationId, range: &DateRange) -> usize {
        self.live_days.get(item).map_or(0, |by_date| {
            by_date
                .range(range.start..=range.end)
                .filter(|(_, locations)| locations.contains(location))
                .count()
        })
    }

    /// Checkpoint quantity, if `date` was a checkpoint and the item was known.
    #[must_use]
    pub fn quantity(&self, item: &ItemId, date: NaiveDate, location: &LocationId) -> Option<i64> {
        self.quantity_at
            .get(item)
            .and_then(|by_date| by_date.get(&date))
            .and_then(|by_loc| by_loc.get(location))
            .copied()
    }

    /// All live-day records in `(item, date, location)` order.
    #[must_use]
    pub fn live_day_records(&self) -> Vec<LiveDayRecord> {
        let mut out = Vec::new();
        for (item, by_date) in &self.live_days {
            for (date, locations) in by_date {
                for location in locations {
                    out.push(LiveDayRecord {
                        item: item.clone(),
                        date: *date,
                        location: location.clone(),
                    });
                }
            }
        }
        out
    }

    /// All checkpoint records in `(item, date, location)` order.
    #[must_use]
    pub fn checkpoint_records(&self) -> Vec<CheckpointQuantityRecord> {
        let mut out = Vec::new();
        for (item, by_date) in &self.quantity_at {
            for (date, by_loc) in by_date {
                for (location, quantity) in by_loc {
                    out.push(CheckpointQuantityRecord {
                        item: item.clone(),
                        date: *date,
                        location: location.clone(),
                        quantity: *quantity,
                    });
                }
            }
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_days.is_empty() && self.quantity_at.is_empty()
    }

    /// Stable fingerprint of both record streams (hex-encoded BLAKE3).
    ///
    /// Two runs over identical inputs produce identical digests.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut h = Hasher::new();
        for rec in self.live_day_records() {
            h.update(b"L\0");
            h.update(rec.item.as_str().as_bytes());
            h.update(b"\0");
            h.update(rec.date.to_string().as_bytes());
            h.update(b"\0");
            h.update(rec.location.as_str().as_bytes());
            h.update(b"\n");
        }
        for rec in self.checkpoint_records() {
            h.update(b"Q\0");
            h.update(rec.item.as_str().as_bytes());
            h.update(b"\0");
            h.update(rec.date.to_string().as_bytes());
            h.update(b"\0");
            h.update(rec.location.as_str().as_bytes());
            h.update(b"\0");
            h.update(&rec.quantity.to_le_bytes());
            h.update(b"\n");
        }
        h.finalize().to_hex().to_string()
    }
}
