//! In-memory storage backend.
//!
//! Thread-safe in-memory implementations of the storage traits, intended for
//! embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock};

use chrono::NaiveDate;

use crate::ids::{ItemId, LocationId};
use crate::model::{CheckpointQuantityRecord, LiveDayRecord, Snapshot, TransactionDelta};
use crate::storage::traits::{InventorySource, RecordSink, StorageError};
use crate::time::DateRange;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct LocationRows {
    // date -> item -> snapshot
    snapshots: BTreeMap<NaiveDate, BTreeMap<ItemId, Snapshot>>,
    deltas: BTreeMap<NaiveDate, Vec<TransactionDelta>>,
    items: BTreeSet<ItemId>,
}

/// In-memory `InventorySource`.
#[derive(Debug, Default)]
pub struct InMemoryInventorySource {
    rows: RwLock<BTreeMap<LocationId, LocationRows>>,
}

impl InMemoryInventorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a snapshot row.
    ///
    /// # Errors
    ///
    /// `InvalidRow` for blank ids, `DuplicateKey` if the location already has a
    /// snapshot for the item on that date.
    pub fn insert_snapshot(&self, snapshot: Snapshot) -> Result<(), StorageError> {
        snapshot
            .validate()
            .map_err(|e| StorageError::InvalidRow(e.to_string()))?;
        let mut rows = self.rows.write().map_err(|_| lock_err("source.insert_snapshot"))?;
        let loc = rows.entry(snapshot.location.clone()).or_default();
        let by_item = loc.snapshots.entry(snapshot.as_of_date).or_default();
        if by_item.contains_key(&snapshot.item) {
            return Err(StorageError::DuplicateKey(format!(
                "snapshot {}/{}@{}",
                snapshot.location, snapshot.item, snapshot.as_of_date
            )));
        }
        loc.items.insert(snapshot.item.clone());
        by_item.insert(snapshot.item.clone(), snapshot);
        Ok(())
    }

    /// Inserts a delta row. Several rows of the same kind on the same day add up.
    ///
    /// # Errors
    ///
    /// `InvalidRow` for blank ids or negative quantities.
    pub fn insert_delta(&self, delta: TransactionDelta) -> Result<(), StorageError> {
        delta
            .validate()
            .map_err(|e| StorageError::InvalidRow(e.to_string()))?;
        let mut rows = self.rows.write().map_err(|_| lock_err("source.insert_delta"))?;
        rows.entry(delta.location.clone())
            .or_default()
            .deltas
            .entry(delta.date)
            .or_default()
            .push(delta);
        Ok(())
    }

    /// Inserts many snapshots, stopping at the first failure.
    pub fn extend_snapshots(
        &self,
        snapshots: impl IntoIterator<Item = Snapshot>,
    ) -> Result<(), StorageError> {
        snapshots.into_iter().try_for_each(|s| self.insert_snapshot(s))
    }

    /// Inserts many deltas, stopping at the first failure.
    pub fn extend_deltas(
        &self,
        deltas: impl IntoIterator<Item = TransactionDelta>,
    ) -> Result<(), StorageError> {
        deltas.into_iter().try_for_each(|d| self.insert_delta(d))
    }

    /// Total number of stored rows (snapshots, deltas).
    pub fn row_counts(&self) -> Result<(usize, usize), StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("source.row_counts"))?;
        Ok(rows.values().fold((0, 0), |(s, d), loc| {
            (
                s + loc.snapshots.values().map(BTreeMap::len).sum::<usize>(),
                d + loc.deltas.values().map(Vec::len).sum::<usize>(),
            )
        }))
    }
}

impl InventorySource for InMemoryInventorySource {
    fn locations(&self) -> Result<Vec<LocationId>, StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("source.locations"))?;
        Ok(rows.keys().cloned().collect())
    }

    fn snapshot_dates(&self, location: &LocationId) -> Result<Vec<NaiveDate>, StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("source.snapshot_dates"))?;
        Ok(rows
            .get(location)
            .map(|loc| loc.snapshots.keys().copied().collect())
            .unwrap_or_default())
    }

    fn snapshot_items(&self, location: &LocationId) -> Result<BTreeSet<ItemId>, StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("source.snapshot_items"))?;
        Ok(rows
            .get(location)
            .map(|loc| loc.items.clone())
            .unwrap_or_default())
    }

    fn snapshots_on(
        &self,
        location: &LocationId,
        date: NaiveDate,
    ) -> Result<Vec<Snapshot>, StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("source.snapshots_on"))?;
        Ok(rows
            .get(location)
            .and_then(|loc| loc.snapshots.get(&date))
            .map(|by_item| by_item.values().cloned().collect())
            .unwrap_or_default())
    }

    fn deltas_between(
        &self,
        location: &LocationId,
        range: &DateRange,
    ) -> Result<Vec<TransactionDelta>, StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("source.deltas_between"))?;
        Ok(rows
            .get(location)
            .map(|loc| {
                loc.deltas
                    .range(range.start..=range.end)
                    .flat_map(|(_, day)| day.iter().cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct SinkState {
    live_days: Vec<LiveDayRecord>,
    checkpoints: Vec<CheckpointQuantityRecord>,
    flushes: usize,
}

/// In-memory `RecordSink` that keeps every written record.
#[derive(Debug, Default)]
pub struct InMemoryRecordSink {
    state: Mutex<SinkState>,
}

impl InMemoryRecordSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All live-day records written so far, sorted.
    pub fn live_days(&self) -> Result<Vec<LiveDayRecord>, StorageError> {
        let state = self.state.lock().map_err(|_| lock_err("sink.live_days"))?;
        let mut out = state.live_days.clone();
        out.sort();
        Ok(out)
    }

    /// All checkpoint records written so far, sorted.
    pub fn checkpoints(&self) -> Result<Vec<CheckpointQuantityRecord>, StorageError> {
        let state = self.state.lock().map_err(|_| lock_err("sink.checkpoints"))?;
        let mut out = state.checkpoints.clone();
        out.sort();
        Ok(out)
    }

    /// Number of successful `write_location` calls.
    pub fn flush_count(&self) -> Result<usize, StorageError> {
        let state = self.state.lock().map_err(|_| lock_err("sink.flush_count"))?;
        Ok(state.flushes)
    }
}

impl RecordSink for InMemoryRecordSink {
    fn write_location(
        &self,
        _location: &LocationId,
        live_days: &[LiveDayRecord],
        checkpoints: &[CheckpointQuantityRecord],
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().map_err(|_| lock_err("sink.write_location"))?;
        state.live_days.extend_from_slice(live_days);
        state.checkpoints.extend_from_slice(checkpoints);
        state.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeltaKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn source_indexes_snapshots_by_location_and_date() {
        let source = InMemoryInventorySource::new();
        source
            .extend_snapshots([
                Snapshot::new("2", "A", date(2024, 1, 8), 4),
                Snapshot::new("1", "A", date(2024, 1, 8), 6),
                Snapshot::new("1", "B", date(2024, 1, 1), 2),
                Snapshot::new("1", "A", date(2024, 1, 1), 10),
            ])
            .unwrap();

        let one = LocationId::from("1");
        assert_eq!(
            source.locations().unwrap(),
            vec![LocationId::from("1"), LocationId::from("2")]
        );
        assert_eq!(
            source.snapshot_dates(&one).unwrap(),
            vec![date(2024, 1, 1), date(2024, 1, 8)]
        );
        assert_eq!(source.snapshots_on(&one, date(2024, 1, 1)).unwrap().len(), 2);
        assert_eq!(source.snapshot_items(&one).unwrap().len(), 2);
        assert!(source
            .snapshots_on(&LocationId::from("9"), date(2024, 1, 1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn source_rejects_duplicate_snapshot() {
        let source = InMemoryInventorySource::new();
        source.insert_snapshot(Snapshot::new("1", "A", date(2024, 1, 1), 1)).unwrap();
        let err = source
            .insert_snapshot(Snapshot::new("1", "A", date(2024, 1, 1), 2))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey(_)));
    }

    #[test]
    fn source_rejects_invalid_delta() {
        let source = InMemoryInventorySource::new();
        let err = source
            .insert_delta(TransactionDelta::new("1", "A", date(2024, 1, 1), DeltaKind::Sale, -1))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRow(_)));
        assert_eq!(source.row_counts().unwrap(), (0, 0));
    }

    #[test]
    fn source_deltas_between_is_inclusive() {
        let source = InMemoryInventorySource::new();
        for day in 1..=5 {
            source
                .insert_delta(TransactionDelta::new("1", "A", date(2024, 1, day), DeltaKind::Sale, 1))
                .unwrap();
        }
        let range = DateRange::new(date(2024, 1, 2), date(2024, 1, 4)).unwrap();
        let deltas = source.deltas_between(&LocationId::from("1"), &range).unwrap();
        assert_eq!(deltas.len(), 3);
        assert!(deltas.iter().all(|d| range.contains(d.date)));
    }

    #[test]
    fn sink_collects_and_sorts() {
        let sink = InMemoryRecordSink::new();
        let loc = LocationId::from("1");
        let live = vec![
            LiveDayRecord {
                item: ItemId::from("B"),
                date: date(2024, 1, 1),
                location: loc.clone(),
            },
            LiveDayRecord {
                item: ItemId::from("A"),
                date: date(2024, 1, 2),
                location: loc.clone(),
            },
        ];
        sink.write_location(&loc, &live, &[]).unwrap();
        let out = sink.live_days().unwrap();
        assert_eq!(out[0].item, ItemId::from("A"));
        assert_eq!(sink.flush_count().unwrap(), 1);
        assert!(sink.checkpoints().unwrap().is_empty());
    }
}
