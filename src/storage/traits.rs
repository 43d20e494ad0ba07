//! Abstract storage traits for stockroll.
//!
//! Input rows are read through `InventorySource` and output records are
//! written through `RecordSink`. Both are I/O boundaries: the engine calls
//! them synchronously from the worker that owns a location, and retries
//! failures that report themselves as retryable.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use thiserror::Error;

use crate::ids::{ItemId, LocationId};
use crate::model::{CheckpointQuantityRecord, LiveDayRecord, Snapshot, TransactionDelta};
use crate::time::DateRange;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Location not known to the backend.
    #[error("Location not found: {0}")]
    LocationNotFound(LocationId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Row failed validation on insert.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// Backend temporarily unreachable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Storage timeout: {0}")]
    Timeout(String),

    /// Stored data is unreadable.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

impl StorageError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Read access to snapshot and delta rows.
///
/// Implementations return rows with raw (non-canonical) item ids; catalog
/// normalization is the loader's job.
pub trait InventorySource: Send + Sync {
    /// All locations with any rows, in ascending order.
    fn locations(&self) -> Result<Vec<LocationId>, StorageError>;

    /// Distinct snapshot dates for a location, in ascending order.
    fn snapshot_dates(&self, location: &LocationId) -> Result<Vec<NaiveDate>, StorageError>;

    /// Every raw item id that has at least one snapshot at the location.
    fn snapshot_items(&self, location: &LocationId) -> Result<BTreeSet<ItemId>, StorageError>;

    /// Snapshot rows for a location taken on exactly `date`.
    fn snapshots_on(
        &self,
        location: &LocationId,
        date: NaiveDate,
    ) -> Result<Vec<Snapshot>, StorageError>;

    /// Delta rows for a location dated within `range` (inclusive).
    fn deltas_between(
        &self,
        location: &LocationId,
        range: &DateRange,
    ) -> Result<Vec<TransactionDelta>, StorageError>;
}

/// Write access for the two output record streams.
pub trait RecordSink: Send + Sync {
    /// Writes one flush unit (a location, or an item batch of a location).
    ///
    /// Implementations should make a flush unit visible atomically.
    fn write_location(
        &self,
        location: &LocationId,
        live_days: &[LiveDayRecord],
        checkpoints: &[CheckpointQuantityRecord],
    ) -> Result<(), StorageError>;
}
