//! Raw row ingestion.
//!
//! Upstream feeds arrive as loosely typed rows: string dates, string kinds.
//! Each row is parsed and validated on its own; a bad row is rejected,
//! logged, and skipped without affecting its neighbours.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::diagnostics::RejectedRow;
use crate::error::ValidationError;
use crate::model::{DeltaKind, Snapshot, TransactionDelta};
use crate::storage::InMemoryInventorySource;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A snapshot row as supplied by a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSnapshotRow {
    pub location: String,
    pub item: String,
    /// `YYYY-MM-DD`.
    pub as_of_date: String,
    pub quantity: i64,
}

/// A delta row as supplied by a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeltaRow {
    pub location: String,
    pub item: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `sale`, `return`, `inward` or `outward` (plural and `receipt` accepted).
    pub kind: String,
    pub quantity: i64,
}

/// What an ingestion call accepted and rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub snapshots_accepted: usize,
    pub deltas_accepted: usize,
    pub rejected: Vec<RejectedRow>,
}

impl IngestReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    fn reject(&mut self, feed: &str, index: usize, reason: String) {
        warn!(feed, index, reason = %reason, "rejected input row");
        self.rejected.push(RejectedRow {
            feed: feed.to_string(),
            index,
            reason,
        });
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        ValidationError::MalformedDate {
            field: field.to_string(),
            value: value.to_string(),
        }
    })
}

fn not_after(field: &str, date: NaiveDate, latest: Option<NaiveDate>) -> Result<(), ValidationError> {
    match latest {
        Some(latest) if date > latest => Err(ValidationError::DateOutOfRange {
            field: field.to_string(),
            date,
        }),
        _ => Ok(()),
    }
}

impl RawSnapshotRow {
    /// Parses into a typed snapshot.
    ///
    /// # Errors
    ///
    /// Blank ids, a malformed date, or a date after `latest`.
    pub fn parse(&self, latest: Option<NaiveDate>) -> Result<Snapshot, ValidationError> {
        let as_of_date = parse_date("as_of_date", &self.as_of_date)?;
        not_after("as_of_date", as_of_date, latest)?;
        let snapshot = Snapshot::new(
            self.location.trim(),
            self.item.trim(),
            as_of_date,
            self.quantity,
        );
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl RawDeltaRow {
    /// Parses into a typed delta.
    ///
    /// # Errors
    ///
    /// Blank ids, a malformed date, an unknown kind, a negative quantity, or
    /// a date after `latest`.
    pub fn parse(&self, latest: Option<NaiveDate>) -> Result<TransactionDelta, ValidationError> {
        let date = parse_date("date", &self.date)?;
        not_after("date", date, latest)?;
        let kind: DeltaKind = self.kind.parse()?;
        let delta = TransactionDelta::new(
            self.location.trim(),
            self.item.trim(),
            date,
            kind,
            self.quantity,
        );
        delta.validate()?;
        Ok(delta)
    }
}

/// Parses raw rows into `source`, rejecting bad rows individually.
///
/// Rows dated after `latest` (usually the horizon end) cannot affect any
/// reconstructed day and are rejected as out of range.
pub fn ingest_rows(
    source: &InMemoryInventorySource,
    snapshots: &[RawSnapshotRow],
    deltas: &[RawDeltaRow],
    latest: Option<NaiveDate>,
) -> IngestReport {
    let mut report = IngestReport::default();

    for (index, row) in snapshots.iter().enumerate() {
        let stored = row
            .parse(latest)
            .map_err(|e| e.to_string())
            .and_then(|snapshot| source.insert_snapshot(snapshot).map_err(|e| e.to_string()));
        match stored {
            Ok(()) => report.snapshots_accepted += 1,
            Err(reason) => report.reject("snapshot", index, reason),
        }
    }

    for (index, row) in deltas.iter().enumerate() {
        let stored = row
            .parse(latest)
            .map_err(|e| e.to_string())
            .and_then(|delta| source.insert_delta(delta).map_err(|e| e.to_string()));
        match stored {
            Ok(()) => report.deltas_accepted += 1,
            Err(reason) => report.reject("delta", index, reason),
        }
    }

    info!(
        snapshots = report.snapshots_accepted,
        deltas = report.deltas_accepted,
        rejected = report.rejected.len(),
        "ingested rows"
    );
    report
}
