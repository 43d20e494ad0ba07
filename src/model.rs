//! Input rows, working state, and output records.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{ItemId, LocationId};
use crate::time::DateRange;

/// An authoritative stock reading for one item at one location.
///
/// The quantity is the opening stock of `as_of_date`: movements dated on the
/// snapshot day roll into the following day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub location: LocationId,
    pub item: ItemId,
    pub as_of_date: NaiveDate,
    pub quantity: i64,
}

impl Snapshot {
    /// Creates a snapshot row.
    pub fn new(
        location: impl Into<LocationId>,
        item: impl Into<ItemId>,
        as_of_date: NaiveDate,
        quantity: i64,
    ) -> Self {
        Self {
            location: location.into(),
            item: item.into(),
            as_of_date,
            quantity,
        }
    }

    /// Validate identifiers.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_ids(&self.location, &self.item)
    }
}

/// Kind of daily stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Sale,
    Return,
    Inward,
    Outward,
}

impl DeltaKind {
    /// Sign of this movement's effect on stock.
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Sale | Self::Outward => -1,
            Self::Return | Self::Inward => 1,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Return => "return",
            Self::Inward => "inward",
            Self::Outward => "outward",
        }
    }
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeltaKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sale" | "sales" => Ok(Self::Sale),
            "return" | "returns" => Ok(Self::Return),
            "inward" | "receipt" => Ok(Self::Inward),
            "outward" => Ok(Self::Outward),
            _ => Err(ValidationError::UnknownDeltaKind {
                value: s.to_string(),
            }),
        }
    }
}

/// One day's aggregate movement of one kind for one item at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDelta {
    pub location: LocationId,
    pub item: ItemId,
    pub date: NaiveDate,
    pub kind: DeltaKind,
    pub quantity: i64,
}

impl TransactionDelta {
    /// Creates a delta row.
    pub fn new(
        location: impl Into<LocationId>,
        item: impl Into<ItemId>,
        date: NaiveDate,
        kind: DeltaKind,
        quantity: i64,
    ) -> Self {
        Self {
            location: location.into(),
            item: item.into(),
            date,
            kind,
            quantity,
        }
    }

    /// Validate identifiers and the non-negative quantity rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_ids(&self.location, &self.item)?;
        if self.quantity < 0 {
            return Err(ValidationError::NegativeDeltaQuantity {
                quantity: self.quantity,
            });
        }
        Ok(())
    }

    /// Signed effect of this delta on stock.
    #[must_use]
    pub const fn signed_quantity(&self) -> i64 {
        self.kind.sign() * self.quantity
    }
}

fn validate_ids(location: &LocationId, item: &ItemId) -> Result<(), ValidationError> {
    if location.is_blank() {
        return Err(ValidationError::EmptyField {
            field: "location".to_string(),
        });
    }
    if item.is_blank() {
        return Err(ValidationError::EmptyField {
            field: "item".to_string(),
        });
    }
    Ok(())
}

/// Movements of one item on one day, summed per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayMovements {
    pub sales: i64,
    pub returns: i64,
    pub inward: i64,
    pub outward: i64,
}

impl DayMovements {
    /// Adds one delta's quantity to the matching bucket. Totals saturate at
    /// the `i64` bounds.
    pub fn add(&mut self, kind: DeltaKind, quantity: i64) {
        let bucket = match kind {
            DeltaKind::Sale => &mut self.sales,
            DeltaKind::Return => &mut self.returns,
            DeltaKind::Inward => &mut self.inward,
            DeltaKind::Outward => &mut self.outward,
        };
        *bucket = bucket.saturating_add(quantity);
    }

    /// Net stock change excluding inward, which is planned per period.
    #[must_use]
    pub const fn net_without_inward(&self) -> i64 {
        self.returns
            .saturating_sub(self.sales)
            .saturating_sub(self.outward)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sales == 0 && self.returns == 0 && self.inward == 0 && self.outward == 0
    }
}

/// A contiguous reconstruction unit for one location, anchored at a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub location: LocationId,
    /// The anchoring snapshot date.
    pub start: NaiveDate,
    /// Inclusive end: day before the next snapshot, or the horizon end.
    pub end: NaiveDate,
}

impl AnalysisWindow {
    /// The window's days as a range.
    #[must_use]
    pub const fn range(&self) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end,
        }
    }
}

impl fmt::Display for AnalysisWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.location, self.range())
    }
}

/// Reconstructed state of one item at one location on one day.
///
/// `quantity` is the true running value and may be negative; recorded output
/// is clamped through [`DailyState::recorded_quantity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyState<'a> {
    pub location: &'a LocationId,
    pub item: &'a ItemId,
    pub date: NaiveDate,
    pub quantity: i64,
    pub is_live: bool,
}

impl<'a> DailyState<'a> {
    pub fn new(location: &'a LocationId, item: &'a ItemId, date: NaiveDate, quantity: i64) -> Self {
        Self {
            location,
            item,
            date,
            quantity,
            is_live: quantity > 0,
        }
    }

    /// Quantity as written to output: never negative.
    #[must_use]
    pub fn recorded_quantity(&self) -> i64 {
        self.quantity.max(0)
    }
}

/// One item was live at one location on one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiveDayRecord {
    pub item: ItemId,
    pub date: NaiveDate,
    pub location: LocationId,
}

/// Point-in-time quantity at a checkpoint date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointQuantityRecord {
    pub item: ItemId,
    pub date: NaiveDate,
    pub location: LocationId,
    pub quantity: i64,
}
