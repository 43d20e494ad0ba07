//! Non-fatal data-quality findings collected during a run.
//!
//! None of these stop reconstruction. They are logged when found and
//! returned with the run report so operators can chase the upstream feed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::NegativeStockPolicy;
use crate::error::MissingAnchorError;
use crate::ids::{ItemId, LocationId};

/// Deltas were supplied for an item that has never been snapshotted at the
/// location. The deltas are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanDeltaWarning {
    pub location: LocationId,
    pub item: ItemId,
    /// Window whose load surfaced the orphan rows.
    pub window_start: NaiveDate,
    /// Number of ignored rows.
    pub rows: usize,
}

/// Reconstructed stock went below zero; output was clamped to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeStockAlert {
    pub location: LocationId,
    pub item: ItemId,
    /// First day in the window with negative opening stock.
    pub date: NaiveDate,
    /// True (unclamped) opening quantity on that day.
    pub quantity: i64,
}

/// A raw input row that was rejected during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// `"snapshot"` or `"delta"`.
    pub feed: String,
    /// Zero-based position in the submitted batch.
    pub index: usize,
    pub reason: String,
}

/// Findings collected for one location, or merged across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub missing_anchors: Vec<MissingAnchorError>,
    pub orphan_deltas: Vec<OrphanDeltaWarning>,
    pub negative_stock: Vec<NegativeStockAlert>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing_anchor(&mut self, err: MissingAnchorError) {
        warn!(
            location = %err.location,
            item = err.item.as_ref().map(ItemId::as_str),
            requested = %err.requested,
            "no snapshot anchors reconstruction; days left unknown"
        );
        self.missing_anchors.push(err);
    }

    pub fn orphan_delta(&mut self, warning: OrphanDeltaWarning) {
        warn!(
            location = %warning.location,
            item = %warning.item,
            window_start = %warning.window_start,
            rows = warning.rows,
            "ignoring deltas for item without any snapshot"
        );
        self.orphan_deltas.push(warning);
    }

    /// Records negative stock according to the configured policy.
    ///
    /// Under `Silent` the finding is only logged at debug level.
    pub fn negative_stock(&mut self, alert: NegativeStockAlert, policy: NegativeStockPolicy) {
        match policy {
            NegativeStockPolicy::Silent => debug!(
                location = %alert.location,
                item = %alert.item,
                date = %alert.date,
                quantity = alert.quantity,
                "negative stock clamped to zero"
            ),
            NegativeStockPolicy::Alert => {
                warn!(
                    location = %alert.location,
                    item = %alert.item,
                    date = %alert.date,
                    quantity = alert.quantity,
                    "negative stock clamped to zero"
                );
                self.negative_stock.push(alert);
            }
        }
    }

    /// Moves all findings of `other` into `self`.
    pub fn merge(&mut self, other: Self) {
        self.missing_anchors.extend(other.missing_anchors);
        self.orphan_deltas.extend(other.orphan_deltas);
        self.negative_stock.extend(other.negative_stock);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_anchors.is_empty()
            && self.orphan_deltas.is_empty()
            && self.negative_stock.is_empty()
    }

    /// Sorts findings so merged output does not depend on worker timing.
    pub fn sort(&mut self) {
        self.missing_anchors.sort_by(|a, b| {
            (&a.location, &a.item, a.requested).cmp(&(&b.location, &b.item, b.requested))
        });
        self.orphan_deltas.sort_by(|a, b| {
            (&a.location, &a.item, a.window_start).cmp(&(&b.location, &b.item, b.window_start))
        });
        self.negative_stock
            .sort_by(|a, b| (&a.location, &a.item, a.date).cmp(&(&b.location, &b.item, b.date)));
    }
}
