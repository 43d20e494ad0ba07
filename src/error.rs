//! Error types for stockroll.
//!
//! All errors in stockroll are strongly typed using thiserror.
//! Data-quality problems that must not stop a run (orphan deltas, missing
//! anchors for a single item) are reported through `crate::diagnostics`
//! instead; the types here are for conditions that abort an operation.

use chrono::NaiveDate;
use thiserror::Error;

use crate::ids::{ItemId, LocationId};
use crate::storage::StorageError;

/// Validation errors that occur during input or configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid date range: start ({start}) must not be after end ({end})")]
    InvalidDateRange {
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Malformed date '{value}' in field '{field}'")]
    MalformedDate {
        field: String,
        value: String,
    },

    #[error("Date {date} in field '{field}' is outside the accepted range")]
    DateOutOfRange {
        field: String,
        date: NaiveDate,
    },

    #[error("Unknown delta kind '{value}'")]
    UnknownDeltaKind {
        value: String,
    },

    #[error("Delta quantity must be non-negative, got {quantity}")]
    NegativeDeltaQuantity {
        quantity: i64,
    },

    #[error("Field '{field}' cannot be empty")]
    EmptyField {
        field: String,
    },

    #[error("Invalid run configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Invalid item scope pattern: {reason}")]
    InvalidScopePattern {
        reason: String,
    },
}

/// Raised when reconstruction is requested for dates that precede the
/// earliest snapshot available to anchor them.
///
/// When `item` is `None` the whole location lacks an anchor for the range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "No snapshot anchors {location}{} on {requested}{}",
    .item.as_ref().map(|i| format!("/{i}")).unwrap_or_default(),
    .earliest.map(|d| format!(" (earliest snapshot: {d})")).unwrap_or_default()
)]
pub struct MissingAnchorError {
    /// Location lacking the anchor.
    pub location: LocationId,
    /// Item lacking the anchor, if the gap is item-specific.
    pub item: Option<ItemId>,
    /// First date that could not be anchored.
    pub requested: NaiveDate,
    /// Earliest snapshot date known, if any exists at all.
    pub earliest: Option<NaiveDate>,
}

/// Execution errors that occur while reconstructing.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Missing anchor: {0}")]
    MissingAnchor(#[from] MissingAnchorError),

    #[error("Retries exhausted for {operation} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Location {location} failed: {reason}")]
    LocationFailed {
        location: LocationId,
        reason: String,
    },

    #[error("Worker pool disconnected")]
    Disconnected,
}

impl ReconstructionError {
    /// Returns true if the failure was transient and a later run may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}

/// Top-level error type for stockroll.
#[derive(Debug, Error)]
pub enum RollError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Reconstruction error: {0}")]
    Reconstruction(#[from] ReconstructionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for RollError {
    fn from(err: StorageError) -> Self {
        Self::Reconstruction(ReconstructionError::Storage(err))
    }
}

impl From<MissingAnchorError> for RollError {
    fn from(err: MissingAnchorError) -> Self {
        Self::Reconstruction(ReconstructionError::MissingAnchor(err))
    }
}

impl RollError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a reconstruction error.
    #[must_use]
    pub const fn is_reconstruction(&self) -> bool {
        matches!(self, Self::Reconstruction(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Reconstruction(e) => e.is_retryable(),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for stockroll operations.
pub type RollResult<T> = Result<T, RollError>;
