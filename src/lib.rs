//! # stockroll - Historical Inventory Reconstruction
//!
//! stockroll rebuilds day-by-day stock positions for every item at every
//! location from sparse snapshots and daily transaction deltas, and answers
//! "was this item live here on this day?" for every day in a horizon.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: an authoritative quantity for an item at a location on a date
//! - **TransactionDelta**: one day's sales, returns, inward or outward movement
//! - **AnalysisWindow**: the span a single snapshot anchors
//! - **Live day**: a day whose opening stock is positive
//! - **Checkpoint**: a date at which point-in-time quantities are kept
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::NaiveDate;
//! use stockroll::{
//!     DeltaKind, InMemoryInventorySource, InMemoryRecordSink, ReconstructionEngine,
//!     ReconstructionRuntime, RecordSink, RunConfig, RunContext, Snapshot, StaticCatalog,
//!     TransactionDelta,
//! };
//!
//! let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
//! let source = InMemoryInventorySource::new();
//! source.insert_snapshot(Snapshot::new("1", "A", d(1), 10))?;
//! source.insert_delta(TransactionDelta::new("1", "A", d(2), DeltaKind::Sale, 3))?;
//! source.insert_delta(TransactionDelta::new("1", "A", d(5), DeltaKind::Sale, 8))?;
//!
//! let sink = Arc::new(InMemoryRecordSink::new());
//! let ctx = RunContext::new(
//!     RunConfig::for_horizon(d(1), d(6)),
//!     Arc::new(source),
//!     Arc::new(StaticCatalog::new()),
//!     Arc::clone(&sink) as Arc<dyn RecordSink>,
//! )?;
//! let report = ReconstructionRuntime::new(ReconstructionEngine::new(ctx)).run()?;
//!
//! let result = report.result.expect("collected by default");
//! assert!(result.is_live(&"A".into(), d(5), &"1".into()));
//! assert!(!result.is_live(&"A".into(), d(6), &"1".into()));
//! assert_eq!(result.quantity(&"A".into(), d(6), &"1".into()), Some(0));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod ids;
pub mod model;
pub mod time;

// Inputs and configuration
pub mod catalog;
pub mod config;
pub mod ingest;
pub mod storage;

// Reconstruction pipeline
pub mod aggregate;
pub mod diagnostics;
pub mod engine;
pub mod loader;
pub mod partition;
pub mod retry;
pub mod simulator;

// Re-export primary types at crate root for convenience
pub use aggregate::{LocationAccumulator, LocationRecords, ReconstructionResult};
pub use catalog::{CatalogResolver, ItemScope, StaticCatalog};
pub use config::{
    FailurePolicy, InwardFallback, KeyframeSchedule, NegativeStockPolicy, RetryConfig, RunConfig,
};
pub use diagnostics::{Diagnostics, NegativeStockAlert, OrphanDeltaWarning, RejectedRow};
pub use engine::runtime::{LocationFailure, ReconstructionRuntime, RunId, RunReport};
pub use engine::{
    CancellationToken, JobOutcome, JobStats, JobStatus, LocationJob, ReconstructionEngine,
    RunContext,
};
pub use error::{
    MissingAnchorError, ReconstructionError, RollError, RollResult, ValidationError,
};
pub use ids::{ItemId, LocationId};
pub use ingest::{ingest_rows, IngestReport, RawDeltaRow, RawSnapshotRow};
pub use loader::{LoadScope, ScopedLoader, WindowInputs};
pub use model::{
    AnalysisWindow, CheckpointQuantityRecord, DailyState, DayMovements, DeltaKind,
    LiveDayRecord, Snapshot, TransactionDelta,
};
pub use partition::{partition_windows, windows_are_contiguous};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use simulator::{
    DailySimulator, InwardPeriod, InwardStrategy, NoInward, RealInwardFeed,
    SalesDeficitEstimator, WindowStats,
};
pub use storage::{
    InMemoryInventorySource, InMemoryRecordSink, InventorySource, RecordSink, StorageError,
};
pub use time::DateRange;
