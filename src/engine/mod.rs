//! Reconstruction engine.
//!
//! The engine owns the per-run context (configuration plus the storage and
//! catalog collaborators) and reconstructs one location job at a time:
//! partition into windows, load each window, simulate, then hand the
//! location's records to the sink. Concurrency lives in [`runtime`].

/// Worker-pool runtime with cancellation and failure policies.
pub mod runtime;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::aggregate::{LocationAccumulator, LocationRecords};
use crate::catalog::CatalogResolver;
use crate::config::{InwardFallback, RunConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{MissingAnchorError, ReconstructionError, RollResult};
use crate::ids::{ItemId, LocationId};
use crate::loader::{LoadScope, ScopedLoader};
use crate::model::AnalysisWindow;
use crate::partition::{partition_windows, windows_are_contiguous};
use crate::retry::RetryPolicy;
use crate::simulator::{
    DailySimulator, InwardStrategy, NoInward, RealInwardFeed, SalesDeficitEstimator, WindowStats,
};
use crate::storage::{InventorySource, RecordSink};
use crate::time::DateRange;

/// Cooperative cancellation flag shared by the coordinator and workers.
///
/// Workers check it before each window.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Shared, read-only state for one run.
pub struct RunContext {
    config: RunConfig,
    source: Arc<dyn InventorySource>,
    catalog: Arc<dyn CatalogResolver>,
    sink: Arc<dyn RecordSink>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Builds a context after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns `RollError::Validation` if the configuration is invalid.
    pub fn new(
        config: RunConfig,
        source: Arc<dyn InventorySource>,
        catalog: Arc<dyn CatalogResolver>,
        sink: Arc<dyn RecordSink>,
    ) -> RollResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            catalog,
            sink,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub fn source(&self) -> &dyn InventorySource {
        self.source.as_ref()
    }

    #[must_use]
    pub fn catalog(&self) -> &dyn CatalogResolver {
        self.catalog.as_ref()
    }

    #[must_use]
    pub fn sink(&self) -> &dyn RecordSink {
        self.sink.as_ref()
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.retry)
    }
}

/// One unit of work: a location, or one item batch of a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationJob {
    pub location: LocationId,
    /// Items this job is restricted to; `None` means every known item.
    pub batch: Option<BTreeSet<ItemId>>,
    /// Position of the batch within its location (0 when unbatched).
    pub batch_index: usize,
}

impl LocationJob {
    #[must_use]
    pub fn whole(location: LocationId) -> Self {
        Self {
            location,
            batch: None,
            batch_index: 0,
        }
    }
}

impl fmt::Display for LocationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.batch {
            Some(items) => write!(
                f,
                "{} (batch {}, {} items)",
                self.location,
                self.batch_index,
                items.len()
            ),
            None => write!(f, "{}", self.location),
        }
    }
}

/// Work counters for one job or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub windows: usize,
    pub window: WindowStats,
}

impl JobStats {
    pub fn add(&mut self, other: Self) {
        self.windows += other.windows;
        self.window.add(other.window);
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// All windows simulated and the buffer flushed.
    Completed(LocationRecords),
    /// One item batch simulated. Its records are not flushed yet: the runtime
    /// writes a location's batches together once all of them have completed.
    Staged(LocationRecords),
    /// Cancellation was observed before the last window; nothing was flushed.
    Cancelled,
}

/// Everything a worker hands back for one job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: LocationJob,
    pub status: JobStatus,
    pub diagnostics: Diagnostics,
    pub stats: JobStats,
}

/// Fallback used for week sub-periods without an inward feed.
#[must_use]
pub fn fallback_strategy(fallback: InwardFallback) -> &'static dyn InwardStrategy {
    match fallback {
        InwardFallback::Disabled => &NoInward,
        InwardFallback::EstimateFromSales => &SalesDeficitEstimator,
    }
}

/// Synchronous per-job executor. Safe to share between worker threads.
#[derive(Debug, Clone)]
pub struct ReconstructionEngine {
    ctx: Arc<RunContext>,
}

impl ReconstructionEngine {
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Lists the run's jobs: one per location, or one per item batch when
    /// `item_batch_size` is set.
    ///
    /// # Errors
    ///
    /// Propagates storage failures once retries are exhausted.
    pub fn plan_jobs(&self) -> Result<Vec<LocationJob>, ReconstructionError> {
        let retry = self.ctx.retry_policy();
        let mut locations = retry.run("locations", || self.ctx.source().locations())?;
        locations.sort();
        locations.dedup();

        let Some(batch_size) = self.ctx.config().item_batch_size else {
            return Ok(locations.into_iter().map(LocationJob::whole).collect());
        };

        let mut jobs = Vec::new();
        for location in locations {
            let items: Vec<ItemId> = self.loader().known_items(&location)?.into_iter().collect();
            if items.len() <= batch_size {
                jobs.push(LocationJob::whole(location));
                continue;
            }
            for (batch_index, chunk) in items.chunks(batch_size).enumerate() {
                jobs.push(LocationJob {
                    location: location.clone(),
                    batch: Some(chunk.iter().cloned().collect()),
                    batch_index,
                });
            }
        }
        Ok(jobs)
    }

    fn loader(&self) -> ScopedLoader<'_> {
        let config = self.ctx.config();
        ScopedLoader::new(
            self.ctx.source(),
            self.ctx.catalog(),
            self.ctx.retry_policy(),
            config.week_start,
        )
    }

    /// Reconstructs one job end to end.
    ///
    /// A whole-location job flushes its records to the sink. An item batch
    /// hands them back as `JobStatus::Staged` for the runtime to commit.
    ///
    /// Missing anchors are collected as diagnostics, not errors: the days
    /// they cover are simply left unknown.
    ///
    /// # Errors
    ///
    /// Storage failures (after retries) for this job's reads or its flush.
    pub fn reconstruct(
        &self,
        job: &LocationJob,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, ReconstructionError> {
        let config = self.ctx.config();
        let retry = self.ctx.retry_policy();
        let location = &job.location;
        let mut diagnostics = Diagnostics::new();
        let mut stats = JobStats::default();

        let snapshot_dates =
            retry.run("snapshot_dates", || self.ctx.source().snapshot_dates(location))?;
        let windows = self
            .windows_for(location, &snapshot_dates, &mut diagnostics)
            .unwrap_or_default();
        debug_assert!(windows_are_contiguous(&windows, config.horizon_end));

        let loader = self.loader();
        let mut known_items = loader.known_items(location)?;
        // Days before the first window are never loaded, so their orphans
        // are looked up separately.
        let unloaded_prefix = match windows.first() {
            None => Some(config.horizon()),
            Some(first) => first
                .start
                .pred_opt()
                .and_then(|end| DateRange::new(config.horizon_start, end).ok()),
        };
        if let (Some(prefix), 0) = (unloaded_prefix, job.batch_index) {
            loader.report_orphans(location, &prefix, &known_items, &mut diagnostics)?;
        }
        if let Some(batch) = &job.batch {
            known_items.retain(|item| batch.contains(item));
        }

        let simulator = DailySimulator::new(
            config,
            &RealInwardFeed,
            fallback_strategy(config.inward_fallback),
        );
        let mut acc = LocationAccumulator::new(location.clone());
        let mut anchored_before: BTreeSet<ItemId> = BTreeSet::new();

        for (idx, window) in windows.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(job = %job, window_start = %window.start, "job cancelled");
                return Ok(JobOutcome {
                    job: job.clone(),
                    status: JobStatus::Cancelled,
                    diagnostics,
                    stats,
                });
            }

            let inputs = loader.load(
                window,
                LoadScope {
                    known_items: &known_items,
                    batch: job.batch.as_ref(),
                    report_orphans: job.batch_index == 0,
                },
                &mut diagnostics,
            )?;

            // Items with no snapshot on the anchor date stay unknown for this
            // window. The first window expects every known item; later ones
            // expect the items anchored so far.
            let expected = if idx == 0 { &known_items } else { &anchored_before };
            for item in expected.iter().filter(|item| !inputs.anchors.contains_key(*item)) {
                diagnostics.missing_anchor(MissingAnchorError {
                    location: location.clone(),
                    item: Some(item.clone()),
                    requested: window.start.max(config.horizon_start),
                    earliest: None,
                });
            }
            anchored_before.extend(inputs.anchors.keys().cloned());

            let window_stats = simulator.simulate_window(&inputs, &mut acc, &mut diagnostics);
            stats.windows += 1;
            stats.window.add(window_stats);
        }

        let records = acc.into_records();
        info!(
            job = %job,
            windows = stats.windows,
            items = stats.window.items,
            live_days = records.live_days.len(),
            "location reconstructed"
        );
        let status = if job.batch.is_some() {
            JobStatus::Staged(records)
        } else {
            records.write_to(self.ctx.sink(), &retry)?;
            JobStatus::Completed(records)
        };
        Ok(JobOutcome {
            job: job.clone(),
            status,
            diagnostics,
            stats,
        })
    }

    /// Partitions the horizon for `location`.
    ///
    /// When the horizon starts before the location's first snapshot, the
    /// missing prefix is reported and the horizon is clipped to start at that
    /// snapshot. Returns `None` when no window can be anchored at all.
    fn windows_for(
        &self,
        location: &LocationId,
        snapshot_dates: &[NaiveDate],
        diagnostics: &mut Diagnostics,
    ) -> Option<Vec<AnalysisWindow>> {
        let horizon = self.ctx.config().horizon();
        if snapshot_dates.is_empty() {
            diagnostics.missing_anchor(MissingAnchorError {
                location: location.clone(),
                item: None,
                requested: horizon.start,
                earliest: None,
            });
            return None;
        }
        match partition_windows(location, snapshot_dates, horizon) {
            Ok(windows) => Some(windows),
            Err(missing) => {
                let clipped = missing
                    .earliest
                    .and_then(|earliest| DateRange::new(earliest, horizon.end).ok());
                diagnostics.missing_anchor(missing);
                let clipped = clipped?;
                partition_windows(location, snapshot_dates, clipped).ok()
            }
        }
    }
}
