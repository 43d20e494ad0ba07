//! Worker-pool runtime for reconstruction runs.
//!
//! Location jobs are fed through a bounded queue to a fixed set of named
//! worker threads. Each worker owns its job's accumulator from start to
//! finish, so no per-day state is ever shared between threads. Whole
//! locations are flushed by their worker. Item batches come back unflushed
//! and the coordinator writes a location once all of its batches are in, so
//! a location with a failed or cancelled batch leaves nothing in the sink.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{LocationRecords, ReconstructionResult};
use crate::config::FailurePolicy;
use crate::diagnostics::Diagnostics;
use crate::engine::{
    CancellationToken, JobOutcome, JobStats, JobStatus, LocationJob, ReconstructionEngine,
    RunContext,
};
use crate::error::{ReconstructionError, RollResult};
use crate::ids::LocationId;
use crate::retry::RetryPolicy;
use crate::storage::RecordSink;

/// Identifier of one reconstruction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationFailure {
    pub location: LocationId,
    /// Batch whose failure was reported (0 when unbatched).
    pub batch_index: usize,
    pub error: String,
    /// Whether the underlying failure was transient.
    pub retryable: bool,
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Locations whose every job completed and flushed.
    pub completed: BTreeSet<LocationId>,
    pub failed: Vec<LocationFailure>,
    /// Locations with at least one job stopped by cancellation.
    pub cancelled: BTreeSet<LocationId>,
    pub diagnostics: Diagnostics,
    pub stats: JobStats,
    /// Merged records, when `collect_results` is enabled.
    pub result: Option<ReconstructionResult>,
}

impl RunReport {
    /// True when every location completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }
}

type JobReply = (LocationJob, Result<JobOutcome, ReconstructionError>);

enum Job {
    Reconstruct {
        job: LocationJob,
        reply: Sender<JobReply>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn start(
        workers: usize,
        queue_capacity: usize,
        engine: &ReconstructionEngine,
        cancel: &CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity.max(1));

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = engine.clone();
            let cancel = cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("stockroll-worker-{idx}"))
                .spawn(move || {
                    while let Ok(Job::Reconstruct { job, reply }) = rx.recv() {
                        let result = run_isolated(&engine, &job, &cancel);
                        let _ = reply.send((job, result));
                    }
                })
                .expect("failed to spawn stockroll worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
        }
    }

    fn submit(&self, job: Job) -> Result<(), ReconstructionError> {
        self.tx
            .send(job)
            .map_err(|_| ReconstructionError::Disconnected)
    }

    fn shutdown(self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Runs one job, turning a panic into a failure of that job alone.
fn run_isolated(
    engine: &ReconstructionEngine,
    job: &LocationJob,
    cancel: &CancellationToken,
) -> Result<JobOutcome, ReconstructionError> {
    panic::catch_unwind(AssertUnwindSafe(|| engine.reconstruct(job, cancel))).unwrap_or_else(
        |payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            Err(ReconstructionError::LocationFailed {
                location: job.location.clone(),
                reason,
            })
        },
    )
}

/// Item batches of one location that have reported so far.
struct StagedLocation {
    remaining: usize,
    records: Option<LocationRecords>,
    /// A batch failed or was cancelled; the location is never written.
    spoiled: bool,
}

/// Folds worker replies into the run report.
///
/// Records of batched locations are held here until every batch has
/// completed, then written to the sink and merged as one unit.
struct Collector<'a> {
    policy: FailurePolicy,
    collect_results: bool,
    sink: &'a dyn RecordSink,
    retry: RetryPolicy,
    locations: BTreeSet<LocationId>,
    staged: BTreeMap<LocationId, StagedLocation>,
    failed: Vec<LocationFailure>,
    cancelled: BTreeSet<LocationId>,
    diagnostics: Diagnostics,
    stats: JobStats,
    result: ReconstructionResult,
    first_error: Option<ReconstructionError>,
}

impl<'a> Collector<'a> {
    fn new(ctx: &'a RunContext, jobs: &[LocationJob]) -> Self {
        let mut staged = BTreeMap::new();
        for job in jobs.iter().filter(|job| job.batch.is_some()) {
            staged
                .entry(job.location.clone())
                .or_insert(StagedLocation {
                    remaining: 0,
                    records: None,
                    spoiled: false,
                })
                .remaining += 1;
        }
        Self {
            policy: ctx.config().failure_policy,
            collect_results: ctx.config().collect_results,
            sink: ctx.sink(),
            retry: ctx.retry_policy(),
            locations: BTreeSet::new(),
            staged,
            failed: Vec::new(),
            cancelled: BTreeSet::new(),
            diagnostics: Diagnostics::new(),
            stats: JobStats::default(),
            result: ReconstructionResult::new(),
            first_error: None,
        }
    }

    fn accept(&mut self, (job, reply): JobReply, cancel: &CancellationToken) {
        self.locations.insert(job.location.clone());
        match reply {
            Ok(outcome) => {
                self.stats.add(outcome.stats);
                self.diagnostics.merge(outcome.diagnostics);
                match outcome.status {
                    JobStatus::Completed(records) => {
                        if self.collect_results {
                            self.result.merge(&records);
                        }
                    }
                    JobStatus::Staged(records) => self.stage(&job, Some(records), cancel),
                    JobStatus::Cancelled => {
                        self.cancelled.insert(job.location.clone());
                        self.stage(&job, None, cancel);
                    }
                }
            }
            Err(err) => {
                self.fail(&job, &err, cancel);
                self.stage(&job, None, cancel);
            }
        }
    }

    /// Records a job that was never started because the run was cancelled.
    fn skip(&mut self, job: &LocationJob, cancel: &CancellationToken) {
        self.locations.insert(job.location.clone());
        self.cancelled.insert(job.location.clone());
        self.stage(job, None, cancel);
    }

    /// Adds one batch's records to its location, or spoils the location when
    /// `records` is `None`. The last batch in commits the location.
    fn stage(
        &mut self,
        job: &LocationJob,
        records: Option<LocationRecords>,
        cancel: &CancellationToken,
    ) {
        if job.batch.is_none() {
            return;
        }
        let Some(entry) = self.staged.get_mut(&job.location) else {
            return;
        };
        match records {
            Some(batch) if !entry.spoiled => match &mut entry.records {
                Some(held) => held.absorb(batch),
                None => entry.records = Some(batch),
            },
            Some(_) => {}
            None => {
                entry.spoiled = true;
                entry.records = None;
            }
        }
        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining > 0 {
            return;
        }

        let Some(StagedLocation {
            records: Some(records),
            spoiled: false,
            ..
        }) = self.staged.remove(&job.location)
        else {
            return;
        };
        match records.write_to(self.sink, &self.retry) {
            Ok(()) => {
                if self.collect_results {
                    self.result.merge(&records);
                }
            }
            Err(err) => self.fail(job, &err, cancel),
        }
    }

    fn fail(&mut self, job: &LocationJob, err: &ReconstructionError, cancel: &CancellationToken) {
        warn!(job = %job, error = %err, "location failed");
        self.failed.push(LocationFailure {
            location: job.location.clone(),
            batch_index: job.batch_index,
            error: err.to_string(),
            retryable: err.is_retryable(),
        });
        if self.policy == FailurePolicy::FailFast && self.first_error.is_none() {
            cancel.cancel();
            self.first_error = Some(ReconstructionError::LocationFailed {
                location: job.location.clone(),
                reason: err.to_string(),
            });
        }
    }

    fn finish(mut self, run_id: RunId, started_at: DateTime<Utc>) -> RollResult<RunReport> {
        if let Some(err) = self.first_error {
            return Err(err.into());
        }
        let failed_locations: BTreeSet<&LocationId> =
            self.failed.iter().map(|f| &f.location).collect();
        let completed = self
            .locations
            .iter()
            .filter(|loc| !failed_locations.contains(loc) && !self.cancelled.contains(*loc))
            .cloned()
            .collect();
        self.failed
            .sort_by(|a, b| (&a.location, a.batch_index).cmp(&(&b.location, b.batch_index)));
        self.diagnostics.sort();
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            completed,
            failed: self.failed,
            cancelled: self.cancelled,
            diagnostics: self.diagnostics,
            stats: self.stats,
            result: self.collect_results.then_some(self.result),
        })
    }
}

/// Drives a whole run over a worker pool.
pub struct ReconstructionRuntime {
    engine: ReconstructionEngine,
    cancel: CancellationToken,
}

impl ReconstructionRuntime {
    #[must_use]
    pub fn new(engine: ReconstructionEngine) -> Self {
        Self {
            engine,
            cancel: CancellationToken::new(),
        }
    }

    /// Runtime whose runs stop when `cancel` is triggered.
    #[must_use]
    pub fn with_cancellation(engine: ReconstructionEngine, cancel: CancellationToken) -> Self {
        Self { engine, cancel }
    }

    /// Token that cancels this runtime's runs when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn engine(&self) -> &ReconstructionEngine {
        &self.engine
    }

    /// Reconstructs every location and waits for the workers to finish.
    ///
    /// Under `FailurePolicy::Isolate` failed locations are listed in the
    /// report and the run still succeeds.
    ///
    /// # Errors
    ///
    /// - Storage failures while listing locations.
    /// - Under `FailurePolicy::FailFast`, the first location failure.
    /// - `Disconnected` if the worker pool goes away mid-run.
    pub fn run(&self) -> RollResult<RunReport> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let config = self.engine.context().config();
        let jobs = self.engine.plan_jobs()?;

        info!(
            run_id = %run_id,
            horizon = %config.horizon(),
            jobs = jobs.len(),
            workers = config.workers,
            "reconstruction run started"
        );

        let (reply_tx, reply_rx) = unbounded::<JobReply>();
        let pool = WorkerPool::start(
            config.workers,
            config.queue_capacity,
            &self.engine,
            &self.cancel,
        );
        let mut collector = Collector::new(self.engine.context(), &jobs);
        let mut submit_error = None;

        for job in jobs {
            for reply in reply_rx.try_iter() {
                collector.accept(reply, &self.cancel);
            }
            if self.cancel.is_cancelled() || submit_error.is_some() {
                collector.skip(&job, &self.cancel);
                continue;
            }
            let task = Job::Reconstruct {
                job,
                reply: reply_tx.clone(),
            };
            if let Err(err) = pool.submit(task) {
                submit_error = Some(err);
            }
        }

        drop(reply_tx);
        pool.shutdown();
        for reply in reply_rx.try_iter() {
            collector.accept(reply, &self.cancel);
        }
        if let Some(err) = submit_error {
            return Err(err.into());
        }

        let report = collector.finish(run_id, started_at)?;
        info!(
            run_id = %run_id,
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            windows = report.stats.windows,
            days_simulated = report.stats.window.days_simulated,
            days_skipped = report.stats.window.days_skipped,
            "reconstruction run finished"
        );
        Ok(report)
    }
}
