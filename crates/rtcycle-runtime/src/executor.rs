//! Single-worker execution and run aggregation.

use crate::clock::CancelToken;
use crate::launcher::WorkerLauncher;
use crate::realtime::{Platform, RealtimeEnvironment};
use crate::worker::{CycleTask, CyclicWorker, WorkerIdentity, WorkerReport};
use rtcycle_common::error::{RtError, RtResult};
use std::time::Duration;
use tracing::{error, info};

/// Outcome of a run once every worker has been joined.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Reports of workers that finished.
    pub reports: Vec<WorkerReport>,
    /// Failures observed after launch (join, worker, or session errors).
    pub failures: Vec<RtError>,
}

impl RunSummary {
    /// Whether every worker finished and teardown succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit status: 0 on success, otherwise that of the first failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.failures.first().map_or(0, RtError::exit_code)
    }

    /// Executions summed over every finished worker.
    #[must_use]
    pub fn total_executions(&self) -> u64 {
        self.reports.iter().map(|r| r.executions).sum()
    }

    /// Fold one joined worker into the summary.
    pub(crate) fn absorb(&mut self, worker: &str, outcome: RtResult<RtResult<WorkerReport>>) {
        match outcome.and_then(|inner| inner) {
            Ok(report) => self.reports.push(report),
            Err(err) => {
                error!(worker, error = %err, "Worker failed");
                self.failures.push(err);
            }
        }
    }
}

/// Parameters of a single-worker run.
pub struct SingleWorkerRun<T: CycleTask> {
    /// Cycle period.
    pub period: Duration,
    /// Iteration budget.
    pub runs: u64,
    /// Wake-latency ring buffer size.
    pub histogram_size: usize,
    /// Task body.
    pub task: T,
    /// Optional cancellation, checked before every sleep.
    pub cancel: Option<CancelToken>,
}

impl<T: CycleTask> SingleWorkerRun<T> {
    /// Run `task` every `period`, `runs` times.
    pub fn new(task: T, period: Duration, runs: u64) -> Self {
        Self {
            period,
            runs,
            histogram_size: 1024,
            task,
            cancel: None,
        }
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set the wake-latency ring buffer size.
    #[must_use]
    pub fn with_histogram_size(mut self, size: usize) -> Self {
        self.histogram_size = size;
        self
    }
}

/// Lock memory, launch one real-time worker, and wait for it.
///
/// The base timestamp is taken at the worker's first execution.
///
/// # Errors
///
/// Setup failures ([`RtError::MemoryLock`], [`RtError::Privilege`],
/// [`RtError::Launch`]) are returned before any task body runs. Failures
/// after launch are collected in the returned [`RunSummary`].
pub fn run_single<P, T>(
    env: &mut RealtimeEnvironment<P>,
    launcher: &mut WorkerLauncher,
    run: SingleWorkerRun<T>,
) -> RtResult<RunSummary>
where
    P: Platform,
    T: CycleTask + 'static,
{
    if run.runs == 0 {
        return Err(RtError::Config("iteration budget must be at least 1".into()));
    }

    env.prepare(false)?;

    let SingleWorkerRun {
        period,
        runs,
        histogram_size,
        task,
        cancel,
    } = run;

    let identity = WorkerIdentity::new(0);
    let name = identity.name.clone();
    let handle = launcher.launch(&name, move || {
        let mut worker = CyclicWorker::new(identity, task, period, runs)
            .with_histogram_size(histogram_size);
        if let Some(cancel) = cancel {
            worker = worker.with_cancel(cancel);
        }
        worker.run()
    })?;

    info!(worker = %name, ?period, runs, "Single worker started");

    let mut summary = RunSummary::default();
    summary.absorb(&name, handle.join());
    Ok(summary)
}
