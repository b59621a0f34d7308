//! Multi-worker coordination: one worker per session rank, each with its own
//! period taken from the rank-indexed period table.

use crate::clock::{monotonic_now, CancelToken};
use crate::executor::RunSummary;
use crate::launcher::{Launch, WorkerHandle};
use crate::realtime::{Platform, RealtimeEnvironment};
use crate::session::Session;
use crate::worker::{CycleTask, CyclicWorker, WorkerIdentity, WorkerReport};
use rtcycle_common::config::PeriodTable;
use rtcycle_common::error::{RtError, RtResult};
use rtcycle_common::time::MonoTime;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type RankHandle = WorkerHandle<RtResult<WorkerReport>>;

/// Launches and joins one cyclic worker per local rank of a [`Session`].
pub struct MultiWorkerCoordinator<S: Session> {
    session: Arc<S>,
    table: Arc<PeriodTable>,
    runs: u64,
    histogram_size: usize,
}

impl<S: Session + 'static> MultiWorkerCoordinator<S> {
    /// Coordinator running `runs` iterations per worker.
    pub fn new(session: S, table: PeriodTable, runs: u64) -> Self {
        Self {
            session: Arc::new(session),
            table: Arc::new(table),
            runs,
            histogram_size: 1024,
        }
    }

    /// Set the per-worker wake-latency ring buffer size.
    #[must_use]
    pub fn with_histogram_size(mut self, size: usize) -> Self {
        self.histogram_size = size;
        self
    }

    /// Session shared with the workers.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Period table consulted by the workers.
    pub fn table(&self) -> &PeriodTable {
        &self.table
    }

    /// Prepare the process, start the session, launch one worker per local
    /// rank, join them all, then end the session.
    ///
    /// `make_task` builds the task body for the n-th launched worker.
    ///
    /// # Errors
    ///
    /// Setup failures and session-start failures are returned before any
    /// worker runs. If launching a worker fails, the workers already running
    /// are cancelled and joined, the session is ended, and the launch error
    /// is returned. Failures after a complete launch are collected in the
    /// returned [`RunSummary`].
    pub fn run<P, L, T, F>(
        &self,
        env: &mut RealtimeEnvironment<P>,
        launcher: &mut L,
        mut make_task: F,
        cancel: &CancelToken,
    ) -> RtResult<RunSummary>
    where
        P: Platform,
        L: Launch,
        T: CycleTask + 'static,
        F: FnMut(usize) -> T,
    {
        if self.runs == 0 {
            return Err(RtError::Config("iteration budget must be at least 1".into()));
        }

        env.prepare(true)?;
        self.session.init_session()?;

        let ranks = self.session.local_ranks();
        let mut handles: Vec<RankHandle> = Vec::with_capacity(ranks);

        for worker_id in 0..ranks {
            let launched = monotonic_now().and_then(|base| {
                let task = make_task(worker_id);
                self.launch_rank(launcher, worker_id, task, base, cancel)
            });

            match launched {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(worker_id, error = %err, "Launch failed, rolling back started workers");
                    cancel.cancel();
                    let summary = self.join_all(handles);
                    if let Err(end_err) = self.session.end_session() {
                        warn!(error = %end_err, "Ending session during rollback failed");
                    }
                    debug!(
                        joined = summary.reports.len(),
                        failed = summary.failures.len(),
                        "Rollback complete"
                    );
                    return Err(err);
                }
            }
        }

        info!(workers = handles.len(), runs = self.runs, "All workers launched");

        let mut summary = self.join_all(handles);
        if let Err(err) = self.session.end_session() {
            error!(error = %err, "Ending session failed");
            summary.failures.push(err);
        }
        Ok(summary)
    }

    fn launch_rank<L, T>(
        &self,
        launcher: &mut L,
        worker_id: usize,
        task: T,
        base: MonoTime,
        cancel: &CancelToken,
    ) -> RtResult<RankHandle>
    where
        L: Launch,
        T: CycleTask + 'static,
    {
        let session = Arc::clone(&self.session);
        let table = Arc::clone(&self.table);
        let cancel = cancel.clone();
        let runs = self.runs;
        let histogram_size = self.histogram_size;

        launcher.launch(&format!("rt-rank-{worker_id}"), move || {
            let rank = session.query_rank()?;
            let period = table.period_for(rank)?;
            let host = session.query_host_name()?;

            let identity = WorkerIdentity::new(worker_id)
                .with_rank(rank)
                .with_host(host);

            CyclicWorker::new(identity, task, period, runs)
                .with_base(base)
                .with_cancel(cancel)
                .with_histogram_size(histogram_size)
                .run()
        })
    }

    fn join_all(&self, handles: Vec<RankHandle>) -> RunSummary {
        let mut summary = RunSummary::default();
        for handle in handles {
            let name = handle.name().to_string();
            summary.absorb(&name, handle.join());
        }
        debug!(
            finished = summary.reports.len(),
            failed = summary.failures.len(),
            "Workers joined"
        );
        summary
    }
}
