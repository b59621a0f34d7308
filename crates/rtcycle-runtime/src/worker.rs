//! Cyclic worker: runs a task body at a fixed period for a fixed budget.
//!
//! The loop per iteration:
//! 1. Read the monotonic clock (cycle start)
//! 2. Record wake latency against the scheduled wake time
//! 3. Execute the task body
//! 4. Stop once the iteration budget is reached
//! 5. Otherwise advance the period clock and sleep until the next wake

use crate::clock::{monotonic_now, CancelToken, PeriodClock, Wake};
use rtcycle_common::error::{RtError, RtResult};
use rtcycle_common::metrics::{CycleMetrics, MetricsSnapshot};
use rtcycle_common::time::MonoTime;
use std::time::Duration;
use tracing::{debug, info};

/// Identity of one worker, carried into every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Index of the worker within this process.
    pub worker_id: usize,
    /// Thread/worker name.
    pub name: String,
    /// Rank within the coordination session, if any.
    pub rank: Option<u32>,
    /// Hosting machine name, if known.
    pub host: Option<String>,
}

impl WorkerIdentity {
    /// Identity for a standalone worker.
    #[must_use]
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            name: format!("rt-{worker_id}"),
            rank: None,
            host: None,
        }
    }

    /// Attach a session rank.
    #[must_use]
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    /// Attach the hosting machine name.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// One execution of the task body.
#[derive(Debug, Clone, Copy)]
pub struct Cycle<'a> {
    /// Worker executing this cycle.
    pub identity: &'a WorkerIdentity,
    /// Zero-based iteration index.
    pub iteration: u64,
    /// Wake time this cycle was scheduled for.
    pub scheduled: MonoTime,
    /// Time the task body started.
    pub started: MonoTime,
    /// Nanoseconds since the worker's base timestamp.
    pub elapsed_ns: u64,
    /// Configured period.
    pub period: Duration,
}

impl Cycle<'_> {
    /// Start time minus scheduled wake time, in nanoseconds.
    #[must_use]
    pub fn latency_ns(&self) -> u64 {
        self.started.nanos_since(self.scheduled)
    }

    /// Period in whole milliseconds.
    #[must_use]
    pub fn period_ms(&self) -> u64 {
        u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Bounded unit of work executed once per period.
///
/// Implementations must return well within one period; the executor does not
/// preempt a slow body.
pub trait CycleTask: Send {
    /// Called exactly once, before the first [`run`](Self::run).
    fn on_start(&mut self, identity: &WorkerIdentity, period: Duration) {
        info!(
            worker_id = identity.worker_id,
            rank = identity.rank,
            host = identity.host.as_deref(),
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Spawned RT task"
        );
    }

    /// Execute one cycle.
    fn run(&mut self, cycle: &Cycle<'_>);
}

/// Adapter turning a closure into a [`CycleTask`].
pub struct FnTask<F>(F);

/// Wrap a closure as a task body.
pub fn task_fn<F>(f: F) -> FnTask<F>
where
    F: FnMut(&Cycle<'_>) + Send,
{
    FnTask(f)
}

impl<F> CycleTask for FnTask<F>
where
    F: FnMut(&Cycle<'_>) + Send,
{
    fn run(&mut self, cycle: &Cycle<'_>) {
        (self.0)(cycle);
    }
}

/// Count of completed executions against a fixed budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationCounter {
    count: u64,
    budget: u64,
}

impl IterationCounter {
    /// Start counting toward `budget` executions.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self { count: 0, budget }
    }

    /// Record one completed execution.
    pub fn increment(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Completed executions.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether the budget has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.count >= self.budget
    }
}

/// Summary returned when a worker finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker identity.
    pub identity: WorkerIdentity,
    /// Configured period.
    pub period: Duration,
    /// Number of task executions.
    pub executions: u64,
    /// Whether the loop ended through cancellation instead of the budget.
    pub cancelled: bool,
    /// Wake-latency statistics.
    pub latency: MetricsSnapshot,
}

/// Worker owning one period clock and one task body.
pub struct CyclicWorker<T: CycleTask> {
    identity: WorkerIdentity,
    task: T,
    period: Duration,
    budget: u64,
    base: Option<MonoTime>,
    cancel: Option<CancelToken>,
    histogram_size: usize,
}

impl<T: CycleTask> CyclicWorker<T> {
    /// Create a worker running `task` every `period`, `budget` times.
    pub fn new(identity: WorkerIdentity, task: T, period: Duration, budget: u64) -> Self {
        Self {
            identity,
            task,
            period,
            budget,
            base: None,
            cancel: None,
            histogram_size: 1024,
        }
    }

    /// Use `base` for elapsed-time telemetry instead of the first cycle start.
    #[must_use]
    pub fn with_base(mut self, base: MonoTime) -> Self {
        self.base = Some(base);
        self
    }

    /// Stop early (before the next sleep) once `cancel` is triggered.
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

    /// Worker identity.
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Run the cycle loop until the budget is exhausted or cancellation.
    ///
    /// Must be called from the execution unit that owns this worker.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Config`] for a zero budget or period and
    /// [`RtError::Clock`] if the monotonic clock fails.
    pub fn run(mut self) -> RtResult<WorkerReport> {
        if self.budget == 0 {
            return Err(RtError::Config("iteration budget must be at least 1".into()));
        }
        if self.period.is_zero() {
            return Err(RtError::Config("period must be non-zero".into()));
        }

        let mut metrics = CycleMetrics::new(self.histogram_size, self.period);
        let mut counter = IterationCounter::new(self.budget);
        let mut clock = PeriodClock::init(self.period)?;
        let mut scheduled = clock.next_wake();
        let mut cancelled = self.cancel.as_ref().is_some_and(CancelToken::is_cancelled);
        let _waiter = self.cancel.as_ref().map(CancelToken::register_waiter);

        debug!(
            worker = %self.identity.name,
            period_ns = clock.period_ns(),
            budget = self.budget,
            "Worker entering cycle loop"
        );

        while !cancelled {
            let started = monotonic_now()?;
            let base = *self.base.get_or_insert(started);

            if counter.count() == 0 {
                self.task.on_start(&self.identity, self.period);
            }

            let cycle = Cycle {
                identity: &self.identity,
                iteration: counter.count(),
                scheduled,
                started,
                elapsed_ns: started.nanos_since(base),
                period: self.period,
            };
            metrics.record_ns(cycle.latency_ns());
            self.task.run(&cycle);
            counter.increment();

            if counter.is_exhausted() {
                break;
            }

            let wake = match &self.cancel {
                Some(token) => clock.advance_and_sleep_or_cancel(token)?,
                None => {
                    clock.advance_and_sleep()?;
                    Wake::Elapsed
                }
            };
            cancelled = wake == Wake::Cancelled;
            scheduled = clock.next_wake();
        }

        if cancelled {
            info!(
                worker = %self.identity.name,
                executions = counter.count(),
                budget = self.budget,
                "Worker cancelled before exhausting its budget"
            );
        }

        Ok(WorkerReport {
            identity: self.identity,
            period: self.period,
            executions: counter.count(),
            cancelled,
            latency: metrics.snapshot(),
        })
    }
}
