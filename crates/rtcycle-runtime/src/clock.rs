//! Absolute-time period clock.
//!
//! Every wake target is derived from the previous target, never from the time
//! the task body finished, so execution time does not accumulate as drift.
//! Sleeping uses `clock_nanosleep` with `TIMER_ABSTIME` on `CLOCK_MONOTONIC`.
//!
//! Threads sleeping on behalf of a [`CancelToken`] register as waiters;
//! cancelling sends each of them [`WAKE_SIGNAL`] so the absolute wait returns
//! `EINTR` and the token is rechecked without waiting for the next wake.

use nix::sys::pthread::{pthread_kill, pthread_self, Pthread};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::time::{clock_gettime, ClockId};
use rtcycle_common::error::{ClockOp, OsErrno, RtError, RtResult};
use rtcycle_common::time::{period_nanos, MonoTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tracing::{trace, warn};

/// Signal used to interrupt waiters of a cancelled token.
pub const WAKE_SIGNAL: Signal = Signal::SIGUSR1;

/// Read `CLOCK_MONOTONIC`.
///
/// # Errors
///
/// Returns [`RtError::Clock`] if the clock cannot be read.
pub fn monotonic_now() -> RtResult<MonoTime> {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(|e| RtError::Clock {
        op: ClockOp::Read,
        errno: OsErrno(e as i32),
    })?;
    Ok(MonoTime::from_parts(i64::from(ts.tv_sec()), i64::from(ts.tv_nsec())))
}

/// Block until `target` on the monotonic clock, returning the raw result code
/// of `clock_nanosleep` (0 on success, an errno value otherwise).
fn sleep_until_raw(target: MonoTime) -> i32 {
    #[allow(clippy::cast_possible_truncation)]
    let ts = libc::timespec {
        tv_sec: target.secs() as libc::time_t,
        tv_nsec: target.subsec_nanos() as libc::c_long,
    };

    // SAFETY: `ts` is a valid, normalized timespec and the remainder pointer
    // may be null for absolute sleeps.
    unsafe {
        libc::clock_nanosleep(
            libc::CLOCK_MONOTONIC,
            libc::TIMER_ABSTIME,
            &ts,
            std::ptr::null_mut(),
        )
    }
}

extern "C" fn on_wake(_signum: libc::c_int) {}

/// Install the no-op [`WAKE_SIGNAL`] handler once per process, without
/// `SA_RESTART` so blocking waits return `EINTR`.
fn wake_handler_installed() -> bool {
    static INSTALLED: OnceLock<bool> = OnceLock::new();

    *INSTALLED.get_or_init(|| {
        let action = SigAction::new(
            SigHandler::Handler(on_wake),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler has an empty body.
        match unsafe { sigaction(WAKE_SIGNAL, &action) } {
            Ok(_) => true,
            Err(errno) => {
                warn!(%errno, "Wake handler not installed, cancellation takes effect at the next wake");
                false
            }
        }
    })
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Pthread>>,
}

impl CancelState {
    fn waiters(&self) -> MutexGuard<'_, Vec<Pthread>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cooperative cancellation flag shared between a controller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Create an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (can be called from any thread).
    ///
    /// Registered waiters are interrupted so they observe the request at once.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);

        // Waiters deregister under this lock, so every listed thread is alive.
        for &thread in self.state.waiters().iter() {
            if let Err(errno) = pthread_kill(thread, WAKE_SIGNAL) {
                warn!(%errno, "Failed to interrupt waiting worker");
            }
        }
    }

    /// Whether cancellation has been requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Register the calling thread as a waiter until the guard is dropped.
    ///
    /// If the wake handler cannot be installed the guard registers nothing
    /// and cancellation is only seen before the next sleep.
    #[must_use]
    pub fn register_waiter(&self) -> WaiterGuard {
        let thread = wake_handler_installed().then(pthread_self);
        if let Some(thread) = thread {
            self.state.waiters().push(thread);
        }
        WaiterGuard {
            state: Arc::clone(&self.state),
            thread,
        }
    }

    /// Number of threads currently registered as waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state.waiters().len()
    }
}

/// Waiter registration returned by [`CancelToken::register_waiter`].
#[derive(Debug)]
pub struct WaiterGuard {
    state: Arc<CancelState>,
    thread: Option<Pthread>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if let Some(thread) = self.thread {
            let mut waiters = self.state.waiters();
            if let Some(pos) = waiters.iter().position(|t| *t == thread) {
                waiters.swap_remove(pos);
            }
        }
    }
}

/// Outcome of one advance-and-sleep step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The next wake time was reached.
    Elapsed,
    /// Cancellation was observed; `next_wake` was not advanced.
    Cancelled,
}

/// Fixed-period clock owning the absolute next-wake timestamp of one worker.
#[derive(Debug, Clone)]
pub struct PeriodClock {
    next_wake: MonoTime,
    period_ns: u64,
}

impl PeriodClock {
    /// Capture the current monotonic time as the first wake point.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Clock`] if the clock cannot be read.
    pub fn init(period: Duration) -> RtResult<Self> {
        Ok(Self::starting_at(monotonic_now()?, period))
    }

    /// Create a clock whose first wake point is `start`.
    #[must_use]
    pub fn starting_at(start: MonoTime, period: Duration) -> Self {
        Self {
            next_wake: start,
            period_ns: period_nanos(period),
        }
    }

    /// Current absolute wake target.
    #[must_use]
    pub fn next_wake(&self) -> MonoTime {
        self.next_wake
    }

    /// Period in nanoseconds.
    #[must_use]
    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// Advance the wake target by one period and sleep until it.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Clock`] if the absolute wait fails for a reason
    /// other than signal interruption.
    pub fn advance_and_sleep(&mut self) -> RtResult<()> {
        self.sleep_to_next(None).map(|_| ())
    }

    /// Like [`advance_and_sleep`](Self::advance_and_sleep), but checks `cancel`
    /// before sleeping and after any interrupted wait.
    ///
    /// On [`Wake::Cancelled`] the wake target is left unchanged, so a later
    /// call targets the same slot.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Clock`] if the absolute wait fails.
    pub fn advance_and_sleep_or_cancel(&mut self, cancel: &CancelToken) -> RtResult<Wake> {
        self.sleep_to_next(Some(cancel))
    }

    fn sleep_to_next(&mut self, cancel: Option<&CancelToken>) -> RtResult<Wake> {
        let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);

        if cancelled() {
            return Ok(Wake::Cancelled);
        }

        let target = self.next_wake.advanced(self.period_ns);

        loop {
            match sleep_until_raw(target) {
                0 => break,
                libc::EINTR => {
                    if cancelled() {
                        return Ok(Wake::Cancelled);
                    }
                    // Same absolute target, so re-arming cannot drift.
                    trace!(%target, "absolute wait interrupted, re-arming");
                }
                errno => {
                    return Err(RtError::Clock {
                        op: ClockOp::Wait,
                        errno: OsErrno(errno),
                    })
                }
            }
        }

        self.next_wake = target;
        Ok(Wake::Elapsed)
    }
}
