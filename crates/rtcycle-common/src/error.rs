use std::fmt;
use thiserror::Error;

/// Exit status used for configuration errors.
pub const EXIT_CONFIG: u8 = 2;
/// Exit status used for coordination-session errors.
pub const EXIT_SESSION: u8 = 3;
/// Fallback exit status when a failure carries no OS error number.
pub const EXIT_FAILURE: u8 = 1;

/// Raw OS error number returned by a failed platform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsErrno(pub i32);

impl OsErrno {
    /// Capture the calling thread's current `errno`.
    #[must_use]
    pub fn last() -> Self {
        Self(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    /// Exit status for this error number, clamped into `1..=255`.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        u8::try_from(self.0)
            .ok()
            .filter(|code| *code != 0)
            .unwrap_or(EXIT_FAILURE)
    }
}

impl fmt::Display for OsErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

/// Step of the capability read/modify/commit sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivilegeStep {
    /// Reading the process capability set (`capget`).
    Read,
    /// Adding the capability to the effective set.
    Modify,
    /// Committing the modified set back to the process (`capset`).
    Commit,
}

impl fmt::Display for PrivilegeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read capabilities"),
            Self::Modify => write!(f, "modify capabilities"),
            Self::Commit => write!(f, "commit capabilities"),
        }
    }
}

/// Step of real-time thread creation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchStep {
    /// Initializing the attribute object.
    Attributes,
    /// `pthread_attr_setstacksize`.
    StackSize,
    /// `pthread_attr_setschedpolicy`.
    Policy,
    /// `pthread_attr_setschedparam`.
    Priority,
    /// `pthread_attr_setinheritsched`.
    Inheritance,
    /// `pthread_create`.
    Create,
}

impl fmt::Display for LaunchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attributes => write!(f, "attribute init"),
            Self::StackSize => write!(f, "stack size"),
            Self::Policy => write!(f, "scheduling policy"),
            Self::Priority => write!(f, "scheduling priority"),
            Self::Inheritance => write!(f, "inherit-scheduler mode"),
            Self::Create => write!(f, "thread creation"),
        }
    }
}

/// Monotonic clock operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockOp {
    /// `clock_gettime(CLOCK_MONOTONIC)`.
    Read,
    /// `clock_nanosleep(CLOCK_MONOTONIC, TIMER_ABSTIME)`.
    Wait,
}

impl fmt::Display for ClockOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Wait => write!(f, "absolute wait"),
        }
    }
}

/// Errors raised while preparing, launching, running, or joining cyclic workers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RtError {
    /// Configuration or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// `mlockall` failed; real-time workers must not start.
    #[error("memory lock failed: {errno}")]
    MemoryLock {
        /// OS error from `mlockall`.
        errno: OsErrno,
    },

    /// Raising the scheduling capability failed.
    #[error("privilege raise failed at {step}: {errno}")]
    Privilege {
        /// Which step of the sequence failed.
        step: PrivilegeStep,
        /// OS error for the failing step.
        errno: OsErrno,
    },

    /// Configuring or creating a real-time thread failed.
    #[error("worker launch failed at {step}: {errno}")]
    Launch {
        /// Which attribute step (or creation) failed.
        step: LaunchStep,
        /// OS error for the failing step.
        errno: OsErrno,
    },

    /// Waiting for a worker to terminate failed, or the worker panicked.
    #[error("join of worker {worker} failed: {reason}")]
    Join {
        /// Worker name.
        worker: String,
        /// Human-readable reason.
        reason: String,
        /// OS error from `pthread_join`, if that was the cause.
        errno: Option<OsErrno>,
    },

    /// Monotonic clock read or absolute wait failed.
    #[error("clock {op} failed: {errno}")]
    Clock {
        /// Which clock operation failed.
        op: ClockOp,
        /// OS error for the operation.
        errno: OsErrno,
    },

    /// Coordination session failure (rank or host query, session lifecycle).
    #[error("session error: {0}")]
    Session(String),

    /// A worker rank has no entry in the period table.
    #[error("rank {rank} has no period entry (table has {len} entries)")]
    RankOutOfRange {
        /// Rank reported by the session.
        rank: u32,
        /// Number of entries in the period table.
        len: usize,
    },
}

impl RtError {
    /// Process exit status for this error.
    ///
    /// OS-level failures exit with their error number so the failing step is
    /// visible to the caller.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Session(_) | Self::RankOutOfRange { .. } => EXIT_SESSION,
            Self::MemoryLock { errno }
            | Self::Privilege { errno, .. }
            | Self::Launch { errno, .. }
            | Self::Clock { errno, .. } => errno.exit_code(),
            Self::Join { errno, .. } => errno.map_or(EXIT_FAILURE, OsErrno::exit_code),
        }
    }

    /// Whether this error happened before any worker ran.
    #[must_use]
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MemoryLock { .. } | Self::Privilege { .. } | Self::Launch { .. }
        )
    }
}

/// Convenience type alias for rtcycle operations.
pub type RtResult<T> = Result<T, RtError>;
