//! Coordination sessions: where a worker's rank and host identity come from.

use rtcycle_common::error::{RtError, RtResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Environment variables consulted for the rank, in priority order.
pub const RANK_ENV_VARS: [&str; 4] = [
    "OMPI_COMM_WORLD_RANK",
    "PMI_RANK",
    "PMIX_RANK",
    "SLURM_PROCID",
];

/// Distributed-coordination layer seen by the coordinator and its workers.
///
/// `query_rank` and `query_host_name` are called from inside worker threads.
pub trait Session: Send + Sync {
    /// Join the session. Called once before any worker is launched.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Session`] if the session cannot be established.
    fn init_session(&self) -> RtResult<()>;

    /// Rank of the calling worker.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Session`] if no rank is available.
    fn query_rank(&self) -> RtResult<u32>;

    /// Name of the machine hosting the calling worker.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Session`] if the host name cannot be determined.
    fn query_host_name(&self) -> RtResult<String>;

    /// Leave the session. Called once after every worker has been joined.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Session`] if the session was not active.
    fn end_session(&self) -> RtResult<()>;

    /// Number of ranks hosted by this process.
    fn local_ranks(&self) -> usize;
}

/// Host name of this machine.
///
/// # Errors
///
/// Returns [`RtError::Session`] if `gethostname` fails or the name is not
/// valid UTF-8.
pub fn host_name() -> RtResult<String> {
    nix::unistd::gethostname()
        .map_err(|e| RtError::Session(format!("gethostname failed: {e}")))?
        .into_string()
        .map_err(|raw| RtError::Session(format!("host name {raw:?} is not UTF-8")))
}

/// All ranks hosted as threads of this process.
///
/// Ranks are handed out in call order: the k-th `query_rank` returns k.
#[derive(Debug)]
pub struct LocalSession {
    ranks: usize,
    next_rank: AtomicU32,
    active: AtomicBool,
}

impl LocalSession {
    /// Session hosting `ranks` workers.
    #[must_use]
    pub fn new(ranks: usize) -> Self {
        Self {
            ranks,
            next_rank: AtomicU32::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Whether the session has been initialized and not yet ended.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Session for LocalSession {
    fn init_session(&self) -> RtResult<()> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(RtError::Session("local session already initialized".into()));
        }
        self.next_rank.store(0, Ordering::Release);
        info!(ranks = self.ranks, "Local session started");
        Ok(())
    }

    fn query_rank(&self) -> RtResult<u32> {
        if !self.is_active() {
            return Err(RtError::Session("rank queried outside an active session".into()));
        }
        let rank = self.next_rank.fetch_add(1, Ordering::AcqRel);
        if usize::try_from(rank).map_or(true, |r| r >= self.ranks) {
            return Err(RtError::Session(format!(
                "rank {rank} requested but only {} ranks are hosted",
                self.ranks
            )));
        }
        Ok(rank)
    }

    fn query_host_name(&self) -> RtResult<String> {
        host_name()
    }

    fn end_session(&self) -> RtResult<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Err(RtError::Session("local session was not active".into()));
        }
        debug!("Local session ended");
        Ok(())
    }

    fn local_ranks(&self) -> usize {
        self.ranks
    }
}

/// One rank per process, assigned by an external launcher (`mpirun`, `srun`).
#[derive(Debug, Default)]
pub struct EnvSession {
    rank: OnceLock<u32>,
}

impl EnvSession {
    /// Session reading its rank from the process environment at init.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the rank from the first variable in [`RANK_ENV_VARS`] that
    /// `lookup` finds.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Session`] if none is set or the value is not a
    /// non-negative integer.
    pub fn rank_from<F>(lookup: F) -> RtResult<u32>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (var, value) = RANK_ENV_VARS
            .iter()
            .find_map(|&var| lookup(var).map(|value| (var, value)))
            .ok_or_else(|| {
                RtError::Session(format!(
                    "no rank in environment (looked for {})",
                    RANK_ENV_VARS.join(", ")
                ))
            })?;

        value
            .trim()
            .parse()
            .map_err(|_| RtError::Session(format!("{var}={value:?} is not a valid rank")))
    }
}

impl Session for EnvSession {
    fn init_session(&self) -> RtResult<()> {
        let rank = Self::rank_from(|var| std::env::var(var).ok())?;
        self.rank
            .set(rank)
            .map_err(|_| RtError::Session("environment session already initialized".into()))?;
        info!(rank, "Environment session started");
        Ok(())
    }

    fn query_rank(&self) -> RtResult<u32> {
        self.rank
            .get()
            .copied()
            .ok_or_else(|| RtError::Session("rank queried before session init".into()))
    }

    fn query_host_name(&self) -> RtResult<String> {
        host_name()
    }

    fn end_session(&self) -> RtResult<()> {
        if self.rank.get().is_none() {
            return Err(RtError::Session("environment session was not active".into()));
        }
        debug!("Environment session ended");
        Ok(())
    }

    fn local_ranks(&self) -> usize {
        1
    }
}
