//! Configuration structures for the cyclic executor.
//!
//! Supports TOML deserialization with defaults matching the reference
//! single-worker and multi-worker programs.

use crate::error::{RtError, RtResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-rank period table in milliseconds.
pub const DEFAULT_PERIOD_TABLE_MS: [u32; 20] = [
    30, 40, 60, 20, 40, 55, 90, 50, 10, 10, 10, 20, 22, 46, 78, 55, 50, 20, 34, 40,
];

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Process-wide real-time setup.
    pub realtime: RealtimeConfig,

    /// Thread attributes applied to every worker.
    pub worker: WorkerConfig,

    /// Single-worker variant.
    pub single: SingleConfig,

    /// Multi-worker variant.
    pub multicore: MulticoreConfig,

    /// Wake-latency metrics.
    pub metrics: MetricsConfig,
}

/// Process-wide real-time setup performed before any worker starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Lock all current and future pages (mlockall).
    /// May only be disabled for non-real-time (`other`) workers.
    pub lock_memory: bool,

    /// Raise `CAP_SYS_NICE` before launching workers.
    /// Unset means the variant default: off for single, on for multicore.
    pub raise_privilege: Option<bool>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            lock_memory: true,
            raise_privilege: None,
        }
    }
}

/// Thread attributes for worker launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker stack size in bytes (at least `PTHREAD_STACK_MIN`).
    pub stack_size: usize,

    /// Scheduler policy.
    pub policy: SchedPolicy,

    /// Static priority shared by every worker (1-99 for RT policies).
    pub priority: u8,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stack_size: 256 * 1024,
            policy: SchedPolicy::Fifo,
            priority: 1,
        }
    }
}

impl WorkerConfig {
    /// Priority actually handed to the scheduler.
    ///
    /// `SCHED_OTHER` only accepts a static priority of 0.
    #[must_use]
    pub fn effective_priority(&self) -> u8 {
        match self.policy {
            SchedPolicy::Other => 0,
            SchedPolicy::Fifo | SchedPolicy::Rr => self.priority,
        }
    }
}

/// Scheduler policy for worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT, development only).
    Other,
}

impl SchedPolicy {
    /// Whether this is a real-time policy.
    #[must_use]
    pub fn is_realtime(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Single-worker variant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleConfig {
    /// Cycle period.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Number of task executions before the worker exits.
    pub runs: u64,
}

impl Default for SingleConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(30),
            runs: 100,
        }
    }
}

/// Multi-worker variant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticoreConfig {
    /// Period per rank.
    pub period_table: PeriodTable,

    /// Number of task executions per worker.
    pub runs: u64,

    /// Ranks hosted by this process when using the local session.
    pub ranks: usize,

    /// Where ranks come from.
    pub session: SessionKind,
}

impl Default for MulticoreConfig {
    fn default() -> Self {
        Self {
            period_table: PeriodTable::default(),
            runs: 10,
            ranks: 3,
            session: SessionKind::Local,
        }
    }
}

/// Source of rank and host identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// All ranks run as threads of this process.
    #[default]
    Local,
    /// One rank per process, taken from the launcher environment (srun/mpirun).
    Env,
}

/// Wake-latency metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the per-worker latency ring buffer.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 1024,
        }
    }
}

/// Ordered per-rank periods in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodTable(Vec<u32>);

impl Default for PeriodTable {
    fn default() -> Self {
        Self(DEFAULT_PERIOD_TABLE_MS.to_vec())
    }
}

impl PeriodTable {
    /// Create a table from millisecond periods.
    #[must_use]
    pub fn new(periods_ms: Vec<u32>) -> Self {
        Self(periods_ms)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Period in milliseconds for `rank`.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::RankOutOfRange`] if the table has no entry for `rank`.
    pub fn period_ms(&self, rank: u32) -> RtResult<u32> {
        usize::try_from(rank)
            .ok()
            .and_then(|idx| self.0.get(idx).copied())
            .ok_or(RtError::RankOutOfRange {
                rank,
                len: self.0.len(),
            })
    }

    /// Period for `rank`.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::RankOutOfRange`] if the table has no entry for `rank`.
    pub fn period_for(&self, rank: u32) -> RtResult<Duration> {
        self.period_ms(rank)
            .map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Iterate over the periods in rank order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> RtResult<()> {
        if self.worker.policy.is_realtime() && !self.realtime.lock_memory {
            return Err(RtError::Config(format!(
                "real-time policy {:?} requires realtime.lock_memory = true",
                self.worker.policy
            )));
        }

        if self.worker.policy.is_realtime() && !(1..=99).contains(&self.worker.priority) {
            return Err(RtError::Config(format!(
                "worker.priority {} outside real-time range 1-99",
                self.worker.priority
            )));
        }

        if self.single.period.is_zero() {
            return Err(RtError::Config("single.period must be non-zero".into()));
        }
        if self.single.runs == 0 {
            return Err(RtError::Config("single.runs must be at least 1".into()));
        }

        if self.multicore.runs == 0 {
            return Err(RtError::Config("multicore.runs must be at least 1".into()));
        }
        if self.multicore.period_table.is_empty() {
            return Err(RtError::Config("multicore.period_table is empty".into()));
        }
        if let Some(rank) = self.multicore.period_table.iter().position(|ms| ms == 0) {
            return Err(RtError::Config(format!(
                "multicore.period_table entry for rank {rank} is zero"
            )));
        }
        if self.multicore.ranks == 0 {
            return Err(RtError::Config("multicore.ranks must be at least 1".into()));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
