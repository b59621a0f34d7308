//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Checking real-time prerequisites (root, PREEMPT_RT)
//! - Scripted platforms for setup-failure scenarios
//! - A task body that records every cycle for timing assertions

#![allow(dead_code)] // Not every scenario uses every helper

use rtcycle_common::config::{RealtimeConfig, SchedPolicy, WorkerConfig};
use rtcycle_common::error::OsErrno;
use rtcycle_common::time::MonoTime;
use rtcycle_runtime::{
    CapabilitySet, Cycle, CycleTask, Platform, RealtimeEnvironment, WorkerIdentity,
    WorkerLauncher,
};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Check if the system has PREEMPT_RT kernel.
pub fn has_preempt_rt() -> bool {
    if let Ok(version) = fs::read_to_string("/proc/version") {
        version.contains("PREEMPT_RT") || version.contains("PREEMPT RT")
    } else {
        false
    }
}

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Platform whose every call succeeds and which permits every capability.
pub struct PermissivePlatform;

impl Platform for PermissivePlatform {
    fn lock_all_memory(&self) -> Result<(), OsErrno> {
        Ok(())
    }

    fn read_capabilities(&self) -> Result<CapabilitySet, OsErrno> {
        Ok(CapabilitySet::from_masks(0, u64::MAX, 0))
    }

    fn commit_capabilities(&self, _caps: &CapabilitySet) -> Result<(), OsErrno> {
        Ok(())
    }
}

/// Platform whose `mlockall` fails with `errno`.
pub struct FailingLockPlatform(pub i32);

impl Platform for FailingLockPlatform {
    fn lock_all_memory(&self) -> Result<(), OsErrno> {
        Err(OsErrno(self.0))
    }

    fn read_capabilities(&self) -> Result<CapabilitySet, OsErrno> {
        Ok(CapabilitySet::from_masks(0, u64::MAX, 0))
    }

    fn commit_capabilities(&self, _caps: &CapabilitySet) -> Result<(), OsErrno> {
        Ok(())
    }
}

/// Environment that pretends setup succeeded.
pub fn permissive_env() -> RealtimeEnvironment<PermissivePlatform> {
    RealtimeEnvironment::new(PermissivePlatform, RealtimeConfig::default())
}

/// Launcher using `SCHED_OTHER`, usable without privileges.
pub fn time_sharing_launcher() -> WorkerLauncher {
    WorkerLauncher::new(WorkerConfig {
        policy: SchedPolicy::Other,
        ..WorkerConfig::default()
    })
}

/// Launcher using `SCHED_FIFO` at priority 1.
pub fn fifo_launcher() -> WorkerLauncher {
    WorkerLauncher::new(WorkerConfig::default())
}

/// One recorded cycle.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub worker_id: usize,
    pub rank: Option<u32>,
    pub host: Option<String>,
    pub iteration: u64,
    pub scheduled: MonoTime,
    pub started: MonoTime,
    pub elapsed_ns: u64,
}

/// Shared sink for recorded cycles and start announcements.
#[derive(Clone, Default)]
pub struct Recording {
    cycles: Arc<Mutex<Vec<CycleRecord>>>,
    announcements: Arc<Mutex<Vec<usize>>>,
}

impl Recording {
    /// Task body feeding this recording, busy for `work` per cycle.
    pub fn task(&self, work: Duration) -> RecordingTask {
        RecordingTask {
            sink: self.clone(),
            work,
        }
    }

    /// Every recorded cycle, in recording order.
    pub fn cycles(&self) -> Vec<CycleRecord> {
        self.cycles.lock().unwrap().clone()
    }

    /// Cycles of one worker, in iteration order.
    pub fn cycles_of(&self, worker_id: usize) -> Vec<CycleRecord> {
        let mut cycles: Vec<_> = self
            .cycles()
            .into_iter()
            .filter(|c| c.worker_id == worker_id)
            .collect();
        cycles.sort_by_key(|c| c.iteration);
        cycles
    }

    /// Worker ids that announced their start, one entry per announcement.
    pub fn announcements(&self) -> Vec<usize> {
        self.announcements.lock().unwrap().clone()
    }
}

/// Task body that records each cycle and optionally spins for a while.
pub struct RecordingTask {
    sink: Recording,
    work: Duration,
}

impl CycleTask for RecordingTask {
    fn on_start(&mut self, identity: &WorkerIdentity, _period: Duration) {
        self.sink
            .announcements
            .lock()
            .unwrap()
            .push(identity.worker_id);
    }

    fn run(&mut self, cycle: &Cycle<'_>) {
        self.sink.cycles.lock().unwrap().push(CycleRecord {
            worker_id: cycle.identity.worker_id,
            rank: cycle.identity.rank,
            host: cycle.identity.host.clone(),
            iteration: cycle.iteration,
            scheduled: cycle.scheduled,
            started: cycle.started,
            elapsed_ns: cycle.elapsed_ns,
        });

        if !self.work.is_zero() {
            let start = std::time::Instant::now();
            while start.elapsed() < self.work {
                std::hint::spin_loop();
            }
        }
    }
}

/// Milliseconds as nanoseconds.
pub fn ms(n: u64) -> u64 {
    n * 1_000_000
}
