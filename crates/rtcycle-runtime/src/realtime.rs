//! Process-wide real-time setup.
//!
//! Provides the steps that must complete before any cyclic worker starts:
//! - Memory locking (mlockall) so no page fault lands inside a cycle
//! - Raising `CAP_SYS_NICE` so workers may be created with a real-time policy
//!
//! Platform calls go through [`Platform`] so the sequencing can be exercised
//! without privileges.

use crate::capability::{
    commit_process_capabilities, read_process_capabilities, Capability, CapabilitySet,
};
use rtcycle_common::config::RealtimeConfig;
use rtcycle_common::error::{OsErrno, PrivilegeStep, RtError, RtResult};
use tracing::{debug, error, info, warn};

/// Platform calls used during setup.
pub trait Platform: Send + Sync {
    /// Lock all current and future pages of the process.
    ///
    /// # Errors
    ///
    /// Returns the OS error number on failure.
    fn lock_all_memory(&self) -> Result<(), OsErrno>;

    /// Read the process capability set.
    ///
    /// # Errors
    ///
    /// Returns the OS error number on failure.
    fn read_capabilities(&self) -> Result<CapabilitySet, OsErrno>;

    /// Commit a capability set to the process.
    ///
    /// # Errors
    ///
    /// Returns the OS error number on failure.
    fn commit_capabilities(&self, caps: &CapabilitySet) -> Result<(), OsErrno>;
}

/// The running Linux kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxPlatform;

impl Platform for LinuxPlatform {
    fn lock_all_memory(&self) -> Result<(), OsErrno> {
        use nix::sys::mman::{mlockall, MlockAllFlags};

        mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
            .map_err(|e| OsErrno(e as i32))
    }

    fn read_capabilities(&self) -> Result<CapabilitySet, OsErrno> {
        read_process_capabilities()
    }

    fn commit_capabilities(&self, caps: &CapabilitySet) -> Result<(), OsErrno> {
        commit_process_capabilities(caps)
    }
}

/// Result of process-wide setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealtimeStatus {
    /// Whether memory was locked.
    pub memory_locked: bool,
    /// Whether `CAP_SYS_NICE` was raised into the effective set.
    pub privilege_raised: bool,
}

/// Owner of process-wide real-time state.
#[derive(Debug)]
pub struct RealtimeEnvironment<P: Platform = LinuxPlatform> {
    platform: P,
    config: RealtimeConfig,
    status: RealtimeStatus,
}

impl RealtimeEnvironment<LinuxPlatform> {
    /// Environment backed by the running kernel.
    #[must_use]
    pub fn linux(config: RealtimeConfig) -> Self {
        Self::new(LinuxPlatform, config)
    }
}

impl<P: Platform> RealtimeEnvironment<P> {
    /// Environment backed by `platform`.
    pub fn new(platform: P, config: RealtimeConfig) -> Self {
        Self {
            platform,
            config,
            status: RealtimeStatus::default(),
        }
    }

    /// What has been set up so far.
    pub fn status(&self) -> RealtimeStatus {
        self.status
    }

    /// Platform backing this environment.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Lock all current and future pages.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::MemoryLock`] with the OS error number.
    pub fn lock_memory(&mut self) -> RtResult<()> {
        debug!("Locking memory pages with mlockall");

        self.platform.lock_all_memory().map_err(|errno| {
            error!(%errno, "mlockall failed; refusing to start real-time workers");
            RtError::MemoryLock { errno }
        })?;

        self.status.memory_locked = true;
        info!("Memory locked successfully");
        Ok(())
    }

    /// Add `CAP_SYS_NICE` to the effective set (read, modify, commit).
    ///
    /// The capability set is owned data and released when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Privilege`] naming the failing step. The modify
    /// step fails with `EPERM` when the capability is not permitted.
    pub fn raise_scheduling_privilege(&mut self) -> RtResult<()> {
        let fail = |step: PrivilegeStep| {
            move |errno: OsErrno| {
                error!(%step, %errno, "Raising CAP_SYS_NICE failed");
                RtError::Privilege { step, errno }
            }
        };

        let mut caps = self
            .platform
            .read_capabilities()
            .map_err(fail(PrivilegeStep::Read))?;

        if caps.is_effective(Capability::SysNice) {
            debug!("CAP_SYS_NICE already effective");
        } else {
            caps.raise_effective(Capability::SysNice)
                .map_err(fail(PrivilegeStep::Modify))?;
        }

        self.platform
            .commit_capabilities(&caps)
            .map_err(fail(PrivilegeStep::Commit))?;

        self.status.privilege_raised = true;
        info!("CAP_SYS_NICE effective");
        Ok(())
    }

    /// Run every configured setup step: privilege first, then memory lock.
    ///
    /// `raise_by_default` applies when `raise_privilege` is unset in the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; later steps are not attempted.
    pub fn prepare(&mut self, raise_by_default: bool) -> RtResult<RealtimeStatus> {
        if self.config.raise_privilege.unwrap_or(raise_by_default) {
            self.raise_scheduling_privilege()?;
        }

        if self.config.lock_memory {
            self.lock_memory()?;
        } else {
            warn!("Memory locking disabled; page faults may occur during cycles");
        }

        info!(status = ?self.status, "Real-time initialization complete");
        Ok(self.status)
    }
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
    /// Process capability set, if readable.
    pub capabilities: Option<CapabilitySet>,
}

impl RtCapabilities {
    /// Check if RT scheduling is likely to succeed.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root
            || self.rtprio_limit.is_some_and(|l| l > 0)
            || self
                .capabilities
                .is_some_and(|c| c.is_permitted(Capability::SysNice))
    }

    /// Check if memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        self.is_root
            || self.memlock_limit == Some(libc::RLIM_INFINITY)
            || self
                .capabilities
                .is_some_and(|c| c.is_effective(Capability::IpcLock))
    }
}

/// Probe the current process for real-time capabilities.
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    let mut caps = RtCapabilities {
        is_root: nix::unistd::geteuid().is_root(),
        capabilities: read_process_capabilities().ok(),
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rlim` is a valid out-pointer.
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }
    // SAFETY: as above.
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = std::fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}
