//! Linux capability sets via the raw `capget`/`capset` syscalls.
//!
//! Only the three 64-bit masks (effective, permitted, inheritable) of the
//! calling process are modelled. The set is plain owned data, so there is no
//! separate release step.

use rtcycle_common::error::OsErrno;
use std::fmt;

/// `_LINUX_CAPABILITY_VERSION_3`: two 32-bit data words per mask.
const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// Capabilities this crate needs to reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `CAP_IPC_LOCK`: lock memory beyond `RLIMIT_MEMLOCK`.
    IpcLock,
    /// `CAP_SYS_NICE`: set real-time scheduling policy and priority.
    SysNice,
}

impl Capability {
    /// Kernel capability number.
    #[must_use]
    pub fn number(self) -> u32 {
        match self {
            Self::IpcLock => 14,
            Self::SysNice => 23,
        }
    }

    fn bit(self) -> u64 {
        1u64 << self.number()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IpcLock => write!(f, "CAP_IPC_LOCK"),
            Self::SysNice => write!(f, "CAP_SYS_NICE"),
        }
    }
}

/// Snapshot of a process capability set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    effective: u64,
    permitted: u64,
    inheritable: u64,
}

impl CapabilitySet {
    /// Build a set from raw masks.
    #[must_use]
    pub fn from_masks(effective: u64, permitted: u64, inheritable: u64) -> Self {
        Self {
            effective,
            permitted,
            inheritable,
        }
    }

    /// Whether `cap` is in the effective set.
    #[must_use]
    pub fn is_effective(&self, cap: Capability) -> bool {
        self.effective & cap.bit() != 0
    }

    /// Whether `cap` is in the permitted set.
    #[must_use]
    pub fn is_permitted(&self, cap: Capability) -> bool {
        self.permitted & cap.bit() != 0
    }

    /// Add `cap` to the effective set.
    ///
    /// # Errors
    ///
    /// Returns `EPERM` if `cap` is not permitted; the kernel would reject the
    /// commit anyway.
    pub fn raise_effective(&mut self, cap: Capability) -> Result<(), OsErrno> {
        if !self.is_permitted(cap) {
            return Err(OsErrno(libc::EPERM));
        }
        self.effective |= cap.bit();
        Ok(())
    }

    fn to_data(self) -> [CapUserData; 2] {
        #[allow(clippy::cast_possible_truncation)]
        let split = |mask: u64| (mask as u32, (mask >> 32) as u32);
        let (e_lo, e_hi) = split(self.effective);
        let (p_lo, p_hi) = split(self.permitted);
        let (i_lo, i_hi) = split(self.inheritable);
        [
            CapUserData {
                effective: e_lo,
                permitted: p_lo,
                inheritable: i_lo,
            },
            CapUserData {
                effective: e_hi,
                permitted: p_hi,
                inheritable: i_hi,
            },
        ]
    }

    fn from_data(data: [CapUserData; 2]) -> Self {
        let join = |lo: u32, hi: u32| u64::from(lo) | (u64::from(hi) << 32);
        Self {
            effective: join(data[0].effective, data[1].effective),
            permitted: join(data[0].permitted, data[1].permitted),
            inheritable: join(data[0].inheritable, data[1].inheritable),
        }
    }
}

/// Read the calling process's capability set.
///
/// # Errors
///
/// Returns the `errno` from `capget`.
pub fn read_process_capabilities() -> Result<CapabilitySet, OsErrno> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];

    // SAFETY: header and data match the kernel's v3 ABI and outlive the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capget,
            std::ptr::addr_of_mut!(header),
            data.as_mut_ptr(),
        )
    };
    if rc == -1 {
        return Err(OsErrno::last());
    }

    Ok(CapabilitySet::from_data(data))
}

/// Replace the calling process's capability set.
///
/// # Errors
///
/// Returns the `errno` from `capset` (`EPERM` when raising a capability that
/// is not permitted).
pub fn commit_process_capabilities(caps: &CapabilitySet) -> Result<(), OsErrno> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data = caps.to_data();

    // SAFETY: header and data match the kernel's v3 ABI and outlive the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capset,
            std::ptr::addr_of_mut!(header),
            data.as_ptr(),
        )
    };
    if rc == -1 {
        return Err(OsErrno::last());
    }

    Ok(())
}
