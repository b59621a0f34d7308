//! Monotonic timestamp arithmetic.
//!
//! `MonoTime` mirrors a `timespec` read from `CLOCK_MONOTONIC`: whole seconds
//! plus a nanosecond field that is kept in `[0, 1_000_000_000)`.

use std::fmt;
use std::time::Duration;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point on the monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MonoTime {
    sec: i64,
    nsec: i64,
}

impl MonoTime {
    /// Build a timestamp from raw `timespec` parts, carrying any excess
    /// nanoseconds into the seconds field.
    #[must_use]
    pub fn from_parts(sec: i64, nsec: i64) -> Self {
        let nanos = i64::try_from(NANOS_PER_SEC).unwrap_or(i64::MAX);
        Self {
            sec: sec.saturating_add(nsec.div_euclid(nanos)),
            nsec: nsec.rem_euclid(nanos),
        }
    }

    /// Whole seconds.
    #[must_use]
    pub fn secs(&self) -> i64 {
        self.sec
    }

    /// Nanosecond component, always below one second.
    #[must_use]
    pub fn subsec_nanos(&self) -> i64 {
        self.nsec
    }

    /// Total nanoseconds since the clock epoch.
    #[must_use]
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.sec) * i128::from(NANOS_PER_SEC) + i128::from(self.nsec)
    }

    /// Move this timestamp forward by `period_ns`.
    ///
    /// The nanosecond field may exceed one second after the addition (periods
    /// longer than a second); whole seconds are carried until it is below
    /// `NANOS_PER_SEC` again.
    pub fn advance(&mut self, period_ns: u64) {
        // nsec is in [0, 1e9) so the sum cannot overflow u128.
        let total = u128::from(self.nsec.unsigned_abs()) + u128::from(period_ns);
        let carry = total / u128::from(NANOS_PER_SEC);
        let rest = total % u128::from(NANOS_PER_SEC);

        self.sec = self
            .sec
            .saturating_add(i64::try_from(carry).unwrap_or(i64::MAX));
        self.nsec = i64::try_from(rest).unwrap_or(0);
    }

    /// Copy of this timestamp advanced by `period_ns`.
    #[must_use]
    pub fn advanced(mut self, period_ns: u64) -> Self {
        self.advance(period_ns);
        self
    }

    /// Nanoseconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub fn nanos_since(&self, earlier: MonoTime) -> u64 {
        let diff = self.as_nanos() - earlier.as_nanos();
        u64::try_from(diff.max(0)).unwrap_or(u64::MAX)
    }

    /// Signed difference `self - other` in nanoseconds.
    #[must_use]
    pub fn signed_nanos_since(&self, other: MonoTime) -> i128 {
        self.as_nanos() - other.as_nanos()
    }

    /// Duration elapsed from `earlier` to `self`.
    #[must_use]
    pub fn duration_since(&self, earlier: MonoTime) -> Duration {
        Duration::from_nanos(self.nanos_since(earlier))
    }
}

impl fmt::Display for MonoTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// Convert a period to whole nanoseconds, saturating at `u64::MAX`.
#[must_use]
pub fn period_nanos(period: Duration) -> u64 {
    u64::try_from(period.as_nanos()).unwrap_or(u64::MAX)
}
