//! Wake-latency metrics for cyclic workers.
//!
//! Each cycle's latency is the gap between its scheduled wake time and the
//! moment the task body actually started. Samples go into a preallocated ring
//! buffer so recording never allocates inside the cycle loop.

use std::time::Duration;

/// Wake-latency metrics with ring buffer for percentile queries.
#[derive(Debug)]
pub struct CycleMetrics {
    /// Ring buffer of latencies in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total cycles recorded.
    total_cycles: u64,
    /// Minimum observed latency in nanoseconds.
    min_ns: u64,
    /// Maximum observed latency in nanoseconds.
    max_ns: u64,
    /// Sum of all latencies for mean calculation.
    sum_ns: u64,
    /// Cycles whose latency reached the overrun threshold.
    overrun_count: u64,
    /// Latency at or above which a cycle counts as an overrun.
    overrun_threshold_ns: u64,
}

impl CycleMetrics {
    /// Create a collector retaining `histogram_size` samples.
    ///
    /// A cycle that starts a full `overrun_threshold` (normally one period)
    /// after its scheduled wake is counted as an overrun.
    #[must_use]
    pub fn new(histogram_size: usize, overrun_threshold: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_cycles: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            overrun_threshold_ns: u64::try_from(overrun_threshold.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Record one cycle's wake latency in nanoseconds.
    pub fn record_ns(&mut self, ns: u64) {
        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_cycles += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.saturating_add(ns);

        if ns >= self.overrun_threshold_ns {
            self.overrun_count += 1;
        }
    }

    /// Compute a percentile (0.0 to 100.0) of the retained samples, in
    /// nanoseconds.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    pub fn percentile_ns(&self, percentile: f64) -> Option<u64> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        let idx = idx.min(sorted.len() - 1);

        Some(sorted[idx])
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let recorded = self.total_cycles > 0;
        MetricsSnapshot {
            total_cycles: self.total_cycles,
            min_ns: recorded.then_some(self.min_ns),
            max_ns: recorded.then_some(self.max_ns),
            mean_ns: recorded.then(|| self.sum_ns / self.total_cycles),
            p99_ns: self.percentile_ns(99.0),
            overrun_count: self.overrun_count,
            sample_count: self.sample_count,
        }
    }
}

/// Immutable snapshot of metrics for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total cycles recorded.
    pub total_cycles: u64,
    /// Minimum latency in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum latency in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean latency in nanoseconds.
    pub mean_ns: Option<u64>,
    /// 99th percentile latency over the retained samples, in nanoseconds.
    pub p99_ns: Option<u64>,
    /// Number of overrun cycles.
    pub overrun_count: u64,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}

impl MetricsSnapshot {
    /// Jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_recording() {
        let mut metrics = CycleMetrics::new(100, Duration::from_millis(30));

        metrics.record_ns(50_000);
        metrics.record_ns(60_000);
        metrics.record_ns(55_000);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_cycles, 3);
        assert_eq!(snap.min_ns, Some(50_000));
        assert_eq!(snap.max_ns, Some(60_000));
        assert_eq!(snap.mean_ns, Some(55_000));
        assert_eq!(snap.jitter_ns(), Some(10_000));
    }

    #[test]
    fn test_overrun_counting() {
        let mut metrics = CycleMetrics::new(100, Duration::from_millis(10));

        metrics.record_ns(80_000); // on time
        metrics.record_ns(10_000_000); // a whole period late
        metrics.record_ns(3_000_000); // late, but within the slot
        metrics.record_ns(25_000_000); // missed two slots

        assert_eq!(metrics.snapshot().overrun_count, 2);
    }

    #[test]
    fn test_percentile_calculation() {
        let mut metrics = CycleMetrics::new(100, Duration::from_millis(1));

        for i in 1..=100 {
            metrics.record_ns(i * 1000);
        }

        let p50 = metrics.percentile_ns(50.0).unwrap();
        assert!((49_000..=51_000).contains(&p50));

        let p99 = metrics.snapshot().p99_ns.unwrap();
        assert!((98_000..=100_000).contains(&p99));

        assert!(metrics.percentile_ns(-1.0).is_none());
        assert!(metrics.percentile_ns(f64::NAN).is_none());
    }

    #[test]
    fn test_p99_isolates_rare_spike() {
        let mut metrics = CycleMetrics::new(1000, Duration::from_millis(10));

        for _ in 0..999 {
            metrics.record_ns(20_000);
        }
        metrics.record_ns(4_000_000);

        let snap = metrics.snapshot();
        assert_eq!(snap.max_ns, Some(4_000_000));
        assert_eq!(snap.p99_ns, Some(20_000));
    }

    #[test]
    fn test_ring_buffer_wrapping() {
        let mut metrics = CycleMetrics::new(10, Duration::from_millis(1));

        for i in 0..25 {
            metrics.record_ns(i * 1000);
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.total_cycles, 25);
        assert_eq!(snap.sample_count, 10);
        // Only the last ten samples remain
        assert_eq!(metrics.percentile_ns(0.0), Some(15_000));
        // Aggregates still cover every cycle
        assert_eq!(snap.min_ns, Some(0));
    }

    #[test]
    fn test_empty_snapshot() {
        let metrics = CycleMetrics::new(0, Duration::from_millis(1));
        let snap = metrics.snapshot();
        assert_eq!(snap.total_cycles, 0);
        assert!(snap.min_ns.is_none());
        assert!(snap.p99_ns.is_none());
        assert!(snap.jitter_ns().is_none());
    }
}
