//! Tick lateness metrics for dispatch monitoring.
//!
//! Tracks how far behind its monotonic deadline each trigger dispatch ran,
//! using a fixed ring buffer so recording stays allocation-free on the loop
//! thread.

/// Per-tick dispatch metrics with a ring buffer of lateness samples.
#[derive(Debug)]
pub struct TickMetrics {
    /// Ring buffer of lateness samples in microseconds.
    samples: Box<[i64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples retained (saturates at buffer size).
    sample_count: usize,
    /// Total ticks dispatched.
    total_ticks: u64,
    /// Minimum observed lateness in microseconds.
    min_us: i64,
    /// Maximum observed lateness in microseconds.
    max_us: i64,
    /// Sum of all lateness samples for mean calculation.
    sum_us: i64,
    /// Ticks dispatched later than the tolerance.
    late_count: u64,
    /// Lateness tolerance in microseconds.
    tolerance_us: i64,
}

impl TickMetrics {
    /// Create a new metrics collector.
    ///
    /// # Arguments
    ///
    /// * `histogram_size` - Number of samples to retain in the ring buffer.
    /// * `tolerance_us` - Lateness above this counts as a late tick.
    #[must_use]
    pub fn new(histogram_size: usize, tolerance_us: i64) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0i64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_ticks: 0,
            min_us: i64::MAX,
            max_us: i64::MIN,
            sum_us: 0,
            late_count: 0,
            tolerance_us,
        }
    }

    /// Record the lateness of one dispatched tick, in microseconds.
    pub fn record_us(&mut self, lateness_us: i64) {
        self.samples[self.write_pos] = lateness_us;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_ticks += 1;
        self.min_us = self.min_us.min(lateness_us);
        self.max_us = self.max_us.max(lateness_us);
        self.sum_us = self.sum_us.wrapping_add(lateness_us);

        if lateness_us > self.tolerance_us {
            self.late_count += 1;
        }
    }

    /// Get total number of ticks dispatched.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Get minimum observed lateness.
    #[must_use]
    pub fn min_us(&self) -> Option<i64> {
        (self.total_ticks > 0).then_some(self.min_us)
    }

    /// Get maximum observed lateness.
    #[must_use]
    pub fn max_us(&self) -> Option<i64> {
        (self.total_ticks > 0).then_some(self.max_us)
    }

    /// Get mean lateness.
    #[must_use]
    pub fn mean_us(&self) -> Option<i64> {
        (self.total_ticks > 0).then(|| self.sum_us / self.total_ticks as i64)
    }

    /// Get number of ticks that exceeded the tolerance.
    #[must_use]
    pub fn late_count(&self) -> u64 {
        self.late_count
    }

    /// Compute a lateness percentile from the ring buffer.
    ///
    /// Returns `None` if no samples have been collected or if `percentile`
    /// is outside 0.0..=100.0.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<i64> {
        if self.sample_count == 0 {
            return None;
        }
        if !(0.0..=100.0).contains(&percentile) || percentile.is_nan() {
            return None;
        }

        let mut sorted: Vec<i64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> TickSnapshot {
        TickSnapshot {
            total_ticks: self.total_ticks,
            min_us: self.min_us(),
            max_us: self.max_us(),
            mean_us: self.mean_us(),
            late_count: self.late_count,
            sample_count: self.sample_count,
        }
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total_ticks = 0;
        self.min_us = i64::MAX;
        self.max_us = i64::MIN;
        self.sum_us = 0;
        self.late_count = 0;
    }
}

/// Immutable snapshot of tick metrics for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct TickSnapshot {
    /// Total ticks dispatched.
    pub total_ticks: u64,
    /// Minimum lateness in microseconds.
    pub min_us: Option<i64>,
    /// Maximum lateness in microseconds.
    pub max_us: Option<i64>,
    /// Mean lateness in microseconds.
    pub mean_us: Option<i64>,
    /// Ticks that exceeded the tolerance.
    pub late_count: u64,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}

impl TickSnapshot {
    /// Get dispatch jitter (max - min) in microseconds.
    #[must_use]
    pub fn jitter_us(&self) -> Option<i64> {
        match (self.min_us, self.max_us) {
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
        let mut metrics = TickMetrics::new(100, 1_000);

        metrics.record_us(500);
        metrics.record_us(600);
        metrics.record_us(550);

        assert_eq!(metrics.total_ticks(), 3);
        assert_eq!(metrics.min_us(), Some(500));
        assert_eq!(metrics.max_us(), Some(600));
        assert_eq!(metrics.mean_us(), Some(550));
    }

    #[test]
    fn test_late_counting() {
        let mut metrics = TickMetrics::new(100, 1_000);

        metrics.record_us(900); // OK
        metrics.record_us(1_100); // Late
        metrics.record_us(800); // OK
        metrics.record_us(1_500); // Late

        assert_eq!(metrics.late_count(), 2);
    }

    #[test]
    fn test_percentile_calculation() {
        let mut metrics = TickMetrics::new(100, 1_000);

        for i in 1..=100 {
            metrics.record_us(i);
        }

        let p50 = metrics.percentile(50.0).unwrap();
        assert!((49..=51).contains(&p50));

        let p99 = metrics.percentile(99.0).unwrap();
        assert!((98..=100).contains(&p99));
    }

    #[test]
    fn test_percentile_validation() {
        let mut metrics = TickMetrics::new(100, 1_000);
        assert!(metrics.percentile(50.0).is_none()); // no samples yet

        metrics.record_us(10);
        assert!(metrics.percentile(-1.0).is_none());
        assert!(metrics.percentile(101.0).is_none());
        assert!(metrics.percentile(f64::NAN).is_none());
        assert!(metrics.percentile(100.0).is_some());
    }

    #[test]
    fn test_ring_buffer_wrapping() {
        let mut metrics = TickMetrics::new(10, 1_000);

        for i in 0..25 {
            metrics.record_us(i);
        }

        assert_eq!(metrics.total_ticks(), 25);
        // Sample count is capped at buffer size
        assert_eq!(metrics.snapshot().sample_count, 10);
    }

    #[test]
    fn test_snapshot_jitter() {
        let mut metrics = TickMetrics::new(100, 1_000);

        metrics.record_us(400);
        metrics.record_us(600);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_ticks, 2);
        assert_eq!(snap.jitter_us(), Some(200));
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let mut metrics = TickMetrics::new(100, 1_000);
        metrics.record_us(400);
        metrics.record_us(1_600); // Late

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["total_ticks"], 2);
        assert_eq!(json["min_us"], 400);
        assert_eq!(json["max_us"], 1_600);
        assert_eq!(json["late_count"], 1);

        // Empty collector exports nulls, not zeros
        let json = serde_json::to_value(TickMetrics::new(100, 1_000).snapshot()).unwrap();
        assert!(json["min_us"].is_null());
        assert!(json["mean_us"].is_null());
    }

    #[test]
    fn test_reset() {
        let mut metrics = TickMetrics::new(100, 1_000);

        metrics.record_us(500);
        metrics.record_us(1_500); // Late

        metrics.reset();

        assert_eq!(metrics.total_ticks(), 0);
        assert_eq!(metrics.late_count(), 0);
        assert!(metrics.min_us().is_none());
        assert!(metrics.snapshot().jitter_us().is_none());
    }
}
