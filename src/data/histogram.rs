use super::{
    distribution::DistributionStatisticConfig,
    snapshot::{CountAtBucket, ValueAtPercentile},
};
use crate::{
    clock::Clock,
    error::ConfigError,
    helper::{atomic_add_f64, atomic_max_f64, duration_as_nanos, load_f64, lock},
};
use hdrhistogram::Histogram as HdrHistogram;
use log::debug;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

// Estimator steps per unit for minimums of one and above.  Smaller minimums divide it further.
const SUB_UNIT_STEPS: f64 = 1000.0;

/// One time slice of a [`TimeWindowHistogram`].
struct Phase {
    count: AtomicU64,
    total: AtomicU64,
    max: AtomicU64,
    bucket_counts: Vec<AtomicU64>,
    estimator: Mutex<HdrHistogram<u64>>,
}

impl Phase {
    fn new(template: &HdrHistogram<u64>, buckets: usize) -> Phase {
        Phase {
            count: AtomicU64::new(0),
            total: AtomicU64::new(0f64.to_bits()),
            max: AtomicU64::new(0f64.to_bits()),
            bucket_counts: (0..buckets).map(|_| AtomicU64::new(0)).collect(),
            estimator: Mutex::new(HdrHistogram::new_from(template)),
        }
    }

    fn record(&self, value: f64, scaled: u64, bucket: Option<usize>) {
        self.count.fetch_add(1, Ordering::AcqRel);
        atomic_add_f64(&self.total, value);
        atomic_max_f64(&self.max, value);
        if let Some(index) = bucket {
            self.bucket_counts[index].fetch_add(1, Ordering::AcqRel);
        }
        lock(&self.estimator).saturating_record(scaled);
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Release);
        self.total.store(0f64.to_bits(), Ordering::Release);
        self.max.store(0f64.to_bits(), Ordering::Release);
        for count in &self.bucket_counts {
            count.store(0, Ordering::Release);
        }
        lock(&self.estimator).reset();
    }
}

/// Count, sum and maximum of everything recorded inside the window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct WindowStatistics {
    pub count: u64,
    pub total: f64,
    pub max: f64,
}

/// A histogram over roughly the last `expiry` worth of recordings.
///
/// The expiry is split into `buffer_length` phases held in a ring.  Recordings only ever go to
/// the current phase; queries merge every phase.  Whenever a record or query notices that the
/// current phase is older than `expiry / buffer_length`, the ring advances, clearing the phases
/// it moves onto.  After an idle period spanning several phases, every phase that was skipped is
/// cleared in one pass, and the ring lands where it would have been had it rotated on time.
///
/// Count, sum and max are plain atomics.  Percentiles come from an HDR histogram per phase,
/// guarded by a mutex that is only ever held for a single phase.  The estimator works on
/// integers, so amounts are scaled to thousandths of a unit (or finer, for minimums below one)
/// before they are recorded, and estimates never exceed the exact window maximum.
///
/// Only one thread rotates at a time.  Any other thread that records or reads while a rotation
/// is underway waits for it to finish, so nobody observes a partly cleared ring.
pub(crate) struct TimeWindowHistogram {
    clock: Arc<dyn Clock>,
    phases: Vec<Phase>,
    current: AtomicUsize,
    last_rotation: AtomicU64,
    rotating: AtomicBool,
    phase_nanos: u64,
    scale: f64,
    percentiles: Vec<f64>,
    buckets: Vec<f64>,
    template: HdrHistogram<u64>,
}

impl TimeWindowHistogram {
    pub(crate) fn new(clock: Arc<dyn Clock>, config: &DistributionStatisticConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let precision = config.get_percentile_precision();
        let template = HdrHistogram::<u64>::new_with_bounds(1, u64::max_value(), precision)
            .map_err(|_| ConfigError::PrecisionOutOfRange(precision))?;

        let buffer_length = config.get_buffer_length();
        let buckets = config.histogram_buckets();
        let phases = (0..buffer_length).map(|_| Phase::new(&template, buckets.len())).collect();

        let scale = SUB_UNIT_STEPS / config.get_minimum_expected_value().min(1.0);

        let phase_nanos = (duration_as_nanos(config.get_expiry()) / buffer_length as u64).max(1);
        let last_rotation = clock.monotonic_time();

        Ok(TimeWindowHistogram {
            clock,
            phases,
            current: AtomicUsize::new(0),
            last_rotation: AtomicU64::new(last_rotation),
            rotating: AtomicBool::new(false),
            phase_nanos,
            scale,
            percentiles: config.get_percentiles().to_vec(),
            buckets,
            template,
        })
    }

    /// The configured percentiles, in the order they were given.
    pub(crate) fn percentiles(&self) -> &[f64] { &self.percentiles }

    /// The sorted bucket boundaries counted exactly.
    pub(crate) fn buckets(&self) -> &[f64] { &self.buckets }

    pub(crate) fn record_long(&self, value: u64) { self.record_double(value as f64) }

    pub(crate) fn record_double(&self, value: f64) {
        if value.is_nan() || value < 0.0 {
            return;
        }

        self.rotate();

        let bucket = self.buckets.partition_point(|b| *b < value);
        let bucket = if bucket < self.buckets.len() { Some(bucket) } else { None };
        let phase = &self.phases[self.current.load(Ordering::Acquire)];
        phase.record(value, self.scaled(value), bucket);
    }

    /// Estimates the value below which `percentile` of the windowed recordings fall.
    ///
    /// Returns zero when nothing was recorded inside the window.  Only the configured
    /// percentiles are published, but any value in `[0.0, 1.0]` can be asked for.
    pub(crate) fn percentile(&self, percentile: f64) -> f64 {
        if percentile.is_nan() {
            return 0.0;
        }

        let window = self.window();
        if window.count == 0 {
            return 0.0;
        }
        if percentile >= 1.0 {
            return window.max;
        }

        self.estimate(&self.merged(), percentile.max(0.0), &window)
    }

    /// The number of windowed recordings less than or equal to `value`.
    ///
    /// Exact for configured bucket boundaries, estimated otherwise.
    pub(crate) fn histogram_count_at_value(&self, value: f64) -> f64 {
        if value.is_nan() || value < 0.0 {
            return 0.0;
        }

        self.rotate();

        if let Ok(index) = self
            .buckets
            .binary_search_by(|b| b.partial_cmp(&value).unwrap_or(std::cmp::Ordering::Less))
        {
            return self
                .phases
                .iter()
                .map(|phase| {
                    phase.bucket_counts[..=index]
                        .iter()
                        .map(|c| c.load(Ordering::Acquire))
                        .sum::<u64>()
                })
                .sum::<u64>() as f64;
        }

        self.merged().count_between(0, self.scaled(value)) as f64
    }

    /// Every configured percentile, estimated from a single merge of the window.
    pub(crate) fn percentile_values(&self) -> Vec<ValueAtPercentile> {
        if self.percentiles.is_empty() {
            return Vec::new();
        }

        let window = self.window();
        let merged = self.merged();
        self.percentiles
            .iter()
            .map(|&p| {
                let value = if window.count == 0 {
                    0.0
                } else if p >= 1.0 {
                    window.max
                } else {
                    self.estimate(&merged, p, &window)
                };
                ValueAtPercentile::new(p, value)
            })
            .collect()
    }

    /// Cumulative counts for every configured bucket boundary.
    pub(crate) fn bucket_counts(&self) -> Vec<CountAtBucket> {
        self.rotate();

        let mut cumulative = 0;
        let mut counts = Vec::with_capacity(self.buckets.len());
        for (index, bucket) in self.buckets.iter().enumerate() {
            cumulative += self
                .phases
                .iter()
                .map(|phase| phase.bucket_counts[index].load(Ordering::Acquire))
                .sum::<u64>();
            counts.push(CountAtBucket::new(*bucket, cumulative as f64));
        }
        counts
    }

    /// Count, sum and maximum over every live phase.
    pub(crate) fn window(&self) -> WindowStatistics {
        self.rotate();

        self.phases.iter().fold(WindowStatistics::default(), |acc, phase| WindowStatistics {
            count: acc.count + phase.count.load(Ordering::Acquire),
            total: acc.total + load_f64(&phase.total),
            max: acc.max.max(load_f64(&phase.max)),
        })
    }

    fn merged(&self) -> HdrHistogram<u64> {
        let mut merged = HdrHistogram::new_from(&self.template);
        for phase in &self.phases {
            let estimator = lock(&phase.estimator);
            if let Err(e) = merged.add(&*estimator) {
                debug!("failed to merge histogram phase: {:?}", e);
            }
        }
        merged
    }

    fn estimate(&self, merged: &HdrHistogram<u64>, percentile: f64, window: &WindowStatistics) -> f64 {
        (merged.value_at_quantile(percentile) as f64 / self.scale).min(window.max)
    }

    // Saturates at `u64::MAX` for amounts beyond the estimator's range.
    fn scaled(&self, value: f64) -> u64 { (value * self.scale).round() as u64 }

    fn rotate(&self) {
        let now = self.clock.monotonic_time();
        let due = now.saturating_sub(self.last_rotation.load(Ordering::Acquire)) >= self.phase_nanos;
        if !due
            || self
                .rotating
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
        {
            while self.rotating.load(Ordering::Acquire) {
                thread::yield_now();
            }
            return;
        }

        // Another thread may have finished a rotation between our check and our claim.
        let last = self.last_rotation.load(Ordering::Acquire);
        let elapsed = now.saturating_sub(last);
        if elapsed >= self.phase_nanos {
            let len = self.phases.len();
            let phases_elapsed = elapsed / self.phase_nanos;
            let to_clear = phases_elapsed.min(len as u64) as usize;
            let current = self.current.load(Ordering::Acquire);

            for offset in 1..=to_clear {
                self.phases[(current + offset) % len].reset();
            }

            let next = ((current as u64 + phases_elapsed) % len as u64) as usize;
            self.current.store(next, Ordering::Release);
            self.last_rotation
                .store(last + phases_elapsed * self.phase_nanos, Ordering::Release);

            if phases_elapsed > 1 {
                debug!(
                    "histogram caught up {} phases, cleared {} of {}",
                    phases_elapsed, to_clear, len
                );
            }
        }

        self.rotating.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::TimeWindowHistogram;
    use crate::{
        clock::MockClock,
        data::distribution::DistributionStatisticConfig,
        error::ConfigError,
        helper::assert_estimate,
    };
    use std::{sync::Arc, thread, time::Duration};

    fn config() -> DistributionStatisticConfig {
        DistributionStatisticConfig::new()
            .percentiles(&[0.5, 0.95])
            .buffer_length(4)
            .expiry(Duration::from_secs(4))
    }

    #[test]
    fn test_histogram_empty_is_zero() {
        let clock = Arc::new(MockClock::new());
        let histogram = TimeWindowHistogram::new(clock, &config()).unwrap();

        assert_eq!(histogram.percentile(0.0), 0.0);
        assert_eq!(histogram.percentile(0.5), 0.0);
        assert_eq!(histogram.percentile(1.0), 0.0);
        assert_eq!(histogram.histogram_count_at_value(10.0), 0.0);
    }

    #[test]
    fn test_histogram_invalid_config() {
        let clock = Arc::new(MockClock::new());
        let config = DistributionStatisticConfig::new()
            .minimum_expected_value(10.0)
            .maximum_expected_value(9.0);

        match TimeWindowHistogram::new(clock, &config) {
            Err(ConfigError::InvertedBounds { .. }) => {},
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected invalid configuration"),
        }
    }

    #[test]
    fn test_histogram_rejects_negative_and_nan() {
        let clock = Arc::new(MockClock::new());
        let histogram = TimeWindowHistogram::new(clock, &config()).unwrap();

        histogram.record_double(-1.0);
        histogram.record_double(std::f64::NAN);
        assert_eq!(histogram.window().count, 0);

        histogram.record_long(3);
        assert_eq!(histogram.window().count, 1);
    }

    #[test]
    fn test_histogram_percentiles() {
        let clock = Arc::new(MockClock::new());
        let histogram = TimeWindowHistogram::new(clock, &config()).unwrap();

        for value in 1..=20 {
            histogram.record_double(value as f64);
        }

        assert_estimate(histogram.percentile(0.0), 1.0);
        assert_estimate(histogram.percentile(0.5), 10.0);
        assert_eq!(histogram.percentile(1.0), 20.0);

        let values = histogram.percentile_values();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].percentile(), 0.5);
        assert_estimate(values[0].value(), 10.0);
        assert_estimate(values[1].value(), 19.0);
        assert!(values[1].value() < 20.0);
    }

    #[test]
    fn test_histogram_sliding_window() {
        let clock = Arc::new(MockClock::new());
        let histogram = TimeWindowHistogram::new(clock.clone(), &config()).unwrap();

        histogram.record_double(10.0);
        clock.add_seconds(1);
        histogram.record_double(20.0);
        clock.add_seconds(1);
        histogram.record_double(30.0);

        assert_estimate(histogram.percentile(0.0), 10.0);
        assert_eq!(histogram.percentile(1.0), 30.0);

        // The phase holding 10 is four phases old once we reach t=4s.
        clock.add_seconds(2);
        assert_estimate(histogram.percentile(0.0), 20.0);
        assert_eq!(histogram.percentile(1.0), 30.0);

        clock.add_seconds(1);
        assert_estimate(histogram.percentile(0.0), 30.0);
        assert!(histogram.percentile(0.5) <= 30.0);

        // More than the expiry with nothing recorded clears everything.
        clock.add_seconds(5);
        assert_eq!(histogram.percentile(0.0), 0.0);
        assert_eq!(histogram.percentile(1.0), 0.0);
        assert_eq!(histogram.window().count, 0);
    }

    #[test]
    fn test_histogram_idle_catch_up_keeps_recent_phases() {
        let clock = Arc::new(MockClock::new());
        let histogram = TimeWindowHistogram::new(clock.clone(), &config()).unwrap();

        histogram.record_double(5.0);
        clock.add_seconds(2);
        histogram.record_double(7.0);
        assert_eq!(histogram.window().count, 2);

        // Two phases pass at once: the phase holding 5 is reused for 9, the one holding 7 stays.
        clock.add_seconds(2);
        histogram.record_double(9.0);
        assert_eq!(histogram.window().count, 2);
        assert_estimate(histogram.percentile(0.0), 7.0);
    }

    #[test]
    fn test_histogram_bucket_counts() {
        let clock = Arc::new(MockClock::new());
        let config = config().service_level_objectives(&[5.0, 10.0, 15.0]);
        let histogram = TimeWindowHistogram::new(clock.clone(), &config).unwrap();

        for value in &[1.0, 5.0, 6.0, 10.0, 11.0, 40.0] {
            histogram.record_double(*value);
        }

        assert_eq!(histogram.histogram_count_at_value(5.0), 2.0);
        assert_eq!(histogram.histogram_count_at_value(10.0), 4.0);
        assert_eq!(histogram.histogram_count_at_value(15.0), 5.0);
        // Not a configured boundary, estimated from the percentile estimator.
        assert_eq!(histogram.histogram_count_at_value(20.0), 5.0);

        let counts = histogram.bucket_counts();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts[2].bucket(), 15.0);
        assert_eq!(counts[2].count(), 5.0);

        clock.add_seconds(5);
        assert_eq!(histogram.histogram_count_at_value(15.0), 0.0);
    }

    #[test]
    fn test_histogram_fractional_resolution() {
        let clock = Arc::new(MockClock::new());
        let config = config().minimum_expected_value(0.1);
        let histogram = TimeWindowHistogram::new(clock, &config).unwrap();

        histogram.record_double(0.5);
        histogram.record_double(1.5);
        assert_estimate(histogram.percentile(0.0), 0.5);
        assert_eq!(histogram.percentile(1.0), 1.5);
    }

    #[test]
    fn test_histogram_keeps_fractions_at_default_minimum() {
        let clock = Arc::new(MockClock::new());
        let histogram = TimeWindowHistogram::new(clock, &config()).unwrap();

        for value in &[0.2, 0.3, 0.4] {
            histogram.record_double(*value);
        }
        assert_estimate(histogram.percentile(0.0), 0.2);
        assert_estimate(histogram.percentile(0.5), 0.3);
        assert_estimate(histogram.percentile(0.99), 0.4);
        assert!(histogram.percentile(0.99) <= 0.4);
        assert_estimate(histogram.histogram_count_at_value(0.3), 2.0);

        for value in &[1.2, 1.3, 1.4, 2.4] {
            histogram.record_double(*value);
        }
        assert_estimate(histogram.percentile(0.0), 0.2);
        assert_estimate(histogram.percentile(0.5), 1.2);
        assert_estimate(histogram.percentile(0.9), 2.4);
        assert_eq!(histogram.percentile(1.0), 2.4);
    }

    #[test]
    fn test_histogram_concurrent_recording() {
        let clock = Arc::new(MockClock::new());
        let histogram = Arc::new(TimeWindowHistogram::new(clock.clone(), &config()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let histogram = histogram.clone();
                thread::spawn(move || {
                    for value in 1..=1000 {
                        histogram.record_long(value % 16 + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let window = histogram.window();
        assert_eq!(window.count, 8000);
        assert_eq!(window.max, 16.0);
        assert_eq!(histogram.histogram_count_at_value(16.0), 8000.0);
    }
}
