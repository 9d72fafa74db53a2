use super::{
    distribution::DistributionStatisticConfig,
    histogram::TimeWindowHistogram,
    snapshot::{CountAtBucket, HistogramSnapshot, ValueAtPercentile},
    step::StepDouble,
    Id, TimeUnit,
};
use crate::{
    clock::Clock,
    error::ConfigError,
    helper::{duration_as_nanos, lock},
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Records durations and reports count, total and max per step.
///
/// Durations are held in nanoseconds and converted on the way out.  The attached histogram
/// window, and any minimum, maximum or service level objective in its configuration, is in
/// nanoseconds too.
pub struct StepTimer {
    id: Id,
    clock: Arc<dyn Clock>,
    base_time_unit: TimeUnit,
    count: StepDouble,
    total: StepDouble,
    max: StepDouble,
    histogram: TimeWindowHistogram,
}

impl StepTimer {
    pub(crate) fn new(
        id: Id, clock: Arc<dyn Clock>, step: Duration, base_time_unit: TimeUnit, config: &DistributionStatisticConfig,
    ) -> Result<StepTimer, ConfigError> {
        let histogram = TimeWindowHistogram::new(clock.clone(), config)?;
        Ok(StepTimer {
            id,
            base_time_unit,
            count: StepDouble::sum(clock.clone(), step),
            total: StepDouble::sum(clock.clone(), step),
            max: StepDouble::max(clock.clone(), step),
            histogram,
            clock,
        })
    }

    pub fn id(&self) -> &Id { &self.id }

    /// The unit statistics are published in.
    pub fn base_time_unit(&self) -> TimeUnit { self.base_time_unit }

    pub fn record(&self, duration: Duration) { self.record_whole_nanos(duration_as_nanos(duration)) }

    /// Records `amount` of `unit`.  Negative and `NaN` amounts are ignored.
    pub fn record_with_unit(&self, amount: f64, unit: TimeUnit) { self.record_nanos(unit.to_nanos(amount)) }

    /// Runs `f`, recording how long it took on the registry clock.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = self.clock.monotonic_time();
        let result = f();
        let end = self.clock.monotonic_time();
        self.record_whole_nanos(end.saturating_sub(start));
        result
    }

    fn record_whole_nanos(&self, nanos: u64) {
        self.record_step(nanos as f64);
        self.histogram.record_long(nanos);
    }

    fn record_nanos(&self, nanos: f64) {
        if nanos.is_nan() || nanos < 0.0 {
            return;
        }
        self.record_step(nanos);
        self.histogram.record_double(nanos);
    }

    fn record_step(&self, nanos: f64) {
        self.count.record(1.0);
        self.total.record(nanos);
        self.max.record(nanos);
    }

    /// Number of recordings in the last completed step.
    pub fn count(&self) -> u64 { self.count.poll() as u64 }

    pub fn total_time(&self, unit: TimeUnit) -> f64 { unit.from_nanos(self.total.poll()) }

    /// The longest recording of the last completed step.
    pub fn max(&self, unit: TimeUnit) -> f64 { unit.from_nanos(self.max.poll()) }

    pub fn mean(&self, unit: TimeUnit) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.total_time(unit) / count as f64
        }
    }

    /// Estimates the duration below which `percentile` of the windowed recordings fall.
    pub fn percentile(&self, percentile: f64, unit: TimeUnit) -> f64 {
        unit.from_nanos(self.histogram.percentile(percentile))
    }

    /// Number of windowed recordings at or below `value` of `unit`.
    pub fn histogram_count_at_value(&self, value: f64, unit: TimeUnit) -> f64 {
        self.histogram.histogram_count_at_value(unit.to_nanos(value))
    }

    pub(crate) fn histogram(&self) -> &TimeWindowHistogram { &self.histogram }

    /// Step statistics plus the histogram window, in the base time unit.
    pub fn take_snapshot(&self) -> HistogramSnapshot {
        let unit = self.base_time_unit;
        let percentile_values = self
            .histogram
            .percentile_values()
            .into_iter()
            .map(|v| ValueAtPercentile::new(v.percentile(), unit.from_nanos(v.value())))
            .collect();
        let histogram_counts = self
            .histogram
            .bucket_counts()
            .into_iter()
            .map(|c| CountAtBucket::new(unit.from_nanos(c.bucket()), c.count()))
            .collect();

        HistogramSnapshot::new(
            self.count(),
            self.total_time(unit),
            self.max(unit),
            percentile_values,
            histogram_counts,
        )
    }

    pub(crate) fn roll(&self) {
        self.count.roll();
        self.total.roll();
        self.max.roll();
    }

    pub(crate) fn closing_roll(&self) {
        self.count.closing_roll();
        self.total.closing_roll();
        self.max.closing_roll();
    }
}

/// Observed count and total of an externally owned timer.
pub(crate) type TimerObservation = Box<dyn Fn() -> Option<(f64, f64)> + Send + Sync>;

/// A step timer fed from an externally owned count and total time.
///
/// Every read pulls both totals and adds how far each moved to the step, the same way
/// [`StepFunctionCounter`](super::StepFunctionCounter) does for a single total.
pub struct StepFunctionTimer {
    id: Id,
    observe: TimerObservation,
    total_time_unit: TimeUnit,
    base_time_unit: TimeUnit,
    last: Mutex<(f64, f64)>,
    count: StepDouble,
    total: StepDouble,
}

impl StepFunctionTimer {
    pub(crate) fn new(
        id: Id, clock: Arc<dyn Clock>, step: Duration, observe: TimerObservation, total_time_unit: TimeUnit,
        base_time_unit: TimeUnit,
    ) -> StepFunctionTimer {
        StepFunctionTimer {
            id,
            observe,
            total_time_unit,
            base_time_unit,
            last: Mutex::new((0.0, 0.0)),
            count: StepDouble::sum(clock.clone(), step),
            total: StepDouble::sum(clock, step),
        }
    }

    pub fn id(&self) -> &Id { &self.id }

    pub fn base_time_unit(&self) -> TimeUnit { self.base_time_unit }

    /// How far the observed count moved during the last completed step.
    pub fn count(&self) -> f64 {
        self.accumulate();
        self.count.poll()
    }

    pub fn total_time(&self, unit: TimeUnit) -> f64 {
        self.accumulate();
        unit.from_nanos(self.total.poll())
    }

    pub fn mean(&self, unit: TimeUnit) -> f64 {
        let count = self.count();
        if count == 0.0 {
            0.0
        } else {
            self.total_time(unit) / count
        }
    }

    fn accumulate(&self) {
        let (count, total) = match (self.observe)() {
            Some((count, total)) if !count.is_nan() && !total.is_nan() => (count, total),
            _ => return,
        };

        // Count and total must move together, so the pair is swapped under one lock.
        let (last_count, last_total) = {
            let mut last = lock(&self.last);
            std::mem::replace(&mut *last, (count, total))
        };

        let count_delta = count - last_count;
        if count_delta > 0.0 {
            self.count.add_pending(count_delta);
        }
        let total_delta = total - last_total;
        if total_delta > 0.0 {
            self.total.add_pending(self.total_time_unit.to_nanos(total_delta));
        }
    }

    pub(crate) fn roll(&self) {
        self.accumulate();
        self.count.roll();
        self.total.roll();
    }

    pub(crate) fn closing_roll(&self) {
        self.accumulate();
        self.count.closing_roll();
        self.total.closing_roll();
    }
}
