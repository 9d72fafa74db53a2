use super::{
    distribution::DistributionStatisticConfig, histogram::TimeWindowHistogram, snapshot::HistogramSnapshot,
    step::StepDouble, Id,
};
use crate::{clock::Clock, error::ConfigError};
use std::{sync::Arc, time::Duration};

/// Tracks the distribution of arbitrary non-negative amounts, such as payload sizes.
pub struct StepDistributionSummary {
    id: Id,
    count: StepDouble,
    total: StepDouble,
    max: StepDouble,
    histogram: TimeWindowHistogram,
}

impl StepDistributionSummary {
    pub(crate) fn new(
        id: Id, clock: Arc<dyn Clock>, step: Duration, config: &DistributionStatisticConfig,
    ) -> Result<StepDistributionSummary, ConfigError> {
        let histogram = TimeWindowHistogram::new(clock.clone(), config)?;
        Ok(StepDistributionSummary {
            id,
            count: StepDouble::sum(clock.clone(), step),
            total: StepDouble::sum(clock.clone(), step),
            max: StepDouble::max(clock, step),
            histogram,
        })
    }

    pub fn id(&self) -> &Id { &self.id }

    /// Records `amount`.  Negative and `NaN` amounts are ignored.
    pub fn record(&self, amount: f64) {
        if amount.is_nan() || amount < 0.0 {
            return;
        }
        self.count.record(1.0);
        self.total.record(amount);
        self.max.record(amount);
        self.histogram.record_double(amount);
    }

    pub fn count(&self) -> u64 { self.count.poll() as u64 }

    pub fn total_amount(&self) -> f64 { self.total.poll() }

    pub fn max(&self) -> f64 { self.max.poll() }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.total_amount() / count as f64
        }
    }

    pub fn percentile(&self, percentile: f64) -> f64 { self.histogram.percentile(percentile) }

    pub fn histogram_count_at_value(&self, value: f64) -> f64 { self.histogram.histogram_count_at_value(value) }

    pub(crate) fn histogram(&self) -> &TimeWindowHistogram { &self.histogram }

    pub fn take_snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot::new(
            self.count(),
            self.total_amount(),
            self.max(),
            self.histogram.percentile_values(),
            self.histogram.bucket_counts(),
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
