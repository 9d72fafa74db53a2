use super::Meter;
use std::fmt;

/// An estimated value at a percentile of a histogram window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueAtPercentile {
    percentile: f64,
    value: f64,
}

impl ValueAtPercentile {
    pub fn new(percentile: f64, value: f64) -> Self { ValueAtPercentile { percentile, value } }

    /// The percentile, between `0.0` and `1.0`.
    pub fn percentile(&self) -> f64 { self.percentile }

    pub fn value(&self) -> f64 { self.value }

    /// A display label for the percentile, such as `p99` or `p999`.
    ///
    /// `0.0` and `1.0` are labeled `min` and `max`.
    pub fn label(&self) -> String {
        let clamped = self.percentile.max(0.0).min(1.0) * 100.0;

        // Scaling by 100 leaves float noise like 99.9000000001 behind.
        let rounded = (clamped * 1_000_000.0).round() / 1_000_000.0;
        match format!("{}", rounded).as_str() {
            "0" => "min".to_owned(),
            "100" => "max".to_owned(),
            raw => format!("p{}", raw).replace(".", ""),
        }
    }
}

/// The number of recordings at or below a bucket boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountAtBucket {
    bucket: f64,
    count: f64,
}

impl CountAtBucket {
    pub fn new(bucket: f64, count: f64) -> Self { CountAtBucket { bucket, count } }

    pub fn bucket(&self) -> f64 { self.bucket }

    pub fn count(&self) -> f64 { self.count }
}

/// A consistent view of a timer or distribution summary.
///
/// Count, total and max come from the last completed step.  Percentile values and bucket counts
/// come from the decaying histogram window at the time the snapshot was taken.  Timer values are
/// in the registry's base time unit.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSnapshot {
    count: u64,
    total: f64,
    max: f64,
    percentile_values: Vec<ValueAtPercentile>,
    histogram_counts: Vec<CountAtBucket>,
}

impl HistogramSnapshot {
    pub(crate) fn new(
        count: u64, total: f64, max: f64, percentile_values: Vec<ValueAtPercentile>,
        histogram_counts: Vec<CountAtBucket>,
    ) -> Self {
        HistogramSnapshot {
            count,
            total,
            max,
            percentile_values,
            histogram_counts,
        }
    }

    pub fn count(&self) -> u64 { self.count }

    pub fn total(&self) -> f64 { self.total }

    pub fn max(&self) -> f64 { self.max }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    pub fn percentile_values(&self) -> &[ValueAtPercentile] { &self.percentile_values }

    pub fn histogram_counts(&self) -> &[CountAtBucket] { &self.histogram_counts }
}

impl fmt::Display for HistogramSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "count={} total={} max={} mean={}", self.count, self.total, self.max, self.mean())?;
        for value in &self.percentile_values {
            write!(f, " {}={}", value.label(), value.value())?;
        }
        Ok(())
    }
}

/// The meters handed to a publisher on one publish cycle.
pub struct Snapshot {
    timestamp: u64,
    meters: Vec<Meter>,
}

impl Snapshot {
    pub(crate) fn new(timestamp: u64, meters: Vec<Meter>) -> Self { Snapshot { timestamp, meters } }

    /// Wall time of the publish, in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 { self.timestamp }

    pub fn meters(&self) -> &[Meter] { &self.meters }

    pub fn is_empty(&self) -> bool { self.meters.is_empty() }

    /// Converts this [`Snapshot`] to the underlying vector of meters.
    pub fn into_vec(self) -> Vec<Meter> { self.meters }
}
