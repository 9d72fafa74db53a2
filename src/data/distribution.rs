use crate::error::ConfigError;
use std::time::Duration;

const DEFAULT_PRECISION: u8 = 1;
const DEFAULT_MINIMUM: f64 = 1.0;
const DEFAULT_MAXIMUM: f64 = u64::max_value() as f64;
const DEFAULT_EXPIRY: Duration = Duration::from_secs(120);
const DEFAULT_BUFFER_LENGTH: usize = 3;

/// Smallest phase a histogram is allowed to rotate through.
pub(crate) const MIN_ROTATION: Duration = Duration::from_millis(1);

/// Describes which distribution statistics a timer or summary tracks.
///
/// Every field is optional.  Unset fields fall back to the defaults when read, and
/// [`DistributionStatisticConfig::merge`] layers a partial configuration over another one,
/// field by field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DistributionStatisticConfig {
    percentiles: Option<Vec<f64>>,
    percentile_histogram: Option<bool>,
    percentile_precision: Option<u8>,
    minimum_expected_value: Option<f64>,
    maximum_expected_value: Option<f64>,
    service_level_objectives: Option<Vec<f64>>,
    expiry: Option<Duration>,
    buffer_length: Option<usize>,
}

impl DistributionStatisticConfig {
    /// Creates a configuration with every field unset.
    pub fn new() -> Self { Default::default() }

    /// Creates a configuration with every field explicitly set to its default.
    pub fn defaults() -> Self {
        DistributionStatisticConfig {
            percentiles: Some(Vec::new()),
            percentile_histogram: Some(false),
            percentile_precision: Some(DEFAULT_PRECISION),
            minimum_expected_value: Some(DEFAULT_MINIMUM),
            maximum_expected_value: Some(DEFAULT_MAXIMUM),
            service_level_objectives: Some(Vec::new()),
            expiry: Some(DEFAULT_EXPIRY),
            buffer_length: Some(DEFAULT_BUFFER_LENGTH),
        }
    }

    /// Sets the percentiles to publish, each between `0.0` and `1.0`.
    pub fn percentiles(mut self, percentiles: &[f64]) -> Self {
        self.percentiles = Some(percentiles.to_vec());
        self
    }

    /// Sets whether the generated percentile histogram buckets are published.
    pub fn percentile_histogram(mut self, enabled: bool) -> Self {
        self.percentile_histogram = Some(enabled);
        self
    }

    /// Sets the number of significant decimal digits kept by the percentile estimator.
    ///
    /// Defaults to `1`.  Higher values give tighter percentile estimates at the cost of memory
    /// in every phase of the histogram.
    pub fn percentile_precision(mut self, digits: u8) -> Self {
        self.percentile_precision = Some(digits);
        self
    }

    pub fn minimum_expected_value(mut self, value: f64) -> Self {
        self.minimum_expected_value = Some(value);
        self
    }

    pub fn maximum_expected_value(mut self, value: f64) -> Self {
        self.maximum_expected_value = Some(value);
        self
    }

    /// Sets explicit bucket boundaries that are always counted exactly.
    pub fn service_level_objectives(mut self, boundaries: &[f64]) -> Self {
        self.service_level_objectives = Some(boundaries.to_vec());
        self
    }

    /// Sets how long a recording stays visible to percentile and bucket queries.
    ///
    /// Defaults to two minutes.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Sets the number of phases the expiry is split into.
    ///
    /// Defaults to `3`.
    pub fn buffer_length(mut self, length: usize) -> Self {
        self.buffer_length = Some(length);
        self
    }

    /// Layers this configuration over `parent`, preferring explicitly set fields of `self`.
    pub fn merge(&self, parent: &DistributionStatisticConfig) -> DistributionStatisticConfig {
        DistributionStatisticConfig {
            percentiles: self.percentiles.clone().or_else(|| parent.percentiles.clone()),
            percentile_histogram: self.percentile_histogram.or(parent.percentile_histogram),
            percentile_precision: self.percentile_precision.or(parent.percentile_precision),
            minimum_expected_value: self.minimum_expected_value.or(parent.minimum_expected_value),
            maximum_expected_value: self.maximum_expected_value.or(parent.maximum_expected_value),
            service_level_objectives: self
                .service_level_objectives
                .clone()
                .or_else(|| parent.service_level_objectives.clone()),
            expiry: self.expiry.or(parent.expiry),
            buffer_length: self.buffer_length.or(parent.buffer_length),
        }
    }

    /// Checks the effective values of this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &p in self.get_percentiles() {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::PercentileOutOfRange(p));
            }
        }

        let minimum = self.get_minimum_expected_value();
        let maximum = self.get_maximum_expected_value();
        if minimum.is_nan() || minimum <= 0.0 {
            return Err(ConfigError::NonPositiveMinimum(minimum));
        }
        if maximum.is_nan() || minimum > maximum {
            return Err(ConfigError::InvertedBounds { minimum, maximum });
        }

        for &slo in self.get_service_level_objectives() {
            if slo.is_nan() || slo <= 0.0 {
                return Err(ConfigError::InvalidObjective(slo));
            }
        }

        let precision = self.get_percentile_precision();
        if precision > 5 {
            return Err(ConfigError::PrecisionOutOfRange(precision));
        }

        let buffer_length = self.get_buffer_length();
        if buffer_length == 0 {
            return Err(ConfigError::EmptyBuffer);
        }
        let expiry = self.get_expiry();
        if buffer_length > u32::max_value() as usize || expiry / (buffer_length as u32) < MIN_ROTATION {
            return Err(ConfigError::RotationTooFine {
                expiry_ms: expiry.as_millis(),
                buffer_length,
            });
        }

        Ok(())
    }

    pub fn get_percentiles(&self) -> &[f64] { self.percentiles.as_ref().map(|p| p.as_slice()).unwrap_or(&[]) }

    pub fn is_percentile_histogram(&self) -> bool { self.percentile_histogram.unwrap_or(false) }

    pub fn get_percentile_precision(&self) -> u8 { self.percentile_precision.unwrap_or(DEFAULT_PRECISION) }

    pub fn get_minimum_expected_value(&self) -> f64 { self.minimum_expected_value.unwrap_or(DEFAULT_MINIMUM) }

    pub fn get_maximum_expected_value(&self) -> f64 { self.maximum_expected_value.unwrap_or(DEFAULT_MAXIMUM) }

    pub fn get_service_level_objectives(&self) -> &[f64] {
        self.service_level_objectives
            .as_ref()
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_expiry(&self) -> Duration { self.expiry.unwrap_or(DEFAULT_EXPIRY) }

    pub fn get_buffer_length(&self) -> usize { self.buffer_length.unwrap_or(DEFAULT_BUFFER_LENGTH) }

    /// Whether any percentiles or bucket counts would be derived from this configuration.
    pub fn is_publishing_distribution(&self) -> bool {
        !self.get_percentiles().is_empty() || !self.histogram_buckets().is_empty()
    }

    /// The sorted, deduplicated bucket boundaries counted by a histogram with this
    /// configuration: service level objectives plus, when the percentile histogram is enabled,
    /// the generated buckets between the minimum and maximum expected values.
    pub fn histogram_buckets(&self) -> Vec<f64> {
        let mut buckets: Vec<f64> = self.get_service_level_objectives().to_vec();

        if self.is_percentile_histogram() {
            let minimum = self.get_minimum_expected_value();
            let maximum = self.get_maximum_expected_value();
            buckets.extend(
                percentile_histogram_buckets()
                    .into_iter()
                    .filter(|b| *b >= minimum && *b <= maximum),
            );
        }

        buckets.retain(|b| !b.is_nan());
        buckets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        buckets.dedup();
        buckets
    }
}

/// The generated percentile histogram boundaries: `1, 2, 3`, then each power of four split
/// into thirds, capped by `u64::MAX`.
pub(crate) fn percentile_histogram_buckets() -> Vec<f64> {
    let mut buckets = vec![1.0, 2.0, 3.0];

    // Past 2^60 the next power of four no longer fits in 64 bits.
    let mut exp = 2;
    while exp < 62 {
        let mut current: u64 = 1 << exp;
        let delta = current / 3;
        let next = (current << 2) - delta;
        while current < next {
            buckets.push(current as f64);
            current += delta;
        }
        exp += 2;
    }

    buckets.push(u64::max_value() as f64);
    buckets
}
