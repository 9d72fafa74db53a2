use crate::{
    clock::Clock,
    data::{DistributionStatisticConfig, TimeUnit},
    error::ConfigError,
    publisher::Publisher,
    registry::StepMeterRegistry,
};
use std::{sync::Arc, time::Duration};

/// A configuration builder for [`StepMeterRegistry`].
#[derive(Clone, Debug)]
pub struct Configuration {
    pub(crate) step: Duration,
    pub(crate) enabled: bool,
    pub(crate) thread_name: String,
    pub(crate) base_time_unit: TimeUnit,
    pub(crate) default_distribution: DistributionStatisticConfig,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            step: Duration::from_secs(60),
            enabled: true,
            thread_name: "stepmic-publisher".to_owned(),
            base_time_unit: TimeUnit::Milliseconds,
            default_distribution: DistributionStatisticConfig::defaults(),
        }
    }
}

impl Configuration {
    /// Creates a new `Configuration` with default values.
    pub fn new() -> Configuration { Default::default() }

    /// Reads a configuration from string properties.
    ///
    /// `lookup` is asked for `<prefix>.step`, `<prefix>.enabled`, `<prefix>.threadName` and
    /// `<prefix>.baseTimeUnit`.  Missing properties keep their defaults.  Durations accept the
    /// `500ms`, `10s`, `1m`, `2h` and `1d` forms, and a bare integer is read as milliseconds.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Configuration, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Configuration::new();
        let property = |name: &str| {
            let key = format!("{}.{}", prefix, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = property("step") {
            config.step = parse_duration(&value).ok_or_else(|| ConfigError::InvalidProperty { key, value })?;
        }
        if let Some((key, value)) = property("enabled") {
            config.enabled = match value.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => return Err(ConfigError::InvalidProperty { key, value }),
            };
        }
        if let Some((_, value)) = property("threadName") {
            config.thread_name = value;
        }
        if let Some((key, value)) = property("baseTimeUnit") {
            config.base_time_unit = TimeUnit::parse(&value).ok_or_else(|| ConfigError::InvalidProperty { key, value })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the step.
    ///
    /// Defaults to `60s`.
    ///
    /// Step meters report the activity of the last complete step, and the scheduler publishes
    /// once per step, shortly after each step boundary.
    pub fn step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets whether publishing is enabled.
    ///
    /// Defaults to `true`.
    ///
    /// A disabled registry still hands out working meters, but never starts its scheduler and
    /// does not publish on close.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the name of the scheduler thread started by [`StepMeterRegistry::start`].
    ///
    /// Defaults to `stepmic-publisher`.
    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the unit timers publish in.
    ///
    /// Defaults to milliseconds.
    pub fn base_time_unit(mut self, unit: TimeUnit) -> Self {
        self.base_time_unit = unit;
        self
    }

    /// Sets the distribution configuration every timer and distribution summary falls back to.
    pub fn default_distribution(mut self, config: DistributionStatisticConfig) -> Self {
        self.default_distribution = config;
        self
    }

    pub fn get_step(&self) -> Duration { self.step }

    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn get_thread_name(&self) -> &str { &self.thread_name }

    pub fn get_base_time_unit(&self) -> TimeUnit { self.base_time_unit }

    pub fn get_default_distribution(&self) -> &DistributionStatisticConfig { &self.default_distribution }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step.as_millis() == 0 {
            return Err(ConfigError::ZeroStep);
        }
        self.default_distribution.validate()
    }

    /// Create a [`StepMeterRegistry`] based on this configuration.
    pub fn build<C, P>(self, clock: C, publisher: P) -> Result<StepMeterRegistry, ConfigError>
    where
        C: Clock + 'static,
        P: Publisher,
    {
        self.validate()?;
        Ok(StepMeterRegistry::from_config(self, Arc::new(clock), Box::new(publisher)))
    }
}

/// Parses `500ms`, `10s`, `1m`, `2h`, `1d`, or a bare integer number of milliseconds.
pub(crate) fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (amount, unit) = raw.split_at(split);
    let amount = amount.parse::<u64>().ok()?;

    let millis = match unit.trim() {
        "" | "ms" => amount,
        "s" => amount.checked_mul(1_000)?,
        "m" => amount.checked_mul(60_000)?,
        "h" => amount.checked_mul(3_600_000)?,
        "d" => amount.checked_mul(86_400_000)?,
        _ => return None,
    };
    Some(Duration::from_millis(millis))
}
