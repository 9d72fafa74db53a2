use crate::{
    data::{Meter, Snapshot},
    error::PublishError,
};
use log::{log, Level};

/// Receives the registry's meters once per publish cycle.
///
/// Exactly one thread calls `publish` at a time.  Returning an error, or panicking, is logged
/// by the registry and never stops later cycles.
pub trait Publisher: Send + 'static {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError>;
}

impl<F> Publisher for F
where
    F: FnMut(&Snapshot) -> Result<(), PublishError> + Send + 'static,
{
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError> { self(snapshot) }
}

/// Writes one log line per meter.
pub struct LoggingPublisher {
    level: Level,
}

impl LoggingPublisher {
    pub fn new() -> LoggingPublisher { LoggingPublisher { level: Level::Info } }

    /// Sets the level lines are logged at.  Defaults to `info`.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    fn format(meter: &Meter) -> String {
        let mut line = format!("{} {}", meter.kind(), meter.id());
        for measurement in meter.measure() {
            line.push_str(&format!(" {}={}", measurement.statistic(), measurement.value()));
        }
        if let Some(unit) = meter.id().base_unit() {
            line.push_str(&format!(" unit={}", unit));
        }
        line
    }
}

impl Default for LoggingPublisher {
    fn default() -> Self { Self::new() }
}

impl Publisher for LoggingPublisher {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError> {
        for meter in snapshot.meters() {
            log!(self.level, "{}", LoggingPublisher::format(meter));
        }
        Ok(())
    }
}
