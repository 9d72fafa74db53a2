use crate::data::MeterKind;
use std::io;

/// Errors raised while validating a distribution or registry configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A percentile was outside of `[0.0, 1.0]`.
    #[error("percentile {0} must be between 0.0 and 1.0")]
    PercentileOutOfRange(f64),
    /// The minimum expected value was zero, negative, or not a number.
    #[error("minimum expected value {0} must be greater than zero")]
    NonPositiveMinimum(f64),
    /// The minimum expected value exceeded the maximum.
    #[error("minimum expected value {minimum} must not exceed maximum expected value {maximum}")]
    InvertedBounds { minimum: f64, maximum: f64 },
    /// The ring buffer had no phases.
    #[error("buffer length must be at least 1")]
    EmptyBuffer,
    /// Splitting the expiry across the buffer gave phases shorter than the rotation granularity.
    #[error("expiry of {expiry_ms}ms split across {buffer_length} phases is below the 1ms rotation granularity")]
    RotationTooFine { expiry_ms: u128, buffer_length: usize },
    /// Percentile precision outside of what the estimator supports.
    #[error("percentile precision {0} must be between 0 and 5")]
    PrecisionOutOfRange(u8),
    /// A service level objective boundary was not a positive number.
    #[error("service level objective {0} must be greater than zero")]
    InvalidObjective(f64),
    /// The registry step was zero.
    #[error("step must be greater than zero")]
    ZeroStep,
    /// A configuration property could not be parsed.
    #[error("invalid value {value:?} for property {key}")]
    InvalidProperty { key: String, value: String },
}

/// Errors returned from registry operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A meter's distribution configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    /// A meter with the same identity but a different kind is already registered.
    #[error("meter {name} is already registered as a {existing}, not a {requested}")]
    MeterKindConflict {
        name: String,
        existing: MeterKind,
        requested: MeterKind,
    },
    /// The scheduler thread could not be spawned.
    #[error("failed to spawn publisher thread: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by a [`Publisher`](crate::Publisher).
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("i/o error while publishing: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}
