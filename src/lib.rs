//! Step-aggregated meters with a scheduled publisher.
//!
//! Meters report the activity of the last complete step: a counter read during minute five
//! reports what was counted during minute four.  A [`StepMeterRegistry`] hands out meters and,
//! once started, publishes every one of them to a [`Publisher`] just after each step boundary.
//! Timers and distribution summaries can additionally keep a decaying histogram window for
//! percentiles and service level objective buckets.
mod clock;
mod configuration;
mod control;
mod data;
mod error;
mod helper;
mod publisher;
mod registry;

pub use self::{
    clock::{Clock, MockClock, SystemClock},
    configuration::Configuration,
    data::{
        CountAtBucket, DistributionStatisticConfig, Gauge, HistogramSnapshot, Id, Measurement, Meter, MeterKind,
        Snapshot, Statistic, StepCounter, StepDistributionSummary, StepFunctionCounter, StepFunctionTimer, StepTimer,
        Tag, TimeUnit, ValueAtPercentile,
    },
    error::{ConfigError, Error, PublishError},
    publisher::{LoggingPublisher, Publisher},
    registry::StepMeterRegistry,
};
