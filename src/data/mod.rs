use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

pub mod counter;
pub mod distribution;
pub mod gauge;
pub(crate) mod histogram;
pub mod snapshot;
pub(crate) mod step;
pub mod summary;
pub mod timer;

pub use self::{
    counter::{StepCounter, StepFunctionCounter},
    distribution::DistributionStatisticConfig,
    gauge::Gauge,
    snapshot::{CountAtBucket, HistogramSnapshot, Snapshot, ValueAtPercentile},
    summary::StepDistributionSummary,
    timer::{StepFunctionTimer, StepTimer},
};

/// A key/value dimension of a meter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Tag {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str { &self.key }

    pub fn value(&self) -> &str { &self.value }
}

/// The identity of a meter.
///
/// Tags are kept sorted by key, and setting a tag whose key is already present replaces the
/// previous value.  Two identities are equal when their names and tags are equal; the base unit
/// and description are informational only.
#[derive(Clone, Debug)]
pub struct Id {
    name: String,
    tags: Vec<Tag>,
    base_unit: Option<String>,
    description: Option<String>,
}

impl Id {
    pub fn new<N: Into<String>>(name: N) -> Id {
        Id {
            name: name.into(),
            tags: Vec::new(),
            base_unit: None,
            description: None,
        }
    }

    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Id {
        let tag = Tag::new(key, value);
        match self.tags.binary_search_by(|t| t.key.cmp(&tag.key)) {
            Ok(index) => self.tags[index] = tag,
            Err(index) => self.tags.insert(index, tag),
        }
        self
    }

    pub fn with_tags<I, K, V>(self, tags: I) -> Id
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        tags.into_iter().fold(self, |id, (k, v)| id.with_tag(k, v))
    }

    pub fn with_base_unit<U: Into<String>>(mut self, unit: U) -> Id {
        self.base_unit = Some(unit.into());
        self
    }

    pub fn with_description<D: Into<String>>(mut self, description: D) -> Id {
        self.description = Some(description.into());
        self
    }

    /// Derives an identity with the same tags under a different name.
    pub(crate) fn with_name<N: Into<String>>(&self, name: N) -> Id {
        Id {
            name: name.into(),
            tags: self.tags.clone(),
            base_unit: self.base_unit.clone(),
            description: self.description.clone(),
        }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn tags(&self) -> &[Tag] { &self.tags }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .binary_search_by(|t| t.key.as_str().cmp(key))
            .ok()
            .map(|index| self.tags[index].value.as_str())
    }

    pub fn base_unit(&self) -> Option<&str> { self.base_unit.as_ref().map(|u| u.as_str()) }

    pub fn description(&self) -> Option<&str> { self.description.as_ref().map(|d| d.as_str()) }
}

impl PartialEq for Id {
    fn eq(&self, other: &Id) -> bool { self.name == other.name && self.tags == other.tags }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.tags.hash(state);
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tags.is_empty() {
            write!(f, "{{")?;
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}={}", tag.key, tag.value)?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// A unit of time for reading timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn nanos_per_unit(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1_000.0,
            TimeUnit::Milliseconds => 1_000_000.0,
            TimeUnit::Seconds => 1_000_000_000.0,
            TimeUnit::Minutes => 60_000_000_000.0,
            TimeUnit::Hours => 3_600_000_000_000.0,
            TimeUnit::Days => 86_400_000_000_000.0,
        }
    }

    /// Converts a nanosecond amount into this unit.
    pub fn from_nanos(self, nanos: f64) -> f64 { nanos / self.nanos_per_unit() }

    /// Converts an amount of this unit into nanoseconds.
    pub fn to_nanos(self, amount: f64) -> f64 { amount * self.nanos_per_unit() }

    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }

    /// Parses a unit name such as `seconds`, `ms` or `MILLISECONDS`.
    pub fn parse(raw: &str) -> Option<TimeUnit> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanoseconds" => Some(TimeUnit::Nanoseconds),
            "us" | "microseconds" => Some(TimeUnit::Microseconds),
            "ms" | "milliseconds" => Some(TimeUnit::Milliseconds),
            "s" | "seconds" => Some(TimeUnit::Seconds),
            "m" | "minutes" => Some(TimeUnit::Minutes),
            "h" | "hours" => Some(TimeUnit::Hours),
            "d" | "days" => Some(TimeUnit::Days),
            _ => None,
        }
    }
}

/// The kinds of meter a registry can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeterKind {
    Counter,
    Gauge,
    Timer,
    DistributionSummary,
    FunctionCounter,
    FunctionTimer,
}

impl fmt::Display for MeterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MeterKind::Counter => "counter",
            MeterKind::Gauge => "gauge",
            MeterKind::Timer => "timer",
            MeterKind::DistributionSummary => "distribution summary",
            MeterKind::FunctionCounter => "function counter",
            MeterKind::FunctionTimer => "function timer",
        };
        write!(f, "{}", name)
    }
}

/// What a measurement describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Statistic {
    Count,
    Total,
    TotalTime,
    Max,
    Value,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Statistic::Count => "count",
            Statistic::Total => "total",
            Statistic::TotalTime => "totalTime",
            Statistic::Max => "max",
            Statistic::Value => "value",
        };
        write!(f, "{}", name)
    }
}

/// A single reading of a meter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    statistic: Statistic,
    value: f64,
}

impl Measurement {
    pub fn new(statistic: Statistic, value: f64) -> Self { Measurement { statistic, value } }

    pub fn statistic(&self) -> Statistic { self.statistic }

    pub fn value(&self) -> f64 { self.value }
}

/// A registered meter.
#[derive(Clone)]
pub enum Meter {
    Counter(Arc<StepCounter>),
    Gauge(Arc<Gauge>),
    Timer(Arc<StepTimer>),
    DistributionSummary(Arc<StepDistributionSummary>),
    FunctionCounter(Arc<StepFunctionCounter>),
    FunctionTimer(Arc<StepFunctionTimer>),
}

impl Meter {
    pub fn id(&self) -> &Id {
        match self {
            Meter::Counter(m) => m.id(),
            Meter::Gauge(m) => m.id(),
            Meter::Timer(m) => m.id(),
            Meter::DistributionSummary(m) => m.id(),
            Meter::FunctionCounter(m) => m.id(),
            Meter::FunctionTimer(m) => m.id(),
        }
    }

    pub fn kind(&self) -> MeterKind {
        match self {
            Meter::Counter(_) => MeterKind::Counter,
            Meter::Gauge(_) => MeterKind::Gauge,
            Meter::Timer(_) => MeterKind::Timer,
            Meter::DistributionSummary(_) => MeterKind::DistributionSummary,
            Meter::FunctionCounter(_) => MeterKind::FunctionCounter,
            Meter::FunctionTimer(_) => MeterKind::FunctionTimer,
        }
    }

    /// Reads every statistic of this meter.  Timer statistics are in their base time unit.
    pub fn measure(&self) -> Vec<Measurement> {
        match self {
            Meter::Counter(m) => vec![Measurement::new(Statistic::Count, m.count())],
            Meter::Gauge(m) => vec![Measurement::new(Statistic::Value, m.value())],
            Meter::Timer(m) => {
                let unit = m.base_time_unit();
                vec![
                    Measurement::new(Statistic::Count, m.count() as f64),
                    Measurement::new(Statistic::TotalTime, m.total_time(unit)),
                    Measurement::new(Statistic::Max, m.max(unit)),
                ]
            },
            Meter::DistributionSummary(m) => vec![
                Measurement::new(Statistic::Count, m.count() as f64),
                Measurement::new(Statistic::Total, m.total_amount()),
                Measurement::new(Statistic::Max, m.max()),
            ],
            Meter::FunctionCounter(m) => vec![Measurement::new(Statistic::Count, m.count())],
            Meter::FunctionTimer(m) => {
                let unit = m.base_time_unit();
                vec![
                    Measurement::new(Statistic::Count, m.count()),
                    Measurement::new(Statistic::TotalTime, m.total_time(unit)),
                ]
            },
        }
    }

    /// Brings this meter up to the current step, pulling from observed functions first.
    pub(crate) fn roll(&self) {
        match self {
            Meter::Counter(m) => m.roll(),
            Meter::Gauge(_) => {},
            Meter::Timer(m) => m.roll(),
            Meter::DistributionSummary(m) => m.roll(),
            Meter::FunctionCounter(m) => m.roll(),
            Meter::FunctionTimer(m) => m.roll(),
        }
    }

    /// Publishes the partial step on the next read and freezes the meter's step values.
    pub(crate) fn closing_roll(&self) {
        match self {
            Meter::Counter(m) => m.closing_roll(),
            Meter::Gauge(_) => {},
            Meter::Timer(m) => m.closing_roll(),
            Meter::DistributionSummary(m) => m.closing_roll(),
            Meter::FunctionCounter(m) => m.closing_roll(),
            Meter::FunctionTimer(m) => m.closing_roll(),
        }
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Meter")
            .field("kind", &self.kind())
            .field("id", self.id())
            .finish()
    }
}
