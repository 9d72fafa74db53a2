use crate::{
    clock::Clock,
    configuration::Configuration,
    control::Scheduler,
    data::{
        histogram::TimeWindowHistogram, DistributionStatisticConfig, Gauge, Id, Meter, MeterKind, Snapshot,
        StepCounter, StepDistributionSummary, StepFunctionCounter, StepFunctionTimer, StepTimer, TimeUnit,
    },
    error::Error,
    helper::lock,
    publisher::Publisher,
};
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use log::{debug, error, warn};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    thread,
    time::Duration,
};

// Ticks land just after a step boundary so every meter has already rolled over.
const PUBLISH_OFFSET_MILLIS: u64 = 1;

type MeterMap = HashMap<Id, Meter, FnvBuildHasher>;

/// State shared between a registry and its publisher thread.
pub(crate) struct Inner {
    config: Configuration,
    clock: Arc<dyn Clock>,
    meters: RwLock<MeterMap>,
    publisher: Mutex<Box<dyn Publisher>>,
    closed: AtomicBool,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, MeterMap> { self.meters.read().unwrap_or_else(|e| e.into_inner()) }

    fn write(&self) -> RwLockWriteGuard<'_, MeterMap> { self.meters.write().unwrap_or_else(|e| e.into_inner()) }

    fn meters(&self) -> Vec<Meter> { self.read().values().cloned().collect() }

    /// Time until just after the next step boundary of the registry clock.
    pub(crate) fn next_publish_delay(&self) -> Duration {
        let step = (self.config.step.as_millis() as u64).max(1);
        let now = self.clock.wall_time();
        Duration::from_millis(step - now % step + PUBLISH_OFFSET_MILLIS)
    }

    /// Publishes one step, unless the registry has closed.
    ///
    /// `closed` is checked under the publisher lock, which `close` holds from its closing roll
    /// through its final publish, so the final partial step is never published twice.
    pub(crate) fn publish_if_open(&self) {
        let mut publisher = lock(&self.publisher);
        if self.closed.load(Ordering::Acquire) {
            debug!("registry is closed, skipping publish");
            return;
        }
        self.publish_safely(&mut **publisher, false);
    }

    fn publish_final(&self) {
        let mut publisher = lock(&self.publisher);
        self.publish_safely(&mut **publisher, true);
    }

    fn publish_safely(&self, publisher: &mut dyn Publisher, closing: bool) {
        let meters = self.meters();
        for meter in &meters {
            if closing {
                meter.closing_roll();
            } else {
                meter.roll();
            }
        }
        let snapshot = Snapshot::new(self.clock.wall_time(), meters);
        debug!("publishing {} meters", snapshot.meters().len());

        match panic::catch_unwind(AssertUnwindSafe(|| publisher.publish(&snapshot))) {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!("failed to publish metrics: {}", e),
            Err(_) => error!("publisher panicked while publishing {} meters", snapshot.meters().len()),
        }
    }
}

/// A registry of step meters that publishes their values once per step.
///
/// Meters are created on first registration and shared afterwards: registering the same
/// identity twice returns the same meter.  Once [`start`](StepMeterRegistry::start)ed, a single
/// background thread hands every meter to the [`Publisher`] just after each step boundary.
pub struct StepMeterRegistry {
    inner: Arc<Inner>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl StepMeterRegistry {
    pub(crate) fn from_config(
        config: Configuration, clock: Arc<dyn Clock>, publisher: Box<dyn Publisher>,
    ) -> StepMeterRegistry {
        StepMeterRegistry {
            inner: Arc::new(Inner {
                config,
                clock,
                meters: RwLock::new(HashMap::default()),
                publisher: Mutex::new(publisher),
                closed: AtomicBool::new(false),
            }),
            scheduler: Mutex::new(None),
        }
    }

    /// Gets a builder to configure a `StepMeterRegistry` instance with.
    pub fn builder() -> Configuration { Configuration::default() }

    pub fn config(&self) -> &Configuration { &self.inner.config }

    pub fn clock(&self) -> &Arc<dyn Clock> { &self.inner.clock }

    pub fn counter(&self, id: Id) -> Result<Arc<StepCounter>, Error> {
        let (clock, step) = (self.inner.clock.clone(), self.inner.config.step);
        self.register(
            id,
            MeterKind::Counter,
            |id| Ok(Meter::Counter(Arc::new(StepCounter::new(id, clock, step)))),
            |meter| match meter {
                Meter::Counter(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    /// Registers a gauge reading `f` from `obj`.
    ///
    /// Only a weak reference to `obj` is kept: once it is dropped, the gauge reads `NaN`.
    pub fn gauge<T, F>(&self, id: Id, obj: &Arc<T>, f: F) -> Result<Arc<Gauge>, Error>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(obj);
        self.register(
            id,
            MeterKind::Gauge,
            move |id| {
                let observe = Box::new(move || weak.upgrade().map(|obj| f(&obj)));
                Ok(Meter::Gauge(Arc::new(Gauge::new(id, observe))))
            },
            |meter| match meter {
                Meter::Gauge(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    /// Registers a timer using the registry's default distribution configuration.
    pub fn timer(&self, id: Id) -> Result<Arc<StepTimer>, Error> {
        self.timer_with(id, DistributionStatisticConfig::new())
    }

    /// Registers a timer.  Unset fields of `config` fall back to the registry defaults.
    pub fn timer_with(&self, id: Id, config: DistributionStatisticConfig) -> Result<Arc<StepTimer>, Error> {
        let config = config.merge(&self.inner.config.default_distribution);
        let (clock, step) = (self.inner.clock.clone(), self.inner.config.step);
        let unit = self.inner.config.base_time_unit;
        let id = if id.base_unit().is_none() { id.with_base_unit(unit.name()) } else { id };
        self.register(
            id,
            MeterKind::Timer,
            |id| Ok(Meter::Timer(Arc::new(StepTimer::new(id, clock, step, unit, &config)?))),
            |meter| match meter {
                Meter::Timer(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    /// Registers a distribution summary using the registry's default distribution configuration.
    pub fn summary(&self, id: Id) -> Result<Arc<StepDistributionSummary>, Error> {
        self.summary_with(id, DistributionStatisticConfig::new())
    }

    /// Registers a distribution summary.  Unset fields of `config` fall back to the registry
    /// defaults.
    pub fn summary_with(
        &self, id: Id, config: DistributionStatisticConfig,
    ) -> Result<Arc<StepDistributionSummary>, Error> {
        let config = config.merge(&self.inner.config.default_distribution);
        let (clock, step) = (self.inner.clock.clone(), self.inner.config.step);
        self.register(
            id,
            MeterKind::DistributionSummary,
            |id| {
                let summary = StepDistributionSummary::new(id, clock, step, &config)?;
                Ok(Meter::DistributionSummary(Arc::new(summary)))
            },
            |meter| match meter {
                Meter::DistributionSummary(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    /// Registers a counter tracking a monotonically increasing total read from `obj`.
    pub fn function_counter<T, F>(&self, id: Id, obj: &Arc<T>, f: F) -> Result<Arc<StepFunctionCounter>, Error>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(obj);
        let (clock, step) = (self.inner.clock.clone(), self.inner.config.step);
        self.register(
            id,
            MeterKind::FunctionCounter,
            move |id| {
                let observe = Box::new(move || weak.upgrade().map(|obj| f(&obj)));
                Ok(Meter::FunctionCounter(Arc::new(StepFunctionCounter::new(id, clock, step, observe))))
            },
            |meter| match meter {
                Meter::FunctionCounter(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    /// Registers a timer tracking a count and a total time read from `obj`.
    ///
    /// `total_fn` reports in `total_time_unit`.
    pub fn function_timer<T, C, S>(
        &self, id: Id, obj: &Arc<T>, count_fn: C, total_fn: S, total_time_unit: TimeUnit,
    ) -> Result<Arc<StepFunctionTimer>, Error>
    where
        T: Send + Sync + 'static,
        C: Fn(&T) -> f64 + Send + Sync + 'static,
        S: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(obj);
        let (clock, step) = (self.inner.clock.clone(), self.inner.config.step);
        let unit = self.inner.config.base_time_unit;
        let id = if id.base_unit().is_none() { id.with_base_unit(unit.name()) } else { id };
        self.register(
            id,
            MeterKind::FunctionTimer,
            move |id| {
                let observe = Box::new(move || weak.upgrade().map(|obj| (count_fn(&obj), total_fn(&obj))));
                let timer = StepFunctionTimer::new(id, clock, step, observe, total_time_unit, unit);
                Ok(Meter::FunctionTimer(Arc::new(timer)))
            },
            |meter| match meter {
                Meter::FunctionTimer(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    fn register<M, C, E>(&self, id: Id, kind: MeterKind, create: C, extract: E) -> Result<Arc<M>, Error>
    where
        C: FnOnce(Id) -> Result<Meter, Error>,
        E: Fn(&Meter) -> Option<Arc<M>>,
    {
        let conflict = |existing: &Meter| Error::MeterKindConflict {
            name: existing.id().to_string(),
            existing: existing.kind(),
            requested: kind,
        };

        if let Some(existing) = self.inner.read().get(&id) {
            return extract(existing).ok_or_else(|| conflict(existing));
        }

        let mut meters = self.inner.write();
        if let Some(existing) = meters.get(&id) {
            return extract(existing).ok_or_else(|| conflict(existing));
        }

        let meter = create(id.clone())?;
        let registered = extract(&meter).ok_or_else(|| conflict(&meter))?;
        let gauges = distribution_gauges(&meter);
        debug!("registered {} {}", kind, id);
        meters.insert(id, meter);
        for gauge in gauges {
            meters
                .entry(gauge.id().clone())
                .or_insert_with(|| Meter::Gauge(Arc::new(gauge)));
        }

        Ok(registered)
    }

    /// Every registered meter, including the gauges derived from timers and summaries.
    pub fn meters(&self) -> Vec<Meter> { self.inner.meters() }

    /// Every registered meter named `name`, regardless of tags.
    pub fn find(&self, name: &str) -> Vec<Meter> {
        self.inner
            .read()
            .values()
            .filter(|meter| meter.id().name() == name)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &Id) -> Option<Meter> { self.inner.read().get(id).cloned() }

    /// Starts publishing once per step on a thread named after the configured thread name.
    pub fn start(&self) -> Result<(), Error> {
        self.start_with(thread::Builder::new().name(self.inner.config.thread_name.clone()))
    }

    /// Starts publishing once per step on a thread spawned from `builder`.
    ///
    /// A scheduler that is already running is stopped first.  Disabled and closed registries
    /// never start.
    pub fn start_with(&self, builder: thread::Builder) -> Result<(), Error> {
        if !self.inner.config.enabled {
            debug!("publishing is disabled, not starting publisher thread");
            return Ok(());
        }
        if self.is_closed() {
            warn!("registry is closed, not starting publisher thread");
            return Ok(());
        }

        let mut scheduler = lock(&self.scheduler);
        if let Some(previous) = scheduler.take() {
            previous.stop();
        }
        match Scheduler::spawn(self.inner.clone(), builder) {
            Ok(spawned) => {
                *scheduler = Some(spawned);
                Ok(())
            },
            Err(e) => {
                error!("failed to spawn publisher thread: {}", e);
                Err(e.into())
            },
        }
    }

    /// Stops the scheduled publishing without publishing.  A publish already underway finishes.
    pub fn stop(&self) {
        if let Some(scheduler) = lock(&self.scheduler).take() {
            debug!("stopping publisher thread");
            scheduler.stop();
        }
    }

    pub fn is_running(&self) -> bool { lock(&self.scheduler).is_some() }

    /// Runs one publish cycle on the calling thread.  Does nothing once closed.
    pub fn publish(&self) { self.inner.publish_if_open() }

    /// Publishes whatever was recorded in the current, incomplete step, then stops.
    ///
    /// Only the first call has any effect.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.inner.config.enabled {
            self.inner.publish_final();
        }
        self.stop();
    }

    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }
}

impl Drop for StepMeterRegistry {
    fn drop(&mut self) { self.stop() }
}

/// Percentile and bucket gauges derived from a timer or distribution summary.
fn distribution_gauges(meter: &Meter) -> Vec<Gauge> {
    match meter {
        Meter::Timer(timer) => {
            let unit = timer.base_time_unit();
            histogram_gauges(
                timer,
                timer.id(),
                timer.histogram(),
                &|nanos| unit.from_nanos(nanos),
                |t, p| t.percentile(p, t.base_time_unit()),
                |t, nanos| t.histogram_count_at_value(nanos, TimeUnit::Nanoseconds),
            )
        },
        Meter::DistributionSummary(summary) => histogram_gauges(
            summary,
            summary.id(),
            summary.histogram(),
            &|value| value,
            |s, p| s.percentile(p),
            |s, value| s.histogram_count_at_value(value),
        ),
        Meter::Counter(_) | Meter::Gauge(_) | Meter::FunctionCounter(_) | Meter::FunctionTimer(_) => Vec::new(),
    }
}

fn histogram_gauges<M>(
    meter: &Arc<M>, id: &Id, histogram: &TimeWindowHistogram, to_base_unit: &dyn Fn(f64) -> f64,
    percentile: fn(&M, f64) -> f64, count_at: fn(&M, f64) -> f64,
) -> Vec<Gauge>
where
    M: Send + Sync + 'static,
{
    let mut gauges = Vec::with_capacity(histogram.percentiles().len() + histogram.buckets().len());

    for &p in histogram.percentiles() {
        let weak = Arc::downgrade(meter);
        let gauge_id = id.with_name(format!("{}.percentile", id.name())).with_tag("phi", p.to_string());
        let observe = Box::new(move || weak.upgrade().map(|m| percentile(&m, p)));
        gauges.push(Gauge::new(gauge_id, observe));
    }

    for &bucket in histogram.buckets() {
        let weak = Arc::downgrade(meter);
        let le = if bucket >= u64::max_value() as f64 {
            "+Inf".to_owned()
        } else {
            to_base_unit(bucket).to_string()
        };
        let gauge_id = id.with_name(format!("{}.histogram", id.name())).with_tag("le", le);
        let observe = Box::new(move || weak.upgrade().map(|m| count_at(&m, bucket)));
        gauges.push(Gauge::new(gauge_id, observe));
    }

    gauges
}

#[cfg(test)]
mod tests {
    use super::StepMeterRegistry;
    use crate::{
        clock::{MockClock, SystemClock},
        configuration::Configuration,
        data::{DistributionStatisticConfig, Id, Meter, MeterKind, Snapshot, Statistic},
        error::{Error, PublishError},
        publisher::LoggingPublisher,
    };
    use crossbeam_channel::{unbounded, Sender};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        thread,
        time::Duration,
    };

    const STEP: Duration = Duration::from_secs(10);

    fn init() { let _ = env_logger::builder().is_test(true).try_init(); }

    fn registry(clock: &Arc<MockClock>) -> StepMeterRegistry {
        Configuration::new()
            .step(STEP)
            .build(clock.clone(), LoggingPublisher::new())
            .unwrap()
    }

    /// A registry whose publisher records the count statistic of every meter named `name`.
    fn recording_registry(
        clock: &Arc<MockClock>, name: &'static str, enabled: bool,
    ) -> (StepMeterRegistry, Arc<Mutex<Vec<f64>>>) {
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let registry = Configuration::new()
            .step(STEP)
            .enabled(enabled)
            .build(clock.clone(), move |snapshot: &Snapshot| -> Result<(), PublishError> {
                for meter in snapshot.meters().iter().filter(|m| m.id().name() == name) {
                    for measurement in meter.measure() {
                        if measurement.statistic() == Statistic::Count {
                            sink.lock().unwrap().push(measurement.value());
                        }
                    }
                }
                Ok(())
            })
            .unwrap();
        (registry, published)
    }

    #[test]
    fn test_registration_returns_existing_meter() {
        init();
        let clock = Arc::new(MockClock::new());
        let registry = registry(&clock);

        let a = registry.counter(Id::new("requests").with_tag("status", "200")).unwrap();
        let b = registry.counter(Id::new("requests").with_tag("status", "200")).unwrap();
        let c = registry.counter(Id::new("requests").with_tag("status", "500")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        a.increment();
        b.increment();
        clock.add(STEP);
        assert_eq!(a.count(), 2.0);
        assert_eq!(registry.find("requests").len(), 2);
    }

    #[test]
    fn test_kind_conflict() {
        init();
        let clock = Arc::new(MockClock::new());
        let registry = registry(&clock);

        registry.counter(Id::new("jobs")).unwrap();
        match registry.timer(Id::new("jobs")) {
            Err(Error::MeterKindConflict { name, existing, requested }) => {
                assert_eq!(name, "jobs");
                assert_eq!(existing, MeterKind::Counter);
                assert_eq!(requested, MeterKind::Timer);
            },
            _ => panic!("expected a kind conflict"),
        }
    }

    #[test]
    fn test_invalid_distribution_is_not_registered() {
        init();
        let clock = Arc::new(MockClock::new());
        let registry = registry(&clock);

        let config = DistributionStatisticConfig::new().minimum_expected_value(10.0).maximum_expected_value(1.0);
        match registry.summary_with(Id::new("payload"), config) {
            Err(Error::InvalidConfiguration(_)) => {},
            _ => panic!("expected an invalid configuration"),
        }
        assert!(registry.meters().is_empty());
    }

    #[test]
    fn test_percentile_and_bucket_gauges() {
        init();
        let clock = Arc::new(MockClock::new());
        let registry = registry(&clock);

        let config = DistributionStatisticConfig::new()
            .percentiles(&[0.5, 0.95])
            .service_level_objectives(&[10_000_000.0]);
        let timer = registry.timer_with(Id::new("request").with_tag("uri", "/"), config).unwrap();
        assert_eq!(registry.meters().len(), 4);

        let percentiles = registry.find("request.percentile");
        let mut phis: Vec<String> = percentiles
            .iter()
            .filter_map(|m| m.id().tag("phi").map(|p| p.to_owned()))
            .collect();
        phis.sort();
        assert_eq!(phis, vec!["0.5", "0.95"]);
        assert!(percentiles.iter().all(|m| m.id().tag("uri") == Some("/")));

        let buckets = registry.find("request.histogram");
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].id().tag("le"), Some("10"));

        timer.record(Duration::from_millis(5));
        timer.record(Duration::from_millis(20));
        match &buckets[0] {
            Meter::Gauge(gauge) => assert_eq!(gauge.value(), 1.0),
            other => panic!("unexpected meter {:?}", other),
        }

        // Registering again does not duplicate the derived gauges.
        registry.timer(Id::new("request").with_tag("uri", "/")).unwrap();
        assert_eq!(registry.meters().len(), 4);
    }

    #[test]
    fn test_gauge_reports_nan_after_drop() {
        init();
        let clock = Arc::new(MockClock::new());
        let registry = registry(&clock);

        let queue = Arc::new(Mutex::new(vec![1, 2, 3]));
        let gauge = registry
            .gauge(Id::new("queue.size"), &queue, |q| q.lock().unwrap().len() as f64)
            .unwrap();
        assert_eq!(gauge.value(), 3.0);

        drop(queue);
        assert!(gauge.value().is_nan());
    }

    #[test]
    fn test_function_meters() {
        init();
        let clock = Arc::new(MockClock::new());
        let registry = registry(&clock);

        let source = Arc::new(AtomicUsize::new(0));
        let counter = registry
            .function_counter(Id::new("reads"), &source, |s| s.load(Ordering::Relaxed) as f64)
            .unwrap();
        let timer = registry
            .function_timer(
                Id::new("reads.time"),
                &source,
                |s| s.load(Ordering::Relaxed) as f64,
                |s| s.load(Ordering::Relaxed) as f64 * 2.0,
                crate::data::TimeUnit::Milliseconds,
            )
            .unwrap();

        source.store(5, Ordering::Relaxed);
        registry.publish();
        clock.add(STEP);
        registry.publish();

        assert_eq!(counter.count(), 5.0);
        assert_eq!(timer.count(), 5.0);
        assert_eq!(timer.total_time(crate::data::TimeUnit::Milliseconds), 10.0);
    }

    #[test]
    fn test_publish_sees_completed_step() {
        init();
        let clock = Arc::new(MockClock::new());
        let (registry, published) = recording_registry(&clock, "events", true);
        let counter = registry.counter(Id::new("events")).unwrap();

        counter.increment_by(3.0);
        registry.publish();
        clock.add(STEP);
        counter.increment_by(100.0);
        registry.publish();
        registry.publish();

        assert_eq!(*published.lock().unwrap(), vec![0.0, 3.0, 3.0]);
    }

    #[test]
    fn test_close_publishes_partial_step_once() {
        init();
        let clock = Arc::new(MockClock::new());
        let (registry, published) = recording_registry(&clock, "events", true);
        let counter = registry.counter(Id::new("events")).unwrap();

        counter.increment_by(5.0);
        registry.close();
        registry.close();
        registry.publish();

        assert!(registry.is_closed());
        assert_eq!(*published.lock().unwrap(), vec![5.0]);
    }

    #[test]
    fn test_tick_racing_close_does_not_republish() {
        init();
        let clock = Arc::new(MockClock::new());
        let (registry, published) = recording_registry(&clock, "events", true);
        let registry = Arc::new(registry);
        registry.counter(Id::new("events")).unwrap().increment_by(5.0);

        // Hold the publisher while a tick and a close both queue up behind it.
        let held = registry.inner.publisher.lock().unwrap();
        let tick = {
            let inner = registry.inner.clone();
            thread::spawn(move || inner.publish_if_open())
        };
        thread::sleep(Duration::from_millis(20));
        let closer = {
            let registry = registry.clone();
            thread::spawn(move || registry.close())
        };
        while !registry.is_closed() {
            thread::yield_now();
        }
        drop(held);

        tick.join().unwrap();
        closer.join().unwrap();
        assert_eq!(*published.lock().unwrap(), vec![5.0]);

        registry.inner.publish_if_open();
        assert_eq!(published.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_registry() {
        init();
        let clock = Arc::new(MockClock::new());
        let (registry, published) = recording_registry(&clock, "events", false);
        let counter = registry.counter(Id::new("events")).unwrap();
        counter.increment();

        registry.start().unwrap();
        assert!(!registry.is_running());

        registry.close();
        assert!(published.lock().unwrap().is_empty());

        clock.add(STEP);
        assert_eq!(counter.count(), 1.0);
    }

    fn scheduled_registry<F>(publish: F) -> StepMeterRegistry
    where
        F: FnMut(&Snapshot) -> Result<(), PublishError> + Send + 'static,
    {
        Configuration::new()
            .step(Duration::from_millis(20))
            .thread_name("stepmic-test")
            .build(SystemClock::new(), publish)
            .unwrap()
    }

    fn notify(tx: &Sender<()>) { let _ = tx.send(()); }

    #[test]
    fn test_scheduler_publishes_every_step() {
        init();
        let (tx, rx) = unbounded();
        let registry = scheduled_registry(move |_: &Snapshot| {
            notify(&tx);
            Ok(())
        });

        registry.start().unwrap();
        assert!(registry.is_running());
        for _ in 0..3 {
            assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        }

        registry.stop();
        assert!(!registry.is_running());
    }

    #[test]
    fn test_scheduler_survives_failing_publisher() {
        init();
        let (tx, rx) = unbounded();
        let mut calls = 0;
        let registry = scheduled_registry(move |_: &Snapshot| {
            calls += 1;
            notify(&tx);
            match calls % 3 {
                0 => Ok(()),
                1 => Err(PublishError::Other("backend unavailable".to_owned())),
                _ => panic!("publisher bug"),
            }
        });

        registry.start().unwrap();
        for _ in 0..5 {
            assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        }
        registry.close();
    }

    #[test]
    fn test_restart_replaces_scheduler() {
        init();
        let (tx, rx) = unbounded();
        let registry = scheduled_registry(move |_: &Snapshot| {
            notify(&tx);
            Ok(())
        });

        registry.start().unwrap();
        registry.start().unwrap();
        assert!(registry.is_running());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        // Give both threads time to see their stop message, then expect silence.
        registry.stop();
        thread::sleep(Duration::from_millis(100));
        while rx.try_recv().is_ok() {}
        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());
    }
}
