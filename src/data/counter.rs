use super::{step::StepDouble, Id};
use crate::{clock::Clock, helper::swap_f64};
use std::{
    sync::{atomic::AtomicU64, Arc},
    time::Duration,
};

/// A monotonically increasing count, reported per step.
pub struct StepCounter {
    id: Id,
    value: StepDouble,
}

impl StepCounter {
    pub(crate) fn new(id: Id, clock: Arc<dyn Clock>, step: Duration) -> StepCounter {
        StepCounter {
            id,
            value: StepDouble::sum(clock, step),
        }
    }

    pub fn id(&self) -> &Id { &self.id }

    pub fn increment(&self) { self.increment_by(1.0) }

    /// Adds `amount` to the current step.
    ///
    /// Negative and `NaN` amounts are ignored.
    pub fn increment_by(&self, amount: f64) {
        if amount.is_nan() || amount < 0.0 {
            return;
        }
        self.value.record(amount);
    }

    /// The total of the last completed step.
    pub fn count(&self) -> f64 { self.value.poll() }

    pub(crate) fn roll(&self) { self.value.roll() }

    pub(crate) fn closing_roll(&self) { self.value.closing_roll() }
}

/// A step counter fed from an externally owned, monotonically increasing total.
///
/// Every read computes how far the observed total moved since the last read and adds that delta
/// to the step.  Once the observed object is gone, no further deltas arrive.
pub struct StepFunctionCounter {
    id: Id,
    observe: Box<dyn Fn() -> Option<f64> + Send + Sync>,
    last: AtomicU64,
    value: StepDouble,
}

impl StepFunctionCounter {
    pub(crate) fn new(
        id: Id, clock: Arc<dyn Clock>, step: Duration, observe: Box<dyn Fn() -> Option<f64> + Send + Sync>,
    ) -> StepFunctionCounter {
        StepFunctionCounter {
            id,
            observe,
            last: AtomicU64::new(0f64.to_bits()),
            value: StepDouble::sum(clock, step),
        }
    }

    pub fn id(&self) -> &Id { &self.id }

    /// The amount the observed total moved during the last completed step.
    pub fn count(&self) -> f64 {
        self.accumulate();
        self.value.poll()
    }

    fn accumulate(&self) {
        let current = match (self.observe)() {
            Some(current) if !current.is_nan() => current,
            _ => return,
        };

        let last = swap_f64(&self.last, current);
        let delta = current - last;
        if delta > 0.0 {
            self.value.add_pending(delta);
        }
    }

    pub(crate) fn roll(&self) {
        self.accumulate();
        self.value.roll();
    }

    pub(crate) fn closing_roll(&self) {
        self.accumulate();
        self.value.closing_roll();
    }
}

#[cfg(test)]
mod tests {
    use super::{StepCounter, StepFunctionCounter};
    use crate::{
        clock::MockClock,
        data::Id,
    };
    use std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    const STEP: Duration = Duration::from_secs(10);

    #[test]
    fn test_counter_rollover() {
        let clock = Arc::new(MockClock::new());
        let counter = StepCounter::new(Id::new("events"), clock.clone(), STEP);

        counter.increment();
        counter.increment_by(4.0);
        for _ in 0..10 {
            assert_eq!(counter.count(), 0.0);
        }

        clock.add(STEP);
        for _ in 0..10 {
            assert_eq!(counter.count(), 5.0);
        }

        clock.add(STEP);
        assert_eq!(counter.count(), 0.0);
    }

    #[test]
    fn test_counter_rejects_invalid_amounts() {
        let clock = Arc::new(MockClock::new());
        let counter = StepCounter::new(Id::new("events"), clock.clone(), STEP);

        counter.increment_by(2.0);
        counter.increment_by(-1.0);
        counter.increment_by(std::f64::NAN);

        clock.add(STEP);
        assert_eq!(counter.count(), 2.0);
    }

    #[test]
    fn test_counter_concurrent_increments() {
        let clock = Arc::new(MockClock::new());
        let counter = Arc::new(StepCounter::new(Id::new("events"), clock.clone(), STEP));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        counter.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        clock.add(STEP);
        assert_eq!(counter.count(), 80_000.0);
    }

    #[test]
    fn test_counter_rollover_under_contention() {
        let clock = Arc::new(MockClock::new());
        let counter = Arc::new(StepCounter::new(Id::new("events"), clock.clone(), STEP));

        let recorders: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        counter.increment();
                    }
                })
            })
            .collect();

        // Each step is read once, right after its boundary, while the recorders keep going.
        let mut observed = 0.0;
        for _ in 0..50 {
            clock.add(STEP);
            observed += counter.count();
            thread::yield_now();
        }
        for handle in recorders {
            handle.join().unwrap();
        }

        clock.add(STEP);
        observed += counter.count();
        assert_eq!(observed, 80_000.0);
    }

    #[test]
    fn test_function_counter_deltas() {
        let clock = Arc::new(MockClock::new());
        let source = Arc::new(AtomicU64::new(0));
        let weak = Arc::downgrade(&source);
        let counter = StepFunctionCounter::new(
            Id::new("bytes.read"),
            clock.clone(),
            STEP,
            Box::new(move || weak.upgrade().map(|s| s.load(Ordering::Relaxed) as f64)),
        );

        source.store(10, Ordering::Relaxed);
        assert_eq!(counter.count(), 0.0);

        clock.add(STEP);
        assert_eq!(counter.count(), 10.0);

        source.store(25, Ordering::Relaxed);
        clock.add(STEP);
        assert_eq!(counter.count(), 15.0);

        // The observed object goes away: nothing more accumulates.
        source.store(100, Ordering::Relaxed);
        drop(source);
        clock.add(STEP);
        assert_eq!(counter.count(), 0.0);
    }
}
