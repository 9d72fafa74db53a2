use crate::{
    clock::Clock,
    helper::{atomic_add_f64, atomic_max_f64, load_f64, swap_f64},
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

// Marks a value whose final step has been rolled on close.
const CLOSED: u64 = u64::max_value();
// Held in `last_step` while one thread moves the live value into the previous slot.
const ROLLING: u64 = u64::max_value() - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Aggregation {
    Sum,
    Max,
}

/// A step-aligned accumulator.
///
/// Recordings land in a live value.  When the clock crosses into a new step, the first caller
/// to notice claims the rollover, moves the live value into the previous slot and zeroes the
/// live value.  Readers only ever see the previous slot, so a reading is stable for the whole
/// step.
///
/// While a rollover is underway, every other caller waits for it, so a read never returns the
/// slot from two steps back.  A recording that races with the rollover may be counted in either
/// step, but it is counted exactly once.  If more than one step passes without any activity, the
/// previous slot reads zero: nothing was recorded during the step that just completed.
pub(crate) struct StepDouble {
    clock: Arc<dyn Clock>,
    step_millis: u64,
    aggregation: Aggregation,
    last_step: AtomicU64,
    current: AtomicU64,
    previous: AtomicU64,
}

impl StepDouble {
    /// A value that reports the sum of everything recorded in the previous step.
    pub(crate) fn sum(clock: Arc<dyn Clock>, step: Duration) -> StepDouble {
        StepDouble::new(clock, step, Aggregation::Sum)
    }

    /// A value that reports the largest recording of the previous step.
    pub(crate) fn max(clock: Arc<dyn Clock>, step: Duration) -> StepDouble {
        StepDouble::new(clock, step, Aggregation::Max)
    }

    fn new(clock: Arc<dyn Clock>, step: Duration, aggregation: Aggregation) -> StepDouble {
        let step_millis = (step.as_millis() as u64).max(1);
        let last_step = clock.wall_time() / step_millis;
        StepDouble {
            clock,
            step_millis,
            aggregation,
            last_step: AtomicU64::new(last_step),
            current: AtomicU64::new(0f64.to_bits()),
            previous: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub(crate) fn record(&self, value: f64) {
        self.roll();
        self.add_pending(value);
    }

    /// Adds to the live value without checking for a step boundary first.
    ///
    /// Observed deltas are pulled just before a rollover, so they belong to the step that is
    /// about to complete rather than the one that follows.
    pub(crate) fn add_pending(&self, value: f64) {
        match self.aggregation {
            Aggregation::Sum => atomic_add_f64(&self.current, value),
            Aggregation::Max => atomic_max_f64(&self.current, value),
        }
    }

    /// The value of the last completed step.
    pub(crate) fn poll(&self) -> f64 {
        self.roll();
        load_f64(&self.previous)
    }

    /// Rolls over if the clock has moved into a later step.
    pub(crate) fn roll(&self) {
        loop {
            let last = match self.last_step.load(Ordering::Acquire) {
                CLOSED => return,
                ROLLING => {
                    thread::yield_now();
                    continue;
                },
                last => last,
            };

            let now = self.clock.wall_time() / self.step_millis;
            if now <= last {
                return;
            }

            if self
                .last_step
                .compare_exchange(last, ROLLING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let completed = swap_f64(&self.current, 0.0);
                let previous = if now - last > 1 { 0.0 } else { completed };
                self.previous.store(previous.to_bits(), Ordering::Release);
                self.last_step.store(now, Ordering::Release);
                return;
            }
        }
    }

    /// Moves whatever is live into the previous slot, regardless of the step boundary, and stops
    /// any further rollover.
    ///
    /// Used when the owning registry closes, so a partially complete step is still published.
    pub(crate) fn closing_roll(&self) {
        self.roll();
        loop {
            match self.last_step.load(Ordering::Acquire) {
                CLOSED => return,
                ROLLING => thread::yield_now(),
                last => {
                    if self
                        .last_step
                        .compare_exchange(last, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let partial = swap_f64(&self.current, 0.0);
                        self.previous.store(partial.to_bits(), Ordering::Release);
                        return;
                    }
                },
            }
        }
    }
}
