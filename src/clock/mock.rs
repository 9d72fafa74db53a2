use crate::{clock::Clock, helper::duration_as_nanos};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// A manually-advanced clock for deterministic tests.
///
/// Both wall and monotonic time start at one unit and only move when [`MockClock::add`] is
/// called, which advances them together.
pub struct MockClock {
    wall: AtomicU64,
    monotonic: AtomicU64,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            wall: AtomicU64::new(1),
            monotonic: AtomicU64::new(1),
        }
    }

    /// Advances both time sources by `amount`.
    pub fn add(&self, amount: Duration) {
        self.monotonic.fetch_add(duration_as_nanos(amount), Ordering::AcqRel);
        self.wall.fetch_add(amount.as_millis() as u64, Ordering::AcqRel);
    }

    pub fn add_seconds(&self, seconds: u64) { self.add(Duration::from_secs(seconds)) }
}

impl Default for MockClock {
    fn default() -> Self { Self::new() }
}

impl Clock for MockClock {
    fn wall_time(&self) -> u64 { self.wall.load(Ordering::Acquire) }

    fn monotonic_time(&self) -> u64 { self.monotonic.load(Ordering::Acquire) }
}
