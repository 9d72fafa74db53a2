use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

/// Whole nanoseconds in `d`, saturating at `u64::MAX` (roughly 584 years).
pub(crate) fn duration_as_nanos(d: Duration) -> u64 { u64::try_from(d.as_nanos()).unwrap_or(u64::max_value()) }

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(|e| e.into_inner()) }

/// Adds `delta` to an `f64` stored as raw bits.
pub(crate) fn atomic_add_f64(cell: &AtomicU64, delta: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Raises an `f64` stored as raw bits to at least `value`.
pub(crate) fn atomic_max_f64(cell: &AtomicU64, value: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value > f64::from_bits(current) {
        match cell.compare_exchange_weak(current, value.to_bits(), Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

pub(crate) fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Acquire))
}

pub(crate) fn swap_f64(cell: &AtomicU64, value: f64) -> f64 {
    f64::from_bits(cell.swap(value.to_bits(), Ordering::AcqRel))
}

/// Asserts that a percentile estimate lies within the default estimator precision of `expected`.
#[cfg(test)]
pub(crate) fn assert_estimate(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= expected / 16.0,
        "estimate {} is not close to {}",
        actual,
        expected
    );
}
