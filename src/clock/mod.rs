//! Time sources for meters and the registry scheduler.
//!
//! Every meter and every registry takes its notion of time from a [`Clock`], injected once at
//! construction.  Wall time stamps published data and decides which step a recording falls
//! into, while monotonic time drives histogram rotation and duration measurement.
use std::sync::Arc;

mod mock;
mod monotonic;

pub use self::{mock::MockClock, monotonic::SystemClock};

/// A source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn wall_time(&self) -> u64;

    /// Nanoseconds from an arbitrary, fixed origin.  Never goes backwards.
    fn monotonic_time(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn wall_time(&self) -> u64 { (**self).wall_time() }

    fn monotonic_time(&self) -> u64 { (**self).monotonic_time() }
}

impl<'a, T: Clock + ?Sized> Clock for &'a T {
    fn wall_time(&self) -> u64 { (**self).wall_time() }

    fn monotonic_time(&self) -> u64 { (**self).monotonic_time() }
}
