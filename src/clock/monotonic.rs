use crate::clock::Clock;
use std::time::{SystemTime, UNIX_EPOCH};

/// The operating system clock.
///
/// Wall time comes from [`SystemTime`]; monotonic time is read directly from the platform's
/// monotonic counter.
#[derive(Clone, Debug)]
pub struct SystemClock {
    #[cfg(windows)]
    frequency: u64,
}

impl SystemClock {
    #[cfg(not(windows))]
    pub fn new() -> Self { SystemClock {} }

    #[cfg(windows)]
    pub fn new() -> Self {
        use winapi::um::{profileapi::QueryPerformanceFrequency, winnt::LARGE_INTEGER};

        let frequency = unsafe {
            let mut frequency: LARGE_INTEGER = std::mem::zeroed();
            QueryPerformanceFrequency(&mut frequency);
            *frequency.QuadPart() as u64
        };

        SystemClock {
            frequency: frequency.max(1),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self { Self::new() }
}

impl Clock for SystemClock {
    fn wall_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    #[cfg(not(windows))]
    fn monotonic_time(&self) -> u64 {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64 * 1_000_000_000) + ts.tv_nsec as u64
    }

    #[cfg(windows)]
    fn monotonic_time(&self) -> u64 {
        use winapi::um::{profileapi::QueryPerformanceCounter, winnt::LARGE_INTEGER};

        let raw = unsafe {
            let mut count: LARGE_INTEGER = std::mem::zeroed();
            QueryPerformanceCounter(&mut count);
            *count.QuadPart() as u64
        };
        ((u128::from(raw) * 1_000_000_000) / u128::from(self.frequency)) as u64
    }
}
