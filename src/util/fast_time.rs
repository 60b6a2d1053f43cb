//! Monotonic tick counter for latency accounting
//!
//! Latencies are accumulated as raw ticks and only converted to seconds or
//! microseconds at report time, dividing by [`TICKS_HZ`]. The tick source is
//! `clock_gettime(CLOCK_MONOTONIC)` read directly through libc, which keeps
//! the per-request cost at a couple of tens of nanoseconds.

use std::time::Duration;

/// Tick frequency of [`FastInstant::ticks`] (nanosecond ticks)
pub const TICKS_HZ: u64 = 1_000_000_000;

/// Monotonic timestamp with nanosecond resolution
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FastInstant {
    nanos: u64,
}

impl FastInstant {
    #[inline(always)]
    pub fn now() -> Self {
        Self {
            nanos: read_clock(libc::CLOCK_MONOTONIC),
        }
    }

    /// Coarse clock (~1ms resolution), good enough for runtime budget checks
    #[inline(always)]
    pub fn now_coarse() -> Self {
        Self {
            nanos: read_clock(libc::CLOCK_MONOTONIC_COARSE),
        }
    }

    /// Raw tick value
    #[inline(always)]
    pub fn ticks(&self) -> u64 {
        self.nanos
    }

    /// Ticks elapsed since `earlier`, zero if `earlier` is later
    #[inline(always)]
    pub fn ticks_since(&self, earlier: FastInstant) -> u64 {
        self.nanos.saturating_sub(earlier.nanos)
    }

    #[inline(always)]
    pub fn duration_since(&self, earlier: FastInstant) -> Duration {
        ticks_to_duration(self.ticks_since(earlier))
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        Self::now().duration_since(*self)
    }
}

#[inline(always)]
fn read_clock(clock: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    // clock_gettime cannot fail for the monotonic clocks with a valid pointer
    unsafe {
        libc::clock_gettime(clock, &mut ts);
    }

    (ts.tv_sec as u64) * TICKS_HZ + (ts.tv_nsec as u64)
}

pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos(ticks.saturating_mul(1_000_000_000 / TICKS_HZ))
}

pub fn ticks_to_micros(ticks: u64) -> f64 {
    ticks as f64 * 1_000_000.0 / TICKS_HZ as f64
}
