//! Run progress
//!
//! Progress is reported in whole percent of the work done. [`ProgressTracker`]
//! only lets a percentage through once, and only when it is above the last one
//! reported, so observers see a strictly increasing sequence no matter how
//! often they are asked.
//!
//! The console observer keeps the classic terminal format: one dot per new
//! percentage and a line with the percentage (and the running rate, for data
//! runs) every ten percent.

use crate::util::time::MB;
use std::io::Write;
use std::time::Duration;

/// One progress step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub percent: u32,
    /// Units done so far (bytes for I/O runs, items for metadata runs)
    pub done: u64,
    pub elapsed: Duration,
}

impl Progress {
    /// Running rate, treating `done` as bytes
    pub fn throughput_mb(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.done as f64 / MB as f64 / secs
        } else {
            0.0
        }
    }
}

/// Turns a running count into deduplicated percentage steps
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    last: u32,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self { total, last: 0 }
    }

    /// `Some` when `done` crosses into a percentage not reported yet
    pub fn advance(&mut self, done: u64, elapsed: Duration) -> Option<Progress> {
        if self.total == 0 {
            return None;
        }

        let percent = (done.min(self.total) as u128 * 100 / self.total as u128) as u32;
        if percent <= self.last {
            return None;
        }

        self.last = percent;
        Some(Progress {
            percent,
            done,
            elapsed,
        })
    }

    pub fn last_percent(&self) -> u32 {
        self.last
    }
}

/// Receiver of progress steps
pub trait ProgressObserver {
    fn on_progress(&mut self, progress: &Progress);
}

/// Dots and percentages on stdout
#[derive(Debug, Clone, Default)]
pub struct ConsoleProgress {
    /// Append the MB/s rate to the ten-percent lines
    pub show_rate: bool,
}

impl ConsoleProgress {
    pub fn new(show_rate: bool) -> Self {
        Self { show_rate }
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&mut self, progress: &Progress) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, ".");
        if progress.percent % 10 == 0 {
            let _ = if self.show_rate {
                writeln!(out, "{}% {:.3}MB/s", progress.percent, progress.throughput_mb())
            } else {
                writeln!(out, "{}%", progress.percent)
            };
        }
        let _ = out.flush();
    }
}

/// Discards progress (every core but the first)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn on_progress(&mut self, _progress: &Progress) {}
}

/// Keeps every step, for inspection
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    pub steps: Vec<Progress>,
}

impl ProgressObserver for ProgressLog {
    fn on_progress(&mut self, progress: &Progress) {
        self.steps.push(*progress);
    }
}
