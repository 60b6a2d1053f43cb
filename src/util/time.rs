//! Rate and unit helpers used by the reports
//!
//! All bandwidth figures in fsperf are binary megabytes (1 MB = 1024 × 1024
//! bytes), matching the storage engine's own accounting.

use std::time::Duration;

/// Bytes per reported megabyte
pub const MB: u64 = 1024 * 1024;

/// Operations per second over `duration`; zero for an empty interval
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fsperf::util::time::calculate_iops;
///
/// assert_eq!(calculate_iops(1000, Duration::from_secs(2)), 500.0);
/// assert_eq!(calculate_iops(10, Duration::ZERO), 0.0);
/// ```
pub fn calculate_iops(operations: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        operations as f64 / secs
    } else {
        0.0
    }
}

/// Megabytes per second over `duration`; zero for an empty interval
pub fn calculate_bandwidth_mb(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / MB as f64 / secs
    } else {
        0.0
    }
}

/// CPU time as a percentage of wall-clock execution time
pub fn cpu_percent(cpu: Duration, execution: Duration) -> f64 {
    let secs = execution.as_secs_f64();
    if secs > 0.0 {
        cpu.as_secs_f64() / secs * 100.0
    } else {
        0.0
    }
}

/// Whole megabytes in `bytes`, rounded down
pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / MB
}

/// Format a duration in human-readable form
///
/// ```
/// use std::time::Duration;
/// use fsperf::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos < 1_000 {
        format!("{}ns", nanos)
    } else if nanos < 1_000_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
