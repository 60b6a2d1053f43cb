//! Per-thread resource usage
//!
//! Workers sample `getrusage(RUSAGE_THREAD)` before and after a test case and
//! publish the difference, so each core's CPU time is its own and not the
//! whole process's.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Result;

/// Resource usage counters of one thread (or a difference / sum of them)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU time in user mode
    pub user_time: Duration,
    /// CPU time in kernel mode
    pub system_time: Duration,
    /// Peak resident set size in KiB (not differenced)
    pub max_rss_kb: u64,
    pub minor_faults: u64,
    pub major_faults: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub blocks_in: u64,
    pub blocks_out: u64,
}

impl ResourceUsage {
    /// Sample the calling thread's usage
    #[cfg(target_os = "linux")]
    pub fn thread() -> Result<Self> {
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::getrusage(libc::RUSAGE_THREAD, &mut usage) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            return Err(err).context("getrusage(RUSAGE_THREAD) failed");
        }
        Ok(Self::from_rusage(&usage))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn thread() -> Result<Self> {
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            return Err(err).context("getrusage(RUSAGE_SELF) failed");
        }
        Ok(Self::from_rusage(&usage))
    }

    fn from_rusage(usage: &libc::rusage) -> Self {
        Self {
            user_time: timeval_to_duration(&usage.ru_utime),
            system_time: timeval_to_duration(&usage.ru_stime),
            max_rss_kb: usage.ru_maxrss.max(0) as u64,
            minor_faults: usage.ru_minflt.max(0) as u64,
            major_faults: usage.ru_majflt.max(0) as u64,
            voluntary_switches: usage.ru_nvcsw.max(0) as u64,
            involuntary_switches: usage.ru_nivcsw.max(0) as u64,
            blocks_in: usage.ru_inblock.max(0) as u64,
            blocks_out: usage.ru_oublock.max(0) as u64,
        }
    }

    /// Usage accumulated between `earlier` and `self`
    pub fn since(&self, earlier: &ResourceUsage) -> ResourceUsage {
        ResourceUsage {
            user_time: self.user_time.saturating_sub(earlier.user_time),
            system_time: self.system_time.saturating_sub(earlier.system_time),
            max_rss_kb: self.max_rss_kb,
            minor_faults: self.minor_faults.saturating_sub(earlier.minor_faults),
            major_faults: self.major_faults.saturating_sub(earlier.major_faults),
            voluntary_switches: self.voluntary_switches.saturating_sub(earlier.voluntary_switches),
            involuntary_switches: self
                .involuntary_switches
                .saturating_sub(earlier.involuntary_switches),
            blocks_in: self.blocks_in.saturating_sub(earlier.blocks_in),
            blocks_out: self.blocks_out.saturating_sub(earlier.blocks_out),
        }
    }

    /// Accumulate another sample (peak RSS keeps the maximum)
    pub fn add(&mut self, other: &ResourceUsage) {
        self.user_time += other.user_time;
        self.system_time += other.system_time;
        self.max_rss_kb = self.max_rss_kb.max(other.max_rss_kb);
        self.minor_faults += other.minor_faults;
        self.major_faults += other.major_faults;
        self.voluntary_switches += other.voluntary_switches;
        self.involuntary_switches += other.involuntary_switches;
        self.blocks_in += other.blocks_in;
        self.blocks_out += other.blocks_out;
    }
}

fn timeval_to_duration(tv: &libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_usage_is_monotonic() {
        let before = ResourceUsage::thread().unwrap();

        // Burn a little CPU so user time can move
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        assert_ne!(acc, 1);

        let after = ResourceUsage::thread().unwrap();
        assert!(after.user_time >= before.user_time);
        assert!(after.system_time >= before.system_time);
    }

    #[test]
    fn test_since_saturates() {
        let earlier = ResourceUsage {
            user_time: Duration::from_secs(2),
            minor_faults: 10,
            ..Default::default()
        };
        let later = ResourceUsage {
            user_time: Duration::from_secs(3),
            minor_faults: 4,
            max_rss_kb: 512,
            ..Default::default()
        };

        let diff = later.since(&earlier);
        assert_eq!(diff.user_time, Duration::from_secs(1));
        assert_eq!(diff.minor_faults, 0);
        assert_eq!(diff.max_rss_kb, 512);
    }

    #[test]
    fn test_add_keeps_peak_rss() {
        let mut sum = ResourceUsage::default();
        sum.add(&ResourceUsage {
            system_time: Duration::from_millis(5),
            max_rss_kb: 100,
            ..Default::default()
        });
        sum.add(&ResourceUsage {
            system_time: Duration::from_millis(7),
            max_rss_kb: 80,
            ..Default::default()
        });

        assert_eq!(sum.system_time, Duration::from_millis(12));
        assert_eq!(sum.max_rss_kb, 100);
    }
}
