//! Statistics records
//!
//! Every measurement a core produces ends up in one of the record types here:
//!
//! - [`CoreStat`]: one core's result for one I/O test case
//! - [`AggregateStat`]: the group view of all cores' `CoreStat`s for a test case
//! - [`DeviceStat`]: device I/O counted in cluster units
//! - [`IpcStat`]: latencies of calls into the storage service process
//!
//! Records are plain values. Once a core finalizes one it is moved onto a
//! channel by [`publisher::StatPublisher`] and never touched by the core again;
//! [`aggregator::Aggregator`] reassembles them by `(sequence, core_id)`.
//!
//! Latencies are kept in ticks of [`crate::util::fast_time`] and only converted
//! to microseconds for reporting.
//!
//! # Example
//!
//! ```
//! use fsperf::stats::{AggregateStat, CoreStat, LatencyAccumulator};
//! use std::time::Duration;
//!
//! let mut latency = LatencyAccumulator::new();
//! latency.record(4096, 1_000);
//! latency.record(4096, 3_000);
//!
//! let core = CoreStat::from_latency(&latency, Duration::from_secs(1));
//! assert_eq!(core.io_count, 2);
//! assert_eq!(core.total_bytes, 8192);
//!
//! let group = AggregateStat::from_cores(0, &[core, core]);
//! assert_eq!(group.stat.io_count, 4);
//! ```

pub mod aggregator;
pub mod publisher;

use crate::util::fast_time::ticks_to_micros;
use crate::util::time::{calculate_bandwidth_mb, calculate_iops, cpu_percent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cluster size used for device accounting
pub const CLUSTER_SIZE: u64 = 4096;

/// Cache-line aligned atomic counter
///
/// Device counters are bumped from the I/O path of whichever queue is active
/// and read by the publisher at the end of the run. Each counter gets its own
/// 64-byte line so the read and write counters never share one.
///
/// ```text
/// [value: 8 bytes][padding: 56 bytes] = 64 bytes total
/// ```
#[repr(align(64))]
#[derive(Debug)]
pub struct AlignedCounter {
    value: AtomicU64,
    _padding: [u8; 56],
}

impl AlignedCounter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; 56],
        }
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, val: u64) {
        self.value.store(val, Ordering::Relaxed);
    }
}

impl Default for AlignedCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Running latency and byte totals of one queue
///
/// `min_ticks` is `u64::MAX` until the first sample so an idle accumulator
/// is distinguishable from one that only saw very fast completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyAccumulator {
    pub count: u64,
    pub bytes: u64,
    pub total_ticks: u64,
    pub min_ticks: u64,
    pub max_ticks: u64,
}

impl LatencyAccumulator {
    pub fn new() -> Self {
        Self {
            count: 0,
            bytes: 0,
            total_ticks: 0,
            min_ticks: u64::MAX,
            max_ticks: 0,
        }
    }

    /// Account one completed request
    #[inline]
    pub fn record(&mut self, bytes: u64, ticks: u64) {
        self.count += 1;
        self.bytes += bytes;
        self.total_ticks += ticks;
        self.min_ticks = self.min_ticks.min(ticks);
        self.max_ticks = self.max_ticks.max(ticks);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for LatencyAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one core for one I/O test case
///
/// `latency_min_ticks` is 0 when no request completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreStat {
    pub execution: Duration,
    pub io_count: u64,
    pub latency_total_ticks: u64,
    pub latency_min_ticks: u64,
    pub latency_max_ticks: u64,
    pub total_bytes: u64,
    pub user_time: Duration,
    pub system_time: Duration,
}

impl CoreStat {
    /// Finalize the counters of a run (CPU times are filled in by the caller)
    pub fn from_latency(latency: &LatencyAccumulator, execution: Duration) -> Self {
        Self {
            execution,
            io_count: latency.count,
            latency_total_ticks: latency.total_ticks,
            latency_min_ticks: if latency.is_empty() { 0 } else { latency.min_ticks },
            latency_max_ticks: latency.max_ticks,
            total_bytes: latency.bytes,
            user_time: Duration::ZERO,
            system_time: Duration::ZERO,
        }
    }

    pub fn iops(&self) -> f64 {
        calculate_iops(self.io_count, self.execution)
    }

    /// IOPS in units of 1024 operations
    pub fn kiops(&self) -> f64 {
        self.iops() / 1024.0
    }

    pub fn bandwidth_mb(&self) -> f64 {
        calculate_bandwidth_mb(self.total_bytes, self.execution)
    }

    pub fn avg_latency_us(&self) -> f64 {
        if self.io_count == 0 {
            return 0.0;
        }
        ticks_to_micros(self.latency_total_ticks) / self.io_count as f64
    }

    pub fn min_latency_us(&self) -> f64 {
        ticks_to_micros(self.latency_min_ticks)
    }

    pub fn max_latency_us(&self) -> f64 {
        ticks_to_micros(self.latency_max_ticks)
    }

    pub fn user_cpu_percent(&self) -> f64 {
        cpu_percent(self.user_time, self.execution)
    }

    pub fn system_cpu_percent(&self) -> f64 {
        cpu_percent(self.system_time, self.execution)
    }
}

/// Group view of one test case
///
/// Counts, bytes, latency totals and CPU times are sums over cores; the
/// minimum latency is the smallest per-core minimum among cores that did any
/// I/O, the maximum the largest per-core maximum, and `execution` is the mean
/// of the per-core execution times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStat {
    pub sequence: usize,
    pub cores: usize,
    pub stat: CoreStat,
}

impl AggregateStat {
    pub fn from_cores(sequence: usize, cores: &[CoreStat]) -> Self {
        let mut sum = CoreStat::default();
        let mut min = u64::MAX;
        let mut total_exec = Duration::ZERO;

        for core in cores {
            sum.io_count += core.io_count;
            sum.total_bytes += core.total_bytes;
            sum.latency_total_ticks += core.latency_total_ticks;
            sum.latency_max_ticks = sum.latency_max_ticks.max(core.latency_max_ticks);
            sum.user_time += core.user_time;
            sum.system_time += core.system_time;
            if core.io_count > 0 {
                min = min.min(core.latency_min_ticks);
            }
            total_exec += core.execution;
        }

        sum.latency_min_ticks = if min == u64::MAX { 0 } else { min };
        if !cores.is_empty() {
            sum.execution = total_exec / cores.len() as u32;
        }

        Self {
            sequence,
            cores: cores.len(),
            stat: sum,
        }
    }
}

/// Device I/O in cluster units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStat {
    pub total_io_count: u64,
    pub read_io_count: u64,
    pub write_io_count: u64,
}

impl DeviceStat {
    pub fn add(&mut self, other: &DeviceStat) {
        self.total_io_count += other.total_io_count;
        self.read_io_count += other.read_io_count;
        self.write_io_count += other.write_io_count;
    }

    pub fn total_mb(&self) -> f64 {
        clusters_to_mb(self.total_io_count)
    }

    pub fn read_mb(&self) -> f64 {
        clusters_to_mb(self.read_io_count)
    }

    pub fn write_mb(&self) -> f64 {
        clusters_to_mb(self.write_io_count)
    }
}

fn clusters_to_mb(clusters: u64) -> f64 {
    (clusters * CLUSTER_SIZE) as f64 / crate::util::time::MB as f64
}

/// Storage service call types whose latency is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcKind {
    ContainerAlloc,
    ContainerFree,
    BufferAlloc,
    BufferFree,
}

impl IpcKind {
    pub const ALL: [IpcKind; 4] = [
        IpcKind::ContainerAlloc,
        IpcKind::ContainerFree,
        IpcKind::BufferAlloc,
        IpcKind::BufferFree,
    ];

    pub fn label(self) -> &'static str {
        match self {
            IpcKind::ContainerAlloc => "Container Alloc",
            IpcKind::ContainerFree => "Container Free",
            IpcKind::BufferAlloc => "BUFFER Alloc",
            IpcKind::BufferFree => "BUFFER Free",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Accumulated latency per [`IpcKind`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcStat {
    pub total_ticks: [u64; 4],
    pub total_count: [u64; 4],
}

impl IpcStat {
    pub fn record(&mut self, kind: IpcKind, ticks: u64) {
        self.total_ticks[kind.index()] += ticks;
        self.total_count[kind.index()] += 1;
    }

    pub fn add(&mut self, other: &IpcStat) {
        for i in 0..4 {
            self.total_ticks[i] += other.total_ticks[i];
            self.total_count[i] += other.total_count[i];
        }
    }

    /// Mean latency in microseconds, `None` if the call never happened
    pub fn avg_latency_us(&self, kind: IpcKind) -> Option<f64> {
        let count = self.total_count[kind.index()];
        (count > 0).then(|| ticks_to_micros(self.total_ticks[kind.index()]) / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(io_count: u64, min: u64, max: u64, exec_ms: u64) -> CoreStat {
        CoreStat {
            execution: Duration::from_millis(exec_ms),
            io_count,
            latency_total_ticks: io_count * (min + max) / 2,
            latency_min_ticks: min,
            latency_max_ticks: max,
            total_bytes: io_count * 4096,
            ..Default::default()
        }
    }

    #[test]
    fn test_aligned_counter() {
        let counter = AlignedCounter::new();
        counter.add(5);
        counter.add(3);
        assert_eq!(counter.get(), 8);
        counter.set(1);
        assert_eq!(counter.get(), 1);
        assert_eq!(std::mem::align_of::<AlignedCounter>(), 64);
        assert_eq!(std::mem::size_of::<AlignedCounter>(), 64);
    }

    #[test]
    fn test_latency_accumulator() {
        let mut acc = LatencyAccumulator::new();
        assert!(acc.is_empty());

        acc.record(4096, 300);
        acc.record(4096, 100);
        acc.record(2048, 200);

        assert_eq!(acc.count, 3);
        assert_eq!(acc.bytes, 10240);
        assert_eq!(acc.total_ticks, 600);
        assert_eq!(acc.min_ticks, 100);
        assert_eq!(acc.max_ticks, 300);
    }

    #[test]
    fn test_core_stat_from_empty_latency() {
        let stat = CoreStat::from_latency(&LatencyAccumulator::new(), Duration::from_secs(1));
        assert_eq!(stat.io_count, 0);
        assert_eq!(stat.latency_min_ticks, 0);
        assert_eq!(stat.avg_latency_us(), 0.0);
        assert_eq!(stat.iops(), 0.0);
    }

    #[test]
    fn test_core_stat_rates() {
        let mut stat = core(2048, 1_000, 5_000, 2_000);
        stat.user_time = Duration::from_millis(500);

        assert!((stat.iops() - 1024.0).abs() < 1e-9);
        assert!((stat.kiops() - 1.0).abs() < 1e-9);
        assert!((stat.bandwidth_mb() - 4.0).abs() < 1e-9);
        assert!((stat.avg_latency_us() - 3.0).abs() < 1e-9);
        assert!((stat.min_latency_us() - 1.0).abs() < 1e-9);
        assert!((stat.user_cpu_percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_min_of_mins_max_of_maxes() {
        let cores = [core(10, 400, 900, 1_000), core(30, 250, 1_200, 3_000), core(20, 300, 700, 2_000)];
        let group = AggregateStat::from_cores(4, &cores);

        assert_eq!(group.sequence, 4);
        assert_eq!(group.cores, 3);
        assert_eq!(group.stat.io_count, 60);
        assert_eq!(group.stat.total_bytes, 60 * 4096);
        assert_eq!(group.stat.latency_min_ticks, 250);
        assert_eq!(group.stat.latency_max_ticks, 1_200);
        assert_eq!(group.stat.execution, Duration::from_secs(2));
    }

    #[test]
    fn test_aggregate_ignores_idle_core_minimum() {
        let cores = [core(0, 0, 0, 1_000), core(5, 700, 800, 1_000)];
        let group = AggregateStat::from_cores(0, &cores);
        assert_eq!(group.stat.latency_min_ticks, 700);
    }

    #[test]
    fn test_device_stat_amounts() {
        let mut sum = DeviceStat::default();
        sum.add(&DeviceStat {
            total_io_count: 256,
            read_io_count: 0,
            write_io_count: 256,
        });
        sum.add(&DeviceStat {
            total_io_count: 256,
            read_io_count: 256,
            write_io_count: 0,
        });
        assert!((sum.total_mb() - 2.0).abs() < 1e-9);
        assert!((sum.read_mb() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ipc_stat_average() {
        let mut stat = IpcStat::default();
        stat.record(IpcKind::BufferAlloc, 2_000);
        stat.record(IpcKind::BufferAlloc, 4_000);

        assert!((stat.avg_latency_us(IpcKind::BufferAlloc).unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(stat.avg_latency_us(IpcKind::ContainerFree), None);

        let mut sum = IpcStat::default();
        sum.add(&stat);
        sum.add(&stat);
        assert_eq!(sum.total_count[IpcKind::BufferAlloc as usize], 4);
    }
}
