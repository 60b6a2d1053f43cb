//! Statistics aggregation
//!
//! The [`Aggregator`] runs on one thread after every worker has finished. It
//! performs exactly the number of blocking receives it is told to expect and
//! files each record in a [`StatTable`] under its `(sequence, core_id)` key.
//! Cores finish in any order, so arrival order means nothing; only the key
//! does.
//!
//! A receive on an empty channel waits for as long as any publisher is alive.
//! Once all of them are gone an empty channel is an error, so a worker that
//! died without publishing shows up as a failed collection rather than a hang.
//!
//! # Example
//!
//! ```
//! use fsperf::stats::aggregator::Aggregator;
//! use fsperf::stats::publisher::StatBus;
//! use fsperf::stats::CoreStat;
//! use std::time::Duration;
//!
//! let bus = StatBus::new(2, 1);
//! for core in [1, 0] {
//!     let stat = CoreStat {
//!         execution: Duration::from_secs(2),
//!         io_count: 100,
//!         total_bytes: 100 * 4096,
//!         ..Default::default()
//!     };
//!     bus.publisher(core).publish_io(0, stat).unwrap();
//! }
//!
//! let aggregator = Aggregator::new(bus.into_receivers(), 2, 1);
//! let summary = aggregator.collect(2).unwrap();
//! assert_eq!(summary.groups[0].stat.io_count, 200);
//! assert_eq!(summary.groups[0].stat.iops(), 100.0);
//! ```

use super::publisher::{Keyed, StatReceivers};
use super::{AggregateStat, CoreStat, DeviceStat, IpcStat};
use crate::util::resource::ResourceUsage;
use crate::Result;
use crossbeam::channel::Receiver;
use std::time::Duration;
use tracing::{debug, warn};

/// Dense `num_tc × num_cores` table of per-core records
#[derive(Debug, Clone)]
pub struct StatTable<T> {
    num_cores: usize,
    num_tc: usize,
    cells: Vec<Option<T>>,
}

impl<T> StatTable<T> {
    pub fn new(num_cores: usize, num_tc: usize) -> Self {
        let mut cells = Vec::with_capacity(num_cores * num_tc);
        cells.resize_with(num_cores * num_tc, || None);
        Self {
            num_cores,
            num_tc,
            cells,
        }
    }

    fn index(&self, sequence: usize, core_id: usize) -> Option<usize> {
        (sequence < self.num_tc && core_id < self.num_cores).then(|| sequence * self.num_cores + core_id)
    }

    /// File `value` under its key; out-of-range and duplicate keys are errors
    pub fn insert(&mut self, sequence: usize, core_id: usize, value: T) -> Result<()> {
        let Some(idx) = self.index(sequence, core_id) else {
            anyhow::bail!(
                "record (sequence {}, core {}) outside {} test cases x {} cores",
                sequence,
                core_id,
                self.num_tc,
                self.num_cores
            );
        };
        if self.cells[idx].is_some() {
            anyhow::bail!("duplicate record for sequence {} core {}", sequence, core_id);
        }
        self.cells[idx] = Some(value);
        Ok(())
    }

    pub fn get(&self, sequence: usize, core_id: usize) -> Option<&T> {
        self.index(sequence, core_id).and_then(|idx| self.cells[idx].as_ref())
    }

    /// All cores' records for `sequence`, or `None` while any is missing
    pub fn row(&self, sequence: usize) -> Option<Vec<&T>> {
        if sequence >= self.num_tc {
            return None;
        }
        let start = sequence * self.num_cores;
        self.cells[start..start + self.num_cores].iter().map(Option::as_ref).collect()
    }

    /// Records present, in `(sequence, core_id)` order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        let num_cores = self.num_cores.max(1);
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(i, cell)| cell.as_ref().map(|v| (i / num_cores, i % num_cores, v)))
    }

    pub fn len(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn num_tc(&self) -> usize {
        self.num_tc
    }
}

/// Per-core I/O results plus the group view of every complete test case
#[derive(Debug, Clone)]
pub struct IoSummary {
    pub table: StatTable<CoreStat>,
    /// One entry per test case all cores reported, in sequence order
    pub groups: Vec<AggregateStat>,
}

/// Regression timings by test case and core
#[derive(Debug, Clone)]
pub struct RegressionSummary {
    pub table: StatTable<Duration>,
}

impl RegressionSummary {
    /// Execution times of one test case, in core order
    pub fn case_times(&self, sequence: usize) -> Vec<(usize, Duration)> {
        (0..self.table.num_cores())
            .filter_map(|core| self.table.get(sequence, core).map(|t| (core, *t)))
            .collect()
    }

    /// Mean over the cores that reported the test case
    pub fn case_average(&self, sequence: usize) -> Option<Duration> {
        let times = self.case_times(sequence);
        if times.is_empty() {
            return None;
        }
        let total: Duration = times.iter().map(|(_, t)| *t).sum();
        Some(total / times.len() as u32)
    }

    /// Sum of every recorded time divided by the number of cores
    pub fn group_execution(&self) -> Duration {
        let cores = self.table.num_cores();
        if cores == 0 {
            return Duration::ZERO;
        }
        let total: Duration = self.table.iter().map(|(_, _, t)| *t).sum();
        total / cores as u32
    }
}

/// Values that add up across cores
pub trait Summable: Copy + Default {
    fn accumulate(&mut self, other: &Self);
}

impl Summable for DeviceStat {
    fn accumulate(&mut self, other: &Self) {
        self.add(other);
    }
}

impl Summable for IpcStat {
    fn accumulate(&mut self, other: &Self) {
        self.add(other);
    }
}

impl Summable for ResourceUsage {
    fn accumulate(&mut self, other: &Self) {
        self.add(other);
    }
}

/// A once-per-core value, by core and summed
#[derive(Debug, Clone)]
pub struct CoreTotals<T> {
    pub per_core: Vec<(usize, T)>,
    pub total: T,
}

impl<T: Summable> CoreTotals<T> {
    fn from_table(table: &StatTable<T>) -> Self {
        let mut total = T::default();
        let per_core: Vec<(usize, T)> = table
            .iter()
            .map(|(_, core, value)| {
                total.accumulate(value);
                (core, *value)
            })
            .collect();
        Self { per_core, total }
    }

    pub fn cores(&self) -> usize {
        self.per_core.len()
    }
}

/// Consumer side of a [`super::publisher::StatBus`]
pub struct Aggregator {
    receivers: StatReceivers,
    num_cores: usize,
    num_tc: usize,
}

impl Aggregator {
    pub fn new(receivers: StatReceivers, num_cores: usize, num_tc: usize) -> Self {
        Self {
            receivers,
            num_cores,
            num_tc,
        }
    }

    /// Receive `expected` I/O records and summarize them
    pub fn collect(&self, expected: usize) -> Result<IoSummary> {
        let table = self.receive(&self.receivers.io, expected, self.num_tc, "I/O", |r| r.stat)?;

        let mut groups = Vec::new();
        for sequence in 0..self.num_tc {
            match table.row(sequence) {
                Some(row) => {
                    let cores: Vec<CoreStat> = row.into_iter().copied().collect();
                    groups.push(AggregateStat::from_cores(sequence, &cores));
                }
                None => warn!(sequence, "test case incomplete, no group result"),
            }
        }

        Ok(IoSummary { table, groups })
    }

    /// Receive `expected` regression timing records
    pub fn collect_regression(&self, expected: usize) -> Result<RegressionSummary> {
        let table = self.receive(
            &self.receivers.regression,
            expected,
            self.num_tc,
            "regression",
            |r| r.total_time,
        )?;
        Ok(RegressionSummary { table })
    }

    pub fn collect_device(&self, expected: usize) -> Result<CoreTotals<DeviceStat>> {
        let table = self.receive(&self.receivers.device, expected, 1, "device", |r| r.stat)?;
        Ok(CoreTotals::from_table(&table))
    }

    pub fn collect_ipc(&self, expected: usize) -> Result<CoreTotals<IpcStat>> {
        let table = self.receive(&self.receivers.ipc, expected, 1, "IPC", |r| r.stat)?;
        Ok(CoreTotals::from_table(&table))
    }

    pub fn collect_rusage(&self, expected: usize) -> Result<CoreTotals<ResourceUsage>> {
        let table = self.receive(&self.receivers.rusage, expected, 1, "rusage", |r| r.usage)?;
        Ok(CoreTotals::from_table(&table))
    }

    /// Perform `expected` blocking receives into a fresh table
    fn receive<R, T, F>(&self, rx: &Receiver<R>, expected: usize, num_tc: usize, what: &str, value: F) -> Result<StatTable<T>>
    where
        R: Keyed,
        F: Fn(&R) -> T,
    {
        let mut table = StatTable::new(self.num_cores, num_tc);
        for received in 0..expected {
            let record = rx.recv().map_err(|_| {
                anyhow::anyhow!(
                    "{} stat channel closed after {} of {} records",
                    what,
                    received,
                    expected
                )
            })?;
            let (sequence, core_id) = record.key();
            debug!(what, sequence, core_id, "stat record received");
            table.insert(sequence, core_id, value(&record))?;
        }
        Ok(table)
    }
}
