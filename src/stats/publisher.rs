//! Stat channels between workers and the aggregator
//!
//! Each statistic category has its own bounded channel. A [`StatBus`] is sized
//! for one run (`num_cores` workers, `num_tc` test cases) so that every
//! channel can hold every record its category will ever receive; publishing
//! therefore never waits on the aggregator, which only starts reading after
//! the workers are done.
//!
//! Workers get a [`StatPublisher`] each. The aggregator takes the receiving
//! ends with [`StatBus::into_receivers`], which also drops the bus's own
//! senders: once the last publisher is gone, a receive on an empty channel
//! fails instead of waiting forever.
//!
//! ```
//! use fsperf::stats::publisher::StatBus;
//! use fsperf::stats::CoreStat;
//!
//! let bus = StatBus::new(2, 1);
//! bus.publisher(1).publish_io(0, CoreStat::default()).unwrap();
//! bus.publisher(0).publish_io(0, CoreStat::default()).unwrap();
//!
//! let receivers = bus.into_receivers();
//! assert_eq!(receivers.io.len(), 2);
//! ```

use super::{CoreStat, DeviceStat, IpcStat};
use crate::util::resource::ResourceUsage;
use crate::Result;
use anyhow::Context;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// Statistic categories, one channel each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatCategory {
    /// Per test case I/O results
    Io,
    /// Per test case regression timing
    Regression,
    /// Device counters, once per core
    Device,
    /// Storage service call latencies, once per core
    Ipc,
    /// CPU usage, once per core
    Rusage,
}

impl StatCategory {
    /// Records of this category one core publishes over a run of `num_tc` cases
    pub fn records_per_core(self, num_tc: usize) -> usize {
        match self {
            StatCategory::Io | StatCategory::Regression => num_tc,
            StatCategory::Device | StatCategory::Ipc | StatCategory::Rusage => 1,
        }
    }
}

/// A record addressed by `(sequence, core_id)`
///
/// Per-run categories always use sequence 0.
pub trait Keyed {
    fn key(&self) -> (usize, usize);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoRecord {
    pub sequence: usize,
    pub core_id: usize,
    pub stat: CoreStat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionRecord {
    pub sequence: usize,
    pub core_id: usize,
    pub total_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceRecord {
    pub core_id: usize,
    pub stat: DeviceStat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IpcRecord {
    pub core_id: usize,
    pub stat: IpcStat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RusageRecord {
    pub core_id: usize,
    pub usage: ResourceUsage,
}

impl Keyed for IoRecord {
    fn key(&self) -> (usize, usize) {
        (self.sequence, self.core_id)
    }
}

impl Keyed for RegressionRecord {
    fn key(&self) -> (usize, usize) {
        (self.sequence, self.core_id)
    }
}

impl Keyed for DeviceRecord {
    fn key(&self) -> (usize, usize) {
        (0, self.core_id)
    }
}

impl Keyed for IpcRecord {
    fn key(&self) -> (usize, usize) {
        (0, self.core_id)
    }
}

impl Keyed for RusageRecord {
    fn key(&self) -> (usize, usize) {
        (0, self.core_id)
    }
}

#[derive(Clone)]
struct Senders {
    io: Sender<IoRecord>,
    regression: Sender<RegressionRecord>,
    device: Sender<DeviceRecord>,
    ipc: Sender<IpcRecord>,
    rusage: Sender<RusageRecord>,
}

/// Receiving ends, one per category
pub struct StatReceivers {
    pub io: Receiver<IoRecord>,
    pub regression: Receiver<RegressionRecord>,
    pub device: Receiver<DeviceRecord>,
    pub ipc: Receiver<IpcRecord>,
    pub rusage: Receiver<RusageRecord>,
}

/// All stat channels of one run
pub struct StatBus {
    num_cores: usize,
    num_tc: usize,
    senders: Senders,
    receivers: StatReceivers,
}

impl StatBus {
    pub fn new(num_cores: usize, num_tc: usize) -> Self {
        let capacity = |category: StatCategory| (num_cores * category.records_per_core(num_tc)).max(1);

        let (io_tx, io_rx) = bounded(capacity(StatCategory::Io));
        let (regression_tx, regression_rx) = bounded(capacity(StatCategory::Regression));
        let (device_tx, device_rx) = bounded(capacity(StatCategory::Device));
        let (ipc_tx, ipc_rx) = bounded(capacity(StatCategory::Ipc));
        let (rusage_tx, rusage_rx) = bounded(capacity(StatCategory::Rusage));

        Self {
            num_cores,
            num_tc,
            senders: Senders {
                io: io_tx,
                regression: regression_tx,
                device: device_tx,
                ipc: ipc_tx,
                rusage: rusage_tx,
            },
            receivers: StatReceivers {
                io: io_rx,
                regression: regression_rx,
                device: device_rx,
                ipc: ipc_rx,
                rusage: rusage_rx,
            },
        }
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn num_tc(&self) -> usize {
        self.num_tc
    }

    /// Publishing handle for one core
    pub fn publisher(&self, core_id: usize) -> StatPublisher {
        StatPublisher {
            core_id,
            senders: self.senders.clone(),
        }
    }

    /// Hand the receiving ends to the aggregator
    pub fn into_receivers(self) -> StatReceivers {
        self.receivers
    }
}

/// One core's publishing handle
///
/// A record is moved into the channel and the core keeps nothing of it.
pub struct StatPublisher {
    core_id: usize,
    senders: Senders,
}

impl StatPublisher {
    pub fn core_id(&self) -> usize {
        self.core_id
    }

    pub fn publish_io(&self, sequence: usize, stat: CoreStat) -> Result<()> {
        self.senders
            .io
            .send(IoRecord {
                sequence,
                core_id: self.core_id,
                stat,
            })
            .map_err(|_| anyhow::anyhow!("I/O stat channel closed"))
            .with_context(|| format!("core {} publishing test case {}", self.core_id, sequence))
    }

    pub fn publish_regression(&self, sequence: usize, total_time: Duration) -> Result<()> {
        self.senders
            .regression
            .send(RegressionRecord {
                sequence,
                core_id: self.core_id,
                total_time,
            })
            .map_err(|_| anyhow::anyhow!("regression stat channel closed"))
            .with_context(|| format!("core {} publishing test case {}", self.core_id, sequence))
    }

    pub fn publish_device(&self, stat: DeviceStat) -> Result<()> {
        self.senders
            .device
            .send(DeviceRecord {
                core_id: self.core_id,
                stat,
            })
            .map_err(|_| anyhow::anyhow!("device stat channel closed (core {})", self.core_id))
    }

    pub fn publish_ipc(&self, stat: IpcStat) -> Result<()> {
        self.senders
            .ipc
            .send(IpcRecord {
                core_id: self.core_id,
                stat,
            })
            .map_err(|_| anyhow::anyhow!("IPC stat channel closed (core {})", self.core_id))
    }

    pub fn publish_rusage(&self, usage: ResourceUsage) -> Result<()> {
        self.senders
            .rusage
            .send(RusageRecord {
                core_id: self.core_id,
                usage,
            })
            .map_err(|_| anyhow::anyhow!("rusage channel closed (core {})", self.core_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_holds_a_full_run_without_blocking() {
        let bus = StatBus::new(3, 4);
        for core in 0..3 {
            let publisher = bus.publisher(core);
            for seq in 0..4 {
                // A bounded send that did not fit would block this test forever
                publisher.publish_io(seq, CoreStat::default()).unwrap();
                publisher.publish_regression(seq, Duration::from_millis(1)).unwrap();
            }
            publisher.publish_device(DeviceStat::default()).unwrap();
            publisher.publish_ipc(IpcStat::default()).unwrap();
            publisher.publish_rusage(ResourceUsage::default()).unwrap();
        }

        let rx = bus.into_receivers();
        assert_eq!(rx.io.len(), 12);
        assert_eq!(rx.regression.len(), 12);
        assert_eq!(rx.device.len(), 3);
        assert!(rx.io.is_full());
    }

    #[test]
    fn test_records_carry_core_and_sequence() {
        let bus = StatBus::new(2, 2);
        bus.publisher(1).publish_regression(1, Duration::from_secs(2)).unwrap();

        let rx = bus.into_receivers();
        let record = rx.regression.recv().unwrap();
        assert_eq!(record.key(), (1, 1));
        assert_eq!(record.total_time, Duration::from_secs(2));
    }

    #[test]
    fn test_channel_disconnects_when_publishers_are_gone() {
        let bus = StatBus::new(1, 1);
        let publisher = bus.publisher(0);
        let rx = bus.into_receivers();

        publisher.publish_rusage(ResourceUsage::default()).unwrap();
        drop(publisher);

        assert!(rx.rusage.recv().is_ok());
        assert!(rx.rusage.recv().is_err());
    }

    #[test]
    fn test_publish_after_aggregator_gone_fails() {
        let bus = StatBus::new(1, 1);
        let publisher = bus.publisher(0);
        drop(bus.into_receivers());

        assert!(publisher.publish_io(0, CoreStat::default()).is_err());
    }

    #[test]
    fn test_records_per_core() {
        assert_eq!(StatCategory::Io.records_per_core(8), 8);
        assert_eq!(StatCategory::Regression.records_per_core(8), 8);
        assert_eq!(StatCategory::Device.records_per_core(8), 1);
    }
}
