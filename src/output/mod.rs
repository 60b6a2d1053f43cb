//! Reports
//!
//! A run ends with one report value, built once the aggregator has
//! reassembled every record:
//!
//! - [`PerfReport`] for the benchmark tool
//! - [`RegressionReport`] for the regression suite
//!
//! [`text`] prints them to stdout; [`json`] writes them to a file when
//! `--json` is given.

pub mod json;
pub mod text;

use crate::config::{PerfConfig, RegressionConfig};
use crate::stats::aggregator::{CoreTotals, IoSummary, RegressionSummary};
use crate::stats::{DeviceStat, IpcStat};
use crate::util::resource::ResourceUsage;
use chrono::{DateTime, Local};

/// Everything the benchmark tool reports
#[derive(Debug, Clone)]
pub struct PerfReport {
    pub config: PerfConfig,
    pub started: DateTime<Local>,
    pub summary: IoSummary,
}

/// Everything the regression tool reports
#[derive(Debug, Clone)]
pub struct RegressionReport {
    pub config: RegressionConfig,
    pub started: DateTime<Local>,
    /// Case names in sequence order
    pub case_names: Vec<&'static str>,
    pub timings: RegressionSummary,
    pub device: CoreTotals<DeviceStat>,
    /// Only when the storage keeps service call latencies
    pub ipc: Option<CoreTotals<IpcStat>>,
    pub rusage: CoreTotals<ResourceUsage>,
}
