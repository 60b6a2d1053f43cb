//! JSON output formatting
//!
//! Machine-readable counterpart of the text reports. Every report carries a
//! `test_info` header (tool, host, start time and the full configuration)
//! followed by the same figures the console shows, with durations given both
//! in microseconds and in human-readable form.

use super::{PerfReport, RegressionReport};
use crate::error::HarnessError;
use crate::stats::{CoreStat, DeviceStat, IpcKind, IpcStat, CLUSTER_SIZE};
use crate::util::resource::ResourceUsage;
use crate::util::time::{format_duration, MB};
use crate::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            micros: d.as_micros() as u64,
            human: format_duration(d),
        }
    }
}

/// Report header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonTestInfo<C> {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// RFC 3339
    pub start_time: String,
    pub config: C,
}

impl<C> JsonTestInfo<C> {
    fn new(tool: &str, started: &DateTime<Local>, config: C) -> Self {
        Self {
            tool: tool.to_string(),
            hostname: local_hostname(),
            start_time: started.to_rfc3339(),
            config,
        }
    }
}

fn local_hostname() -> Option<String> {
    hostname::get().ok().and_then(|name| name.into_string().ok())
}

/// One stat block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonIoStat {
    pub name: String,
    pub execution: JsonDuration,
    pub io_count: u64,
    pub total_bytes: u64,
    pub iops: f64,
    pub kiops: f64,
    pub bandwidth_mb: f64,
    pub avg_latency_us: f64,
    pub min_latency_us: f64,
    pub max_latency_us: f64,
    pub user_cpu_percent: f64,
    pub system_cpu_percent: f64,
}

impl JsonIoStat {
    pub fn new(name: impl Into<String>, stat: &CoreStat) -> Self {
        Self {
            name: name.into(),
            execution: JsonDuration::from_duration(stat.execution),
            io_count: stat.io_count,
            total_bytes: stat.total_bytes,
            iops: stat.iops(),
            kiops: stat.kiops(),
            bandwidth_mb: stat.bandwidth_mb(),
            avg_latency_us: stat.avg_latency_us(),
            min_latency_us: stat.min_latency_us(),
            max_latency_us: stat.max_latency_us(),
            user_cpu_percent: stat.user_cpu_percent(),
            system_cpu_percent: stat.system_cpu_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPerfOutput {
    pub test_info: JsonTestInfo<crate::config::PerfConfig>,
    pub per_core: Vec<JsonIoStat>,
    pub groups: Vec<JsonIoStat>,
}

/// Build the benchmark JSON document
pub fn perf_to_json(report: &PerfReport) -> JsonPerfOutput {
    JsonPerfOutput {
        test_info: JsonTestInfo::new("fsperf", &report.started, report.config.clone()),
        per_core: report
            .summary
            .table
            .iter()
            .map(|(_, core_id, stat)| JsonIoStat::new(format!("lcore {}", core_id), stat))
            .collect(),
        groups: report
            .summary
            .groups
            .iter()
            .map(|group| JsonIoStat::new("group", &group.stat))
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCoreTime {
    pub core_id: usize,
    pub execution: JsonDuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCase {
    pub sequence: usize,
    pub name: String,
    pub per_core: Vec<JsonCoreTime>,
    pub avg_execution: JsonDuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonDevice {
    #[serde(flatten)]
    pub counts: DeviceStat,
    pub total_mb: f64,
    pub read_mb: f64,
    pub write_mb: f64,
    pub total_bandwidth_mb: f64,
    pub read_bandwidth_mb: f64,
    pub write_bandwidth_mb: f64,
}

impl JsonDevice {
    fn new(device: &DeviceStat, execution: Duration) -> Self {
        let secs = execution.as_secs_f64();
        let rate = |clusters: u64| {
            if secs > 0.0 {
                (clusters * CLUSTER_SIZE) as f64 / MB as f64 / secs
            } else {
                0.0
            }
        };

        Self {
            counts: *device,
            total_mb: device.total_mb(),
            read_mb: device.read_mb(),
            write_mb: device.write_mb(),
            total_bandwidth_mb: rate(device.total_io_count),
            read_bandwidth_mb: rate(device.read_io_count),
            write_bandwidth_mb: rate(device.write_io_count),
        }
    }
}

/// Mean latency per call type in microseconds; absent types are `null`
pub type JsonIpcLatency = BTreeMap<String, Option<f64>>;

fn ipc_latency(stat: &IpcStat) -> JsonIpcLatency {
    IpcKind::ALL
        .iter()
        .map(|&kind| (kind.label().to_string(), stat.avg_latency_us(kind)))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonIpc {
    pub per_core: BTreeMap<usize, JsonIpcLatency>,
    pub average: JsonIpcLatency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRusage {
    pub per_core: BTreeMap<usize, ResourceUsage>,
    pub total: ResourceUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRegressionOutput {
    pub test_info: JsonTestInfo<crate::config::RegressionConfig>,
    pub cases: Vec<JsonCase>,
    pub avg_execution: JsonDuration,
    pub device: JsonDevice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc: Option<JsonIpc>,
    pub rusage: JsonRusage,
}

/// Build the regression JSON document
pub fn regression_to_json(report: &RegressionReport) -> JsonRegressionOutput {
    let group_exec = report.timings.group_execution();

    let cases = report
        .case_names
        .iter()
        .enumerate()
        .map(|(sequence, name)| JsonCase {
            sequence,
            name: name.to_string(),
            per_core: report
                .timings
                .case_times(sequence)
                .into_iter()
                .map(|(core_id, time)| JsonCoreTime {
                    core_id,
                    execution: JsonDuration::from_duration(time),
                })
                .collect(),
            avg_execution: JsonDuration::from_duration(report.timings.case_average(sequence).unwrap_or_default()),
        })
        .collect();

    let ipc = report.ipc.as_ref().map(|ipc| JsonIpc {
        per_core: ipc.per_core.iter().map(|(core, stat)| (*core, ipc_latency(stat))).collect(),
        average: ipc_latency(&ipc.total),
    });

    JsonRegressionOutput {
        test_info: JsonTestInfo::new("fsperf-regress", &report.started, report.config.clone()),
        cases,
        avg_execution: JsonDuration::from_duration(group_exec),
        device: JsonDevice::new(&report.device.total, group_exec),
        ipc,
        rusage: JsonRusage {
            per_core: report.rusage.per_core.iter().copied().collect(),
            total: report.rusage.total,
        },
    }
}

/// Write a JSON document to `path`
pub fn write_json_output<T: Serialize>(path: &Path, document: &T, pretty: bool) -> Result<()> {
    let file = File::create(path).map_err(|e| HarnessError::resource("create", path, e))?;
    let writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(writer, document)?;
    } else {
        serde_json::to_writer(writer, document)?;
    }

    Ok(())
}
