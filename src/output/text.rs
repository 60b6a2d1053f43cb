//! Human-readable text output
//!
//! Stat blocks keep a fixed `name key = value unit` layout, one value per
//! line, so runs can be compared with `diff` and scraped with `grep`.

use super::{PerfReport, RegressionReport};
use crate::stats::{CoreStat, DeviceStat, IpcKind, IpcStat, CLUSTER_SIZE};
use crate::util::resource::ResourceUsage;
use crate::util::time::{cpu_percent, MB};
use std::io::{self, Write};
use std::time::Duration;

const RULE: &str = "------------------------------------";

/// Print the benchmark report to stdout
pub fn print_perf_report(report: &PerfReport) -> io::Result<()> {
    write_perf_report(&mut io::stdout().lock(), report)
}

/// Print the regression report to stdout
pub fn print_regression_report(report: &RegressionReport) -> io::Result<()> {
    write_regression_report(&mut io::stdout().lock(), report)
}

/// Per-core blocks (`lcore N`) followed by the `group` block of every test case
pub fn write_perf_report<W: Write>(out: &mut W, report: &PerfReport) -> io::Result<()> {
    writeln!(out, "\n {}", report.config)?;

    let table = &report.summary.table;
    for (_, core_id, stat) in table.iter() {
        write_stat_block(out, &format!("lcore {}", core_id), stat)?;
    }
    for group in &report.summary.groups {
        write_stat_block(out, "group", &group.stat)?;
    }
    Ok(())
}

/// One stat block
pub fn write_stat_block<W: Write>(out: &mut W, name: &str, stat: &CoreStat) -> io::Result<()> {
    writeln!(out, "\n AIO Queue Perf Statistics.")?;
    writeln!(out, " {} stat result", name)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, " {} execution time = {:.3} sec", name, stat.execution.as_secs_f64())?;
    writeln!(out, " {} iops = {:.0} IOPS ({:.3} KIOPS)", name, stat.iops(), stat.kiops())?;
    writeln!(out, " {} bandwidth = {:.3} MB/s", name, stat.bandwidth_mb())?;
    writeln!(out, " {} avg latency = {:.3} us", name, stat.avg_latency_us())?;
    writeln!(out, " {} min latency = {:.3} us", name, stat.min_latency_us())?;
    writeln!(out, " {} max latency = {:.3} us", name, stat.max_latency_us())?;
    writeln!(
        out,
        " {} usr cpu utilization = {:3.0} % ({:.6} sec)",
        name,
        stat.user_cpu_percent(),
        stat.user_time.as_secs_f64()
    )?;
    writeln!(
        out,
        " {} sys cpu utilization = {:3.0} % ({:.6} sec)",
        name,
        stat.system_cpu_percent(),
        stat.system_time.as_secs_f64()
    )?;
    writeln!(out, "{}", RULE)
}

pub fn write_regression_report<W: Write>(out: &mut W, report: &RegressionReport) -> io::Result<()> {
    writeln!(out, "\n Regression test type: {}", report.config.test_type)?;

    for (tc, name) in report.case_names.iter().enumerate() {
        writeln!(out, " TC {} {}", tc, name)?;
        for (core_id, time) in report.timings.case_times(tc) {
            writeln!(out, " Per core {} execution = {:.6}", core_id, time.as_secs_f64())?;
        }
        let average = report.timings.case_average(tc).unwrap_or_default();
        writeln!(out, " TC {} {} Avg execution = {:.6} sec\n", tc, name, average.as_secs_f64())?;
    }

    let group_exec = report.timings.group_execution();
    writeln!(out, "Summary: Avg execution = {:.6} sec", group_exec.as_secs_f64())?;

    write_device(out, &report.device.total, group_exec)?;

    if let Some(ipc) = &report.ipc {
        for (core_id, stat) in &ipc.per_core {
            write_ipc(out, &format!("Core {}", core_id), stat)?;
        }
        write_ipc(out, "Avg", &ipc.total)?;
    }

    writeln!(out)?;
    let num_cores = report.rusage.cores().max(1);
    for (core_id, usage) in &report.rusage.per_core {
        write_rusage(out, &format!("core {}", core_id), usage, 1, group_exec)?;
    }
    write_rusage(out, "Avg", &report.rusage.total, num_cores, group_exec)
}

fn write_device<W: Write>(out: &mut W, device: &DeviceStat, group_exec: Duration) -> io::Result<()> {
    let secs = group_exec.as_secs_f64();
    let rate = |clusters: u64| {
        if secs > 0.0 {
            (clusters * CLUSTER_SIZE) as f64 / MB as f64 / secs
        } else {
            0.0
        }
    };

    writeln!(out, " Device Total I/O bandwidth = {:.3} MB/s", rate(device.total_io_count))?;
    writeln!(out, " Device Read I/O bandwidth = {:.3} MB/s", rate(device.read_io_count))?;
    writeln!(out, " Device Write I/O bandwidth = {:.3} MB/s", rate(device.write_io_count))?;
    writeln!(out, " Device Total I/O Amount = {:.3} MB", device.total_mb())?;
    writeln!(out, " Device Read I/O Amount = {:.3} MB", device.read_mb())?;
    writeln!(out, " Device Write I/O Amount = {:.3} MB", device.write_mb())
}

fn write_ipc<W: Write>(out: &mut W, name: &str, stat: &IpcStat) -> io::Result<()> {
    for kind in IpcKind::ALL {
        match stat.avg_latency_us(kind) {
            Some(us) => writeln!(out, " {} {} Latency = {:.6} us", name, kind.label(), us)?,
            None => writeln!(out, " {} {} Latency = n/a", name, kind.label())?,
        }
    }
    Ok(())
}

/// Resource usage, every counter divided by `divisor`
fn write_rusage<W: Write>(
    out: &mut W,
    name: &str,
    usage: &ResourceUsage,
    divisor: usize,
    execution: Duration,
) -> io::Result<()> {
    let d = divisor as f64;
    let user = usage.user_time / divisor as u32;
    let system = usage.system_time / divisor as u32;

    writeln!(
        out,
        " {} usr cpu time = {:.6} sec ({:3.0} %)",
        name,
        user.as_secs_f64(),
        cpu_percent(user, execution)
    )?;
    writeln!(
        out,
        " {} sys cpu time = {:.6} sec ({:3.0} %)",
        name,
        system.as_secs_f64(),
        cpu_percent(system, execution)
    )?;
    writeln!(out, " {} max rss = {} KB", name, usage.max_rss_kb)?;
    writeln!(
        out,
        " {} page faults = {:.0} minor, {:.0} major",
        name,
        usage.minor_faults as f64 / d,
        usage.major_faults as f64 / d
    )?;
    writeln!(
        out,
        " {} context switches = {:.0} voluntary, {:.0} involuntary",
        name,
        usage.voluntary_switches as f64 / d,
        usage.involuntary_switches as f64 / d
    )?;
    writeln!(
        out,
        " {} block i/o = {:.0} in, {:.0} out",
        name,
        usage.blocks_in as f64 / d,
        usage.blocks_out as f64 / d
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PerfConfig, RegressionConfig};
    use crate::stats::aggregator::{Aggregator, IoSummary};
    use crate::stats::publisher::StatBus;
    use chrono::Local;

    fn render<F: FnOnce(&mut Vec<u8>) -> io::Result<()>>(f: F) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn io_summary() -> IoSummary {
        let bus = StatBus::new(2, 1);
        for core in 0..2 {
            let stat = CoreStat {
                execution: Duration::from_secs(2),
                io_count: 1000,
                total_bytes: 1000 * 4096,
                latency_total_ticks: 1000 * 5_000,
                latency_min_ticks: 1_000 * (core as u64 + 1),
                latency_max_ticks: 9_000,
                user_time: Duration::from_millis(500),
                system_time: Duration::from_secs(1),
            };
            bus.publisher(core).publish_io(0, stat).unwrap();
        }
        Aggregator::new(bus.into_receivers(), 2, 1).collect(2).unwrap()
    }

    #[test]
    fn test_stat_block_format() {
        let stat = CoreStat {
            execution: Duration::from_secs(2),
            io_count: 2048,
            total_bytes: 2048 * 4096,
            latency_total_ticks: 2048 * 10_000,
            latency_min_ticks: 2_000,
            latency_max_ticks: 50_000,
            user_time: Duration::from_secs(1),
            system_time: Duration::ZERO,
        };

        let text = render(|out| write_stat_block(out, "lcore 0", &stat));
        assert!(text.contains(" lcore 0 execution time = 2.000 sec"));
        assert!(text.contains(" lcore 0 iops = 1024 IOPS (1.000 KIOPS)"));
        assert!(text.contains(" lcore 0 bandwidth = 4.000 MB/s"));
        assert!(text.contains(" lcore 0 avg latency = 10.000 us"));
        assert!(text.contains(" lcore 0 min latency = 2.000 us"));
        assert!(text.contains(" lcore 0 max latency = 50.000 us"));
        assert!(text.contains(" lcore 0 usr cpu utilization =  50 % (1.000000 sec)"));
        assert!(text.contains(" lcore 0 sys cpu utilization =   0 %"));
    }

    #[test]
    fn test_perf_report_has_core_and_group_blocks() {
        let report = PerfReport {
            config: PerfConfig::default(),
            started: Local::now(),
            summary: io_summary(),
        };

        let text = render(|out| write_perf_report(out, &report));
        assert!(text.contains(" lcore 0 stat result"));
        assert!(text.contains(" lcore 1 stat result"));
        assert!(text.contains(" group iops = 1000 IOPS"));
        assert!(text.contains(" group min latency = 1.000 us"));
        assert!(text.contains(" group execution time = 2.000 sec"));
    }

    #[test]
    fn test_regression_report_sections() {
        let bus = StatBus::new(2, 2);
        for core in 0..2 {
            let publisher = bus.publisher(core);
            publisher.publish_regression(0, Duration::from_secs(1)).unwrap();
            publisher.publish_regression(1, Duration::from_secs(3)).unwrap();
            publisher
                .publish_device(DeviceStat {
                    total_io_count: 256,
                    read_io_count: 0,
                    write_io_count: 256,
                })
                .unwrap();
            publisher
                .publish_rusage(ResourceUsage {
                    user_time: Duration::from_secs(2),
                    ..Default::default()
                })
                .unwrap();
        }

        let aggregator = Aggregator::new(bus.into_receivers(), 2, 2);
        let report = RegressionReport {
            config: RegressionConfig::default(),
            started: Local::now(),
            case_names: vec!["first", "second"],
            timings: aggregator.collect_regression(4).unwrap(),
            device: aggregator.collect_device(2).unwrap(),
            ipc: None,
            rusage: aggregator.collect_rusage(2).unwrap(),
        };

        let text = render(|out| write_regression_report(out, &report));
        assert!(text.contains(" TC 0 first\n Per core 0 execution = 1.000000\n Per core 1 execution = 1.000000"));
        assert!(text.contains(" TC 1 second Avg execution = 3.000000 sec"));
        // (1 + 3) * 2 cores / 2 cores
        assert!(text.contains("Summary: Avg execution = 4.000000 sec"));
        // 512 clusters = 2 MB over 4 s
        assert!(text.contains(" Device Total I/O bandwidth = 0.500 MB/s"));
        assert!(text.contains(" Device Write I/O Amount = 2.000 MB"));
        assert!(!text.contains("Latency"));
        assert!(text.contains(" core 1 usr cpu time = 2.000000 sec"));
        assert!(text.contains(" Avg usr cpu time = 2.000000 sec ( 50 %)"));
    }

    #[test]
    fn test_ipc_lines() {
        let mut stat = IpcStat::default();
        stat.record(IpcKind::BufferAlloc, 4_000);

        let text = render(|out| write_ipc(out, "Core 0", &stat));
        assert!(text.contains(" Core 0 BUFFER Alloc Latency = 4.000000 us"));
        assert!(text.contains(" Core 0 Container Free Latency = n/a"));
    }
}
