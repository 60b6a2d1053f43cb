//! Core pinning
//!
//! Each worker pins itself to the CPU it was configured for before it does
//! any I/O, so submission and completion polling for a queue always happen on
//! the same core.
//!
//! Cores are named with the usual Linux CPU list syntax (`0,2-4`).
//!
//! ```
//! use fsperf::worker::affinity::parse_cpu_list;
//!
//! assert_eq!(parse_cpu_list("3,0-1").unwrap(), vec![0, 1, 3]);
//! ```

use crate::Result;
use anyhow::Context;
use tracing::warn;

/// Highest CPU id a `cpu_set_t` can hold
const MAX_CPU: usize = 1023;

/// Pin the calling thread to `core`
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> Result<()> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
    use std::mem;

    if core > MAX_CPU {
        anyhow::bail!("CPU core ID {} is too large (max {})", core, MAX_CPU);
    }

    unsafe {
        let mut cpu_set: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut cpu_set);
        CPU_SET(core, &mut cpu_set);

        // 0 = calling thread
        let result = sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &cpu_set);
        if result != 0 {
            let err = std::io::Error::last_os_error();
            return Err(err).context(format!("failed to pin thread to core {}", core));
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core: usize) -> Result<()> {
    anyhow::bail!("CPU affinity is only supported on Linux")
}

/// Parse a CPU list such as `0,2-4,7`
///
/// The result is sorted and free of duplicates. An empty list is an error.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>> {
    let mut cores = Vec::new();

    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start
                .trim()
                .parse()
                .with_context(|| format!("invalid CPU core number: {}", start))?;
            let end: usize = end
                .trim()
                .parse()
                .with_context(|| format!("invalid CPU core number: {}", end))?;
            if start > end {
                anyhow::bail!("invalid CPU range: start ({}) > end ({})", start, end);
            }
            cores.extend(start..=end);
        } else {
            let core: usize = part
                .parse()
                .with_context(|| format!("invalid CPU core number: {}", part))?;
            cores.push(core);
        }
    }

    if cores.is_empty() {
        anyhow::bail!("CPU core list cannot be empty");
    }
    if let Some(&core) = cores.iter().find(|&&c| c > MAX_CPU) {
        anyhow::bail!("CPU core ID {} is too large (max {})", core, MAX_CPU);
    }

    cores.sort_unstable();
    cores.dedup();
    Ok(cores)
}

pub fn num_cpus() -> usize {
    num_cpus::get()
}

/// Warn when more workers than CPUs are configured; returns whether it did
pub fn warn_if_oversubscribed(workers: usize) -> bool {
    let cpus = num_cpus();
    if workers > cpus {
        warn!(workers, cpus, "more workers than CPUs, cores will be shared");
        true
    } else {
        false
    }
}
