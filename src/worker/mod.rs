//! Per-core workers
//!
//! A run starts one OS thread per configured core. Each thread pins itself to
//! its CPU and then runs its test cases without touching anything the other
//! workers own; the only thing the workers share is the stat channels they
//! publish into once a test case is over.
//!
//! - [`generator`]: request descriptors for one test case
//! - [`controller`]: one test case from open to remove
//! - [`progress`]: percentage reporting
//! - [`affinity`]: CPU pinning and CPU list parsing
//!
//! [`run_perf`] puts them together for the benchmark tool: every core runs
//! the configured job once and the group result is assembled afterwards.
//!
//! # Example
//!
//! ```no_run
//! use fsperf::worker::{run_workers, WorkerContext};
//!
//! let results = run_workers(&[0, 1], |ctx: WorkerContext| {
//!     Ok(ctx.core_id * 10)
//! })?;
//! assert_eq!(results, vec![0, 10]);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod affinity;
pub mod controller;
pub mod generator;
pub mod progress;

use crate::config::PerfConfig;
use crate::output::PerfReport;
use crate::stats::aggregator::Aggregator;
use crate::stats::publisher::StatBus;
use crate::storage::StorageApi;
use crate::Result;
use anyhow::Context;
use chrono::Local;
use progress::{ConsoleProgress, NullProgress, ProgressObserver};
use tracing::{debug, error, info, warn};

/// Identity of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    /// Dense index `0..num_cores`, the key workers publish under
    pub core_id: usize,
    /// CPU the worker is pinned to
    pub cpu: usize,
    pub num_cores: usize,
}

impl WorkerContext {
    /// Only the first worker drives the console
    pub fn is_primary(&self) -> bool {
        self.core_id == 0
    }
}

/// Run `work` once per CPU in `cpus`, each on its own pinned thread
///
/// Waits for every worker before returning. Results come back in `cpus`
/// order. If any worker fails (or panics) the first failure in that order is
/// returned, after all the others have finished.
pub fn run_workers<T, F>(cpus: &[usize], work: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(WorkerContext) -> Result<T> + Sync,
{
    anyhow::ensure!(!cpus.is_empty(), "no cores configured");
    affinity::warn_if_oversubscribed(cpus.len());

    let work = &work;
    let outcomes: Vec<Result<T>> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(cpus.len());

        for (core_id, &cpu) in cpus.iter().enumerate() {
            let ctx = WorkerContext {
                core_id,
                cpu,
                num_cores: cpus.len(),
            };

            let spawned = std::thread::Builder::new()
                .name(format!("lcore{}", cpu))
                .spawn_scoped(scope, move || {
                    if let Err(e) = affinity::pin_current_thread(cpu) {
                        warn!(core_id, cpu, "running unpinned: {:#}", e);
                    } else {
                        debug!(core_id, cpu, "worker pinned");
                    }
                    work(ctx)
                })
                .with_context(|| format!("failed to start worker for core {}", cpu));
            handles.push((cpu, spawned));
        }

        handles
            .into_iter()
            .map(|(cpu, spawned)| {
                spawned?
                    .join()
                    .map_err(|_| anyhow::anyhow!("worker on core {} panicked", cpu))?
                    .with_context(|| format!("worker on core {} failed", cpu))
            })
            .collect()
    });

    let mut results = Vec::with_capacity(outcomes.len());
    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(value) => results.push(value),
            Err(e) => {
                error!("{:#}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Run the benchmark job once on every configured core
///
/// `make_storage` opens the storage a core works in. Each core's offsets are
/// seeded with `seed + core_id` so cores do not replay the same pattern. The
/// aggregator only runs if every core finished its job.
pub fn run_perf<S, F>(config: &PerfConfig, make_storage: F) -> Result<PerfReport>
where
    S: StorageApi,
    F: Fn(usize) -> Result<S> + Sync,
{
    let started = Local::now();
    let num_cores = config.cores.len();
    let bus = StatBus::new(num_cores, 1);
    let job = config.job()?;
    info!(cores = num_cores, "starting benchmark: {}", config);

    run_workers(&config.cores, |worker| {
        let storage = make_storage(worker.core_id)?;
        let mut job = job.clone();
        job.seed = job.seed.map(|seed| seed.wrapping_add(worker.core_id as u64));

        let mut observer: Box<dyn ProgressObserver> = if worker.is_primary() {
            Box::new(ConsoleProgress::new(true))
        } else {
            Box::new(NullProgress)
        };
        let stat = controller::run_test_case(&storage, &job, observer.as_mut())?;
        if worker.is_primary() {
            println!();
        }

        bus.publisher(worker.core_id).publish_io(0, stat)
    })?;

    let aggregator = Aggregator::new(bus.into_receivers(), num_cores, 1);
    let summary = aggregator.collect(num_cores)?;

    Ok(PerfReport {
        config: config.clone(),
        started,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClass, HarnessError};
    use crate::storage::memory::MemStorage;

    fn current_cpu() -> usize {
        let cpu = unsafe { libc::sched_getcpu() };
        cpu.max(0) as usize
    }

    #[test]
    fn test_results_in_core_order() {
        let cpu = current_cpu();
        let results = run_workers(&[cpu, cpu, cpu], |ctx| {
            assert_eq!(ctx.num_cores, 3);
            assert_eq!(ctx.cpu, cpu);
            Ok(ctx.core_id)
        })
        .unwrap();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[test]
    fn test_only_first_core_is_primary() {
        let cpu = current_cpu();
        let primaries = run_workers(&[cpu, cpu], |ctx| Ok(ctx.is_primary())).unwrap();
        assert_eq!(primaries, vec![true, false]);
    }

    #[test]
    fn test_failure_is_reported_after_all_join() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cpu = current_cpu();
        let finished = AtomicUsize::new(0);
        let err = run_workers(&[cpu, cpu, cpu], |ctx| {
            finished.fetch_add(1, Ordering::SeqCst);
            if ctx.core_id == 1 {
                Err(HarnessError::argument("bad core").into())
            } else {
                Ok(())
            }
        })
        .unwrap_err();

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(HarnessError::classify(&err), ErrorClass::Argument);
    }

    #[test]
    fn test_panic_becomes_error() {
        let cpu = current_cpu();
        let result: Result<Vec<()>> = run_workers(&[cpu], |_| panic!("boom"));
        assert!(result.is_err());
    }

    #[test]
    fn test_unpinnable_core_still_runs() {
        let results = run_workers(&[4096], |ctx| Ok(ctx.cpu)).unwrap();
        assert_eq!(results, vec![4096]);
    }

    #[test]
    fn test_empty_core_list() {
        assert!(run_workers(&[], |_| Ok(())).is_err());
    }

    fn perf_config(cores: Vec<usize>) -> PerfConfig {
        PerfConfig {
            file_size_mb: 1,
            block_size: 4096,
            queue_depth: 8,
            write: true,
            cores,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_perf_groups_all_cores() {
        let cpu = current_cpu();
        let report = run_perf(&perf_config(vec![cpu, cpu]), |_| Ok(MemStorage::new())).unwrap();

        assert_eq!(report.summary.table.len(), 2);
        assert_eq!(report.summary.groups.len(), 1);
        let group = &report.summary.groups[0];
        assert_eq!(group.cores, 2);
        assert_eq!(group.stat.io_count, 2 * 256);
        assert_eq!(group.stat.total_bytes, 2 << 20);
    }

    #[test]
    fn test_run_perf_failed_core_fails_the_run() {
        let cpu = current_cpu();
        let err = run_perf(&perf_config(vec![cpu, cpu]), |core_id| {
            let storage = MemStorage::new();
            if core_id == 1 {
                storage.fail_on("preallocate");
            }
            Ok(storage)
        })
        .unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Resource);
    }
}
