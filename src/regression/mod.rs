//! Regression suite
//!
//! The suite is a fixed table of [`TestCase`]s that every configured core
//! runs in order against its own storage root. Each case declares the return
//! code it must produce (`pass_criteria`); the first case that misses it
//! stops the core's sequence with [`HarnessError::RegressionFailed`]. There is
//! no continue-on-error mode.
//!
//! How much work a case does depends on the [`TestType`]: the max test fills
//! whatever the filesystem reports as free, the quick test does about a
//! hundred items or 100 MiB, and the million test caps the item count at a
//! million and the extent at a large fixed size. See [`item_count`],
//! [`extent_size`] and [`small_file_count`].
//!
//! After every passed case the core publishes the case's execution time;
//! after the last one it publishes its CPU usage, device counters and, if the
//! storage keeps them, service call latencies.

pub mod cases;

use crate::config::{EngineKind, RegressionConfig, TestType};
use crate::error::HarnessError;
use crate::output::RegressionReport;
use crate::stats::aggregator::Aggregator;
use crate::stats::publisher::{StatBus, StatCategory, StatPublisher};
use crate::stats::CLUSTER_SIZE;
use crate::storage::StorageApi;
use crate::util::fast_time::FastInstant;
use crate::util::resource::ResourceUsage;
use crate::util::time::MB;
use crate::worker::progress::{ConsoleProgress, NullProgress, ProgressObserver};
use crate::worker::{run_workers, WorkerContext};
use crate::Result;
use chrono::Local;
use tracing::{debug, error, info};

/// Item cap of the million test
pub const MILL_ITEMS: u64 = 1_000_000;
/// Item count of the quick test
pub const QUICK_ITEMS: u64 = 100;
/// Extent of the quick test
pub const QUICK_EXTENT: u64 = 100 * MB;
/// Million-test extent of the single large file case
pub const MILL_FILE_EXTENT: u64 = 1 << 40;
/// Million-test extent of the AIO cases
pub const MILL_AIO_EXTENT: u64 = 128 << 30;

/// Files or directories a metadata case creates
pub fn item_count(test_type: TestType, free_inodes: u64) -> u64 {
    match test_type {
        TestType::Max => free_inodes,
        TestType::Quick => QUICK_ITEMS,
        TestType::Mill => free_inodes.min(MILL_ITEMS),
    }
}

/// Bytes a single-file case allocates
///
/// `mill_extent` is the million-test size; when the filesystem has less free
/// space than that, half of the free space is used instead.
pub fn extent_size(test_type: TestType, free_blocks: u64, mill_extent: u64) -> u64 {
    let free_bytes = free_blocks.saturating_mul(CLUSTER_SIZE);
    match test_type {
        TestType::Max => free_bytes,
        TestType::Quick => QUICK_EXTENT,
        TestType::Mill if mill_extent > free_bytes => (free_blocks / 2) * CLUSTER_SIZE,
        TestType::Mill => mill_extent,
    }
}

/// 4 KiB files the fsync case creates
pub fn small_file_count(test_type: TestType, free_blocks: u64) -> u64 {
    match test_type {
        TestType::Max => free_blocks / 2,
        TestType::Quick => QUICK_ITEMS,
        TestType::Mill => (free_blocks / 2).min(MILL_ITEMS),
    }
}

/// What a case gets to work with
pub struct CaseContext<'a> {
    pub storage: &'a dyn StorageApi,
    pub test_type: TestType,
    /// O_DIRECT for the AIO cases
    pub direct: bool,
    pub engine: EngineKind,
    pub seed: Option<u64>,
    pub core_id: usize,
    /// Whether this core owns the console
    pub console: bool,
}

impl<'a> CaseContext<'a> {
    pub fn new(storage: &'a dyn StorageApi, config: &RegressionConfig, worker: WorkerContext) -> Self {
        Self {
            storage,
            test_type: config.test_type,
            direct: config.direct,
            engine: config.engine,
            seed: config.seed,
            core_id: worker.core_id,
            console: worker.is_primary(),
        }
    }

    /// Progress observer for one phase; silent on all cores but the first
    pub fn progress(&self, show_rate: bool) -> Box<dyn ProgressObserver> {
        if self.console {
            Box::new(ConsoleProgress::new(show_rate))
        } else {
            Box::new(NullProgress)
        }
    }

    /// Print a report line on the console core, log it elsewhere
    pub fn report(&self, line: &str) {
        if self.console {
            println!("{}", line);
        } else {
            debug!(core_id = self.core_id, "{}", line.trim());
        }
    }
}

/// Signature of a case body; the argument is the case's `arg`
pub type CaseFn = fn(&mut CaseContext<'_>, u32) -> Result<()>;

/// One entry of the case table
#[derive(Clone, Copy)]
pub struct TestCase {
    pub name: &'static str,
    pub run: CaseFn,
    pub arg: u32,
    /// Return code the case must produce
    pub pass_criteria: i32,
    /// Run the case but never fail the sequence on it
    pub ignore_result: bool,
}

impl TestCase {
    /// Run the body and map it to a return code (0 ok, -1 error)
    pub fn execute(&self, ctx: &mut CaseContext<'_>) -> i32 {
        match (self.run)(ctx, self.arg) {
            Ok(()) => 0,
            Err(e) => {
                error!(core_id = ctx.core_id, case = self.name, "{:#}", e);
                -1
            }
        }
    }

    fn passed(&self, code: i32) -> bool {
        self.ignore_result || code == self.pass_criteria
    }
}

/// What a core's run of the suite published besides the timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteOutcome {
    pub cases_passed: usize,
    pub ipc_published: bool,
}

/// Run `cases` in order on one core
///
/// Stops at the first case whose return code misses its pass criteria; the
/// per-core records are only published once the whole table has passed.
pub fn run_suite(ctx: &mut CaseContext<'_>, cases: &[TestCase], publisher: &StatPublisher) -> Result<SuiteOutcome> {
    let usage_before = ResourceUsage::thread()?;

    for (sequence, case) in cases.iter().enumerate() {
        let index = sequence + 1;
        ctx.report(&format!(" lcore = {} Regression Test {}: {}", ctx.core_id, index, case.name));

        let start = FastInstant::now();
        let code = case.execute(ctx);
        let elapsed = start.elapsed();

        if !case.passed(code) {
            ctx.report(&format!(" Failed Regression Test {}.", index));
            return Err(HarnessError::RegressionFailed {
                index,
                name: case.name,
                code,
            }
            .into());
        }

        publisher.publish_regression(sequence, elapsed)?;
        info!(core_id = ctx.core_id, index, elapsed = ?elapsed, "regression case passed");
        ctx.report(&format!(" lcore = {} Regression Test {}: passed successfully.\n", ctx.core_id, index));
    }

    let usage = ResourceUsage::thread()?.since(&usage_before);
    publisher.publish_rusage(usage)?;
    publisher.publish_device(ctx.storage.device_counters())?;

    let ipc = ctx.storage.ipc_counters();
    if let Some(stat) = ipc {
        publisher.publish_ipc(stat)?;
    }

    Ok(SuiteOutcome {
        cases_passed: cases.len(),
        ipc_published: ipc.is_some(),
    })
}

/// Run the full suite on every configured core and collect the results
///
/// `make_storage` opens the storage a core works in. The aggregator only runs
/// if every core passed every case.
pub fn run_regression<S, F>(config: &RegressionConfig, cases: &[TestCase], make_storage: F) -> Result<RegressionReport>
where
    S: StorageApi,
    F: Fn(usize) -> Result<S> + Sync,
{
    let started = Local::now();
    let num_cores = config.cores.len();
    let bus = StatBus::new(num_cores, cases.len());
    info!(cores = num_cores, test_type = %config.test_type, "starting regression suite");

    let outcomes = run_workers(&config.cores, |worker| {
        let storage = make_storage(worker.core_id)?;
        let publisher = bus.publisher(worker.core_id);
        let mut ctx = CaseContext::new(&storage, config, worker);
        run_suite(&mut ctx, cases, &publisher)
    })?;

    let ipc_cores = outcomes.iter().filter(|o| o.ipc_published).count();
    let num_tc = bus.num_tc();
    let aggregator = Aggregator::new(bus.into_receivers(), num_cores, num_tc);

    let timings = aggregator.collect_regression(num_cores * StatCategory::Regression.records_per_core(num_tc))?;
    let rusage = aggregator.collect_rusage(num_cores)?;
    let device = aggregator.collect_device(num_cores)?;
    let ipc = if ipc_cores > 0 {
        Some(aggregator.collect_ipc(ipc_cores)?)
    } else {
        None
    };

    Ok(RegressionReport {
        config: config.clone(),
        started,
        case_names: cases.iter().map(|c| c.name).collect(),
        timings,
        device,
        ipc,
        rusage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::stats::{IpcKind, IpcStat};
    use crate::storage::memory::MemStorage;
    use crate::storage::FsStat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn worker(core_id: usize) -> WorkerContext {
        WorkerContext {
            core_id,
            cpu: core_id,
            num_cores: 1,
        }
    }

    fn small_storage() -> MemStorage {
        MemStorage::new().with_fs_stat(FsStat {
            free_blocks: 64,
            free_inodes: 10,
        })
    }

    fn max_config() -> RegressionConfig {
        RegressionConfig {
            test_type: TestType::Max,
            ..Default::default()
        }
    }

    static AFTER_FAILURE: AtomicUsize = AtomicUsize::new(0);

    fn failing_case(_ctx: &mut CaseContext<'_>, _arg: u32) -> Result<()> {
        anyhow::bail!("injected failure")
    }

    fn counting_case(_ctx: &mut CaseContext<'_>, _arg: u32) -> Result<()> {
        AFTER_FAILURE.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn case(name: &'static str, run: CaseFn, ignore_result: bool) -> TestCase {
        TestCase {
            name,
            run,
            arg: 0,
            pass_criteria: 0,
            ignore_result,
        }
    }

    #[test]
    fn test_sizing_by_test_type() {
        assert_eq!(item_count(TestType::Max, 5000), 5000);
        assert_eq!(item_count(TestType::Quick, 5000), 100);
        assert_eq!(item_count(TestType::Mill, 5000), 5000);
        assert_eq!(item_count(TestType::Mill, 5_000_000), MILL_ITEMS);

        assert_eq!(extent_size(TestType::Max, 10, MILL_FILE_EXTENT), 10 * 4096);
        assert_eq!(extent_size(TestType::Quick, 10, MILL_FILE_EXTENT), 100 * 1024 * 1024);
        // Plenty of room: the fixed size
        assert_eq!(extent_size(TestType::Mill, 1 << 30, MILL_AIO_EXTENT), MILL_AIO_EXTENT);
        // Not enough room: half of the free space
        assert_eq!(extent_size(TestType::Mill, 1000, MILL_FILE_EXTENT), 500 * 4096);

        assert_eq!(small_file_count(TestType::Max, 64), 32);
        assert_eq!(small_file_count(TestType::Quick, 64), 100);
        assert_eq!(small_file_count(TestType::Mill, 10_000_000), MILL_ITEMS);
    }

    #[test]
    fn test_full_suite_passes_on_one_core() {
        let storage = small_storage();
        let bus = StatBus::new(1, cases::all().len());
        let publisher = bus.publisher(0);
        let config = max_config();
        let mut ctx = CaseContext::new(&storage, &config, worker(0));
        ctx.console = false;

        let outcome = run_suite(&mut ctx, &cases::all(), &publisher).unwrap();
        assert_eq!(outcome.cases_passed, 8);
        assert!(!outcome.ipc_published);
        assert_eq!(storage.open_count(), 0);

        drop(publisher);
        let receivers = bus.into_receivers();
        assert_eq!(receivers.regression.len(), 8);
        assert_eq!(receivers.rusage.len(), 1);
        assert_eq!(receivers.device.len(), 1);
        assert!(receivers.ipc.is_empty());
    }

    #[test]
    fn test_failed_case_stops_the_sequence() {
        let storage = small_storage();
        // Case 2 creates directories
        storage.fail_on("mkdir");

        let bus = StatBus::new(1, cases::all().len());
        let publisher = bus.publisher(0);
        let config = max_config();
        let mut ctx = CaseContext::new(&storage, &config, worker(0));
        ctx.console = false;

        let err = run_suite(&mut ctx, &cases::all(), &publisher).unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Regression);
        match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::RegressionFailed { index, code, .. }) => {
                assert_eq!(*index, 2);
                assert_eq!(*code, -1);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Case 3 never ran
        assert_eq!(storage.calls("preallocate"), 0);

        drop(publisher);
        let receivers = bus.into_receivers();
        assert_eq!(receivers.regression.len(), 1);
        assert!(receivers.rusage.is_empty());
    }

    #[test]
    fn test_ignored_result_does_not_stop_the_sequence() {
        let storage = small_storage();
        let bus = StatBus::new(1, 2);
        let publisher = bus.publisher(0);
        let config = max_config();
        let mut ctx = CaseContext::new(&storage, &config, worker(0));
        ctx.console = false;

        AFTER_FAILURE.store(0, Ordering::SeqCst);
        let table = [case("ignored", failing_case, true), case("after", counting_case, false)];
        let outcome = run_suite(&mut ctx, &table, &publisher).unwrap();
        assert_eq!(outcome.cases_passed, 2);
        assert_eq!(AFTER_FAILURE.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ipc_published_when_storage_reports_it() {
        let mut ipc = IpcStat::default();
        ipc.record(IpcKind::ALL[0], 1000);
        let storage = small_storage().with_ipc(ipc);

        let bus = StatBus::new(1, 1);
        let publisher = bus.publisher(0);
        let config = max_config();
        let mut ctx = CaseContext::new(&storage, &config, worker(0));
        ctx.console = false;

        let outcome = run_suite(&mut ctx, &[case("ok", counting_case, false)], &publisher).unwrap();
        assert!(outcome.ipc_published);
        drop(publisher);
        assert_eq!(bus.into_receivers().ipc.len(), 1);
    }

    #[test]
    fn test_run_regression_on_two_cores() {
        let config = RegressionConfig {
            test_type: TestType::Max,
            cores: vec![0, 1],
            ..Default::default()
        };

        let report = run_regression(&config, &cases::all(), |_| Ok(small_storage())).unwrap();
        assert_eq!(report.case_names.len(), 8);
        assert_eq!(report.timings.table.len(), 16);
        assert_eq!(report.timings.case_times(0).len(), 2);
        assert_eq!(report.rusage.cores(), 2);
        assert_eq!(report.device.cores(), 2);
        assert!(report.device.total.write_io_count > 0);
        assert!(report.ipc.is_none());
    }

    #[test]
    fn test_run_regression_fails_without_aggregating() {
        let config = RegressionConfig {
            test_type: TestType::Max,
            cores: vec![0, 1],
            ..Default::default()
        };

        let err = run_regression(&config, &cases::all(), |core_id| {
            let storage = small_storage();
            if core_id == 1 {
                storage.fail_on("statvfs");
            }
            Ok(storage)
        })
        .unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Regression);
    }
}
