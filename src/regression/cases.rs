//! The regression cases
//!
//! Three metadata cases (empty files, directories, small fsync'ed files) run
//! create, lookup and delete phases over `N` numbered items; one case
//! allocates and removes a single large file; four cases run an AIO write
//! phase followed by a read phase over one file.

use super::{extent_size, item_count, small_file_count, CaseContext, TestCase, MILL_AIO_EXTENT, MILL_FILE_EXTENT};
use crate::engine::OperationType;
use crate::storage::{OpenFlags, CLUSTER_SIZE};
use crate::util::fast_time::FastInstant;
use crate::util::time::{bytes_to_mb, calculate_bandwidth_mb, calculate_iops};
use crate::worker::controller::{run_test_case, IoJob};
use crate::worker::progress::ProgressTracker;
use crate::Result;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `arg` of the AIO cases
pub const SEQUENTIAL: u32 = 0;
pub const RANDOM: u32 = 1;

/// Queue depth of the AIO cases
pub const AIO_QDEPTH: usize = 128;

const ALLOCATE_FILE: &str = "file_allocate_test";

/// The suite, in execution order
pub fn all() -> Vec<TestCase> {
    vec![
        case("Creating Max Number of Files.", create_files, 0),
        case("Creating Max Number of Directories.", create_dirs, 0),
        case("Creating Maximum Sized Single File.", create_max_sized_file, 0),
        case(
            "Creating Maximum Sized Single File with 4KB Sequential AIO Read and Write.",
            max_sized_file_aio_4k,
            SEQUENTIAL,
        ),
        case(
            "Creating Maximum Sized Single File with 4KB Random AIO Read and Write.",
            max_sized_file_aio_4k,
            RANDOM,
        ),
        case(
            "Creating Maximum Sized Single File with 128KB Sequential AIO Read and Write.",
            max_sized_file_aio_128k,
            SEQUENTIAL,
        ),
        case(
            "Creating Maximum Sized Single File with 128KB Random AIO Read and Write.",
            max_sized_file_aio_128k,
            RANDOM,
        ),
        case("Creating 4KB files with fsync.", create_small_files, 0),
    ]
}

fn case(name: &'static str, run: super::CaseFn, arg: u32) -> TestCase {
    TestCase {
        name,
        run,
        arg,
        pass_criteria: 0,
        ignore_result: false,
    }
}

fn item(prefix: &str, i: u64) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix, i))
}

/// Apply `op` to items `0..count`, reporting progress and the OPS rate
fn phase<F>(ctx: &CaseContext<'_>, what: &str, prefix: &str, count: u64, mut op: F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    ctx.report(&format!(" Start: {} ({:#x}).", what, count));

    let mut observer = ctx.progress(false);
    let mut tracker = ProgressTracker::new(count);
    let start = FastInstant::now();

    for i in 0..count {
        let path = item(prefix, i);
        op(&path).with_context(|| format!("{}: {}", what, path.display()))?;
        if let Some(step) = tracker.advance(i + 1, start.elapsed()) {
            observer.on_progress(&step);
        }
    }

    let elapsed = start.elapsed();
    ctx.report(&format!(
        " Finish: {} ({:#x}) {:.3} OPS ({:.3} sec).",
        what,
        count,
        calculate_iops(count, elapsed),
        elapsed.as_secs_f64()
    ));
    Ok(())
}

fn create_files(ctx: &mut CaseContext<'_>, _arg: u32) -> Result<()> {
    let storage = ctx.storage;
    let count = item_count(ctx.test_type, storage.statvfs()?.free_inodes);

    phase(ctx, "creating null files", "file", count, |path| {
        let file = storage.open_or_create(path, OpenFlags { create: true, direct: false })?;
        storage.close(file)
    })?;
    phase(ctx, "looking up null files", "file", count, |path| storage.stat(path).map(|_| ()))?;
    phase(ctx, "deleting null files", "file", count, |path| storage.remove(path))
}

fn create_dirs(ctx: &mut CaseContext<'_>, _arg: u32) -> Result<()> {
    let storage = ctx.storage;
    let count = item_count(ctx.test_type, storage.statvfs()?.free_inodes);

    phase(ctx, "creating null directories", "dir", count, |path| storage.mkdir(path))?;
    phase(ctx, "looking up null directories", "dir", count, |path| {
        let attr = storage.stat(path)?;
        anyhow::ensure!(attr.is_dir, "not a directory");
        Ok(())
    })?;
    phase(ctx, "deleting null directories", "dir", count, |path| storage.rmdir(path))
}

fn create_max_sized_file(ctx: &mut CaseContext<'_>, _arg: u32) -> Result<()> {
    let storage = ctx.storage;
    let path = Path::new(ALLOCATE_FILE);
    let file_size = extent_size(ctx.test_type, storage.statvfs()?.free_blocks, MILL_FILE_EXTENT);

    let file = storage.open_or_create(path, OpenFlags { create: true, direct: false })?;
    storage.close(file)?;

    ctx.report(&format!(
        "\n Start: Fallocate and Deallocate (file {} size {}MB).",
        ALLOCATE_FILE,
        bytes_to_mb(file_size)
    ));
    let start = FastInstant::now();
    storage.preallocate(path, 0, file_size)?;

    // The allocated size may differ from the requested one
    let allocated = storage.stat(path)?.size;
    let elapsed = start.elapsed();
    ctx.report(&format!(" requested size {}MB.", bytes_to_mb(file_size)));
    ctx.report(&format!(" allocated size {}MB.", bytes_to_mb(allocated)));
    ctx.report(&format!(
        " fallocate throughput {:.3}MB/s ({:.3}s).",
        calculate_bandwidth_mb(allocated, elapsed),
        elapsed.as_secs_f64()
    ));

    let start = FastInstant::now();
    storage.remove(path)?;
    ctx.report(&format!(
        " rmfile throughput {:.3}MB/s",
        calculate_bandwidth_mb(allocated, start.elapsed())
    ));
    ctx.report("\n Finish: Fallocate and Deallocate.");
    Ok(())
}

fn max_sized_file_aio_4k(ctx: &mut CaseContext<'_>, arg: u32) -> Result<()> {
    aio_write_then_read(ctx, CLUSTER_SIZE as usize, arg == RANDOM)
}

fn max_sized_file_aio_128k(ctx: &mut CaseContext<'_>, arg: u32) -> Result<()> {
    aio_write_then_read(ctx, 128 * 1024, arg == RANDOM)
}

/// A write phase then a read phase over the same extent
///
/// Each phase is a full test case of its own: it creates, fills or reads, and
/// removes the file.
fn aio_write_then_read(ctx: &CaseContext<'_>, io_size: usize, random: bool) -> Result<()> {
    let file_size = extent_size(ctx.test_type, ctx.storage.statvfs()?.free_blocks, MILL_AIO_EXTENT);

    for direction in [OperationType::Write, OperationType::Read] {
        let job = IoJob {
            io_size,
            qdepth: AIO_QDEPTH,
            direction,
            random,
            direct: ctx.direct,
            engine: ctx.engine,
            seed: ctx.seed,
            ..IoJob::new(ALLOCATE_FILE, file_size)
        };

        let mut observer = ctx.progress(true);
        let start = FastInstant::now();
        let stat = run_test_case(ctx.storage, &job, observer.as_mut())
            .with_context(|| format!("aio {} test", direction))?;
        let elapsed = start.elapsed();

        debug!(core_id = ctx.core_id, %direction, io_count = stat.io_count, "aio phase done");
        ctx.report(&format!(
            " aio {} through {:.3} MB/s",
            direction,
            calculate_bandwidth_mb(file_size, elapsed)
        ));
    }
    Ok(())
}

fn create_small_files(ctx: &mut CaseContext<'_>, _arg: u32) -> Result<()> {
    let storage = ctx.storage;
    let count = small_file_count(ctx.test_type, storage.statvfs()?.free_blocks);
    ctx.report(&format!(" # of files = {}", count));

    phase(ctx, "creating 4KB files", "file", count, |path| storage.mkfile(path, CLUSTER_SIZE))?;
    phase(ctx, "looking up 4KB files", "file", count, |path| storage.stat(path).map(|_| ()))?;
    phase(ctx, "deleting 4KB files", "file", count, |path| storage.remove(path))
}
