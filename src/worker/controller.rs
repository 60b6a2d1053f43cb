//! Test case execution
//!
//! [`run_test_case`] runs one I/O test case end to end against a
//! [`StorageApi`]: it opens (or creates) the target file, preallocates it,
//! drives the generate / submit / poll cycle through a [`QueueEngine`] until
//! the byte or time budget is spent, drains the queue and tears everything
//! down again.
//!
//! Teardown happens on every exit path. Locals are declared file handle
//! first, buffer pool second, queue last, so on an early return the queue
//! reaps its in-flight requests before the buffers they point into are freed,
//! and the file is flushed and closed after both.
//!
//! # Example
//!
//! ```no_run
//! use fsperf::engine::{EngineKind, OperationType};
//! use fsperf::storage::posix::PosixStorage;
//! use fsperf::worker::controller::{run_test_case, IoJob};
//! use fsperf::worker::progress::ConsoleProgress;
//!
//! let storage = PosixStorage::new("/mnt/test")?;
//! let job = IoJob {
//!     io_size: 131072,
//!     direction: OperationType::Write,
//!     ..IoJob::new("bench.dat", 1 << 30)
//! };
//!
//! let stat = run_test_case(&storage, &job, &mut ConsoleProgress::new(true))?;
//! println!("{:.0} IOPS", stat.iops());
//! # Ok::<(), anyhow::Error>(())
//! ```

use super::generator::RequestGenerator;
use super::progress::ProgressObserver;
use super::progress::ProgressTracker;
use crate::engine::queue::QueueEngine;
use crate::engine::{EngineKind, OperationType};
use crate::error::HarnessError;
use crate::stats::{CoreStat, CLUSTER_SIZE};
use crate::storage::{FileHandle, OpenFlags, StorageApi};
use crate::util::buffer::BufferPool;
use crate::util::fast_time::FastInstant;
use crate::util::resource::ResourceUsage;
use crate::Result;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters of one I/O test case
#[derive(Debug, Clone)]
pub struct IoJob {
    /// Target file, relative to the storage root
    pub file_name: PathBuf,
    /// Requested size; the preallocated size is what actually gets transferred
    pub file_size: u64,
    pub io_size: usize,
    pub qdepth: usize,
    pub direction: OperationType,
    pub random: bool,
    pub direct: bool,
    /// Stop submitting once this much time has passed
    pub runtime: Option<Duration>,
    pub engine: EngineKind,
    pub seed: Option<u64>,
}

impl IoJob {
    /// Sequential 4 KiB writes at queue depth 1 through libaio
    pub fn new(file_name: impl Into<PathBuf>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            io_size: CLUSTER_SIZE as usize,
            qdepth: 1,
            direction: OperationType::Write,
            random: false,
            direct: false,
            runtime: None,
            engine: EngineKind::Libaio,
            seed: None,
        }
    }
}

/// Open file that is flushed and closed however the run ends
struct OpenTarget<'a> {
    storage: &'a dyn StorageApi,
    handle: Option<FileHandle>,
}

impl<'a> OpenTarget<'a> {
    fn open(storage: &'a dyn StorageApi, path: &Path, direct: bool) -> Result<Self> {
        let handle = storage.open_or_create(path, OpenFlags { create: true, direct })?;
        Ok(Self {
            storage,
            handle: Some(handle),
        })
    }

    fn fd(&self) -> RawFd {
        self.handle.as_ref().map_or(-1, |h| h.fd)
    }

    /// Flush then close, reporting the first failure
    fn close(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                let flushed = self.storage.flush(&handle);
                let closed = self.storage.close(handle);
                flushed.and(closed)
            }
            None => Ok(()),
        }
    }
}

impl Drop for OpenTarget<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.storage.flush(&handle) {
                warn!("flush during teardown failed: {:#}", e);
            }
            if let Err(e) = self.storage.close(handle) {
                warn!("close during teardown failed: {:#}", e);
            }
        }
    }
}

/// Run one I/O test case and remove its file afterwards
///
/// The file is removed on the error path too, as far as that is possible;
/// the original error is the one returned.
pub fn run_test_case(storage: &dyn StorageApi, job: &IoJob, observer: &mut dyn ProgressObserver) -> Result<CoreStat> {
    match run_io(storage, job, observer) {
        Ok(stat) => {
            storage.remove(&job.file_name)?;
            Ok(stat)
        }
        Err(e) => {
            if let Err(cleanup) = storage.remove(&job.file_name) {
                debug!("removing {} after failure: {:#}", job.file_name.display(), cleanup);
            }
            Err(e)
        }
    }
}

fn run_io(storage: &dyn StorageApi, job: &IoJob, observer: &mut dyn ProgressObserver) -> Result<CoreStat> {
    if job.qdepth == 0 {
        return Err(HarnessError::argument("queue depth must be greater than 0").into());
    }

    info!(
        file = %job.file_name.display(),
        size_mb = job.file_size as f64 / (1024.0 * 1024.0),
        io_size = job.io_size,
        qdepth = job.qdepth,
        direction = %job.direction,
        direct = job.direct,
        "starting I/O test case"
    );

    let target = OpenTarget::open(storage, &job.file_name, job.direct)?;
    storage.preallocate(&job.file_name, 0, job.file_size)?;

    // Allocated size may differ from the requested one
    let extent = storage.stat(&job.file_name)?.size;
    if extent != job.file_size {
        debug!(requested = job.file_size, allocated = extent, "preallocated size differs");
    }

    let mut pool = BufferPool::new(job.qdepth, job.io_size, CLUSTER_SIZE as usize).map_err(|e| {
        HarnessError::resource(
            "buffer allocation",
            &job.file_name,
            std::io::Error::new(std::io::ErrorKind::OutOfMemory, format!("{:#}", e)),
        )
    })?;
    if job.direction == OperationType::Write {
        pool.prefill_random();
    }

    let backend = storage.queue_init(job.engine)?;
    let mut queue = QueueEngine::new(backend, target.fd(), job.qdepth, extent)?;
    let mut generator = RequestGenerator::new(extent, job.io_size, job.direction, job.random, job.seed);
    let mut progress = ProgressTracker::new(extent);
    let mut batch = Vec::with_capacity(job.qdepth);
    let capacity = job.qdepth;

    let usage_before = ResourceUsage::thread()?;
    queue.mark_start();
    let start = FastInstant::now();

    loop {
        let target_len = queue.free_slots();
        generator.fill(queue.state_mut(), &mut batch, target_len);
        queue.submit(&mut batch, &mut pool)?;

        // Everything issued; what is in flight gets drained
        if batch.is_empty() && queue.state().bytes_remaining == 0 {
            break;
        }

        queue.poll(1, capacity, &mut pool)?;
        if let Some(p) = progress.advance(queue.state().bytes_completed, start.elapsed()) {
            observer.on_progress(&p);
        }

        if let Some(runtime) = job.runtime {
            if FastInstant::now_coarse().duration_since(start) >= runtime {
                debug!(in_flight = queue.in_flight(), "time budget spent, draining");
                break;
            }
        }
    }

    queue.return_unissued(&mut batch);
    queue.drain_with(&mut pool, |queue| {
        if let Some(p) = progress.advance(queue.state().bytes_completed, start.elapsed()) {
            observer.on_progress(&p);
        }
    })?;

    let execution = start.elapsed();
    anyhow::ensure!(
        queue.in_flight() == 0,
        "{} requests still in flight after drain",
        queue.in_flight()
    );

    let mut stat = CoreStat::from_latency(queue.latency(), execution);
    let usage = ResourceUsage::thread()?.since(&usage_before);
    stat.user_time = usage.user_time;
    stat.system_time = usage.system_time;

    queue.finish()?;
    drop(queue);
    drop(pool);
    target.close()?;

    info!(
        io_count = stat.io_count,
        bytes = stat.total_bytes,
        elapsed = ?execution,
        "I/O test case complete"
    );

    Ok(stat)
}
