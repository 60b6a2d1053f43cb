//! Storage collaborator
//!
//! Everything the harness does to the storage engine goes through
//! [`StorageApi`]: file and directory lifecycle, space allocation, attribute
//! lookup, free-space queries and handing out I/O queues. The harness only
//! exercises these calls and measures them; it never implements storage
//! semantics itself.
//!
//! # Implementations
//!
//! - [`posix::PosixStorage`]: a directory on a local filesystem, driven
//!   through libc
//! - [`memory::MemStorage`]: an in-memory namespace with fault injection,
//!   paired with [`crate::engine::mock::MockEngine`] queues
//!
//! Paths given to a `StorageApi` are relative to the storage root.
//!
//! # Device accounting
//!
//! Every queue a storage hands out is wrapped in a [`MeteredEngine`] that
//! counts completed transfers in cluster units into the storage's
//! [`DeviceCounters`], which is what `device_counters()` reports.

use crate::engine::{EngineCapabilities, EngineConfig, EngineKind, IOCompletion, IOEngine, IOOperation, OperationType};
use crate::stats::{AlignedCounter, DeviceStat, IpcStat};
use crate::Result;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod memory;
pub mod posix;

pub use crate::stats::CLUSTER_SIZE;

/// How a file is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the file if it does not exist
    pub create: bool,
    /// Bypass the page cache (O_DIRECT)
    pub direct: bool,
}

/// An open file
#[derive(Debug)]
pub struct FileHandle {
    pub fd: RawFd,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    pub is_dir: bool,
}

/// Free space of the filesystem backing a storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStat {
    /// Free space in cluster units
    pub free_blocks: u64,
    pub free_inodes: u64,
}

/// Operations the harness consumes from the storage engine
pub trait StorageApi: Send {
    fn open_or_create(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle>;

    /// Allocate `[offset, offset + length)` of the file at `path`
    fn preallocate(&self, path: &Path, offset: u64, length: u64) -> Result<()>;

    fn stat(&self, path: &Path) -> Result<FileAttr>;

    /// Synchronous flush of data and metadata
    fn flush(&self, file: &FileHandle) -> Result<()>;

    fn close(&self, file: FileHandle) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;

    fn mkdir(&self, path: &Path) -> Result<()>;

    fn rmdir(&self, path: &Path) -> Result<()>;

    /// Create a file holding `size` bytes and flush it
    fn mkfile(&self, path: &Path, size: u64) -> Result<()>;

    fn statvfs(&self) -> Result<FsStat>;

    /// Hand out a queue backend of the given kind
    ///
    /// The backend is not initialized yet; the queue engine sizes it to its
    /// depth.
    fn queue_init(&self, kind: EngineKind) -> Result<Box<dyn IOEngine>>;

    /// Device I/O done through this storage so far
    fn device_counters(&self) -> DeviceStat;

    /// Latencies of calls into a storage service process, if there is one
    fn ipc_counters(&self) -> Option<IpcStat>;
}

/// Device I/O counters in cluster units
#[derive(Debug, Default)]
pub struct DeviceCounters {
    read_clusters: AlignedCounter,
    write_clusters: AlignedCounter,
}

impl DeviceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account a transfer of `bytes`, rounded up to whole clusters
    #[inline]
    pub fn record(&self, direction: OperationType, bytes: u64) {
        let clusters = bytes.div_ceil(CLUSTER_SIZE);
        match direction {
            OperationType::Read => self.read_clusters.add(clusters),
            OperationType::Write => self.write_clusters.add(clusters),
        }
    }

    pub fn snapshot(&self) -> DeviceStat {
        let read = self.read_clusters.get();
        let write = self.write_clusters.get();
        DeviceStat {
            total_io_count: read + write,
            read_io_count: read,
            write_io_count: write,
        }
    }

    pub fn reset(&self) {
        self.read_clusters.set(0);
        self.write_clusters.set(0);
    }
}

/// Backend wrapper that feeds completed transfers into [`DeviceCounters`]
pub struct MeteredEngine {
    inner: Box<dyn IOEngine>,
    counters: Arc<DeviceCounters>,
}

impl MeteredEngine {
    pub fn new(inner: Box<dyn IOEngine>, counters: Arc<DeviceCounters>) -> Self {
        Self { inner, counters }
    }
}

impl IOEngine for MeteredEngine {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        self.inner.init(config)
    }

    fn submit(&mut self, ops: &[IOOperation]) -> Result<usize> {
        self.inner.submit(ops)
    }

    fn poll(&mut self, min: usize, max: usize, out: &mut Vec<IOCompletion>) -> Result<usize> {
        let first = out.len();
        let reaped = self.inner.poll(min, max, out)?;
        for completion in &out[first..] {
            if let Ok(bytes) = completion.result {
                self.counters.record(completion.op_type, bytes as u64);
            }
        }
        Ok(reaped)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.inner.cleanup()
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.inner.capabilities()
    }
}
