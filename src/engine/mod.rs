//! I/O queue backends and the bounded queue engine
//!
//! An [`IOEngine`] is the raw queue primitive a storage collaborator hands
//! out from `queue_init`: it accepts batches of operations and reports
//! completions, nothing more. It knows nothing about budgets, buffers or
//! statistics.
//!
//! [`queue::QueueEngine`] sits on top of one backend and enforces the queue
//! depth, owns the request arena, and does the per-completion accounting.
//!
//! # Backends
//!
//! - **libaio**: Linux kernel AIO via raw syscalls (batch submit, polled reap)
//! - **sync**: blocking pread/pwrite performed at submit time
//! - **mock**: in-memory backend with fault injection for tests
//!
//! # Example
//!
//! ```no_run
//! use fsperf::engine::{IOEngine, EngineConfig, IOOperation, OperationType};
//! use fsperf::engine::sync::SyncEngine;
//!
//! let mut engine = SyncEngine::new();
//! engine.init(&EngineConfig { queue_depth: 4 })?;
//!
//! let mut buffer = vec![0u8; 4096];
//! let ops = [IOOperation {
//!     op_type: OperationType::Read,
//!     target_fd: 3,
//!     offset: 0,
//!     buffer: buffer.as_mut_ptr(),
//!     length: buffer.len(),
//!     user_data: 0,
//! }];
//! let accepted = engine.submit(&ops)?;
//!
//! let mut completions = Vec::new();
//! engine.poll(accepted, 4, &mut completions)?;
//! engine.cleanup()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::util::fast_time::FastInstant;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;

pub mod mock;
pub mod queue;
pub mod sync;

#[cfg(target_os = "linux")]
pub mod libaio;

/// Queue primitive implemented by every backend
///
/// # Lifecycle
///
/// 1. `init()` once with the queue depth (`queue_init`)
/// 2. any interleaving of `submit()` and `poll()`
/// 3. `cleanup()` once every submitted operation has been reaped (`queue_deinit`)
///
/// Engines are `Send` so a worker thread can own one; they are never shared.
pub trait IOEngine: Send {
    /// Prepare kernel/user structures for up to `queue_depth` operations
    fn init(&mut self, config: &EngineConfig) -> Result<()>;

    /// Submit a batch of operations
    ///
    /// Returns how many operations from the front of `ops` were accepted,
    /// which may be fewer than `ops.len()` if the backend is momentarily
    /// full. Accepted operations will each produce exactly one completion.
    ///
    /// # Safety contract
    ///
    /// Every buffer pointer must stay valid and untouched by the caller until
    /// the matching completion has been returned by `poll()`.
    fn submit(&mut self, ops: &[IOOperation]) -> Result<usize>;

    /// Reap completions
    ///
    /// Waits (by polling, not sleeping) until at least `min` completions are
    /// available, then appends up to `max` of them to `out` and returns how
    /// many were appended. Callers must not ask for more than are in flight.
    fn poll(&mut self, min: usize, max: usize, out: &mut Vec<IOCompletion>) -> Result<usize>;

    /// Release backend resources
    fn cleanup(&mut self) -> Result<()>;

    fn capabilities(&self) -> EngineCapabilities;
}

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Linux native AIO
    Libaio,
    /// Blocking pread/pwrite
    Sync,
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Libaio
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Libaio => write!(f, "libaio"),
            EngineKind::Sync => write!(f, "sync"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "libaio" => Ok(EngineKind::Libaio),
            "sync" => Ok(EngineKind::Sync),
            other => anyhow::bail!("unknown ioengine '{}' (expected libaio or sync)", other),
        }
    }
}

/// Create an uninitialized backend of the given kind
pub fn create_engine(kind: EngineKind) -> Result<Box<dyn IOEngine>> {
    match kind {
        EngineKind::Sync => Ok(Box::new(sync::SyncEngine::new())),
        #[cfg(target_os = "linux")]
        EngineKind::Libaio => Ok(Box::new(libaio::LibaioEngine::new())),
        #[cfg(not(target_os = "linux"))]
        EngineKind::Libaio => anyhow::bail!("libaio is only available on Linux"),
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of outstanding operations
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { queue_depth: 32 }
    }
}

/// One operation as seen by a backend
///
/// The buffer pointer must be valid and suitably aligned (cluster-aligned
/// for O_DIRECT) until the operation completes.
#[derive(Debug, Clone, Copy)]
pub struct IOOperation {
    pub op_type: OperationType,
    pub target_fd: RawFd,
    pub offset: u64,
    pub buffer: *mut u8,
    pub length: usize,
    /// Echoed back in the completion; the queue engine stores the slot index here
    pub user_data: u64,
}

// Safety: IOOperation contains a raw pointer but is only used within a single thread
// and the pointer lifetime is managed by the caller
unsafe impl Send for IOOperation {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Read,
    Write,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Read => write!(f, "read"),
            OperationType::Write => write!(f, "write"),
        }
    }
}

/// Result of one operation
#[derive(Debug)]
pub struct IOCompletion {
    pub user_data: u64,
    /// Bytes transferred, or the error the operation failed with
    pub result: Result<usize>,
    pub op_type: OperationType,
    /// When the transfer finished, for backends that do the work before
    /// `poll()`; `None` means at reap time
    pub completed_at: Option<FastInstant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// Operations can overlap in flight
    pub async_io: bool,
    /// Several operations go to the kernel in one call
    pub batch_submission: bool,
    pub max_queue_depth: usize,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            async_io: false,
            batch_submission: false,
            max_queue_depth: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("libaio".parse::<EngineKind>().unwrap(), EngineKind::Libaio);
        assert_eq!("sync".parse::<EngineKind>().unwrap(), EngineKind::Sync);
        assert!("io_uring".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::Libaio.to_string(), "libaio");
    }

    #[test]
    fn test_create_sync_engine() {
        let engine = create_engine(EngineKind::Sync).unwrap();
        assert!(!engine.capabilities().async_io);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_create_libaio_engine() {
        let engine = create_engine(EngineKind::Libaio).unwrap();
        assert!(engine.capabilities().async_io);
    }
}
