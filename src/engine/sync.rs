//! Synchronous I/O engine
//!
//! Blocking pread/pwrite performed inside `submit()`. Completions are queued
//! and handed back by the next `poll()`, so the queue engine drives this
//! backend exactly like an asynchronous one; it just never has more than a
//! batch of finished work waiting. Each completion carries the moment its
//! transfer finished, so time spent waiting for the reap is not latency.
//!
//! # Features
//!
//! - Positioned I/O, the file offset is never moved
//! - Works with O_DIRECT as long as buffers and offsets are cluster-aligned
//! - Partial transfers are retried until complete (or EOF for reads)
//!
//! # Example
//!
//! ```no_run
//! use fsperf::engine::{IOEngine, EngineConfig, IOOperation, OperationType};
//! use fsperf::engine::sync::SyncEngine;
//!
//! let mut engine = SyncEngine::new();
//! engine.init(&EngineConfig::default())?;
//!
//! let mut buffer = vec![0u8; 4096];
//! let op = IOOperation {
//!     op_type: OperationType::Read,
//!     target_fd: 3,
//!     offset: 0,
//!     buffer: buffer.as_mut_ptr(),
//!     length: 4096,
//!     user_data: 1,
//! };
//! engine.submit(&[op])?;
//!
//! // The read already happened; poll just returns it
//! let mut completions = Vec::new();
//! assert_eq!(engine.poll(1, 1, &mut completions)?, 1);
//! # Ok::<(), anyhow::Error>(())
//! ```

use super::{EngineCapabilities, EngineConfig, IOCompletion, IOEngine, IOOperation, OperationType};
use crate::util::fast_time::FastInstant;
use crate::Result;
use anyhow::Context;
use std::collections::VecDeque;

/// Blocking pread/pwrite backend
pub struct SyncEngine {
    queue_depth: usize,
    /// Finished operations not yet reaped
    completed: VecDeque<IOCompletion>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            queue_depth: 0,
            completed: VecDeque::new(),
        }
    }

    /// pread until `length` bytes are in, or EOF
    #[inline(always)]
    fn do_read(&self, fd: i32, buffer: *mut u8, length: usize, offset: u64) -> Result<usize> {
        let mut total_read = 0;
        let mut current_offset = offset;

        while total_read < length {
            let remaining = length - total_read;
            let buf_ptr = unsafe { buffer.add(total_read) };

            // SAFETY: the caller keeps the buffer valid for `length` bytes
            // until the completion is reaped
            let result = unsafe { libc::pread(fd, buf_ptr as *mut libc::c_void, remaining, current_offset as i64) };

            if result < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err).context(format!(
                    "pread failed: fd={}, offset={}, length={}",
                    fd, current_offset, remaining
                ));
            }

            if result == 0 {
                break;
            }

            total_read += result as usize;
            current_offset += result as u64;
        }

        Ok(total_read)
    }

    /// pwrite until all `length` bytes are out
    #[inline(always)]
    fn do_write(&self, fd: i32, buffer: *const u8, length: usize, offset: u64) -> Result<usize> {
        let mut total_written = 0;
        let mut current_offset = offset;

        while total_written < length {
            let remaining = length - total_written;
            let buf_ptr = unsafe { buffer.add(total_written) };

            // SAFETY: as in do_read
            let result =
                unsafe { libc::pwrite(fd, buf_ptr as *const libc::c_void, remaining, current_offset as i64) };

            if result < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err).context(format!(
                    "pwrite failed: fd={}, offset={}, length={}",
                    fd, current_offset, remaining
                ));
            }

            if result == 0 {
                anyhow::bail!("pwrite made no progress: fd={}, offset={}", fd, current_offset);
            }

            total_written += result as usize;
            current_offset += result as u64;
        }

        Ok(total_written)
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IOEngine for SyncEngine {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        if config.queue_depth == 0 {
            anyhow::bail!("sync queue depth must be at least 1");
        }
        self.queue_depth = config.queue_depth;
        self.completed = VecDeque::with_capacity(config.queue_depth);
        Ok(())
    }

    fn submit(&mut self, ops: &[IOOperation]) -> Result<usize> {
        if self.queue_depth == 0 {
            anyhow::bail!("sync engine used before init");
        }

        let room = self.queue_depth.saturating_sub(self.completed.len());
        let count = ops.len().min(room);

        for op in &ops[..count] {
            let result = match op.op_type {
                OperationType::Read => self.do_read(op.target_fd, op.buffer, op.length, op.offset),
                OperationType::Write => self.do_write(op.target_fd, op.buffer as *const u8, op.length, op.offset),
            };

            self.completed.push_back(IOCompletion {
                user_data: op.user_data,
                result,
                op_type: op.op_type,
                completed_at: Some(FastInstant::now()),
            });
        }

        Ok(count)
    }

    fn poll(&mut self, min: usize, max: usize, out: &mut Vec<IOCompletion>) -> Result<usize> {
        if min > self.completed.len() {
            anyhow::bail!(
                "asked to wait for {} completions with only {} in flight",
                min,
                self.completed.len()
            );
        }

        let count = max.min(self.completed.len());
        out.extend(self.completed.drain(..count));
        Ok(count)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.completed.clear();
        Ok(())
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            async_io: false,
            batch_submission: false,
            max_queue_depth: self.queue_depth.max(1),
        }
    }
}
