//! Mock I/O engine for testing
//!
//! Simulates a queue without touching any file. Every clone shares the same
//! state, so a test can keep a handle to inspect what a queue engine did with
//! the copy it was given.
//!
//! # Features
//!
//! - Records every accepted operation
//! - Tracks the highest number of operations ever in flight at once
//! - Fault injection: failing init, failing submit, failing completions
//! - Partial batch acceptance and out-of-order completion
//!
//! # Example
//!
//! ```
//! use fsperf::engine::{IOEngine, EngineConfig, IOOperation, OperationType};
//! use fsperf::engine::mock::MockEngine;
//!
//! let mut engine = MockEngine::new();
//! let observer = engine.clone();
//! engine.init(&EngineConfig { queue_depth: 4 })?;
//!
//! let op = IOOperation {
//!     op_type: OperationType::Read,
//!     target_fd: 1,
//!     offset: 0,
//!     buffer: std::ptr::null_mut(),
//!     length: 4096,
//!     user_data: 42,
//! };
//! engine.submit(&[op])?;
//!
//! let mut completions = Vec::new();
//! engine.poll(1, 4, &mut completions)?;
//! assert_eq!(completions[0].user_data, 42);
//! assert_eq!(observer.submitted_count(), 1);
//! # Ok::<(), anyhow::Error>(())
//! ```

use super::{EngineCapabilities, EngineConfig, IOCompletion, IOEngine, IOOperation, OperationType};
use crate::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Record of an accepted operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub op_type: OperationType,
    pub target_fd: i32,
    pub offset: u64,
    pub length: usize,
    pub user_data: u64,
}

#[derive(Default)]
struct MockState {
    queue_depth: usize,
    pending: VecDeque<OperationRecord>,
    submitted: Vec<OperationRecord>,
    max_in_flight: usize,
    init_calls: usize,
    cleanup_calls: usize,

    fail_init: bool,
    /// Submit errors once this many operations have been accepted in total
    fail_submit_after: Option<usize>,
    /// Completions for operations at this offset carry an error
    fail_offset: Option<u64>,
    /// Fail every completion
    fail_completions: bool,
    /// Reap newest first
    reverse_completion: bool,
    /// Cap on completions returned by one poll
    max_per_poll: Option<usize>,
    /// Cap on operations accepted by one submit
    accept_limit: Option<usize>,
}

/// In-memory queue backend
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.state().fail_init = fail;
    }

    /// Make `submit` error once `accepted` operations have gone through
    pub fn set_fail_submit_after(&self, accepted: Option<usize>) {
        self.state().fail_submit_after = accepted;
    }

    /// Complete the operation at `offset` with an I/O error
    pub fn set_fail_offset(&self, offset: Option<u64>) {
        self.state().fail_offset = offset;
    }

    pub fn set_fail_completions(&self, fail: bool) {
        self.state().fail_completions = fail;
    }

    pub fn set_reverse_completion(&self, reverse: bool) {
        self.state().reverse_completion = reverse;
    }

    pub fn set_max_per_poll(&self, max: Option<usize>) {
        self.state().max_per_poll = max;
    }

    pub fn set_accept_limit(&self, limit: Option<usize>) {
        self.state().accept_limit = limit;
    }

    pub fn submitted_operations(&self) -> Vec<OperationRecord> {
        self.state().submitted.clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.state().submitted.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Highest number of operations ever outstanding at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn init_calls(&self) -> usize {
        self.state().init_calls
    }

    pub fn cleanup_calls(&self) -> usize {
        self.state().cleanup_calls
    }
}

impl IOEngine for MockEngine {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        let mut state = self.state();
        if state.fail_init {
            anyhow::bail!("mock queue init failure");
        }
        if config.queue_depth == 0 {
            anyhow::bail!("mock queue depth must be at least 1");
        }
        state.queue_depth = config.queue_depth;
        state.init_calls += 1;
        Ok(())
    }

    fn submit(&mut self, ops: &[IOOperation]) -> Result<usize> {
        let mut state = self.state();
        if state.queue_depth == 0 {
            anyhow::bail!("mock engine used before init");
        }

        let room = state.queue_depth.saturating_sub(state.pending.len());
        let mut count = ops.len().min(room);
        if let Some(limit) = state.accept_limit {
            count = count.min(limit);
        }

        if let Some(after) = state.fail_submit_after {
            let accepted = state.submitted.len();
            if accepted + count > after {
                // Take what fits under the threshold, then report the failure
                let fits = after.saturating_sub(accepted);
                if fits == 0 {
                    anyhow::bail!("mock submit failure after {} operations", after);
                }
                count = count.min(fits);
            }
        }

        for op in &ops[..count] {
            let record = OperationRecord {
                op_type: op.op_type,
                target_fd: op.target_fd,
                offset: op.offset,
                length: op.length,
                user_data: op.user_data,
            };
            state.submitted.push(record.clone());
            state.pending.push_back(record);
        }
        state.max_in_flight = state.max_in_flight.max(state.pending.len());

        Ok(count)
    }

    fn poll(&mut self, min: usize, max: usize, out: &mut Vec<IOCompletion>) -> Result<usize> {
        let mut state = self.state();
        if min > state.pending.len() {
            anyhow::bail!(
                "asked to wait for {} completions with only {} in flight",
                min,
                state.pending.len()
            );
        }

        let mut count = max.min(state.pending.len());
        if let Some(cap) = state.max_per_poll {
            count = count.min(cap.max(min));
        }

        for _ in 0..count {
            let record = if state.reverse_completion {
                state.pending.pop_back()
            } else {
                state.pending.pop_front()
            };
            let Some(record) = record else { break };

            let failed = state.fail_completions || state.fail_offset == Some(record.offset);
            let result = if failed {
                Err(anyhow::Error::new(std::io::Error::from_raw_os_error(libc::EIO))
                    .context(format!("mock {} failed at offset {}", record.op_type, record.offset)))
            } else {
                Ok(record.length)
            };

            out.push(IOCompletion {
                user_data: record.user_data,
                result,
                op_type: record.op_type,
                completed_at: None,
            });
        }

        Ok(count)
    }

    fn cleanup(&mut self) -> Result<()> {
        let mut state = self.state();
        state.pending.clear();
        state.cleanup_calls += 1;
        Ok(())
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            async_io: true,
            batch_submission: true,
            max_queue_depth: self.state().queue_depth,
        }
    }
}
