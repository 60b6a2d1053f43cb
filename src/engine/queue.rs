//! Bounded queue engine
//!
//! [`QueueEngine`] drives one [`IOEngine`] backend for the length of a test
//! case. It owns the request arena, enforces the queue depth, stamps every
//! request at issue time and does the per-completion accounting.
//!
//! # State machine
//!
//! ```text
//! Idle -> Submitting -> WaitingCompletion -> Submitting -> ... -> Draining -> Done
//! ```
//!
//! - `submit()` moves to `Submitting`, `poll()` to `WaitingCompletion`
//! - `begin_drain()` moves to `Draining` once the byte budget is spent or the
//!   time budget has elapsed; from then on only `poll()` is legal
//! - `finish()` requires an empty queue, tears the backend down and moves to
//!   `Done`
//!
//! # Arena
//!
//! The arena has exactly `capacity` slots. A request occupies the slot whose
//! index equals the buffer slot it got from the [`BufferPool`]; both are
//! released together when its completion is accounted. The slot index rides
//! through the backend as `user_data`, so completions can arrive in any order.
//!
//! Dropping an engine that never reached `Done` reaps whatever is still in
//! flight before tearing the backend down, so an error path can never leave
//! the kernel writing into freed buffers.

use super::{EngineConfig, IOCompletion, IOEngine, IOOperation, OperationType};
use crate::error::HarnessError;
use crate::stats::LatencyAccumulator;
use crate::util::buffer::BufferPool;
use crate::util::fast_time::FastInstant;
use crate::Result;
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

/// Lifecycle of a [`QueueEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Submitting,
    WaitingCompletion,
    Draining,
    Done,
}

/// Counters shared between the generator and the queue engine
///
/// `bytes_remaining` is the part of the byte budget not yet issued; it only
/// ever goes down. `bytes_completed` grows as completions are accounted.
#[derive(Debug, Clone)]
pub struct QueueState {
    pub capacity: usize,
    pub in_flight: usize,
    pub bytes_remaining: u64,
    pub bytes_completed: u64,
    pub start: FastInstant,
}

/// What the generator hands the queue: where, how much, which way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoDescriptor {
    pub offset: u64,
    pub length: usize,
    pub direction: OperationType,
}

/// A request admitted into the arena
#[derive(Debug, Clone, Copy)]
pub struct IoRequest {
    pub offset: u64,
    pub length: usize,
    pub direction: OperationType,
    pub slot: usize,
    pub issue_ticks: FastInstant,
}

pub struct QueueEngine {
    backend: Box<dyn IOEngine>,
    fd: RawFd,
    phase: EnginePhase,
    state: QueueState,
    arena: Vec<Option<IoRequest>>,
    latency: LatencyAccumulator,

    ops: Vec<IOOperation>,
    completions: Vec<IOCompletion>,
}

impl QueueEngine {
    /// Initialize `backend` for `capacity` outstanding requests against `fd`
    ///
    /// Fails with a queue error if the backend cannot be initialized.
    pub fn new(mut backend: Box<dyn IOEngine>, fd: RawFd, capacity: usize, total_bytes: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(HarnessError::argument("queue depth must be greater than 0").into());
        }

        backend
            .init(&EngineConfig { queue_depth: capacity })
            .map_err(|e| HarnessError::queue("init", &e))?;

        debug!(capacity, total_bytes, fd, "queue initialized");

        Ok(Self {
            backend,
            fd,
            phase: EnginePhase::Idle,
            state: QueueState {
                capacity,
                in_flight: 0,
                bytes_remaining: total_bytes,
                bytes_completed: 0,
                start: FastInstant::now(),
            },
            arena: vec![None; capacity],
            latency: LatencyAccumulator::new(),
            ops: Vec::with_capacity(capacity),
            completions: Vec::with_capacity(capacity),
        })
    }

    /// Restart the run clock, called right before the first submit
    pub fn mark_start(&mut self) {
        self.state.start = FastInstant::now();
    }

    /// Submit the front of `batch`
    ///
    /// Admits at most `capacity - in_flight` descriptors; the admitted prefix
    /// is removed from `batch` and whatever the queue could not take stays
    /// there for the next call. An empty batch, or a full queue, is a no-op.
    /// Returns the number of requests now in flight that were not before.
    pub fn submit(&mut self, batch: &mut Vec<IoDescriptor>, pool: &mut BufferPool) -> Result<usize> {
        match self.phase {
            EnginePhase::Draining | EnginePhase::Done => {
                anyhow::bail!("submit called in {:?} phase", self.phase);
            }
            _ => self.phase = EnginePhase::Submitting,
        }

        let room = self.state.capacity - self.state.in_flight;
        let wanted = batch.len().min(room);
        if wanted == 0 {
            return Ok(0);
        }

        self.ops.clear();
        for desc in &batch[..wanted] {
            let Some(slot) = pool.acquire() else { break };
            debug_assert!(self.arena[slot].is_none(), "arena slot {} already busy", slot);

            self.arena[slot] = Some(IoRequest {
                offset: desc.offset,
                length: desc.length,
                direction: desc.direction,
                slot,
                issue_ticks: FastInstant::now(),
            });
            self.ops.push(IOOperation {
                op_type: desc.direction,
                target_fd: self.fd,
                offset: desc.offset,
                buffer: pool.slot_ptr(slot),
                length: desc.length,
                user_data: slot as u64,
            });
        }

        let result = self.backend.submit(&self.ops);
        let accepted = match &result {
            Ok(n) => (*n).min(self.ops.len()),
            Err(_) => 0,
        };

        // Anything the backend did not take gives its slot back
        for op in &self.ops[accepted..] {
            let slot = op.user_data as usize;
            self.arena[slot] = None;
            pool.release(slot);
        }

        self.state.in_flight += accepted;
        batch.drain(..accepted);

        if let Err(e) = result {
            return Err(HarnessError::queue("submit", &e).into());
        }
        Ok(accepted)
    }

    /// Reap between `min` and `max` completions and account them
    ///
    /// `min` is clamped to the number in flight so the call never waits for
    /// completions that cannot come. A failed request is still accounted
    /// and its slot released; the first failure is then returned as a queue
    /// error once the whole batch has been processed.
    pub fn poll(&mut self, min: usize, max: usize, pool: &mut BufferPool) -> Result<usize> {
        if self.phase == EnginePhase::Done {
            anyhow::bail!("poll called after the queue was released");
        }
        if self.phase != EnginePhase::Draining {
            self.phase = EnginePhase::WaitingCompletion;
        }

        if self.state.in_flight == 0 {
            return Ok(0);
        }
        let min = min.min(self.state.in_flight);
        let max = max.max(min);

        self.completions.clear();
        self.backend
            .poll(min, max, &mut self.completions)
            .map_err(|e| HarnessError::queue("poll", &e))?;

        let now = FastInstant::now();
        let mut first_error = None;
        let reaped = self.completions.len();

        for completion in self.completions.drain(..) {
            let slot = completion.user_data as usize;
            let request = self
                .arena
                .get_mut(slot)
                .and_then(Option::take)
                .ok_or_else(|| anyhow::anyhow!("completion for unknown slot {}", slot))?;

            pool.release(request.slot);
            self.state.in_flight -= 1;

            match completion.result {
                Ok(bytes) => {
                    if bytes != request.length {
                        warn!(offset = request.offset, expected = request.length, bytes, "short transfer");
                    }
                    self.state.bytes_completed += bytes as u64;
                    let done = completion.completed_at.unwrap_or(now);
                    self.latency.record(bytes as u64, done.ticks_since(request.issue_ticks));
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e.context(format!(
                            "{} of {} bytes at offset {}",
                            request.direction, request.length, request.offset
                        )));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(HarnessError::queue("completion", &e).into());
        }
        Ok(reaped)
    }

    /// Give the bytes of descriptors generated but never admitted back to the
    /// budget, emptying `batch`
    pub fn return_unissued(&mut self, batch: &mut Vec<IoDescriptor>) {
        let unissued: u64 = batch.drain(..).map(|desc| desc.length as u64).sum();
        self.state.bytes_remaining += unissued;
    }

    /// Stop admitting new requests
    pub fn begin_drain(&mut self) {
        if self.phase != EnginePhase::Done {
            self.phase = EnginePhase::Draining;
        }
    }

    /// Poll until nothing is in flight
    pub fn drain(&mut self, pool: &mut BufferPool) -> Result<()> {
        self.drain_with(pool, |_| {})
    }

    /// Poll until nothing is in flight, calling `on_reap` after every poll
    pub fn drain_with<F>(&mut self, pool: &mut BufferPool, mut on_reap: F) -> Result<()>
    where
        F: FnMut(&QueueEngine),
    {
        self.begin_drain();
        while self.state.in_flight > 0 {
            self.poll(1, self.state.capacity, pool)?;
            on_reap(self);
        }
        Ok(())
    }

    /// Release the backend; only legal with an empty queue
    pub fn finish(&mut self) -> Result<()> {
        anyhow::ensure!(
            self.state.in_flight == 0,
            "queue released with {} requests in flight",
            self.state.in_flight
        );
        if self.phase == EnginePhase::Done {
            return Ok(());
        }
        self.phase = EnginePhase::Done;
        self.backend
            .cleanup()
            .map_err(|e| HarnessError::queue("deinit", &e))?;
        Ok(())
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut QueueState {
        &mut self.state
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight
    }

    pub fn free_slots(&self) -> usize {
        self.state.capacity - self.state.in_flight
    }

    pub fn latency(&self) -> &LatencyAccumulator {
        &self.latency
    }
}

impl Drop for QueueEngine {
    fn drop(&mut self) {
        if self.phase == EnginePhase::Done {
            return;
        }

        // Reap without a pool: the buffers outlive this engine
        while self.state.in_flight > 0 {
            self.completions.clear();
            match self.backend.poll(1, self.state.capacity, &mut self.completions) {
                Ok(n) => self.state.in_flight = self.state.in_flight.saturating_sub(n),
                Err(e) => {
                    warn!("abandoning {} in-flight requests: {:#}", self.state.in_flight, e);
                    break;
                }
            }
        }

        if let Err(e) = self.backend.cleanup() {
            warn!("queue teardown failed: {:#}", e);
        }
    }
}
