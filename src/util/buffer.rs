//! Aligned request buffers
//!
//! Direct I/O needs buffers aligned to the device's logical block size, so
//! every request payload comes from a [`BufferPool`] of cluster-aligned slots
//! allocated once before a run starts. The pool holds exactly one slot per
//! queue-depth entry (`io_size × qdepth` bytes in total).
//!
//! Free slots are handed out in FIFO order, which makes reuse round-robin
//! across the pool. A slot only becomes free again once the request using it
//! has completed, so two in-flight requests never share a buffer.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::VecDeque;

use crate::Result;

/// Memory-aligned buffer suitable for O_DIRECT operations
pub struct AlignedBuffer {
    ptr: *mut u8,
    size: usize,
    layout: Layout,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of `size` bytes aligned to `alignment`
    ///
    /// # Errors
    ///
    /// Returns an error if the alignment is not a power of two, the size is
    /// zero, or the allocation fails.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            anyhow::bail!("buffer alignment {} is not a power of 2", alignment);
        }
        if size == 0 {
            anyhow::bail!("buffer size must be greater than 0");
        }

        let layout = Layout::from_size_align(size, alignment)
            .map_err(|e| anyhow::anyhow!("invalid buffer layout ({} bytes, align {}): {}", size, alignment, e))?;

        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            anyhow::bail!("failed to allocate {} byte aligned buffer", size);
        }

        Ok(Self { ptr, size, layout })
    }

    #[inline(always)]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    #[inline(always)]
    pub fn is_aligned(&self) -> bool {
        (self.ptr as usize) % self.layout.align() == 0
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr, self.layout);
        }
    }
}

// AlignedBuffer is Send because it owns its memory
unsafe impl Send for AlignedBuffer {}

/// Fixed set of aligned request buffers, one per queue slot
pub struct BufferPool {
    buffers: Vec<AlignedBuffer>,
    available: VecDeque<usize>,
    buffer_size: usize,
}

impl BufferPool {
    /// Allocate `num_buffers` buffers of `buffer_size` bytes each
    pub fn new(num_buffers: usize, buffer_size: usize, alignment: usize) -> Result<Self> {
        if num_buffers == 0 {
            anyhow::bail!("buffer pool needs at least one buffer");
        }

        let mut buffers = Vec::with_capacity(num_buffers);
        for _ in 0..num_buffers {
            buffers.push(AlignedBuffer::new(buffer_size, alignment)?);
        }

        Ok(Self {
            buffers,
            available: (0..num_buffers).collect(),
            buffer_size,
        })
    }

    /// Fill every buffer with random bytes
    ///
    /// Called once before a write run so written data is not trivially
    /// compressible.
    pub fn prefill_random(&mut self) {
        use rand::RngCore;
        let mut rng = rand::thread_rng();

        for buffer in &mut self.buffers {
            rng.fill_bytes(buffer.as_mut_slice());
        }
    }

    /// Take the least recently released slot
    #[inline(always)]
    pub fn acquire(&mut self) -> Option<usize> {
        self.available.pop_front()
    }

    /// Give a slot back to the pool
    #[inline(always)]
    pub fn release(&mut self, slot: usize) {
        debug_assert!(slot < self.buffers.len(), "invalid buffer slot {}", slot);
        debug_assert!(!self.available.contains(&slot), "slot {} released twice", slot);
        self.available.push_back(slot);
    }

    /// Raw pointer handed to the kernel for `slot`
    #[inline(always)]
    pub fn slot_ptr(&mut self, slot: usize) -> *mut u8 {
        self.buffers[slot].as_mut_ptr()
    }

    #[inline]
    pub fn buffer(&self, slot: usize) -> &AlignedBuffer {
        &self.buffers[slot]
    }

    #[inline]
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    #[inline]
    pub fn total_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
