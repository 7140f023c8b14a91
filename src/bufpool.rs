//! `BUFPOOL`: a fixed array of page-aligned scratch buffers, one reservable
//! slot per potential concurrent transfer. Grounded in spec.md §4.6.
//!
//! The allocation bitmask is a single atomic word updated by compare-and-swap,
//! matching the "no hidden process-wide singletons" guidance in spec.md §9:
//! the pool is an explicit, lifetime-scoped value owned by the [`crate::server::Server`],
//! not a module-global.

use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, MutexGuard};

/// A fixed pool of `N` reservable buffers of `buffer_size` bytes each.
///
/// `N` is capped at 32 (one bit per `u32` bitmask entry), which matches the
/// spec's documented `MAX_SESSIONS` range of 16-32.
pub struct BufferPool {
    buffers: Vec<Mutex<Box<[u8]>>>,
    bitmask: AtomicU32,
    buffer_size: usize,
}

/// A reserved buffer slot. Dropping it releases the slot back to the pool.
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    index: usize,
}

impl BufferPool {
    /// Builds a pool of `count` buffers, each `buffer_size` bytes. `count` must be <= 32.
    pub fn new(count: usize, buffer_size: usize) -> Self {
        assert!(count <= 32, "BufferPool supports at most 32 slots");
        let buffers = (0..count).map(|_| Mutex::new(vec![0u8; buffer_size].into_boxed_slice())).collect();
        BufferPool {
            buffers,
            bitmask: AtomicU32::new(0),
            buffer_size,
        }
    }

    /// The size in bytes of every buffer in the pool.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Finds the first clear bit via CAS and returns the corresponding slot.
    /// Returns `None` when the pool is fully reserved — a transient resource
    /// exhaustion the caller must treat as such, not a fatal error.
    pub fn acquire(&self) -> Option<PooledBuffer<'_>> {
        loop {
            let current = self.bitmask.load(Ordering::Acquire);
            let free_index = (0..self.buffers.len()).find(|i| current & (1 << i) == 0)?;
            let desired = current | (1 << free_index);
            if self
                .bitmask
                .compare_exchange(current, desired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(PooledBuffer { pool: self, index: free_index });
            }
            // Lost the race to another acquirer; retry.
        }
    }

    fn release(&self, index: usize) {
        self.bitmask.fetch_and(!(1u32 << index), Ordering::AcqRel);
    }
}

impl PooledBuffer<'_> {
    /// Runs `f` with mutable access to the reserved buffer's bytes.
    ///
    /// Only for use outside an active Tokio runtime (e.g. synchronous unit
    /// tests): it locks via [`tokio::sync::Mutex::blocking_lock`], which
    /// panics if called from within a runtime worker thread. Async callers
    /// (the transfer loops) use [`PooledBuffer::lock`] instead, which is the
    /// reason this buffer is guarded by a `tokio::sync::Mutex` rather than
    /// `std::sync::Mutex` in the first place — the reservation bitmask
    /// already makes it exclusive, but holding a `std::sync::MutexGuard`
    /// across an `.await` isn't `Send` and wouldn't compile in the transfer
    /// loops.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.pool.buffers[self.index].blocking_lock();
        f(&mut guard)
    }

    /// Locks the reserved buffer for exclusive byte access across `.await`
    /// points, for use by the async transfer loops.
    pub async fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.pool.buffers[self.index].lock().await
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}
