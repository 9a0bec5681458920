//! Activity buffers
//!
//! The runtime asks for empty storage, fills it with encoded activity records
//! and hands it back. An [`ActivityBuffer`] owns one such region from the
//! moment it is acquired until it is dropped; the allocation is freed in
//! `Drop`, so every buffer is released exactly once whatever path it takes.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::error::TraceError;
use crate::metrics;

/// Default capacity of a buffer handed to the runtime
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Alignment the runtime requires for activity buffers
pub const BUFFER_ALIGN: usize = 8;

/// Counters shared by an allocator and every buffer it handed out
#[derive(Debug, Default)]
pub struct BufferStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl BufferStats {
    /// Buffers handed out so far
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Acquire)
    }

    /// Buffers freed so far
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Buffers currently owned by the runtime or being decoded
    pub fn outstanding(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

/// An owned, aligned, fixed-capacity activity buffer
#[derive(Debug)]
pub struct ActivityBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    stats: Arc<BufferStats>,
}

// Safety: the buffer exclusively owns its allocation.
unsafe impl Send for ActivityBuffer {}

impl ActivityBuffer {
    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start address of the buffer
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: ptr is valid for `capacity` initialized (zeroed) bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }

    /// Give up ownership so the region can cross the FFI boundary
    ///
    /// The region must come back through [`BufferAllocator::reclaim`] or
    /// [`release_raw`], otherwise it leaks.
    pub fn into_raw(self) -> (NonNull<u8>, usize) {
        let this = std::mem::ManuallyDrop::new(self);
        // Safety: `this` is never dropped, so the stats handle is moved out once.
        let _stats = unsafe { std::ptr::read(&this.stats) };
        (this.ptr, this.capacity)
    }
}

impl Drop for ActivityBuffer {
    fn drop(&mut self) {
        trace!("releasing activity buffer {:p}", self.ptr);
        // Safety: capacity was validated when the buffer was acquired.
        unsafe { release_raw(self.ptr, self.capacity) };
        self.stats.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// Free a region previously produced by [`ActivityBuffer::into_raw`]
///
/// # Safety
/// `ptr` must come from a buffer of exactly `capacity` bytes that has not been
/// released yet.
pub unsafe fn release_raw(ptr: NonNull<u8>, capacity: usize) {
    let layout = Layout::from_size_align_unchecked(capacity, BUFFER_ALIGN);
    dealloc(ptr.as_ptr(), layout);
    metrics::BUFFERS_RELEASED.inc();
}

/// Hands out fresh activity buffers of a fixed capacity
#[derive(Debug)]
pub struct BufferAllocator {
    layout: Layout,
    stats: Arc<BufferStats>,
}

impl BufferAllocator {
    /// Create an allocator for buffers of `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self, TraceError> {
        if capacity == 0 {
            return Err(TraceError::Config("buffer capacity must be non-zero".into()));
        }
        let layout = Layout::from_size_align(capacity, BUFFER_ALIGN)
            .map_err(|e| TraceError::Config(format!("invalid buffer layout: {}", e)))?;

        Ok(Self {
            layout,
            stats: Arc::new(BufferStats::default()),
        })
    }

    /// Capacity of every buffer this allocator hands out
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    pub fn stats(&self) -> &Arc<BufferStats> {
        &self.stats
    }

    /// Allocate a fresh zeroed buffer
    ///
    /// Out of memory aborts the process: this runs inside runtime callbacks
    /// that have no way to report failure.
    pub fn acquire(&self) -> ActivityBuffer {
        // Safety: the layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(self.layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(self.layout));

        self.stats.acquired.fetch_add(1, Ordering::AcqRel);
        metrics::BUFFERS_REQUESTED.inc();
        trace!("acquired activity buffer {:p} ({} bytes)", ptr, self.capacity());

        ActivityBuffer {
            ptr,
            capacity: self.capacity(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Take back ownership of a region released with [`ActivityBuffer::into_raw`]
    ///
    /// # Safety
    /// `ptr` and `capacity` must be exactly what `into_raw` returned for a
    /// buffer acquired from this allocator, and the region must not have been
    /// reclaimed before.
    pub unsafe fn reclaim(&self, ptr: NonNull<u8>, capacity: usize) -> ActivityBuffer {
        ActivityBuffer {
            ptr,
            capacity,
            stats: Arc::clone(&self.stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_aligned_and_zeroed() {
        let allocator = BufferAllocator::new(DEFAULT_BUFFER_SIZE).unwrap();
        let buffer = allocator.acquire();

        assert_eq!(buffer.capacity(), 32 * 1024);
        assert_eq!(buffer.as_ptr() as usize % BUFFER_ALIGN, 0);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_drop_releases_once() {
        let allocator = BufferAllocator::new(4096).unwrap();
        let first = allocator.acquire();
        let second = allocator.acquire();
        assert_eq!(allocator.stats().outstanding(), 2);

        drop(first);
        assert_eq!(allocator.stats().released(), 1);
        drop(second);
        assert_eq!(allocator.stats().released(), 2);
        assert_eq!(allocator.stats().outstanding(), 0);
    }

    #[test]
    fn test_raw_round_trip_keeps_contents() {
        let allocator = BufferAllocator::new(1024).unwrap();
        let mut buffer = allocator.acquire();
        buffer.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);

        let (ptr, capacity) = buffer.into_raw();
        assert_eq!(allocator.stats().released(), 0);

        let buffer = unsafe { allocator.reclaim(ptr, capacity) };
        assert_eq!(&buffer.as_slice()[..4], &[1, 2, 3, 4]);
        drop(buffer);
        assert_eq!(allocator.stats().released(), 1);
    }

    #[test]
    fn test_raw_release_counts_in_metrics() {
        let allocator = BufferAllocator::new(1024).unwrap();
        let (ptr, capacity) = allocator.acquire().into_raw();

        let before = metrics::BUFFERS_RELEASED.get();
        unsafe { release_raw(ptr, capacity) };
        // Other tests share the global counter
        assert!(metrics::BUFFERS_RELEASED.get() >= before + 1.0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BufferAllocator::new(0).is_err());
    }
}
