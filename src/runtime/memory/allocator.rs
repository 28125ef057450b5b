//! Host allocator interface
//!
//! Payloads too large for an async value's inline storage are placed in
//! buffers obtained from a [`HostAllocator`] owned by the host context.
//!
//! # Design Principles
//! - Simple trait: allocate / deallocate
//! - No ownership logic, just raw memory
//! - Send + Sync, shared behind an `Arc`

use core::alloc::Layout;
use core::ptr::NonNull;
use std::alloc;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

/// Memory allocation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Not enough memory to satisfy the allocation
    #[error("out of memory")]
    OutOfMemory,
    /// Alignment is zero or not a power of two
    #[error("invalid alignment {0}")]
    InvalidAlignment(usize),
    /// Size rounded up to the alignment exceeds `isize::MAX`
    #[error("allocation of {size} bytes aligned to {align} is too large")]
    SizeOverflow { size: usize, align: usize },
}

/// Memory layout helper
///
/// Wraps `std::alloc::Layout` with a validating constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    size: usize,
    align: usize,
}

impl MemoryLayout {
    /// Create a layout from size and alignment
    ///
    /// The size is rounded up to a multiple of the alignment, and to at least
    /// one byte so that the layout is always allocatable.
    ///
    /// # Returns
    /// - `Err(AllocError::InvalidAlignment)` unless `align` is a power of two
    /// - `Err(AllocError::SizeOverflow)` if the rounded size exceeds `isize::MAX`
    pub fn from_size_align(
        size: usize,
        align: usize,
    ) -> Result<Self, AllocError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(align));
        }

        let layout = Layout::from_size_align(size.max(1), align)
            .map_err(|_| AllocError::SizeOverflow { size, align })?
            .pad_to_align();

        Ok(Self {
            size: layout.size(),
            align: layout.align(),
        })
    }

    /// Create a layout for type T
    pub fn new<T>() -> Self {
        Self {
            size: std::mem::size_of::<T>().max(1),
            align: std::mem::align_of::<T>(),
        }
    }

    /// Get the size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the alignment
    pub fn align(&self) -> usize {
        self.align
    }

    /// Convert to std::alloc::Layout
    pub fn to_std_layout(&self) -> Layout {
        // Safety: both constructors start from a valid `Layout`
        unsafe { Layout::from_size_align_unchecked(self.size, self.align) }
    }
}

/// Allocator used by the host for out-of-line payload storage.
pub trait HostAllocator: Send + Sync + fmt::Debug {
    /// Allocate uninitialized memory with the given layout.
    fn allocate(
        &self,
        layout: MemoryLayout,
    ) -> Result<NonNull<u8>, AllocError>;

    /// Release memory.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same layout,
    /// and must not be used afterwards.
    unsafe fn deallocate(
        &self,
        ptr: NonNull<u8>,
        layout: MemoryLayout,
    );
}

/// Allocator backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct MallocAllocator;

impl HostAllocator for MallocAllocator {
    fn allocate(
        &self,
        layout: MemoryLayout,
    ) -> Result<NonNull<u8>, AllocError> {
        // Safety: the layout size is never zero
        let ptr = unsafe { alloc::alloc(layout.to_std_layout()) };
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory)
    }

    unsafe fn deallocate(
        &self,
        ptr: NonNull<u8>,
        layout: MemoryLayout,
    ) {
        alloc::dealloc(ptr.as_ptr(), layout.to_std_layout());
    }
}

/// Allocation statistics kept by [`CountingAllocator`].
#[derive(Debug, Default)]
pub struct AllocStats {
    /// Successful allocations.
    pub allocations: AtomicUsize,
    /// Deallocations.
    pub deallocations: AtomicUsize,
    /// Bytes currently allocated.
    pub live_bytes: AtomicUsize,
}

impl AllocStats {
    /// Allocations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst) - self.deallocations.load(Ordering::SeqCst)
    }
}

/// Wraps another allocator and counts what goes through it.
#[derive(Debug, Default)]
pub struct CountingAllocator<A = MallocAllocator> {
    inner: A,
    stats: AllocStats,
}

impl<A: HostAllocator> CountingAllocator<A> {
    /// Count allocations made through `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            stats: AllocStats::default(),
        }
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &AllocStats {
        &self.stats
    }

    /// Number of successful allocations so far.
    #[inline]
    pub fn allocations(&self) -> usize {
        self.stats.allocations.load(Ordering::SeqCst)
    }

    /// Number of deallocations so far.
    #[inline]
    pub fn deallocations(&self) -> usize {
        self.stats.deallocations.load(Ordering::SeqCst)
    }
}

impl<A: HostAllocator> HostAllocator for CountingAllocator<A> {
    fn allocate(
        &self,
        layout: MemoryLayout,
    ) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.inner.allocate(layout)?;
        self.stats.allocations.fetch_add(1, Ordering::SeqCst);
        self.stats
            .live_bytes
            .fetch_add(layout.size(), Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn deallocate(
        &self,
        ptr: NonNull<u8>,
        layout: MemoryLayout,
    ) {
        self.inner.deallocate(ptr, layout);
        self.stats.deallocations.fetch_add(1, Ordering::SeqCst);
        self.stats
            .live_bytes
            .fetch_sub(layout.size(), Ordering::SeqCst);
    }
}
