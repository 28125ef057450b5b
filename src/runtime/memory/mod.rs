//! Host memory for out-of-line payloads
//!
//! Small payloads live inline in their async value. Anything larger is placed
//! in a [`HostBuffer`] allocated through the host's [`HostAllocator`], and the
//! buffer returns its memory to that allocator when dropped.

mod allocator;

pub use allocator::{
    AllocError, AllocStats, CountingAllocator, HostAllocator, MallocAllocator, MemoryLayout,
};

use core::ptr::NonNull;
use std::fmt;
use std::sync::Arc;

/// Uninitialized, heap allocated byte buffer owned by a host allocator.
pub struct HostBuffer {
    /// Start of the allocation
    data: NonNull<u8>,
    /// Requested size in bytes
    size: usize,
    /// Layout used for the allocation
    layout: MemoryLayout,
    /// Allocator that owns the memory
    allocator: Arc<dyn HostAllocator>,
}

// Safety: the buffer exclusively owns its allocation; concurrent access to
// the bytes is governed by whoever hands out the data pointer.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    /// Allocate `size` uninitialized bytes aligned to `alignment`.
    pub fn create_uninitialized(
        size: usize,
        alignment: usize,
        allocator: Arc<dyn HostAllocator>,
    ) -> Result<Self, AllocError> {
        let layout = MemoryLayout::from_size_align(size, alignment)?;
        let data = allocator.allocate(layout)?;
        Ok(Self {
            data,
            size,
            layout,
            allocator,
        })
    }

    /// Pointer to the first byte.
    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Requested size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of the allocation.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        // Safety: allocated by this allocator with this layout in
        // `create_uninitialized`, and released exactly once here
        unsafe { self.allocator.deallocate(self.data, self.layout) };
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("data", &self.data)
            .field("size", &self.size)
            .field("alignment", &self.layout.align())
            .finish()
    }
}

#[cfg(test)]
mod tests;
