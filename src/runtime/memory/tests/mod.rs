//! Host buffer unit tests

use std::sync::Arc;

use crate::runtime::memory::{AllocError, CountingAllocator, HostAllocator, HostBuffer, MallocAllocator};

#[cfg(test)]
mod host_buffer_tests {
    use super::*;

    #[test]
    fn test_host_buffer_alloc_and_release() {
        let allocator = Arc::new(CountingAllocator::new(MallocAllocator));
        let buffer =
            HostBuffer::create_uninitialized(1000, 32, allocator.clone()).unwrap();

        assert_eq!(buffer.size(), 1000);
        assert_eq!(buffer.alignment(), 32);
        assert_eq!(buffer.data() as usize % 32, 0);
        assert_eq!(allocator.allocations(), 1);

        drop(buffer);
        assert_eq!(allocator.deallocations(), 1);
    }

    #[test]
    fn test_host_buffer_write_read() {
        let allocator: Arc<dyn HostAllocator> = Arc::new(MallocAllocator);
        let buffer = HostBuffer::create_uninitialized(256, 8, allocator).unwrap();

        unsafe {
            std::ptr::write_bytes(buffer.data(), 0xAB, buffer.size());
            let bytes = std::slice::from_raw_parts(buffer.data(), buffer.size());
            assert!(bytes.iter().all(|&b| b == 0xAB));
        }
    }

    #[test]
    fn test_host_buffer_invalid_alignment() {
        let allocator: Arc<dyn HostAllocator> = Arc::new(MallocAllocator);
        let result = HostBuffer::create_uninitialized(64, 12, allocator);
        assert_eq!(result.unwrap_err(), AllocError::InvalidAlignment(12));
    }

    #[test]
    fn test_host_buffer_oversized_request_fails() {
        let allocator = Arc::new(CountingAllocator::new(MallocAllocator));
        let result =
            HostBuffer::create_uninitialized(isize::MAX as usize + 1, 16, allocator.clone());
        assert!(matches!(result, Err(AllocError::SizeOverflow { .. })));
        assert_eq!(allocator.allocations(), 0);
    }

    #[test]
    fn test_host_buffer_debug() {
        let allocator: Arc<dyn HostAllocator> = Arc::new(MallocAllocator);
        let buffer = HostBuffer::create_uninitialized(8, 8, allocator).unwrap();
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("HostBuffer"));
    }
}
