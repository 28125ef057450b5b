//! Async value unit tests
//!
//! State transitions, waiter dispatch, handle refcounting and concurrent
//! registration against the terminal transition.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Payload that counts how many times it has been dropped.
#[derive(Debug)]
pub(super) struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    pub(super) fn new(drops: &Arc<AtomicUsize>) -> Self {
        Self {
            drops: drops.clone(),
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}
