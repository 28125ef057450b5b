//! Task queue for the work queues
//!
//! Multi-producer, multi-consumer FIFO that also tracks how many popped
//! tasks are still running, so callers can wait for the queue to go idle.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::task::Task;

#[derive(Debug, Default)]
struct QueueState {
    /// Tasks waiting to run
    tasks: VecDeque<Task>,
    /// Tasks popped but not yet reported done
    running: usize,
    /// No more blocking pops once set
    shutdown: bool,
}

#[derive(Debug, Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    /// Signalled when a task is pushed or a waiter should re-check
    available: Condvar,
    /// Signalled when the queue drains
    idle: Condvar,
}

/// A thread-safe task queue supporting multiple producers and consumers.
///
/// Clones share the same underlying queue.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a new empty task queue.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a task to the back of the queue.
    pub fn push(
        &self,
        task: Task,
    ) {
        let mut state = self.inner.state.lock();
        state.tasks.push_back(task);
        drop(state);
        self.inner.available.notify_one();
    }

    /// Pop a task without blocking. The caller must report it with
    /// [`TaskQueue::task_done`].
    pub fn try_pop(&self) -> Option<Task> {
        let mut state = self.inner.state.lock();
        let task = state.tasks.pop_front()?;
        state.running += 1;
        Some(task)
    }

    /// Pop a task, blocking until one is pushed. Returns `None` once the
    /// queue is shut down and drained.
    pub fn pop_blocking(&self) -> Option<Task> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                state.running += 1;
                return Some(task);
            }
            if state.shutdown {
                return None;
            }
            self.inner.available.wait(&mut state);
        }
    }

    /// Report that a popped task has finished.
    pub fn task_done(&self) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.running > 0, "task_done without a running task");
        state.running -= 1;
        if state.running == 0 && state.tasks.is_empty() {
            self.inner.idle.notify_all();
        }
    }

    /// Block until a task is queued, the queue shuts down, or `ready`
    /// returns true. `ready` is evaluated under the queue lock; whoever makes
    /// it true must call [`TaskQueue::notify_all`] afterwards.
    pub fn wait_until(
        &self,
        ready: impl Fn() -> bool,
    ) {
        let mut state = self.inner.state.lock();
        while state.tasks.is_empty() && !state.shutdown && !ready() {
            self.inner.available.wait(&mut state);
        }
    }

    /// Wake every thread blocked in `pop_blocking` or `wait_until`.
    pub fn notify_all(&self) {
        let _state = self.inner.state.lock();
        self.inner.available.notify_all();
    }

    /// Block until no task is queued or running.
    pub fn wait_idle(&self) {
        let mut state = self.inner.state.lock();
        while !state.tasks.is_empty() || state.running > 0 {
            self.inner.idle.wait(&mut state);
        }
    }

    /// Stop blocking pops once the remaining tasks are drained.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        drop(state);
        self.inner.available.notify_all();
    }

    /// Check if the queue was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Get the number of queued tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    /// Check if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().tasks.is_empty()
    }

    /// Number of popped tasks that have not been reported done.
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }
}
