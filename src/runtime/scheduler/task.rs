//! Task definitions for the work queues.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Unit of work accepted by a work queue.
pub type Work = Box<dyn FnOnce() + Send>;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// A queued piece of work.
pub struct Task {
    /// Unique task ID.
    id: TaskId,
    /// The actual work to execute.
    work: Work,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

impl Task {
    /// Create a new task with the given ID and work.
    pub fn new<F>(
        id: TaskId,
        work: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            work: Box::new(work),
        }
    }

    /// Wrap already boxed work.
    pub fn from_work(
        id: TaskId,
        work: Work,
    ) -> Self {
        Self { id, work }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Consume the task and run its work.
    #[inline]
    pub fn run(self) {
        (self.work)()
    }
}

/// Thread-safe generator for task IDs.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}
