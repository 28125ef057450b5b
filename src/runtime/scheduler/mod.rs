//! Host work queues
//!
//! A [`WorkQueue`] accepts boxed work items and offers a blocking await over
//! async values. Two implementations are provided:
//!
//! - [`MultiThreadedWorkQueue`]: a fixed pool of named worker threads. A
//!   blocking await or quiesce issued from one of its own workers is rejected with
//!   [`RuntimeError::WouldDeadlock`] instead of hanging the pool.
//! - [`SingleThreadedWorkQueue`]: no threads of its own; queued work runs on
//!   whichever thread blocks in `await_values` or `quiesce`.

pub mod queue;
pub mod task;

pub use queue::TaskQueue;
pub use task::{Task, TaskId, TaskIdGenerator, Work};

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::runtime::async_value::AsyncValueObject;
use crate::runtime::errors::{RuntimeError, RuntimeResult};

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Worker thread name prefix; threads are named `{prefix}-{index}`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Run queued work on the awaiting thread instead of a pool.
    #[serde(default)]
    pub single_threaded: bool,
    /// Worker stack size in bytes; platform default when unset.
    #[serde(default)]
    pub stack_size: Option<usize>,
}

fn default_num_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_thread_name_prefix() -> String {
    "jitrt-worker".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            thread_name_prefix: default_thread_name_prefix(),
            single_threaded: false,
            stack_size: None,
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks scheduled.
    pub tasks_scheduled: AtomicUsize,
    /// Total tasks completed.
    pub tasks_completed: AtomicUsize,
    /// Tasks that panicked.
    pub tasks_panicked: AtomicUsize,
    /// Total execution time in microseconds.
    pub total_exec_time_us: AtomicUsize,
}

impl SchedulerStats {
    /// Record a scheduled task.
    #[inline]
    pub fn record_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed task.
    #[inline]
    pub fn record_completed(
        &self,
        duration_us: usize,
    ) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.total_exec_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Record a task that panicked.
    #[inline]
    pub fn record_panicked(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Tasks scheduled so far.
    pub fn scheduled(&self) -> usize {
        self.tasks_scheduled.load(Ordering::Relaxed)
    }

    /// Tasks finished so far, panicked ones included.
    pub fn completed(&self) -> usize {
        self.tasks_completed.load(Ordering::Relaxed)
    }
}

/// Identity of a work queue worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerMarker {
    /// Id of the owning work queue
    pub queue_id: usize,
    /// Index of the worker within its queue
    pub worker_index: usize,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerMarker>> = const { Cell::new(None) };
}

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(1);

/// Marker of the work queue worker running on this thread, if any.
pub fn current_worker() -> Option<WorkerMarker> {
    CURRENT_WORKER.with(|w| w.get())
}

fn mark_current_thread(marker: WorkerMarker) {
    CURRENT_WORKER.with(|w| w.set(Some(marker)));
}

fn current_thread_name() -> String {
    thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string()
}

/// Block the calling thread until every value is available.
///
/// Performs no deadlock detection; callers that may run on a pool worker
/// must check first.
pub fn block_until_available(values: &[&dyn AsyncValueObject]) {
    let latch = WaitGroup::new();
    for value in values.iter().filter(|v| !v.is_available()) {
        let latch = latch.clone();
        value.and_then_boxed(Box::new(move || drop(latch)));
    }
    latch.wait();
}

/// Runs a task, isolating the worker from panics in the work item.
fn execute_task(
    task: Task,
    stats: &SchedulerStats,
) {
    let id = task.id();
    let start = Instant::now();
    if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
        stats.record_panicked();
        error!("{} panicked", id);
    }
    stats.record_completed(start.elapsed().as_micros() as usize);
    trace!("{} finished", id);
}

/// Host work queue abstraction.
pub trait WorkQueue: Send + Sync + fmt::Debug {
    /// Queue name used in diagnostics.
    fn name(&self) -> &str;

    /// Schedule `work` for execution.
    fn add_task(
        &self,
        work: Work,
    );

    /// Block until every value is available.
    ///
    /// Fails with [`RuntimeError::WouldDeadlock`] when called from a thread
    /// whose blocking would starve the work that completes the values.
    fn await_values(
        &self,
        values: &[&dyn AsyncValueObject],
    ) -> RuntimeResult<()>;

    /// Block until all scheduled work has finished.
    ///
    /// Fails with [`RuntimeError::WouldDeadlock`] when called from a task the
    /// queue itself is running.
    fn quiesce(&self) -> RuntimeResult<()>;

    /// Number of work items that can run at the same time.
    fn parallelism(&self) -> usize;

    /// Whether the calling thread is one of this queue's workers.
    fn is_in_worker_thread(&self) -> bool;
}

/// Build the work queue described by `config`.
pub fn create_work_queue(config: &SchedulerConfig) -> RuntimeResult<Arc<dyn WorkQueue>> {
    if config.single_threaded {
        Ok(Arc::new(SingleThreadedWorkQueue::new()))
    } else {
        Ok(Arc::new(MultiThreadedWorkQueue::new(config)?))
    }
}

/// Fixed-size pool of worker threads draining a shared FIFO.
pub struct MultiThreadedWorkQueue {
    /// Process-unique queue id
    id: usize,
    /// Queue name
    name: String,
    /// Shared task queue
    queue: TaskQueue,
    /// Worker threads
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Number of workers
    num_workers: usize,
    /// Statistics
    stats: Arc<SchedulerStats>,
    /// Task ID generator
    task_ids: TaskIdGenerator,
}

impl MultiThreadedWorkQueue {
    /// Spawn the worker pool.
    pub fn new(config: &SchedulerConfig) -> RuntimeResult<Self> {
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let num_workers = config.num_workers.max(1);
        let queue = TaskQueue::new();
        let stats = Arc::new(SchedulerStats::default());

        let this = Self {
            id,
            name: format!("{}#{}", config.thread_name_prefix, id),
            queue,
            workers: Mutex::new(Vec::with_capacity(num_workers)),
            num_workers,
            stats,
            task_ids: TaskIdGenerator::new(),
        };
        this.spawn_workers(config)?;

        debug!(
            "work queue `{}` started with {} workers",
            this.name, num_workers
        );
        Ok(this)
    }

    /// Spawn worker threads.
    fn spawn_workers(
        &self,
        config: &SchedulerConfig,
    ) -> RuntimeResult<()> {
        let mut workers = self.workers.lock();
        for worker_index in 0..self.num_workers {
            let queue = self.queue.clone();
            let stats = self.stats.clone();
            let marker = WorkerMarker {
                queue_id: self.id,
                worker_index,
            };

            let mut builder = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, worker_index));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            // Workers spawned so far are joined by Drop on the error path.
            let worker = builder
                .spawn(move || Self::worker_loop(marker, &queue, &stats))
                .map_err(RuntimeError::Spawn)?;
            workers.push(worker);
        }
        Ok(())
    }

    /// Worker thread main loop.
    fn worker_loop(
        marker: WorkerMarker,
        queue: &TaskQueue,
        stats: &SchedulerStats,
    ) {
        mark_current_thread(marker);
        trace!("worker {} started", marker.worker_index);

        while let Some(task) = queue.pop_blocking() {
            execute_task(task, stats);
            queue.task_done();
        }

        trace!("worker {} stopped", marker.worker_index);
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Number of queued tasks.
    #[inline]
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    fn would_deadlock(
        &self,
        operation: &str,
    ) -> RuntimeError {
        let thread = current_thread_name();
        error!(
            "blocking {} on worker `{}` of `{}` would deadlock",
            operation, thread, self.name
        );
        RuntimeError::WouldDeadlock {
            queue: self.name.clone(),
            thread,
        }
    }

    /// Stop accepting blocking pops and join the workers. Queued tasks are
    /// drained first.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let on_own_worker = self.is_in_worker_thread();
        for worker in workers {
            // A worker dropping the last handle to its own queue cannot join
            // itself; the rest of the pool exits on its own.
            if on_own_worker {
                continue;
            }
            if worker.join().is_err() {
                error!("worker of `{}` terminated abnormally", self.name);
            }
        }
    }
}

impl WorkQueue for MultiThreadedWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_task(
        &self,
        work: Work,
    ) {
        if self.queue.is_shutdown() {
            error!("`{}` is shut down, dropping work", self.name);
            return;
        }
        let task = Task::from_work(self.task_ids.next(), work);
        trace!("scheduling {} on `{}`", task.id(), self.name);
        self.stats.record_scheduled();
        self.queue.push(task);
    }

    fn await_values(
        &self,
        values: &[&dyn AsyncValueObject],
    ) -> RuntimeResult<()> {
        if self.is_in_worker_thread() {
            return Err(self.would_deadlock("await"));
        }
        block_until_available(values);
        Ok(())
    }

    fn quiesce(&self) -> RuntimeResult<()> {
        // The calling task counts as running, so the queue never goes idle.
        if self.is_in_worker_thread() {
            return Err(self.would_deadlock("quiesce"));
        }
        self.queue.wait_idle();
        Ok(())
    }

    fn parallelism(&self) -> usize {
        self.num_workers
    }

    fn is_in_worker_thread(&self) -> bool {
        current_worker().is_some_and(|w| w.queue_id == self.id)
    }
}

impl Drop for MultiThreadedWorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MultiThreadedWorkQueue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MultiThreadedWorkQueue")
            .field("name", &self.name)
            .field("num_workers", &self.num_workers)
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Work queue without threads of its own.
///
/// Tasks run on the thread that blocks in [`WorkQueue::await_values`] or
/// [`WorkQueue::quiesce`], in FIFO order.
pub struct SingleThreadedWorkQueue {
    /// Queue name
    name: String,
    /// Pending tasks
    queue: TaskQueue,
    /// Statistics
    stats: SchedulerStats,
    /// Task ID generator
    task_ids: TaskIdGenerator,
}

impl SingleThreadedWorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            name: format!("single-threaded#{}", id),
            queue: TaskQueue::new(),
            stats: SchedulerStats::default(),
            task_ids: TaskIdGenerator::new(),
        }
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Run queued tasks until the queue is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.queue.try_pop() {
            execute_task(task, &self.stats);
            self.queue.task_done();
            ran += 1;
        }
        ran
    }
}

impl Default for SingleThreadedWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue for SingleThreadedWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_task(
        &self,
        work: Work,
    ) {
        let task = Task::from_work(self.task_ids.next(), work);
        self.stats.record_scheduled();
        self.queue.push(task);
    }

    fn await_values(
        &self,
        values: &[&dyn AsyncValueObject],
    ) -> RuntimeResult<()> {
        let remaining = Arc::new(AtomicUsize::new(0));
        for value in values.iter().filter(|v| !v.is_available()) {
            remaining.fetch_add(1, Ordering::AcqRel);
            let remaining = remaining.clone();
            let queue = self.queue.clone();
            value.and_then_boxed(Box::new(move || {
                remaining.fetch_sub(1, Ordering::AcqRel);
                queue.notify_all();
            }));
        }

        loop {
            self.run_pending();
            if remaining.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            self.queue
                .wait_until(|| remaining.load(Ordering::Acquire) == 0);
        }
    }

    fn quiesce(&self) -> RuntimeResult<()> {
        self.run_pending();
        Ok(())
    }

    fn parallelism(&self) -> usize {
        1
    }

    fn is_in_worker_thread(&self) -> bool {
        false
    }
}

impl fmt::Debug for SingleThreadedWorkQueue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SingleThreadedWorkQueue")
            .field("name", &self.name)
            .field("pending", &self.queue.len())
            .finish()
    }
}
