//! Host context
//!
//! Bundles the services the async substrate consumes from its host: an
//! allocator for out-of-line payloads, a work queue, and a diagnostic
//! handler that observes every error the host emits.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::runtime::async_value::{AsyncValueObject, AsyncValueRef, Diagnostic, ErrorCode};
use crate::runtime::errors::RuntimeResult;
use crate::runtime::memory::{HostAllocator, MallocAllocator};
use crate::runtime::scheduler::{create_work_queue, WorkQueue};
use crate::util::config::RuntimeConfig;

/// Callback receiving every diagnostic emitted through a host.
pub type DiagHandler = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

fn log_diagnostic(diagnostic: &Diagnostic) {
    error!("{}", diagnostic);
}

/// Allocator, work queue and diagnostic handler of one runtime instance.
pub struct HostContext {
    allocator: Arc<dyn HostAllocator>,
    work_queue: Arc<dyn WorkQueue>,
    diag_handler: DiagHandler,
}

impl HostContext {
    /// Create a host whose diagnostics go to `tracing::error!`.
    pub fn new(
        allocator: Arc<dyn HostAllocator>,
        work_queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            allocator,
            work_queue,
            diag_handler: Arc::new(log_diagnostic),
        }
    }

    /// Build a malloc-backed host with the work queue `config` describes.
    pub fn from_config(config: &RuntimeConfig) -> RuntimeResult<Self> {
        let work_queue = create_work_queue(&config.scheduler)?;
        debug!(
            "host context using `{}` (parallelism {})",
            work_queue.name(),
            work_queue.parallelism()
        );
        Ok(Self::new(Arc::new(MallocAllocator), work_queue))
    }

    /// [`HostContext::from_config`] over defaults plus environment overrides.
    pub fn from_env() -> RuntimeResult<Self> {
        let config = RuntimeConfig::from_env()?;
        Self::from_config(&config)
    }

    /// Replace the diagnostic handler.
    pub fn with_diag_handler(
        mut self,
        handler: impl Fn(&Diagnostic) + Send + Sync + 'static,
    ) -> Self {
        self.diag_handler = Arc::new(handler);
        self
    }

    #[inline]
    pub fn allocator(&self) -> &Arc<dyn HostAllocator> {
        &self.allocator
    }

    #[inline]
    pub fn work_queue(&self) -> &Arc<dyn WorkQueue> {
        &self.work_queue
    }

    #[inline]
    pub fn parallelism(&self) -> usize {
        self.work_queue.parallelism()
    }

    /// Whether the calling thread belongs to this host's work queue.
    #[inline]
    pub fn is_in_worker_thread(&self) -> bool {
        self.work_queue.is_in_worker_thread()
    }

    /// Schedule fire-and-forget work on the host work queue.
    pub fn enqueue_work(
        &self,
        work: impl FnOnce() + Send + 'static,
    ) {
        self.work_queue.add_task(Box::new(work));
    }

    /// Run `work` on the host work queue and return its future result.
    ///
    /// A panic inside `work` completes the value with an `Internal` error.
    pub fn run_async<R, F>(
        &self,
        work: F,
    ) -> AsyncValueRef<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.try_run_async(move || Ok(work()))
    }

    /// Like [`HostContext::run_async`] for work that can fail.
    pub fn try_run_async<R, F>(
        &self,
        work: F,
    ) -> AsyncValueRef<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce() -> Result<R, Diagnostic> + Send + 'static,
    {
        let result = AsyncValueRef::create_unconstructed();
        let producer = result.clone();
        self.enqueue_work(move || match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(outcome) => producer.emplace_result(outcome),
            Err(_) => producer.set_error(Diagnostic::with_code(
                "async work panicked",
                ErrorCode::Internal,
            )),
        });
        result
    }

    /// Block until `value` is available.
    pub fn await_value(
        &self,
        value: &dyn AsyncValueObject,
    ) -> RuntimeResult<()> {
        self.await_all(&[value])
    }

    /// Block until every value is available.
    pub fn await_all(
        &self,
        values: &[&dyn AsyncValueObject],
    ) -> RuntimeResult<()> {
        if values.iter().all(|v| v.is_available()) {
            return Ok(());
        }
        self.work_queue.await_values(values)
    }

    /// Block until all work scheduled on the host has finished.
    pub fn quiesce(&self) -> RuntimeResult<()> {
        self.work_queue.quiesce()
    }

    /// Report `diagnostic` to the diagnostic handler and hand it back.
    pub fn emit_error(
        &self,
        diagnostic: impl Into<Diagnostic>,
    ) -> Diagnostic {
        let diagnostic = diagnostic.into();
        (self.diag_handler)(&diagnostic);
        diagnostic
    }

    /// Emit `diagnostic` and wrap it in an error async value.
    pub fn make_error_async_value<T: Send + Sync + 'static>(
        &self,
        diagnostic: impl Into<Diagnostic>,
    ) -> AsyncValueRef<T> {
        AsyncValueRef::create_error(self.emit_error(diagnostic))
    }
}

impl fmt::Debug for HostContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("allocator", &self.allocator)
            .field("work_queue", &self.work_queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
