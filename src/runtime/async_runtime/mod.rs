//! Async runtime bridge for compiled kernels
//!
//! Compiled code never touches [`AsyncValue`](crate::runtime::async_value::AsyncValue)
//! directly. It holds opaque pointers to [`Token`], [`Value`] and [`Group`]
//! objects and drives them through the functions on [`AsyncRuntime`].
//!
//! Tokens and values are created with two references: one for the caller of
//! `create_*` and one for the asynchronous task that will complete them.
//! `set_available` and `set_error` release the producer's reference, so the
//! object survives until completion even if the caller drops its reference
//! first.
//!
//! # Safety
//!
//! Every function taking an object pointer is `unsafe`: the pointer must come
//! from the matching `create_*` function and the caller must still own at
//! least one reference to it.

mod objects;

pub use objects::{
    AsyncRuntimeObject, Completable, Group, InlineBuffer, Token, Value, ValueStorage,
    INLINE_ALIGN, INLINE_SIZE,
};

use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::runtime::async_value::{AsyncValueObject, AsyncValueRef, Chain, Diagnostic};
use crate::runtime::errors::RuntimeResult;
use crate::runtime::host::HostContext;
use crate::runtime::memory::MemoryLayout;
use crate::runtime::scheduler::{block_until_available, WorkQueue};

/// Diagnostic attached by [`AsyncRuntime::set_error`].
pub const ASYNC_RUNTIME_ERROR: &str = "<async runtime error>";

/// Borrow the object behind a bridge pointer.
///
/// # Safety
///
/// `ptr` must come from `Arc::into_raw` and still own a reference.
unsafe fn object<'a, O>(ptr: *const O) -> &'a O {
    assert!(!ptr.is_null(), "null async runtime object");
    &*ptr
}

/// Bridge between compiled kernels and the async value substrate.
#[derive(Clone)]
pub struct AsyncRuntime {
    host: Arc<HostContext>,
    /// External pool for `execute`; blocking awaits cannot deadlock it.
    worker_threads: Option<Arc<dyn WorkQueue>>,
}

impl AsyncRuntime {
    pub fn new(
        host: Arc<HostContext>,
        worker_threads: Option<Arc<dyn WorkQueue>>,
    ) -> Self {
        debug!(
            "async runtime on `{}`, external pool: {}",
            host.work_queue().name(),
            worker_threads
                .as_ref()
                .map(|w| w.name())
                .unwrap_or("none")
        );
        Self {
            host,
            worker_threads,
        }
    }

    #[inline]
    pub fn host_context(&self) -> &Arc<HostContext> {
        &self.host
    }

    #[inline]
    pub fn worker_threads(&self) -> Option<&Arc<dyn WorkQueue>> {
        self.worker_threads.as_ref()
    }

    /// Launch `work` asynchronously, on the external pool when one is
    /// configured and on the host work queue otherwise.
    pub fn execute(
        &self,
        work: impl FnOnce() + Send + 'static,
    ) {
        match &self.worker_threads {
            Some(pool) => pool.add_task(Box::new(work)),
            None => self.host.enqueue_work(work),
        }
    }

    // Creation

    /// Create an unavailable token with two references.
    pub fn create_token(&self) -> *const Token {
        let token = Arc::into_raw(Arc::new(Token::new()));
        // SAFETY: freshly produced by `Arc::into_raw`.
        unsafe { Arc::increment_strong_count(token) };
        trace!("created token {:p}", token);
        token
    }

    /// Create an unavailable value with `size` bytes of storage and two
    /// references.
    ///
    /// Payloads up to [`INLINE_SIZE`] bytes with alignment up to
    /// [`INLINE_ALIGN`] are stored inline; larger ones come from the host
    /// allocator. Aborts via `handle_alloc_error` if that allocation fails.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    pub fn create_value(
        &self,
        size: usize,
        alignment: usize,
    ) -> *const Value {
        match self.try_create_value(size, alignment) {
            Ok(value) => value,
            Err(_) => match MemoryLayout::from_size_align(size, alignment) {
                Ok(layout) => std::alloc::handle_alloc_error(layout.to_std_layout()),
                Err(err) => panic!("invalid async value layout: {err}"),
            },
        }
    }

    /// Fallible form of [`AsyncRuntime::create_value`].
    pub fn try_create_value(
        &self,
        size: usize,
        alignment: usize,
    ) -> RuntimeResult<*const Value> {
        let value = Value::new(size, alignment, self.host.allocator())?;
        let value = Arc::into_raw(Arc::new(value));
        // SAFETY: freshly produced by `Arc::into_raw`.
        unsafe { Arc::increment_strong_count(value) };
        trace!("created value {:p} ({} bytes, align {})", value, size, alignment);
        Ok(value)
    }

    /// Create a group expecting `size` member tokens, with one reference.
    ///
    /// # Panics
    ///
    /// Panics if `size` is negative.
    pub fn create_group(
        &self,
        size: i64,
    ) -> *const Group {
        let group = Arc::into_raw(Arc::new(Group::new(size)));
        trace!("created group {:p} of size {}", group, size);
        group
    }

    // Completion

    /// Publish `obj` as available and release the producer's reference.
    ///
    /// # Safety
    ///
    /// See the module docs; the producer's reference must not have been
    /// released yet.
    pub unsafe fn set_available<O: Completable>(obj: *const O) {
        object(obj).completion().set_state_concrete();
        Arc::decrement_strong_count(obj);
    }

    /// Complete `obj` with the generic runtime error and release the
    /// producer's reference.
    ///
    /// # Safety
    ///
    /// Same as [`AsyncRuntime::set_available`].
    pub unsafe fn set_error<O: Completable>(obj: *const O) {
        Self::set_error_with(obj, ASYNC_RUNTIME_ERROR);
    }

    /// Complete `obj` with `diagnostic` and release the producer's reference.
    ///
    /// # Safety
    ///
    /// Same as [`AsyncRuntime::set_available`].
    pub unsafe fn set_error_with<O: Completable>(
        obj: *const O,
        diagnostic: impl Into<Diagnostic>,
    ) {
        object(obj).completion().set_error(diagnostic.into());
        Arc::decrement_strong_count(obj);
    }

    // Queries

    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn is_error_token(token: *const Token) -> bool {
        object(token).chain().is_error()
    }

    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn is_error_value(value: *const Value) -> bool {
        object(value).storage().is_error()
    }

    /// True iff at least one member token completed in error.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn is_error_group(group: *const Group) -> bool {
        object(group).is_error()
    }

    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn group_error_count(group: *const Group) -> usize {
        object(group).error_count()
    }

    /// Pointer to the payload bytes of `value`.
    ///
    /// # Panics
    ///
    /// Panics if the value completed with an error.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn get_storage(value: *const Value) -> *mut u8 {
        object(value).data()
    }

    /// Add `token` to `group` and return its rank within the group.
    ///
    /// # Panics
    ///
    /// The token's completion panics if the group receives more members than
    /// its declared size.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn add_token_to_group(
        group: *const Group,
        token: *const Token,
    ) -> usize {
        // Borrow the caller's reference without consuming it.
        let group = ManuallyDrop::new(Arc::from_raw(object(group) as *const Group));
        group.add_token(object(token))
    }

    // Blocking await

    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn await_token(
        &self,
        token: *const Token,
    ) -> RuntimeResult<()> {
        self.await_completion(object(token).completion())
    }

    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn await_value(
        &self,
        value: *const Value,
    ) -> RuntimeResult<()> {
        self.await_completion(object(value).completion())
    }

    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn await_group(
        &self,
        group: *const Group,
    ) -> RuntimeResult<()> {
        self.await_completion(object(group).completion())
    }

    fn await_completion(
        &self,
        value: &dyn AsyncValueObject,
    ) -> RuntimeResult<()> {
        if value.is_available() {
            return Ok(());
        }
        // Work runs on the external pool, so blocking here cannot starve it.
        if self.worker_threads.is_some() {
            block_until_available(&[value]);
            return Ok(());
        }
        self.host.await_value(value)
    }

    // Reference counting

    /// Add one reference to `obj`.
    ///
    /// # Panics
    ///
    /// Panics unless `count` is 1.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn add_ref<O: AsyncRuntimeObject>(
        obj: *const O,
        count: u32,
    ) {
        assert_eq!(count, 1, "async runtime objects add exactly one reference");
        Arc::increment_strong_count(object(obj) as *const O);
    }

    /// Drop one reference to `obj`, destroying it at zero.
    ///
    /// # Panics
    ///
    /// Panics unless `count` is 1.
    ///
    /// # Safety
    ///
    /// See the module docs. `obj` must not be used after its last
    /// reference is dropped.
    pub unsafe fn drop_ref<O: AsyncRuntimeObject>(
        obj: *const O,
        count: u32,
    ) {
        assert_eq!(count, 1, "async runtime objects drop exactly one reference");
        Arc::decrement_strong_count(object(obj) as *const O);
    }

    /// Current number of references to `obj`.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn ref_count<O: AsyncRuntimeObject>(obj: *const O) -> usize {
        let obj = ManuallyDrop::new(Arc::from_raw(object(obj) as *const O));
        Arc::strong_count(&obj)
    }

    // Typed access for Rust consumers

    /// Owning handle to the async value behind `token`.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn token_async_value(token: *const Token) -> AsyncValueRef<Chain> {
        object(token).chain().clone()
    }

    /// Owning handle to the async value behind `value`.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn value_async_value(value: *const Value) -> AsyncValueRef<ValueStorage> {
        object(value).storage().clone()
    }

    /// Owning handle to the completion async value of `group`.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn group_async_value(group: *const Group) -> AsyncValueRef<Chain> {
        object(group).completed().clone()
    }
}

impl fmt::Debug for AsyncRuntime {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("AsyncRuntime")
            .field("host", &self.host)
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}
