//! Reference-counted objects handed to compiled code

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::runtime::async_value::{AsyncValueObject, AsyncValueRef, Chain};
use crate::runtime::memory::{AllocError, HostAllocator, HostBuffer};

/// Inline storage size, enough for a rank-5 memref descriptor.
pub const INLINE_SIZE: usize = 128;
/// Inline storage alignment.
pub const INLINE_ALIGN: usize = 16;

/// Common surface of tokens, values and groups.
pub trait AsyncRuntimeObject: Send + Sync + 'static {
    /// Async value tracking the object's completion.
    fn completion(&self) -> &dyn AsyncValueObject;
}

/// Objects that compiled code completes itself.
pub trait Completable: AsyncRuntimeObject {}

/// Completion signal without a payload.
pub struct Token {
    chain: AsyncValueRef<Chain>,
}

impl Token {
    pub(crate) fn new() -> Self {
        Self {
            chain: AsyncValueRef::create_constructed(Chain),
        }
    }

    /// Underlying async value.
    #[inline]
    pub fn chain(&self) -> &AsyncValueRef<Chain> {
        &self.chain
    }
}

impl AsyncRuntimeObject for Token {
    fn completion(&self) -> &dyn AsyncValueObject {
        &*self.chain
    }
}

impl Completable for Token {}

impl fmt::Debug for Token {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Token")
            .field("state", &self.chain.state())
            .finish()
    }
}

/// Fixed-size, 16-byte aligned scratch space written by compiled code.
#[repr(C, align(16))]
pub struct InlineBuffer {
    bytes: UnsafeCell<[MaybeUninit<u8>; INLINE_SIZE]>,
}

impl InlineBuffer {
    fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([MaybeUninit::uninit(); INLINE_SIZE]),
        }
    }

    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.bytes.get().cast()
    }
}

// Safety: the runtime never reads the bytes; writers coordinate through the
// owning value's state transitions.
unsafe impl Send for InlineBuffer {}
unsafe impl Sync for InlineBuffer {}

/// Payload bytes of a [`Value`]. The mode is fixed at construction.
pub enum ValueStorage {
    Inline(InlineBuffer),
    Heap(HostBuffer),
}

impl ValueStorage {
    /// Whether a payload of this size and alignment fits inline.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    pub fn can_store_inline(
        size: usize,
        alignment: usize,
    ) -> bool {
        assert!(
            alignment.is_power_of_two(),
            "alignment {alignment} is not a power of two"
        );
        size <= INLINE_SIZE && alignment <= INLINE_ALIGN
    }

    /// Choose inline storage when possible, else allocate from `allocator`.
    pub fn new(
        size: usize,
        alignment: usize,
        allocator: &Arc<dyn HostAllocator>,
    ) -> Result<Self, AllocError> {
        if Self::can_store_inline(size, alignment) {
            Ok(ValueStorage::Inline(InlineBuffer::new()))
        } else {
            HostBuffer::create_uninitialized(size, alignment, allocator.clone())
                .map(ValueStorage::Heap)
        }
    }

    /// Start of the payload bytes.
    #[inline]
    pub fn data(&self) -> *mut u8 {
        match self {
            ValueStorage::Inline(buffer) => buffer.data(),
            ValueStorage::Heap(buffer) => buffer.data(),
        }
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self, ValueStorage::Inline(_))
    }
}

impl fmt::Debug for ValueStorage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ValueStorage::Inline(_) => f.write_str("Inline"),
            ValueStorage::Heap(buffer) => f.debug_tuple("Heap").field(buffer).finish(),
        }
    }
}

/// Completion signal carrying opaque payload bytes.
pub struct Value {
    storage: AsyncValueRef<ValueStorage>,
}

impl Value {
    pub(crate) fn new(
        size: usize,
        alignment: usize,
        allocator: &Arc<dyn HostAllocator>,
    ) -> Result<Self, AllocError> {
        let storage = ValueStorage::new(size, alignment, allocator)?;
        Ok(Self {
            storage: AsyncValueRef::create_constructed(storage),
        })
    }

    /// Underlying async value.
    #[inline]
    pub fn storage(&self) -> &AsyncValueRef<ValueStorage> {
        &self.storage
    }

    /// Pointer to the payload bytes.
    ///
    /// # Panics
    ///
    /// Panics if the value completed with an error.
    pub fn data(&self) -> *mut u8 {
        assert!(!self.storage.is_error(), "storage of an errored async value");
        // SAFETY: only `set_error` replaces the storage, and compiled code
        // stops using the pointer before it reports an error.
        unsafe { self.storage.constructed_payload().data() }
    }
}

impl AsyncRuntimeObject for Value {
    fn completion(&self) -> &dyn AsyncValueObject {
        &*self.storage
    }
}

impl Completable for Value {}

impl fmt::Debug for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Value")
            .field("state", &self.storage.state())
            .finish()
    }
}

/// Completes once a declared number of member tokens have completed.
pub struct Group {
    /// Next rank to hand out
    rank: AtomicUsize,
    /// Members still to complete
    pending: AtomicI64,
    /// Members that completed in error
    num_errors: AtomicUsize,
    /// Never completes in error
    completed: AsyncValueRef<Chain>,
}

impl Group {
    /// # Panics
    ///
    /// Panics if `size` is negative.
    pub(crate) fn new(size: i64) -> Self {
        assert!(size >= 0, "group size can't be negative: {size}");
        let completed = AsyncValueRef::create_constructed(Chain);
        if size == 0 {
            completed.set_state_concrete();
        }
        Self {
            rank: AtomicUsize::new(0),
            pending: AtomicI64::new(size),
            num_errors: AtomicUsize::new(0),
            completed,
        }
    }

    /// Add `token` as the next member and return its rank.
    pub(crate) fn add_token(
        self: &Arc<Self>,
        token: &Token,
    ) -> usize {
        let rank = self.rank.fetch_add(1, Ordering::Relaxed);

        let group = Arc::clone(self);
        token.chain.on_error(move |error| {
            if error.is_some() {
                group.num_errors.fetch_add(1, Ordering::SeqCst);
            }
            let pending = group.pending.fetch_sub(1, Ordering::AcqRel);
            assert!(pending > 0, "wrong group size");
            if pending == 1 {
                group.completed.set_state_concrete();
            }
        });

        rank
    }

    #[inline]
    pub fn error_count(&self) -> usize {
        self.num_errors.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.error_count() != 0
    }

    /// Members that have not completed yet.
    #[inline]
    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Completion async value.
    #[inline]
    pub fn completed(&self) -> &AsyncValueRef<Chain> {
        &self.completed
    }
}

impl AsyncRuntimeObject for Group {
    fn completion(&self) -> &dyn AsyncValueObject {
        &*self.completed
    }
}

impl fmt::Debug for Group {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Group")
            .field("pending", &self.pending())
            .field("num_errors", &self.error_count())
            .field("completed", &self.completed.state())
            .finish()
    }
}
