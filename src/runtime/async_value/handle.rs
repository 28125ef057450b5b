//! Owning and non-owning handles over an [`AsyncValue`].
//!
//! - [`AsyncValueRef`] owns one reference; clone adds one, drop releases one.
//! - [`AsyncValuePtr`] borrows; copying it never touches the count.
//! - [`AnyAsyncValueRef`] is an owning handle with the payload type erased.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::diagnostic::Diagnostic;
use super::state::AsyncState;
use super::value::{AsyncValue, Slot};

/// Owning handle: one reference on the underlying [`AsyncValue`].
pub struct AsyncValueRef<T> {
    value: Arc<AsyncValue<T>>,
}

impl<T: Send + Sync + 'static> AsyncValueRef<T> {
    /// Allocate a value with no payload. Make it available later with
    /// `emplace` or `set_error`.
    pub fn create_unconstructed() -> Self {
        Self::from_value(AsyncValue::with_slot(AsyncState::Unconstructed, Slot::Empty))
    }

    /// Allocate a value whose payload is constructed but not yet published.
    /// Make it available later with `set_state_concrete` or `set_error`.
    pub fn create_constructed(value: T) -> Self {
        Self::from_value(AsyncValue::with_slot(
            AsyncState::Constructed,
            Slot::Payload(value),
        ))
    }

    /// Allocate an already available value.
    pub fn create_available(value: T) -> Self {
        Self::from_value(AsyncValue::with_slot(
            AsyncState::Concrete,
            Slot::Payload(value),
        ))
    }

    /// Allocate a value already resolved to an error.
    pub fn create_error(diagnostic: impl Into<Diagnostic>) -> Self {
        Self::from_value(AsyncValue::with_slot(
            AsyncState::Error,
            Slot::Error(diagnostic.into()),
        ))
    }

    fn from_value(value: AsyncValue<T>) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// Upcast to a type-erased handle. The reference is transferred, the
    /// count is unchanged.
    pub fn erase(self) -> AnyAsyncValueRef {
        AnyAsyncValueRef { value: self.value }
    }
}

impl<T> AsyncValueRef<T> {
    /// Non-owning handle, valid while `self` is.
    #[inline]
    pub fn as_ptr(&self) -> AsyncValuePtr<'_, T> {
        AsyncValuePtr::new(&self.value)
    }

    /// Explicit copy, adding one reference.
    #[inline]
    pub fn copy_ref(&self) -> Self {
        self.clone()
    }

    /// `true` iff this is the only reference.
    #[inline]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.value) == 1
    }

    /// Current number of owning references.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.value)
    }

    /// Both handles refer to the same value.
    #[inline]
    pub fn ptr_eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Release this handle's reference into a raw pointer.
    pub fn into_raw(self) -> *const AsyncValue<T> {
        Arc::into_raw(self.value)
    }

    /// Take ownership of one reference from a raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`AsyncValueRef::into_raw`] (or point at a value
    /// whose count was incremented for this call), and that reference must not
    /// be used again.
    pub unsafe fn from_raw(ptr: *const AsyncValue<T>) -> Self {
        Self {
            value: Arc::from_raw(ptr),
        }
    }
}

impl<T> Clone for AsyncValueRef<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Deref for AsyncValueRef<T> {
    type Target = AsyncValue<T>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> PartialEq for AsyncValueRef<T> {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for AsyncValueRef<T> {}

impl<T: fmt::Debug> fmt::Debug for AsyncValueRef<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

/// Non-owning handle. Cheap to copy, valid for as long as `'a`.
pub struct AsyncValuePtr<'a, T> {
    value: &'a AsyncValue<T>,
}

impl<'a, T> AsyncValuePtr<'a, T> {
    #[inline]
    pub fn new(value: &'a AsyncValue<T>) -> Self {
        Self { value }
    }

    #[inline]
    pub fn value(&self) -> &'a AsyncValue<T> {
        self.value
    }

    /// Borrow the payload for the full lifetime `'a`.
    #[inline]
    pub fn get(&self) -> &'a T {
        self.value.get()
    }

    /// Form an owning handle, adding one reference.
    #[inline]
    pub fn copy_ref(&self) -> AsyncValueRef<T> {
        self.value.copy_ref()
    }
}

impl<T> Clone for AsyncValuePtr<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AsyncValuePtr<'_, T> {}

impl<T> Deref for AsyncValuePtr<'_, T> {
    type Target = AsyncValue<T>;

    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for AsyncValuePtr<'_, T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self.value, f)
    }
}

/// Payload-independent view of an async value.
pub trait AsyncValueObject: Send + Sync {
    fn state(&self) -> AsyncState;

    fn is_available(&self) -> bool {
        self.state().is_available()
    }

    fn is_error(&self) -> bool {
        self.state() == AsyncState::Error
    }

    fn error_if_present(&self) -> Option<&Diagnostic>;

    /// Boxed form of [`AsyncValue::and_then`].
    fn and_then_boxed(
        &self,
        waiter: Box<dyn FnOnce() + Send>,
    );

    fn set_error(
        &self,
        diagnostic: Diagnostic,
    );

    fn set_state_concrete(&self);

    fn as_any(&self) -> &dyn Any;

    /// Name of the payload type, for diagnostics.
    fn payload_type_name(&self) -> &'static str;
}

impl<T: Send + Sync + 'static> AsyncValueObject for AsyncValue<T> {
    fn state(&self) -> AsyncState {
        AsyncValue::state(self)
    }

    fn error_if_present(&self) -> Option<&Diagnostic> {
        AsyncValue::error_if_present(self)
    }

    fn and_then_boxed(
        &self,
        waiter: Box<dyn FnOnce() + Send>,
    ) {
        self.and_then(waiter);
    }

    fn set_error(
        &self,
        diagnostic: Diagnostic,
    ) {
        AsyncValue::set_error(self, diagnostic);
    }

    fn set_state_concrete(&self) {
        AsyncValue::set_state_concrete(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn payload_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Owning handle with the payload type erased.
#[derive(Clone)]
pub struct AnyAsyncValueRef {
    value: Arc<dyn AsyncValueObject>,
}

impl AnyAsyncValueRef {
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.value)
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.ref_count() == 1
    }

    /// Payload type is `T`.
    pub fn is<T: Send + Sync + 'static>(&self) -> bool {
        self.value.as_any().is::<AsyncValue<T>>()
    }

    /// Recover the typed handle, or get `self` back on a type mismatch.
    pub fn downcast<T: Send + Sync + 'static>(self) -> Result<AsyncValueRef<T>, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let raw = Arc::into_raw(self.value) as *const AsyncValue<T>;
        // SAFETY: the concrete type was checked above, and the erased Arc was
        // produced by unsizing an `Arc<AsyncValue<T>>`.
        Ok(unsafe { AsyncValueRef::from_raw(raw) })
    }
}

impl Deref for AnyAsyncValueRef {
    type Target = dyn AsyncValueObject;

    fn deref(&self) -> &Self::Target {
        &*self.value
    }
}

impl<T: Send + Sync + 'static> From<AsyncValueRef<T>> for AnyAsyncValueRef {
    fn from(value: AsyncValueRef<T>) -> Self {
        value.erase()
    }
}

impl fmt::Debug for AnyAsyncValueRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("AnyAsyncValueRef")
            .field("payload", &self.value.payload_type_name())
            .field("state", &self.value.state())
            .finish()
    }
}
