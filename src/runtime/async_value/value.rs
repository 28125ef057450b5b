//! The reference counted async value.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::diagnostic::Diagnostic;
use super::handle::{AsyncValuePtr, AsyncValueRef};
use super::state::{AsyncState, StateCell, Waiter, WaiterList};

/// Payload-less completion marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Chain;

/// Payload storage, tagged by what it currently holds.
pub(crate) enum Slot<T> {
    Empty,
    Payload(T),
    Error(Diagnostic),
}

/// A not-yet-available or already-available typed result.
///
/// Values are only ever created behind an [`AsyncValueRef`], so every
/// `AsyncValue` lives in a reference counted allocation and a borrowed
/// `&AsyncValue<T>` can always be turned back into an owning handle.
///
/// The slot is written exactly once per transition, under the state cell's
/// lock and before the new state is published. Readers only look at it after
/// observing a terminal state, after which it is never written again.
pub struct AsyncValue<T> {
    cell: StateCell<T>,
    slot: UnsafeCell<Slot<T>>,
}

// SAFETY: the slot is written only by the transitioning thread under the
// state cell's lock, and read only after the terminal state is published with
// release/acquire ordering.
unsafe impl<T: Send> Send for AsyncValue<T> {}
unsafe impl<T: Send + Sync> Sync for AsyncValue<T> {}

impl<T> AsyncValue<T> {
    pub(super) fn with_slot(
        state: AsyncState,
        slot: Slot<T>,
    ) -> Self {
        Self {
            cell: StateCell::new(state),
            slot: UnsafeCell::new(slot),
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> AsyncState {
        self.cell.state()
    }

    /// Resolved to a payload or an error.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    #[inline]
    pub fn is_unavailable(&self) -> bool {
        !self.is_available()
    }

    #[inline]
    pub fn is_concrete(&self) -> bool {
        self.state() == AsyncState::Concrete
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.state() == AsyncState::Error
    }

    #[inline]
    pub fn is_unconstructed(&self) -> bool {
        self.state() == AsyncState::Unconstructed
    }

    /// Number of continuations still waiting for the transition.
    pub fn num_waiters(&self) -> usize {
        self.cell.num_waiters()
    }

    /// Slot contents of a terminal value.
    fn terminal_slot(&self) -> Option<&Slot<T>> {
        if !self.is_available() {
            return None;
        }
        // SAFETY: the state is terminal, so the slot is no longer written.
        Some(unsafe { &*self.slot.get() })
    }

    /// Borrow the payload.
    ///
    /// # Panics
    ///
    /// Panics unless the value is `Concrete`.
    pub fn get(&self) -> &T {
        match self.terminal_slot() {
            Some(Slot::Payload(value)) => value,
            _ => panic!(
                "cannot read the payload of an async value in state {:?}",
                self.state()
            ),
        }
    }

    /// Borrow the diagnostic.
    ///
    /// # Panics
    ///
    /// Panics unless the value is in the `Error` state.
    pub fn get_error(&self) -> &Diagnostic {
        match self.error_if_present() {
            Some(diagnostic) => diagnostic,
            None => panic!(
                "cannot read the error of an async value in state {:?}",
                self.state()
            ),
        }
    }

    /// The diagnostic, or `None` if the value is not in the `Error` state.
    pub fn error_if_present(&self) -> Option<&Diagnostic> {
        match self.terminal_slot() {
            Some(Slot::Error(diagnostic)) => Some(diagnostic),
            _ => None,
        }
    }

    /// Payload or diagnostic of an available value.
    ///
    /// # Panics
    ///
    /// Panics while the value is unavailable.
    pub fn as_result(&self) -> Result<&T, &Diagnostic> {
        match self.terminal_slot() {
            Some(Slot::Payload(value)) => Ok(value),
            Some(Slot::Error(diagnostic)) => Err(diagnostic),
            _ => panic!(
                "async value in state {:?} is not available",
                self.state()
            ),
        }
    }

    /// Borrow a payload constructed ahead of publication.
    ///
    /// # Panics
    ///
    /// Panics unless the value is `Constructed` or `Concrete`.
    ///
    /// # Safety
    ///
    /// The returned reference must not be used after a concurrent or later
    /// `emplace` or `set_error` on this value, both of which replace the slot.
    pub unsafe fn constructed_payload(&self) -> &T {
        match self.state() {
            AsyncState::Constructed | AsyncState::Concrete => {}
            state => panic!("async value in state {state:?} has no constructed payload"),
        }
        match &*self.slot.get() {
            Slot::Payload(value) => value,
            _ => unreachable!("constructed async value without a payload"),
        }
    }

    /// Non-owning handle to this value.
    #[inline]
    pub fn as_ptr(&self) -> AsyncValuePtr<'_, T> {
        AsyncValuePtr::new(self)
    }

    /// Form a new owning handle, adding one reference.
    pub fn copy_ref(&self) -> AsyncValueRef<T> {
        let raw = self as *const Self;
        // SAFETY: every AsyncValue is allocated inside an `Arc` by the
        // `AsyncValueRef` constructors, and `self` keeps it alive here.
        unsafe {
            Arc::increment_strong_count(raw);
            AsyncValueRef::from_raw(raw)
        }
    }
}

impl<T: Send + Sync + 'static> AsyncValue<T> {
    /// Store the payload and make the value `Concrete`.
    ///
    /// # Panics
    ///
    /// Panics if the value is already available.
    pub fn emplace(
        &self,
        value: T,
    ) {
        let transition = self.cell.transition(
            &[AsyncState::Unconstructed, AsyncState::Constructed],
            AsyncState::Concrete,
            // SAFETY: written under the cell lock while still unavailable.
            || unsafe { std::mem::replace(&mut *self.slot.get(), Slot::Payload(value)) },
        );
        match transition {
            Ok((previous, waiters)) => {
                drop(previous);
                self.run_waiters(waiters);
            }
            Err(state) => panic!("emplace on an async value in state {state:?}"),
        }
    }

    /// `emplace` on `Ok`, `set_error` on `Err`.
    pub fn emplace_result(
        &self,
        result: Result<T, Diagnostic>,
    ) {
        match result {
            Ok(value) => self.emplace(value),
            Err(diagnostic) => self.set_error(diagnostic),
        }
    }

    /// Resolve the value to an error, dropping any constructed payload.
    ///
    /// # Panics
    ///
    /// Panics if the value is already available.
    pub fn set_error(
        &self,
        diagnostic: impl Into<Diagnostic>,
    ) {
        let diagnostic = diagnostic.into();
        let transition = self.cell.transition(
            &[AsyncState::Unconstructed, AsyncState::Constructed],
            AsyncState::Error,
            // SAFETY: written under the cell lock while still unavailable.
            || unsafe { std::mem::replace(&mut *self.slot.get(), Slot::Error(diagnostic)) },
        );
        match transition {
            Ok((previous, waiters)) => {
                drop(previous);
                self.run_waiters(waiters);
            }
            Err(state) => panic!("set_error on an async value in state {state:?}"),
        }
    }

    /// Publish a payload that was constructed out of band.
    ///
    /// # Panics
    ///
    /// Panics unless the value is `Constructed`.
    pub fn set_state_concrete(&self) {
        match self
            .cell
            .transition(&[AsyncState::Constructed], AsyncState::Concrete, || ())
        {
            Ok(((), waiters)) => self.run_waiters(waiters),
            Err(state) => panic!("set_state_concrete on an async value in state {state:?}"),
        }
    }

    /// Run `waiter` once the value is available.
    ///
    /// Runs immediately on the calling thread if it already is.
    pub fn and_then<F>(
        &self,
        waiter: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        self.add_waiter(Box::new(move |_: &AsyncValue<T>| waiter()));
    }

    /// Run `waiter` with the payload or the diagnostic once available.
    pub fn on_result<F>(
        &self,
        waiter: F,
    ) where
        F: FnOnce(Result<&T, &Diagnostic>) + Send + 'static,
    {
        self.add_waiter(Box::new(move |value: &AsyncValue<T>| {
            waiter(value.as_result())
        }));
    }

    /// Run `waiter` with the diagnostic (`None` on success) once available.
    pub fn on_error<F>(
        &self,
        waiter: F,
    ) where
        F: FnOnce(Option<&Diagnostic>) + Send + 'static,
    {
        self.add_waiter(Box::new(move |value: &AsyncValue<T>| {
            waiter(value.error_if_present())
        }));
    }

    pub(crate) fn add_waiter(
        &self,
        waiter: Waiter<T>,
    ) {
        if let Some(waiter) = self.cell.register(waiter) {
            waiter(self);
        }
    }

    fn run_waiters(
        &self,
        waiters: WaiterList<T>,
    ) {
        if !waiters.is_empty() {
            trace!(count = waiters.len(), state = ?self.state(), "running async value waiters");
        }
        for waiter in waiters {
            waiter(self);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AsyncValue<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut s = f.debug_struct("AsyncValue");
        s.field("state", &self.state());
        match self.terminal_slot() {
            Some(Slot::Payload(value)) => s.field("value", value),
            Some(Slot::Error(diagnostic)) => s.field("error", diagnostic),
            _ => s.field("waiters", &self.num_waiters()),
        };
        s.finish()
    }
}
