//! State machine and waiter list for a single async result.
//!
//! The state flag is an atomic so that availability checks never take the
//! lock. Registration and the terminal transition both happen under the
//! waiter lock, which is what keeps a waiter from being lost or run twice.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::value::AsyncValue;

/// Lifecycle state of an async value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AsyncState {
    /// No payload has been constructed yet.
    Unconstructed = 0,
    /// Payload constructed but not yet published.
    Constructed = 1,
    /// Payload published and readable.
    Concrete = 2,
    /// Resolved to an error; the payload is absent.
    Error = 3,
}

impl AsyncState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => AsyncState::Unconstructed,
            1 => AsyncState::Constructed,
            2 => AsyncState::Concrete,
            3 => AsyncState::Error,
            _ => unreachable!("invalid async state tag {val}"),
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Terminal states: `Concrete` and `Error`.
    #[inline]
    pub fn is_available(&self) -> bool {
        matches!(self, AsyncState::Concrete | AsyncState::Error)
    }
}

/// Continuation run once the owning value becomes available.
pub(crate) type Waiter<T> = Box<dyn FnOnce(&AsyncValue<T>) + Send>;

/// Most values see at most one waiter.
pub(crate) type WaiterList<T> = SmallVec<[Waiter<T>; 1]>;

pub(crate) struct StateCell<T> {
    state: AtomicU8,
    waiters: Mutex<WaiterList<T>>,
}

impl<T> StateCell<T> {
    pub(crate) fn new(state: AsyncState) -> Self {
        Self {
            state: AtomicU8::new(state.as_u8()),
            waiters: Mutex::new(SmallVec::new()),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> AsyncState {
        AsyncState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queue `waiter`, or hand it back if the cell is already terminal.
    pub(crate) fn register(
        &self,
        waiter: Waiter<T>,
    ) -> Option<Waiter<T>> {
        if self.state().is_available() {
            return Some(waiter);
        }

        let mut waiters = self.waiters.lock();
        // Re-check under the lock: the transition may have won the race.
        if self.state().is_available() {
            return Some(waiter);
        }
        waiters.push(waiter);
        None
    }

    /// Move to the terminal state `next` if the current state is one of `from`.
    ///
    /// `write` runs under the waiter lock before `next` is published, so any
    /// payload it stores is visible to every thread that observes `next`.
    /// Returns the drained waiters, or the current state if the transition is
    /// not allowed.
    pub(crate) fn transition<R>(
        &self,
        from: &[AsyncState],
        next: AsyncState,
        write: impl FnOnce() -> R,
    ) -> Result<(R, WaiterList<T>), AsyncState> {
        debug_assert!(next.is_available());

        let mut waiters = self.waiters.lock();
        let current = self.state();
        if !from.contains(&current) {
            return Err(current);
        }

        let out = write();
        self.state.store(next.as_u8(), Ordering::Release);
        Ok((out, std::mem::take(&mut *waiters)))
    }

    pub(crate) fn num_waiters(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl<T> fmt::Debug for StateCell<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("state", &self.state())
            .field("waiters", &self.num_waiters())
            .finish()
    }
}
