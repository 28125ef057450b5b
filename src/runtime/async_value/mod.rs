//! Reference counted, state-machine backed async values
//!
//! An async value starts out unavailable (`Unconstructed` or `Constructed`)
//! and becomes available exactly once, either with a payload (`Concrete`) or
//! with a [`Diagnostic`] (`Error`). Continuations registered before that
//! point are queued and run by whichever thread performs the transition;
//! continuations registered afterwards run immediately.
//!
//! # Architecture
//!
//! - [`AsyncState`](state::AsyncState) - lifecycle states
//! - `StateCell` - atomic state flag plus the locked waiter list
//! - [`AsyncValue`](value::AsyncValue) - state cell plus tagged payload slot
//! - [`AsyncValueRef`](handle::AsyncValueRef) / [`AsyncValuePtr`](handle::AsyncValuePtr) - owning and borrowing handles
//! - [`AnyAsyncValueRef`](handle::AnyAsyncValueRef) - type-erased owning handle
//!
//! # Example
//!
//! ```
//! use jitrt::runtime::async_value::AsyncValueRef;
//!
//! let value = AsyncValueRef::<i32>::create_unconstructed();
//! value.on_result(|result| assert_eq!(result, Ok(&42)));
//! value.emplace(42);
//! assert_eq!(*value.get(), 42);
//! ```

pub mod diagnostic;
pub mod handle;
pub mod state;
pub mod value;

pub use diagnostic::{Diagnostic, ErrorCode};
pub use handle::{AnyAsyncValueRef, AsyncValueObject, AsyncValuePtr, AsyncValueRef};
pub use state::AsyncState;
pub use value::{AsyncValue, Chain};

#[cfg(test)]
mod tests;
