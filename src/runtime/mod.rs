//! Runtime system
//!
//! This module contains the async value substrate, the bridge used by
//! compiled kernels, and the host services they run on.

pub mod async_runtime;
pub mod async_value;
pub mod errors;
pub mod host;
pub mod memory;
pub mod scheduler;
