//! jitrt
//!
//! Asynchronous value substrate for graphs of compiled kernels.
//!
//! - [`runtime::async_value`]: reference-counted future/promise cells with
//!   continuations and inline payloads.
//! - [`runtime::async_runtime`]: tokens, values and groups driven by compiled
//!   code through opaque pointers.
//! - [`runtime::host`]: allocator, work queue and diagnostics of a runtime
//!   instance.
//!
//! # Example
//!
//! ```no_run
//! use jitrt::{async_runtime_from_file, Result};
//!
//! fn main() -> Result<()> {
//!     let rt = async_runtime_from_file("jitrt.toml")?;
//!     let token = rt.create_token();
//!     let producer = token as usize;
//!     rt.execute(move || unsafe {
//!         jitrt::AsyncRuntime::set_available(producer as *const jitrt::Token);
//!     });
//!     unsafe {
//!         rt.await_token(token)?;
//!         jitrt::AsyncRuntime::drop_ref(token, 1);
//!     }
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/jitrt")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use runtime::async_runtime::{AsyncRuntime, Group, Token, Value};
pub use runtime::async_value::{AnyAsyncValueRef, AsyncValueRef, Chain, Diagnostic, ErrorCode};
pub use runtime::errors::{RuntimeError, RuntimeResult};
pub use runtime::host::HostContext;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::util::config::RuntimeConfig;
use crate::util::logger;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a host context from a TOML file plus environment overrides, and
/// install the logger at the configured level.
pub fn host_context_from_file(path: impl AsRef<Path>) -> Result<Arc<HostContext>> {
    let path = path.as_ref();
    let config = RuntimeConfig::load(path)
        .with_context(|| format!("failed to load runtime config from {}", path.display()))?;
    host_context_from_config(&config)
}

/// Build a host context from an already loaded configuration.
pub fn host_context_from_config(config: &RuntimeConfig) -> Result<Arc<HostContext>> {
    logger::try_init(config.log.level);
    let host = HostContext::from_config(config).context("failed to start host work queue")?;
    debug!("jitrt {} host ready", VERSION);
    Ok(Arc::new(host))
}

/// Async runtime on a host built from `path`, without an external pool.
pub fn async_runtime_from_file(path: impl AsRef<Path>) -> Result<AsyncRuntime> {
    Ok(AsyncRuntime::new(host_context_from_file(path)?, None))
}
