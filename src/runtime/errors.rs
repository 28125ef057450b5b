//! Runtime errors

use thiserror::Error;

use crate::runtime::memory::AllocError;
use crate::util::config::ConfigError;

/// Runtime result
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Recoverable runtime errors.
///
/// Contract violations on async values (double emplace, reading an
/// unavailable payload, ...) are not represented here; they panic.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("blocking await on thread `{thread}` of work queue `{queue}` would deadlock")]
    WouldDeadlock {
        /// Work queue that owns the calling thread
        queue: String,
        /// Name of the calling thread
        thread: String,
    },

    #[error("allocation failed: {0}")]
    Alloc(#[from] AllocError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}
