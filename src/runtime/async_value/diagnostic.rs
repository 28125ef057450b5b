//! Error payload carried by an async value in the `Error` state.

use std::fmt;

/// Status code attached to a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unknown,
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    ResourceExhausted,
    FailedPrecondition,
    Unimplemented,
    Internal,
    Unavailable,
}

impl ErrorCode {
    /// Stable lower-case name, used when rendering diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unknown => "unknown",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::DeadlineExceeded => "deadline exceeded",
            ErrorCode::NotFound => "not found",
            ErrorCode::ResourceExhausted => "resource exhausted",
            ErrorCode::FailedPrecondition => "failed precondition",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Internal => "internal",
            ErrorCode::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human readable error attached to every async value in the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Error message. Starts with a lower case letter, no trailing period.
    message: String,
    /// Optional structured error code.
    code: Option<ErrorCode>,
}

impl Diagnostic {
    /// Create a diagnostic without an error code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a diagnostic with an error code.
    pub fn with_code(
        message: impl Into<String>,
        code: ErrorCode,
    ) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Get the message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error code, if any.
    #[inline]
    pub fn code(&self) -> Option<ErrorCode> {
        self.code
    }
}

impl From<&str> for Diagnostic {
    fn from(message: &str) -> Self {
        Diagnostic::new(message)
    }
}

impl From<String> for Diagnostic {
    fn from(message: String) -> Self {
        Diagnostic::new(message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}
