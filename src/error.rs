//! Error types and error handling strategy for the executor.
//!
//! This module defines the core error types used throughout the crate.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Task-body panics are isolated with `catch_unwind` and captured as
//!   [`ErrorKind::Panicked`] on the task; they never cross task boundaries
//! - Waiters observe a task's captured error; they are never unwound by it

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The task's executable panicked; the payload is captured as context.
    Panicked,
    /// The executor was shut down before the task could run, or a
    /// submission was refused because the executor is terminated.
    Terminated,
    /// A producer finished without a readable result (it never ran, or a
    /// run-once collapse resolved to a task of an incompatible type).
    ResultUnavailable,
}

impl ErrorKind {
    /// Returns a short human-readable description of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Panicked => "task panicked",
            Self::Terminated => "executor terminated",
            Self::ResultUnavailable => "result unavailable",
        }
    }
}

/// The main error type for executor operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Creates an error from a captured panic payload.
    ///
    /// String payloads (the common case for `panic!("...")`) are preserved
    /// verbatim as context; other payload types are recorded opaquely.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(ErrorKind::Panicked).with_context(message)
    }

    /// Attaches context to the error.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attaches a source error.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the attached context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns true if this error captures a task panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self.kind, ErrorKind::Panicked)
    }

    /// Returns true if this error reports executor termination.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self.kind, ErrorKind::Terminated)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {context}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenient result alias using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::Terminated).with_context("band low");
        assert_eq!(err.to_string(), "executor terminated: band low");
        assert!(err.is_terminated());
        assert!(!err.is_panic());
    }

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::ResultUnavailable);
        assert_eq!(err.to_string(), "result unavailable");
    }

    #[test]
    fn from_panic_preserves_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let err = Error::from_panic(payload.as_ref());
        assert!(err.is_panic());
        assert_eq!(err.context(), Some("boom"));
    }

    #[test]
    fn from_panic_preserves_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("kapow"));
        let err = Error::from_panic(payload.as_ref());
        assert_eq!(err.context(), Some("kapow"));
    }

    #[test]
    fn from_panic_tolerates_opaque_payload() {
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        let err = Error::from_panic(payload.as_ref());
        assert!(err.is_panic());
        assert_eq!(err.context(), Some("non-string panic payload"));
    }

    #[test]
    fn source_chain_is_exposed() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let err = Error::new(ErrorKind::Terminated).with_source(io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
