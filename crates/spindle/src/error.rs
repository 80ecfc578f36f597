//! Error types for the loop core and trampoline

use thiserror::Error;

/// A failure carried through deferreds and callback results.
///
/// Failures must be clonable so a single outcome can be stored in a pending
/// slot, forwarded into a suspended computation, and re-forwarded to a
/// completion deferred without losing information.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct Failure {
    message: String,
}

impl Failure {
    /// Create a failure from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any error type into a failure
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }

    /// The failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors from manipulating a [`DelayedCall`](crate::reactor::DelayedCall)
/// handle after the call left the schedulable state.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CancelError {
    /// The call already executed
    #[error("delayed call has already run")]
    AlreadyCalled,

    /// The call was already cancelled
    #[error("delayed call has already been cancelled")]
    AlreadyCancelled,
}

/// Errors from driving a deferred's completion protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeferredError {
    /// `resolve`/`reject` was called on a deferred that already has a result
    #[error("deferred has already been fired")]
    AlreadyFired,

    /// A continuation pair is already registered
    #[error("deferred already has a continuation pair")]
    CallbacksTaken,
}

/// Usage errors reported synchronously by the trampoline entry point.
///
/// These never travel through the completion deferred: handing the
/// trampoline something that cannot produce a suspendable computation is a
/// bug at the call site, not a runtime outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpawnError {
    /// The factory failed to produce a suspendable computation
    #[error("not a suspendable computation: {0}")]
    NotSuspendable(Failure),
}
