//! Future/promise primitive at the loop ↔ trampoline boundary
//!
//! A [`Deferred`] is fulfilled exactly once, with a success value or a
//! failure. One continuation pair may be registered; it is invoked at most
//! once — synchronously if the deferred already has a result, otherwise at
//! the moment the result arrives. This is the whole surface the trampoline
//! and the loop compose through; chaining, timeouts and fan-out belong to
//! callers.

use crate::error::{DeferredError, Failure};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Dynamic value carried through deferreds and coroutine resumptions
pub type Value = Box<dyn Any>;

type SuccessFn = Box<dyn FnOnce(Value)>;
type FailureFn = Box<dyn FnOnce(Failure)>;

struct DeferredState {
    /// Result slot, present once fired and not yet delivered
    outcome: Option<Result<Value, Failure>>,
    /// Registered continuation pair, if any
    callbacks: Option<(SuccessFn, FailureFn)>,
    /// The continuation pair has been invoked
    delivered: bool,
}

/// A single-shot future usable only on the loop thread.
///
/// Clones share the same state; the handle is deliberately `!Send`.
#[derive(Clone)]
pub struct Deferred {
    state: Rc<RefCell<DeferredState>>,
}

impl Deferred {
    /// Create an unfired deferred
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(DeferredState {
                outcome: None,
                callbacks: None,
                delivered: false,
            })),
        }
    }

    /// Create a deferred that already holds a success value
    pub fn resolved(value: Value) -> Self {
        let d = Self::new();
        let _ = d.resolve(value);
        d
    }

    /// Create a deferred that already holds a failure
    pub fn rejected(failure: Failure) -> Self {
        let d = Self::new();
        let _ = d.reject(failure);
        d
    }

    /// Fulfill with a success value.
    ///
    /// Errors if the deferred was already fired.
    pub fn resolve(&self, value: Value) -> Result<(), DeferredError> {
        self.fire(Ok(value))
    }

    /// Fulfill with a failure.
    ///
    /// Errors if the deferred was already fired.
    pub fn reject(&self, failure: Failure) -> Result<(), DeferredError> {
        self.fire(Err(failure))
    }

    fn fire(&self, outcome: Result<Value, Failure>) -> Result<(), DeferredError> {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            if state.delivered || state.outcome.is_some() {
                return Err(DeferredError::AlreadyFired);
            }
            match state.callbacks.take() {
                Some(pair) => {
                    state.delivered = true;
                    Some(pair)
                }
                None => {
                    state.outcome = Some(outcome);
                    return Ok(());
                }
            }
        };
        // Borrow released: the continuation may re-enter this deferred.
        if let Some((on_value, on_failure)) = callbacks {
            match outcome {
                Ok(value) => on_value(value),
                Err(failure) => on_failure(failure),
            }
        }
        Ok(())
    }

    /// Register the success/failure continuation pair.
    ///
    /// Runs the matching continuation immediately when the deferred already
    /// has a result. Errors if a pair was already registered or delivered.
    pub fn add_callbacks(
        &self,
        on_value: impl FnOnce(Value) + 'static,
        on_failure: impl FnOnce(Failure) + 'static,
    ) -> Result<(), DeferredError> {
        let outcome = {
            let mut state = self.state.borrow_mut();
            if state.delivered || state.callbacks.is_some() {
                return Err(DeferredError::CallbacksTaken);
            }
            match state.outcome.take() {
                Some(outcome) => {
                    state.delivered = true;
                    outcome
                }
                None => {
                    state.callbacks = Some((Box::new(on_value), Box::new(on_failure)));
                    return Ok(());
                }
            }
        };
        match outcome {
            Ok(value) => on_value(value),
            Err(failure) => on_failure(failure),
        }
        Ok(())
    }

    /// Whether this deferred has fired (result held or already delivered)
    pub fn is_resolved(&self) -> bool {
        let state = self.state.borrow();
        state.delivered || state.outcome.is_some()
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Deferred")
            .field("fired", &(state.delivered || state.outcome.is_some()))
            .field("delivered", &state.delivered)
            .field("has_callbacks", &state.callbacks.is_some())
            .finish()
    }
}
