//! Coroutine trampoline
//!
//! Drives a suspendable computation to completion without growing the native
//! stack with the number of suspension points. The computation is an explicit
//! state machine with two resume entry points: one for values, one that
//! throws a failure in at the current suspension point. Awaitables that are
//! already resolved are driven inline in the same cycle — the loop only
//! returns to the scheduler when a suspension genuinely has to wait.

use crate::deferred::{Deferred, Value};
use crate::error::{Failure, SpawnError};
use std::cell::{Cell, RefCell};
use std::env;
use std::rc::Rc;

/// Environment variable that switches the trampoline to strict resolution
pub const ENV_STRICT: &str = "SPINDLE_STRICT_TRAMPOLINE";

/// Outcome of resuming a suspended computation one step
pub enum CoroStep {
    /// Suspended, yielding an awaitable (or, in fast mode, a plain value)
    Yield(Value),
    /// Finished with a final value
    Complete(Value),
    /// Failed with an uncaught failure
    Failed(Failure),
}

/// A suspendable computation.
///
/// The trampoline guarantees at most one outstanding resume call at a time,
/// and never resumes a computation after it reported `Complete` or `Failed`.
pub trait Coroutine {
    /// Resume with the value the computation was waiting for
    fn resume_with_value(&mut self, value: Value) -> CoroStep;

    /// Resume by delivering a failure at the current suspension point.
    ///
    /// The computation may handle the failure and keep going; returning
    /// [`CoroStep::Failed`] propagates it to the completion deferred.
    fn resume_with_error(&mut self, error: Failure) -> CoroStep;
}

/// How a yielded value that is not a [`Deferred`] is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Treat it as an immediately available result and keep going
    #[default]
    Fast,
    /// Reject the completion: the computation yielded something that is
    /// neither an awaitable nor meant as an immediate value
    Strict,
}

/// Resumption input: a value to send in, or a failure to throw in
enum Resume {
    Value(Value),
    Error(Failure),
}

/// Where the resumption cycle currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    /// The cycle loop is on this call stack; a continuation firing now must
    /// only record its outcome and return
    Collecting,
    /// The cycle returned to the scheduler; the next continuation to fire
    /// re-enters the loop from the top
    Waiting,
}

struct DriveState {
    /// The computation; taken out of the slot for the duration of each
    /// resume so a second resumption cannot start, and emptied for good once
    /// the computation finishes or fails.
    coro: RefCell<Option<Box<dyn Coroutine>>>,
    completion: Deferred,
    cycle: Cell<Cycle>,
    /// Outcome captured by a continuation that fired during registration
    pending: RefCell<Option<Resume>>,
    mode: ResolutionMode,
}

/// Trampoline that drives [`Coroutine`]s and reports through a [`Deferred`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Trampoline {
    mode: ResolutionMode,
}

impl Trampoline {
    /// Create a trampoline with an explicit resolution mode
    pub fn new(mode: ResolutionMode) -> Self {
        Self { mode }
    }

    /// Read the resolution mode from the environment
    /// (`SPINDLE_STRICT_TRAMPOLINE` set → strict)
    pub fn from_env() -> Self {
        let mode = if env::var_os(ENV_STRICT).is_some() {
            ResolutionMode::Strict
        } else {
            ResolutionMode::Fast
        };
        Self { mode }
    }

    /// Entry point: build the computation and drive it.
    ///
    /// A factory failure is a usage error at the call site, reported
    /// synchronously — it never travels through the completion deferred.
    pub fn spawn<C, F>(&self, factory: F) -> Result<Deferred, SpawnError>
    where
        C: Coroutine + 'static,
        F: FnOnce() -> Result<C, Failure>,
    {
        let coro = factory().map_err(SpawnError::NotSuspendable)?;
        Ok(self.drive(Box::new(coro)))
    }

    /// Drive an already-built computation, returning its completion deferred
    pub fn drive(&self, coro: Box<dyn Coroutine>) -> Deferred {
        let completion = Deferred::new();
        let state = Rc::new(DriveState {
            coro: RefCell::new(Some(coro)),
            completion: completion.clone(),
            cycle: Cell::new(Cycle::Collecting),
            pending: RefCell::new(None),
            mode: self.mode,
        });
        Self::run_cycle(&state, Resume::Value(Box::new(())));
        completion
    }

    /// One resumption cycle. Synchronously resolved awaitables keep the loop
    /// going inline; a genuinely pending one flips the cycle to `Waiting`
    /// and unwinds. Asynchronous resolutions re-enter here from
    /// `continue_with` with a fresh, shallow stack.
    fn run_cycle(state: &Rc<DriveState>, first: Resume) {
        let mut resume = first;
        loop {
            let mut coro = match state.coro.borrow_mut().take() {
                Some(coro) => coro,
                // Retired: a late continuation has nothing left to resume.
                None => return,
            };
            let step = match resume {
                Resume::Value(value) => coro.resume_with_value(value),
                Resume::Error(error) => coro.resume_with_error(error),
            };

            match step {
                CoroStep::Complete(value) => {
                    // Leave the slot empty: this trampoline is retired.
                    let _ = state.completion.resolve(value);
                    return;
                }
                CoroStep::Failed(failure) => {
                    let _ = state.completion.reject(failure);
                    return;
                }
                CoroStep::Yield(yielded) => {
                    *state.coro.borrow_mut() = Some(coro);
                    match yielded.downcast::<Deferred>() {
                        Ok(awaited) => {
                            state.cycle.set(Cycle::Collecting);
                            let on_value_state = Rc::clone(state);
                            let on_error_state = Rc::clone(state);
                            let registered = awaited.add_callbacks(
                                move |value| {
                                    Self::continue_with(&on_value_state, Resume::Value(value));
                                },
                                move |error| {
                                    Self::continue_with(&on_error_state, Resume::Error(error));
                                },
                            );
                            if registered.is_err() {
                                state.coro.borrow_mut().take();
                                let _ = state.completion.reject(Failure::new(
                                    "awaitable already has a continuation",
                                ));
                                return;
                            }
                            match state.pending.borrow_mut().take() {
                                // Resolved during registration: no scheduler
                                // round-trip, continue inline.
                                Some(captured) => {
                                    resume = captured;
                                    continue;
                                }
                                None => {
                                    state.cycle.set(Cycle::Waiting);
                                    return;
                                }
                            }
                        }
                        Err(plain) => match state.mode {
                            ResolutionMode::Fast => {
                                // Not an awaitable: pass the value straight
                                // back in.
                                resume = Resume::Value(plain);
                                continue;
                            }
                            ResolutionMode::Strict => {
                                state.coro.borrow_mut().take();
                                let _ = state.completion.reject(Failure::new(
                                    "computation yielded a value that is not awaitable",
                                ));
                                return;
                            }
                        },
                    }
                }
            }
        }
    }

    /// Continuation shared by the success and failure paths of an awaited
    /// deferred.
    fn continue_with(state: &Rc<DriveState>, outcome: Resume) {
        match state.cycle.get() {
            Cycle::Collecting => {
                *state.pending.borrow_mut() = Some(outcome);
            }
            Cycle::Waiting => {
                state.cycle.set(Cycle::Collecting);
                Self::run_cycle(state, outcome);
            }
        }
    }
}
