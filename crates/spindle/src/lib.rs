//! Spindle — single-threaded cooperative execution core
//!
//! Two tightly coupled pieces:
//! - **Reactor**: an event loop that multiplexes time-ordered deferred calls
//!   with I/O readiness polling (`reactor` module). One tick drains the
//!   cross-thread work queue, then makes progress on the timed-call heap —
//!   by default at most one call per tick, keeping I/O latency bounded.
//! - **Trampoline**: drives a suspendable computation to completion by
//!   resuming it by hand whenever the value it awaits becomes available
//!   (`trampoline` module), with constant stack depth regardless of how many
//!   times the computation suspends.
//!
//! The two compose only through the [`Deferred`] single-shot future: the
//! reactor runs callbacks that fire deferreds; the trampoline registers its
//! continuations on them. Neither side knows the other exists.
//!
//! # Example
//!
//! ```rust,ignore
//! use spindle::{LoopConfig, Reactor, Trampoline};
//! use std::time::Duration;
//!
//! let reactor = Reactor::new(LoopConfig::from_env());
//! let completion = Trampoline::from_env().drive(my_state_machine());
//!
//! reactor.call_later(Duration::from_millis(10), move || {
//!     // fire the deferred my_state_machine() is awaiting
//!     Ok(())
//! });
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Monotonic time source seam
pub mod clock;

/// Process-level loop configuration
pub mod config;

/// Single-shot future/promise primitive
pub mod deferred;

/// Error types
pub mod error;

/// Per-callback execution statistics
pub mod profile;

/// Event loop core
pub mod reactor;

/// Coroutine trampoline
pub mod trampoline;

pub use clock::{Clock, MonotonicClock, VirtualClock};
pub use config::LoopConfig;
pub use deferred::{Deferred, Value};
pub use error::{CancelError, DeferredError, Failure, SpawnError};
pub use profile::{CallSite, ProfileEntry};
pub use reactor::{DelayedCall, Multiplexer, Reactor, ReactorHandle};
pub use trampoline::{CoroStep, Coroutine, ResolutionMode, Trampoline};
