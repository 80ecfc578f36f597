//! Loop configuration
//!
//! Two process-level toggles, read once at start-up from environment
//! variables. There is no config file layer; deployments that need one can
//! construct a [`LoopConfig`] explicitly.

use std::env;

/// Environment variable that switches the loop to drain-all-due-timers mode
pub const ENV_DRAIN_TIMERS: &str = "SPINDLE_DRAIN_TIMERS";

/// Environment variable that enables per-callback profiling
pub const ENV_PROFILE: &str = "SPINDLE_PROFILE";

/// Configuration for a [`Reactor`](crate::reactor::Reactor)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Prefer I/O responsiveness: execute at most one due timed call per
    /// tick, interleaving with readiness polling. When false, each tick
    /// drains the full due set before returning to the multiplexer.
    pub prefer_io: bool,

    /// Record per-callback execution statistics
    pub profile: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            prefer_io: true,
            profile: false,
        }
    }
}

impl LoopConfig {
    /// Read the configuration from the process environment.
    ///
    /// `SPINDLE_DRAIN_TIMERS` set → drain the full due set per tick.
    /// `SPINDLE_PROFILE` set → enable profiling instrumentation.
    pub fn from_env() -> Self {
        Self {
            prefer_io: env::var_os(ENV_DRAIN_TIMERS).is_none(),
            profile: env::var_os(ENV_PROFILE).is_some(),
        }
    }
}
