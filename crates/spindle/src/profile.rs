//! Per-callback execution statistics
//!
//! When profiling is enabled the reactor accumulates, for every callback
//! identity, the invocation count and the total / squared-total / min / max
//! elapsed time. The table is owned by the reactor instance and exposed only
//! as a read-only snapshot; nothing in this crate keeps a process-wide
//! accumulator.

use rustc_hash::FxHashMap;
use std::fmt;
use std::panic::Location;
use std::time::Duration;

/// Identity of a scheduled callback: where it was created, plus an optional
/// caller-supplied label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// Source file of the scheduling call
    pub file: &'static str,
    /// Source line of the scheduling call
    pub line: u32,
    /// Optional label (e.g. a function name)
    pub label: Option<&'static str>,
}

impl CallSite {
    /// Capture the caller's source location.
    #[track_caller]
    pub fn here(label: Option<&'static str>) -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
            label,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label {
            Some(label) => write!(f, "{}:{} ({})", self.file, self.line, label),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Running accumulator for one callback identity
#[derive(Debug, Clone, Default)]
struct Contribution {
    count: u64,
    total: f64,
    total_sq: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Contribution {
    fn record(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.count += 1;
        self.total += secs;
        self.total_sq += secs * secs;
        self.min = Some(self.min.map_or(secs, |m| m.min(secs)));
        self.max = Some(self.max.map_or(secs, |m| m.max(secs)));
    }
}

/// One row of a profiling snapshot, times in seconds
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    /// Callback identity
    pub site: CallSite,
    /// Number of executions
    pub count: u64,
    /// Cumulative elapsed time
    pub total: f64,
    /// Mean elapsed time
    pub average: f64,
    /// Standard deviation of elapsed time
    pub stddev: f64,
    /// Shortest observed execution
    pub min: f64,
    /// Longest observed execution
    pub max: f64,
}

/// Contribution table owned by one reactor
#[derive(Debug, Default)]
pub(crate) struct ProfileTable {
    contributions: FxHashMap<CallSite, Contribution>,
}

impl ProfileTable {
    pub(crate) fn record(&mut self, site: CallSite, elapsed: Duration) {
        self.contributions.entry(site).or_default().record(elapsed);
    }

    /// Snapshot all contributions, sorted by average elapsed time descending.
    pub(crate) fn snapshot(&self) -> Vec<ProfileEntry> {
        let mut rows: Vec<ProfileEntry> = self
            .contributions
            .iter()
            .map(|(site, c)| {
                let count = c.count.max(1);
                let average = c.total / count as f64;
                // Floating point can push the variance a hair below zero.
                let variance = (c.total_sq / count as f64 - average * average).max(0.0);
                ProfileEntry {
                    site: site.clone(),
                    count: c.count,
                    total: c.total,
                    average,
                    stddev: variance.sqrt(),
                    min: c.min.unwrap_or(0.0),
                    max: c.max.unwrap_or(0.0),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.average.total_cmp(&a.average));
        rows
    }
}
