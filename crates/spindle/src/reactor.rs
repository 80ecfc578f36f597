//! Event loop core
//!
//! Single-threaded tick discipline over a min-heap of timed calls and a
//! cross-thread work queue. By default the loop prefers I/O responsiveness:
//! each tick executes at most one due timed call before handing control back
//! to the readiness multiplexer. Cancellation is a lazy flag flip; heap
//! reclamation is amortized into an occasional compaction pass.
//!
//! The loop knows nothing about coroutines or deferreds — it only runs
//! callables at their due time and drains foreign-thread submissions.

use crate::clock::{Clock, MonotonicClock};
use crate::config::LoopConfig;
use crate::error::{CancelError, Failure};
use crate::profile::{CallSite, ProfileEntry, ProfileTable};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::error;

/// Callable scheduled on the loop thread
pub type CallFn = Box<dyn FnOnce() -> Result<(), Failure>>;

/// Work submitted from a foreign thread
type WorkItem = Box<dyn FnOnce() -> Result<(), Failure> + Send>;

type WakerFn = Box<dyn Fn() + Send + Sync>;

/// Compaction trigger: the live cancelled count must exceed this AND half
/// the heap size before the heap is rebuilt.
const COMPACT_CANCELLATIONS: usize = 50;

/// Readiness multiplexer seam.
///
/// The loop calls `poll` once per [`Reactor::run`] iteration with the time
/// until the next due call (`None` when nothing is pending). The
/// implementation is expected to dispatch its readiness events before
/// returning and to wake early when the installed waker fires.
pub trait Multiplexer {
    /// Wait for readiness up to `timeout` and dispatch any ready events
    fn poll(&mut self, timeout: Option<Duration>) -> Result<(), Failure>;
}

/// State shared between the heap entry and the [`DelayedCall`] handle
struct CallState {
    /// Due time the heap entry was inserted with
    due: Cell<Instant>,
    /// Submission sequence, breaks due-time ties FIFO
    seq: u64,
    cancelled: Cell<bool>,
    called: Cell<bool>,
    /// Re-arm target set by `delay`/`reset`; applied when the entry pops
    rearmed_to: Cell<Option<Instant>>,
    func: RefCell<Option<CallFn>>,
    /// Creation context, used for failure diagnostics and profiling identity
    site: CallSite,
}

/// Heap entry ordered as a min-heap on (due, seq)
struct CallEntry {
    due: Instant,
    seq: u64,
    state: Rc<CallState>,
}

impl Ord for CallEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for min-heap; earlier submission wins ties.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for CallEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CallEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for CallEntry {}

/// Handle to a scheduled call.
///
/// Cancellation and re-arming are flag flips on shared state; the heap is
/// never touched from the handle. Only valid on the loop thread.
#[derive(Clone)]
pub struct DelayedCall {
    state: Rc<CallState>,
    cancellations: Rc<Cell<usize>>,
    clock: Rc<dyn Clock>,
}

impl DelayedCall {
    fn check_schedulable(&self) -> Result<(), CancelError> {
        if self.state.called.get() {
            return Err(CancelError::AlreadyCalled);
        }
        if self.state.cancelled.get() {
            return Err(CancelError::AlreadyCancelled);
        }
        Ok(())
    }

    /// Cancel the call. It will never execute; its heap slot is reclaimed
    /// lazily by the next compaction pass.
    pub fn cancel(&self) -> Result<(), CancelError> {
        self.check_schedulable()?;
        self.state.cancelled.set(true);
        // Drop the callable now; the heap entry alone stays behind.
        self.state.func.borrow_mut().take();
        self.cancellations.set(self.cancellations.get() + 1);
        Ok(())
    }

    /// Push the call's activation `extra` further into the future
    pub fn delay(&self, extra: Duration) -> Result<(), CancelError> {
        self.check_schedulable()?;
        let base = self.state.rearmed_to.get().unwrap_or(self.state.due.get());
        self.state.rearmed_to.set(Some(base + extra));
        Ok(())
    }

    /// Re-arm the call to fire `from_now` after the current time
    pub fn reset(&self, from_now: Duration) -> Result<(), CancelError> {
        self.check_schedulable()?;
        self.state.rearmed_to.set(Some(self.clock.now() + from_now));
        Ok(())
    }

    /// Whether the call is still scheduled to run
    pub fn active(&self) -> bool {
        !self.state.called.get() && !self.state.cancelled.get()
    }

    /// Effective due time, accounting for any pending re-arm
    pub fn due(&self) -> Instant {
        self.state.rearmed_to.get().unwrap_or(self.state.due.get())
    }
}

/// Cloneable handle for submitting work from foreign threads.
///
/// This is the only surface of the loop that is safe to touch off the loop
/// thread. Items run FIFO on the loop thread at the start of a tick.
#[derive(Clone)]
pub struct ReactorHandle {
    tx: Sender<WorkItem>,
    waker: Arc<Mutex<Option<WakerFn>>>,
}

impl ReactorHandle {
    /// Enqueue `f` to run on the loop thread and wake the multiplexer
    pub fn call_from_thread(&self, f: impl FnOnce() -> Result<(), Failure> + Send + 'static) {
        let _ = self.tx.send(Box::new(f));
        if let Some(waker) = self.waker.lock().as_ref() {
            waker();
        }
    }
}

struct ReactorInner {
    config: LoopConfig,
    /// Min-heap of admitted calls, ordered by (due, seq)
    pending: BinaryHeap<CallEntry>,
    /// Calls scheduled since the last tick, merged at tick start
    new_calls: Vec<CallEntry>,
    next_seq: u64,
    profile: ProfileTable,
    thread_ident: Option<ThreadId>,
    running: bool,
    just_stopped: bool,
    shutdown_hooks: Vec<Box<dyn FnOnce()>>,
}

/// The event loop core.
///
/// Clones share the same loop; the type is deliberately `!Send` — all
/// methods except those on [`ReactorHandle`] must run on the loop thread.
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<RefCell<ReactorInner>>,
    clock: Rc<dyn Clock>,
    /// Live count of cancelled-but-still-heaped entries
    cancellations: Rc<Cell<usize>>,
    work_tx: Sender<WorkItem>,
    work_rx: Receiver<WorkItem>,
    waker: Arc<Mutex<Option<WakerFn>>>,
}

impl Reactor {
    /// Create a reactor driven by the real monotonic clock
    pub fn new(config: LoopConfig) -> Self {
        Self::with_clock(config, Rc::new(MonotonicClock))
    }

    /// Create a reactor with an explicit time source
    pub fn with_clock(config: LoopConfig, clock: Rc<dyn Clock>) -> Self {
        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();
        Self {
            inner: Rc::new(RefCell::new(ReactorInner {
                config,
                pending: BinaryHeap::new(),
                new_calls: Vec::new(),
                next_seq: 0,
                profile: ProfileTable::default(),
                thread_ident: None,
                running: false,
                just_stopped: false,
                shutdown_hooks: Vec::new(),
            })),
            clock,
            cancellations: Rc::new(Cell::new(0)),
            work_tx,
            work_rx,
            waker: Arc::new(Mutex::new(None)),
        }
    }

    /// Schedule `f` to run `delay` from now
    #[track_caller]
    pub fn call_later(
        &self,
        delay: Duration,
        f: impl FnOnce() -> Result<(), Failure> + 'static,
    ) -> DelayedCall {
        self.schedule(CallSite::here(None), delay, Box::new(f))
    }

    /// Schedule `f` with an explicit label for diagnostics and profiling
    #[track_caller]
    pub fn call_later_named(
        &self,
        label: &'static str,
        delay: Duration,
        f: impl FnOnce() -> Result<(), Failure> + 'static,
    ) -> DelayedCall {
        self.schedule(CallSite::here(Some(label)), delay, Box::new(f))
    }

    fn schedule(&self, site: CallSite, delay: Duration, func: CallFn) -> DelayedCall {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let due = self.clock.now() + delay;
        let state = Rc::new(CallState {
            due: Cell::new(due),
            seq,
            cancelled: Cell::new(false),
            called: Cell::new(false),
            rearmed_to: Cell::new(None),
            func: RefCell::new(Some(func)),
            site,
        });
        inner.new_calls.push(CallEntry {
            due,
            seq,
            state: state.clone(),
        });
        DelayedCall {
            state,
            cancellations: self.cancellations.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Get a Send + Sync handle for foreign-thread submissions
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            tx: self.work_tx.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Install the callback that wakes the multiplexer out of `poll`
    pub fn install_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self.waker.lock() = Some(Box::new(waker));
    }

    fn wake(&self) {
        if let Some(waker) = self.waker.lock().as_ref() {
            waker();
        }
    }

    /// Run one tick: drain cross-thread work, admit newly scheduled calls,
    /// execute due calls per the drain policy, compact the heap if the lazy
    /// cancellation debt got large, and fire the shutdown edge if the loop
    /// was just stopped. Callback failures are logged, never propagated.
    pub fn tick(&self) {
        self.drain_thread_work();
        self.admit_new_calls();
        self.run_due_calls();
        self.maybe_compact();
        self.fire_shutdown_edge();
    }

    /// Execute the cross-thread items present at tick start, FIFO. Items
    /// enqueued mid-drain wait for the next tick; the multiplexer is woken
    /// so that tick happens promptly.
    fn drain_thread_work(&self) {
        let budget = self.work_rx.len();
        for _ in 0..budget {
            let item = match self.work_rx.try_recv() {
                Ok(item) => item,
                Err(_) => break,
            };
            if let Err(e) = item() {
                error!(error = %e, "cross-thread work item failed");
            }
        }
        if !self.work_rx.is_empty() {
            self.wake();
        }
    }

    fn admit_new_calls(&self) {
        let mut inner = self.inner.borrow_mut();
        let new_calls = std::mem::take(&mut inner.new_calls);
        for entry in new_calls {
            inner.pending.push(entry);
        }
    }

    fn run_due_calls(&self) {
        let (prefer_io, profiling) = {
            let inner = self.inner.borrow();
            (inner.config.prefer_io, inner.config.profile)
        };
        let now = self.clock.now();

        loop {
            // Pop under a short borrow; callbacks may re-enter the reactor.
            let entry = {
                let mut inner = self.inner.borrow_mut();
                match inner.pending.peek() {
                    Some(top) if top.due <= now => inner.pending.pop(),
                    _ => None,
                }
            };
            let Some(entry) = entry else { break };

            if entry.state.cancelled.get() {
                self.cancellations
                    .set(self.cancellations.get().saturating_sub(1));
                if prefer_io {
                    break;
                }
                continue;
            }

            if let Some(later) = entry.state.rearmed_to.take() {
                if later > now {
                    entry.state.due.set(later);
                    let reinserted = CallEntry {
                        due: later,
                        seq: entry.seq,
                        state: entry.state,
                    };
                    self.inner.borrow_mut().pending.push(reinserted);
                    if prefer_io {
                        break;
                    }
                    continue;
                }
                // Re-arm target is itself due; fall through and execute.
            }

            entry.state.called.set(true);
            let func = entry.state.func.borrow_mut().take();
            let started = profiling.then(Instant::now);
            if let Some(func) = func {
                if let Err(e) = func() {
                    error!(site = %entry.state.site, error = %e, "delayed call failed");
                }
            }
            if let Some(started) = started {
                let elapsed = started.elapsed();
                self.inner
                    .borrow_mut()
                    .profile
                    .record(entry.state.site.clone(), elapsed);
            }

            if prefer_io {
                break;
            }
        }
    }

    /// Rebuild the heap without cancelled entries once the lazy-removal debt
    /// exceeds both the fixed threshold and half the heap.
    fn maybe_compact(&self) {
        let cancelled = self.cancellations.get();
        let mut inner = self.inner.borrow_mut();
        if cancelled > COMPACT_CANCELLATIONS && cancelled > inner.pending.len() / 2 {
            self.cancellations.set(0);
            let kept: Vec<CallEntry> = std::mem::take(&mut inner.pending)
                .into_iter()
                .filter(|entry| !entry.state.cancelled.get())
                .collect();
            inner.pending = BinaryHeap::from(kept);
        }
    }

    fn fire_shutdown_edge(&self) {
        let hooks = {
            let mut inner = self.inner.borrow_mut();
            if inner.just_stopped {
                inner.just_stopped = false;
                std::mem::take(&mut inner.shutdown_hooks)
            } else {
                Vec::new()
            }
        };
        for hook in hooks {
            hook();
        }
    }

    /// Run the loop: record the loop thread identity, then alternate ticks
    /// with multiplexer polls until [`stop`](Self::stop) is called.
    pub fn run(&self, mux: &mut dyn Multiplexer) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.thread_ident = Some(thread::current().id());
            inner.running = true;
        }
        loop {
            self.tick();
            if !self.inner.borrow().running {
                break;
            }
            let timeout = self
                .next_deadline()
                .map(|due| due.saturating_duration_since(self.clock.now()));
            if let Err(e) = mux.poll(timeout) {
                error!(error = %e, "multiplexer poll failed");
            }
        }
    }

    /// Stop the loop. The shutdown hooks fire at the end of the next tick.
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.running = false;
        inner.just_stopped = true;
    }

    /// Register a hook to run once when the loop stops
    pub fn add_shutdown_hook(&self, hook: impl FnOnce() + 'static) {
        self.inner.borrow_mut().shutdown_hooks.push(Box::new(hook));
    }

    /// Due time of the earliest pending call, for the multiplexer's poll
    /// timeout. Cancelled entries still count until compaction removes them.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.inner.borrow_mut();
        let new_calls = std::mem::take(&mut inner.new_calls);
        for entry in new_calls {
            inner.pending.push(entry);
        }
        inner.pending.peek().map(|entry| entry.due)
    }

    /// Number of scheduled calls still held, cancelled entries included
    pub fn pending_call_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.pending.len() + inner.new_calls.len()
    }

    /// Whether the current thread is the one running the loop
    pub fn is_loop_thread(&self) -> bool {
        self.inner.borrow().thread_ident == Some(thread::current().id())
    }

    /// Identity of the loop thread, once `run` has been entered
    pub fn loop_thread(&self) -> Option<ThreadId> {
        self.inner.borrow().thread_ident
    }

    /// Read-only profiling snapshot, `None` when profiling is disabled
    pub fn profile_snapshot(&self) -> Option<Vec<ProfileEntry>> {
        let inner = self.inner.borrow();
        if inner.config.profile {
            Some(inner.profile.snapshot())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn test_reactor(config: LoopConfig) -> (Reactor, VirtualClock) {
        let clock = VirtualClock::new();
        let reactor = Reactor::with_clock(config, Rc::new(clock.clone()));
        (reactor, clock)
    }

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn record_call(
        reactor: &Reactor,
        log: &Rc<RefCell<Vec<&'static str>>>,
        delay: Duration,
        name: &'static str,
    ) -> DelayedCall {
        let log = log.clone();
        reactor.call_later(delay, move || {
            log.borrow_mut().push(name);
            Ok(())
        })
    }

    #[test]
    fn test_due_time_and_fifo_ordering_prefer_io() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        record_call(&reactor, &log, secs(5), "5a");
        record_call(&reactor, &log, secs(5), "5b");
        record_call(&reactor, &log, secs(3), "3");

        clock.advance(secs(6));

        // Prefer-IO mode makes progress on at most one call per tick.
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["3"]);
        reactor.tick();
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["3", "5a", "5b"]);
    }

    #[test]
    fn test_drain_fully_runs_whole_due_set_in_one_tick() {
        let config = LoopConfig {
            prefer_io: false,
            ..LoopConfig::default()
        };
        let (reactor, clock) = test_reactor(config);
        let log = recorder();

        record_call(&reactor, &log, secs(5), "5a");
        record_call(&reactor, &log, secs(5), "5b");
        record_call(&reactor, &log, secs(3), "3");

        clock.advance(secs(6));
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["3", "5a", "5b"]);
    }

    #[test]
    fn test_call_not_due_does_not_run() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        record_call(&reactor, &log, secs(5), "later");
        clock.advance(secs(4));
        reactor.tick();
        assert!(log.borrow().is_empty());
        assert_eq!(reactor.pending_call_count(), 1);
    }

    #[test]
    fn test_cancelled_call_never_runs() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        let call = record_call(&reactor, &log, secs(1), "cancelled");
        record_call(&reactor, &log, secs(2), "kept");

        call.cancel().unwrap();
        assert!(!call.active());
        assert_eq!(call.cancel(), Err(CancelError::AlreadyCancelled));

        clock.advance(secs(3));
        reactor.tick(); // pops the cancelled entry, stops for this tick
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn test_cancel_after_execution_fails() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        let call = record_call(&reactor, &log, secs(1), "ran");
        clock.advance(secs(2));
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["ran"]);
        assert_eq!(call.cancel(), Err(CancelError::AlreadyCalled));
        assert!(!call.active());
    }

    #[test]
    fn test_compaction_removes_only_cancelled_entries() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        let mut handles = Vec::new();
        for _ in 0..80 {
            handles.push(record_call(&reactor, &log, secs(100), "survivor"));
        }
        for handle in handles.iter().take(60) {
            handle.cancel().unwrap();
        }

        // Heap size only shrinks at compaction.
        assert_eq!(reactor.pending_call_count(), 80);
        reactor.tick(); // nothing due; compaction triggers (60 > 50, 60 > 40)
        assert_eq!(reactor.pending_call_count(), 20);

        // Every survivor is still runnable.
        clock.advance(secs(101));
        for _ in 0..25 {
            reactor.tick();
        }
        assert_eq!(log.borrow().len(), 20);
    }

    #[test]
    fn test_compaction_not_triggered_below_threshold() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        let mut handles = Vec::new();
        for _ in 0..80 {
            handles.push(record_call(&reactor, &log, secs(100), "x"));
        }
        // 40 cancellations: above half of nothing, below the fixed threshold.
        for handle in handles.iter().take(40) {
            handle.cancel().unwrap();
        }
        reactor.tick();
        assert_eq!(reactor.pending_call_count(), 80);
    }

    #[test]
    fn test_delay_rearms_to_later_time() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        let call = record_call(&reactor, &log, secs(1), "rearmed");
        call.delay(secs(2)).unwrap();
        assert_eq!(call.due(), clock.now() + secs(3));

        clock.advance(secs(2));
        reactor.tick(); // pops at the old due time, re-inserts at +3s
        assert!(log.borrow().is_empty());

        clock.advance(secs(2));
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["rearmed"]);
        assert_eq!(call.delay(secs(1)), Err(CancelError::AlreadyCalled));
    }

    #[test]
    fn test_reset_rearms_relative_to_now() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        let call = record_call(&reactor, &log, secs(1), "reset");
        clock.advance(secs(1));
        call.reset(secs(4)).unwrap();

        reactor.tick();
        assert!(log.borrow().is_empty());

        clock.advance(secs(4));
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["reset"]);
    }

    #[test]
    fn test_failing_call_does_not_poison_the_loop() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        let log = recorder();

        reactor.call_later(secs(1), || Err(Failure::new("callback blew up")));
        record_call(&reactor, &log, secs(2), "after");

        clock.advance(secs(3));
        reactor.tick();
        reactor.tick();
        assert_eq!(*log.borrow(), vec!["after"]);
    }

    #[test]
    fn test_thread_work_runs_fifo() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        let handle = reactor.handle();

        // Work items must be Send, so record through an Arc'd log.
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let log = log.clone();
            handle.call_from_thread(move || {
                log.lock().push(name);
                Ok(())
            });
        }

        reactor.tick();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_items_added_mid_drain_wait_for_next_tick() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        let handle = reactor.handle();
        let ran_nested = Arc::new(AtomicBool::new(false));

        let nested_flag = ran_nested.clone();
        let resubmit = handle.clone();
        handle.call_from_thread(move || {
            let nested_flag = nested_flag.clone();
            resubmit.call_from_thread(move || {
                nested_flag.store(true, AtomicOrdering::Release);
                Ok(())
            });
            Ok(())
        });

        reactor.tick();
        assert!(!ran_nested.load(AtomicOrdering::Acquire));
        reactor.tick();
        assert!(ran_nested.load(AtomicOrdering::Acquire));
    }

    #[test]
    fn test_leftover_thread_work_wakes_multiplexer() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        let woken = Arc::new(AtomicBool::new(false));
        let flag = woken.clone();
        reactor.install_waker(move || flag.store(true, AtomicOrdering::Release));

        let handle = reactor.handle();
        let resubmit = handle.clone();
        handle.call_from_thread(move || {
            resubmit.call_from_thread(|| Ok(()));
            Ok(())
        });

        woken.store(false, AtomicOrdering::Release); // ignore the submit wake
        reactor.tick();
        assert!(woken.load(AtomicOrdering::Acquire));
    }

    #[test]
    fn test_cross_thread_submission() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        let handle = reactor.handle();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let worker = thread::spawn(move || {
            handle.call_from_thread(move || {
                flag.store(true, AtomicOrdering::Release);
                Ok(())
            });
        });
        worker.join().unwrap();

        reactor.tick();
        assert!(ran.load(AtomicOrdering::Acquire));
    }

    #[test]
    fn test_failing_work_item_does_not_abort_drain() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        let handle = reactor.handle();
        let ran = Arc::new(AtomicBool::new(false));

        handle.call_from_thread(|| Err(Failure::new("first item failed")));
        let flag = ran.clone();
        handle.call_from_thread(move || {
            flag.store(true, AtomicOrdering::Release);
            Ok(())
        });

        reactor.tick();
        assert!(ran.load(AtomicOrdering::Acquire));
    }

    #[test]
    fn test_shutdown_hook_fires_once_after_stop() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        let fired = Rc::new(Cell::new(0u32));

        let counter = fired.clone();
        reactor.add_shutdown_hook(move || counter.set(counter.get() + 1));

        reactor.tick();
        assert_eq!(fired.get(), 0);

        reactor.stop();
        reactor.tick();
        assert_eq!(fired.get(), 1);

        reactor.tick();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_run_records_thread_identity_and_stops() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        assert!(reactor.loop_thread().is_none());

        struct NoopMux;
        impl Multiplexer for NoopMux {
            fn poll(&mut self, _timeout: Option<Duration>) -> Result<(), Failure> {
                Ok(())
            }
        }

        let on_loop = Rc::new(Cell::new(false));
        let flag = on_loop.clone();
        let stopper = reactor.clone();
        reactor.call_later(Duration::ZERO, move || {
            flag.set(stopper.is_loop_thread());
            stopper.stop();
            Ok(())
        });

        reactor.run(&mut NoopMux);
        assert!(on_loop.get());
        assert_eq!(reactor.loop_thread(), Some(thread::current().id()));
    }

    #[test]
    fn test_next_deadline_tracks_earliest_call() {
        let (reactor, clock) = test_reactor(LoopConfig::default());
        assert!(reactor.next_deadline().is_none());

        reactor.call_later(secs(5), || Ok(()));
        reactor.call_later(secs(2), || Ok(()));
        assert_eq!(reactor.next_deadline(), Some(clock.now() + secs(2)));
    }

    #[test]
    fn test_profiling_disabled_yields_no_snapshot() {
        let (reactor, _clock) = test_reactor(LoopConfig::default());
        assert!(reactor.profile_snapshot().is_none());
    }

    #[test]
    fn test_profiling_records_executions() {
        let config = LoopConfig {
            profile: true,
            ..LoopConfig::default()
        };
        let (reactor, clock) = test_reactor(config);

        reactor.call_later_named("tick_once", secs(1), || Ok(()));
        clock.advance(secs(2));
        reactor.tick();

        let snapshot = reactor.profile_snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        let row = &snapshot[0];
        assert_eq!(row.count, 1);
        assert_eq!(row.site.label, Some("tick_once"));
        assert!(row.max >= row.min);
    }
}
