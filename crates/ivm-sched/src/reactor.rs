//! Cooperative, single-threaded, readiness-based event loop.
//!
//! Sources declare a monotonic "ready at" instant; the reactor sleeps until
//! the earliest one, then dispatches every due source exactly once and goes
//! back to sleep. All sources run on the loop thread, so no source needs
//! internal locking and no two dispatches on the same source can overlap.
//! The only cross-thread surface is the quit flag, which a signal-handler
//! thread may set to break the loop out of its sleep.

use crate::clock::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// What the reactor should do with a source after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep the source attached.
    Keep,
    /// Remove the source from the loop.
    Detach,
}

/// A dispatchable event source.
pub trait Source {
    /// Monotonic instant (microseconds) at which this source wants to run,
    /// or `None` while unarmed.
    fn ready_at(&self) -> Option<i64>;

    /// Run the source once. Called by the reactor when `ready_at` has
    /// elapsed, at most once per elapsed deadline.
    fn dispatch(&mut self) -> Dispatch;
}

/// Handle for a source attached to a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceId(usize);

/// Outcome of one reactor iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Dispatched this many due sources.
    Dispatched(usize),
    /// No armed source is attached; there is nothing to wait for.
    Idle,
    /// Quit was requested.
    Quit,
}

/// Thread-safe handle that breaks a running reactor out of its loop.
///
/// Safe to use from a signal-handler thread: the flag is an atomic store, and
/// the interrupted sleep returns control to the loop, which re-checks it.
#[derive(Debug, Clone)]
pub struct QuitHandle {
    flag: Arc<AtomicBool>,
}

impl QuitHandle {
    /// Request the reactor to stop after the current dispatch.
    pub fn quit(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether quit has been requested.
    #[must_use]
    pub fn is_quit(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// The event loop.
///
/// The clock is dependency-injected so independent reactors can coexist and
/// tests can run against a [`ManualClock`](crate::clock::ManualClock) without
/// real sleeping.
pub struct Reactor<C: Clock> {
    clock: C,
    /// Slot vector; detached slots stay `None` so `SourceId`s remain stable.
    slots: Vec<Option<Box<dyn Source>>>,
    quit: Arc<AtomicBool>,
}

impl<C: Clock> Reactor<C> {
    /// Create a reactor driven by the given clock.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            slots: Vec::new(),
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a source and return its id.
    pub fn attach(&mut self, source: Box<dyn Source>) -> SourceId {
        // Reuse the first free slot so ids stay dense
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(source);
                return SourceId(idx);
            }
        }
        self.slots.push(Some(source));
        SourceId(self.slots.len() - 1)
    }

    /// Detach a source, returning ownership of it to the caller.
    ///
    /// Detaching is valid at any time and immediately prevents further
    /// dispatches. Returns `None` if the id is unknown or already detached.
    pub fn detach(&mut self, id: SourceId) -> Option<Box<dyn Source>> {
        let detached = self.slots.get_mut(id.0).and_then(Option::take);
        if detached.is_some() {
            debug!(id = id.0, "Source detached");
        }
        detached
    }

    /// Number of currently attached sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Get a handle that can stop the loop from another thread.
    #[must_use]
    pub fn quit_handle(&self) -> QuitHandle {
        QuitHandle {
            flag: Arc::clone(&self.quit),
        }
    }

    /// Earliest pending deadline across all attached sources.
    fn earliest_deadline(&self) -> Option<i64> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|s| s.ready_at())
            .min()
    }

    /// Run one iteration: wait for the earliest deadline, then dispatch every
    /// due source exactly once.
    pub fn turn(&mut self) -> Turn {
        loop {
            if self.quit.load(Ordering::Relaxed) {
                return Turn::Quit;
            }

            let Some(deadline) = self.earliest_deadline() else {
                return Turn::Idle;
            };

            let now = self.clock.now().monotonic;
            if now < deadline {
                trace!(deadline_us = deadline, now_us = now, "Sleeping until deadline");
                // May wake early on EINTR; loop re-checks quit and deadlines
                self.clock.sleep_until(deadline);
                continue;
            }

            return Turn::Dispatched(self.dispatch_due(now));
        }
    }

    /// Dispatch every source whose deadline has elapsed, once each.
    fn dispatch_due(&mut self, now: i64) -> usize {
        let mut dispatched = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let due = slot
                .as_deref()
                .and_then(|s| s.ready_at())
                .is_some_and(|d| d <= now);
            if !due {
                continue;
            }

            dispatched += 1;
            // Slot stays reserved during the dispatch; the source cannot
            // observe itself half-detached.
            if let Some(source) = slot.as_mut() {
                if source.dispatch() == Dispatch::Detach {
                    debug!(id = idx, "Source detached itself after dispatch");
                    *slot = None;
                }
            }
        }
        dispatched
    }

    /// Run until quit is requested or no armed source remains.
    pub fn run(&mut self) {
        debug!(sources = self.source_count(), "Entering reactor loop");
        loop {
            match self.turn() {
                Turn::Dispatched(_) => {}
                Turn::Idle => {
                    debug!("No armed sources remain, leaving reactor loop");
                    return;
                }
                Turn::Quit => {
                    debug!("Quit requested, leaving reactor loop");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Source that fires a fixed schedule of deadlines.
    struct ScriptedSource {
        deadlines: Vec<i64>,
        fired: Rc<RefCell<Vec<i64>>>,
        detach_after: Option<usize>,
    }

    impl ScriptedSource {
        fn new(deadlines: Vec<i64>, fired: Rc<RefCell<Vec<i64>>>) -> Self {
            Self {
                deadlines,
                fired,
                detach_after: None,
            }
        }
    }

    impl Source for ScriptedSource {
        fn ready_at(&self) -> Option<i64> {
            self.deadlines.first().copied()
        }

        fn dispatch(&mut self) -> Dispatch {
            let deadline = self.deadlines.remove(0);
            self.fired.borrow_mut().push(deadline);
            match self.detach_after {
                Some(n) if self.fired.borrow().len() >= n => Dispatch::Detach,
                _ => Dispatch::Keep,
            }
        }
    }

    #[test]
    fn test_turn_idle_without_sources() {
        let mut reactor = Reactor::new(ManualClock::new(0, 0));
        assert_eq!(reactor.turn(), Turn::Idle);
    }

    #[test]
    fn test_run_dispatches_in_deadline_order() {
        let clock = Rc::new(ManualClock::new(0, 0));
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut reactor = Reactor::new(Rc::clone(&clock));

        reactor.attach(Box::new(ScriptedSource::new(
            vec![100, 300],
            Rc::clone(&fired),
        )));
        reactor.attach(Box::new(ScriptedSource::new(
            vec![200],
            Rc::clone(&fired),
        )));

        reactor.run();

        // Sleeps teleport the manual clock, so each deadline fires on time
        // and in monotonic order
        assert_eq!(*fired.borrow(), vec![100, 200, 300]);
        assert_eq!(clock.now().monotonic, 300);
    }

    #[test]
    fn test_delayed_loop_dispatches_once_per_source() {
        let clock = Rc::new(ManualClock::new(0, 0));
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut reactor = Reactor::new(Rc::clone(&clock));

        reactor.attach(Box::new(ScriptedSource::new(
            vec![100, 200, 300],
            Rc::clone(&fired),
        )));

        // Loop was stalled far past several deadlines
        clock.advance(250);
        assert_eq!(reactor.turn(), Turn::Dispatched(1));
        // One dispatch for the elapsed window, not one per missed deadline
        assert_eq!(*fired.borrow(), vec![100]);
    }

    #[test]
    fn test_detach_returns_source() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut reactor = Reactor::new(ManualClock::new(0, 0));

        let id = reactor.attach(Box::new(ScriptedSource::new(
            vec![100],
            Rc::clone(&fired),
        )));
        assert_eq!(reactor.source_count(), 1);

        let source = reactor.detach(id);
        assert!(source.is_some());
        assert_eq!(reactor.source_count(), 0);

        // Double detach yields nothing
        assert!(reactor.detach(id).is_none());
        // Detached source never fires
        assert_eq!(reactor.turn(), Turn::Idle);
        assert!(fired.borrow().is_empty());
    }

    #[test]
    fn test_source_detaches_itself() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut reactor = Reactor::new(ManualClock::new(0, 0));

        let mut source = ScriptedSource::new(vec![100, 200, 300], Rc::clone(&fired));
        source.detach_after = Some(2);
        reactor.attach(Box::new(source));

        reactor.run();

        // The source removed itself after its second dispatch
        assert_eq!(*fired.borrow(), vec![100, 200]);
        assert_eq!(reactor.source_count(), 0);
    }

    #[test]
    fn test_quit_breaks_loop() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut reactor = Reactor::new(ManualClock::new(0, 0));
        reactor.attach(Box::new(ScriptedSource::new(
            vec![100, 200],
            Rc::clone(&fired),
        )));

        let quit = reactor.quit_handle();
        assert!(!quit.is_quit());
        quit.quit();

        reactor.run();
        // Quit observed before any dispatch
        assert!(fired.borrow().is_empty());
        assert_eq!(reactor.source_count(), 1);
    }

    #[test]
    fn test_slot_reuse_after_detach() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut reactor = Reactor::new(ManualClock::new(0, 0));

        let a = reactor.attach(Box::new(ScriptedSource::new(vec![], Rc::clone(&fired))));
        let b = reactor.attach(Box::new(ScriptedSource::new(vec![], Rc::clone(&fired))));
        assert_ne!(a, b);

        reactor.detach(a);
        let c = reactor.attach(Box::new(ScriptedSource::new(vec![], Rc::clone(&fired))));
        // Freed slot is reused
        assert_eq!(a, c);
        assert_eq!(reactor.source_count(), 2);
    }
}
