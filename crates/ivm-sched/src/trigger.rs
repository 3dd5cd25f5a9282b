//! Wall-clock-aligned interval trigger.
//!
//! The trigger fires on wall-clock boundaries of its interval (a 10 s
//! interval fires at :00, :10, :20, ...) rather than at arbitrary offsets
//! from process start. Each deadline is computed from a fresh clock reading:
//! take the next wall boundary strictly after "now", convert it into the
//! monotonic domain with the current wall-to-monotonic offset, and arm the
//! reactor on that monotonic instant. Recomputing the offset every cycle
//! makes each tick self-correct after NTP corrections, manual clock changes,
//! and DST shifts instead of accumulating drift.

use crate::clock::{Clock, ClockReading};
use crate::reactor::{Dispatch, Source};
use ivm_common::error::{IvmError, IvmResult};
use ivm_common::metrics::TickMetrics;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Default lateness sample buffer size.
const DEFAULT_HISTOGRAM_SIZE: usize = 1_000;
/// Default lateness tolerance in microseconds.
const DEFAULT_TOLERANCE_US: i64 = 50_000;

/// A positive trigger interval in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval(i64);

impl Interval {
    /// Create an interval from microseconds.
    ///
    /// # Errors
    ///
    /// Returns [`IvmError::InvalidInterval`] unless `micros > 0`.
    pub fn from_micros(micros: i64) -> IvmResult<Self> {
        if micros <= 0 {
            return Err(IvmError::InvalidInterval { micros });
        }
        Ok(Self(micros))
    }

    /// Create an interval from a [`Duration`].
    ///
    /// # Errors
    ///
    /// Returns [`IvmError::InvalidInterval`] for a zero duration and
    /// [`IvmError::Config`] for durations beyond `i64` microseconds.
    pub fn from_duration(duration: Duration) -> IvmResult<Self> {
        let micros = i64::try_from(duration.as_micros())
            .map_err(|_| IvmError::Config(format!("interval too large: {duration:?}")))?;
        Self::from_micros(micros)
    }

    /// The interval in microseconds.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

/// Callback continuation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep the schedule: re-arm for the next boundary.
    Continue,
    /// Cancel the schedule: disarm and detach from the loop.
    Stop,
}

/// Smallest wall-clock instant strictly greater than `wall` that is an exact
/// multiple of the interval.
///
/// Strictly greater: a reading that lands exactly on a boundary yields the
/// *next* boundary, so the same boundary can never fire twice.
#[must_use]
pub fn next_wall_boundary(wall: i64, interval: Interval) -> i64 {
    (wall.div_euclid(interval.as_micros()) + 1) * interval.as_micros()
}

/// Convert the next wall boundary after `reading.wall` into the monotonic
/// domain of the same reading.
///
/// The wall-to-monotonic offset is taken from this reading alone; it is not
/// carried over from previous cycles, so any wall-clock jump since the last
/// tick is absorbed here.
#[must_use]
pub fn next_deadline(reading: ClockReading, interval: Interval) -> i64 {
    reading.monotonic + (next_wall_boundary(reading.wall, interval) - reading.wall)
}

/// A reactor source that fires a callback on every wall-clock boundary of its
/// interval.
///
/// Lifecycle: created unarmed, [`start`](IntervalTrigger::start) arms it, each
/// dispatch re-arms it (unless the callback returns [`Tick::Stop`]), and
/// detaching it from the reactor is the sole teardown action - it owns no
/// other resources.
pub struct IntervalTrigger<C: Clock> {
    interval: Interval,
    clock: C,
    /// Pending monotonic deadline; `None` = unarmed. Single source of truth
    /// for "when to wake".
    deadline: Option<i64>,
    callback: Box<dyn FnMut() -> Tick>,
    metrics: Rc<RefCell<TickMetrics>>,
}

impl<C: Clock> IntervalTrigger<C> {
    /// Create an unarmed trigger.
    pub fn new(interval: Interval, clock: C, callback: impl FnMut() -> Tick + 'static) -> Self {
        Self {
            interval,
            clock,
            deadline: None,
            callback: Box::new(callback),
            metrics: Rc::new(RefCell::new(TickMetrics::new(
                DEFAULT_HISTOGRAM_SIZE,
                DEFAULT_TOLERANCE_US,
            ))),
        }
    }

    /// Replace the lateness metrics collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: TickMetrics) -> Self {
        self.metrics = Rc::new(RefCell::new(metrics));
        self
    }

    /// Shared handle to the lateness metrics, usable after the trigger has
    /// been boxed into a reactor.
    #[must_use]
    pub fn metrics(&self) -> Rc<RefCell<TickMetrics>> {
        Rc::clone(&self.metrics)
    }

    /// The configured interval.
    #[must_use]
    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Whether a deadline is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arm the trigger: compute and install the first deadline.
    ///
    /// # Errors
    ///
    /// Returns [`IvmError::InvalidStateTransition`] if already armed.
    pub fn start(&mut self) -> IvmResult<()> {
        if self.deadline.is_some() {
            return Err(IvmError::InvalidStateTransition {
                from: "ARMED".into(),
                to: "ARMED".into(),
            });
        }

        let deadline = next_deadline(self.clock.now(), self.interval);
        debug!(
            interval_us = self.interval.as_micros(),
            deadline_us = deadline,
            "Trigger armed"
        );
        self.deadline = Some(deadline);
        Ok(())
    }
}

impl<C: Clock> Source for IntervalTrigger<C> {
    fn ready_at(&self) -> Option<i64> {
        self.deadline
    }

    fn dispatch(&mut self) -> Dispatch {
        let Some(deadline) = self.deadline.take() else {
            // Dispatched while unarmed: nothing to fire, stay attached.
            return Dispatch::Keep;
        };

        self.metrics
            .borrow_mut()
            .record_us(self.clock.now().monotonic - deadline);

        // The callback runs to completion before the next deadline is
        // computed. The fresh reading below therefore always yields a
        // boundary strictly after "now": a slow callback skips boundaries,
        // it never causes a double fire or queued catch-up fires.
        match (self.callback)() {
            Tick::Continue => {
                let next = next_deadline(self.clock.now(), self.interval);
                if next - deadline >= 2 * self.interval.as_micros() {
                    debug!(
                        skipped = (next - deadline) / self.interval.as_micros() - 1,
                        "Boundaries elapsed during dispatch, skipping to next"
                    );
                }
                trace!(deadline_us = next, "Trigger re-armed");
                self.deadline = Some(next);
                Dispatch::Keep
            }
            Tick::Stop => {
                debug!("Callback requested stop, disarming trigger");
                Dispatch::Detach
            }
        }
    }
}
