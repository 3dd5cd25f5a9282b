//! Two-domain clock adapter.
//!
//! Scheduling needs two different time readings: a monotonic counter that is
//! immune to wall-clock adjustments (deadlines are armed against it) and the
//! system wall clock (alignment boundaries are computed against it). Both are
//! expressed in microseconds; the monotonic epoch is arbitrary, the wall epoch
//! is the Unix epoch.

use ivm_common::error::{IvmError, IvmResult};
use std::cell::Cell;
use std::rc::Rc;

/// A pair of clock readings taken back to back.
///
/// The two readings come from two consecutive `clock_gettime` calls rather
/// than one atomic read. The gap between them is well under a microsecond,
/// negligible against second-scale intervals, so the difference
/// `wall - monotonic` is treated as valid for the duration of one deadline
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    /// Monotonic microseconds since an arbitrary epoch. Never decreases,
    /// unaffected by wall-clock adjustments.
    pub monotonic: i64,
    /// Microseconds since the Unix epoch. May jump forward or backward at
    /// any point (NTP correction, manual change, DST).
    pub wall: i64,
}

/// Read-only time source for the loop thread.
///
/// Implementations must not block in [`now`](Clock::now) and need no internal
/// locking: the cooperative model keeps all callers on one thread.
pub trait Clock {
    /// Take a monotonic and a wall reading, as close together as possible.
    fn now(&self) -> ClockReading;

    /// Block until the monotonic clock reaches `deadline` (microseconds).
    ///
    /// May return early when interrupted by a signal; callers re-check their
    /// deadlines after every wake.
    fn sleep_until(&self, deadline: i64);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> ClockReading {
        (**self).now()
    }

    fn sleep_until(&self, deadline: i64) {
        (**self).sleep_until(deadline);
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now(&self) -> ClockReading {
        (**self).now()
    }

    fn sleep_until(&self, deadline: i64) {
        (**self).sleep_until(deadline);
    }
}

/// The real system clock: `CLOCK_MONOTONIC` + `CLOCK_REALTIME`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    _probed: (),
}

impl SystemClock {
    /// Verify both clocks are readable and return the adapter.
    ///
    /// A functioning clock is a baseline precondition for everything else in
    /// the hosting application, so this is checked once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`IvmError::ClockUnavailable`] if either clock cannot be read.
    pub fn probe() -> IvmResult<Self> {
        read_clock_us(nix::time::ClockId::CLOCK_MONOTONIC)
            .map_err(|e| IvmError::ClockUnavailable(format!("CLOCK_MONOTONIC: {e}")))?;
        read_clock_us(nix::time::ClockId::CLOCK_REALTIME)
            .map_err(|e| IvmError::ClockUnavailable(format!("CLOCK_REALTIME: {e}")))?;
        Ok(Self { _probed: () })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockReading {
        // Both clock ids were verified by probe(); a failure here means the
        // process-startup precondition no longer holds, which is not a
        // recoverable runtime condition.
        let monotonic = read_clock_us(nix::time::ClockId::CLOCK_MONOTONIC)
            .expect("CLOCK_MONOTONIC readable after probe");
        let wall = read_clock_us(nix::time::ClockId::CLOCK_REALTIME)
            .expect("CLOCK_REALTIME readable after probe");
        ClockReading { monotonic, wall }
    }

    #[cfg(target_os = "linux")]
    fn sleep_until(&self, deadline: i64) {
        if deadline <= self.now().monotonic {
            return;
        }

        let ts = libc::timespec {
            tv_sec: (deadline / 1_000_000) as libc::time_t,
            tv_nsec: ((deadline % 1_000_000) * 1_000) as libc::c_long,
        };

        // Absolute sleep against the same clock the deadline was computed
        // from, so a wall-clock jump during the sleep cannot shift the wake
        // instant. EINTR wakes us early; the reactor re-checks deadlines.
        //
        // SAFETY: clock_nanosleep is safe with valid parameters
        unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &ts,
                std::ptr::null_mut(),
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sleep_until(&self, deadline: i64) {
        let now = self.now().monotonic;
        if deadline > now {
            std::thread::sleep(std::time::Duration::from_micros((deadline - now) as u64));
        }
    }
}

/// Read one clock in microseconds.
fn read_clock_us(id: nix::time::ClockId) -> nix::Result<i64> {
    let ts = nix::time::clock_gettime(id)?;
    Ok(ts.tv_sec() as i64 * 1_000_000 + ts.tv_nsec() as i64 / 1_000)
}

/// Deterministic clock for tests and simulations.
///
/// Time only moves when told to: [`advance`](ManualClock::advance) moves both
/// domains in lock-step, [`jump_wall`](ManualClock::jump_wall) models a
/// wall-clock discontinuity, and [`sleep_until`](Clock::sleep_until) teleports
/// the monotonic clock to the requested deadline instead of blocking.
#[derive(Debug)]
pub struct ManualClock {
    reading: Cell<ClockReading>,
}

impl ManualClock {
    /// Create a clock at the given monotonic and wall instants.
    #[must_use]
    pub fn new(monotonic: i64, wall: i64) -> Self {
        Self {
            reading: Cell::new(ClockReading { monotonic, wall }),
        }
    }

    /// Advance both domains by `delta_us`.
    pub fn advance(&self, delta_us: i64) {
        let r = self.reading.get();
        self.reading.set(ClockReading {
            monotonic: r.monotonic + delta_us,
            wall: r.wall + delta_us,
        });
    }

    /// Jump the wall clock by `delta_us` (negative = backward), leaving the
    /// monotonic clock untouched.
    pub fn jump_wall(&self, delta_us: i64) {
        let r = self.reading.get();
        self.reading.set(ClockReading {
            monotonic: r.monotonic,
            wall: r.wall + delta_us,
        });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> ClockReading {
        self.reading.get()
    }

    fn sleep_until(&self, deadline: i64) {
        let r = self.reading.get();
        if deadline > r.monotonic {
            self.advance(deadline - r.monotonic);
        }
    }
}
