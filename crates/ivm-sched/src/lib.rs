//! Wall-clock-aligned periodic trigger scheduling.
//!
//! The crate is built from three pieces, in dependency order:
//!
//! 1. [`clock`] - a two-domain clock adapter pairing a monotonic reading
//!    (scheduling deadlines) with a wall-clock reading (alignment boundaries).
//! 2. [`reactor`] - a cooperative, single-threaded, readiness-based event
//!    loop: sources declare a monotonic "ready at" instant and the loop wakes
//!    and dispatches them, at most once per elapsed deadline.
//! 3. [`trigger`] - the interval trigger itself: it computes the next
//!    wall-clock boundary for its interval, converts it into the monotonic
//!    domain, and re-arms after every dispatch from a fresh clock reading so
//!    wall-clock jumps and slow callbacks self-correct instead of
//!    accumulating drift.

pub mod clock;
pub mod reactor;
pub mod trigger;

pub use clock::{Clock, ClockReading, ManualClock, SystemClock};
pub use reactor::{Dispatch, QuitHandle, Reactor, Source, SourceId, Turn};
pub use trigger::{Interval, IntervalTrigger, Tick};
