//! Platform abstraction traits for the easy-mvc runtime.
//!
//! The runtime never sleeps or spawns threads itself. It tells the host when
//! there is work to drive and asks a [`Clock`] what time it is, so the same
//! core runs under a blocking `std` loop, an embedding event loop, or a
//! manually advanced test clock.

use std::cell::Cell;
use std::time::Duration;

/// Wakes whatever loop drives the runtime.
///
/// Implementations are called every time a microtask, spawned future or
/// delayed task is enqueued. A host that polls the runtime on its own
/// schedule can ignore the request.
pub trait RuntimeScheduler {
    /// Request that the host give the runtime a turn soon.
    fn request_turn(&self);
}

/// Provides monotonic time to the runtime.
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
}

#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn request_turn(&self) {}
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}
