//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `easy-mvc-core`, plus a blocking loop that
//! drives a [`Runtime`] and a render callback until there is nothing left to
//! do.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use easy_mvc_core::{Clock, MvcConfig, MvcError, Runtime, RuntimeHandle, RuntimeScheduler};

type Waker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Scheduler that records turn requests in an atomic flag and forwards them
/// to an optional waker.
pub struct StdScheduler {
    turn_requested: AtomicBool,
    waker: RwLock<Option<Waker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            turn_requested: AtomicBool::new(false),
            waker: RwLock::new(None),
        }
    }

    /// Returns whether a turn has been requested since the last call.
    pub fn take_turn_request(&self) -> bool {
        self.turn_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker that will be invoked whenever a turn is requested.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        let mut slot = self.waker.write().unwrap_or_else(|err| err.into_inner());
        *slot = Some(Arc::new(waker));
    }

    pub fn clear_waker(&self) {
        let mut slot = self.waker.write().unwrap_or_else(|err| err.into_inner());
        *slot = None;
    }

    fn wake(&self) {
        let waker = self
            .waker
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("turn_requested", &self.turn_requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn request_turn(&self) {
        self.turn_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Monotonic clock measuring from its creation.
#[derive(Debug, Clone)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Convenience container bundling the standard scheduler and clock with a
/// [`Runtime`] that uses them.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Rc<StdScheduler>,
    clock: Rc<StdClock>,
    runtime: Runtime,
}

impl StdRuntime {
    /// Creates a runtime configured from the environment.
    pub fn new() -> Self {
        Self::with_config(MvcConfig::from_env())
    }

    pub fn with_config(config: MvcConfig) -> Self {
        let scheduler = Rc::new(StdScheduler::default());
        let clock = Rc::new(StdClock::default());
        let runtime = Runtime::with_platform(scheduler.clone(), clock.clone()).with_config(config);
        Self {
            scheduler,
            clock,
            runtime,
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn scheduler(&self) -> Rc<StdScheduler> {
        Rc::clone(&self.scheduler)
    }

    pub fn clock(&self) -> Rc<StdClock> {
        Rc::clone(&self.clock)
    }

    /// Returns whether a turn was requested since the last poll.
    pub fn take_turn_request(&self) -> bool {
        self.scheduler.take_turn_request()
    }

    /// Registers a waker to be called when the runtime requests a turn.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_waker(waker);
    }

    pub fn clear_waker(&self) {
        self.scheduler.clear_waker();
    }

    /// Runs turns until no work is left, sleeping until the next delayed
    /// task when only delayed tasks remain. `turn` runs after the runtime's
    /// queues are drained on every turn, which is where hosts render.
    pub fn block_until_idle(
        &self,
        mut turn: impl FnMut() -> Result<(), MvcError>,
    ) -> Result<(), MvcError> {
        loop {
            self.scheduler.take_turn_request();
            self.runtime.run_until_idle();
            turn()?;
            if self.scheduler.take_turn_request() {
                continue;
            }
            match self.runtime.next_task_due() {
                Some(due) => {
                    let now = self.clock.now();
                    if due > now {
                        log::trace!("sleeping {:?} until the next delayed task", due - now);
                        thread::sleep(due - now);
                    }
                }
                None => return Ok(()),
            }
        }
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}
