use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::thread_local;
use std::time::Duration;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future;
use futures::task::LocalSpawnExt;

use crate::config::MvcConfig;
use crate::platform::{Clock, DefaultScheduler, ManualClock, RuntimeScheduler};
use crate::scheduler::SchedulerState;

pub type TaskId = u64;

type Task = Box<dyn FnOnce() + 'static>;

struct TimedTask {
    id: TaskId,
    due: Duration,
    task: Task,
}

pub(crate) struct RuntimeInner {
    scheduler: Rc<dyn RuntimeScheduler>,
    clock: Rc<dyn Clock>,
    config: RefCell<MvcConfig>,
    microtasks: RefCell<VecDeque<Task>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    polls: Rc<Cell<u64>>,
    timed_tasks: RefCell<VecDeque<TimedTask>>, // sorted by (due, id)
    next_task_id: Cell<TaskId>,
    pub(crate) scheduling: RefCell<SchedulerState>,
}

impl RuntimeInner {
    fn new(scheduler: Rc<dyn RuntimeScheduler>, clock: Rc<dyn Clock>) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            scheduler,
            clock,
            config: RefCell::new(MvcConfig::default()),
            microtasks: RefCell::new(VecDeque::new()),
            pool: RefCell::new(pool),
            spawner,
            polls: Rc::new(Cell::new(0)),
            timed_tasks: RefCell::new(VecDeque::new()),
            next_task_id: Cell::new(1),
            scheduling: RefCell::new(SchedulerState::default()),
        }
    }

    fn queue_microtask(&self, task: Task) {
        self.microtasks.borrow_mut().push_back(task);
        self.scheduler.request_turn();
    }

    fn drain_microtasks(&self) -> bool {
        let mut ran = false;
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran = true;
                }
                None => break,
            }
        }
        ran
    }

    fn has_microtasks(&self) -> bool {
        !self.microtasks.borrow().is_empty()
    }

    fn spawn_local(&self, fut: impl Future<Output = ()> + 'static) {
        let polls = Rc::clone(&self.polls);
        let mut fut = Box::pin(fut);
        let counted = future::poll_fn(move |cx| {
            polls.set(polls.get() + 1);
            fut.as_mut().poll(cx)
        });
        if let Err(err) = self.spawner.spawn_local(counted) {
            log::warn!("dropping future, executor is shut down: {err}");
            return;
        }
        self.scheduler.request_turn();
    }

    fn poll_futures(&self) -> bool {
        let before = self.polls.get();
        match self.pool.try_borrow_mut() {
            Ok(mut pool) => pool.run_until_stalled(),
            // A future is already being polled further up the stack.
            Err(_) => return false,
        }
        self.polls.get() != before
    }

    fn schedule_task(&self, delay: Duration, task: Task) -> TaskId {
        let id = self.next_task_id.get();
        self.next_task_id.set(id + 1);
        let due = self.clock.now() + delay;
        let mut tasks = self.timed_tasks.borrow_mut();
        let index = tasks
            .iter()
            .position(|entry| entry.due > due)
            .unwrap_or(tasks.len());
        tasks.insert(index, TimedTask { id, due, task });
        drop(tasks);
        self.scheduler.request_turn();
        id
    }

    fn cancel_task(&self, id: TaskId) -> bool {
        let mut tasks = self.timed_tasks.borrow_mut();
        if let Some(index) = tasks.iter().position(|entry| entry.id == id) {
            tasks.remove(index);
            return true;
        }
        false
    }

    fn next_task_due(&self) -> Option<Duration> {
        self.timed_tasks.borrow().front().map(|entry| entry.due)
    }

    fn run_next_due_task(&self) -> bool {
        let now = self.clock.now();
        let next = {
            let mut tasks = self.timed_tasks.borrow_mut();
            match tasks.front() {
                Some(entry) if entry.due <= now => tasks.pop_front(),
                _ => None,
            }
        };
        match next {
            Some(entry) => {
                (entry.task)();
                true
            }
            None => false,
        }
    }

    /// Drains microtasks and polls futures until neither makes progress.
    fn run_until_stalled(&self) -> bool {
        let mut progressed = false;
        loop {
            let ran_microtasks = self.drain_microtasks();
            let polled = self.poll_futures();
            if !ran_microtasks && !polled {
                break;
            }
            progressed = true;
        }
        progressed
    }

    fn run_until_idle(&self) -> bool {
        let mut progressed = false;
        loop {
            if self.run_until_stalled() {
                progressed = true;
            }
            if !self.run_next_due_task() {
                break;
            }
            progressed = true;
        }
        progressed
    }
}

/// The single-threaded cooperative runtime.
///
/// Owns the microtask queue, a local future executor, delayed tasks, and the
/// scheduler state that update emitters consult. Creating a runtime makes it
/// the current runtime of the calling thread.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_platform(
            Rc::new(DefaultScheduler),
            Rc::new(ManualClock::default()),
        )
    }

    pub fn with_platform(scheduler: Rc<dyn RuntimeScheduler>, clock: Rc<dyn Clock>) -> Self {
        let runtime = Self {
            inner: Rc::new(RuntimeInner::new(scheduler, clock)),
        };
        LAST_RUNTIME.with(|slot| *slot.borrow_mut() = Some(runtime.handle()));
        runtime
    }

    pub fn with_config(self, config: MvcConfig) -> Self {
        *self.inner.config.borrow_mut() = config;
        self
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    /// Runs `f` with this runtime as the thread's current runtime.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        self.handle().enter(f)
    }

    pub fn config(&self) -> MvcConfig {
        self.inner.config.borrow().clone()
    }

    pub fn set_config(&self, config: MvcConfig) {
        *self.inner.config.borrow_mut() = config;
    }

    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    pub fn drain_microtasks(&self) -> bool {
        self.inner.drain_microtasks()
    }

    pub fn run_until_stalled(&self) -> bool {
        self.inner.run_until_stalled()
    }

    pub fn run_next_due_task(&self) -> bool {
        self.inner.run_next_due_task()
    }

    /// Runs everything runnable: microtasks, futures and delayed tasks that
    /// are due according to the clock.
    pub fn run_until_idle(&self) -> bool {
        self.inner.run_until_idle()
    }

    pub fn next_task_due(&self) -> Option<Duration> {
        self.inner.next_task_due()
    }

    pub fn has_pending_work(&self) -> bool {
        self.inner.has_microtasks() || self.inner.next_task_due().is_some()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct RuntimeHandle(pub(crate) Weak<RuntimeInner>);

impl RuntimeHandle {
    /// The innermost entered runtime, or the most recently created one.
    pub fn current() -> Option<RuntimeHandle> {
        if let Some(handle) = ACTIVE_RUNTIMES.with(|stack| stack.borrow().last().cloned()) {
            return Some(handle);
        }
        LAST_RUNTIME.with(|slot| slot.borrow().clone())
    }

    pub(crate) fn upgrade(&self) -> Option<Rc<RuntimeInner>> {
        self.0.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Queues `task` to run at the next microtask checkpoint. Runs it
    /// immediately if the runtime is gone.
    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        if let Some(inner) = self.0.upgrade() {
            inner.queue_microtask(Box::new(task));
        } else {
            task();
        }
    }

    pub fn spawn_local(&self, fut: impl Future<Output = ()> + 'static) {
        if let Some(inner) = self.0.upgrade() {
            inner.spawn_local(fut);
        } else {
            log::warn!("dropping future spawned on a runtime that no longer exists");
        }
    }

    pub fn schedule_task(&self, delay: Duration, task: impl FnOnce() + 'static) -> Option<TaskId> {
        self.0
            .upgrade()
            .map(|inner| inner.schedule_task(delay, Box::new(task)))
    }

    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.cancel_task(id))
            .unwrap_or(false)
    }

    pub fn config(&self) -> MvcConfig {
        self.0
            .upgrade()
            .map(|inner| inner.config.borrow().clone())
            .unwrap_or_default()
    }

    /// Asks the host loop for a turn, e.g. after marking tree work dirty.
    pub fn request_turn(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.scheduler.request_turn();
        }
    }

    pub(crate) fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        push_active_runtime(self);
        let _guard = ActiveGuard;
        f()
    }
}

struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        pop_active_runtime();
    }
}

thread_local! {
    static ACTIVE_RUNTIMES: RefCell<Vec<RuntimeHandle>> = RefCell::new(Vec::new());
    static LAST_RUNTIME: RefCell<Option<RuntimeHandle>> = RefCell::new(None);
}

pub(crate) fn push_active_runtime(handle: &RuntimeHandle) {
    ACTIVE_RUNTIMES.with(|stack| stack.borrow_mut().push(handle.clone()));
    LAST_RUNTIME.with(|slot| *slot.borrow_mut() = Some(handle.clone()));
}

pub(crate) fn pop_active_runtime() {
    ACTIVE_RUNTIMES.with(|stack| {
        stack.borrow_mut().pop();
    });
}
