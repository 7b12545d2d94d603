use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::runtime::{RuntimeHandle, RuntimeInner};
use crate::scheduler::{self, EmitterKey, SchedulerMode};

type Callback = Rc<dyn Fn()>;

pub(crate) struct EmitterInner {
    runtime: RuntimeHandle,
    key: Cell<Option<EmitterKey>>,
    callback: RefCell<Option<Callback>>,
    has_pending_update: Cell<bool>,
    queued: Cell<bool>,
}

impl Drop for EmitterInner {
    fn drop(&mut self) {
        let (Some(key), Some(runtime)) = (self.key.take(), self.runtime.upgrade()) else {
            return;
        };
        if let Ok(mut state) = runtime.scheduling.try_borrow_mut() {
            state.emitters.remove(key);
            state.touched.shift_remove(&key);
        };
    }
}

/// Turns "a dependency of this render changed" into "call the registered
/// re-render callback", under the runtime's current [`SchedulerMode`].
///
/// An update that arrives while no callback is registered is remembered and
/// delivered by the next [`on`](Self::on).
#[derive(Clone)]
pub struct UpdateEmitter {
    inner: Rc<EmitterInner>,
}

impl UpdateEmitter {
    /// Creates an emitter registered with the current thread's runtime.
    pub fn new() -> Self {
        let runtime = RuntimeHandle::current().unwrap_or(RuntimeHandle(std::rc::Weak::new()));
        Self::with_runtime(runtime)
    }

    pub fn with_runtime(runtime: RuntimeHandle) -> Self {
        let emitter = Self {
            inner: Rc::new(EmitterInner {
                runtime,
                key: Cell::new(None),
                callback: RefCell::new(None),
                has_pending_update: Cell::new(false),
                queued: Cell::new(false),
            }),
        };
        if let Some(runtime) = emitter.inner.runtime.upgrade() {
            emitter.register(&runtime);
        }
        emitter
    }

    pub(crate) fn from_inner(inner: Rc<EmitterInner>) -> Self {
        Self { inner }
    }

    fn register(&self, runtime: &RuntimeInner) -> EmitterKey {
        if let Some(key) = self.inner.key.get() {
            return key;
        }
        let key = runtime
            .scheduling
            .borrow_mut()
            .emitters
            .insert(Rc::downgrade(&self.inner));
        self.inner.key.set(Some(key));
        key
    }

    /// Removes the emitter from the runtime registry. Mounted views call this
    /// on unmount; [`on`](Self::on) registers the emitter again.
    pub fn dispose(&self) {
        let Some(key) = self.inner.key.take() else {
            return;
        };
        if let Some(runtime) = self.inner.runtime.upgrade() {
            let mut state = runtime.scheduling.borrow_mut();
            state.emitters.remove(key);
            state.touched.shift_remove(&key);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.inner.key.get().is_some()
    }

    pub fn has_pending_update(&self) -> bool {
        self.inner.has_pending_update.get()
    }

    pub fn is_queued(&self) -> bool {
        self.inner.queued.get()
    }

    pub fn has_callback(&self) -> bool {
        self.inner.callback.borrow().is_some()
    }

    pub fn on(&self, callback: impl Fn() + 'static) {
        *self.inner.callback.borrow_mut() = Some(Rc::new(callback));
        let held_by_batch = match self.inner.runtime.upgrade() {
            Some(runtime) => {
                let key = self.register(&runtime);
                let state = runtime.scheduling.borrow();
                state.mode() == SchedulerMode::Batching && state.touched.contains(&key)
            }
            None => false,
        };
        if self.inner.has_pending_update.get() && !held_by_batch {
            self.update();
        }
    }

    pub fn off(&self) {
        self.inner.callback.borrow_mut().take();
    }

    /// Entry point for the reactive scheduler hook.
    pub fn queue(&self) {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            self.update();
            return;
        };
        let mode = scheduler::mode_of(&runtime);
        if self.inner.queued.get() && mode != SchedulerMode::Immediate {
            return;
        }
        match mode {
            SchedulerMode::Batching => {
                self.inner.has_pending_update.set(true);
                let key = self.register(&runtime);
                runtime.scheduling.borrow_mut().touched.insert(key);
            }
            SchedulerMode::Immediate => self.update(),
            SchedulerMode::Deferred => {
                self.inner.queued.set(true);
                let weak = Rc::downgrade(&self.inner);
                self.inner.runtime.queue_microtask(move || {
                    if let Some(inner) = weak.upgrade() {
                        if inner.queued.get() {
                            UpdateEmitter { inner }.update();
                        }
                    }
                });
            }
        }
    }

    /// Flushes: invokes the callback, or remembers the update if none is
    /// registered.
    pub fn update(&self) {
        self.inner.queued.set(false);
        let callback = self.inner.callback.borrow().clone();
        match callback {
            Some(callback) => {
                self.inner.has_pending_update.set(false);
                callback();
            }
            None => self.inner.has_pending_update.set(true),
        }
    }
}

impl Default for UpdateEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UpdateEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateEmitter")
            .field("registered", &self.is_registered())
            .field("has_callback", &self.has_callback())
            .field("has_pending_update", &self.has_pending_update())
            .field("queued", &self.is_queued())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/emitter_tests.rs"]
mod tests;
