//! Delivery policy for update emitters.
//!
//! The mode lives in the thread's [`Runtime`](crate::Runtime) rather than in
//! a free global: it is set when a batch or immediate section is entered,
//! restored when the section's guard drops, and never left dangling by an
//! early return or a dropped future.

use std::future::Future;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use slotmap::SlotMap;

use crate::emitter::{EmitterInner, UpdateEmitter};
use crate::error::MvcError;
use crate::runtime::{RuntimeHandle, RuntimeInner};

slotmap::new_key_type! {
    pub(crate) struct EmitterKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// Coalesce into one flush per emitter at the next microtask checkpoint.
    Deferred,
    /// Hold every flush until the enclosing batch resolves.
    Batching,
    /// Flush synchronously inside `queue()`.
    Immediate,
}

#[derive(Default)]
pub(crate) struct SchedulerState {
    batch_depth: usize,
    immediate_depth: usize,
    pub(crate) emitters: SlotMap<EmitterKey, Weak<EmitterInner>>,
    pub(crate) touched: IndexSet<EmitterKey>,
}

impl SchedulerState {
    pub(crate) fn mode(&self) -> SchedulerMode {
        if self.batch_depth > 0 {
            SchedulerMode::Batching
        } else if self.immediate_depth > 0 {
            SchedulerMode::Immediate
        } else {
            SchedulerMode::Deferred
        }
    }

    fn live_emitters(&self) -> Vec<UpdateEmitter> {
        self.emitters
            .values()
            .filter_map(Weak::upgrade)
            .map(UpdateEmitter::from_inner)
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.emitters.len()
    }
}

pub(crate) fn mode_of(runtime: &RuntimeInner) -> SchedulerMode {
    runtime.scheduling.borrow().mode()
}

/// Flushes every live emitter that has an update waiting, either because it
/// had no callback or because its microtask has not run yet.
pub(crate) fn update_all_on(runtime: &RuntimeInner) {
    let emitters = runtime.scheduling.borrow().live_emitters();
    for emitter in emitters {
        if emitter.has_pending_update() || emitter.is_queued() {
            emitter.update();
        }
    }
}

/// Flushes each emitter touched during the batch once, in first-touched order.
pub(crate) fn resolve_batches_on(runtime: &RuntimeInner) {
    loop {
        let emitters: Vec<UpdateEmitter> = {
            let mut state = runtime.scheduling.borrow_mut();
            if state.touched.is_empty() {
                break;
            }
            let touched = std::mem::take(&mut state.touched);
            touched
                .into_iter()
                .filter_map(|key| state.emitters.get(key).and_then(Weak::upgrade))
                .map(UpdateEmitter::from_inner)
                .collect()
        };
        log::trace!("resolving batch of {} emitters", emitters.len());
        for emitter in emitters {
            emitter.update();
        }
    }
}

fn reset_on(runtime: &RuntimeInner) {
    resolve_batches_on(runtime);
    let mut state = runtime.scheduling.borrow_mut();
    state.batch_depth = 0;
    state.immediate_depth = 0;
}

fn current_runtime() -> Result<Rc<RuntimeInner>, MvcError> {
    RuntimeHandle::current()
        .and_then(|handle| handle.upgrade())
        .ok_or(MvcError::NoRuntime)
}

/// The delivery mode of the current thread's runtime.
pub fn scheduler_mode() -> SchedulerMode {
    current_runtime()
        .map(|runtime| mode_of(&runtime))
        .unwrap_or(SchedulerMode::Deferred)
}

pub fn update_all() -> Result<(), MvcError> {
    let runtime = current_runtime()?;
    update_all_on(&runtime);
    Ok(())
}

pub fn resolve_batches() -> Result<(), MvcError> {
    let runtime = current_runtime()?;
    resolve_batches_on(&runtime);
    Ok(())
}

/// Resolves the open batch and returns to deferred delivery.
pub fn reset() -> Result<(), MvcError> {
    let runtime = current_runtime()?;
    reset_on(&runtime);
    Ok(())
}

struct BatchGuard {
    runtime: Rc<RuntimeInner>,
}

impl BatchGuard {
    fn enter(runtime: Rc<RuntimeInner>) -> Result<Self, MvcError> {
        let first = {
            let state = runtime.scheduling.borrow();
            if state.immediate_depth > 0 {
                return Err(MvcError::Configuration(
                    "cannot start a batch while immediate mode is active",
                ));
            }
            state.batch_depth == 0
        };
        if first {
            update_all_on(&runtime);
        }
        runtime.scheduling.borrow_mut().batch_depth += 1;
        Ok(Self { runtime })
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outermost = {
            let mut state = self.runtime.scheduling.borrow_mut();
            state.batch_depth = state.batch_depth.saturating_sub(1);
            state.batch_depth == 0
        };
        if outermost {
            reset_on(&self.runtime);
        }
    }
}

struct ImmediateGuard {
    runtime: Rc<RuntimeInner>,
}

impl ImmediateGuard {
    fn enter(runtime: Rc<RuntimeInner>) -> Result<Self, MvcError> {
        {
            let mut state = runtime.scheduling.borrow_mut();
            if state.batch_depth > 0 {
                return Err(MvcError::Configuration(
                    "cannot enter immediate mode while a batch is open",
                ));
            }
            state.immediate_depth += 1;
        }
        Ok(Self { runtime })
    }
}

impl Drop for ImmediateGuard {
    fn drop(&mut self) {
        let outermost = {
            let mut state = self.runtime.scheduling.borrow_mut();
            state.immediate_depth = state.immediate_depth.saturating_sub(1);
            state.immediate_depth == 0
        };
        if outermost {
            reset_on(&self.runtime);
        }
    }
}

/// Runs `f` as one batch: every emitter touched before the returned future
/// completes flushes exactly once, after `f` resolves, including across
/// awaits inside `f`. Nested batches join the outermost one.
pub async fn run_batched<F, Fut, R>(f: F) -> Result<R, MvcError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = R>,
{
    let guard = BatchGuard::enter(current_runtime()?)?;
    let result = f().await;
    drop(guard);
    Ok(result)
}

/// Runs `f` with every `queue()` flushing synchronously.
pub fn run_immediate<R>(f: impl FnOnce() -> R) -> Result<R, MvcError> {
    let guard = ImmediateGuard::enter(current_runtime()?)?;
    let result = f();
    drop(guard);
    Ok(result)
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
