//! The minimal reactive primitive the view layer builds on.
//!
//! A [`Store`] records which running [`Reaction`] read which of its fields.
//! Writing a field notifies the reactions that read it (or read the whole
//! store). A reaction with a scheduler hands the notification to it; one
//! without re-runs its body.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread_local;

use indexmap::IndexMap;

type ReactionId = usize;
type FieldKey = Option<&'static str>;

static NEXT_REACTION_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // `None` entries mark untracked sections.
    static OBSERVER_STACK: RefCell<Vec<Option<Rc<ReactionCore>>>> = RefCell::new(Vec::new());
}

fn current_observer() -> Option<Rc<ReactionCore>> {
    OBSERVER_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

fn is_running(id: ReactionId) -> bool {
    OBSERVER_STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .flatten()
            .any(|reaction| reaction.id == id)
    })
}

struct ObserverGuard;

impl ObserverGuard {
    fn push(observer: Option<Rc<ReactionCore>>) -> Self {
        OBSERVER_STACK.with(|stack| stack.borrow_mut().push(observer));
        ObserverGuard
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        OBSERVER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Runs `f` without recording any reads as dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ObserverGuard::push(None);
    f()
}

trait Subscribable {
    fn unsubscribe(&self, reaction: ReactionId, field: FieldKey);
}

pub(crate) struct ReactionCore {
    id: ReactionId,
    body: Option<Rc<dyn Fn()>>,
    scheduler: Option<Rc<dyn Fn()>>,
    deps: RefCell<Vec<(Weak<dyn Subscribable>, FieldKey)>>,
    active: Cell<bool>,
}

impl ReactionCore {
    fn clear_deps(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for (store, field) in deps {
            if let Some(store) = store.upgrade() {
                store.unsubscribe(self.id, field);
            }
        }
    }

    fn trigger(self: &Rc<Self>) {
        if !self.active.get() {
            return;
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler();
        } else if let Some(body) = self.body.clone() {
            self.track(|| body());
        }
    }

    fn track<R>(self: &Rc<Self>, f: impl FnOnce() -> R) -> R {
        self.clear_deps();
        let _guard = ObserverGuard::push(Some(Rc::clone(self)));
        f()
    }
}

#[derive(Clone, Default)]
pub struct ObserveOptions {
    /// Called instead of re-running the body when a dependency changes.
    pub scheduler: Option<Rc<dyn Fn()>>,
    /// Do not run the body on creation.
    pub lazy: bool,
}

/// A tracked computation. Clones share the same reaction.
#[derive(Clone)]
pub struct Reaction {
    core: Rc<ReactionCore>,
}

impl Reaction {
    fn from_parts(body: Option<Rc<dyn Fn()>>, scheduler: Option<Rc<dyn Fn()>>) -> Self {
        Self {
            core: Rc::new(ReactionCore {
                id: NEXT_REACTION_ID.fetch_add(1, Ordering::Relaxed),
                body,
                scheduler,
                deps: RefCell::new(Vec::new()),
                active: Cell::new(true),
            }),
        }
    }

    /// A reaction with no body of its own: computations are passed to
    /// [`track`](Self::track) and changes are reported to `scheduler`.
    pub fn scheduled(scheduler: impl Fn() + 'static) -> Self {
        Self::from_parts(None, Some(Rc::new(scheduler)))
    }

    /// Runs `f` as this reaction, replacing its previous dependency set with
    /// whatever `f` reads.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        self.core.track(f)
    }

    /// Re-runs the body, if the reaction has one.
    pub fn run(&self) {
        if let Some(body) = self.core.body.clone() {
            self.core.track(|| body());
        }
    }

    /// Drops every dependency and ignores further changes until resumed.
    pub fn unobserve(&self) {
        self.core.active.set(false);
        self.core.clear_deps();
    }

    pub fn resume(&self) {
        self.core.active.set(true);
    }

    pub fn is_active(&self) -> bool {
        self.core.active.get()
    }

    pub fn dependency_count(&self) -> usize {
        self.core.deps.borrow().len()
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.core.id)
            .field("active", &self.is_active())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Runs `body` as a tracked computation and returns its reaction.
pub fn observe(body: impl Fn() + 'static, options: ObserveOptions) -> Reaction {
    let reaction = Reaction::from_parts(Some(Rc::new(body)), options.scheduler);
    if !options.lazy {
        reaction.run();
    }
    reaction
}

pub fn unobserve(reaction: &Reaction) {
    reaction.unobserve();
}

struct StoreInner<S> {
    value: RefCell<S>,
    watchers: RefCell<IndexMap<FieldKey, Vec<Weak<ReactionCore>>>>,
}

impl<S: 'static> StoreInner<S> {
    fn subscribe(self: &Rc<Self>, field: FieldKey) {
        let Some(observer) = current_observer() else {
            return;
        };
        {
            let mut watchers = self.watchers.borrow_mut();
            let list = watchers.entry(field).or_default();
            list.retain(|w| w.strong_count() > 0);
            let already_registered = list
                .iter()
                .filter_map(Weak::upgrade)
                .any(|reaction| reaction.id == observer.id);
            if already_registered {
                return;
            }
            list.push(Rc::downgrade(&observer));
        }
        let store: Weak<dyn Subscribable> = Rc::downgrade(self) as Weak<dyn Subscribable>;
        observer.deps.borrow_mut().push((store, field));
    }

    fn notify(&self, fields: &[FieldKey]) {
        let reactions: Vec<Rc<ReactionCore>> = {
            let watchers = self.watchers.borrow();
            let mut seen: Vec<Rc<ReactionCore>> = Vec::new();
            for list in fields.iter().filter_map(|field| watchers.get(field)) {
                for reaction in list.iter().filter_map(Weak::upgrade) {
                    if !seen.iter().any(|other| other.id == reaction.id) {
                        seen.push(reaction);
                    }
                }
            }
            seen
        };
        for reaction in reactions {
            // A computation never re-triggers itself through its own writes.
            if is_running(reaction.id) {
                continue;
            }
            reaction.trigger();
        }
    }
}

impl<S> Subscribable for StoreInner<S> {
    fn unsubscribe(&self, reaction: ReactionId, field: FieldKey) {
        if let Some(list) = self.watchers.borrow_mut().get_mut(&field) {
            list.retain(|w| w.upgrade().is_some_and(|r| r.id != reaction));
        }
    }
}

/// A tracked value. Reads through [`with`](Self::with) or
/// [`field`](Self::field) inside a running reaction become dependencies of
/// that reaction; writes notify the dependents.
pub struct Store<S> {
    inner: Rc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

pub fn make_tracked<S: 'static>(value: S) -> Store<S> {
    Store {
        inner: Rc::new(StoreInner {
            value: RefCell::new(value),
            watchers: RefCell::new(IndexMap::new()),
        }),
    }
}

impl<S: 'static> Store<S> {
    /// Reads the whole value; any later write notifies the reader.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        self.inner.subscribe(None);
        f(&self.inner.value.borrow())
    }

    /// Reads through one named field; only writes to that field (or to the
    /// whole value) notify the reader.
    pub fn field<R>(&self, name: &'static str, f: impl FnOnce(&S) -> R) -> R {
        self.inner.subscribe(Some(name));
        f(&self.inner.value.borrow())
    }

    /// Reads without tracking.
    pub fn peek<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Mutates the value and notifies every dependent.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let result = f(&mut self.inner.value.borrow_mut());
        let fields: Vec<FieldKey> = self.inner.watchers.borrow().keys().copied().collect();
        self.inner.notify(&fields);
        result
    }

    /// Mutates one named field and notifies its readers.
    pub fn update_field<R>(&self, name: &'static str, f: impl FnOnce(&mut S) -> R) -> R {
        let result = f(&mut self.inner.value.borrow_mut());
        self.inner.notify(&[Some(name), None]);
        result
    }

    /// Applies a shallow merge; each dependent is notified once no matter
    /// how many of its fields the patch touched.
    pub fn merge(&self, patch: StatePatch<S>) {
        if patch.setters.is_empty() {
            return;
        }
        let mut fields: Vec<FieldKey> = vec![None];
        {
            let mut value = self.inner.value.borrow_mut();
            for (name, setter) in patch.setters {
                setter(&mut value);
                fields.push(Some(name));
            }
        }
        self.inner.notify(&fields);
    }

    pub fn watcher_count(&self) -> usize {
        self.inner
            .watchers
            .borrow()
            .values()
            .flat_map(|list| list.iter())
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl<S: Clone + 'static> Store<S> {
    pub fn get(&self) -> S {
        self.with(S::clone)
    }
}

impl<S: fmt::Debug> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

type Setter<S> = Box<dyn FnOnce(&mut S)>;

/// A set of field assignments applied together by [`Store::merge`].
pub struct StatePatch<S> {
    setters: Vec<(&'static str, Setter<S>)>,
}

impl<S> StatePatch<S> {
    pub fn new() -> Self {
        Self {
            setters: Vec::new(),
        }
    }

    pub fn set(mut self, field: &'static str, setter: impl FnOnce(&mut S) + 'static) -> Self {
        self.setters.push((field, Box::new(setter)));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.setters.iter().map(|(name, _)| *name)
    }

    pub fn is_empty(&self) -> bool {
        self.setters.is_empty()
    }
}

impl<S> Default for StatePatch<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/reactive_tests.rs"]
mod tests;
