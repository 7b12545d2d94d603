//! Controller nodes: per-position state containers linked into a tree.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures_task::noop_waker_ref;
use indexmap::IndexMap;

use crate::action::{Action, ActionProxy, ActionTable};
use crate::cancel::{CancelSignal, Cancelable};
use crate::error::MvcError;
use crate::reactive::{self, ObserveOptions, Reaction, StatePatch, Store};
use crate::tree::short_type_name;

pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Cancel scope holding an `initialize` that did not finish on its first poll.
pub const INITIALIZE_SCOPE: &str = "initialize";

pub type NodeRef<C> = Rc<Node<C>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Initialized,
    Destroyed,
}

/// Behaviour of one kind of controller node.
///
/// The implementing type is a marker; per-node data lives in the node's
/// tracked `State`.
pub trait Controller: Sized + 'static {
    type State: 'static;
    type Props: Clone + 'static;

    /// Builds a fresh state value for each new node.
    fn initial_state() -> Self::State;

    /// Runs once, when the node is first associated with a tree position.
    fn initialize(
        node: &NodeRef<Self>,
        props: &Self::Props,
    ) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        let _ = (node, props);
        Box::pin(futures::future::ready(Ok(())))
    }

    fn change_props(node: &NodeRef<Self>, new: &Self::Props, old: &Self::Props) {
        let _ = (node, new, old);
    }

    fn destroy(node: &NodeRef<Self>) {
        let _ = node;
    }

    fn register_actions(actions: &mut ActionTable<Self>) {
        let _ = actions;
    }
}

/// Type-erased view of a [`Node`], used for parent links and ambient lookup.
pub trait AnyNode: Any {
    fn id(&self) -> NodeId;
    fn type_name(&self) -> &'static str;
    /// `"{TypeName}#{id}"`.
    fn name(&self) -> String;
    fn parent(&self) -> Option<Rc<dyn AnyNode>>;
    fn lifecycle(&self) -> Lifecycle;
    fn is_initialized(&self) -> bool {
        matches!(
            self.lifecycle(),
            Lifecycle::Initializing | Lifecycle::Initialized
        )
    }
    fn internal_destroy(&self) -> bool;
    /// The action `name` from this node's own table, bound to this node.
    fn bind_action(&self, name: &str) -> Option<Action>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl dyn AnyNode {
    pub fn is<C: Controller>(&self) -> bool {
        self.as_any().is::<Node<C>>()
    }

    pub fn downcast<C: Controller>(self: Rc<Self>) -> Option<NodeRef<C>> {
        self.into_any().downcast::<Node<C>>().ok()
    }

    /// Walks this node, its parent, and so on, returning the first match.
    pub fn find_ancestor(
        self: &Rc<Self>,
        predicate: impl Fn(&dyn AnyNode) -> bool,
    ) -> Option<Rc<dyn AnyNode>> {
        let mut cursor = Some(Rc::clone(self));
        while let Some(node) = cursor {
            if predicate(&*node) {
                return Some(node);
            }
            cursor = node.parent();
        }
        None
    }

    pub fn find_ancestor_of<C: Controller>(self: &Rc<Self>) -> Option<NodeRef<C>> {
        self.find_ancestor(|node| node.is::<C>())
            .and_then(|node| node.downcast::<C>())
    }
}

/// Result of [`Node::internal_initialize`].
pub enum Initialization {
    /// `initialize` ran to completion synchronously.
    Complete,
    /// `initialize` is still running; drive this future to finish it.
    Pending(LocalBoxFuture<'static, ()>),
    /// The node was already initialized; `change_props` ran instead.
    PropsChanged,
    /// `initialize` failed. The error is also kept on the node.
    Failed(MvcError),
}

impl fmt::Debug for Initialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initialization::Complete => f.write_str("Complete"),
            Initialization::Pending(_) => f.write_str("Pending"),
            Initialization::PropsChanged => f.write_str("PropsChanged"),
            Initialization::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

pub struct Node<C: Controller> {
    id: NodeId,
    this: Weak<Node<C>>,
    parent: RefCell<Option<Weak<dyn AnyNode>>>,
    state: Store<C::State>,
    props: RefCell<Option<C::Props>>,
    lifecycle: Cell<Lifecycle>,
    init_error: RefCell<Option<MvcError>>,
    cancel_scopes: RefCell<IndexMap<String, CancelSignal>>,
    teardown: RefCell<Vec<Box<dyn FnOnce()>>>,
    actions: ActionTable<C>,
}

impl<C: Controller> Node<C> {
    /// Allocates a node with fresh state. It has no parent and no props until
    /// [`internal_initialize`](Self::internal_initialize) runs.
    pub fn new() -> NodeRef<C> {
        let mut actions = ActionTable::new();
        C::register_actions(&mut actions);
        Rc::new_cyclic(|this| Node {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            this: this.clone(),
            parent: RefCell::new(None),
            state: reactive::make_tracked(C::initial_state()),
            props: RefCell::new(None),
            lifecycle: Cell::new(Lifecycle::Uninitialized),
            init_error: RefCell::new(None),
            cancel_scopes: RefCell::new(IndexMap::new()),
            teardown: RefCell::new(Vec::new()),
            actions,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> String {
        format!("{}#{}", short_type_name::<C>(), self.id)
    }

    pub fn state(&self) -> &Store<C::State> {
        &self.state
    }

    /// Shallow-merges `patch` into the state, field by field.
    pub fn set_state(&self, patch: StatePatch<C::State>) {
        self.state.merge(patch);
    }

    pub fn props(&self) -> Option<C::Props> {
        self.props.borrow().clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.lifecycle.get(),
            Lifecycle::Initializing | Lifecycle::Initialized
        )
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.get() == Lifecycle::Destroyed
    }

    pub fn parent(&self) -> Option<Rc<dyn AnyNode>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// The error recorded by a failed `initialize`, if any.
    pub fn initialization_error(&self) -> Option<MvcError> {
        self.init_error.borrow().clone()
    }

    pub fn action_table(&self) -> &ActionTable<C> {
        &self.actions
    }

    /// Wraps this node in a proxy that resolves actions up the parent chain.
    pub fn actions(self: &Rc<Self>) -> ActionProxy<C> {
        ActionProxy::new(Rc::clone(self))
    }

    /// Associates the node with its tree position.
    ///
    /// The first call links `parent`, stores `props` and starts
    /// `initialize`, polling it once. Later calls store the new props and
    /// run `change_props` with the old ones.
    pub fn internal_initialize(
        self: &Rc<Self>,
        parent: Option<Rc<dyn AnyNode>>,
        props: C::Props,
    ) -> Result<Initialization, MvcError> {
        match self.lifecycle.get() {
            Lifecycle::Destroyed => Err(MvcError::NodeDestroyed { node: self.name() }),
            Lifecycle::Initializing | Lifecycle::Initialized => {
                let old = self.props.replace(Some(props.clone()));
                if let Some(old) = old {
                    C::change_props(self, &props, &old);
                }
                Ok(Initialization::PropsChanged)
            }
            Lifecycle::Uninitialized => {
                if let Some(parent) = &parent {
                    let cyclic = parent
                        .find_ancestor(|ancestor| ancestor.id() == self.id)
                        .is_some();
                    if cyclic {
                        return Err(MvcError::Configuration(
                            "a controller cannot be its own ancestor",
                        ));
                    }
                }
                *self.parent.borrow_mut() = parent.as_ref().map(Rc::downgrade);
                *self.props.borrow_mut() = Some(props.clone());
                self.lifecycle.set(Lifecycle::Initializing);
                log::debug!("initializing {}", self.name());

                let mut init = C::initialize(self, &props);
                let mut cx = Context::from_waker(noop_waker_ref());
                match init.as_mut().poll(&mut cx) {
                    Poll::Ready(result) => Ok(self.finish_initialize(result)),
                    Poll::Pending => {
                        let this = Rc::downgrade(self);
                        let rest = self.cancelable(INITIALIZE_SCOPE, move |_signal| async move {
                            let result = init.await;
                            if let Some(node) = this.upgrade() {
                                node.finish_initialize(result);
                            }
                        });
                        Ok(Initialization::Pending(Box::pin(async move {
                            if rest.await.is_err() {
                                log::debug!("initialize abandoned by destroy");
                            }
                        })))
                    }
                }
            }
        }
    }

    fn finish_initialize(&self, result: anyhow::Result<()>) -> Initialization {
        match result {
            Ok(()) => {
                if self.lifecycle.get() == Lifecycle::Initializing {
                    self.lifecycle.set(Lifecycle::Initialized);
                }
                log::debug!("{} initialized", self.name());
                Initialization::Complete
            }
            Err(err) => {
                let error = MvcError::initialization(self.name(), &err);
                log::error!("{error}");
                *self.init_error.borrow_mut() = Some(error.clone());
                Initialization::Failed(error)
            }
        }
    }

    /// Runs `f` under the cancel scope `label`, reusing the label's signal if
    /// one is registered. On a destroyed node `f` never runs and the work
    /// resolves as cancelled.
    pub fn cancelable<T, F, Fut>(&self, label: &str, f: F) -> Cancelable<T>
    where
        T: 'static,
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        if self.is_destroyed() {
            log::warn!("{} is destroyed; `{label}` starts cancelled", self.name());
            let signal = CancelSignal::new();
            signal.abort();
            return Cancelable::new(signal, Box::pin(futures::future::pending::<T>()));
        }
        let signal = self
            .cancel_scopes
            .borrow_mut()
            .entry(label.to_string())
            .or_default()
            .clone();
        let work: LocalBoxFuture<'static, T> = Box::pin(f(signal.clone()));
        let this = self.this.clone();
        let label = label.to_string();
        let finished = signal.clone();
        Cancelable::new(signal, work).on_finish(move || {
            if let Some(node) = this.upgrade() {
                let current = node.cancel_scopes.borrow().get(&label).cloned();
                if current.is_some_and(|current| current.ptr_eq(&finished)) {
                    node.finish_pending(&label);
                }
            }
        })
    }

    /// Aborts and forgets the scope `label`. Returns whether it existed.
    pub fn cancel_pending(&self, label: &str) -> bool {
        let signal = self.cancel_scopes.borrow_mut().shift_remove(label);
        match signal {
            Some(signal) => {
                log::debug!("{} cancelled `{label}`", self.name());
                signal.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all_pending(&self) {
        let scopes = std::mem::take(&mut *self.cancel_scopes.borrow_mut());
        for (_, signal) in scopes {
            signal.abort();
        }
    }

    /// Forgets the scope `label` without aborting it.
    pub fn finish_pending(&self, label: &str) {
        self.cancel_scopes.borrow_mut().shift_remove(label);
    }

    pub fn has_pending(&self, label: &str) -> bool {
        self.cancel_scopes.borrow().contains_key(label)
    }

    pub fn find_ancestor(
        &self,
        predicate: impl Fn(&dyn AnyNode) -> bool,
    ) -> Option<Rc<dyn AnyNode>> {
        let this: Rc<dyn AnyNode> = self.this.upgrade()?;
        this.find_ancestor(predicate)
    }

    pub fn find_ancestor_of<P: Controller>(&self) -> Option<NodeRef<P>> {
        let this: Rc<dyn AnyNode> = self.this.upgrade()?;
        this.find_ancestor_of::<P>()
    }

    /// Runs `f` as a tracked computation that is unobserved when the node
    /// is destroyed.
    pub fn observe(&self, f: impl Fn() + 'static) -> Reaction {
        let reaction = reactive::observe(f, ObserveOptions::default());
        let handle = reaction.clone();
        self.on_teardown(move || handle.unobserve());
        reaction
    }

    /// Registers work to run once when the node is destroyed. Runs `f` right
    /// away if the node is already gone.
    pub fn on_teardown(&self, f: impl FnOnce() + 'static) {
        if self.is_destroyed() {
            f();
            return;
        }
        self.teardown.borrow_mut().push(Box::new(f));
    }

    /// Runs `destroy`, aborts every cancel scope and runs the teardown
    /// callbacks in registration order. Only the first call does anything.
    pub fn internal_destroy(&self) -> bool {
        if self.is_destroyed() {
            log::warn!("{} is already destroyed", self.name());
            return false;
        }
        self.lifecycle.set(Lifecycle::Destroyed);
        if let Some(this) = self.this.upgrade() {
            C::destroy(&this);
        }
        self.cancel_all_pending();
        let teardown = std::mem::take(&mut *self.teardown.borrow_mut());
        for callback in teardown {
            callback();
        }
        log::debug!("{} destroyed", self.name());
        true
    }
}

impl<C: Controller> AnyNode for Node<C> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<C>()
    }

    fn name(&self) -> String {
        Node::name(self)
    }

    fn parent(&self) -> Option<Rc<dyn AnyNode>> {
        Node::parent(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    fn internal_destroy(&self) -> bool {
        Node::internal_destroy(self)
    }

    fn bind_action(&self, name: &str) -> Option<Action> {
        let this = self.this.upgrade()?;
        self.actions.bind(name, &this)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<C: Controller> fmt::Debug for Node<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("lifecycle", &self.lifecycle.get())
            .field("parent", &self.parent().map(|parent| parent.name()))
            .field("pending", &self.cancel_scopes.borrow().len())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
