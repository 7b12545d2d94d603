//! Binds controller nodes to tree positions.
//!
//! A [`Scope`] owns one node per position. The node is associated with its
//! nearest ancestor node on parent-driven renders, published to the
//! position's descendants, and destroyed on a delayed task after unmount so
//! that a synthetic remount can take it back.

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

use crate::action::ActionProxy;
use crate::config::RemountPolicy;
use crate::controller::{AnyNode, Controller, Initialization, Node, NodeRef};
use crate::error::MvcError;
use crate::owned::Owned;
use crate::runtime::{RuntimeHandle, TaskId};
use crate::tree::{Component, RenderCx};

/// The node a scope publishes to its descendants.
#[derive(Clone)]
struct PublishedNode(Rc<dyn AnyNode>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeOptions {
    pub destroy_delay: Duration,
    pub remount_policy: RemountPolicy,
}

impl Default for ScopeOptions {
    /// Inherits the current runtime's configuration.
    fn default() -> Self {
        let config = RuntimeHandle::current()
            .map(|runtime| runtime.config())
            .unwrap_or_default();
        Self {
            destroy_delay: config.destroy_delay,
            remount_policy: config.remount_policy,
        }
    }
}

/// A mutable slot that receives a scope's node while it is mounted.
pub struct NodeSlot<C: Controller> {
    current: Rc<RefCell<Option<NodeRef<C>>>>,
}

impl<C: Controller> NodeSlot<C> {
    pub fn new() -> Self {
        Self {
            current: Rc::new(RefCell::new(None)),
        }
    }

    pub fn current(&self) -> Option<NodeRef<C>> {
        self.current.borrow().clone()
    }
}

impl<C: Controller> Clone for NodeSlot<C> {
    fn clone(&self) -> Self {
        Self {
            current: Rc::clone(&self.current),
        }
    }
}

impl<C: Controller> Default for NodeSlot<C> {
    fn default() -> Self {
        Self::new()
    }
}

type RefCallback<C> = Rc<dyn Fn(Option<NodeRef<C>>)>;

/// Where a scope reports its node: `Some(node)` on mount, `None` on unmount.
pub enum ScopeRef<C: Controller> {
    Callback(RefCallback<C>),
    Slot(NodeSlot<C>),
}

impl<C: Controller> Clone for ScopeRef<C> {
    fn clone(&self) -> Self {
        match self {
            ScopeRef::Callback(callback) => ScopeRef::Callback(Rc::clone(callback)),
            ScopeRef::Slot(slot) => ScopeRef::Slot(slot.clone()),
        }
    }
}

impl<C: Controller> ScopeRef<C> {
    pub fn callback(f: impl Fn(Option<NodeRef<C>>) + 'static) -> Self {
        ScopeRef::Callback(Rc::new(f))
    }

    /// Accepts a [`NodeSlot<C>`], a [`ScopeRef<C>`], or a callback erased as
    /// `Rc<dyn Fn(Option<NodeRef<C>>)>` or `Box<dyn Fn(Option<NodeRef<C>>)>`.
    /// Unerased closures have distinct types and are rejected like anything
    /// else; pass those through [`ScopeRef::callback`].
    pub fn from_any<T: Any>(value: T) -> Result<Self, MvcError> {
        let boxed: Box<dyn Any> = Box::new(value);
        let boxed = match boxed.downcast::<ScopeRef<C>>() {
            Ok(scope_ref) => return Ok(*scope_ref),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<NodeSlot<C>>() {
            Ok(slot) => return Ok(ScopeRef::Slot(*slot)),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<RefCallback<C>>() {
            Ok(callback) => return Ok(ScopeRef::Callback(*callback)),
            Err(other) => other,
        };
        match boxed.downcast::<Box<dyn Fn(Option<NodeRef<C>>)>>() {
            Ok(callback) => Ok(ScopeRef::Callback(Rc::from(*callback))),
            Err(_) => Err(MvcError::ControllerRefType {
                found: type_name::<T>().to_string(),
            }),
        }
    }

    fn assign(&self, node: Option<NodeRef<C>>) {
        match self {
            ScopeRef::Callback(callback) => callback(node),
            ScopeRef::Slot(slot) => *slot.current.borrow_mut() = node,
        }
    }
}

impl<C: Controller> From<NodeSlot<C>> for ScopeRef<C> {
    fn from(slot: NodeSlot<C>) -> Self {
        ScopeRef::Slot(slot)
    }
}

struct ScopeSlot<C: Controller> {
    node: Option<NodeRef<C>>,
    destroy_task: Option<TaskId>,
}

impl<C: Controller> ScopeSlot<C> {
    fn node(&mut self) -> NodeRef<C> {
        match &self.node {
            Some(node) if !node.is_destroyed() => Rc::clone(node),
            _ => {
                let node = Node::<C>::new();
                log::debug!("created {}", node.name());
                self.node = Some(Rc::clone(&node));
                node
            }
        }
    }
}

/// Component that gives its position a `C` node and renders `W` under it.
pub struct Scope<C: Controller, W> {
    wrapped: Rc<W>,
    options: Option<ScopeOptions>,
    scope_ref: Option<ScopeRef<C>>,
    _controller: PhantomData<fn() -> C>,
}

/// Wraps `wrapped` in a controller scope of type `C`.
pub fn start_scope<C, W>(wrapped: W) -> Scope<C, W>
where
    C: Controller,
    W: Component<Props = C::Props>,
{
    Scope {
        wrapped: Rc::new(wrapped),
        options: None,
        scope_ref: None,
        _controller: PhantomData,
    }
}

impl<C: Controller, W> Scope<C, W> {
    pub fn with_options(mut self, options: ScopeOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_ref(mut self, scope_ref: impl Into<ScopeRef<C>>) -> Self {
        self.scope_ref = Some(scope_ref.into());
        self
    }
}

impl<C, W> Component for Scope<C, W>
where
    C: Controller,
    W: Component<Props = C::Props>,
{
    type Props = C::Props;

    fn render(&self, cx: &mut RenderCx<'_>, props: &C::Props) -> Result<String, MvcError> {
        let slot = cx.remember(|| ScopeSlot::<C> {
            node: None,
            destroy_task: None,
        });
        let node = slot.update(ScopeSlot::node);

        if !cx.is_self_update() || !node.is_initialized() {
            let parent = lookup_nearest_node(cx).ok();
            match node.internal_initialize(parent, props.clone())? {
                Initialization::Pending(rest) => {
                    let handle = cx.update_handle();
                    cx.runtime().spawn_local(async move {
                        rest.await;
                        handle.request();
                    });
                }
                Initialization::Complete
                | Initialization::PropsChanged
                | Initialization::Failed(_) => {}
            }
        }
        let options = self.options.clone().unwrap_or_else(|| {
            let config = cx.runtime().config();
            ScopeOptions {
                destroy_delay: config.destroy_delay,
                remount_policy: config.remount_policy,
            }
        });
        // Registered ahead of the error check so a failed node is still
        // destroyed when its position goes away.
        mount_scope(cx, slot, options, self.scope_ref.clone());
        if let Some(error) = node.initialization_error() {
            return Err(error);
        }

        cx.provide(PublishedNode(node.clone()));
        cx.child("scope", &self.wrapped, props.clone())?;
        Ok(String::new())
    }

    fn name(&self) -> &'static str {
        self.wrapped.name()
    }

    fn default_props(&self) -> Option<C::Props> {
        self.wrapped.default_props()
    }
}

fn mount_scope<C: Controller>(
    cx: &mut RenderCx<'_>,
    slot: Owned<ScopeSlot<C>>,
    options: ScopeOptions,
    scope_ref: Option<ScopeRef<C>>,
) {
    let runtime = cx.runtime();
    let handle = cx.update_handle();
    cx.on_mount(move || {
        if let Some(task) = slot.update(|slot| slot.destroy_task.take()) {
            runtime.cancel_task(task);
            match options.remount_policy {
                RemountPolicy::Preserve => {
                    if let Some(node) = slot.with(|slot| slot.node.clone()) {
                        log::debug!("kept {} across remount", node.name());
                    }
                }
                RemountPolicy::Recreate => {
                    if let Some(old) = slot.update(|slot| slot.node.take()) {
                        old.internal_destroy();
                    }
                    slot.update(ScopeSlot::node);
                    // The new node still needs its props.
                    handle.request();
                }
            }
        }
        let node = slot.with(|slot| slot.node.clone());
        if let Some(scope_ref) = &scope_ref {
            scope_ref.assign(node);
        }

        let (slot, runtime, scope_ref) = (slot.clone(), runtime.clone(), scope_ref.clone());
        let delay = options.destroy_delay;
        move || {
            if let Some(scope_ref) = &scope_ref {
                scope_ref.assign(None);
            }
            let Some(node) = slot.with(|slot| slot.node.clone()) else {
                return;
            };
            let task = {
                let slot = slot.downgrade();
                runtime.schedule_task(delay, move || {
                    if let Some(slot) = slot.upgrade() {
                        slot.try_update(|slot| slot.destroy_task = None);
                    }
                    node.internal_destroy();
                })
            };
            match task {
                Some(task) => slot.update(|slot| slot.destroy_task = Some(task)),
                None => {
                    // No runtime to defer to.
                    if let Some(node) = slot.with(|slot| slot.node.clone()) {
                        node.internal_destroy();
                    }
                }
            }
        }
    });
}

/// Publishes an existing node to `W` and its descendants without
/// constructing or initializing anything.
pub struct ProvidedScope<C: Controller, W> {
    node: NodeRef<C>,
    wrapped: Rc<W>,
}

pub fn provide_existing_scope<C, W>(node: NodeRef<C>, wrapped: W) -> ProvidedScope<C, W>
where
    C: Controller,
    W: Component,
{
    ProvidedScope {
        node,
        wrapped: Rc::new(wrapped),
    }
}

impl<C: Controller, W: Component> Component for ProvidedScope<C, W> {
    type Props = W::Props;

    fn render(&self, cx: &mut RenderCx<'_>, props: &W::Props) -> Result<String, MvcError> {
        cx.provide(PublishedNode(self.node.clone()));
        cx.child("scope", &self.wrapped, props.clone())?;
        Ok(String::new())
    }

    fn name(&self) -> &'static str {
        self.wrapped.name()
    }

    fn default_props(&self) -> Option<W::Props> {
        self.wrapped.default_props()
    }
}

/// The nearest node published above the rendering position.
pub fn lookup_nearest_node(cx: &RenderCx<'_>) -> Result<Rc<dyn AnyNode>, MvcError> {
    cx.lookup::<PublishedNode>()
        .map(|published| published.0)
        .ok_or_else(|| MvcError::NotFound("no controller scope above this position".to_string()))
}

/// The nearest published node of type `C`, searching up the node chain from
/// the nearest one.
pub fn use_controller<C: Controller>(cx: &RenderCx<'_>) -> Result<NodeRef<C>, MvcError> {
    let nearest = lookup_nearest_node(cx)?;
    nearest.find_ancestor_of::<C>().ok_or_else(|| {
        MvcError::NotFound(format!(
            "no {} above {}",
            crate::tree::short_type_name::<C>(),
            nearest.name()
        ))
    })
}

pub fn use_actions<C: Controller>(cx: &RenderCx<'_>) -> Result<ActionProxy<C>, MvcError> {
    use_controller::<C>(cx).map(ActionProxy::new)
}

impl<C: Controller> fmt::Debug for NodeSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSlot")
            .field("current", &self.current.borrow().as_ref().map(|node| node.name()))
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/scope_tests.rs"]
mod tests;
