//! In-memory component host.
//!
//! Each rendered component occupies a position. A position keeps its
//! remembered values, its mount effects and the values it provides to
//! descendants for as long as the parent keeps rendering it under the same
//! key and component type.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use slotmap::SlotMap;

use crate::error::MvcError;
use crate::owned::Owned;
use crate::reactive::untracked;
use crate::runtime::RuntimeHandle;

slotmap::new_key_type! {
    pub struct PositionId;
}

/// A renderable unit. The host calls [`render`](Self::render) whenever the
/// parent renders it or its [`UpdateHandle`] requests it.
pub trait Component: 'static {
    type Props: Clone + 'static;

    fn render(&self, cx: &mut RenderCx<'_>, props: &Self::Props) -> Result<String, MvcError>;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    fn default_props(&self) -> Option<Self::Props> {
        None
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

trait ErasedElement {
    fn component_type(&self) -> TypeId;
    fn name(&self) -> &'static str;
    fn render(&self, cx: &mut RenderCx<'_>) -> Result<String, MvcError>;
}

struct Element<C: Component> {
    component: Rc<C>,
    props: C::Props,
}

impl<C: Component> ErasedElement for Element<C> {
    fn component_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn name(&self) -> &'static str {
        self.component.name()
    }

    fn render(&self, cx: &mut RenderCx<'_>) -> Result<String, MvcError> {
        self.component.render(cx, &self.props)
    }
}

type Cleanup = Box<dyn FnOnce()>;
type Setup = Rc<dyn Fn() -> Cleanup>;

struct EffectSlot {
    setup: Setup,
    cleanup: Option<Cleanup>,
    mounted: bool,
    scheduled: bool,
}

struct Position {
    parent: Option<PositionId>,
    key: String,
    element: Rc<dyn ErasedElement>,
    hooks: Vec<Box<dyn Any>>,
    effects: Vec<EffectSlot>,
    provided: AHashMap<TypeId, Rc<dyn Any>>,
    children: IndexMap<String, PositionId>,
    text: String,
}

type DirtySet = Rc<RefCell<IndexSet<PositionId>>>;

/// Requests a re-render of one position. Holding a handle does not keep the
/// position or the tree alive.
#[derive(Clone)]
pub struct UpdateHandle {
    position: PositionId,
    dirty: Weak<RefCell<IndexSet<PositionId>>>,
    runtime: RuntimeHandle,
}

impl UpdateHandle {
    pub fn request(&self) {
        let Some(dirty) = self.dirty.upgrade() else {
            return;
        };
        if dirty.borrow_mut().insert(self.position) {
            log::trace!("position {:?} requested a render", self.position);
            self.runtime.request_turn();
        }
    }

    pub fn position(&self) -> PositionId {
        self.position
    }
}

impl fmt::Debug for UpdateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateHandle")
            .field("position", &self.position)
            .finish()
    }
}

pub struct Tree {
    runtime: RuntimeHandle,
    positions: SlotMap<PositionId, Position>,
    root: Option<PositionId>,
    dirty: DirtySet,
    pending_effects: Vec<(PositionId, usize)>,
    renders: u64,
}

impl Tree {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self {
            runtime,
            positions: SlotMap::with_key(),
            root: None,
            dirty: Rc::new(RefCell::new(IndexSet::new())),
            pending_effects: Vec::new(),
            renders: 0,
        }
    }

    pub fn root(&self) -> Option<PositionId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Total number of component renders performed by this tree.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.borrow().is_empty()
    }

    pub fn mount<C: Component>(
        &mut self,
        component: C,
        props: C::Props,
    ) -> Result<PositionId, MvcError> {
        self.set_content(&Rc::new(component), props)
    }

    /// Renders `component` at the root. A root of the same component type is
    /// kept and re-rendered with the new props, like a parent re-render.
    pub fn set_content<C: Component>(
        &mut self,
        component: &Rc<C>,
        props: C::Props,
    ) -> Result<PositionId, MvcError> {
        let element: Rc<dyn ErasedElement> = Rc::new(Element {
            component: Rc::clone(component),
            props,
        });
        let runtime = self.runtime.clone();
        runtime.enter(|| {
            let root = match self.root {
                Some(root) if self.same_type(root, TypeId::of::<C>()) => {
                    self.positions[root].element = element;
                    root
                }
                previous => {
                    if let Some(previous) = previous {
                        self.unmount_subtree(previous);
                    }
                    let root = self.insert_position(None, String::new(), element);
                    self.root = Some(root);
                    root
                }
            };
            self.dirty.borrow_mut().shift_remove(&root);
            // Effects registered before a failure still commit; the
            // position stays in the tree and needs its cleanups.
            let rendered = self.render_position(root, true, false);
            self.commit_effects();
            rendered.map(|()| root)
        })
    }

    /// Re-renders every position whose update handle fired, in request
    /// order, then runs newly registered mount effects.
    pub fn render_dirty(&mut self) -> Result<usize, MvcError> {
        let runtime = self.runtime.clone();
        runtime.enter(|| {
            let mut rendered = 0;
            loop {
                let next = {
                    let mut dirty = self.dirty.borrow_mut();
                    let first = dirty.first().copied();
                    if let Some(id) = first {
                        dirty.shift_remove(&id);
                    }
                    first
                };
                let Some(id) = next else {
                    break;
                };
                if !self.positions.contains_key(id) {
                    continue;
                }
                if let Err(err) = self.render_position(id, false, true) {
                    self.commit_effects();
                    return Err(err);
                }
                rendered += 1;
            }
            self.commit_effects();
            Ok(rendered)
        })
    }

    pub fn unmount(&mut self) {
        if let Some(root) = self.root.take() {
            let runtime = self.runtime.clone();
            runtime.enter(|| self.unmount_subtree(root));
        }
    }

    /// Simulates the development-mode double mount: every mount effect is
    /// cleaned up and set up again while remembered values survive.
    pub fn remount(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let order = self.subtree_order(root);
        let runtime = self.runtime.clone();
        runtime.enter(|| {
            for id in order.iter().rev() {
                let cleanups: Vec<Cleanup> = self.positions[*id]
                    .effects
                    .iter_mut()
                    .filter(|slot| slot.mounted)
                    .filter_map(|slot| {
                        slot.mounted = false;
                        slot.cleanup.take()
                    })
                    .collect();
                for cleanup in cleanups {
                    cleanup();
                }
            }
            for id in &order {
                let count = self.positions[*id].effects.len();
                for index in 0..count {
                    let slot = &mut self.positions[*id].effects[index];
                    if !slot.scheduled {
                        slot.scheduled = true;
                        self.pending_effects.push((*id, index));
                    }
                }
            }
            self.commit_effects();
        });
    }

    /// Rendered text of the whole tree: each position's own output followed
    /// by its children's, depth first.
    pub fn text(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.collect_text(root, &mut out);
        }
        out
    }

    /// Component names from the root, indented by depth.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            for id in self.subtree_order(root) {
                let mut depth = 0;
                let mut cursor = self.positions[id].parent;
                while let Some(parent) = cursor {
                    depth += 1;
                    cursor = self.positions[parent].parent;
                }
                let position = &self.positions[id];
                out.push_str(&"  ".repeat(depth));
                out.push_str(position.element.name());
                if !position.key.is_empty() {
                    out.push_str(&format!(" [{}]", position.key));
                }
                out.push('\n');
            }
        }
        out
    }

    fn collect_text(&self, id: PositionId, out: &mut String) {
        let Some(position) = self.positions.get(id) else {
            return;
        };
        out.push_str(&position.text);
        for child in position.children.values() {
            self.collect_text(*child, out);
        }
    }

    fn subtree_order(&self, root: PositionId) -> Vec<PositionId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(position) = self.positions.get(id) else {
                continue;
            };
            order.push(id);
            stack.extend(position.children.values().rev().copied());
        }
        order
    }

    fn same_type(&self, id: PositionId, ty: TypeId) -> bool {
        self.positions
            .get(id)
            .is_some_and(|position| position.element.component_type() == ty)
    }

    fn insert_position(
        &mut self,
        parent: Option<PositionId>,
        key: String,
        element: Rc<dyn ErasedElement>,
    ) -> PositionId {
        self.positions.insert(Position {
            parent,
            key,
            element,
            hooks: Vec::new(),
            effects: Vec::new(),
            provided: AHashMap::new(),
            children: IndexMap::new(),
            text: String::new(),
        })
    }

    fn render_position(
        &mut self,
        id: PositionId,
        parent_driven: bool,
        requested: bool,
    ) -> Result<(), MvcError> {
        let element = Rc::clone(&self.positions[id].element);
        self.renders += 1;
        let mut cx = RenderCx {
            tree: self,
            position: id,
            parent_driven,
            requested,
            hook_cursor: 0,
            effect_cursor: 0,
            visited: Vec::new(),
            skipped: false,
        };
        let text = element.render(&mut cx)?;
        let RenderCx {
            visited, skipped, ..
        } = cx;
        if skipped {
            return Ok(());
        }
        let stale: Vec<PositionId> = self.positions[id]
            .children
            .iter()
            .filter(|(key, _)| !visited.contains(key))
            .map(|(_, child)| *child)
            .collect();
        for child in stale {
            self.unmount_subtree(child);
        }
        self.positions[id].text = text;
        Ok(())
    }

    fn commit_effects(&mut self) {
        let pending = std::mem::take(&mut self.pending_effects);
        for (id, index) in pending {
            let setup = match self
                .positions
                .get_mut(id)
                .and_then(|position| position.effects.get_mut(index))
            {
                Some(slot) => {
                    slot.scheduled = false;
                    if slot.mounted {
                        continue;
                    }
                    Rc::clone(&slot.setup)
                }
                None => continue,
            };
            let cleanup = setup();
            match self
                .positions
                .get_mut(id)
                .and_then(|position| position.effects.get_mut(index))
            {
                Some(slot) => {
                    slot.cleanup = Some(cleanup);
                    slot.mounted = true;
                }
                None => cleanup(),
            }
        }
    }

    fn unmount_subtree(&mut self, id: PositionId) {
        let Some(position) = self.positions.get(id) else {
            return;
        };
        let children: Vec<PositionId> = position.children.values().copied().collect();
        for child in children {
            self.unmount_subtree(child);
        }
        let Some(position) = self.positions.remove(id) else {
            return;
        };
        if let Some(parent) = position.parent.and_then(|parent| self.positions.get_mut(parent)) {
            parent.children.shift_remove(&position.key);
        }
        self.dirty.borrow_mut().shift_remove(&id);
        self.pending_effects.retain(|(pending, _)| *pending != id);
        log::trace!("unmounting {}", position.element.name());
        for slot in position.effects {
            if let Some(cleanup) = slot.cleanup {
                cleanup();
            }
        }
        drop(position.hooks);
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Per-render access to the host: remembered values, mount effects,
/// ambient values and children.
pub struct RenderCx<'a> {
    tree: &'a mut Tree,
    position: PositionId,
    parent_driven: bool,
    requested: bool,
    hook_cursor: usize,
    effect_cursor: usize,
    visited: Vec<String>,
    skipped: bool,
}

impl<'a> RenderCx<'a> {
    pub fn position(&self) -> PositionId {
        self.position
    }

    pub fn runtime(&self) -> RuntimeHandle {
        self.tree.runtime.clone()
    }

    /// True when the render was triggered by this position's own update
    /// handle rather than by its parent.
    pub fn is_self_update(&self) -> bool {
        !self.parent_driven
    }

    /// True when an update request for this position was pending, even if
    /// the parent's render got here first.
    pub fn was_requested(&self) -> bool {
        self.requested
    }

    /// Returns the value remembered at this call site, creating it with
    /// `init` on the first render.
    pub fn remember<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Owned<T> {
        let index = self.hook_cursor;
        self.hook_cursor += 1;
        let hooks = &mut self.tree.positions[self.position].hooks;
        if let Some(existing) = hooks
            .get(index)
            .and_then(|hook| hook.downcast_ref::<Owned<T>>())
        {
            return existing.clone();
        }
        let owned = Owned::new(init());
        if index < hooks.len() {
            log::warn!("remembered value {index} changed type, reinitializing");
            hooks[index] = Box::new(owned.clone());
        } else {
            hooks.push(Box::new(owned.clone()));
        }
        owned
    }

    /// Registers an effect that runs after the position is first committed
    /// (and again after a synthetic remount). The returned closure runs on
    /// unmount. Later renders only refresh the stored setup.
    pub fn on_mount<F, D>(&mut self, setup: F)
    where
        F: Fn() -> D + 'static,
        D: FnOnce() + 'static,
    {
        let index = self.effect_cursor;
        self.effect_cursor += 1;
        let setup: Setup = Rc::new(move || Box::new(setup()) as Cleanup);
        let effects = &mut self.tree.positions[self.position].effects;
        let schedule = match effects.get_mut(index) {
            Some(slot) => {
                slot.setup = setup;
                let schedule = !slot.mounted && !slot.scheduled;
                slot.scheduled |= schedule;
                schedule
            }
            None => {
                effects.push(EffectSlot {
                    setup,
                    cleanup: None,
                    mounted: false,
                    scheduled: true,
                });
                true
            }
        };
        if schedule {
            self.tree.pending_effects.push((self.position, index));
        }
    }

    pub fn update_handle(&self) -> UpdateHandle {
        UpdateHandle {
            position: self.position,
            dirty: Rc::downgrade(&self.tree.dirty),
            runtime: self.tree.runtime.clone(),
        }
    }

    /// Publishes `value` to every descendant of this position.
    pub fn provide<T: 'static>(&mut self, value: T) {
        self.tree.positions[self.position]
            .provided
            .insert(TypeId::of::<T>(), Rc::new(value));
    }

    /// The nearest value of type `T` provided by an ancestor.
    pub fn lookup<T: Clone + 'static>(&self) -> Option<T> {
        let mut cursor = self.tree.positions[self.position].parent;
        while let Some(id) = cursor {
            let position = &self.tree.positions[id];
            if let Some(value) = position
                .provided
                .get(&TypeId::of::<T>())
                .and_then(|value| value.downcast_ref::<T>())
            {
                return Some(value.clone());
            }
            cursor = position.parent;
        }
        None
    }

    /// Keeps the previous output and children of this position.
    pub fn skip_render(&mut self) -> String {
        self.skipped = true;
        self.tree.positions[self.position].text.clone()
    }

    /// Renders `component` as the child keyed `key`. Reads made by the child
    /// are never dependencies of the caller's tracked render.
    pub fn child<C: Component>(
        &mut self,
        key: impl Into<String>,
        component: &Rc<C>,
        props: C::Props,
    ) -> Result<(), MvcError> {
        let key = key.into();
        let element: Rc<dyn ErasedElement> = Rc::new(Element {
            component: Rc::clone(component),
            props,
        });
        self.visited.push(key.clone());
        let parent = self.position;
        let tree = &mut *self.tree;
        let existing = tree.positions[parent].children.get(&key).copied();
        let child = match existing {
            Some(id) if tree.same_type(id, TypeId::of::<C>()) => {
                tree.positions[id].element = element;
                id
            }
            previous => {
                if let Some(previous) = previous {
                    tree.unmount_subtree(previous);
                }
                let id = tree.insert_position(Some(parent), key.clone(), element);
                tree.positions[parent].children.insert(key, id);
                id
            }
        };
        let requested = tree.dirty.borrow_mut().shift_remove(&child);
        untracked(|| tree.render_position(child, true, requested))
    }
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
