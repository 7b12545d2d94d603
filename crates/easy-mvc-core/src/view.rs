//! Reactive wrappers for renderable units.
//!
//! A wrapped unit renders inside a [`Reaction`]; when anything it read
//! changes, the reaction hands the change to the instance's
//! [`UpdateEmitter`], which decides when the position re-renders.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::emitter::UpdateEmitter;
use crate::error::MvcError;
use crate::owned::Owned;
use crate::reactive::Reaction;
use crate::tree::{short_type_name, Component, RenderCx};

type RenderFn<P> = dyn Fn(&mut RenderCx<'_>, &P) -> Result<String, MvcError>;

/// A component defined by a render function.
pub struct FnView<P> {
    name: &'static str,
    default_props: Option<P>,
    render: Rc<RenderFn<P>>,
}

pub fn view_fn<P, F>(name: &'static str, render: F) -> FnView<P>
where
    P: Clone + 'static,
    F: Fn(&mut RenderCx<'_>, &P) -> Result<String, MvcError> + 'static,
{
    FnView {
        name,
        default_props: None,
        render: Rc::new(render),
    }
}

impl<P> FnView<P> {
    pub fn with_default_props(mut self, props: P) -> Self {
        self.default_props = Some(props);
        self
    }
}

impl<P: Clone + 'static> Component for FnView<P> {
    type Props = P;

    fn render(&self, cx: &mut RenderCx<'_>, props: &P) -> Result<String, MvcError> {
        (self.render)(cx, props)
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn default_props(&self) -> Option<P> {
        self.default_props.clone()
    }
}

/// A component with an instance that lives as long as its position.
pub trait StatefulView: 'static {
    type Props: Clone + PartialEq + 'static;

    fn create(props: &Self::Props) -> Self;

    fn render(&mut self, cx: &mut RenderCx<'_>, props: &Self::Props) -> Result<String, MvcError>;

    /// `Some(false)` skips a parent-driven render, `Some(true)` forces it,
    /// `None` falls back to comparing props.
    fn should_update(&self, old: &Self::Props, new: &Self::Props) -> Option<bool> {
        let _ = (old, new);
        None
    }

    fn will_unmount(&mut self) {}

    fn name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name::<Self>()
    }

    fn default_props() -> Option<Self::Props>
    where
        Self: Sized,
    {
        None
    }
}

/// Hosts a [`StatefulView`] without any tracking.
pub struct Stateful<V> {
    _view: PhantomData<fn() -> V>,
}

impl<V: StatefulView> Stateful<V> {
    pub fn new() -> Self {
        Self { _view: PhantomData }
    }
}

impl<V: StatefulView> Default for Stateful<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: StatefulView> Component for Stateful<V> {
    type Props = V::Props;

    fn render(&self, cx: &mut RenderCx<'_>, props: &V::Props) -> Result<String, MvcError> {
        let instance = cx.remember(|| V::create(props));
        {
            let instance = instance.clone();
            cx.on_mount(move || {
                let instance = instance.clone();
                move || instance.update(V::will_unmount)
            });
        }
        instance.update(|view| view.render(cx, props))
    }

    fn name(&self) -> &'static str {
        V::name()
    }

    fn default_props(&self) -> Option<V::Props> {
        V::default_props()
    }
}

#[derive(Clone, Default)]
pub struct ReactiveOptions {
    /// Called with a diagnostic line right before each triggered re-render.
    pub debugger: Option<Rc<dyn Fn(&str)>>,
}

impl fmt::Debug for ReactiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveOptions")
            .field("debugger", &self.debugger.is_some())
            .finish()
    }
}

/// A unit that [`wrap_reactive`] knows how to wrap.
pub trait ReactiveUnit {
    type Wrapped: Component;

    fn into_reactive(self, options: ReactiveOptions) -> Self::Wrapped;
}

/// Wraps `unit` so its render is tracked and re-runs when what it read
/// changes. Props, output, name and default props are unchanged.
pub fn wrap_reactive<U: ReactiveUnit>(unit: U, options: ReactiveOptions) -> U::Wrapped {
    unit.into_reactive(options)
}

/// The per-position half of a reactive wrapper: one emitter and one
/// reaction, shared by every render of the position.
struct Binding {
    emitter: UpdateEmitter,
    reaction: Reaction,
}

impl Binding {
    fn new() -> Self {
        let emitter = UpdateEmitter::new();
        let reaction = {
            let emitter = emitter.clone();
            Reaction::scheduled(move || emitter.queue())
        };
        Self { emitter, reaction }
    }

    /// Returns the position's reaction and connects its emitter to the
    /// position's update handle while mounted. `before_cleanup` runs first
    /// on unmount.
    fn mount(
        cx: &mut RenderCx<'_>,
        name: &'static str,
        options: &ReactiveOptions,
        before_cleanup: impl Fn() + 'static,
    ) -> Reaction {
        let binding = cx.remember(Binding::new);
        let (emitter, reaction) = binding.with(|b| (b.emitter.clone(), b.reaction.clone()));
        let handle = cx.update_handle();
        let debugger = options.debugger.clone();
        let trace = cx.runtime().config().trace_updates;
        let before_cleanup = Rc::new(before_cleanup);
        let tracked = reaction.clone();
        cx.on_mount(move || {
            if !reaction.is_active() {
                // Remounted: dependencies were dropped, collect them again.
                reaction.resume();
                handle.request();
            }
            {
                let handle = handle.clone();
                let debugger = debugger.clone();
                emitter.on(move || {
                    let line = format!("{name}: re-render triggered by a tracked change");
                    if let Some(debugger) = &debugger {
                        debugger(&line);
                    }
                    if trace {
                        log::debug!("{line}");
                    }
                    handle.request();
                });
            }
            let (emitter, reaction, before_cleanup) =
                (emitter.clone(), reaction.clone(), Rc::clone(&before_cleanup));
            move || {
                before_cleanup();
                emitter.off();
                reaction.unobserve();
                emitter.dispose();
            }
        });
        tracked
    }
}

pub struct ReactiveFn<P> {
    inner: FnView<P>,
    options: ReactiveOptions,
}

impl<P: Clone + 'static> ReactiveUnit for FnView<P> {
    type Wrapped = ReactiveFn<P>;

    fn into_reactive(self, options: ReactiveOptions) -> ReactiveFn<P> {
        ReactiveFn {
            inner: self,
            options,
        }
    }
}

impl<P: Clone + 'static> Component for ReactiveFn<P> {
    type Props = P;

    fn render(&self, cx: &mut RenderCx<'_>, props: &P) -> Result<String, MvcError> {
        let reaction = Binding::mount(cx, self.inner.name, &self.options, || {});
        reaction.track(|| self.inner.render(cx, props))
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn default_props(&self) -> Option<P> {
        self.inner.default_props()
    }
}

struct RenderCache<P> {
    props: Option<P>,
}

pub struct ReactiveStateful<V> {
    options: ReactiveOptions,
    _view: PhantomData<fn() -> V>,
}

impl<V: StatefulView> ReactiveUnit for Stateful<V> {
    type Wrapped = ReactiveStateful<V>;

    fn into_reactive(self, options: ReactiveOptions) -> ReactiveStateful<V> {
        ReactiveStateful {
            options,
            _view: PhantomData,
        }
    }
}

impl<V: StatefulView> ReactiveStateful<V> {
    fn props_changed(view: &Owned<V>, old: Option<&V::Props>, new: &V::Props) -> bool {
        match old {
            None => true,
            Some(old) => view
                .with(|view| view.should_update(old, new))
                .unwrap_or_else(|| old != new),
        }
    }
}

impl<V: StatefulView> Component for ReactiveStateful<V> {
    type Props = V::Props;

    fn render(&self, cx: &mut RenderCx<'_>, props: &V::Props) -> Result<String, MvcError> {
        let view = cx.remember(|| V::create(props));
        let reaction = {
            let view = view.clone();
            Binding::mount(cx, V::name(), &self.options, move || {
                view.update(V::will_unmount)
            })
        };
        let cache = cx.remember(|| RenderCache::<V::Props> { props: None });
        let changed = cache.with(|cache| Self::props_changed(&view, cache.props.as_ref(), props));
        if !changed && !cx.is_self_update() && !cx.was_requested() {
            return Ok(cx.skip_render());
        }
        cache.update(|cache| cache.props = Some(props.clone()));
        reaction.track(|| view.update(|view| view.render(cx, props)))
    }

    fn name(&self) -> &'static str {
        V::name()
    }

    fn default_props(&self) -> Option<V::Props> {
        V::default_props()
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
