#![doc = r"Reactive view-update scheduling and hierarchical controllers for easy-mvc."]

extern crate self as easy_mvc_core;

pub mod action;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod emitter;
pub mod error;
pub mod owned;
pub mod platform;
pub mod reactive;
pub mod runtime;
pub mod scheduler;
pub mod scope;
pub mod tree;
pub mod view;

pub use action::{Action, ActionProxy, ActionTable, Resolution};
pub use cancel::{CancelSignal, Cancelable, Cancelled};
pub use config::{MvcConfig, RemountPolicy};
pub use controller::{
    AnyNode, Controller, Initialization, Lifecycle, Node, NodeId, NodeRef, INITIALIZE_SCOPE,
};
pub use emitter::UpdateEmitter;
pub use error::MvcError;
pub use owned::{Owned, WeakOwned};
pub use platform::{Clock, DefaultScheduler, ManualClock, RuntimeScheduler};
pub use reactive::{
    make_tracked, observe, unobserve, untracked, ObserveOptions, Reaction, StatePatch, Store,
};
pub use runtime::{Runtime, RuntimeHandle, TaskId};
pub use scheduler::{
    reset, resolve_batches, run_batched, run_immediate, scheduler_mode, update_all, SchedulerMode,
};
pub use scope::{
    lookup_nearest_node, provide_existing_scope, start_scope, use_actions, use_controller,
    NodeSlot, ProvidedScope, Scope, ScopeOptions, ScopeRef,
};
pub use tree::{Component, PositionId, RenderCx, Tree, UpdateHandle};
pub use view::{
    view_fn, wrap_reactive, FnView, ReactiveFn, ReactiveOptions, ReactiveStateful, ReactiveUnit,
    Stateful, StatefulView,
};

/// Re-exported so generated action registrations and user `initialize`
/// hooks can name the boxed future type without a direct dependency.
pub use futures::future::LocalBoxFuture;

/// Builds a [`StatePatch`] from struct-literal syntax.
///
/// ```ignore
/// node.set_state(patch!(CounterState { count: 3, label: "three".into() }));
/// ```
#[macro_export]
macro_rules! patch {
    ($ty:ty { $($field:ident : $value:expr),* $(,)? }) => {{
        let patch = $crate::StatePatch::<$ty>::new();
        $(
            let patch = {
                let value = $value;
                patch.set(stringify!($field), move |state: &mut $ty| state.$field = value)
            };
        )*
        patch
    }};
}
