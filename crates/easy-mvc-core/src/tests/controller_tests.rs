use super::*;
use crate::cancel::Cancelled;
use futures::channel::oneshot;
use futures::executor::block_on;
use futures::FutureExt;

#[derive(Debug, Clone, Default, PartialEq)]
struct FormState {
    title: String,
    saves: u32,
}

thread_local! {
    static CALLS: RefCell<Vec<String>> = RefCell::new(Vec::new());
    static GATE: RefCell<Option<oneshot::Receiver<bool>>> = RefCell::new(None);
}

fn record(call: impl Into<String>) {
    CALLS.with(|calls| calls.borrow_mut().push(call.into()));
}

fn take_calls() -> Vec<String> {
    CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
}

struct Form;

impl Controller for Form {
    type State = FormState;
    type Props = &'static str;

    fn initial_state() -> FormState {
        FormState::default()
    }

    fn initialize(node: &NodeRef<Self>, props: &&'static str) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        record(format!("initialize {props}"));
        let title = props.to_string();
        node.state().update_field("title", |s| s.title = title);
        Box::pin(async { Ok(()) })
    }

    fn change_props(_node: &NodeRef<Self>, new: &&'static str, old: &&'static str) {
        record(format!("change {old} -> {new}"));
    }

    fn destroy(node: &NodeRef<Self>) {
        record(format!("destroy {}", node.state().peek(|s| s.saves)));
    }
}

/// Waits on the thread's gate during `initialize`; fails if it yields false.
struct Gated;

impl Controller for Gated {
    type State = ();
    type Props = ();

    fn initial_state() {}

    fn initialize(_node: &NodeRef<Self>, _props: &()) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        let gate = GATE.with(|gate| gate.borrow_mut().take());
        Box::pin(async move {
            let open = match gate {
                Some(gate) => gate.await.unwrap_or(false),
                None => true,
            };
            if open {
                Ok(())
            } else {
                Err(anyhow::anyhow!("backend refused").context("loading settings"))
            }
        })
    }
}

#[test]
fn initialize_runs_once_and_later_associations_change_props() {
    take_calls();
    let node = Node::<Form>::new();
    assert_eq!(node.lifecycle(), Lifecycle::Uninitialized);

    let first = node.internal_initialize(None, "draft").expect("alive");
    assert!(matches!(first, Initialization::Complete));
    assert_eq!(node.lifecycle(), Lifecycle::Initialized);
    assert_eq!(node.state().peek(|s| s.title.clone()), "draft");

    let second = node.internal_initialize(None, "final").expect("alive");
    assert!(matches!(second, Initialization::PropsChanged));
    assert_eq!(node.props(), Some("final"));
    assert_eq!(take_calls(), vec!["initialize draft", "change draft -> final"]);
}

#[test]
fn destroy_is_idempotent() {
    take_calls();
    let node = Node::<Form>::new();
    node.internal_initialize(None, "x").expect("alive");
    let teardowns = Rc::new(Cell::new(0));
    {
        let teardowns = Rc::clone(&teardowns);
        node.on_teardown(move || teardowns.set(teardowns.get() + 1));
    }
    node.state().update_field("saves", |s| s.saves = 3);

    assert!(node.internal_destroy());
    assert!(!node.internal_destroy());
    assert_eq!(teardowns.get(), 1);
    assert_eq!(take_calls(), vec!["initialize x", "destroy 3"]);
    assert!(matches!(
        node.internal_initialize(None, "again"),
        Err(MvcError::NodeDestroyed { .. })
    ));
}

#[test]
fn teardown_callbacks_run_in_registration_order() {
    let node = Node::<Form>::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    for step in ["first", "second", "third"] {
        let order = Rc::clone(&order);
        node.on_teardown(move || order.borrow_mut().push(step));
    }
    node.internal_destroy();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);

    let late = Rc::new(Cell::new(false));
    {
        let late = Rc::clone(&late);
        node.on_teardown(move || late.set(true));
    }
    assert!(late.get(), "teardown registered after destroy runs at once");
}

#[test]
fn cancel_pending_resolves_the_work_as_cancelled() {
    let node = Node::<Form>::new();
    let (tx, rx) = oneshot::channel::<u32>();
    let resumed = Rc::new(Cell::new(false));
    let mut work = {
        let resumed = Rc::clone(&resumed);
        node.cancelable("save", move |_signal| async move {
            let value = rx.await.unwrap_or(0);
            resumed.set(true);
            value
        })
    };
    assert!(work.poll_unpin(&mut Context::from_waker(noop_waker_ref())).is_pending());
    assert!(node.has_pending("save"));

    assert!(node.cancel_pending("save"));
    assert!(!node.has_pending("save"));
    assert_eq!(block_on(&mut work), Err(Cancelled));
    assert!(tx.send(5).is_err(), "the inner work was dropped");
    assert!(!resumed.get());
    assert!(!node.cancel_pending("save"));
}

#[test]
fn completed_work_finishes_its_scope() {
    let node = Node::<Form>::new();
    let work = node.cancelable("load", |signal| async move {
        assert!(!signal.is_aborted());
        7
    });
    assert!(node.has_pending("load"));
    assert_eq!(block_on(work), Ok(7));
    assert!(!node.has_pending("load"));
}

#[test]
fn destroy_aborts_every_scope() {
    let node = Node::<Form>::new();
    let first = node.cancelable("a", |signal| async move { signal.is_aborted() });
    let second = node.cancelable("b", |_| futures::future::pending::<()>());
    node.internal_destroy();
    assert_eq!(block_on(second), Err(Cancelled));
    assert_eq!(block_on(first), Err(Cancelled));
}

#[test]
fn work_started_after_destroy_is_cancelled() {
    let node = Node::<Form>::new();
    node.internal_destroy();
    let started = Rc::new(Cell::new(false));
    let work = {
        let started = Rc::clone(&started);
        node.cancelable("late", move |_| {
            started.set(true);
            async { true }
        })
    };
    assert!(work.signal().is_aborted());
    assert!(!node.has_pending("late"));
    assert_eq!(block_on(work), Err(Cancelled));
    assert!(!started.get());
}

#[test]
fn destroy_abandons_a_pending_initialize() {
    let (tx, rx) = oneshot::channel();
    GATE.with(|gate| *gate.borrow_mut() = Some(rx));
    let node = Node::<Gated>::new();

    let Ok(Initialization::Pending(rest)) = node.internal_initialize(None, ()) else {
        panic!("initialize should be waiting on the gate");
    };
    assert!(node.has_pending(INITIALIZE_SCOPE));
    node.internal_destroy();
    assert!(!node.has_pending(INITIALIZE_SCOPE));

    block_on(rest);
    assert!(tx.is_canceled(), "the initialize future was dropped");
    assert_eq!(node.lifecycle(), Lifecycle::Destroyed);
    assert_eq!(node.initialization_error(), None);
}

#[test]
fn pending_initialize_finishes_when_driven() {
    let (tx, rx) = oneshot::channel();
    GATE.with(|gate| *gate.borrow_mut() = Some(rx));
    let node = Node::<Gated>::new();

    let Ok(Initialization::Pending(rest)) = node.internal_initialize(None, ()) else {
        panic!("initialize should be waiting on the gate");
    };
    assert_eq!(node.lifecycle(), Lifecycle::Initializing);
    assert!(node.is_initialized());

    tx.send(true).expect("gate is waiting");
    block_on(rest);
    assert_eq!(node.lifecycle(), Lifecycle::Initialized);
    assert_eq!(node.initialization_error(), None);
}

#[test]
fn failed_initialize_is_recorded_with_its_context() {
    let (tx, rx) = oneshot::channel();
    GATE.with(|gate| *gate.borrow_mut() = Some(rx));
    tx.send(false).expect("receiver alive");
    let node = Node::<Gated>::new();

    let error = match node.internal_initialize(None, ()).expect("alive") {
        Initialization::Failed(error) => error,
        other => panic!("initialize should fail, got {other:?}"),
    };
    assert_eq!(node.initialization_error(), Some(error.clone()));
    let MvcError::Initialization { node: name, message } = error else {
        panic!("unexpected error kind");
    };
    assert_eq!(name, node.name());
    assert_eq!(message, "loading settings: backend refused");
}

#[test]
fn parents_link_and_typed_ancestors_resolve() {
    let root = Node::<Form>::new();
    root.internal_initialize(None, "root").expect("alive");
    let leaf = Node::<Gated>::new();
    leaf.internal_initialize(Some(root.clone() as Rc<dyn AnyNode>), ())
        .expect("alive");

    let found = leaf.find_ancestor_of::<Form>().expect("root is a Form");
    assert!(Rc::ptr_eq(&found, &root));
    assert!(leaf.find_ancestor(|node| node.id() == leaf.id()).is_some());
    assert!(root.find_ancestor_of::<Gated>().is_none());

    let erased: Rc<dyn AnyNode> = leaf.clone();
    assert!(erased.is::<Gated>());
    assert_eq!(erased.parent().map(|parent| parent.id()), Some(root.id()));
}

#[test]
fn a_node_cannot_become_its_own_ancestor() {
    let node = Node::<Form>::new();
    let result = node.internal_initialize(Some(node.clone() as Rc<dyn AnyNode>), "loop");
    assert!(matches!(result, Err(MvcError::Configuration(_))));
    assert_eq!(node.lifecycle(), Lifecycle::Uninitialized);
}

#[test]
fn observed_reactions_stop_at_destroy() {
    let node = Node::<Form>::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let (store, seen) = (node.state().clone(), Rc::clone(&seen));
        node.observe(move || seen.borrow_mut().push(store.field("saves", |s| s.saves)));
    }
    node.state().update_field("saves", |s| s.saves = 1);
    node.internal_destroy();
    node.state().update_field("saves", |s| s.saves = 2);
    assert_eq!(*seen.borrow(), vec![0, 1]);
}

#[test]
fn set_state_merges_fields() {
    let node = Node::<Form>::new();
    node.set_state(crate::patch!(FormState { saves: 4 }));
    assert_eq!(
        node.state().peek(FormState::clone),
        FormState {
            title: String::new(),
            saves: 4
        }
    );
    assert!(node.name().starts_with("Form#"));
}
