use super::*;
use std::cell::RefCell;

#[derive(Default)]
struct Log {
    entries: RefCell<Vec<String>>,
}

struct Root;
struct Mid;
struct Leaf;

impl Controller for Root {
    type State = Log;
    type Props = ();

    fn initial_state() -> Log {
        Log::default()
    }

    fn register_actions(actions: &mut ActionTable<Self>) {
        actions
            .action("do_thing", |node: &NodeRef<Root>, ()| {
                node.state()
                    .update(|log| log.entries.borrow_mut().push(node.name()));
            })
            .action("scale", |_node: &NodeRef<Root>, (value, by): (u32, u32)| value * by);
    }
}

impl Controller for Mid {
    type State = ();
    type Props = ();

    fn initial_state() {}

    fn register_actions(actions: &mut ActionTable<Self>) {
        actions.action("scale", |_node: &NodeRef<Mid>, (value, _by): (u32, u32)| value);
    }
}

impl Controller for Leaf {
    type State = ();
    type Props = ();

    fn initial_state() {}
}

fn chain() -> (NodeRef<Root>, NodeRef<Mid>, NodeRef<Leaf>) {
    let root = Node::<Root>::new();
    root.internal_initialize(None, ()).expect("alive");
    let mid = Node::<Mid>::new();
    mid.internal_initialize(Some(root.clone() as Rc<dyn AnyNode>), ())
        .expect("alive");
    let leaf = Node::<Leaf>::new();
    leaf.internal_initialize(Some(mid.clone() as Rc<dyn AnyNode>), ())
        .expect("alive");
    (root, mid, leaf)
}

#[test]
fn actions_resolve_to_the_defining_ancestor() {
    let (root, _mid, leaf) = chain();
    let proxy = leaf.actions();

    assert!(proxy.responds_to("do_thing"));
    match proxy.resolve("do_thing") {
        Resolution::Found { owner, action } => {
            assert_eq!(owner.id(), root.id());
            assert_eq!(action.owner_type(), "Root");
        }
        Resolution::NotFound => panic!("do_thing should resolve"),
    }

    proxy.invoke("do_thing").expect("root defines it");
    let entries = root.state().peek(|log| log.entries.borrow().clone());
    assert_eq!(entries, vec![root.name()]);
}

#[test]
fn the_nearest_definition_wins() {
    let (root, _mid, leaf) = chain();
    let from_leaf: u32 = leaf.actions().dispatch("scale", (6u32, 7u32)).expect("mid defines it");
    let from_root: u32 = root.actions().dispatch("scale", (6u32, 7u32)).expect("root defines it");
    assert_eq!((from_leaf, from_root), (6, 42));
}

#[test]
fn missing_actions_name_the_action_and_the_starting_node() {
    let (_root, _mid, leaf) = chain();
    let proxy = leaf.actions();
    assert!(!proxy.responds_to("launch"));
    assert_eq!(
        proxy.invoke("launch"),
        Err(MvcError::NoSuchAction {
            action: "launch".to_string(),
            node_type: "Leaf",
        })
    );
    let message = proxy.invoke("launch").expect_err("undefined").to_string();
    assert!(message.contains("launch") && message.contains("Leaf"), "{message}");
}

#[test]
fn signature_mismatches_are_reported() {
    let (_root, _mid, leaf) = chain();
    let proxy = leaf.actions();

    let wrong_args = proxy.dispatch::<u32, u32>("scale", 3);
    assert!(matches!(wrong_args, Err(MvcError::ActionSignature { .. })));

    let wrong_return = proxy.dispatch::<(u32, u32), String>("scale", (1, 2));
    assert!(matches!(wrong_return, Err(MvcError::ActionSignature { .. })));

    assert!(matches!(
        proxy.invoke("scale"),
        Err(MvcError::ActionSignature { .. })
    ));
}

#[test]
fn proxy_derefs_to_the_node() {
    let (_root, mid, leaf) = chain();
    let proxy = leaf.actions();
    assert_eq!(proxy.id(), leaf.id());
    assert_eq!(proxy.parent().map(|parent| parent.id()), Some(mid.id()));
    assert!(mid.action_table().contains("scale"));
    assert_eq!(mid.action_table().len(), 1);
}
