use std::cell::Cell;
use std::rc::Rc;

use easy_mvc_core::{
    start_scope, use_controller, view_fn, wrap_reactive, ActionTable, Controller, MvcError,
    NodeRef, NodeSlot, ReactiveOptions,
};
use easy_mvc_macros::actions;
use easy_mvc_testing::MvcTestRule;

#[derive(Debug, Default)]
struct CounterState {
    count: u32,
    label: String,
}

struct Counter;

impl Controller for Counter {
    type State = CounterState;
    type Props = ();

    fn initial_state() -> CounterState {
        CounterState::default()
    }

    fn register_actions(actions: &mut ActionTable<Self>) {
        Self::register_declared_actions(actions);
    }
}

#[actions]
impl Counter {
    #[action]
    fn increment(node: &NodeRef<Self>) {
        node.state().update_field("count", |s| s.count += 1);
    }

    #[action(name = "add")]
    fn add_amount(node: &NodeRef<Self>, amount: u32) -> u32 {
        node.state().update_field("count", |s| {
            s.count += amount;
            s.count
        })
    }

    #[action]
    fn relabel(node: &NodeRef<Self>, prefix: String, times: usize) -> String {
        let label = prefix.repeat(times);
        node.state()
            .update_field("label", |s| s.label = label.clone());
        label
    }

    fn describe(node: &NodeRef<Self>) -> String {
        node.state().peek(|s| format!("{}:{}", s.label, s.count))
    }
}

struct Fixture {
    rule: MvcTestRule,
    renders: Rc<Cell<u32>>,
    node: NodeRef<Counter>,
}

fn mount_counter() -> Fixture {
    let mut rule = MvcTestRule::new();
    let renders = Rc::new(Cell::new(0));
    let slot = NodeSlot::<Counter>::new();
    let view = {
        let renders = Rc::clone(&renders);
        wrap_reactive(
            view_fn("CounterView", move |cx, _props: &()| {
                renders.set(renders.get() + 1);
                let counter = use_controller::<Counter>(cx)?;
                Ok(format!("count={}", counter.state().field("count", |s| s.count)))
            }),
            ReactiveOptions::default(),
        )
    };
    rule.mount(start_scope::<Counter, _>(view).with_ref(slot.clone()), ())
        .expect("initial render");
    let node = slot.current().expect("scope reported its node");
    Fixture {
        rule,
        renders,
        node,
    }
}

#[test]
fn two_synchronous_increments_render_once() {
    let Fixture {
        mut rule,
        renders,
        node,
    } = mount_counter();
    assert_eq!(renders.get(), 1);
    assert_eq!(rule.text(), "count=0");

    let actions = node.actions();
    actions.invoke("increment").expect("declared");
    actions.invoke("increment").expect("declared");
    assert_eq!(renders.get(), 1, "nothing renders before the flush");

    assert_eq!(rule.pump_until_idle().expect("renders"), 1);
    assert_eq!(renders.get(), 2);
    assert_eq!(rule.text(), "count=2");
    assert_eq!(node.state().peek(|s| s.count), 2);
}

#[test]
fn untracked_fields_do_not_render() {
    let Fixture {
        mut rule,
        renders,
        node,
    } = mount_counter();
    let label: String = node
        .actions()
        .dispatch("relabel", ("ab".to_string(), 2usize))
        .expect("declared");
    assert_eq!(label, "abab");
    assert_eq!(rule.pump_until_idle().expect("idle"), 0);
    assert_eq!(renders.get(), 1);
    assert_eq!(Counter::describe(&node), "abab:0");
}

#[test]
fn declared_actions_use_their_names_and_signatures() {
    let Fixture { mut rule, node, .. } = mount_counter();
    let table = node.action_table();
    let mut names: Vec<_> = table.names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["add", "increment", "relabel"]);
    assert!(!table.contains("describe"));

    let total: u32 = node.actions().dispatch("add", 5u32).expect("declared");
    assert_eq!(total, 5);
    assert!(matches!(
        node.actions().dispatch::<u64, u32>("add", 5),
        Err(MvcError::ActionSignature { .. })
    ));
    rule.pump_until_idle().expect("renders");
    assert_eq!(rule.text(), "count=5");
}
