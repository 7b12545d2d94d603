use super::*;
use crate::runtime::Runtime;
use std::cell::Cell;

#[derive(Default)]
struct Journal {
    entries: RefCell<Vec<String>>,
}

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}

struct Label {
    journal: Rc<Journal>,
}

impl Component for Label {
    type Props = String;

    fn render(&self, cx: &mut RenderCx<'_>, props: &String) -> Result<String, MvcError> {
        let renders = cx.remember(|| 0u32);
        renders.update(|count| *count += 1);
        let journal = Rc::clone(&self.journal);
        let name = props.clone();
        cx.on_mount(move || {
            journal.push(format!("mount {name}"));
            let journal = Rc::clone(&journal);
            let name = name.clone();
            move || journal.push(format!("unmount {name}"))
        });
        let theme = cx.lookup::<&'static str>().unwrap_or("plain");
        Ok(format!("[{props}:{theme}:{}]", renders.get()))
    }
}

struct List {
    label: Rc<Label>,
    handle: RefCell<Option<UpdateHandle>>,
    skip: Cell<bool>,
}

impl Component for List {
    type Props = Vec<String>;

    fn render(&self, cx: &mut RenderCx<'_>, props: &Vec<String>) -> Result<String, MvcError> {
        *self.handle.borrow_mut() = Some(cx.update_handle());
        if self.skip.get() {
            return Ok(cx.skip_render());
        }
        cx.provide::<&'static str>("dark");
        for item in props {
            cx.child(item.clone(), &self.label, item.clone())?;
        }
        Ok(format!("{} items:", props.len()))
    }
}

fn fixture() -> (Runtime, Tree, Rc<List>, Rc<Journal>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = Runtime::new();
    let tree = Tree::new(runtime.handle());
    let journal = Rc::new(Journal::default());
    let list = Rc::new(List {
        label: Rc::new(Label {
            journal: Rc::clone(&journal),
        }),
        handle: RefCell::new(None),
        skip: Cell::new(false),
    });
    (runtime, tree, list, journal)
}

fn items(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn children_keep_their_slots_and_see_provided_values() {
    let (_runtime, mut tree, list, journal) = fixture();
    tree.set_content(&list, items(&["a", "b"])).expect("mounts");
    assert_eq!(tree.text(), "2 items:[a:dark:1][b:dark:1]");
    assert_eq!(journal.take(), vec!["mount a", "mount b"]);

    tree.set_content(&list, items(&["b", "c"])).expect("re-renders");
    assert_eq!(tree.text(), "2 items:[b:dark:2][c:dark:1]");
    assert_eq!(journal.take(), vec!["unmount a", "mount c"]);

    tree.unmount();
    assert_eq!(journal.take(), vec!["unmount b", "unmount c"]);
    assert!(tree.is_empty());
}

#[test]
fn update_handles_render_only_the_requesting_position() {
    let (_runtime, mut tree, list, _journal) = fixture();
    tree.set_content(&list, items(&["a"])).expect("mounts");
    let renders = tree.render_count();

    let handle = list.handle.borrow().clone().expect("root rendered");
    handle.request();
    handle.request();
    assert!(tree.has_dirty());
    assert_eq!(tree.render_dirty().expect("renders"), 1);
    // The root re-renders its child as part of its own pass.
    assert_eq!(tree.render_count(), renders + 2);
    assert_eq!(tree.render_dirty().expect("nothing left"), 0);
}

#[test]
fn skipped_renders_keep_output_and_children() {
    let (_runtime, mut tree, list, journal) = fixture();
    tree.set_content(&list, items(&["a"])).expect("mounts");
    journal.take();

    list.skip.set(true);
    tree.set_content(&list, items(&["x", "y"])).expect("skips");
    assert_eq!(tree.text(), "1 items:[a:dark:1]");
    assert!(journal.take().is_empty());
}

#[test]
fn remount_reruns_effects_and_keeps_remembered_values() {
    let (_runtime, mut tree, list, journal) = fixture();
    tree.set_content(&list, items(&["a"])).expect("mounts");
    journal.take();

    tree.remount();
    assert_eq!(journal.take(), vec!["unmount a", "mount a"]);

    tree.set_content(&list, items(&["a"])).expect("re-renders");
    assert_eq!(tree.text(), "1 items:[a:dark:2]");
    assert!(journal.take().is_empty(), "effects run once per mount");
}

#[test]
fn lookup_without_provider_falls_back() {
    let (_runtime, mut tree, list, _journal) = fixture();
    tree.mount(
        Label {
            journal: Rc::clone(&list.label.journal),
        },
        "solo".to_string(),
    )
    .expect("mounts");
    assert_eq!(tree.text(), "[solo:plain:1]");
    assert!(tree.dump().starts_with("Label"));
}
