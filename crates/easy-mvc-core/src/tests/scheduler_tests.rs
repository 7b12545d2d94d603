use super::*;
use crate::runtime::Runtime;
use futures::channel::oneshot;
use futures::executor::block_on;
use futures::task::{noop_waker_ref, Context};
use futures::FutureExt;
use std::cell::RefCell;

fn recording_emitter(runtime: &Runtime, name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> UpdateEmitter {
    let emitter = UpdateEmitter::with_runtime(runtime.handle());
    let log = Rc::clone(log);
    emitter.on(move || log.borrow_mut().push(name));
    emitter
}

#[test]
fn mode_defaults_to_deferred() {
    let _runtime = Runtime::new();
    assert_eq!(scheduler_mode(), SchedulerMode::Deferred);
}

#[test]
fn batch_flushes_each_touched_emitter_once_after_an_await() {
    let runtime = Runtime::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let a = recording_emitter(&runtime, "a", &log);
    let b = recording_emitter(&runtime, "b", &log);
    let (tx, rx) = oneshot::channel::<()>();

    {
        let (a, b) = (a.clone(), b.clone());
        runtime.handle().spawn_local(async move {
            run_batched(|| async move {
                a.queue();
                let _ = rx.await;
                a.queue();
                b.queue();
                a.queue();
            })
            .await
            .expect("batch starts");
        });
    }

    runtime.run_until_stalled();
    assert_eq!(scheduler_mode(), SchedulerMode::Batching);
    assert!(log.borrow().is_empty());

    tx.send(()).expect("batch is waiting");
    runtime.run_until_stalled();
    assert_eq!(*log.borrow(), vec!["a", "b"]);
    assert_eq!(scheduler_mode(), SchedulerMode::Deferred);
}

#[test]
fn starting_a_batch_flushes_updates_that_were_already_waiting() {
    let runtime = Runtime::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let a = recording_emitter(&runtime, "a", &log);
    a.queue();

    block_on(run_batched(|| async {
        assert_eq!(*log.borrow(), vec!["a"]);
    }))
    .expect("batch starts");

    runtime.drain_microtasks();
    assert_eq!(*log.borrow(), vec!["a"]);
}

#[test]
fn nested_batches_resolve_with_the_outermost() {
    let runtime = Runtime::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let a = recording_emitter(&runtime, "a", &log);

    block_on(run_batched(|| async {
        run_batched(|| async { a.queue() })
            .await
            .expect("nested batch joins");
        assert!(log.borrow().is_empty());
        a.queue();
    }))
    .expect("batch starts");

    assert_eq!(*log.borrow(), vec!["a"]);
}

#[test]
fn batch_and_immediate_sections_do_not_mix() {
    let _runtime = Runtime::new();

    let inside_batch = block_on(run_batched(|| async { run_immediate(|| ()) }))
        .expect("batch starts");
    assert!(matches!(inside_batch, Err(MvcError::Configuration(_))));

    let inside_immediate = run_immediate(|| block_on(run_batched(|| async {})))
        .expect("immediate starts");
    assert!(matches!(inside_immediate, Err(MvcError::Configuration(_))));
    assert_eq!(scheduler_mode(), SchedulerMode::Deferred);
}

#[test]
fn dropping_an_unfinished_batch_still_resolves_it() {
    let runtime = Runtime::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let a = recording_emitter(&runtime, "a", &log);

    let mut batch = Box::pin(run_batched(|| async {
        a.queue();
        futures::future::pending::<()>().await;
    }));
    let mut cx = Context::from_waker(noop_waker_ref());
    assert!(batch.poll_unpin(&mut cx).is_pending());
    assert_eq!(scheduler_mode(), SchedulerMode::Batching);

    drop(batch);
    assert_eq!(*log.borrow(), vec!["a"]);
    assert_eq!(scheduler_mode(), SchedulerMode::Deferred);
}

#[test]
fn update_all_delivers_waiting_updates_without_the_microtask() {
    let runtime = Runtime::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let a = recording_emitter(&runtime, "a", &log);
    let idle = recording_emitter(&runtime, "idle", &log);
    a.queue();

    update_all().expect("runtime registered");
    assert_eq!(*log.borrow(), vec!["a"]);

    runtime.drain_microtasks();
    assert_eq!(*log.borrow(), vec!["a"], "stale microtask is a no-op");
    drop(idle);
}

#[test]
fn operations_without_a_runtime_report_it() {
    assert_eq!(update_all(), Err(MvcError::NoRuntime));
    assert_eq!(resolve_batches(), Err(MvcError::NoRuntime));
    assert_eq!(scheduler_mode(), SchedulerMode::Deferred);
}
