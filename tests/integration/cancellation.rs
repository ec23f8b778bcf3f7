//! End-to-end cancellation behaviour through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand::{from_fn, once, Config, Scheduler, Step, Subscription, TaskOptions, TaskState};

fn spin() -> impl strand::Work {
    from_fn(|_cx| Ok(Step::Yield))
}

#[test]
fn test_parent_with_two_children_cancelled() {
    let scheduler = Scheduler::new(Config::development());
    let children = Rc::new(RefCell::new(Vec::<Subscription>::new()));

    let slot = children.clone();
    let parent = scheduler.submit(from_fn(move |cx| {
        if slot.borrow().is_empty() {
            let first = cx.spawn(from_fn(|_cx| Ok(Step::Yield)));
            let second = cx.spawn(from_fn(|_cx| Ok(Step::Yield)));
            slot.borrow_mut().extend([first, second]);
        }
        Ok(Step::Yield)
    }));

    scheduler.run_tick().unwrap();
    assert_eq!(children.borrow().len(), 2);

    parent.cancel();

    assert!(parent.is_cancelled());
    for child in children.borrow().iter() {
        assert!(child.is_cancelled());
        assert_eq!(child.state(), TaskState::Cancelled);
    }
    assert_eq!(scheduler.live_tasks(), 0);
}

#[test]
fn test_repeated_cancel_disposes_once() {
    let scheduler = Scheduler::new(Config::production());
    let disposed = Rc::new(Cell::new(0));
    let sub = scheduler.submit(spin());
    let count = disposed.clone();
    sub.add_disposer(move || count.set(count.get() + 1)).unwrap();

    for _ in 0..5 {
        sub.cancel();
    }
    assert_eq!(disposed.get(), 1);
}

#[test]
fn test_completed_task_is_not_cancelled() {
    let scheduler = Scheduler::new(Config::production());
    let sub = scheduler.submit(once(|_cx| Ok(())));
    scheduler.drain().unwrap();
    assert_eq!(sub.state(), TaskState::Completed);
    assert!(!sub.is_cancelled());
}

#[test]
fn test_deep_tree_cancel_leaves_nothing_live() {
    let scheduler = Scheduler::new(Config::production());
    let root = scheduler.submit(spin());
    let mut parent = root.task_id().unwrap();
    let mut subs = vec![root.clone()];
    for _ in 0..64 {
        let sub = scheduler.submit_with(TaskOptions::new().with_parent(parent), spin());
        parent = sub.task_id().unwrap();
        subs.push(sub);
    }
    assert_eq!(scheduler.live_tasks(), 65);

    root.cancel();
    assert_eq!(scheduler.live_tasks(), 0);
    assert!(subs.iter().all(Subscription::is_cancelled));
}

#[test]
fn test_timeout_cancels_long_running_task() {
    let scheduler = Scheduler::new(Config::production());
    let target = scheduler.submit(from_fn(|_cx| Ok(Step::Yield)));
    scheduler.submit_timeout(&target, 10);
    let report = scheduler.drain().unwrap();
    assert!(!report.bound_reached);
    assert!(target.is_cancelled());
}
