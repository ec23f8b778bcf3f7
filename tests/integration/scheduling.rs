//! Ordering and completion through the public API.

use std::cell::RefCell;
use std::rc::Rc;

use strand::{
    from_fn, once, run, Config, Environment, LoggerKind, Scheduler, Step, TaskOptions,
    TaskPriority, TaskState, Workload,
};

#[test]
fn test_equal_priority_runs_fifo_and_higher_first() {
    let scheduler = Scheduler::new(Config::production());
    let order = Rc::new(RefCell::new(Vec::new()));
    let plan = [
        ("n1", TaskPriority::Normal),
        ("l1", TaskPriority::Low),
        ("n2", TaskPriority::Normal),
        ("h1", TaskPriority::High),
        ("n3", TaskPriority::Normal),
    ];
    for (label, priority) in plan {
        let order = order.clone();
        scheduler.submit_with(
            TaskOptions::new().with_priority(priority),
            once(move |_cx| {
                order.borrow_mut().push(label);
                Ok(())
            }),
        );
    }
    scheduler.drain().unwrap();
    assert_eq!(*order.borrow(), vec!["h1", "n1", "n2", "n3", "l1"]);
}

#[test]
fn test_parent_completes_after_children() {
    let scheduler = Scheduler::new(Config::production());
    let order = Rc::new(RefCell::new(Vec::new()));

    let log = order.clone();
    let parent = scheduler.submit(from_fn(move |cx| {
        for name in ["a", "b"] {
            let log = log.clone();
            let mut yields = 2;
            cx.spawn(from_fn(move |_cx| {
                if yields > 0 {
                    yields -= 1;
                    return Ok(Step::Yield);
                }
                log.borrow_mut().push(name);
                Ok(Step::Complete)
            }));
        }
        log.borrow_mut().push("parent-step");
        Ok(Step::Complete)
    }));

    scheduler.run_tick().unwrap();
    assert_eq!(parent.state(), TaskState::Running);

    scheduler.drain().unwrap();
    assert_eq!(parent.state(), TaskState::Completed);
    assert_eq!(*order.borrow(), vec!["parent-step", "a", "b"]);
}

#[test]
fn test_workload_report_serializes() {
    let config = Config::builder(Environment::Production)
        .logger(LoggerKind::None)
        .build();
    let report = run(config, &Workload::default());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["config"]["environment"], "production");
    assert_eq!(json["drain"]["bound_reached"], false);
    assert_eq!(json["stats"]["completed"], 16);
}
