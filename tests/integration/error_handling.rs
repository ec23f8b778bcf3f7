//! Uncaught error routing and runaway detection.

use std::cell::RefCell;
use std::rc::Rc;

use strand::{
    from_fn, uncaught_error_count, Config, Environment, Fault, RuntimeError, Scheduler, Step,
    TaskError, TaskState,
};

#[test]
fn test_never_completing_task_is_purged_after_threshold() {
    let config = Config::builder(Environment::Production)
        .runaway_threshold(5)
        .build();
    let scheduler = Scheduler::new(config);
    let faults = Rc::new(RefCell::new(Vec::new()));
    let seen = faults.clone();
    scheduler.register_error_handler_fn(move |record| {
        seen.borrow_mut().push(record.fault().clone());
        record.consume();
        Ok(())
    });

    let sub = scheduler.submit(from_fn(|_cx| Ok(Step::Yield)));
    let report = scheduler.drain().unwrap();

    assert_eq!(report.ticks, 6);
    assert!(sub.is_cancelled());
    let faults = faults.borrow();
    assert_eq!(faults.len(), 1);
    assert!(matches!(&faults[0], Fault::Runaway(error) if error.executions == 6));
}

#[test]
fn test_never_completing_task_keeps_running_without_purge() {
    let config = Config::builder(Environment::Production)
        .runaway_threshold(5)
        .purge_tasks_when_runaway_detected(false)
        .max_drain_ticks(20)
        .build();
    let scheduler = Scheduler::new(config);
    let sub = scheduler.submit(from_fn(|_cx| Ok(Step::Yield)));

    let report = scheduler.drain().unwrap();
    assert!(report.bound_reached);
    assert_eq!(sub.state(), TaskState::Running);
    assert!(!sub.is_cancelled());
    assert_eq!(scheduler.stats().runaways, 0);
    sub.cancel();
}

#[test]
fn test_second_handler_consumes_after_first_passes() {
    let scheduler = Scheduler::new(Config::production());
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = calls.clone();
    scheduler.register_error_handler_fn(move |_record| {
        seen.borrow_mut().push('A');
        Ok(())
    });
    let seen = calls.clone();
    scheduler.register_error_handler_fn(move |record| {
        seen.borrow_mut().push('B');
        record.consume();
        Ok(())
    });

    scheduler.submit(from_fn(|_cx| Err(TaskError::failed("broken"))));
    let before = uncaught_error_count();
    scheduler.drain().unwrap();

    assert_eq!(*calls.borrow(), vec!['A', 'B']);
    assert_eq!(scheduler.dispatcher().uncaught_count(), 0);
    assert!(uncaught_error_count() >= before);
}

#[test]
fn test_uncaught_error_reaches_caller_when_handlers_disabled() {
    let config = Config::builder(Environment::Production)
        .enable_uncaught_error_handlers(false)
        .build();
    let scheduler = Scheduler::new(config);
    scheduler.submit(from_fn(|_cx| Err(TaskError::failed("escaped"))));
    let follow_up = scheduler.submit(from_fn(|_cx| Ok(Step::Complete)));

    match scheduler.drain() {
        Err(RuntimeError::Uncaught(record)) => {
            assert_eq!(record.fault(), &Fault::Task(TaskError::failed("escaped")));
        }
        other => panic!("expected uncaught error, got {:?}", other),
    }

    scheduler.drain().unwrap();
    assert_eq!(follow_up.state(), TaskState::Completed);
}

#[test]
fn test_faulty_handler_does_not_stop_dispatch() {
    let scheduler = Scheduler::new(Config::development());
    scheduler.register_error_handler_fn(|_record| Err(anyhow::anyhow!("handler bug")));
    scheduler.register_error_handler_fn(|record| {
        record.consume();
        Ok(())
    });

    scheduler.submit(from_fn(|_cx| Err(TaskError::failed("x"))));
    scheduler.drain().unwrap();
    assert_eq!(scheduler.dispatcher().defect_count(), 1);
    assert_eq!(scheduler.dispatcher().uncaught_count(), 0);
}
