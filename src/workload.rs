//! Synthetic workload used by the `strand` binary and the benchmarks.
//!
//! A workload is a forest of tasks: each root spawns children that yield a
//! fixed number of times before completing. Optional extras exercise the
//! runaway detector, the error dispatcher and timeouts.

use std::cell::Cell;
use std::rc::Rc;

use serde::Serialize;
use tracing::debug;

use crate::runtime::errors::TaskError;
use crate::runtime::scheduler::{
    from_fn, DrainReport, Scheduler, StatsSnapshot, Step, TaskOptions, TaskPriority,
};
use crate::util::config::Config;

/// Shape of a synthetic workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workload {
    /// Root tasks to submit.
    pub roots: usize,
    /// Children spawned by each root on its first step.
    pub children: usize,
    /// Yields performed by each child before completing.
    pub steps: u32,
    /// Add a task that never completes.
    pub runaway: bool,
    /// Add a task whose first step fails.
    pub fail: bool,
    /// Add a never-ending task cancelled by a timeout after this many ticks.
    pub timeout: Option<u32>,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            roots: 4,
            children: 3,
            steps: 5,
            runaway: false,
            fail: false,
            timeout: None,
        }
    }
}

/// Outcome of [`run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub config: Config,
    pub workload: Workload,
    pub drain: DrainReport,
    pub stats: StatsSnapshot,
    /// Uncaught errors surfaced by the dispatcher.
    pub uncaught: usize,
    /// Uncaught errors returned to the driver instead.
    pub rethrown: Vec<String>,
    /// Runaway purges seen by the reporting handler.
    pub runaways_reported: usize,
    /// Handler defects logged during dispatch.
    pub defects: usize,
}

/// Submit `workload` to a fresh scheduler and drain it.
///
/// Uncaught errors returned by the scheduler do not stop the run; they are
/// collected into the report and draining resumes.
pub fn run(
    config: Config,
    workload: &Workload,
) -> RunReport {
    let scheduler = Scheduler::new(config.clone());
    let runaways = Rc::new(Cell::new(0));

    let seen = runaways.clone();
    scheduler.register_error_handler_fn(move |record| {
        if record.is_runaway() {
            seen.set(seen.get() + 1);
            record.consume();
        }
        Ok(())
    });

    submit(&scheduler, workload);

    let mut rethrown = Vec::new();
    let before = scheduler.stats().ticks;
    let drain = loop {
        match scheduler.drain() {
            Ok(report) => {
                // An interrupted drain may have run several ticks first.
                break DrainReport {
                    ticks: scheduler.stats().ticks - before,
                    ..report
                };
            }
            Err(error) => {
                debug!("Drain interrupted: {}", error);
                rethrown.push(error.to_string());
            }
        }
    };
    scheduler.shutdown();

    RunReport {
        config,
        workload: workload.clone(),
        drain,
        stats: scheduler.stats(),
        uncaught: scheduler.dispatcher().uncaught_count(),
        rethrown,
        runaways_reported: runaways.get(),
        defects: scheduler.dispatcher().defect_count(),
    }
}

fn submit(
    scheduler: &Scheduler,
    workload: &Workload,
) {
    for root in 0..workload.roots {
        let children = workload.children;
        let steps = workload.steps;
        let mut spawned = false;
        scheduler.submit_with(
            TaskOptions::new().with_name(format!("root-{}", root)),
            from_fn(move |cx| {
                if !spawned {
                    spawned = true;
                    for child in 0..children {
                        let mut remaining = steps;
                        cx.spawn_with(
                            TaskOptions::new()
                                .with_name(format!("root-{}/child-{}", root, child))
                                .with_priority(TaskPriority::Low),
                            from_fn(move |_cx| {
                                if remaining == 0 {
                                    return Ok(Step::Complete);
                                }
                                remaining -= 1;
                                Ok(Step::Yield)
                            }),
                        );
                    }
                }
                Ok(Step::Complete)
            }),
        );
    }

    if workload.runaway {
        scheduler.submit_with(
            TaskOptions::new().with_name("runaway"),
            from_fn(|_cx| Ok(Step::Yield)),
        );
    }

    if workload.fail {
        scheduler.submit_with(
            TaskOptions::new()
                .with_name("faulty")
                .with_priority(TaskPriority::High),
            from_fn(|_cx| Err(TaskError::failed("simulated failure"))),
        );
    }

    if let Some(ticks) = workload.timeout {
        let target = scheduler.submit_with(
            TaskOptions::new()
                .with_name("sleeper")
                .with_priority(TaskPriority::Lowest),
            from_fn(|_cx| Ok(Step::Yield)),
        );
        scheduler.submit_timeout(&target, ticks);
    }
}
