//! Cooperative task scheduler
//!
//! This module provides the [`Scheduler`], a single-threaded run loop that
//! drives resumable tasks one step per tick.
//!
//! # Architecture
//!
//! - [`Task`](task::Task) records live in an arena keyed by [`TaskId`]; parent and
//!   child links are ids, so cancellation can walk the tree without ownership cycles.
//! - [`TaskQueue`] holds ready ids, FIFO within each [`TaskPriority`] class.
//! - [`Subscription`] is the caller's handle. Cancelling it cascades depth-first
//!   through every descendant before the task itself is finalized.
//! - [`RunawayDetector`] bounds how many times a task may yield without completing.
//! - Faults and runaway purges go through the [`ErrorDispatcher`](crate::runtime::dispatch::ErrorDispatcher).
//!
//! The scheduler never holds its internal borrow while user code runs
//! (work steps, disposers, error handlers), so all of them may call back into
//! the public API.

pub mod context;
pub mod queue;
pub mod runaway;
pub mod subscription;
pub mod task;

pub use context::TaskContext;
pub use queue::TaskQueue;
pub use runaway::{RunawayDetector, RunawayVerdict};
pub use subscription::Subscription;
pub use task::{
    from_fn, once, FnWork, Step, StepResult, TaskId, TaskIdGenerator, TaskOptions, TaskPriority,
    TaskState, Work, PRIORITY_COUNT,
};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use hashbrown::HashMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::runtime::dispatch::{
    panic_message, ErrorDispatcher, ErrorHandler, ErrorRecord, HandlerId,
};
use crate::runtime::errors::{InvalidTransition, RunawayError, RuntimeResult, TaskError};
use crate::util::config::Config;
use crate::util::logger::{self, LogContext, LogLevel, Logger};

use subscription::SubscriptionCore;
use task::Task;

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    submitted: Cell<usize>,
    completed: Cell<usize>,
    cancelled: Cell<usize>,
    errored: Cell<usize>,
    runaways: Cell<usize>,
    ticks: Cell<usize>,
    skipped: Cell<usize>,
}

impl SchedulerStats {
    #[inline]
    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.get(),
            completed: self.completed.get(),
            cancelled: self.cancelled.get(),
            errored: self.errored.get(),
            runaways: self.runaways.get(),
            ticks: self.ticks.get(),
            skipped: self.skipped.get(),
        }
    }
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Tasks submitted.
    pub submitted: usize,
    /// Tasks that reached `Completed`.
    pub completed: usize,
    /// Tasks that reached `Cancelled`.
    pub cancelled: usize,
    /// Tasks that reached `Errored`.
    pub errored: usize,
    /// Tasks purged as runaway.
    pub runaways: usize,
    /// Steps executed.
    pub ticks: usize,
    /// Stale queue entries skipped without work.
    pub skipped: usize,
}

/// Result of [`Scheduler::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Steps executed by this drain.
    pub ticks: usize,
    /// Whether `max_drain_ticks` stopped the drain.
    pub bound_reached: bool,
    /// Live tasks still queued when the drain returned.
    pub pending: usize,
}

struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    queue: TaskQueue,
    ids: TaskIdGenerator,
    current: Option<TaskId>,
}

/// Everything behind a [`Scheduler`] handle. Subscriptions keep a weak
/// reference to it for cascading cancellation.
pub(crate) struct Shared {
    config: Config,
    logger: Rc<dyn Logger>,
    detector: RunawayDetector,
    dispatcher: ErrorDispatcher,
    state: RefCell<SchedulerState>,
    stats: SchedulerStats,
}

impl Shared {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        context: LogContext,
    ) {
        self.logger.log(level, message, &context);
    }

    fn task_context(
        &self,
        id: TaskId,
    ) -> LogContext {
        let state = self.state.borrow();
        LogContext::for_task(id, state.tasks.get(&id).and_then(Task::name))
    }

    fn report_invalid_transition(
        &self,
        error: InvalidTransition,
    ) {
        self.log(
            LogLevel::Error,
            "Task lifecycle violated",
            LogContext::for_task(error.task, None).with_error(error),
        );
    }

    /// Live children of `id`, as subscription cores.
    fn child_cores(
        &self,
        id: TaskId,
    ) -> SmallVec<[Rc<SubscriptionCore>; 4]> {
        let state = self.state.borrow();
        match state.tasks.get(&id) {
            Some(task) => task
                .children()
                .iter()
                .filter_map(|child| state.tasks.get(child))
                .map(|child| child.subscription().clone())
                .collect(),
            None => SmallVec::new(),
        }
    }

    /// Remove a task from the arena, moving it to the terminal state `to`.
    /// The record is returned so it can be dropped outside the borrow.
    fn finalize(
        &self,
        id: TaskId,
        to: TaskState,
    ) -> Result<Option<Task>, InvalidTransition> {
        let mut state = self.state.borrow_mut();
        match state.tasks.get(&id) {
            Some(task) => task.transition(to)?,
            None => return Ok(None),
        }
        let task = match state.tasks.remove(&id) {
            Some(task) => task,
            None => return Ok(None),
        };
        if let Some(parent) = task.parent() {
            if let Some(owner) = state.tasks.get_mut(&parent) {
                owner.remove_child(id);
            }
        }
        Ok(Some(task))
    }

    /// Complete `parent` if it was only waiting for its children. A parent
    /// being cancelled is left for its own cancellation to finalize.
    fn release_parent(
        &self,
        parent: Option<TaskId>,
    ) {
        let Some(parent) = parent else {
            return;
        };
        let ready = {
            let state = self.state.borrow();
            state.tasks.get(&parent).is_some_and(|task| {
                task.is_completion_pending()
                    && task.children().is_empty()
                    && !task.subscription().is_cancel_requested()
            })
        };
        if ready {
            self.complete_task(parent);
        }
    }

    fn complete_task(
        &self,
        id: TaskId,
    ) {
        let context = self.task_context(id);
        match self.finalize(id, TaskState::Completed) {
            Ok(Some(task)) => {
                SchedulerStats::bump(&self.stats.completed);
                self.log(LogLevel::Debug, "Task completed", context);
                let parent = task.parent();
                drop(task);
                self.release_parent(parent);
            }
            Ok(None) => {}
            Err(error) => self.report_invalid_transition(error),
        }
    }

    /// Complete now, or defer until the last live child is terminal.
    fn complete_or_defer(
        &self,
        id: TaskId,
    ) {
        let deferred = {
            let mut state = self.state.borrow_mut();
            match state.tasks.get_mut(&id) {
                Some(task) if !task.children().is_empty() => {
                    task.mark_completion_pending();
                    true
                }
                Some(_) => false,
                None => return,
            }
        };
        if deferred {
            self.log(
                LogLevel::Debug,
                "Task completion deferred until its children finish",
                self.task_context(id),
            );
        } else {
            self.complete_task(id);
        }
    }

    /// Cascading cancellation. `core` has already been marked as requested.
    pub(crate) fn cancel_task(
        &self,
        core: &Rc<SubscriptionCore>,
    ) {
        let Some(id) = core.task() else {
            core.finish_cancel();
            return;
        };

        for child in self.child_cores(id) {
            child.cancel();
        }

        let context = self.task_context(id);
        match self.finalize(id, TaskState::Cancelled) {
            Ok(Some(task)) => {
                SchedulerStats::bump(&self.stats.cancelled);
                self.log(LogLevel::Debug, "Task cancelled", context);
                let parent = task.parent();
                drop(task);
                core.finish_cancel();
                self.release_parent(parent);
            }
            Ok(None) => {
                // Already reaped: completed, errored, or never admitted.
                if !core.state().is_terminal() {
                    let _ = core.transition(TaskState::Cancelled);
                }
                core.finish_cancel();
            }
            Err(error) => {
                self.report_invalid_transition(error);
                core.finish_cancel();
            }
        }
    }

    /// Route a fault, cancel the children, then finalize as `Errored`.
    fn fail_task(
        &self,
        id: TaskId,
        error: TaskError,
    ) -> RuntimeResult<()> {
        let context = self.task_context(id);
        let record = ErrorRecord::new(id, context.task_name.clone(), error);
        let dispatched = self.dispatcher.dispatch(record);

        for child in self.child_cores(id) {
            child.cancel();
        }

        match self.finalize(id, TaskState::Errored) {
            Ok(Some(task)) => {
                SchedulerStats::bump(&self.stats.errored);
                self.log(LogLevel::Debug, "Task errored", context);
                let parent = task.parent();
                drop(task);
                self.release_parent(parent);
            }
            Ok(None) => {}
            Err(error) => self.report_invalid_transition(error),
        }

        dispatched.map(|_| ())
    }

    /// Put a yielded task back in the queue, unless it has run away.
    fn reschedule(
        &self,
        id: TaskId,
        work: Box<dyn Work>,
    ) -> RuntimeResult<()> {
        let (verdict, executions, core, leftover) = {
            let mut state = self.state.borrow_mut();
            let Some(task) = state.tasks.get_mut(&id) else {
                return Ok(());
            };
            let executions = task.record_execution();
            let verdict = if task.is_runaway_exempt() {
                RunawayVerdict::WithinBudget
            } else {
                self.detector.observe(executions)
            };
            let core = task.subscription().clone();
            let priority = task.priority();
            let leftover = match verdict {
                RunawayVerdict::WithinBudget => {
                    task.restore_work(work);
                    None
                }
                RunawayVerdict::Report => {
                    task.reset_execution_count();
                    task.restore_work(work);
                    None
                }
                RunawayVerdict::Purge => Some(work),
            };
            if leftover.is_none() {
                state.queue.push(id, priority);
            }
            (verdict, executions, core, leftover)
        };
        drop(leftover);

        let context = LogContext::for_task(id, core.name());
        match verdict {
            RunawayVerdict::WithinBudget => Ok(()),
            RunawayVerdict::Report => {
                self.log(
                    LogLevel::Warn,
                    &format!(
                        "Runaway task detected: still running after {} executions (threshold {})",
                        executions,
                        self.detector.threshold()
                    ),
                    context,
                );
                Ok(())
            }
            RunawayVerdict::Purge => {
                SchedulerStats::bump(&self.stats.runaways);
                self.log(
                    LogLevel::Warn,
                    &format!("Runaway task purged after {} executions", executions),
                    context,
                );
                core.cancel();
                let record = ErrorRecord::new(
                    id,
                    core.name().map(str::to_string),
                    RunawayError {
                        task: id,
                        executions,
                        threshold: self.detector.threshold(),
                    },
                );
                self.dispatcher.dispatch(record).map(|_| ())
            }
        }
    }

    /// Pop until a live task with work is found, marking it running.
    fn next_runnable(&self) -> RuntimeResult<Option<(TaskId, Box<dyn Work>, u32)>> {
        let mut state = self.state.borrow_mut();
        while let Some(id) = state.queue.pop() {
            let Some(task) = state.tasks.get_mut(&id) else {
                SchedulerStats::bump(&self.stats.skipped);
                continue;
            };
            if task.state() == TaskState::Scheduled {
                task.transition(TaskState::Running)?;
            }
            let Some(work) = task.take_work() else {
                SchedulerStats::bump(&self.stats.skipped);
                continue;
            };
            let executions = task.execution_count();
            state.current = Some(id);
            return Ok(Some((id, work, executions)));
        }
        Ok(None)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Cores can no longer reach us, so each cancels locally.
        let tasks: Vec<Task> = self.state.get_mut().tasks.drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.subscription().cancel();
        }
    }
}

/// Single-threaded cooperative scheduler.
///
/// `Scheduler` is a cheap handle; clones drive the same run loop.
#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl fmt::Debug for Scheduler {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("live_tasks", &state.tasks.len())
            .field("queued", &state.queue.len())
            .field("current", &state.current)
            .field("stats", &self.shared.stats.snapshot())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler using the logger named by the config.
    pub fn new(config: Config) -> Self {
        let logger = logger::from_kind(config.logger());
        Self::with_logger(config, logger)
    }

    /// Create a scheduler with an explicit logging collaborator.
    pub fn with_logger(
        config: Config,
        logger: Rc<dyn Logger>,
    ) -> Self {
        let detector = RunawayDetector::new(&config);
        let dispatcher = ErrorDispatcher::new(&config, logger.clone());
        Self {
            shared: Rc::new(Shared {
                config,
                logger,
                detector,
                dispatcher,
                state: RefCell::new(SchedulerState {
                    tasks: HashMap::new(),
                    queue: TaskQueue::new(),
                    ids: TaskIdGenerator::new(),
                    current: None,
                }),
                stats: SchedulerStats::default(),
            }),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    #[inline]
    pub fn logger(&self) -> &Rc<dyn Logger> {
        &self.shared.logger
    }

    #[inline]
    pub fn dispatcher(&self) -> &ErrorDispatcher {
        &self.shared.dispatcher
    }

    #[inline]
    pub fn runaway_detector(&self) -> &RunawayDetector {
        &self.shared.detector
    }

    /// Append an error handler to the dispatch chain.
    pub fn register_error_handler<H>(
        &self,
        handler: H,
    ) -> HandlerId
    where
        H: ErrorHandler + 'static,
    {
        self.shared.dispatcher.register(handler)
    }

    /// Append a closure to the dispatch chain.
    pub fn register_error_handler_fn<F>(
        &self,
        f: F,
    ) -> HandlerId
    where
        F: Fn(&mut ErrorRecord) -> anyhow::Result<()> + 'static,
    {
        self.shared.dispatcher.register_fn(f)
    }

    pub fn unregister_error_handler(
        &self,
        id: HandlerId,
    ) -> bool {
        self.shared.dispatcher.unregister(id)
    }

    /// Submit a root task with default options.
    pub fn submit<W>(
        &self,
        work: W,
    ) -> Subscription
    where
        W: Work + 'static,
    {
        self.submit_with(TaskOptions::new(), work)
    }

    /// Submit a task. Never blocks.
    ///
    /// The name is kept only when names are enabled. A task whose parent is
    /// unknown, terminal or being cancelled is cancelled immediately.
    pub fn submit_with<W>(
        &self,
        options: TaskOptions,
        work: W,
    ) -> Subscription
    where
        W: Work + 'static,
    {
        self.admit(options, Box::new(work), false)
    }

    fn admit(
        &self,
        options: TaskOptions,
        work: Box<dyn Work>,
        runaway_exempt: bool,
    ) -> Subscription {
        let shared = &self.shared;
        let TaskOptions {
            name,
            priority,
            parent,
        } = options;

        let (id, core, admitted) = {
            let mut state = shared.state.borrow_mut();
            let id = state.ids.next();
            let name = shared
                .config
                .enable_names()
                .then(|| name.unwrap_or_else(|| id.to_string()));
            let core = Rc::new(SubscriptionCore::for_task(
                id,
                name,
                Rc::downgrade(&self.shared),
                shared.config.validate_subscriptions(),
            ));

            let admitted = match parent {
                None => true,
                Some(parent) => match state.tasks.get_mut(&parent) {
                    Some(owner) if !owner.subscription().is_cancel_requested() => {
                        owner.add_child(id);
                        true
                    }
                    _ => false,
                },
            };

            if admitted {
                let mut task = Task::new(id, priority, parent, work, core.clone());
                if runaway_exempt {
                    task.exempt_from_runaway();
                }
                let scheduled = task.transition(TaskState::Scheduled);
                debug_assert!(scheduled.is_ok());
                state.queue.push(id, priority);
                state.tasks.insert(id, task);
            }
            (id, core, admitted)
        };

        SchedulerStats::bump(&shared.stats.submitted);
        let context = LogContext::for_task(id, core.name());
        if admitted {
            shared.log(LogLevel::Debug, "Task submitted", context);
        } else {
            shared.log(
                LogLevel::Warn,
                "Task submitted under a terminal parent was cancelled",
                context,
            );
            SchedulerStats::bump(&shared.stats.cancelled);
            core.cancel();
        }
        Subscription::from_core(core)
    }

    /// Submit a task that cancels `target` after being stepped `ticks` times.
    /// Completes early if the target finishes first. The timeout itself is
    /// not subject to runaway detection.
    pub fn submit_timeout(
        &self,
        target: &Subscription,
        ticks: u32,
    ) -> Subscription {
        let target = target.clone();
        let mut remaining = ticks;
        self.admit(
            TaskOptions::new().with_name(format!("timeout({})", target)),
            Box::new(from_fn(move |_cx| {
                if target.is_cancelled() || target.state().is_terminal() {
                    return Ok(Step::Complete);
                }
                if remaining == 0 {
                    target.cancel();
                    return Ok(Step::Complete);
                }
                remaining -= 1;
                Ok(Step::Yield)
            })),
            true,
        )
    }

    /// Cancel a live task by id. Returns false if it is not live.
    pub fn cancel(
        &self,
        id: TaskId,
    ) -> bool {
        let core = self
            .shared
            .state
            .borrow()
            .tasks
            .get(&id)
            .map(|task| task.subscription().clone());
        match core {
            Some(core) => {
                core.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live task, roots first so the cascade reaches everything,
    /// then drop the stale queue entries they leave behind.
    pub fn shutdown(&self) {
        let roots: Vec<Rc<SubscriptionCore>> = {
            let state = self.shared.state.borrow();
            state
                .tasks
                .values()
                .filter(|task| task.parent().is_none())
                .map(|task| task.subscription().clone())
                .collect()
        };
        for root in roots {
            root.cancel();
        }

        // Disposers may have submitted new work; only stale entries go.
        let mut state = self.shared.state.borrow_mut();
        let SchedulerState { tasks, queue, .. } = &mut *state;
        queue.retain(|id| tasks.contains_key(&id));
    }

    /// Run one step of the next eligible task.
    ///
    /// Returns the id of the task that ran, or `None` if nothing was ready.
    /// Fails only when an uncaught error is returned to the caller.
    pub fn run_tick(&self) -> RuntimeResult<Option<TaskId>> {
        let shared = &self.shared;
        let Some((id, mut work, executions)) = shared.next_runnable()? else {
            return Ok(None);
        };

        let result = {
            let mut cx = TaskContext::new(self, id, executions);
            match panic::catch_unwind(AssertUnwindSafe(|| work.step(&mut cx))) {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
            }
        };
        shared.state.borrow_mut().current = None;
        SchedulerStats::bump(&shared.stats.ticks);

        self.after_step(id, work, result)?;
        Ok(Some(id))
    }

    fn after_step(
        &self,
        id: TaskId,
        work: Box<dyn Work>,
        result: StepResult,
    ) -> RuntimeResult<()> {
        let shared = &self.shared;
        let live = shared
            .state
            .borrow()
            .tasks
            .get(&id)
            .is_some_and(|task| !task.subscription().is_cancel_requested());

        if !live {
            // Cancelled while the step ran: it never resumes.
            drop(work);
            if let Err(error) = result {
                shared.log(
                    LogLevel::Warn,
                    "Fault from a task cancelled during its step was discarded",
                    LogContext::for_task(id, None).with_error(error),
                );
            }
            return Ok(());
        }

        match result {
            Ok(Step::Complete) => {
                drop(work);
                shared.complete_or_defer(id);
                Ok(())
            }
            Ok(Step::Yield) => shared.reschedule(id, work),
            Err(error) => {
                drop(work);
                shared.fail_task(id, error)
            }
        }
    }

    /// Run ticks until nothing is ready or `max_drain_ticks` is reached.
    pub fn drain(&self) -> RuntimeResult<DrainReport> {
        let bound = self.shared.config.max_drain_ticks();
        let mut ticks = 0;
        while ticks < bound {
            if self.run_tick()?.is_none() {
                return Ok(DrainReport {
                    ticks,
                    bound_reached: false,
                    pending: 0,
                });
            }
            ticks += 1;
        }

        let pending = self.pending_tasks();
        if pending.is_empty() {
            return Ok(DrainReport {
                ticks,
                bound_reached: false,
                pending: 0,
            });
        }

        let labels: Vec<String> = pending
            .iter()
            .map(|id| self.name_of(*id).unwrap_or_else(|| id.to_string()))
            .collect();
        self.shared.log(
            LogLevel::Warn,
            &format!(
                "Drain stopped after {} ticks with {} tasks pending. Current tasks include: [{}]",
                ticks,
                pending.len(),
                labels.join(", ")
            ),
            LogContext::none(),
        );
        Ok(DrainReport {
            ticks,
            bound_reached: true,
            pending: pending.len(),
        })
    }

    /// State of a live task. Terminal tasks are reaped; ask their subscription.
    pub fn state_of(
        &self,
        id: TaskId,
    ) -> Option<TaskState> {
        self.shared.state.borrow().tasks.get(&id).map(Task::state)
    }

    /// Subscription of a live task.
    pub fn subscription_of(
        &self,
        id: TaskId,
    ) -> Option<Subscription> {
        self.shared
            .state
            .borrow()
            .tasks
            .get(&id)
            .map(|task| Subscription::from_core(task.subscription().clone()))
    }

    /// Retained name of a live task.
    pub fn name_of(
        &self,
        id: TaskId,
    ) -> Option<String> {
        self.shared
            .state
            .borrow()
            .tasks
            .get(&id)
            .and_then(|task| task.name().map(str::to_string))
    }

    /// Live children of a live task.
    pub fn children_of(
        &self,
        id: TaskId,
    ) -> Vec<TaskId> {
        self.shared
            .state
            .borrow()
            .tasks
            .get(&id)
            .map(|task| task.children().to_vec())
            .unwrap_or_default()
    }

    /// Yields counted against the runaway threshold.
    pub fn execution_count(
        &self,
        id: TaskId,
    ) -> Option<u32> {
        self.shared
            .state
            .borrow()
            .tasks
            .get(&id)
            .map(Task::execution_count)
    }

    /// Live tasks, including those waiting on children.
    pub fn live_tasks(&self) -> usize {
        self.shared.state.borrow().tasks.len()
    }

    /// Queue entries, including stale ones for cancelled tasks.
    pub fn queued_len(&self) -> usize {
        self.shared.state.borrow().queue.len()
    }

    /// Live queued tasks in the order they would run.
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        let state = self.shared.state.borrow();
        let pending = state
            .queue
            .iter()
            .filter(|id| state.tasks.contains_key(id))
            .collect();
        pending
    }

    /// Whether any live task is waiting for a tick.
    pub fn has_pending(&self) -> bool {
        let state = self.shared.state.borrow();
        let pending = state.queue.iter().any(|id| state.tasks.contains_key(&id));
        pending
    }

    /// The task whose step is executing, if any.
    pub fn current_task(&self) -> Option<TaskId> {
        self.shared.state.borrow().current
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests;
