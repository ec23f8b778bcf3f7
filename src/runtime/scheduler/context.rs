//! Context handed to a task for the duration of one step.

use super::subscription::Subscription;
use super::task::{TaskId, TaskOptions, Work};
use super::Scheduler;

/// Access to the scheduler from inside a running step.
pub struct TaskContext<'a> {
    scheduler: &'a Scheduler,
    task: TaskId,
    execution_count: u32,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        scheduler: &'a Scheduler,
        task: TaskId,
        execution_count: u32,
    ) -> Self {
        Self {
            scheduler,
            task,
            execution_count,
        }
    }

    /// The running task.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Yields counted against the runaway threshold before this step.
    #[inline]
    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// The scheduler running this task.
    #[inline]
    pub fn scheduler(&self) -> &'a Scheduler {
        self.scheduler
    }

    /// Submit a child of the running task.
    pub fn spawn<W>(
        &self,
        work: W,
    ) -> Subscription
    where
        W: Work + 'static,
    {
        self.spawn_with(TaskOptions::new(), work)
    }

    /// Submit a child of the running task with options. The parent in
    /// `options` is replaced by the running task.
    pub fn spawn_with<W>(
        &self,
        options: TaskOptions,
        work: W,
    ) -> Subscription
    where
        W: Work + 'static,
    {
        self.scheduler
            .submit_with(options.with_parent(self.task), work)
    }

    /// Request cancellation of the running task. It does not run again and
    /// the result of the current step is discarded.
    pub fn cancel_self(&self) {
        self.scheduler.cancel(self.task);
    }

    /// Whether the running task has been cancelled during this step.
    pub fn is_cancelled(&self) -> bool {
        self.scheduler
            .state_of(self.task)
            .map_or(true, |state| state.is_terminal())
    }
}
