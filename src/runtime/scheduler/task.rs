//! Task definitions for the scheduler.
//!
//! A task is one unit of resumable work. The scheduler stores tasks in an
//! arena keyed by [`TaskId`]; parent/child links are ids, never owning pointers.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use super::context::TaskContext;
use super::subscription::SubscriptionCore;
use crate::runtime::errors::{InvalidTransition, TaskError};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl From<TaskId> for usize {
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task lifecycle state.
///
/// ```text
/// Created → Scheduled → Running → { Completed | Cancelled | Errored }
///    └──────────┴──────────────────→ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Task exists but has not been queued.
    Created,
    /// Task is queued and has never run.
    Scheduled,
    /// Task has run at least one step and is not finished.
    Running,
    /// Task reported completion and all its children are terminal.
    Completed,
    /// Task was cancelled, directly or through an ancestor.
    Cancelled,
    /// A fault escaped the task's work.
    Errored,
}

impl TaskState {
    /// Whether no further transition is possible.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled | TaskState::Errored)
    }

    /// Whether `next` is an edge of the lifecycle graph.
    pub fn can_transition_to(
        &self,
        next: TaskState,
    ) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Created, Scheduled)
                | (Created, Cancelled)
                | (Scheduled, Running)
                | (Scheduled, Cancelled)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Errored)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Number of priority classes.
pub const PRIORITY_COUNT: usize = 5;

/// Task priority classes, processed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum TaskPriority {
    /// Tasks that release other work (e.g. disposal).
    Highest = 0,
    /// Tasks likely to trigger many downstream tasks.
    High = 1,
    /// Default priority.
    #[default]
    Normal = 2,
    /// Tasks reflecting state onto non-reactive parts of an application.
    Low = 3,
    /// Everything else.
    Lowest = 4,
}

impl TaskPriority {
    /// All classes in processing order.
    pub const ALL: [TaskPriority; PRIORITY_COUNT] = [
        TaskPriority::Highest,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
        TaskPriority::Lowest,
    ];

    /// Index into per-class queues.
    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// What a task reports after running one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Not done, run me again on a later tick.
    Yield,
    /// Done.
    Complete,
}

/// Result of one step of work.
pub type StepResult = Result<Step, TaskError>;

/// Resumable unit of work.
pub trait Work {
    /// Run until the next suspension point.
    fn step(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) -> StepResult;
}

impl Work for Box<dyn Work> {
    fn step(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) -> StepResult {
        (**self).step(cx)
    }
}

/// [`Work`] backed by a closure. Built by [`from_fn`].
pub struct FnWork<F> {
    f: F,
}

impl<F> Work for FnWork<F>
where
    F: FnMut(&mut TaskContext<'_>) -> StepResult,
{
    fn step(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) -> StepResult {
        (self.f)(cx)
    }
}

impl<F> fmt::Debug for FnWork<F> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("FnWork")
    }
}

/// Wrap a step closure as [`Work`].
#[inline]
pub fn from_fn<F>(f: F) -> FnWork<F>
where
    F: FnMut(&mut TaskContext<'_>) -> StepResult,
{
    FnWork { f }
}

/// Work that runs `f` once and completes.
pub fn once<F>(f: F) -> impl Work
where
    F: FnOnce(&mut TaskContext<'_>) -> Result<(), TaskError>,
{
    let mut f = Some(f);
    from_fn(move |cx| {
        if let Some(f) = f.take() {
            f(cx)?;
        }
        Ok(Step::Complete)
    })
}

/// Options accepted by `Scheduler::submit_with`.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Diagnostic name. Dropped unless names are enabled.
    pub name: Option<String>,
    /// Priority class.
    pub priority: TaskPriority,
    /// Owning task.
    pub parent: Option<TaskId>,
}

impl TaskOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set task name
    pub fn with_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set task priority
    pub fn with_priority(
        mut self,
        priority: TaskPriority,
    ) -> Self {
        self.priority = priority;
        self
    }

    /// Set parent task
    pub fn with_parent(
        mut self,
        parent: TaskId,
    ) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Arena record of a live task.
pub(crate) struct Task {
    id: TaskId,
    priority: TaskPriority,
    parent: Option<TaskId>,
    children: SmallVec<[TaskId; 4]>,
    execution_count: u32,
    /// Taken out while a step runs, dropped once the task stops running.
    work: Option<Box<dyn Work>>,
    /// Set when the work reported completion but children are still live.
    completion_pending: bool,
    /// Not subject to runaway detection (timeout tasks).
    runaway_exempt: bool,
    /// Shared with every `Subscription` clone. Holds the state and the name.
    subscription: Rc<SubscriptionCore>,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .field("priority", &self.priority)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("execution_count", &self.execution_count)
            .field("completion_pending", &self.completion_pending)
            .finish()
    }
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        priority: TaskPriority,
        parent: Option<TaskId>,
        work: Box<dyn Work>,
        subscription: Rc<SubscriptionCore>,
    ) -> Self {
        Self {
            id,
            priority,
            parent,
            children: SmallVec::new(),
            execution_count: 0,
            work: Some(work),
            completion_pending: false,
            runaway_exempt: false,
            subscription,
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> Option<&str> {
        self.subscription.name()
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        self.subscription.state()
    }

    #[inline]
    pub(crate) fn priority(&self) -> TaskPriority {
        self.priority
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    #[inline]
    pub(crate) fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub(crate) fn add_child(
        &mut self,
        child: TaskId,
    ) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(
        &mut self,
        child: TaskId,
    ) {
        self.children.retain(|c| *c != child);
    }

    #[inline]
    pub(crate) fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// Count one more yield, returning the new count.
    pub(crate) fn record_execution(&mut self) -> u32 {
        self.execution_count = self.execution_count.saturating_add(1);
        self.execution_count
    }

    pub(crate) fn reset_execution_count(&mut self) {
        self.execution_count = 0;
    }

    #[inline]
    pub(crate) fn is_completion_pending(&self) -> bool {
        self.completion_pending
    }

    pub(crate) fn mark_completion_pending(&mut self) {
        self.completion_pending = true;
    }

    #[inline]
    pub(crate) fn is_runaway_exempt(&self) -> bool {
        self.runaway_exempt
    }

    pub(crate) fn exempt_from_runaway(&mut self) {
        self.runaway_exempt = true;
    }

    pub(crate) fn take_work(&mut self) -> Option<Box<dyn Work>> {
        self.work.take()
    }

    pub(crate) fn restore_work(
        &mut self,
        work: Box<dyn Work>,
    ) {
        self.work = Some(work);
    }

    #[inline]
    pub(crate) fn subscription(&self) -> &Rc<SubscriptionCore> {
        &self.subscription
    }

    /// Move along the lifecycle graph.
    pub(crate) fn transition(
        &self,
        to: TaskState,
    ) -> Result<(), InvalidTransition> {
        self.subscription.transition(to)
    }
}

/// Iterator for generating task IDs.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next_id: usize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        TaskId(id)
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
