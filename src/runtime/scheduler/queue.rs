//! Ready queue for the scheduler
//!
//! One FIFO per priority class. Classes are drained in declaration order,
//! tasks within a class strictly in enqueue order.

use std::collections::VecDeque;

use super::task::{TaskId, TaskPriority, PRIORITY_COUNT};

/// Priority-aware ready queue of task ids.
///
/// The queue only stores ids. Entries for tasks that were cancelled after
/// being queued stay in place and are skipped by the scheduler when popped.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    classes: [VecDeque<TaskId>; PRIORITY_COUNT],
}

impl TaskQueue {
    /// Create a new empty task queue.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a task to the back of its class.
    #[inline]
    pub fn push(
        &mut self,
        task: TaskId,
        priority: TaskPriority,
    ) {
        self.classes[priority.index()].push_back(task);
    }

    /// Pop the oldest task of the highest non-empty class.
    pub fn pop(&mut self) -> Option<TaskId> {
        self.classes.iter_mut().find_map(|class| class.pop_front())
    }

    /// Number of queued entries, including stale ones.
    pub fn len(&self) -> usize {
        self.classes.iter().map(VecDeque::len).sum()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(VecDeque::is_empty)
    }

    /// Entries in the order they would be popped.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.classes.iter().flat_map(|class| class.iter().copied())
    }

    /// Drop entries the predicate rejects.
    pub fn retain(
        &mut self,
        mut keep: impl FnMut(TaskId) -> bool,
    ) {
        for class in self.classes.iter_mut() {
            class.retain(|id| keep(*id));
        }
    }
}
