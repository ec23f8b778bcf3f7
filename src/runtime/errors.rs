//! Runtime errors

use thiserror::Error;

use crate::runtime::dispatch::{ErrorRecord, HandlerId};
use crate::runtime::scheduler::{TaskId, TaskState};

/// Runtime result
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced to callers of the scheduler.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Uncaught error in {}: {}", .0.task(), .0.fault())]
    Uncaught(Box<ErrorRecord>),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl RuntimeError {
    /// The record of an uncaught error, if this is one.
    pub fn uncaught_record(&self) -> Option<&ErrorRecord> {
        match self {
            RuntimeError::Uncaught(record) => Some(record),
            _ => None,
        }
    }
}

/// Subscription misuse, only raised when validation is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Attempted to add a disposer to {subscription} after it was cancelled")]
    DisposerOnCancelled { subscription: String },

    #[error("Attempted to add a second disposer to {subscription}")]
    DuplicateDisposer { subscription: String },
}

/// A fault that escaped a task's work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Build a `Failed` error from anything printable.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        TaskError::Failed(message.to_string())
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        TaskError::Failed(format!("{:#}", error))
    }
}

/// A task kept yielding past the runaway threshold and was purged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Runaway task {task} detected: still running after {executions} executions (threshold {threshold})")]
pub struct RunawayError {
    pub task: TaskId,
    pub executions: u32,
    pub threshold: u32,
}

/// A registered error handler itself faulted. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error handler {handler} faulted: {message}")]
pub struct DispatchDefect {
    pub handler: HandlerId,
    pub message: String,
}

/// A task state change that the lifecycle graph does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition of {task} from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub task: TaskId,
    pub from: TaskState,
    pub to: TaskState,
}
