//! Uncaught error dispatch
//!
//! Errors that escape a task (faults and runaway purges) are offered to an
//! ordered chain of handlers. The first handler that consumes the record ends
//! dispatch. An unconsumed record is either surfaced (logged and counted) or
//! handed back to the scheduler's caller, depending on
//! `enable_uncaught_error_handlers`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use thiserror::Error;

use crate::runtime::errors::{DispatchDefect, RunawayError, RuntimeError, TaskError};
use crate::runtime::scheduler::TaskId;
use crate::util::config::Config;
use crate::util::logger::{LogContext, LogLevel, Logger};

/// Uncaught errors surfaced by any dispatcher in this process.
static UNCAUGHT_ERRORS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide count of surfaced uncaught errors.
pub fn uncaught_error_count() -> usize {
    UNCAUGHT_ERRORS.load(Ordering::SeqCst)
}

/// Identifier returned by [`ErrorDispatcher::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub usize);

impl fmt::Display for HandlerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Handler({})", self.0)
    }
}

/// Payload of an [`ErrorRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Runaway(#[from] RunawayError),
}

/// An error travelling through the handler chain.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    task: TaskId,
    task_name: Option<String>,
    fault: Fault,
    consumed: bool,
}

impl ErrorRecord {
    pub fn new(
        task: TaskId,
        task_name: Option<String>,
        fault: impl Into<Fault>,
    ) -> Self {
        Self {
            task,
            task_name,
            fault: fault.into(),
            consumed: false,
        }
    }

    #[inline]
    pub fn task(&self) -> TaskId {
        self.task
    }

    #[inline]
    pub fn task_name(&self) -> Option<&str> {
        self.task_name.as_deref()
    }

    #[inline]
    pub fn fault(&self) -> &Fault {
        &self.fault
    }

    #[inline]
    pub fn is_runaway(&self) -> bool {
        matches!(self.fault, Fault::Runaway(_))
    }

    /// Mark the record as handled. Stops dispatch after the current handler.
    pub fn consume(&mut self) {
        self.consumed = true;
    }

    #[inline]
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    fn log_context(&self) -> LogContext {
        LogContext::for_task(self.task, self.task_name()).with_error(&self.fault)
    }
}

/// A handler in the dispatch chain.
///
/// Handlers should not fail. One that returns `Err` or panics is logged as a
/// [`DispatchDefect`] and dispatch continues with the next handler.
pub trait ErrorHandler {
    fn on_uncaught_error(
        &self,
        record: &mut ErrorRecord,
    ) -> anyhow::Result<()>;
}

/// [`ErrorHandler`] backed by a closure. Built by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> ErrorHandler for FnHandler<F>
where
    F: Fn(&mut ErrorRecord) -> anyhow::Result<()>,
{
    fn on_uncaught_error(
        &self,
        record: &mut ErrorRecord,
    ) -> anyhow::Result<()> {
        (self.f)(record)
    }
}

/// Wrap a closure as an [`ErrorHandler`].
#[inline]
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut ErrorRecord) -> anyhow::Result<()>,
{
    FnHandler { f }
}

/// How a dispatch ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler consumed the record.
    Consumed(HandlerId),
    /// Nobody consumed it; it was logged and counted.
    Surfaced,
}

/// Ordered chain of error handlers.
pub struct ErrorDispatcher {
    handlers: RefCell<IndexMap<HandlerId, Rc<dyn ErrorHandler>>>,
    next_id: Cell<usize>,
    surface_uncaught: bool,
    logger: Rc<dyn Logger>,
    uncaught: Cell<usize>,
    defects: Cell<usize>,
}

impl fmt::Debug for ErrorDispatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ErrorDispatcher")
            .field("handlers", &self.handlers.borrow().keys().collect::<Vec<_>>())
            .field("surface_uncaught", &self.surface_uncaught)
            .field("uncaught", &self.uncaught.get())
            .field("defects", &self.defects.get())
            .finish()
    }
}

impl ErrorDispatcher {
    pub fn new(
        config: &Config,
        logger: Rc<dyn Logger>,
    ) -> Self {
        Self {
            handlers: RefCell::new(IndexMap::new()),
            next_id: Cell::new(0),
            surface_uncaught: config.enable_uncaught_error_handlers(),
            logger,
            uncaught: Cell::new(0),
            defects: Cell::new(0),
        }
    }

    /// Append a handler to the chain.
    pub fn register<H>(
        &self,
        handler: H,
    ) -> HandlerId
    where
        H: ErrorHandler + 'static,
    {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().insert(id, Rc::new(handler));
        id
    }

    /// Append a closure to the chain.
    pub fn register_fn<F>(
        &self,
        f: F,
    ) -> HandlerId
    where
        F: Fn(&mut ErrorRecord) -> anyhow::Result<()> + 'static,
    {
        self.register(handler_fn(f))
    }

    /// Remove a handler, keeping the order of the rest.
    pub fn unregister(
        &self,
        id: HandlerId,
    ) -> bool {
        let removed = self.handlers.borrow_mut().shift_remove(&id).is_some();
        if !removed {
            self.logger.log(
                LogLevel::Warn,
                &format!("Attempted to remove {} that is not in the list of error handlers", id),
                &LogContext::none(),
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    /// Uncaught errors surfaced by this dispatcher.
    #[inline]
    pub fn uncaught_count(&self) -> usize {
        self.uncaught.get()
    }

    /// Handler faults seen by this dispatcher.
    #[inline]
    pub fn defect_count(&self) -> usize {
        self.defects.get()
    }

    /// Offer `record` to each handler in order until one consumes it.
    pub fn dispatch(
        &self,
        mut record: ErrorRecord,
    ) -> Result<DispatchOutcome, RuntimeError> {
        // Snapshot so handlers may register or unregister while we iterate.
        let chain: Vec<(HandlerId, Rc<dyn ErrorHandler>)> = self
            .handlers
            .borrow()
            .iter()
            .map(|(id, handler)| (*id, handler.clone()))
            .collect();

        for (id, handler) in chain {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| handler.on_uncaught_error(&mut record)));
            let fault = match result {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(format!("{:#}", error)),
                Err(payload) => Some(panic_message(&*payload)),
            };
            if let Some(message) = fault {
                self.report_defect(
                    DispatchDefect {
                        handler: id,
                        message,
                    },
                    &record,
                );
            }
            if record.is_consumed() {
                return Ok(DispatchOutcome::Consumed(id));
            }
        }

        if self.surface_uncaught {
            self.uncaught.set(self.uncaught.get() + 1);
            UNCAUGHT_ERRORS.fetch_add(1, Ordering::SeqCst);
            self.logger.log(LogLevel::Error, "Uncaught error", &record.log_context());
            Ok(DispatchOutcome::Surfaced)
        } else {
            self.logger.log(
                LogLevel::Error,
                "Uncaught error returned to caller",
                &record.log_context(),
            );
            Err(RuntimeError::Uncaught(Box::new(record)))
        }
    }

    fn report_defect(
        &self,
        defect: DispatchDefect,
        record: &ErrorRecord,
    ) {
        self.defects.set(self.defects.get() + 1);
        let message = match record.task_name() {
            Some(name) => format!(
                "Error handler {} faulted while handling '{}' from task '{}'",
                defect.handler,
                record.fault(),
                name
            ),
            None => "Error triggered when invoking an uncaught error handler".to_string(),
        };
        self.logger.log(
            LogLevel::Error,
            &message,
            &LogContext::for_task(record.task(), record.task_name()).with_error(&defect),
        );
    }
}

/// Render a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
