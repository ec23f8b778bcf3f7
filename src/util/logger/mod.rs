//! Logger module for Strand
//!
//! The runtime never writes diagnostics directly. Every component talks to a
//! [`Logger`] capability selected from [`LoggerKind`] at construction time:
//!
//! - `none`: discard everything
//! - `console`: forward to `tracing` (Go-style `[LEVEL] message` once [`init`] ran)
//! - `proxy`: record entries in memory so tests can assert on them
//!
//! # Usage
//!
//! ```rust
//! use strand::util::logger;
//!
//! logger::init();
//! tracing::info!("Hello, {}", "world");
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use crate::runtime::scheduler::TaskId;

static INIT: Once = Once::new();

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Structured context attached to a log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    /// Task the entry is about, if any.
    pub task: Option<TaskId>,
    /// Task name, only present when names are retained.
    pub task_name: Option<String>,
    /// Rendered error, if the entry reports one.
    pub error: Option<String>,
}

impl LogContext {
    /// Empty context.
    #[inline]
    pub fn none() -> Self {
        Self::default()
    }

    /// Context about a task.
    pub fn for_task(
        task: TaskId,
        task_name: Option<&str>,
    ) -> Self {
        Self {
            task: Some(task),
            task_name: task_name.map(str::to_string),
            error: None,
        }
    }

    /// Attach a rendered error.
    pub fn with_error(
        mut self,
        error: impl fmt::Display,
    ) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Logging capability consumed by the runtime.
pub trait Logger {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        context: &LogContext,
    );
}

/// Which logging collaborator the runtime should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerKind {
    /// Drop every entry.
    None,
    /// Forward to `tracing`.
    #[default]
    Console,
    /// Keep entries in memory.
    Proxy,
}

impl fmt::Display for LoggerKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            LoggerKind::None => write!(f, "none"),
            LoggerKind::Console => write!(f, "console"),
            LoggerKind::Proxy => write!(f, "proxy"),
        }
    }
}

impl std::str::FromStr for LoggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(LoggerKind::None),
            "console" | "basic" => Ok(LoggerKind::Console),
            "proxy" => Ok(LoggerKind::Proxy),
            other => Err(format!("unknown logger '{}'", other)),
        }
    }
}

/// Logger that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(
        &self,
        _level: LogLevel,
        _message: &str,
        _context: &LogContext,
    ) {
    }
}

/// Logger backed by `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        context: &LogContext,
    ) {
        let task = context.task.map(|id| id.inner());
        let name = context.task_name.as_deref();
        let error = context.error.as_deref();
        match level {
            LogLevel::Debug => tracing::debug!(task, name, error, "{}", message),
            LogLevel::Info => tracing::info!(task, name, error, "{}", message),
            LogLevel::Warn => tracing::warn!(task, name, error, "{}", message),
            LogLevel::Error => tracing::error!(task, name, error, "{}", message),
        }
    }
}

/// One captured entry of a [`ProxyLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: LogContext,
}

/// Logger that records entries for later inspection.
///
/// Clones share the same buffer, so a test can keep one clone and hand the
/// other to the scheduler.
#[derive(Debug, Default, Clone)]
pub struct ProxyLogger {
    entries: Rc<RefCell<Vec<LogEntry>>>,
}

impl ProxyLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    /// Entries at exactly `level`.
    pub fn entries_at(
        &self,
        level: LogLevel,
    ) -> Vec<LogEntry> {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.level == level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl Logger for ProxyLogger {
    fn log(
        &self,
        level: LogLevel,
        message: &str,
        context: &LogContext,
    ) {
        self.entries.borrow_mut().push(LogEntry {
            level,
            message: message.to_string(),
            context: context.clone(),
        });
    }
}

/// Build the collaborator named by `kind`.
pub fn from_kind(kind: LoggerKind) -> Rc<dyn Logger> {
    match kind {
        LoggerKind::None => Rc::new(NoopLogger),
        LoggerKind::Console => Rc::new(TracingLogger),
        LoggerKind::Proxy => Rc::new(ProxyLogger::new()),
    }
}

/// Initialize logger with default configuration (INFO level)
pub fn init() {
    init_with_level(LogLevel::Info);
}

/// Initialize logger with custom level (Go style: `[LEVEL] message`)
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn init_with_level(level: LogLevel) {
    INIT.call_once(|| {
        let filter = tracing_subscriber::filter::LevelFilter::from_level(level.into());

        let layer = tracing_subscriber::fmt::layer()
            .without_time()
            .with_target(false)
            .with_level(true)
            .with_ansi(false)
            .compact()
            .with_filter(filter);

        // Another subscriber may already be global (e.g. installed by a host app).
        let _ = Registry::default().with(layer).try_init();
    });
}

/// Initialize logger for debug use (DEBUG level)
pub fn init_debug() {
    init_with_level(LogLevel::Debug);
}
