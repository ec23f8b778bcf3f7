//! Strand
//!
//! A single-threaded cooperative task runtime with cascading cancellation,
//! runaway detection and an uncaught error handler chain.
//!
//! # Example
//!
//! ```rust
//! use strand::{from_fn, Config, Scheduler, Step};
//!
//! let scheduler = Scheduler::new(Config::development());
//! let mut remaining = 3;
//! let subscription = scheduler.submit(from_fn(move |_cx| {
//!     if remaining == 0 {
//!         return Ok(Step::Complete);
//!     }
//!     remaining -= 1;
//!     Ok(Step::Yield)
//! }));
//!
//! scheduler.drain()?;
//! assert!(subscription.state().is_terminal());
//! assert!(!subscription.is_cancelled());
//! # Ok::<(), strand::RuntimeError>(())
//! ```

#![doc(html_root_url = "https://docs.rs/strand")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod runtime;
pub mod workload;

// Utility modules
pub mod util;

// Re-exports
pub use runtime::dispatch::{
    handler_fn, uncaught_error_count, DispatchOutcome, ErrorDispatcher, ErrorHandler, ErrorRecord,
    Fault, HandlerId,
};
pub use runtime::errors::{
    DispatchDefect, InvalidTransition, RunawayError, RuntimeError, RuntimeResult, TaskError,
    ValidationError,
};
pub use runtime::scheduler::{
    from_fn, once, DrainReport, Scheduler, StatsSnapshot, Step, StepResult, Subscription,
    TaskContext, TaskId, TaskOptions, TaskPriority, TaskState, Work,
};
pub use util::config::{load_config, Config, ConfigBuilder, ConfigError, Environment};
pub use util::logger::{LogContext, LogLevel, Logger, LoggerKind, ProxyLogger};
pub use workload::{run, RunReport, Workload};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "strand";
