//! Integration tests for the strand runtime.

#[path = "integration/cancellation.rs"]
mod cancellation;
#[path = "integration/config.rs"]
mod config;
#[path = "integration/error_handling.rs"]
mod error_handling;
#[path = "integration/scheduling.rs"]
mod scheduling;
