//! Runtime system
//!
//! This module contains the cooperative scheduler, its subscriptions and the
//! uncaught error dispatch chain.

pub mod dispatch;
pub mod errors;
pub mod scheduler;
