//! Runaway task detection.
//!
//! A task that keeps yielding without completing consumes a tick every time
//! it is re-queued. Once its execution count passes the threshold it is either
//! purged or reported, depending on configuration.

use crate::util::config::Config;

/// What to do with a task after it yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunawayVerdict {
    /// Count is within the threshold.
    WithinBudget,
    /// Threshold exceeded, force-cancel the task and report it.
    Purge,
    /// Threshold exceeded, log a diagnostic and keep the task running.
    Report,
}

/// Applies the runaway policy to per-task execution counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunawayDetector {
    threshold: u32,
    purge: bool,
}

impl RunawayDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            threshold: config.runaway_threshold(),
            purge: config.purge_tasks_when_runaway_detected(),
        }
    }

    /// The threshold `T`: a count above it is runaway.
    #[inline]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[inline]
    pub fn purges(&self) -> bool {
        self.purge
    }

    /// Judge a non-terminal task that has yielded `execution_count` times.
    pub fn observe(
        &self,
        execution_count: u32,
    ) -> RunawayVerdict {
        if execution_count <= self.threshold {
            RunawayVerdict::WithinBudget
        } else if self.purge {
            RunawayVerdict::Purge
        } else {
            RunawayVerdict::Report
        }
    }
}
