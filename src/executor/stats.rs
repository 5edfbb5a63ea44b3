use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::JobError;

/// Terminal state of one job in one run.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed,
    Failed(JobError),
    SkippedAlreadyDone,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed(_) => "failed",
            Outcome::SkippedAlreadyDone => "skipped",
        }
    }
}

/// Produced exactly once per job per run.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub ordinal: usize,
    pub outcome: Outcome,
    pub elapsed: Duration,
    pub size_bytes: u64,
}

impl JobResult {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Run-wide counters. Only the executor mutates them, under its lock;
/// everyone else sees copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total_jobs: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Sum of sizes of completed jobs. Skipped jobs moved nothing this run.
    pub bytes_transferred: u64,
}

impl RunStats {
    pub fn new(total_jobs: usize) -> Self {
        Self { total_jobs, ..Self::default() }
    }

    pub(crate) fn record(&mut self, result: &JobResult) {
        match result.outcome {
            Outcome::Completed => {
                self.completed += 1;
                self.bytes_transferred += result.size_bytes;
            }
            Outcome::Failed(_) => self.failed += 1,
            Outcome::SkippedAlreadyDone => self.skipped += 1,
        }
        debug_assert!(self.terminal() <= self.total_jobs);
    }

    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// Every job either finished now or was already done.
    pub fn all_succeeded(&self) -> bool {
        self.completed + self.skipped == self.total_jobs
    }
}

/// A job currently in `Running`.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub ordinal: usize,
    pub display_path: String,
    pub tier_label: String,
    pub size_bytes: u64,
    pub started: Instant,
}
