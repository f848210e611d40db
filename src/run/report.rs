//! Final outcome of a run.

use std::fmt;

use uuid::Uuid;

use super::error::{RunError, StepId};
use super::orchestrator::RunState;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Done => write!(f, "done"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What one merge wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub table: String,
    /// Number of scratch tables unioned.
    pub members: usize,
    /// Rows in the target after the merge, when the engine reports it.
    pub rows: Option<u64>,
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// States entered, in order, ending with `Done` or `Failed`.
    pub transitions: Vec<RunState>,
    pub failures: Vec<RunError>,
    /// Steps not started because the run was cancelled.
    pub skipped: Vec<StepId>,
    pub merges: Vec<MergeSummary>,
    /// Best-effort cleanup problems; never change the status.
    pub cleanup_warnings: Vec<String>,
}

impl RunReport {
    pub(crate) fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Done,
            transitions: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            merges: Vec::new(),
            cleanup_warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Done
    }

    /// Steps that failed, in the order they were reported.
    pub fn failed_steps(&self) -> Vec<&StepId> {
        self.failures.iter().filter_map(RunError::step).collect()
    }

    /// Merge summary of `table`, if it was merged.
    pub fn merge(&self, table: &str) -> Option<&MergeSummary> {
        self.merges.iter().find(|m| m.table == table)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}: {}", self.run_id, self.status)?;
        for merge in &self.merges {
            match merge.rows {
                Some(rows) => writeln!(
                    f,
                    "  {}: {} members, {} rows",
                    merge.table, merge.members, rows
                )?,
                None => writeln!(f, "  {}: {} members", merge.table, merge.members)?,
            }
        }
        for failure in &self.failures {
            writeln!(f, "  failed: {}", failure)?;
        }
        if !self.skipped.is_empty() {
            writeln!(f, "  skipped: {} steps", self.skipped.len())?;
        }
        for warning in &self.cleanup_warnings {
            writeln!(f, "  cleanup warning: {}", warning)?;
        }
        Ok(())
    }
}
