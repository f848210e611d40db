//! Run-level error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::session::SessionError;
use crate::sql::TemplateError;

/// Identity of a unit of work within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepId {
    Analysis(i64),
    Rule(i64),
    /// Merge into the named permanent table.
    Merge(String),
    /// Opening the persistent session or other run-wide setup.
    Setup,
    Cleanup,
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepId::Analysis(id) => write!(f, "analysis {}", id),
            StepId::Rule(id) => write!(f, "rule {}", id),
            StepId::Merge(table) => write!(f, "merge into {}", table),
            StepId::Setup => write!(f, "setup"),
            StepId::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Result type for run operations.
pub type RunResult<T> = Result<T, RunError>;

/// Structured failure of a run or one of its steps.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    /// Invalid or contradictory options; raised before any database work.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A template could not be loaded or rendered; the step was not executed.
    #[error("template error in {step}: {source}")]
    Template {
        step: StepId,
        #[source]
        source: TemplateError,
    },

    /// The database rejected a statement.
    #[error("execution error in {step}: {message}")]
    Execution { step: StepId, message: String },

    /// A merge member has no scratch table.
    #[error("merge into {table} failed: scratch table {scratch} for {member} is missing")]
    MergeIntegrity {
        table: String,
        member: StepId,
        scratch: String,
    },

    /// The session could not be acquired or was lost.
    #[error("connection error in {step}: {message}")]
    Connection { step: StepId, message: String },

    /// The step was not started because the run was cancelled.
    #[error("{step} cancelled")]
    Cancelled { step: StepId },
}

impl RunError {
    /// The step this error is attributed to.
    pub fn step(&self) -> Option<&StepId> {
        match self {
            RunError::Configuration(_) => None,
            RunError::Template { step, .. }
            | RunError::Execution { step, .. }
            | RunError::Connection { step, .. }
            | RunError::Cancelled { step } => Some(step),
            RunError::MergeIntegrity { member, .. } => Some(member),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, RunError::Connection { .. })
    }

    /// Attribute a session failure to `step`.
    pub fn from_session(step: &StepId, e: SessionError) -> Self {
        match e {
            SessionError::Connect(message) | SessionError::ConnectionLost(message) => {
                RunError::Connection {
                    step: step.clone(),
                    message,
                }
            }
            SessionError::Execution { message } => RunError::Execution {
                step: step.clone(),
                message,
            },
        }
    }
}
