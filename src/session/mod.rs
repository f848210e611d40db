//! Execution sessions.
//!
//! The orchestration core talks to the database through two traits:
//!
//! - [`SessionFactory`] hands out sessions (`acquire`) and takes them back
//!   (`release`). In session-scoped mode the run acquires exactly one session
//!   and threads it through every step; in shared-scratch mode every worker
//!   acquires its own.
//! - [`Session`] executes statements and runs queries on one connection.
//!
//! Backends:
//!
//! - [`sqlite`] - in-process SQLite through rusqlite
//! - [`worker`] - the NDJSON database worker process (SQL Server, DuckDB, Postgres)
//! - [`script`] - records statements instead of executing them (generate-only)

pub mod script;
pub mod sqlite;
pub mod worker;

use async_trait::async_trait;
use thiserror::Error;

use crate::sql::Dialect;

pub use script::ScriptSessionFactory;
pub use sqlite::{SqliteSessionFactory, SqliteTarget};
pub use worker::WorkerSessionFactory;

/// A single result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view; floats with no fractional part and numeric text convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One result row.
pub type Row = Vec<Value>;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by sessions and factories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A session could not be opened.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The connection broke while in use; session-scoped state is gone.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The engine rejected or failed a statement.
    #[error("{message}")]
    Execution { message: String },
}

impl SessionError {
    pub fn execution(message: impl Into<String>) -> Self {
        SessionError::Execution {
            message: message.into(),
        }
    }

    /// True when the session can no longer be used.
    pub fn is_connection(&self) -> bool {
        matches!(self, SessionError::Connect(_) | SessionError::ConnectionLost(_))
    }
}

/// One database connection.
#[async_trait]
pub trait Session: Send {
    /// Execute a single statement, discarding any rows.
    async fn execute(&mut self, sql: &str) -> SessionResult<()>;

    /// Run a query and return all rows.
    async fn query(&mut self, sql: &str) -> SessionResult<Vec<Row>>;

    /// Whether `table` (as the engine names it) exists and is visible to this session.
    async fn table_exists(&mut self, table: &str) -> SessionResult<bool> {
        match self.query(&format!("SELECT 1 FROM {} WHERE 1 = 0", table)).await {
            Ok(_) => Ok(true),
            Err(SessionError::Execution { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// False when statements are only recorded, never run.
    fn executes(&self) -> bool {
        true
    }

    /// Close the connection. Session-scoped tables disappear with it.
    async fn close(self: Box<Self>) -> SessionResult<()> {
        Ok(())
    }
}

/// Hands out sessions against one database.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Dialect the sessions speak.
    fn dialect(&self) -> Dialect;

    /// Whether temporary tables survive between statements on one session.
    fn supports_session_scope(&self) -> bool {
        true
    }

    async fn acquire(&self) -> SessionResult<Box<dyn Session>>;

    async fn release(&self, session: Box<dyn Session>) -> SessionResult<()> {
        session.close().await
    }
}
