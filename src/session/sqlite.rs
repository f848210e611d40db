//! SQLite backend.
//!
//! Schemas map onto SQLite databases: `main`, `temp`, and any databases
//! listed as attachments (`ATTACH DATABASE ... AS <alias>`). Blocking
//! rusqlite calls run on tokio's blocking pool.
//!
//! File targets use WAL journaling and a busy timeout so that several worker
//! sessions can take turns writing. The in-memory target is a shared-cache
//! database kept alive by the factory, so every session sees the same data.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use super::{Row, Session, SessionError, SessionFactory, SessionResult, Value};
use crate::sql::Dialect;

/// Default time a writer waits for the database lock.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Database to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

impl SqliteTarget {
    /// Parse a connection string: `:memory:` or a file path.
    pub fn parse(connection_string: &str) -> Self {
        match connection_string.trim() {
            "" | ":memory:" => SqliteTarget::Memory,
            path => SqliteTarget::File(PathBuf::from(path)),
        }
    }
}

/// Opens SQLite sessions against one target.
pub struct SqliteSessionFactory {
    target: SqliteTarget,
    attachments: Vec<(String, PathBuf)>,
    busy_timeout: Duration,
    memory_uri: String,
    /// Holds the shared in-memory database open between sessions.
    _keeper: Option<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionFactory")
            .field("target", &self.target)
            .field("attachments", &self.attachments)
            .finish()
    }
}

impl SqliteSessionFactory {
    /// Factory for a database file, created if missing.
    pub fn file(path: impl Into<PathBuf>) -> SessionResult<Self> {
        Self::open(SqliteTarget::File(path.into()), Vec::new())
    }

    /// Factory for a private in-memory database.
    pub fn memory() -> SessionResult<Self> {
        Self::open(SqliteTarget::Memory, Vec::new())
    }

    /// Factory with attached databases (`alias -> file`).
    pub fn open(target: SqliteTarget, attachments: Vec<(String, PathBuf)>) -> SessionResult<Self> {
        let memory_uri = format!(
            "file:achilles-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let mut factory = Self {
            target,
            attachments,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            memory_uri,
            _keeper: None,
        };
        if factory.target == SqliteTarget::Memory {
            factory._keeper = Some(Mutex::new(factory.connect()?));
        }
        Ok(factory)
    }

    /// Override the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect(&self) -> SessionResult<Connection> {
        let conn = match &self.target {
            SqliteTarget::Memory => Connection::open_with_flags(
                &self.memory_uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            ),
            SqliteTarget::File(path) => Connection::open(path),
        }
        .map_err(|e| SessionError::Connect(e.to_string()))?;

        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        if let SqliteTarget::File(_) = self.target {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(|e| SessionError::Connect(e.to_string()))?;
            debug!(journal_mode = %mode, "opened sqlite file");
        }

        for (alias, path) in &self.attachments {
            let path = path.to_string_lossy().into_owned();
            conn.execute(&format!("ATTACH DATABASE ?1 AS \"{}\"", alias), [path.as_str()])
                .map_err(|e| SessionError::Connect(format!("attach {}: {}", alias, e)))?;
        }

        Ok(conn)
    }
}

#[async_trait]
impl SessionFactory for SqliteSessionFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn acquire(&self) -> SessionResult<Box<dyn Session>> {
        let conn = self.connect()?;
        Ok(Box::new(SqliteSession {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

/// One SQLite connection.
pub struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSession {
    async fn run<F, T>(&self, f: F) -> SessionResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| SessionError::ConnectionLost("sqlite connection poisoned".into()))?;
            f(&guard).map_err(classify_error)
        })
        .await
        .map_err(|e| SessionError::ConnectionLost(e.to_string()))?
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn execute(&mut self, sql: &str) -> SessionResult<()> {
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql)).await
    }

    async fn query(&mut self, sql: &str) -> SessionResult<Vec<Row>> {
        let sql = sql.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns = stmt.column_count();
            let rows = stmt.query_map([], |row| {
                (0..columns)
                    .map(|i| row.get_ref(i).map(to_value))
                    .collect::<rusqlite::Result<Row>>()
            })?;
            rows.collect()
        })
        .await
    }
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(x) => Value::Float(x),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn classify_error(err: rusqlite::Error) -> SessionError {
    use rusqlite::ErrorCode;

    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure
            ) =>
        {
            SessionError::ConnectionLost(err.to_string())
        }
        _ => SessionError::execution(err.to_string()),
    }
}
