//! Database connection configuration.
//!
//! Supports configuration via environment variables:
//! - `ACHILLES_DB_DRIVER`: Database driver (sqlite, mssql, duckdb, postgres)
//! - `ACHILLES_DB_CONNECTION`: Connection string or SQLite file path
//! - `ACHILLES_DB_DIALECT`: Dialect override (optional)

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sql::Dialect;

/// Error type for connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unsupported driver: {0}. Supported: sqlite, mssql, duckdb, postgres")]
    UnsupportedDriver(String),

    #[error("Unknown dialect: {0}")]
    UnknownDialect(String),
}

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// SQLite, linked in-process
    Sqlite,
    /// Microsoft SQL Server, through the worker
    MsSql,
    /// DuckDB, through the worker
    DuckDb,
    /// PostgreSQL, through the worker
    Postgres,
}

impl Driver {
    /// Parse driver from string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConnectionError> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "mssql" | "sqlserver" | "sql_server" => Ok(Driver::MsSql),
            "duckdb" | "duck" => Ok(Driver::DuckDb),
            "postgres" | "postgresql" | "pg" => Ok(Driver::Postgres),
            other => Err(ConnectionError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Get the driver name for the worker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite",
            Driver::MsSql => "mssql",
            Driver::DuckDb => "duckdb",
            Driver::Postgres => "postgres",
        }
    }

    /// Dialect templates are translated to when no override is given.
    pub fn default_dialect(&self) -> Dialect {
        match self {
            Driver::Sqlite => Dialect::Sqlite,
            Driver::MsSql => Dialect::TSql,
            Driver::DuckDb => Dialect::DuckDb,
            Driver::Postgres => Dialect::Postgres,
        }
    }

    /// Whether statements go through the external worker process.
    pub fn is_worker(&self) -> bool {
        !matches!(self, Driver::Sqlite)
    }
}

/// Resolved database connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub driver: Driver,
    /// Connection string; a file path or `:memory:` for SQLite.
    pub connection_string: String,
    pub dialect: Dialect,
    /// SQLite databases attached under a schema alias.
    pub attach: Vec<(String, PathBuf)>,
    /// Worker binary, when not found in the usual places.
    pub worker_path: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Connection to a SQLite file or `:memory:`.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: Driver::Sqlite,
            connection_string: path.into(),
            dialect: Dialect::Sqlite,
            attach: Vec::new(),
            worker_path: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `ACHILLES_DB_DRIVER`
    /// - `ACHILLES_DB_CONNECTION`
    ///
    /// Optional:
    /// - `ACHILLES_DB_DIALECT`
    pub fn from_env() -> Result<Self, ConnectionError> {
        let driver_str = env::var("ACHILLES_DB_DRIVER")
            .map_err(|_| ConnectionError::MissingEnvVar("ACHILLES_DB_DRIVER".to_string()))?;
        let driver = Driver::from_str(&driver_str)?;

        let connection_string = env::var("ACHILLES_DB_CONNECTION")
            .map_err(|_| ConnectionError::MissingEnvVar("ACHILLES_DB_CONNECTION".to_string()))?;

        let dialect = match env::var("ACHILLES_DB_DIALECT") {
            Ok(name) => Dialect::parse(&name).ok_or(ConnectionError::UnknownDialect(name))?,
            Err(_) => driver.default_dialect(),
        };

        Ok(Self {
            driver,
            connection_string,
            dialect,
            attach: Vec::new(),
            worker_path: None,
        })
    }

    /// Get the driver name for the worker.
    pub fn driver_name(&self) -> &'static str {
        self.driver.as_str()
    }
}
