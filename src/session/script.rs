//! Generate-only backend.
//!
//! Sessions record every statement in execution order instead of running it.
//! Queries return no rows and existence probes succeed, so a run proceeds
//! through every phase and leaves a complete script behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Row, Session, SessionError, SessionFactory, SessionResult};
use crate::sql::Dialect;

/// File name of the script inside the output folder.
pub const SCRIPT_FILE_NAME: &str = "achilles.sql";

/// Collects the statements of a run into one script.
#[derive(Debug, Clone)]
pub struct ScriptSessionFactory {
    dialect: Dialect,
    statements: Arc<Mutex<Vec<String>>>,
}

impl ScriptSessionFactory {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            statements: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Statements recorded so far.
    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// The recorded statements as one script, each terminated by `;`.
    pub fn script(&self) -> String {
        let mut out = String::new();
        for stmt in self.statements() {
            out.push_str(stmt.trim_end_matches(';'));
            out.push_str(";\n");
        }
        out
    }

    /// Write the script to `<folder>/achilles.sql`, creating the folder.
    pub fn write_to(&self, folder: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(folder)?;
        let path = folder.join(SCRIPT_FILE_NAME);
        fs::write(&path, self.script())?;
        Ok(path)
    }
}

#[async_trait]
impl SessionFactory for ScriptSessionFactory {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn acquire(&self) -> SessionResult<Box<dyn Session>> {
        Ok(Box::new(ScriptSession {
            statements: Arc::clone(&self.statements),
        }))
    }
}

struct ScriptSession {
    statements: Arc<Mutex<Vec<String>>>,
}

impl ScriptSession {
    fn record(&self, sql: &str) -> SessionResult<()> {
        self.statements
            .lock()
            .map_err(|_| SessionError::ConnectionLost("script buffer poisoned".into()))?
            .push(sql.trim().to_string());
        Ok(())
    }
}

#[async_trait]
impl Session for ScriptSession {
    async fn execute(&mut self, sql: &str) -> SessionResult<()> {
        self.record(sql)
    }

    async fn query(&mut self, sql: &str) -> SessionResult<Vec<Row>> {
        self.record(sql)?;
        Ok(Vec::new())
    }

    async fn table_exists(&mut self, _table: &str) -> SessionResult<bool> {
        Ok(true)
    }

    fn executes(&self) -> bool {
        false
    }
}
