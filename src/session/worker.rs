//! Sessions over the database worker process.
//!
//! The worker opens its own connections per request, so temporary tables do
//! not survive between statements. This backend therefore only supports
//! shared-scratch storage.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Row, Session, SessionError, SessionFactory, SessionResult, Value};
use crate::sql::Dialect;
use crate::worker::{WorkerClient, WorkerError};

/// Hands out sessions that share one worker process.
pub struct WorkerSessionFactory {
    client: Arc<WorkerClient>,
    driver: String,
    connection_string: String,
    dialect: Dialect,
}

impl WorkerSessionFactory {
    pub fn new(
        client: Arc<WorkerClient>,
        driver: impl Into<String>,
        connection_string: impl Into<String>,
        dialect: Dialect,
    ) -> Self {
        Self {
            client,
            driver: driver.into(),
            connection_string: connection_string.into(),
            dialect,
        }
    }
}

#[async_trait]
impl SessionFactory for WorkerSessionFactory {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn supports_session_scope(&self) -> bool {
        false
    }

    async fn acquire(&self) -> SessionResult<Box<dyn Session>> {
        if !self.client.is_alive() {
            return Err(SessionError::Connect("worker process is not running".into()));
        }
        Ok(Box::new(WorkerSession {
            client: Arc::clone(&self.client),
            driver: self.driver.clone(),
            connection_string: self.connection_string.clone(),
        }))
    }
}

struct WorkerSession {
    client: Arc<WorkerClient>,
    driver: String,
    connection_string: String,
}

#[async_trait]
impl Session for WorkerSession {
    async fn execute(&mut self, sql: &str) -> SessionResult<()> {
        self.client
            .execute_query(&self.driver, &self.connection_string, sql)
            .await
            .map(|_| ())
            .map_err(classify_error)
    }

    async fn query(&mut self, sql: &str) -> SessionResult<Vec<Row>> {
        let response = self
            .client
            .execute_query(&self.driver, &self.connection_string, sql)
            .await
            .map_err(classify_error)?;
        Ok(response
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(json_to_value).collect())
            .collect())
    }
}

fn classify_error(e: WorkerError) -> SessionError {
    match e {
        WorkerError::ConnectionFailed(msg) => SessionError::Connect(msg),
        e if e.is_connection() => SessionError::ConnectionLost(e.to_string()),
        e => SessionError::execution(e.to_string()),
    }
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Int(i64::from(b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}
