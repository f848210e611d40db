//! Database worker process client.
//!
//! Engines without an in-process driver (SQL Server, DuckDB, Postgres) are
//! reached through a long-running worker process. The worker owns the
//! database drivers; this side only speaks the NDJSON protocol.
//!
//! ```text
//!   achilles ──stdin (NDJSON)──▶ worker ──driver──▶ database
//!            ◀─stdout (NDJSON)──
//! ```
//!
//! Every request carries a unique ID so that several workers of the run can
//! share one process and have their responses routed back correctly.
//!
//! ```ignore
//! let client = WorkerClient::spawn("./achilles-worker").await?;
//! let result = client
//!     .execute_query("mssql", "sqlserver://...", "SELECT COUNT(*) FROM cdm.person")
//!     .await?;
//! ```

mod client;
mod error;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
