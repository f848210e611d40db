//! # Achilles
//!
//! Descriptive statistics and data-quality checks over an OMOP CDM database.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Catalog (analyses, heel rules, templates)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [sql: render + translate]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Analyses → scratch tables (one per analysis / shape)   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [merge: union, cast, redact]
//! ┌─────────────────────────────────────────────────────────┐
//! │     achilles_results / achilles_results_dist             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [heel: phase A, merge, phase B]
//! ┌─────────────────────────────────────────────────────────┐
//! │  achilles_results_derived / achilles_heel_results        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`run::Orchestrator`] drives the phases through a [`session::SessionFactory`]
//! (in-process SQLite, the external database worker, or a script recorder).

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod heel;
pub mod merge;
pub mod run;
pub mod session;
pub mod sql;
pub mod worker;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::catalog::{AnalysisDefinition, Catalog, HeelRuleDefinition, ResultShape};
    pub use crate::config::Settings;
    pub use crate::run::{
        FailurePolicy, Orchestrator, RunError, RunOptions, RunReport, RunStatus, StepId,
        StorageMode,
    };
    pub use crate::session::{Session, SessionFactory};
    pub use crate::sql::{Dialect, SqlDialect};
}

pub use sql::Dialect;
