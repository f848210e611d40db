//! Immutable per-run options.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{RunError, RunResult};
use crate::sql::Dialect;

/// Scratch schema value that selects session-scoped storage.
pub const SESSION_SCOPED_SENTINEL: &str = "#";

/// Where scratch tables live for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Temporary tables on one persistent session; concurrency 1.
    SessionScoped,
    /// Permanent tables in the scratch schema; one session per worker.
    SharedScratch,
}

/// What happens to queued work after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep running the phase's remaining steps, then fail the run.
    #[default]
    Collect,
    /// Cancel the phase's queued steps at the next item boundary.
    FailFast,
}

/// Numeric thresholds bound into heel rule templates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeelThresholds {
    /// Maximum plausible age in years.
    pub age_warning: i64,
    /// Maximum fraction of outpatient visits.
    pub outpatient_visit_perc: f64,
    /// Minimum number of patients with measurements or drug exposure.
    pub minimal_pt_meas_drug_ratio: i64,
}

impl Default for HeelThresholds {
    fn default() -> Self {
        Self {
            age_warning: 125,
            outpatient_visit_perc: 0.43,
            minimal_pt_meas_drug_ratio: 20,
        }
    }
}

/// Options fixed for the duration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub dialect: Dialect,

    pub cdm_schema: String,
    pub results_schema: String,
    pub vocab_schema: String,
    /// Schema for permanent scratch tables, or `#` for session-scoped storage.
    pub scratch_schema: String,

    pub source_name: String,
    pub cdm_version: String,

    /// Explicit analysis subset; `None` runs every eligible analysis.
    pub analysis_ids: Option<Vec<i64>>,
    pub exclude_analysis_ids: Vec<i64>,
    pub include_cost: bool,
    pub default_analyses_only: bool,

    /// Rows whose count is at or below this value are dropped; `None` disables redaction.
    pub small_cell_count: Option<i64>,

    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    /// Attempts at acquiring a worker session before giving up on its queue.
    pub acquire_retries: u32,

    pub analysis_prefix: String,
    pub heel_prefix: String,
    pub drop_scratch_tables: bool,

    /// Drop and recreate the permanent result tables instead of appending.
    pub create_tables: bool,
    /// When appending, delete existing rows of the selected analyses first.
    pub update_given_analyses_only: bool,
    pub create_indices: bool,

    pub run_heel: bool,
    pub thresholds: HeelThresholds,

    /// Write the SQL script instead of executing it.
    pub generate_only: bool,
    pub output_folder: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            cdm_schema: "main".to_string(),
            results_schema: "main".to_string(),
            vocab_schema: "main".to_string(),
            scratch_schema: SESSION_SCOPED_SENTINEL.to_string(),
            source_name: "source".to_string(),
            cdm_version: "5.4".to_string(),
            analysis_ids: None,
            exclude_analysis_ids: Vec::new(),
            include_cost: false,
            default_analyses_only: false,
            small_cell_count: Some(5),
            concurrency: 1,
            failure_policy: FailurePolicy::Collect,
            acquire_retries: 3,
            analysis_prefix: "tmpach".to_string(),
            heel_prefix: "tmpheel".to_string(),
            drop_scratch_tables: true,
            create_tables: true,
            update_given_analyses_only: false,
            create_indices: false,
            run_heel: true,
            thresholds: HeelThresholds::default(),
            generate_only: false,
            output_folder: PathBuf::from("output"),
        }
    }
}

impl RunOptions {
    /// Storage mode implied by the scratch schema and concurrency.
    pub fn storage_mode(&self) -> StorageMode {
        if self.scratch_schema == SESSION_SCOPED_SENTINEL || self.concurrency <= 1 {
            StorageMode::SessionScoped
        } else {
            StorageMode::SharedScratch
        }
    }

    /// Check the options and apply the storage-mode coercions.
    ///
    /// Session-scoped storage forces concurrency 1; generate-only runs are
    /// always sequential. Contradictions are configuration errors.
    pub fn validated(mut self) -> RunResult<Self> {
        for (label, prefix) in [
            ("analysis prefix", &self.analysis_prefix),
            ("heel prefix", &self.heel_prefix),
        ] {
            if !is_valid_prefix(prefix) {
                return Err(RunError::Configuration(format!(
                    "{} '{}' must start with a letter and contain only letters and digits",
                    label, prefix
                )));
            }
        }

        if !is_supported_cdm_version(&self.cdm_version) {
            return Err(RunError::Configuration(format!(
                "unsupported CDM version '{}' (expected 5.x)",
                self.cdm_version
            )));
        }

        for (label, schema) in [
            ("cdm", &self.cdm_schema),
            ("results", &self.results_schema),
            ("vocabulary", &self.vocab_schema),
            ("scratch", &self.scratch_schema),
        ] {
            if schema.trim().is_empty() {
                return Err(RunError::Configuration(format!("{} schema is empty", label)));
            }
        }

        if let Some(n) = self.small_cell_count {
            if n < 0 {
                return Err(RunError::Configuration(format!(
                    "small cell count must not be negative (got {})",
                    n
                )));
            }
        }

        if self.update_given_analyses_only && self.create_tables {
            return Err(RunError::Configuration(
                "update_given_analyses_only appends to existing tables and cannot be combined with create_tables"
                    .to_string(),
            ));
        }

        if self.concurrency == 0 {
            self.concurrency = 1;
        }

        if self.generate_only && self.concurrency > 1 {
            warn!(
                requested = self.concurrency,
                "generate-only runs are sequential; using concurrency 1"
            );
            self.concurrency = 1;
        }

        if self.scratch_schema == SESSION_SCOPED_SENTINEL && self.concurrency > 1 {
            warn!(
                requested = self.concurrency,
                "session-scoped scratch storage requires a single session; using concurrency 1"
            );
            self.concurrency = 1;
        }

        if self.storage_mode() == StorageMode::SessionScoped {
            self.scratch_schema = SESSION_SCOPED_SENTINEL.to_string();
        }

        if self.acquire_retries == 0 {
            self.acquire_retries = 1;
        }

        Ok(self)
    }
}

/// Scratch prefixes must keep generated names unambiguous.
pub fn is_valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn is_supported_cdm_version(version: &str) -> bool {
    let mut parts = version.trim().split('.');
    parts.next() == Some("5")
        && parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
