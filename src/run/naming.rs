//! Scratch table naming.
//!
//! Every scratch object name is a pure function of (prefix, kind, id). Prefixes
//! are restricted to `[A-Za-z][A-Za-z0-9]*`, so the first `_` always ends the
//! prefix and the disambiguator set below is prefix-free; two different
//! inputs can never produce the same name. A later run with the same prefixes
//! computes the same names, which is what makes pre-drops idempotent.

use super::options::{StorageMode, SESSION_SCOPED_SENTINEL};
use crate::sql::{Dialect, SqlDialect};

/// What a scratch table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScratchKind {
    /// Plain analysis output.
    Analysis,
    /// Distributional analysis output.
    AnalysisDist,
    /// Heel rows of an independent rule.
    IndependentRule,
    /// Rows of a derived measure.
    DerivedRule,
    /// Heel rows of a dependent rule.
    DependentRule,
}

impl ScratchKind {
    pub fn disambiguator(&self) -> &'static str {
        match self {
            ScratchKind::Analysis => "",
            ScratchKind::AnalysisDist => "dist_",
            ScratchKind::IndependentRule => "hr_",
            ScratchKind::DerivedRule => "rd_",
            ScratchKind::DependentRule => "serial_",
        }
    }

    fn is_analysis(&self) -> bool {
        matches!(self, ScratchKind::Analysis | ScratchKind::AnalysisDist)
    }
}

/// Unqualified scratch table name.
///
/// ```ignore
/// assert_eq!(scratch_name("tmpach", ScratchKind::AnalysisDist, 103), "tmpach_dist_103");
/// ```
pub fn scratch_name(prefix: &str, kind: ScratchKind, id: i64) -> String {
    format!("{}_{}{}", prefix, kind.disambiguator(), id)
}

/// Which session may see a scratch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOwner {
    /// Only the run's persistent session.
    Persistent,
    /// Any session against the database.
    Shared,
}

/// A transient storage unit produced by one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchTableHandle {
    /// Human-readable identity (`analysis 3`, `rule 12 (derived)`).
    pub logical_name: String,
    /// Name without schema; session-scoped names carry a leading `#`.
    pub physical_name: String,
    pub schema: Option<String>,
    pub owner: SessionOwner,
}

impl ScratchTableHandle {
    /// Name as written in templates (`#s_tmpach_1` or `scratch.tmpach_1`).
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.physical_name),
            None => self.physical_name.clone(),
        }
    }

    /// Name as the target engine sees it.
    pub fn executable(&self, dialect: Dialect) -> String {
        match self.physical_name.strip_prefix('#') {
            Some(name) => dialect.temp_table_name(name),
            None => self.qualified(),
        }
    }
}

/// Naming scheme for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchNaming {
    mode: StorageMode,
    scratch_schema: String,
    analysis_prefix: String,
    heel_prefix: String,
}

impl ScratchNaming {
    pub fn new(
        mode: StorageMode,
        scratch_schema: impl Into<String>,
        analysis_prefix: impl Into<String>,
        heel_prefix: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            scratch_schema: scratch_schema.into(),
            analysis_prefix: analysis_prefix.into(),
            heel_prefix: heel_prefix.into(),
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Value bound to `@scratchDatabaseSchema`.
    pub fn schema_param(&self) -> &str {
        match self.mode {
            StorageMode::SessionScoped => SESSION_SCOPED_SENTINEL,
            StorageMode::SharedScratch => &self.scratch_schema,
        }
    }

    /// Value bound to `@schemaDelim`.
    ///
    /// `@scratchDatabaseSchema@schemaDelim@tempAchillesPrefix_1` then spells
    /// the same name as [`ScratchNaming::handle`] in both modes.
    pub fn schema_delim(&self) -> &'static str {
        match self.mode {
            StorageMode::SessionScoped => "s_",
            StorageMode::SharedScratch => ".",
        }
    }

    /// Handle of the scratch table for `(kind, id)`.
    pub fn handle(&self, kind: ScratchKind, id: i64) -> ScratchTableHandle {
        let prefix = if kind.is_analysis() {
            &self.analysis_prefix
        } else {
            &self.heel_prefix
        };
        let name = scratch_name(prefix, kind, id);
        let logical_name = match kind {
            ScratchKind::Analysis => format!("analysis {}", id),
            ScratchKind::AnalysisDist => format!("analysis {} (distribution)", id),
            ScratchKind::IndependentRule => format!("rule {}", id),
            ScratchKind::DerivedRule => format!("rule {} (derived)", id),
            ScratchKind::DependentRule => format!("rule {} (dependent)", id),
        };

        match self.mode {
            StorageMode::SessionScoped => ScratchTableHandle {
                logical_name,
                physical_name: format!("#s_{}", name),
                schema: None,
                owner: SessionOwner::Persistent,
            },
            StorageMode::SharedScratch => ScratchTableHandle {
                logical_name,
                physical_name: name,
                schema: Some(self.scratch_schema.clone()),
                owner: SessionOwner::Shared,
            },
        }
    }
}
