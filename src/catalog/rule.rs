//! Heel rule catalog entries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a rule participates in the heel pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Emits heel rows from finalized analysis results; runs in the parallel phase.
    Independent,
    /// Emits derived-measure rows; runs in the parallel phase.
    Derived,
    /// Reads the merged derived and heel tables; runs serially afterwards.
    Dependent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Conformance,
    Dq,
}

impl RuleCategory {
    pub fn label(&self) -> &'static str {
        match self {
            RuleCategory::Conformance => "conformance",
            RuleCategory::Dq => "dq",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Notification,
}

impl Severity {
    /// Prefix used in warning texts (`ERROR`, `WARNING`, `NOTIFICATION`).
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notification => "NOTIFICATION",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label().to_lowercase())
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Independent => write!(f, "independent"),
            RuleKind::Derived => write!(f, "derived"),
            RuleKind::Dependent => write!(f, "dependent"),
        }
    }
}

/// One heel rule or derived measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeelRuleDefinition {
    pub id: i64,
    pub name: String,
    pub kind: RuleKind,
    pub category: RuleCategory,
    pub severity: Severity,

    /// Derived measure this rule inspects, if any.
    #[serde(default)]
    pub linked_measure: Option<String>,

    #[serde(default)]
    pub general_population_only: bool,

    /// Other dependent rules that must run first.
    #[serde(default)]
    pub depends_on: Vec<i64>,

    /// Template file stem under `templates/heels/`.
    pub template: String,
}
