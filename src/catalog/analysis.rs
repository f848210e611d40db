//! Analysis catalog entries.

use serde::{Deserialize, Serialize};

/// Which result shape(s) an analysis feeds.
///
/// Stored as `0 | 1 | 2` in catalog files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Distribution {
    /// Plain results only.
    #[default]
    None,
    /// Distributional results only.
    Distributional,
    /// Both plain and distributional results.
    Both,
}

impl Distribution {
    /// Whether the analysis writes rows for `achilles_results`.
    pub fn feeds_plain(&self) -> bool {
        matches!(self, Distribution::None | Distribution::Both)
    }

    /// Whether the analysis writes rows for `achilles_results_dist`.
    pub fn feeds_distribution(&self) -> bool {
        matches!(self, Distribution::Distributional | Distribution::Both)
    }
}

impl TryFrom<u8> for Distribution {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Distribution::None),
            1 => Ok(Distribution::Distributional),
            2 => Ok(Distribution::Both),
            other => Err(format!("distribution must be 0, 1 or 2 (got {})", other)),
        }
    }
}

impl From<Distribution> for u8 {
    fn from(value: Distribution) -> Self {
        match value {
            Distribution::None => 0,
            Distribution::Distributional => 1,
            Distribution::Both => 2,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One numbered analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDefinition {
    pub id: i64,
    pub name: String,

    /// Names of stratum 1..5, in order. Shorter lists leave the rest unnamed.
    #[serde(default)]
    pub strata: Vec<String>,

    #[serde(default)]
    pub distribution: Distribution,

    /// Cost analyses are skipped unless explicitly included.
    #[serde(default)]
    pub cost: bool,

    /// Part of the default analysis set.
    #[serde(default = "default_true")]
    pub is_default: bool,

    #[serde(default)]
    pub category: Option<String>,

    /// Template file stem under `templates/analyses/`.
    pub template: String,
}

impl AnalysisDefinition {
    /// Name of stratum `n` (1-based), if declared.
    pub fn stratum_name(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.strata.get(i))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}
