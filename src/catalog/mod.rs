//! Analysis and rule catalogs.
//!
//! A catalog directory looks like:
//!
//! ```text
//! catalog/
//! ├── analyses.toml          [[analysis]] entries
//! ├── rules.toml             [[rule]] entries (optional)
//! ├── result_fields.toml     [[field]] overrides (optional)
//! └── templates/
//!     ├── analyses/<template>.sql
//!     └── heels/<template>.sql
//! ```
//!
//! Catalogs are pure data: entries are validated once at load time and
//! never mutated afterwards.

mod analysis;
mod rule;
mod schema;

pub use analysis::{AnalysisDefinition, Distribution};
pub use rule::{HeelRuleDefinition, RuleCategory, RuleKind, Severity};
pub use schema::{Field, FieldSchemas, ResultShape};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised while loading a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: i64 },

    #[error("template '{name}' not found")]
    TemplateNotFound { name: String },

    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// Where template text comes from.
#[derive(Debug, Clone)]
enum TemplateSource {
    Directory(PathBuf),
    /// Keyed by `analyses/<template>` or `heels/<template>`.
    Inline(HashMap<String, String>),
}

#[derive(Deserialize)]
struct AnalysisFile {
    #[serde(default)]
    analysis: Vec<AnalysisDefinition>,
}

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<HeelRuleDefinition>,
}

#[derive(Deserialize)]
struct FieldFile {
    #[serde(default)]
    field: Vec<FieldEntry>,
}

#[derive(Deserialize)]
struct FieldEntry {
    table: String,
    #[serde(flatten)]
    field: Field,
}

/// Analyses, rules, field schemas and their templates.
#[derive(Debug, Clone)]
pub struct Catalog {
    analyses: Vec<AnalysisDefinition>,
    rules: Vec<HeelRuleDefinition>,
    fields: FieldSchemas,
    templates: TemplateSource,
}

impl Catalog {
    /// Load a catalog directory.
    pub fn load<P: AsRef<Path>>(dir: P) -> CatalogResult<Self> {
        let dir = dir.as_ref();

        let analyses: AnalysisFile = read_toml(&dir.join("analyses.toml"))?;

        let rules_path = dir.join("rules.toml");
        let rules: RuleFile = if rules_path.exists() {
            read_toml(&rules_path)?
        } else {
            RuleFile { rule: Vec::new() }
        };

        let mut fields = FieldSchemas::default();
        let fields_path = dir.join("result_fields.toml");
        if fields_path.exists() {
            let file: FieldFile = read_toml(&fields_path)?;
            apply_field_overrides(&mut fields, file.field)?;
        }

        Self::build(
            analyses.analysis,
            rules.rule,
            fields,
            TemplateSource::Directory(dir.join("templates")),
        )
    }

    /// Build a catalog with inline templates.
    ///
    /// `templates` is keyed by `analyses/<template>` and `heels/<template>`.
    pub fn from_parts(
        analyses: Vec<AnalysisDefinition>,
        rules: Vec<HeelRuleDefinition>,
        templates: HashMap<String, String>,
    ) -> CatalogResult<Self> {
        Self::build(
            analyses,
            rules,
            FieldSchemas::default(),
            TemplateSource::Inline(templates),
        )
    }

    fn build(
        mut analyses: Vec<AnalysisDefinition>,
        mut rules: Vec<HeelRuleDefinition>,
        fields: FieldSchemas,
        templates: TemplateSource,
    ) -> CatalogResult<Self> {
        analyses.sort_by_key(|a| a.id);
        rules.sort_by_key(|r| r.id);

        for pair in analyses.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(CatalogError::DuplicateId {
                    kind: "analysis",
                    id: pair[0].id,
                });
            }
        }
        for pair in rules.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(CatalogError::DuplicateId {
                    kind: "rule",
                    id: pair[0].id,
                });
            }
        }

        if let Some(a) = analyses.iter().find(|a| a.strata.len() > 5) {
            return Err(CatalogError::Invalid(format!(
                "analysis {} declares {} strata (at most 5)",
                a.id,
                a.strata.len()
            )));
        }

        let dependent: HashSet<i64> = rules
            .iter()
            .filter(|r| r.kind == RuleKind::Dependent)
            .map(|r| r.id)
            .collect();
        for rule in &rules {
            if !rule.depends_on.is_empty() && rule.kind != RuleKind::Dependent {
                return Err(CatalogError::Invalid(format!(
                    "rule {} is {} but declares depends_on",
                    rule.id, rule.kind
                )));
            }
            if let Some(missing) = rule.depends_on.iter().find(|d| !dependent.contains(d)) {
                return Err(CatalogError::Invalid(format!(
                    "rule {} depends on {}, which is not a dependent rule",
                    rule.id, missing
                )));
            }
        }

        Ok(Self {
            analyses,
            rules,
            fields,
            templates,
        })
    }

    /// All analyses, ascending by id.
    pub fn analyses(&self) -> &[AnalysisDefinition] {
        &self.analyses
    }

    /// All rules, ascending by id.
    pub fn rules(&self) -> &[HeelRuleDefinition] {
        &self.rules
    }

    pub fn analysis(&self, id: i64) -> Option<&AnalysisDefinition> {
        self.analyses
            .binary_search_by_key(&id, |a| a.id)
            .ok()
            .map(|i| &self.analyses[i])
    }

    pub fn rule(&self, id: i64) -> Option<&HeelRuleDefinition> {
        self.rules
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.rules[i])
    }

    pub fn fields(&self) -> &FieldSchemas {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldSchemas {
        &mut self.fields
    }

    /// Template text of an analysis.
    pub fn analysis_template(&self, analysis: &AnalysisDefinition) -> CatalogResult<String> {
        self.template("analyses", &analysis.template)
    }

    /// Template text of a rule.
    pub fn rule_template(&self, rule: &HeelRuleDefinition) -> CatalogResult<String> {
        self.template("heels", &rule.template)
    }

    fn template(&self, folder: &str, name: &str) -> CatalogResult<String> {
        let key = format!("{}/{}", folder, name);
        match &self.templates {
            TemplateSource::Inline(map) => map
                .get(&key)
                .cloned()
                .ok_or(CatalogError::TemplateNotFound { name: key }),
            TemplateSource::Directory(root) => {
                let path = root.join(folder).join(format!("{}.sql", name));
                if !path.exists() {
                    return Err(CatalogError::TemplateNotFound { name: key });
                }
                fs::read_to_string(&path).map_err(|source| CatalogError::Read { path, source })
            }
        }
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> CatalogResult<T> {
    let content = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_field_overrides(fields: &mut FieldSchemas, entries: Vec<FieldEntry>) -> CatalogResult<()> {
    let mut grouped: Vec<(ResultShape, Vec<Field>)> = Vec::new();
    for entry in entries {
        let shape = ResultShape::from_table_name(&entry.table).ok_or_else(|| {
            CatalogError::Invalid(format!("unknown result table '{}'", entry.table))
        })?;
        match grouped.iter_mut().find(|(s, _)| *s == shape) {
            Some((_, list)) => list.push(entry.field),
            None => grouped.push((shape, vec![entry.field])),
        }
    }
    for (shape, list) in grouped {
        if !list.iter().any(|f| f.name == "analysis_id") {
            return Err(CatalogError::Invalid(format!(
                "field list for {} lacks analysis_id",
                shape
            )));
        }
        fields.set_fields(shape, list);
    }
    Ok(())
}
