//! TOML-based configuration for Achilles.
//!
//! Supports a config file (achilles.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [connection]
//! driver = "mssql"
//! connection_string = "${CDM_DB_CONNECTION_STRING}"
//!
//! [schemas]
//! cdm = "cdm"
//! results = "results"
//! scratch = "scratch"
//!
//! [run]
//! source_name = "Synthetic CDM"
//! concurrency = 4
//! failure_policy = "collect"
//!
//! [redaction]
//! small_cell_count = 5
//!
//! [heel]
//! age_warning = 125
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::connection::{ConnectionConfig, Driver};
use crate::run::{FailurePolicy, HeelThresholds, RunError, RunOptions, RunResult};
use crate::sql::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub schemas: SchemaSettings,
    pub run: RunSettings,
    pub redaction: RedactionSettings,
    pub prefixes: PrefixSettings,
    pub heel: HeelThresholds,
    pub catalog: CatalogSettings,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Database driver (sqlite, mssql, duckdb, postgres).
    pub driver: String,

    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    /// Dialect override; defaults to the driver's dialect.
    pub dialect: Option<String>,

    /// Path to the worker binary.
    pub worker_path: Option<String>,

    /// SQLite databases to attach, keyed by schema alias.
    pub attach: BTreeMap<String, String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            connection_string: ":memory:".to_string(),
            dialect: None,
            worker_path: None,
            attach: BTreeMap::new(),
        }
    }
}

impl ConnectionSettings {
    /// Get the driver type.
    pub fn driver_type(&self) -> Result<Driver, SettingsError> {
        Driver::from_str(&self.driver)
            .map_err(|_| SettingsError::UnsupportedDriver(self.driver.clone()))
    }

    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }

    /// Dialect templates are translated to.
    pub fn resolved_dialect(&self) -> Result<Dialect, SettingsError> {
        match &self.dialect {
            Some(name) => Dialect::parse(name)
                .ok_or_else(|| SettingsError::InvalidConfig(format!("unknown dialect '{}'", name))),
            None => Ok(self.driver_type()?.default_dialect()),
        }
    }

    /// Resolve into a connection ready for a session factory.
    pub fn resolve(&self) -> Result<ConnectionConfig, SettingsError> {
        let driver = self.driver_type()?;
        let attach = self
            .attach
            .iter()
            .map(|(alias, path)| Ok((alias.clone(), PathBuf::from(expand_env_vars(path)?))))
            .collect::<Result<Vec<_>, SettingsError>>()?;
        if !attach.is_empty() && driver != Driver::Sqlite {
            return Err(SettingsError::InvalidConfig(
                "attach is only supported by the sqlite driver".to_string(),
            ));
        }
        let worker_path = self
            .worker_path
            .as_deref()
            .map(expand_env_vars)
            .transpose()?
            .map(PathBuf::from);

        Ok(ConnectionConfig {
            driver,
            connection_string: self.resolved_connection_string()?,
            dialect: self.resolved_dialect()?,
            attach,
            worker_path,
        })
    }
}

/// Schema placement.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaSettings {
    pub cdm: String,
    pub results: String,
    /// Defaults to the results schema.
    pub vocab: Option<String>,
    /// `#` keeps scratch tables on one session.
    pub scratch: String,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            cdm: "main".to_string(),
            results: "main".to_string(),
            vocab: None,
            scratch: "#".to_string(),
        }
    }
}

/// Run behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunSettings {
    pub source_name: String,
    pub cdm_version: String,
    pub analysis_ids: Option<Vec<i64>>,
    pub exclude_analysis_ids: Vec<i64>,
    pub include_cost: bool,
    pub default_analyses_only: bool,
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub acquire_retries: u32,
    pub create_tables: bool,
    pub update_given_analyses_only: bool,
    pub create_indices: bool,
    pub drop_scratch_tables: bool,
    pub run_heel: bool,
    pub generate_only: bool,
    pub output_folder: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        let defaults = RunOptions::default();
        Self {
            source_name: defaults.source_name,
            cdm_version: defaults.cdm_version,
            analysis_ids: None,
            exclude_analysis_ids: Vec::new(),
            include_cost: defaults.include_cost,
            default_analyses_only: defaults.default_analyses_only,
            concurrency: defaults.concurrency,
            failure_policy: defaults.failure_policy,
            acquire_retries: defaults.acquire_retries,
            create_tables: defaults.create_tables,
            update_given_analyses_only: defaults.update_given_analyses_only,
            create_indices: defaults.create_indices,
            drop_scratch_tables: defaults.drop_scratch_tables,
            run_heel: defaults.run_heel,
            generate_only: defaults.generate_only,
            output_folder: defaults.output_folder.to_string_lossy().into_owned(),
        }
    }
}

/// Small-cell suppression.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedactionSettings {
    pub enabled: bool,
    pub small_cell_count: i64,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            small_cell_count: 5,
        }
    }
}

/// Scratch table name prefixes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrefixSettings {
    pub analysis: String,
    pub heel: String,
}

impl Default for PrefixSettings {
    fn default() -> Self {
        Self {
            analysis: "tmpach".to_string(),
            heel: "tmpheel".to_string(),
        }
    }
}

/// Where analysis and rule definitions live.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub directory: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            directory: "catalog".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from an explicit path or the default config file locations.
    ///
    /// Searches in order:
    /// 1. `explicit` (the `--config` flag)
    /// 2. Environment variable `ACHILLES_CONFIG`
    /// 3. `./achilles.toml`
    /// 4. `~/.config/achilles/config.toml`
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = env::var("ACHILLES_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("achilles.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("achilles").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }

    /// Catalog directory with environment variables expanded.
    pub fn catalog_dir(&self) -> Result<PathBuf, SettingsError> {
        Ok(PathBuf::from(expand_env_vars(&self.catalog.directory)?))
    }

    /// Turn the settings into validated, immutable run options.
    pub fn validate(&self) -> RunResult<RunOptions> {
        let dialect = self
            .connection
            .resolved_dialect()
            .map_err(|e| RunError::Configuration(e.to_string()))?;
        let output_folder =
            expand_env_vars(&self.run.output_folder).map_err(|e| RunError::Configuration(e.to_string()))?;

        RunOptions {
            dialect,
            cdm_schema: self.schemas.cdm.clone(),
            results_schema: self.schemas.results.clone(),
            vocab_schema: self
                .schemas
                .vocab
                .clone()
                .unwrap_or_else(|| self.schemas.results.clone()),
            scratch_schema: self.schemas.scratch.clone(),
            source_name: self.run.source_name.clone(),
            cdm_version: self.run.cdm_version.clone(),
            analysis_ids: self.run.analysis_ids.clone(),
            exclude_analysis_ids: self.run.exclude_analysis_ids.clone(),
            include_cost: self.run.include_cost,
            default_analyses_only: self.run.default_analyses_only,
            small_cell_count: self
                .redaction
                .enabled
                .then_some(self.redaction.small_cell_count),
            concurrency: self.run.concurrency,
            failure_policy: self.run.failure_policy,
            acquire_retries: self.run.acquire_retries,
            analysis_prefix: self.prefixes.analysis.clone(),
            heel_prefix: self.prefixes.heel.clone(),
            drop_scratch_tables: self.run.drop_scratch_tables,
            create_tables: self.run.create_tables,
            update_given_analyses_only: self.run.update_given_analyses_only,
            create_indices: self.run.create_indices,
            run_heel: self.run.run_heel,
            thresholds: self.heel,
            generate_only: self.run.generate_only,
            output_folder: PathBuf::from(output_folder),
        }
        .validated()
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name = if chars.next_if_eq(&'{').is_some() {
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|&ch| ch != '}') {
                name.push(ch);
            }
            if chars.next_if_eq(&'}').is_none() {
                return Err(SettingsError::InvalidConfig(format!(
                    "unterminated variable reference '${{{}'",
                    name
                )));
            }
            name
        } else {
            // $VAR ends at the first non-alphanumeric, non-underscore character
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|&ch| ch.is_alphanumeric() || ch == '_') {
                name.push(ch);
            }
            if name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
            name
        };

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
