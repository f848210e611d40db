//! Configuration module for Achilles.
//!
//! Handles connection configuration, environment variables, and settings.

mod connection;
mod settings;

pub use connection::{ConnectionConfig, ConnectionError, Driver};
pub use settings::{
    expand_env_vars, CatalogSettings, ConnectionSettings, PrefixSettings, RedactionSettings,
    RunSettings, SchemaSettings, Settings, SettingsError,
};
