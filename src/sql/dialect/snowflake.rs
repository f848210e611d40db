//! Snowflake SQL dialect.
//!
//! Snowflake features:
//! - ANSI identifier quoting (`"`)
//! - `CREATE TEMPORARY TABLE` for session-scoped storage
//! - No user-defined indexes (micro-partitions are managed by the engine)

use super::helpers;
use super::SqlDialect;
use crate::sql::types::DataType;

/// Snowflake SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn create_temp_table(&self) -> &'static str {
        "CREATE TEMPORARY TABLE"
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_snowflake(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_snowflake(dt)
    }

    fn supports_indexes(&self) -> bool {
        false
    }
}
