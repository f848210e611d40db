//! DuckDB SQL dialect.
//!
//! Postgres-compatible for everything templates use; column types follow
//! DuckDB's own names (`DOUBLE`, unbounded `VARCHAR`).

use super::helpers;
use super::SqlDialect;
use crate::sql::types::DataType;

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_duckdb(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        match dt {
            DataType::Float64 => "DOUBLE".into(),
            DataType::Text => "VARCHAR".into(),
            other => helpers::emit_data_type_ansi(other),
        }
    }
}
