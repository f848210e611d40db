//! SQLite dialect.
//!
//! SQLite treats attached databases as schemas (`main`, `temp`, or an
//! `ATTACH ... AS name`). Temp tables live in `temp` and shadow `main`
//! for unqualified names, which is what session-scoped runs rely on.
//! Index names, not table names, carry the schema qualifier.

use super::helpers;
use super::SqlDialect;
use crate::sql::types::DataType;

/// SQLite dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_sqlite(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_sqlite(dt)
    }

    fn emit_create_index(&self, schema: &str, table: &str, index: &str, column: &str) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {}.{} ON {} ({})",
            schema, index, table, column
        )
    }
}
