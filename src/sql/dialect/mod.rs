//! SQL dialect definitions and translation rules.
//!
//! Analysis and rule templates are written once, in the T-SQL flavour used by
//! the OHDSI tooling (`#temp` tables, `SELECT ... INTO`, `TOP n`, `[ident]`,
//! `COUNT_BIG`). Each dialect implements `SqlDialect` to describe how those
//! constructs must look on its engine:
//!
//! - Identifier quoting: `"` (ANSI/PG/DuckDB/SQLite), `` ` `` (BigQuery), `[]` (T-SQL)
//! - Temporary tables: `#name` (T-SQL) vs `CREATE TEMP TABLE name`
//! - Materialisation: `SELECT ... INTO` (T-SQL) vs `CREATE TABLE ... AS SELECT`
//! - Row limiting: `TOP n` (T-SQL) vs `LIMIT n`
//! - Function names: `COUNT_BIG`, `ISNULL`, `LEN`, `STDEV`
//! - Column types used by merge casts and result table DDL
//!
//! # Usage
//!
//! ```ignore
//! use achilles::sql::dialect::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! let quoted = dialect.quote_identifier("user");  // "user"
//! ```

mod bigquery;
mod duckdb;
pub mod helpers;
mod postgres;
mod redshift;
mod snowflake;
mod sqlite;
mod tsql;

pub use bigquery::BigQuery;
pub use duckdb::DuckDb;
pub use postgres::Postgres;
pub use redshift::Redshift;
pub use snowflake::Snowflake;
pub use sqlite::Sqlite;
pub use tsql::TSql;

use serde::{Deserialize, Serialize};

use super::types::DataType;

/// SQL dialect trait - defines how template constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    // =========================================================================
    // Temporary Tables
    // =========================================================================

    /// Physical name of a temp table whose template spelling is `#name`.
    fn temp_table_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Keyword sequence that opens a temp table definition.
    fn create_temp_table(&self) -> &'static str {
        "CREATE TEMP TABLE"
    }

    /// Whether `SELECT ... INTO target` is native.
    ///
    /// When false, the statement is rewritten to `CREATE TABLE target AS SELECT`.
    fn supports_select_into(&self) -> bool {
        false
    }

    // =========================================================================
    // Row Limiting
    // =========================================================================

    /// Whether `SELECT TOP n` is native. When false, `LIMIT n` is appended.
    fn supports_top(&self) -> bool {
        false
    }

    // =========================================================================
    // Function Remapping
    // =========================================================================

    /// Remap a T-SQL function name for this dialect.
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None` to
    /// keep the original. The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }

    // =========================================================================
    // DDL Support
    // =========================================================================

    /// Emit a column type for casts and `CREATE TABLE`.
    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_ansi(dt)
    }

    /// Whether this dialect supports `CREATE INDEX`.
    fn supports_indexes(&self) -> bool {
        true
    }

    /// Emit a single-column `CREATE INDEX`.
    fn emit_create_index(&self, schema: &str, table: &str, index: &str, column: &str) -> String {
        format!("CREATE INDEX {} ON {}.{} ({})", index, schema, table, column)
    }

    /// Emit `DROP TABLE IF EXISTS` for an already qualified name.
    fn emit_drop_table_if_exists(&self, qualified: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", qualified)
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    TSql,
    Postgres,
    Redshift,
    DuckDb,
    Snowflake,
    BigQuery,
}

impl Dialect {
    /// All dialects, in declaration order.
    pub const ALL: [Dialect; 7] = [
        Dialect::Sqlite,
        Dialect::TSql,
        Dialect::Postgres,
        Dialect::Redshift,
        Dialect::DuckDb,
        Dialect::Snowflake,
        Dialect::BigQuery,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Sqlite => &Sqlite,
            Dialect::TSql => &TSql,
            Dialect::Postgres => &Postgres,
            Dialect::Redshift => &Redshift,
            Dialect::DuckDb => &DuckDb,
            Dialect::Snowflake => &Snowflake,
            Dialect::BigQuery => &BigQuery,
        }
    }

    /// Parse a dialect identifier as used in configuration files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Some(Dialect::Sqlite),
            "tsql" | "sql server" | "sqlserver" | "mssql" => Some(Dialect::TSql),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "redshift" => Some(Dialect::Redshift),
            "duckdb" => Some(Dialect::DuckDb),
            "snowflake" => Some(Dialect::Snowflake),
            "bigquery" => Some(Dialect::BigQuery),
            _ => None,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn temp_table_name(&self, name: &str) -> String {
        self.dialect().temp_table_name(name)
    }

    fn create_temp_table(&self) -> &'static str {
        self.dialect().create_temp_table()
    }

    fn supports_select_into(&self) -> bool {
        self.dialect().supports_select_into()
    }

    fn supports_top(&self) -> bool {
        self.dialect().supports_top()
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        self.dialect().emit_data_type(dt)
    }

    fn supports_indexes(&self) -> bool {
        self.dialect().supports_indexes()
    }

    fn emit_create_index(&self, schema: &str, table: &str, index: &str, column: &str) -> String {
        self.dialect().emit_create_index(schema, table, index, column)
    }

    fn emit_drop_table_if_exists(&self, qualified: &str) -> String {
        self.dialect().emit_drop_table_if_exists(qualified)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}
