//! Shared helper functions for SQL dialect implementations.
//!
//! This module provides reusable building blocks that dialects can compose
//! to implement the `SqlDialect` trait with minimal duplication.

use crate::sql::types::DataType;

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: Postgres, DuckDB, Snowflake, Redshift, SQLite
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: BigQuery
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote identifier with square brackets.
/// Used by: T-SQL
pub fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with N prefix for Unicode (T-SQL).
pub fn quote_string_unicode(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

// =============================================================================
// Function Remapping
// =============================================================================
//
// Templates are authored in the T-SQL flavour, so remapping only ever goes
// from T-SQL names to the target's names.

/// Remap functions for Postgres-family dialects.
/// Used by: Postgres, Redshift
pub fn remap_function_postgres(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "COUNT_BIG" => Some("COUNT"),
        "ISNULL" => Some("COALESCE"),
        "LEN" => Some("LENGTH"),
        "STDEV" => Some("STDDEV"),
        _ => None,
    }
}

/// Remap functions for DuckDB.
pub fn remap_function_duckdb(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "COUNT_BIG" => Some("COUNT"),
        "ISNULL" => Some("COALESCE"),
        "LEN" => Some("LENGTH"),
        "STDEV" => Some("STDDEV_SAMP"),
        _ => None,
    }
}

/// Remap functions for Snowflake.
pub fn remap_function_snowflake(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "COUNT_BIG" => Some("COUNT"),
        "ISNULL" => Some("NVL"),
        "LEN" => Some("LENGTH"),
        "STDEV" => Some("STDDEV"),
        _ => None,
    }
}

/// Remap functions for BigQuery.
pub fn remap_function_bigquery(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "COUNT_BIG" => Some("COUNT"),
        "ISNULL" => Some("IFNULL"),
        "LEN" => Some("CHAR_LENGTH"),
        "STDEV" => Some("STDDEV"),
        _ => None,
    }
}

/// Remap functions for SQLite.
///
/// SQLite has no sample standard deviation built in; `STDEV` is left alone so
/// the engine reports the missing function instead of computing something else.
pub fn remap_function_sqlite(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "COUNT_BIG" => Some("COUNT"),
        "ISNULL" => Some("IFNULL"),
        "LEN" => Some("LENGTH"),
        _ => None,
    }
}

// =============================================================================
// Data Type Emission
// =============================================================================

/// Emit data type for ANSI/Postgres style.
/// Used by: Postgres, Redshift, DuckDB
pub fn emit_data_type_ansi(dt: &DataType) -> String {
    match dt {
        DataType::Int32 => "INTEGER".into(),
        DataType::Int64 => "BIGINT".into(),
        DataType::Float64 => "DOUBLE PRECISION".into(),
        DataType::Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
        DataType::Varchar(n) => format!("VARCHAR({})", n),
        DataType::Text => "TEXT".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
    }
}

/// Emit data type for T-SQL.
pub fn emit_data_type_tsql(dt: &DataType) -> String {
    match dt {
        DataType::Int32 => "INT".into(),
        DataType::Int64 => "BIGINT".into(),
        DataType::Float64 => "FLOAT".into(),
        DataType::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
        DataType::Varchar(n) => format!("VARCHAR({})", n),
        DataType::Text => "VARCHAR(MAX)".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "DATETIME2".into(),
    }
}

/// Emit data type for Snowflake.
pub fn emit_data_type_snowflake(dt: &DataType) -> String {
    match dt {
        DataType::Int32 => "INTEGER".into(),
        DataType::Int64 => "BIGINT".into(),
        DataType::Float64 => "FLOAT".into(),
        DataType::Decimal(p, s) => format!("NUMBER({}, {})", p, s),
        DataType::Varchar(n) => format!("VARCHAR({})", n),
        DataType::Text => "VARCHAR".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP_NTZ".into(),
    }
}

/// Emit data type for BigQuery.
pub fn emit_data_type_bigquery(dt: &DataType) -> String {
    match dt {
        DataType::Int32 | DataType::Int64 => "INT64".into(),
        DataType::Float64 => "FLOAT64".into(),
        DataType::Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
        DataType::Varchar(_) | DataType::Text => "STRING".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
    }
}

/// Emit data type for SQLite.
///
/// SQLite only honours type affinity, but keeping the declared names makes
/// `CAST` produce the expected storage class.
pub fn emit_data_type_sqlite(dt: &DataType) -> String {
    match dt {
        DataType::Int32 => "INTEGER".into(),
        DataType::Int64 => "BIGINT".into(),
        DataType::Float64 => "FLOAT".into(),
        DataType::Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
        DataType::Varchar(n) => format!("VARCHAR({})", n),
        DataType::Text => "TEXT".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
    }
}
