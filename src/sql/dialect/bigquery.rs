//! Google BigQuery SQL dialect.
//!
//! BigQuery features:
//! - Backtick identifier quoting
//! - `CREATE TEMP TABLE` only inside multi-statement sessions
//! - STRING/INT64/FLOAT64 column types
//! - No indexes

use super::helpers;
use super::SqlDialect;
use crate::sql::types::DataType;

/// Google BigQuery SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct BigQuery;

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_bigquery(name)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_bigquery(dt)
    }

    fn supports_indexes(&self) -> bool {
        false
    }
}
