//! T-SQL (SQL Server / Azure SQL) dialect.
//!
//! Templates are authored in this flavour, so translation to T-SQL is close
//! to the identity:
//! - Square bracket identifier quoting (`[name]`)
//! - `#name` session temp tables
//! - Native `SELECT ... INTO`
//! - `TOP n` for row limiting
//! - N'...' prefix for Unicode strings

use super::helpers;
use super::SqlDialect;
use crate::sql::types::DataType;

/// T-SQL (SQL Server) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        if !s.is_ascii() {
            helpers::quote_string_unicode(s)
        } else {
            helpers::quote_string_single(s)
        }
    }

    fn temp_table_name(&self, name: &str) -> String {
        format!("#{}", name)
    }

    fn create_temp_table(&self) -> &'static str {
        // Temp-ness is carried by the '#' prefix
        "CREATE TABLE"
    }

    fn supports_select_into(&self) -> bool {
        true
    }

    fn supports_top(&self) -> bool {
        true
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_tsql(dt)
    }
}
