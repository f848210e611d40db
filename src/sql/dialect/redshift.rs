//! Amazon Redshift SQL dialect.
//!
//! Redshift is PostgreSQL-derived but has no secondary indexes; sort and
//! distribution keys take their place and are out of scope here.

use super::helpers;
use super::SqlDialect;

/// Amazon Redshift SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Redshift;

impl SqlDialect for Redshift {
    fn name(&self) -> &'static str {
        "redshift"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_postgres(name)
    }

    fn supports_indexes(&self) -> bool {
        false
    }
}
