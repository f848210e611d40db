//! SQL text processing.
//!
//! - [`render`] - `@name` parameter substitution and conditional blocks
//! - [`translate`] - dialect rewriting of rendered templates
//! - [`dialect`] - SQL dialect implementations
//! - [`types`] - declared column types for result tables
//! - [`lexer`] - code/quote/comment segmentation shared by the above

pub mod dialect;
pub mod lexer;
pub mod render;
pub mod translate;
pub mod types;


pub use dialect::{Dialect, SqlDialect};
pub use render::{render, render_union_all, ParamValue, Params, TemplateError, TemplateResult};
pub use translate::{translate, translate_statements};
pub use types::DataType;
