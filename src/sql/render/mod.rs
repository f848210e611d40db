//! Template rendering: `@name` substitution and conditional blocks.
//!
//! Templates are dialect-neutral SQL with `@name` placeholders. Rendering is a
//! pure text transformation:
//!
//! 1. Every `@name` outside comments is replaced by its bound value. The
//!    longest bound name that prefixes the placeholder text wins, so
//!    `@scratchTable_dist` with `scratchTable` bound renders as
//!    `<value>_dist`. `@@name` (T-SQL system variables) is left alone.
//! 2. `{condition}?{then}:{else}` blocks are resolved (see [`condition`]).
//! 3. The result is checked for balanced parentheses and terminated quotes.
//!
//! A placeholder with no bound prefix is an [`TemplateError::UnboundParameter`].

pub mod condition;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use super::lexer::{self, LexError, Segment};

/// Errors raised while rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unbound parameter '@{name}'")]
    UnboundParameter { name: String },

    #[error("malformed SQL: {0}")]
    Malformed(String),

    /// The template text could not be loaded.
    #[error("template unavailable: {0}")]
    Unavailable(String),
}

impl From<LexError> for TemplateError {
    fn from(e: LexError) -> Self {
        TemplateError::Malformed(e.to_string())
    }
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Inserted verbatim (schema names, table names, raw SQL fragments).
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Comma-joined; text items are emitted as quoted literals.
    List(Vec<ParamValue>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::Int(n) => write!(f, "{}", n),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            ParamValue::List(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        ParamValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
                        other => other.to_string(),
                    })
                    .collect();
                write!(f, "{}", rendered.join(", "))
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<&String> for ParamValue {
    fn from(s: &String) -> Self {
        ParamValue::Text(s.clone())
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Int(n)
    }
}

impl From<i32> for ParamValue {
    fn from(n: i32) -> Self {
        ParamValue::Int(n.into())
    }
}

impl From<u32> for ParamValue {
    fn from(n: u32) -> Self {
        ParamValue::Int(n.into())
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(items: Vec<T>) -> Self {
        ParamValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Named parameter bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` (without the leading `@`).
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Builder-style [`Params::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Copy of `self` overlaid with `other`'s bindings.
    pub fn merged(&self, other: &Params) -> Params {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Params { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// Render a template with the given bindings.
pub fn render(template: &str, params: &Params) -> TemplateResult<String> {
    let substituted = substitute(template, params)?;
    let resolved = condition::resolve(&substituted)?;
    lexer::check_balanced(&resolved).map_err(TemplateError::Malformed)?;
    Ok(resolved)
}

/// Render `template` once per item and join the results with `UNION ALL`.
///
/// Each item's bindings are overlaid on `base`. An empty item list renders
/// to an empty string.
pub fn render_union_all(template: &str, base: &Params, items: &[Params]) -> TemplateResult<String> {
    let parts = items
        .iter()
        .map(|item| render(template, &base.merged(item)).map(|s| s.trim().to_string()))
        .collect::<TemplateResult<Vec<_>>>()?;
    Ok(parts.join("\nUNION ALL\n"))
}

/// Replace `@name` placeholders outside comments.
fn substitute(template: &str, params: &Params) -> TemplateResult<String> {
    let mut names: Vec<&str> = params.values.keys().map(String::as_str).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    let mut out = String::with_capacity(template.len());
    for segment in lexer::segments(template)? {
        match segment {
            Segment::Comment(text) => out.push_str(text),
            Segment::Code(text) | Segment::Quoted(text) => {
                substitute_text(text, params, &names, &mut out)?
            }
        }
    }
    Ok(out)
}

fn substitute_text(
    text: &str,
    params: &Params,
    names: &[&str],
    out: &mut String,
) -> TemplateResult<()> {
    let mut rest = text;

    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];

        if let Some(system) = after.strip_prefix('@') {
            let len = ident_len(system);
            out.push_str("@@");
            out.push_str(&system[..len]);
            rest = &system[len..];
            continue;
        }

        if !after.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            out.push('@');
            rest = after;
            continue;
        }

        match names.iter().find(|name| after.starts_with(**name)) {
            Some(name) => {
                if let Some(value) = params.get(name) {
                    out.push_str(&value.to_string());
                }
                rest = &after[name.len()..];
            }
            None => {
                return Err(TemplateError::UnboundParameter {
                    name: after[..ident_len(after)].to_string(),
                })
            }
        }
    }

    out.push_str(rest);
    Ok(())
}

fn ident_len(text: &str) -> usize {
    text.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len())
}
