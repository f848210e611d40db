//! Minimal SQL segmenter.
//!
//! Template processing only needs to know which parts of a SQL text are
//! code, which are quoted (string literals and `"quoted identifiers"`), and
//! which are comments. Rewrites touch code only; parameter substitution also
//! reaches into string literals; nothing touches comments.

use thiserror::Error;

/// A contiguous slice of SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Plain SQL outside of quotes and comments.
    Code(&'a str),
    /// A quoted run including its delimiters (`'...'` or `"..."`).
    Quoted(&'a str),
    /// A `-- line` or `/* block */` comment including its markers.
    Comment(&'a str),
}

impl<'a> Segment<'a> {
    /// The underlying text.
    pub fn text(&self) -> &'a str {
        match self {
            Segment::Code(s) | Segment::Quoted(s) | Segment::Comment(s) => s,
        }
    }
}

/// Lexing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated quoted text starting at byte {0}")]
    UnterminatedQuote(usize),

    #[error("unterminated block comment starting at byte {0}")]
    UnterminatedComment(usize),
}

/// Split SQL text into code, quoted and comment segments.
///
/// Doubled delimiters (`''`, `""`) inside quoted text are escapes.
pub fn segments(sql: &str) -> Result<Vec<Segment<'_>>, LexError> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                let start = i;
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(LexError::UnterminatedQuote(start)),
                        Some(&b) if b == quote => {
                            if bytes.get(i + 1) == Some(&quote) {
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(_) => i += 1,
                    }
                }
                push_code(&mut out, sql, code_start, start);
                out.push(Segment::Quoted(&sql[start..i]));
                code_start = i;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                push_code(&mut out, sql, code_start, start);
                out.push(Segment::Comment(&sql[start..i]));
                code_start = i;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = i;
                let end = sql[i + 2..]
                    .find("*/")
                    .ok_or(LexError::UnterminatedComment(start))?;
                i = i + 2 + end + 2;
                push_code(&mut out, sql, code_start, start);
                out.push(Segment::Comment(&sql[start..i]));
                code_start = i;
            }
            _ => i += 1,
        }
    }

    push_code(&mut out, sql, code_start, bytes.len());
    Ok(out)
}

fn push_code<'a>(out: &mut Vec<Segment<'a>>, sql: &'a str, start: usize, end: usize) {
    if end > start {
        out.push(Segment::Code(&sql[start..end]));
    }
}

/// Split SQL text into statements on top-level semicolons.
///
/// Comments are dropped (block comments become a single space so adjacent
/// tokens stay apart), statements are trimmed, and empty statements are
/// discarded.
pub fn split_statements(sql: &str) -> Result<Vec<String>, LexError> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for segment in segments(sql)? {
        match segment {
            Segment::Code(code) => {
                let mut parts = code.split(';');
                if let Some(first) = parts.next() {
                    current.push_str(first);
                }
                for part in parts {
                    finish_statement(&mut statements, &mut current);
                    current.push_str(part);
                }
            }
            Segment::Quoted(text) => current.push_str(text),
            Segment::Comment(text) => {
                if text.starts_with("/*") {
                    current.push(' ');
                }
            }
        }
    }
    finish_statement(&mut statements, &mut current);

    Ok(statements)
}

fn finish_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Rebuild `sql` with every code segment passed through `f`.
///
/// Quoted text and comments are copied unchanged.
pub fn map_code<F>(sql: &str, mut f: F) -> Result<String, LexError>
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(sql.len());
    for segment in segments(sql)? {
        match segment {
            Segment::Code(code) => out.push_str(&f(code)),
            other => out.push_str(other.text()),
        }
    }
    Ok(out)
}

/// Copy of `sql` where every byte inside quoted text or comments is replaced
/// by `_`, keeping byte offsets aligned with the original.
///
/// Quote delimiters are kept so that pattern matches cannot run across a
/// literal boundary unnoticed.
pub fn mask_literals(sql: &str) -> Result<String, LexError> {
    let mut out = String::with_capacity(sql.len());
    for segment in segments(sql)? {
        match segment {
            Segment::Code(code) => out.push_str(code),
            Segment::Quoted(text) => {
                let len = text.len();
                out.push_str(&text[..1]);
                out.extend(std::iter::repeat('_').take(len - 2));
                out.push_str(&text[len - 1..]);
            }
            Segment::Comment(text) => out.extend(std::iter::repeat('_').take(text.len())),
        }
    }
    Ok(out)
}

/// Check that parentheses balance in code segments.
pub fn check_balanced(sql: &str) -> Result<(), String> {
    let mut depth: i64 = 0;
    for segment in segments(sql).map_err(|e| e.to_string())? {
        if let Segment::Code(code) = segment {
            for c in code.chars() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth < 0 {
                            return Err("unbalanced ')'".to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    if depth != 0 {
        return Err(format!("{} unclosed '('", depth));
    }
    Ok(())
}
