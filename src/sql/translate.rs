//! Dialect translation of rendered SQL.
//!
//! Templates use T-SQL idioms. `translate` rewrites them for a target
//! dialect, statement by statement:
//!
//! | Template construct                                   | Rewritten as (non T-SQL)              |
//! |------------------------------------------------------|---------------------------------------|
//! | `IF OBJECT_ID('x', 'U') IS NOT NULL DROP TABLE x`    | `DROP TABLE IF EXISTS x`              |
//! | `SELECT ... INTO t FROM ...`                         | `CREATE TABLE t AS SELECT ... FROM ...` |
//! | `CREATE TABLE #t` / `#t`                             | dialect temp table syntax / name      |
//! | `SELECT TOP n ...`                                   | `SELECT ... LIMIT n` (per query block) |
//! | `[ident]`                                            | dialect identifier quoting            |
//! | `COUNT_BIG(`, `ISNULL(`, `LEN(`, `STDEV(`            | dialect function names                |
//!
//! Output is normalised to one trimmed statement per line, each terminated
//! by `;`, with comments removed. Every rewrite produces text that none of
//! the rules match again, so `translate(translate(s, d), d) == translate(s, d)`.

use std::sync::LazyLock;

use regex::Regex;

use super::dialect::{Dialect, SqlDialect};
use super::lexer;
use super::render::TemplateResult;

static DROP_IF_EXISTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^IF\s+OBJECT_ID\s*\(\s*'[^']*'\s*(?:,\s*'[^']*'\s*)?\)\s+IS\s+NOT\s+NULL\s+DROP\s+TABLE\s+(\S+)$",
    )
    .unwrap()
});

static SELECT_INTO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bINTO\s+([#\w.\[\]"$]+)(?:\s+|$)"#).unwrap());

static STATEMENT_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(SELECT|WITH)\b").unwrap());

static INSERT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bINSERT\b").unwrap());

static TOP_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bSELECT(\s+DISTINCT)?\s+TOP(?:\s*\(\s*(\d+)\s*\)\s*|\s+(\d+)\s+)").unwrap()
});

static SET_OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(UNION|EXCEPT|INTERSECT)\b").unwrap());

static CREATE_TEMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCREATE\s+TABLE\s+#(\w+)").unwrap());

static TEMP_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").unwrap());

static BRACKET_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());

static FUNCTION_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)(\s*\()").unwrap());

/// Translate rendered SQL for `dialect`.
pub fn translate(sql: &str, dialect: Dialect) -> TemplateResult<String> {
    let statements = lexer::split_statements(sql)?;
    let translated = statements
        .iter()
        .map(|stmt| translate_statement(stmt, dialect))
        .collect::<TemplateResult<Vec<_>>>()?;
    Ok(translated
        .iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Translate and split into executable statements (without terminators).
pub fn translate_statements(sql: &str, dialect: Dialect) -> TemplateResult<Vec<String>> {
    lexer::split_statements(sql)?
        .iter()
        .map(|stmt| translate_statement(stmt, dialect))
        .collect()
}

fn translate_statement(stmt: &str, dialect: Dialect) -> TemplateResult<String> {
    let mut stmt = rewrite_drop_if_exists(stmt, dialect)?;

    if !dialect.supports_select_into() {
        stmt = rewrite_select_into(&stmt, dialect)?;
    }
    if !dialect.supports_top() {
        stmt = rewrite_top(&stmt)?;
    }
    if dialect != Dialect::TSql {
        stmt = lexer::map_code(&stmt, |code| rewrite_temp_tables(code, dialect))?;
        stmt = lexer::map_code(&stmt, |code| {
            BRACKET_IDENT
                .replace_all(code, |caps: &regex::Captures| dialect.quote_identifier(&caps[1]))
                .into_owned()
        })?;
    }
    stmt = lexer::map_code(&stmt, |code| {
        FUNCTION_CALL
            .replace_all(code, |caps: &regex::Captures| {
                match dialect.remap_function(&caps[1]) {
                    Some(name) => format!("{}{}", name, &caps[2]),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    })?;

    Ok(stmt)
}

fn rewrite_drop_if_exists(stmt: &str, dialect: Dialect) -> TemplateResult<String> {
    let masked = lexer::mask_literals(stmt)?;
    Ok(match DROP_IF_EXISTS.captures(&masked) {
        Some(caps) => {
            let target = caps.get(1).map(|m| &stmt[m.range()]).unwrap_or_default();
            dialect.emit_drop_table_if_exists(target)
        }
        None => stmt.to_string(),
    })
}

fn rewrite_select_into(stmt: &str, dialect: Dialect) -> TemplateResult<String> {
    let masked = lexer::mask_literals(stmt)?;
    if !STATEMENT_HEAD.is_match(&masked) {
        return Ok(stmt.to_string());
    }
    let Some(caps) = SELECT_INTO.captures(&masked) else {
        return Ok(stmt.to_string());
    };
    let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
        return Ok(stmt.to_string());
    };

    if INSERT_KEYWORD.is_match(&masked[..whole.start()]) {
        return Ok(stmt.to_string());
    }

    let head = stmt[..whole.start()].trim();
    let tail = stmt[whole.end()..].trim();
    let target = &stmt[target.range()];

    let create = match target.strip_prefix('#') {
        Some(name) => format!("{} {}", dialect.create_temp_table(), dialect.temp_table_name(name)),
        None => format!("CREATE TABLE {}", target),
    };
    if tail.is_empty() {
        return Ok(format!("{} AS {}", create, head));
    }
    Ok(format!("{} AS {} {}", create, head, tail))
}

/// Rewrite every `SELECT [DISTINCT] TOP n` in one pass.
///
/// A `TOP` heading the only branch of its query block becomes a `LIMIT n`
/// at the end of that block. A `TOP` on one branch of a set operation is
/// wrapped in a derived table so the limit stays scoped to that branch.
fn rewrite_top(stmt: &str) -> TemplateResult<String> {
    let masked = lexer::mask_literals(stmt)?;
    let bytes = masked.as_bytes();

    // (position, nesting depth, replaced up to, text)
    let mut edits: Vec<(usize, usize, usize, String)> = Vec::new();
    let mut wrapped = 0;

    for caps in TOP_N.captures_iter(&masked) {
        let (Some(whole), Some(count)) = (caps.get(0), caps.get(2).or_else(|| caps.get(3))) else {
            continue;
        };
        let distinct = if caps.get(1).is_some() { " DISTINCT" } else { "" };
        let (block_start, block_end) = enclosing_block(bytes, whole.start());
        let depth = nesting_depth(bytes, whole.start());

        let operators = set_operators_at_level(&masked, block_start, block_end);
        let branch_end = operators
            .iter()
            .copied()
            .find(|&pos| pos > whole.start())
            .unwrap_or(block_end);
        let branch_len = masked[whole.start()..branch_end].trim_end().len();
        let limit_at = (whole.start() + branch_len).max(whole.end());
        let limit = format!(" LIMIT {}", &masked[count.range()]);

        if operators.is_empty() {
            edits.push((whole.start(), depth, whole.end(), format!("SELECT{} ", distinct)));
            edits.push((limit_at, depth, limit_at, limit));
        } else {
            wrapped += 1;
            edits.push((
                whole.start(),
                depth,
                whole.end(),
                format!("SELECT * FROM (SELECT{} ", distinct),
            ));
            edits.push((limit_at, depth, limit_at, format!("{}) top_{}", limit, wrapped)));
        }
    }

    if edits.is_empty() {
        return Ok(stmt.to_string());
    }

    // Limits closing at the same spot: the innermost block closes first.
    edits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut out = String::with_capacity(stmt.len() + 32);
    let mut cursor = 0;
    for (at, _, until, text) in edits {
        out.push_str(&stmt[cursor..at.max(cursor)]);
        out.push_str(&text);
        cursor = cursor.max(until);
    }
    out.push_str(&stmt[cursor..]);
    Ok(out)
}

/// Bounds of the parenthesised block around `pos`, or the whole statement.
fn enclosing_block(bytes: &[u8], pos: usize) -> (usize, usize) {
    let mut balance = 0usize;
    let mut start = 0;
    for i in (0..pos).rev() {
        match bytes[i] {
            b')' => balance += 1,
            b'(' if balance == 0 => {
                start = i + 1;
                break;
            }
            b'(' => balance -= 1,
            _ => {}
        }
    }

    let mut balance = 0usize;
    let mut end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(pos) {
        match b {
            b'(' => balance += 1,
            b')' if balance == 0 => {
                end = i;
                break;
            }
            b')' => balance -= 1,
            _ => {}
        }
    }
    (start, end)
}

fn nesting_depth(bytes: &[u8], pos: usize) -> usize {
    bytes[..pos].iter().fold(0usize, |depth, &b| match b {
        b'(' => depth + 1,
        b')' => depth.saturating_sub(1),
        _ => depth,
    })
}

/// Positions of `UNION`/`EXCEPT`/`INTERSECT` directly inside `[start, end)`.
fn set_operators_at_level(masked: &str, start: usize, end: usize) -> Vec<usize> {
    let bytes = masked.as_bytes();
    SET_OPERATOR
        .find_iter(&masked[start..end])
        .map(|m| start + m.start())
        .filter(|&pos| {
            bytes[start..pos].iter().fold(0i64, |depth, &b| match b {
                b'(' => depth + 1,
                b')' => depth - 1,
                _ => depth,
            }) == 0
        })
        .collect()
}

fn rewrite_temp_tables(code: &str, dialect: Dialect) -> String {
    let code = CREATE_TEMP.replace_all(code, |caps: &regex::Captures| {
        format!("{} {}", dialect.create_temp_table(), dialect.temp_table_name(&caps[1]))
    });
    TEMP_NAME
        .replace_all(&code, |caps: &regex::Captures| dialect.temp_table_name(&caps[1]))
        .into_owned()
}
