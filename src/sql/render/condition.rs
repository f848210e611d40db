//! Conditional blocks: `{condition}?{then}:{else}`.
//!
//! Conditions are evaluated after parameter substitution, so they only ever
//! see literal text:
//!
//! ```text
//! {1 IN (1, 2)}?{...}          membership
//! {'a' == 'a' & !false}?{...}  equality, negation, conjunction
//! {x != y | 0}?{...}:{...}     inequality, disjunction, else branch
//! ```
//!
//! A bare operand is true when it reads `true` or `1` (case-insensitive).

use super::TemplateError;

/// Resolve every conditional block in `text`, innermost branches included.
///
/// Braces that do not form a `{..}?{..}` block are kept as literal text.
pub fn resolve(text: &str) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let candidate = &rest[open..];

        let Some(cond_end) = matching_brace(candidate) else {
            return Err(TemplateError::Malformed(format!(
                "unclosed '{{' near '{}'",
                preview(candidate)
            )));
        };
        let after_cond = &candidate[cond_end + 1..];

        let Some(then_block) = after_cond.strip_prefix("?") else {
            // Plain braces; copy the opening one and keep scanning inside.
            out.push('{');
            rest = &candidate[1..];
            continue;
        };
        let then_block = then_block.trim_start_matches(' ');
        if !then_block.starts_with('{') {
            return Err(TemplateError::Malformed(format!(
                "expected '{{' after '?' near '{}'",
                preview(candidate)
            )));
        }
        let then_end = matching_brace(then_block).ok_or_else(|| {
            TemplateError::Malformed(format!("unclosed branch near '{}'", preview(candidate)))
        })?;
        let then_text = &then_block[1..then_end];
        let mut remaining = &then_block[then_end + 1..];

        let mut else_text = "";
        if let Some(else_block) = remaining.strip_prefix(':') {
            let else_block = else_block.trim_start_matches(' ');
            if else_block.starts_with('{') {
                let else_end = matching_brace(else_block).ok_or_else(|| {
                    TemplateError::Malformed(format!(
                        "unclosed else branch near '{}'",
                        preview(candidate)
                    ))
                })?;
                else_text = &else_block[1..else_end];
                remaining = &else_block[else_end + 1..];
            }
        }

        let condition = &candidate[1..cond_end];
        let chosen = if evaluate(condition)? { then_text } else { else_text };
        out.push_str(&resolve(chosen)?);
        rest = remaining;
    }

    out.push_str(rest);
    Ok(out)
}

/// Byte index of the `}` closing the `{` at index 0.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

// =============================================================================
// Condition expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Eq,
    Ne,
    Not,
    And,
    Or,
    LParen,
    RParen,
    Comma,
    In,
}

fn tokenize(cond: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = cond.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                }
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                tokens.push(Token::Or);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(condition_error(cond, "expected '=='"));
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => value.push(ch),
                        None => return Err(condition_error(cond, "unterminated quote")),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || "()!,&|='\"".contains(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                if word.eq_ignore_ascii_case("in") {
                    tokens.push(Token::In);
                } else {
                    tokens.push(Token::Word(word));
                }
            }
        }
    }

    Ok(tokens)
}

fn condition_error(cond: &str, msg: &str) -> TemplateError {
    TemplateError::Malformed(format!("condition '{}': {}", cond.trim(), msg))
}

/// Evaluate a condition expression.
pub fn evaluate(cond: &str) -> Result<bool, TemplateError> {
    let tokens = tokenize(cond)?;
    let mut parser = Parser {
        cond,
        tokens: &tokens,
        pos: 0,
    };
    let value = parser.or()?;
    if parser.pos != tokens.len() {
        return Err(condition_error(cond, "unexpected trailing input"));
    }
    Ok(value)
}

struct Parser<'a> {
    cond: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<bool, TemplateError> {
        let mut value = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, TemplateError> {
        let mut value = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool, TemplateError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(!self.unary()?)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let value = self.or()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<bool, TemplateError> {
        let lhs = self.operand()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                Ok(lhs == self.operand()?)
            }
            Some(Token::Ne) => {
                self.pos += 1;
                Ok(lhs != self.operand()?)
            }
            Some(Token::In) => {
                self.pos += 1;
                self.expect(Token::LParen)?;
                let mut found = false;
                loop {
                    if self.operand()? == lhs {
                        found = true;
                    }
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        _ => return Err(condition_error(self.cond, "expected ',' or ')'")),
                    }
                }
                Ok(found)
            }
            _ => Ok(truthy(&lhs)),
        }
    }

    fn operand(&mut self) -> Result<String, TemplateError> {
        match self.next() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => Ok(w.clone()),
            _ => Err(condition_error(self.cond, "expected a value")),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), TemplateError> {
        match self.next() {
            Some(t) if *t == expected => Ok(()),
            _ => Err(condition_error(self.cond, &format!("expected {:?}", expected))),
        }
    }
}

fn truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
