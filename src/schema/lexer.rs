//! Tokenizer for SQLite DDL.
//!
//! Only as much of the grammar as is needed to find column names, definition
//! spans and identifier references. Every token keeps its byte span so callers
//! can slice the original text verbatim.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    /// `"x"`, `` `x` `` or `[x]`.
    QuotedIdent,
    /// `'x'` or a blob literal `X'..'`.
    String,
    Number,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'s> {
    pub kind: TokenKind,
    pub text: &'s str,
    pub start: usize,
    pub end: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason} at offset {offset}")]
pub struct LexError {
    pub offset: usize,
    pub reason: &'static str,
}

impl<'s> Token<'s> {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Ident && self.text.eq_ignore_ascii_case(keyword)
    }

    /// Unquoted identifier value, or `None` if the token is not an identifier.
    /// Single-quoted strings count, since SQLite accepts them as names.
    pub fn ident_value(&self) -> Option<Cow<'s, str>> {
        match self.kind {
            TokenKind::Ident => Some(Cow::Borrowed(self.text)),
            TokenKind::QuotedIdent | TokenKind::String => {
                let inner = &self.text[1..self.text.len() - 1];
                let value = match self.text.as_bytes()[0] {
                    b'"' => inner.replace("\"\"", "\""),
                    b'`' => inner.replace("``", "`"),
                    b'\'' => inner.replace("''", "'"),
                    b'[' => return Some(Cow::Borrowed(inner)),
                    _ => return None,
                };
                Some(Cow::Owned(value))
            }
            _ => None,
        }
    }

    /// True when the token names `column` as an identifier. String literals
    /// never match here.
    pub fn names(&self, column: &str) -> bool {
        matches!(self.kind, TokenKind::Ident | TokenKind::QuotedIdent)
            && self
                .ident_value()
                .map(|value| value.eq_ignore_ascii_case(column))
                .unwrap_or(false)
    }
}

pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, LexError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        if c == b'-' && bytes.get(pos + 1) == Some(&b'-') {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        if c == b'/' && bytes.get(pos + 1) == Some(&b'*') {
            // An unterminated block comment runs to the end of input.
            pos = sql[pos + 2..]
                .find("*/")
                .map(|offset| pos + 2 + offset + 2)
                .unwrap_or(bytes.len());
            continue;
        }

        let kind = match c {
            b'\'' => {
                pos = scan_quoted(bytes, pos, b'\'')?;
                TokenKind::String
            }
            b'x' | b'X' if bytes.get(pos + 1) == Some(&b'\'') => {
                pos = scan_quoted(bytes, pos + 1, b'\'')?;
                TokenKind::String
            }
            b'"' => {
                pos = scan_quoted(bytes, pos, b'"')?;
                TokenKind::QuotedIdent
            }
            b'`' => {
                pos = scan_quoted(bytes, pos, b'`')?;
                TokenKind::QuotedIdent
            }
            b'[' => {
                pos = sql[pos..]
                    .find(']')
                    .map(|offset| pos + offset + 1)
                    .ok_or(LexError {
                        offset: start,
                        reason: "unterminated [identifier]",
                    })?;
                TokenKind::QuotedIdent
            }
            b'(' => {
                pos += 1;
                TokenKind::LParen
            }
            b')' => {
                pos += 1;
                TokenKind::RParen
            }
            b',' => {
                pos += 1;
                TokenKind::Comma
            }
            b';' => {
                pos += 1;
                TokenKind::Semicolon
            }
            b'.' if !bytes.get(pos + 1).map_or(false, u8::is_ascii_digit) => {
                pos += 1;
                TokenKind::Dot
            }
            b'0'..=b'9' | b'.' => {
                pos += 1;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'.')
                {
                    pos += 1;
                }
                TokenKind::Number
            }
            c if is_ident_start(c) => {
                while pos < bytes.len() && is_ident_continue(bytes[pos]) {
                    pos += 1;
                }
                TokenKind::Ident
            }
            _ => {
                pos += sql[pos..].chars().next().map_or(1, char::len_utf8);
                TokenKind::Operator
            }
        };

        tokens.push(Token {
            kind,
            text: &sql[start..pos],
            start,
            end: pos,
        });
    }

    Ok(tokens)
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80
}

/// Returns the offset just past the closing quote. A doubled quote is an escape.
fn scan_quoted(bytes: &[u8], open: usize, quote: u8) -> Result<usize, LexError> {
    let mut pos = open + 1;
    while pos < bytes.len() {
        if bytes[pos] == quote {
            if bytes.get(pos + 1) == Some(&quote) {
                pos += 2;
                continue;
            }
            return Ok(pos + 1);
        }
        pos += 1;
    }
    Err(LexError {
        offset: open,
        reason: "unterminated quoted token",
    })
}

/// Index of the `)` closing the `(` at `open`.
pub fn matching_paren(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits `tokens` at commas that are not nested in parentheses.
pub fn split_top_level<'t, 's>(tokens: &'t [Token<'s>]) -> Vec<&'t [Token<'s>]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut part_start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            TokenKind::Comma if depth == 0 => {
                parts.push(&tokens[part_start..i]);
                part_start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[part_start..]);
    parts
}

/// Source text covered by a token run, verbatim.
pub fn span<'s>(sql: &'s str, tokens: &[Token<'s>]) -> &'s str {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => &sql[first.start..last.end],
        _ => "",
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Replaces the tokens at `positions` (ascending) with `replacement`, leaving
/// the rest of `sql` untouched.
pub fn splice(sql: &str, tokens: &[Token<'_>], positions: &[usize], replacement: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for &i in positions {
        let token = &tokens[i];
        result.push_str(&sql[copied..token.start]);
        result.push_str(replacement);
        copied = token.end;
    }
    result.push_str(&sql[copied..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        tokenize(sql).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_quoting_styles() {
        let tokens = tokenize(r#""a""b" `c` [d e] 'f''g' X'0A'"#).unwrap();
        let values: Vec<_> = tokens[..4]
            .iter()
            .map(|t| t.ident_value().unwrap().into_owned())
            .collect();
        assert_eq!(values, vec!["a\"b", "c", "d e", "f'g"]);
        assert_eq!(tokens[3].kind, TokenKind::String);
        assert_eq!(tokens[4].kind, TokenKind::String);
        assert_eq!(tokens[4].text, "X'0A'");
    }

    #[test]
    fn test_tokenize_skips_comments() {
        let sql = "id -- primary\n INTEGER /* note, with comma */ NOT NULL";
        let texts: Vec<_> = tokenize(sql).unwrap().iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["id", "INTEGER", "NOT", "NULL"]);
    }

    #[test]
    fn test_tokenize_numbers_and_punctuation() {
        assert_eq!(
            kinds("DEFAULT -1.5e3, x.y;"),
            vec![
                TokenKind::Ident,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::Dot,
                TokenKind::Ident,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_fails() {
        let err = tokenize("DEFAULT 'abc").unwrap_err();
        assert_eq!(err.offset, 8);
    }

    #[test]
    fn test_split_top_level_respects_parens() {
        let sql = "a varchar(10, 2), b CHECK (b IN (1, 2)), c";
        let tokens = tokenize(sql).unwrap();
        let parts: Vec<_> = split_top_level(&tokens)
            .into_iter()
            .map(|part| span(sql, part))
            .collect();
        assert_eq!(
            parts,
            vec!["a varchar(10, 2)", "b CHECK (b IN (1, 2))", "c"]
        );
    }

    #[test]
    fn test_names_ignores_string_literals() {
        let tokens = tokenize("\"Name\" 'name' name").unwrap();
        assert!(tokens[0].names("name"));
        assert!(!tokens[1].names("name"));
        assert!(tokens[2].names("NAME"));
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("my\"col"), "\"my\"\"col\"");
    }
}
