//! Structural parsing of `CREATE TABLE`, `CREATE INDEX` and `CREATE TRIGGER`
//! statements as stored in `sqlite_master`.
//!
//! Declared types and constraints are never interpreted. The parser only finds
//! where each column's name and definition start and end, and reads a few
//! flags (nullability, default, primary key) off the definition tokens.

use crate::errors::TransformError;
use crate::models::schema::{ColumnDefinition, IndexDefinition, TableSchema, TriggerDefinition};

use super::lexer::{matching_paren, span, split_top_level, tokenize, Token, TokenKind};

/// Keywords that end the declared type inside a column definition.
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
];

/// Keywords that open a table-level constraint.
const TABLE_CONSTRAINT_KEYWORDS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// Parses a `CREATE TABLE` statement. The returned schema has no dependents.
pub fn parse_create_table(sql: &str) -> Result<TableSchema, TransformError> {
    let tokens = tokenize(sql).map_err(|e| TransformError::parse("table", e.to_string()))?;
    let mut cursor = Cursor::new(&tokens);

    cursor.expect_keyword("CREATE", "table")?;
    cursor.eat_temp();
    if cursor.peek().map_or(false, |t| t.is_keyword("VIRTUAL")) {
        return Err(TransformError::parse(
            "table",
            "virtual tables cannot be rebuilt",
        ));
    }
    cursor.expect_keyword("TABLE", "table")?;
    cursor.eat_if_not_exists();
    let name = cursor.qualified_name("table")?;

    let open = cursor.position();
    match cursor.peek() {
        Some(token) if token.kind == TokenKind::LParen => {}
        Some(token) if token.is_keyword("AS") => {
            return Err(TransformError::parse(
                &name,
                "CREATE TABLE ... AS SELECT has no column definitions",
            ))
        }
        _ => return Err(TransformError::parse(&name, "expected '(' after table name")),
    }
    let close = matching_paren(&tokens, open)
        .ok_or_else(|| TransformError::parse(&name, "unbalanced parentheses"))?;

    let mut columns: Vec<ColumnDefinition> = Vec::new();
    let mut constraints = Vec::new();
    for element in split_top_level(&tokens[open + 1..close]) {
        let first = element
            .first()
            .ok_or_else(|| TransformError::parse(&name, "empty column definition"))?;

        if TABLE_CONSTRAINT_KEYWORDS.iter().any(|kw| first.is_keyword(kw)) {
            constraints.push(span(sql, element).to_string());
            continue;
        }

        let column_name = first
            .ident_value()
            .ok_or_else(|| TransformError::parse(&name, format!("unexpected '{}'", first.text)))?
            .into_owned();
        if columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&column_name))
        {
            return Err(TransformError::parse(
                &name,
                format!("duplicate column '{}'", column_name),
            ));
        }
        let definition = &element[1..];
        columns.push(column_from_tokens(
            column_name,
            span(sql, definition),
            definition,
            definition.first().map_or(0, |t| t.start),
            columns.len(),
        ));
    }

    if columns.is_empty() {
        return Err(TransformError::parse(&name, "table has no columns"));
    }

    for constraint in &constraints {
        for key in primary_key_columns(constraint) {
            if let Some(column) = columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&key))
            {
                column.primary_key = true;
            }
        }
    }

    let options = tokens[close + 1..]
        .iter()
        .take_while(|t| t.kind != TokenKind::Semicolon)
        .copied()
        .collect::<Vec<_>>();

    Ok(TableSchema {
        name,
        columns,
        constraints,
        options: span(sql, &options).to_string(),
        indexes: Vec::new(),
        triggers: Vec::new(),
    })
}

/// Builds a column from caller-supplied definition text.
pub fn parse_column_definition(
    name: &str,
    definition: &str,
    position: usize,
) -> Result<ColumnDefinition, TransformError> {
    let definition = definition.trim();
    let tokens = tokenize(definition).map_err(|e| TransformError::parse(name, e.to_string()))?;

    let mut depth = 0i32;
    for token in &tokens {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(TransformError::parse(name, "unbalanced parentheses"));
                }
            }
            TokenKind::Comma if depth == 0 => {
                return Err(TransformError::parse(
                    name,
                    "a column definition cannot contain a top-level ','",
                ))
            }
            TokenKind::Semicolon => {
                return Err(TransformError::parse(
                    name,
                    "a column definition cannot contain ';'",
                ))
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(TransformError::parse(name, "unbalanced parentheses"));
    }

    // Leading and trailing comments are dropped so none can swallow the
    // separator of the next table element.
    let base = tokens.first().map_or(0, |t| t.start);
    Ok(column_from_tokens(
        name.to_string(),
        span(definition, &tokens),
        &tokens,
        base,
        position,
    ))
}

/// `base` is the offset of `definition` within the text `tokens` were lexed from.
fn column_from_tokens(
    name: String,
    definition: &str,
    tokens: &[Token<'_>],
    base: usize,
    position: usize,
) -> ColumnDefinition {
    let text_of = |run: &[Token<'_>]| match (run.first(), run.last()) {
        (Some(first), Some(last)) => definition[first.start - base..last.end - base].to_string(),
        _ => String::new(),
    };

    let mut type_end = tokens.len();
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 && CONSTRAINT_KEYWORDS.iter().any(|kw| token.is_keyword(kw)) => {
                type_end = i;
                break;
            }
            _ => {}
        }
    }

    let mut column = ColumnDefinition {
        name,
        declared_type: text_of(&tokens[..type_end]),
        nullable: true,
        default: None,
        primary_key: false,
        generated: false,
        definition: definition.to_string(),
        position,
    };

    let mut i = type_end;
    while i < tokens.len() {
        let token = &tokens[i];
        match token.kind {
            TokenKind::LParen => {
                i = matching_paren(tokens, i).unwrap_or(tokens.len() - 1) + 1;
                continue;
            }
            _ if token.is_keyword("NOT")
                && tokens.get(i + 1).map_or(false, |t| t.is_keyword("NULL")) =>
            {
                column.nullable = false;
                i += 1;
            }
            _ if token.is_keyword("PRIMARY")
                && tokens.get(i + 1).map_or(false, |t| t.is_keyword("KEY")) =>
            {
                column.primary_key = true;
                i += 1;
            }
            _ if token.is_keyword("GENERATED") || token.is_keyword("AS") => {
                column.generated = true;
            }
            _ if token.is_keyword("DEFAULT") => {
                let (value, next) = default_expression(tokens, i + 1);
                column.default = Some(text_of(value));
                i = next;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    column
}

/// The default value starting at `start` and the index following it.
fn default_expression<'t, 's>(tokens: &'t [Token<'s>], start: usize) -> (&'t [Token<'s>], usize) {
    match tokens.get(start) {
        Some(token) if token.kind == TokenKind::LParen => {
            let end = matching_paren(tokens, start).unwrap_or(tokens.len() - 1);
            (&tokens[start..=end], end + 1)
        }
        Some(token) if token.text == "-" || token.text == "+" => {
            let end = (start + 1).min(tokens.len() - 1);
            (&tokens[start..=end], end + 1)
        }
        Some(_) => (&tokens[start..=start], start + 1),
        None => (&tokens[start..], start),
    }
}

/// Columns named by a table-level `PRIMARY KEY (...)` constraint.
pub(crate) fn primary_key_columns(constraint: &str) -> Vec<String> {
    let Ok(tokens) = tokenize(constraint) else {
        return Vec::new();
    };
    let Some(primary) = tokens.iter().position(|t| t.is_keyword("PRIMARY")) else {
        return Vec::new();
    };
    let open = primary + 2;
    if tokens.get(open).map(|t| t.kind) != Some(TokenKind::LParen) {
        return Vec::new();
    }
    let Some(close) = matching_paren(&tokens, open) else {
        return Vec::new();
    };
    split_top_level(&tokens[open + 1..close])
        .into_iter()
        .filter_map(|item| item.first().and_then(|t| t.ident_value()))
        .map(|name| name.into_owned())
        .collect()
}

/// Parses a `CREATE [UNIQUE] INDEX` statement.
pub fn parse_index(sql: &str) -> Result<IndexDefinition, TransformError> {
    let tokens = tokenize(sql).map_err(|e| TransformError::parse("index", e.to_string()))?;
    let mut cursor = Cursor::new(&tokens);

    cursor.expect_keyword("CREATE", "index")?;
    let is_unique = cursor.eat_keyword("UNIQUE");
    cursor.expect_keyword("INDEX", "index")?;
    cursor.eat_if_not_exists();
    let name = cursor.qualified_name("index")?;
    cursor.expect_keyword("ON", &name)?;
    cursor.qualified_name(&name)?;

    let open = cursor.position();
    if cursor.peek().map(|t| t.kind) != Some(TokenKind::LParen) {
        return Err(TransformError::parse(&name, "expected indexed column list"));
    }
    let close = matching_paren(&tokens, open)
        .ok_or_else(|| TransformError::parse(&name, "unbalanced parentheses"))?;

    let columns = split_top_level(&tokens[open + 1..close])
        .into_iter()
        .filter_map(|item| {
            let first = item.first()?;
            let plain = item[1..].iter().all(|t| {
                t.is_keyword("ASC") || t.is_keyword("DESC") || t.is_keyword("COLLATE")
            }) || item.get(1).map_or(false, |t| t.is_keyword("COLLATE"));
            if plain && matches!(first.kind, TokenKind::Ident | TokenKind::QuotedIdent) {
                first.ident_value().map(|v| v.into_owned())
            } else {
                None
            }
        })
        .collect();

    Ok(IndexDefinition {
        name,
        columns,
        is_unique,
        sql: sql.to_string(),
    })
}

/// Parses a `CREATE TRIGGER` statement far enough to know its name.
pub fn parse_trigger(sql: &str) -> Result<TriggerDefinition, TransformError> {
    let tokens = tokenize(sql).map_err(|e| TransformError::parse("trigger", e.to_string()))?;
    let mut cursor = Cursor::new(&tokens);

    cursor.expect_keyword("CREATE", "trigger")?;
    cursor.eat_temp();
    cursor.expect_keyword("TRIGGER", "trigger")?;
    cursor.eat_if_not_exists();
    let name = cursor.qualified_name("trigger")?;

    if !tokens.iter().any(|t| t.is_keyword("BEGIN")) || !tokens.iter().any(|t| t.is_keyword("END")) {
        return Err(TransformError::parse(&name, "trigger body must be BEGIN ... END"));
    }

    Ok(TriggerDefinition {
        name,
        sql: sql.to_string(),
    })
}

struct Cursor<'t, 's> {
    tokens: &'t [Token<'s>],
    pos: usize,
}

impl<'t, 's> Cursor<'t, 's> {
    fn new(tokens: &'t [Token<'s>]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<&'t Token<'s>> {
        self.tokens.get(self.pos)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str, object: &str) -> Result<(), TransformError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            let found = self.peek().map_or("end of input", |t| t.text);
            Err(TransformError::parse(
                object,
                format!("expected {} but found '{}'", keyword, found),
            ))
        }
    }

    fn eat_temp(&mut self) {
        if !self.eat_keyword("TEMP") {
            self.eat_keyword("TEMPORARY");
        }
    }

    fn eat_if_not_exists(&mut self) {
        let matches = ["IF", "NOT", "EXISTS"]
            .iter()
            .enumerate()
            .all(|(i, kw)| self.tokens.get(self.pos + i).map_or(false, |t| t.is_keyword(kw)));
        if matches {
            self.pos += 3;
        }
    }

    /// Reads `name` or `schema.name` and returns the unqualified name.
    fn qualified_name(&mut self, object: &str) -> Result<String, TransformError> {
        let mut name = self.name(object)?;
        if self.peek().map(|t| t.kind) == Some(TokenKind::Dot) {
            self.pos += 1;
            name = self.name(object)?;
        }
        Ok(name)
    }

    fn name(&mut self, object: &str) -> Result<String, TransformError> {
        let token = self
            .peek()
            .ok_or_else(|| TransformError::parse(object, "missing name"))?;
        let value = token
            .ident_value()
            .ok_or_else(|| TransformError::parse(object, format!("invalid name '{}'", token.text)))?;
        self.pos += 1;
        Ok(value.into_owned())
    }
}
