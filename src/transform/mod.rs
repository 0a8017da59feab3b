//! The three column edits. Every function here is pure: it takes the schema
//! read from the catalog and returns the target schema plus the mapping that
//! drives the data copy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    errors::{Phase, TransformError},
    models::{
        mapping::{ColumnMapping, ColumnPair},
        schema::TableSchema,
    },
    schema::{
        lexer::{matching_paren, quote_ident, splice, tokenize, TokenKind},
        parser::{parse_column_definition, primary_key_columns},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    DropColumn { column: String },
    RenameColumn { from: String, to: String },
    ReplaceDefinition { column: String, definition: String },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::DropColumn { column } => write!(f, "drop column '{}'", column),
            Operation::RenameColumn { from, to } => {
                write!(f, "rename column '{}' to '{}'", from, to)
            }
            Operation::ReplaceDefinition { column, definition } => {
                write!(f, "replace definition of '{}' with '{}'", column, definition)
            }
        }
    }
}

pub fn apply(
    schema: &TableSchema,
    operation: &Operation,
) -> Result<(TableSchema, ColumnMapping), TransformError> {
    match operation {
        Operation::DropColumn { column } => drop_column(schema, column),
        Operation::RenameColumn { from, to } => rename_column(schema, from, to),
        Operation::ReplaceDefinition { column, definition } => {
            replace_definition(schema, column, definition)
        }
    }
}

fn column_not_found(schema: &TableSchema, column: &str) -> TransformError {
    TransformError::ColumnNotFound {
        table: schema.name.clone(),
        column: column.to_string(),
    }
}

fn index_of(schema: &TableSchema, column: &str) -> Result<usize, TransformError> {
    schema
        .columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(column))
        .ok_or_else(|| column_not_found(schema, column))
}

pub fn drop_column(
    schema: &TableSchema,
    name: &str,
) -> Result<(TableSchema, ColumnMapping), TransformError> {
    let index = index_of(schema, name)?;
    if schema.columns.len() == 1 {
        return Err(TransformError::Rebuild {
            phase: Phase::Transform,
            reason: format!("'{}' is the only column of '{}'", name, schema.name),
        });
    }

    let mut target = schema.clone();
    let dropped = target.columns.remove(index);
    for (position, column) in target.columns.iter_mut().enumerate() {
        column.position = position;
    }

    let mut mapping = ColumnMapping::identity(&target);
    mapping.dropped.push(dropped.name);
    Ok((target, mapping))
}

pub fn rename_column(
    schema: &TableSchema,
    old_name: &str,
    new_name: &str,
) -> Result<(TableSchema, ColumnMapping), TransformError> {
    let index = index_of(schema, old_name)?;
    if new_name.trim().is_empty() {
        return Err(TransformError::parse(old_name, "new column name is empty"));
    }
    let collides = schema
        .columns
        .iter()
        .enumerate()
        .any(|(i, column)| i != index && column.name.eq_ignore_ascii_case(new_name));
    if collides {
        return Err(TransformError::NameCollision {
            table: schema.name.clone(),
            column: new_name.to_string(),
        });
    }

    let old_name = schema.columns[index].name.clone();
    let mut target = schema.clone();
    target.columns[index].name = new_name.to_string();
    for column in target.columns.iter_mut() {
        column.definition = rewrite_column_refs(&column.definition, &old_name, new_name);
    }
    for constraint in target.constraints.iter_mut() {
        *constraint = rewrite_column_refs(constraint, &old_name, new_name);
    }

    let mut mapping = ColumnMapping::identity(schema);
    mapping.pairs[index] = ColumnPair {
        source: Some(old_name),
        target: new_name.to_string(),
    };
    Ok((target, mapping))
}

pub fn replace_definition(
    schema: &TableSchema,
    name: &str,
    definition: &str,
) -> Result<(TableSchema, ColumnMapping), TransformError> {
    let index = index_of(schema, name)?;
    let column_name = &schema.columns[index].name;

    let mut replacement = parse_column_definition(column_name, definition, index)?;
    replacement.primary_key |= schema
        .constraints
        .iter()
        .flat_map(|constraint| primary_key_columns(constraint))
        .any(|key| key.eq_ignore_ascii_case(column_name));

    let mut target = schema.clone();
    target.columns[index] = replacement;
    Ok((target, ColumnMapping::identity(schema)))
}

/// Rewrites references to `old` inside the parenthesised groups of `CHECK`,
/// `AS`, `PRIMARY KEY`, `UNIQUE` and `FOREIGN KEY`. Type names, defaults and
/// `REFERENCES` targets are left alone.
fn rewrite_column_refs(text: &str, old: &str, new: &str) -> String {
    let Ok(tokens) = tokenize(text) else {
        return text.to_string();
    };

    let mut positions = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        let open = if ["CHECK", "AS", "UNIQUE"].iter().any(|kw| token.is_keyword(kw)) {
            Some(i + 1)
        } else if (token.is_keyword("PRIMARY") || token.is_keyword("FOREIGN"))
            && tokens.get(i + 1).map_or(false, |t| t.is_keyword("KEY"))
        {
            Some(i + 2)
        } else {
            None
        };

        let group = open
            .filter(|&open| tokens.get(open).map(|t| t.kind) == Some(TokenKind::LParen))
            .and_then(|open| matching_paren(&tokens, open).map(|close| (open, close)));
        let Some((open, close)) = group else {
            i += 1;
            continue;
        };

        for j in open + 1..close {
            let qualified = tokens[j - 1].kind == TokenKind::Dot;
            let call = tokens.get(j + 1).map(|t| t.kind) == Some(TokenKind::LParen);
            let collation = tokens[j - 1].is_keyword("COLLATE");
            if tokens[j].names(old) && !qualified && !call && !collation {
                positions.push(j);
            }
        }
        i = close + 1;
    }

    if positions.is_empty() {
        text.to_string()
    } else {
        splice(text, &tokens, &positions, &quote_ident(new))
    }
}
