//! Decides how each captured index and trigger is recreated after the swap.

use crate::{
    errors::TransformError,
    models::{
        mapping::ColumnMapping,
        schema::{ObjectType, TableSchema},
    },
    schema::lexer::{matching_paren, quote_ident, splice, tokenize, Token, TokenKind},
};

/// A statement recreating one dependent object.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    pub name: String,
    pub object_type: ObjectType,
    pub sql: String,
}

/// Builds the replay statements for every dependent of `source`.
///
/// Objects that do not mention an altered column replay verbatim. Index
/// references to a renamed column are rewritten. Trigger references are only
/// rewritten when they are unambiguous (`NEW.x`, `OLD.x`, `<table>.x` or the
/// `UPDATE OF` list). Anything referencing a dropped column fails.
pub fn plan(source: &TableSchema, mapping: &ColumnMapping) -> Result<Vec<Replay>, TransformError> {
    let mut replays = Vec::with_capacity(source.indexes.len() + source.triggers.len());

    for index in &source.indexes {
        let mut sql = index.sql.clone();
        for dropped in &mapping.dropped {
            if !index_references(&index.name, &sql, dropped)?.is_empty() {
                return Err(TransformError::DependentObject {
                    name: index.name.clone(),
                    reason: format!("index references dropped column '{}'", dropped),
                });
            }
        }
        for (old, new) in mapping.renamed() {
            let positions = index_references(&index.name, &sql, old)?;
            if !positions.is_empty() {
                let tokens = lex(&index.name, &sql)?;
                sql = splice(&sql, &tokens, &positions, &quote_ident(new));
            }
        }
        replays.push(Replay {
            name: index.name.clone(),
            object_type: ObjectType::Index,
            sql,
        });
    }

    for trigger in &source.triggers {
        let mut sql = trigger.sql.clone();
        for dropped in &mapping.dropped {
            let refs = trigger_references(&trigger.name, &sql, &source.name, dropped)?;
            if !refs.qualified.is_empty() || refs.ambiguous {
                return Err(TransformError::DependentObject {
                    name: trigger.name.clone(),
                    reason: format!("trigger references dropped column '{}'", dropped),
                });
            }
        }
        for (old, new) in mapping.renamed() {
            let refs = trigger_references(&trigger.name, &sql, &source.name, old)?;
            if refs.ambiguous {
                return Err(TransformError::DependentObject {
                    name: trigger.name.clone(),
                    reason: format!(
                        "trigger has an unqualified reference to renamed column '{}'",
                        old
                    ),
                });
            }
            if !refs.qualified.is_empty() {
                let tokens = lex(&trigger.name, &sql)?;
                sql = splice(&sql, &tokens, &refs.qualified, &quote_ident(new));
            }
        }
        replays.push(Replay {
            name: trigger.name.clone(),
            object_type: ObjectType::Trigger,
            sql,
        });
    }

    Ok(replays)
}

fn lex<'s>(name: &str, sql: &'s str) -> Result<Vec<Token<'s>>, TransformError> {
    tokenize(sql).map_err(|e| TransformError::parse(name, e.to_string()))
}

fn is_column_use(tokens: &[Token<'_>], j: usize, column: &str) -> bool {
    let call = tokens.get(j + 1).map(|t| t.kind) == Some(TokenKind::LParen);
    let collation = j > 0 && tokens[j - 1].is_keyword("COLLATE");
    tokens[j].names(column) && !call && !collation
}

/// Token positions in an index definition naming `column`.
fn index_references(name: &str, sql: &str, column: &str) -> Result<Vec<usize>, TransformError> {
    let tokens = lex(name, sql)?;
    let on = tokens
        .iter()
        .position(|t| t.is_keyword("ON"))
        .ok_or_else(|| TransformError::parse(name, "index has no ON clause"))?;
    let body = skip_qualified_name(&tokens, on + 1);

    Ok((body..tokens.len())
        .filter(|&j| is_column_use(&tokens, j, column))
        .collect())
}

#[derive(Debug, Default)]
struct TriggerRefs {
    /// Positions that certainly name the table's column.
    qualified: Vec<usize>,
    /// Set when some reference could belong to another table.
    ambiguous: bool,
}

fn trigger_references(
    name: &str,
    sql: &str,
    table: &str,
    column: &str,
) -> Result<TriggerRefs, TransformError> {
    let tokens = lex(name, sql)?;
    let keyword = tokens
        .iter()
        .position(|t| t.is_keyword("TRIGGER"))
        .ok_or_else(|| TransformError::parse(name, "not a trigger definition"))?;
    let mut start = keyword + 1;
    if tokens.get(start).map_or(false, |t| t.is_keyword("IF")) {
        start += 3;
    }
    let start = skip_qualified_name(&tokens, start);

    let begin = tokens
        .iter()
        .position(|t| t.is_keyword("BEGIN"))
        .unwrap_or(tokens.len());
    let on = tokens[..begin]
        .iter()
        .rposition(|t| t.is_keyword("ON"))
        .unwrap_or(begin);
    let header_table = on + 1..skip_qualified_name(&tokens, on + 1);
    let update_of = tokens[start..on]
        .iter()
        .position(|t| t.is_keyword("OF"))
        .map(|of| start + of + 1..on);

    let targets = write_targets(&tokens, begin);

    let mut refs = TriggerRefs::default();
    for j in start..tokens.len() {
        if header_table.contains(&j) || !is_column_use(&tokens, j, column) {
            continue;
        }
        if tokens.get(j + 1).map(|t| t.kind) == Some(TokenKind::Dot) {
            // A qualifier, not a column.
            continue;
        }
        if j >= 2 && tokens[j - 1].kind == TokenKind::Dot {
            let qualifier = &tokens[j - 2];
            if qualifier.is_keyword("NEW") || qualifier.is_keyword("OLD") || qualifier.names(table)
            {
                refs.qualified.push(j);
            }
            continue;
        }
        if let Some(&(_, owner)) = targets.iter().find(|(position, _)| *position == j) {
            if tokens[owner].names(table) {
                refs.qualified.push(j);
            }
            continue;
        }
        if update_of.as_ref().map_or(false, |list| list.contains(&j)) {
            refs.qualified.push(j);
            continue;
        }
        refs.ambiguous = true;
    }

    Ok(refs)
}

/// Columns written by `INSERT INTO t (...)` and `UPDATE t SET ...` in a
/// trigger body, paired with the position of the table name `t`.
fn write_targets(tokens: &[Token<'_>], begin: usize) -> Vec<(usize, usize)> {
    let mut targets = Vec::new();
    let mut i = begin;
    while i < tokens.len() {
        if tokens[i].is_keyword("INTO") {
            let owner = table_position(tokens, i + 1);
            let mut open = skip_qualified_name(tokens, i + 1);
            if tokens.get(open).map_or(false, |t| t.is_keyword("AS")) {
                open += 2;
            }
            if tokens.get(open).map(|t| t.kind) == Some(TokenKind::LParen) {
                if let Some(close) = matching_paren(tokens, open) {
                    targets.extend((open + 1..close).map(|j| (j, owner)));
                    i = close;
                }
            }
        } else if tokens[i].is_keyword("UPDATE") {
            let mut name = i + 1;
            if tokens.get(name).map_or(false, |t| t.is_keyword("OR")) {
                name += 2;
            }
            let owner = table_position(tokens, name);
            let set = skip_qualified_name(tokens, name);
            if tokens.get(set).map_or(false, |t| t.is_keyword("SET")) {
                i = set_targets(tokens, set + 1, owner, &mut targets);
                continue;
            }
        }
        i += 1;
    }
    targets
}

/// Collects the assignment targets of a `SET` list starting at `i` and
/// returns the position where the list ends.
fn set_targets(
    tokens: &[Token<'_>],
    mut i: usize,
    owner: usize,
    targets: &mut Vec<(usize, usize)>,
) -> usize {
    let mut depth = 0usize;
    let mut expect_target = true;
    while i < tokens.len() {
        let token = &tokens[i];
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            TokenKind::Comma if depth == 0 => {
                expect_target = true;
                i += 1;
                continue;
            }
            TokenKind::Semicolon => break,
            _ if depth == 0
                && ["WHERE", "FROM", "RETURNING"]
                    .iter()
                    .any(|kw| token.is_keyword(kw)) =>
            {
                break
            }
            _ => {}
        }
        if expect_target {
            if depth == 0 && matches!(token.kind, TokenKind::Ident | TokenKind::QuotedIdent) {
                targets.push((i, owner));
            }
            expect_target = false;
        }
        i += 1;
    }
    i
}

/// Position of the table name in `name` or `schema.name` starting at `i`.
fn table_position(tokens: &[Token<'_>], i: usize) -> usize {
    if tokens.get(i + 1).map(|t| t.kind) == Some(TokenKind::Dot) {
        (i + 2).min(tokens.len().saturating_sub(1))
    } else {
        i.min(tokens.len().saturating_sub(1))
    }
}

/// Index just past `name` or `schema.name` starting at `i`.
fn skip_qualified_name(tokens: &[Token<'_>], i: usize) -> usize {
    if tokens.get(i + 1).map(|t| t.kind) == Some(TokenKind::Dot) {
        (i + 3).min(tokens.len())
    } else {
        (i + 1).min(tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::{parse_create_table, parse_index, parse_trigger};
    use crate::transform::{drop_column, rename_column, replace_definition};

    fn schema_with(indexes: &[&str], triggers: &[&str]) -> TableSchema {
        let mut schema = parse_create_table(
            "CREATE TABLE my_table (id INTEGER PRIMARY KEY, name TEXT, email TEXT)",
        )
        .unwrap();
        schema.indexes = indexes.iter().map(|sql| parse_index(sql).unwrap()).collect();
        schema.triggers = triggers.iter().map(|sql| parse_trigger(sql).unwrap()).collect();
        schema
    }

    #[test]
    fn test_untouched_dependents_replay_verbatim() {
        let index = "CREATE INDEX idx_email ON my_table (email)";
        let trigger = "CREATE TRIGGER touch AFTER UPDATE ON my_table BEGIN \
                       UPDATE audit SET at = NEW.email; END";
        let schema = schema_with(&[index], &[trigger]);
        let (_, mapping) = drop_column(&schema, "name").unwrap();

        let replays = plan(&schema, &mapping).unwrap();
        assert_eq!(replays.len(), 2);
        assert_eq!(replays[0].sql, index);
        assert_eq!(replays[1].sql, trigger);
        assert_eq!(replays[1].object_type, ObjectType::Trigger);
    }

    #[test]
    fn test_index_on_dropped_column_fails() {
        let schema = schema_with(&["CREATE INDEX idx_name ON my_table (lower(name))"], &[]);
        let (_, mapping) = drop_column(&schema, "name").unwrap();

        let err = plan(&schema, &mapping).unwrap_err();
        assert!(matches!(err, TransformError::DependentObject { ref name, .. } if name == "idx_name"));
    }

    #[test]
    fn test_index_on_renamed_column_is_rewritten() {
        let schema = schema_with(
            &["CREATE UNIQUE INDEX idx_name ON my_table (name COLLATE NOCASE) WHERE name <> ''"],
            &[],
        );
        let (_, mapping) = rename_column(&schema, "name", "first_name").unwrap();

        let replays = plan(&schema, &mapping).unwrap();
        assert_eq!(
            replays[0].sql,
            "CREATE UNIQUE INDEX idx_name ON my_table (\"first_name\" COLLATE NOCASE) \
             WHERE \"first_name\" <> ''"
        );
    }

    #[test]
    fn test_trigger_qualified_references_are_rewritten() {
        let schema = schema_with(
            &[],
            &["CREATE TRIGGER audit_name AFTER UPDATE OF name ON my_table BEGIN \
               INSERT INTO audit (old_value, new_value) VALUES (OLD.name, NEW.name); END"],
        );
        let (_, mapping) = rename_column(&schema, "name", "first_name").unwrap();

        let replays = plan(&schema, &mapping).unwrap();
        assert_eq!(
            replays[0].sql,
            "CREATE TRIGGER audit_name AFTER UPDATE OF \"first_name\" ON my_table BEGIN \
             INSERT INTO audit (old_value, new_value) VALUES (OLD.\"first_name\", NEW.\"first_name\"); END"
        );
    }

    #[test]
    fn test_trigger_unqualified_reference_fails_rename() {
        let schema = schema_with(
            &[],
            &["CREATE TRIGGER copy_name AFTER INSERT ON my_table BEGIN \
               UPDATE mirror SET label = name WHERE id = NEW.id; END"],
        );
        let (_, mapping) = rename_column(&schema, "name", "first_name").unwrap();
        assert!(matches!(
            plan(&schema, &mapping),
            Err(TransformError::DependentObject { .. })
        ));
    }

    #[test]
    fn test_other_tables_write_targets_do_not_block() {
        let trigger = "CREATE TRIGGER t_log AFTER INSERT ON my_table BEGIN \
                       INSERT INTO log (name, at) VALUES ('inserted', 1); \
                       UPDATE mirror SET name = 'x', email = NEW.email WHERE id = NEW.id; END";
        let schema = schema_with(&[], &[trigger]);

        let (_, mapping) = drop_column(&schema, "name").unwrap();
        assert_eq!(plan(&schema, &mapping).unwrap()[0].sql, trigger);

        let (_, mapping) = rename_column(&schema, "name", "first_name").unwrap();
        assert_eq!(plan(&schema, &mapping).unwrap()[0].sql, trigger);
    }

    #[test]
    fn test_own_table_write_targets_are_rewritten() {
        let schema = schema_with(
            &[],
            &["CREATE TRIGGER fill AFTER INSERT ON my_table BEGIN \
               UPDATE my_table SET name = 'x' WHERE id = NEW.id; END"],
        );

        let (_, mapping) = rename_column(&schema, "name", "first_name").unwrap();
        assert_eq!(
            plan(&schema, &mapping).unwrap()[0].sql,
            "CREATE TRIGGER fill AFTER INSERT ON my_table BEGIN \
             UPDATE my_table SET \"first_name\" = 'x' WHERE id = NEW.id; END"
        );

        let (_, mapping) = drop_column(&schema, "name").unwrap();
        assert!(plan(&schema, &mapping).is_err());
    }

    #[test]
    fn test_trigger_on_dropped_column_fails() {
        let schema = schema_with(
            &[],
            &["CREATE TRIGGER t AFTER INSERT ON my_table BEGIN SELECT NEW.name; END"],
        );
        let (_, mapping) = drop_column(&schema, "name").unwrap();
        assert!(plan(&schema, &mapping).is_err());
    }

    #[test]
    fn test_replace_definition_keeps_everything() {
        let index = "CREATE INDEX idx_name ON my_table (name)";
        let schema = schema_with(&[index], &[]);
        let (_, mapping) = replace_definition(&schema, "name", "TEXT NOT NULL").unwrap();

        let replays = plan(&schema, &mapping).unwrap();
        assert_eq!(replays[0].sql, index);
    }
}
