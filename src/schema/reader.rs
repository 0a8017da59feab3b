use log::debug;

use crate::{
    db::Transaction,
    errors::{Phase, TransformError},
    models::schema::{ObjectType, TableSchema},
};

use super::parser::{parse_create_table, parse_index, parse_trigger};

/// Reads the current definition of `table_name` and every index and trigger
/// attached to it. Nothing is written.
pub async fn read_schema<T>(tx: &mut T, table_name: &str) -> Result<TableSchema, TransformError>
where
    T: Transaction + ?Sized,
{
    let entry = tx
        .fetch_table(table_name)
        .await
        .map_err(|e| TransformError::store(Phase::SchemaRead, e))?
        .ok_or_else(|| TransformError::TableNotFound {
            table: table_name.to_string(),
        })?;
    let sql = entry
        .sql
        .ok_or_else(|| TransformError::parse(&entry.name, "catalog has no definition"))?;

    let mut schema = parse_create_table(&sql)?;
    // The catalog spelling wins over whatever the statement text says.
    schema.name = entry.name;

    let dependents = tx
        .fetch_dependents(&schema.name)
        .await
        .map_err(|e| TransformError::store(Phase::SchemaRead, e))?;
    for dependent in dependents {
        let Some(sql) = dependent.sql else { continue };
        match dependent.object_type {
            ObjectType::Index => schema.indexes.push(parse_index(&sql)?),
            ObjectType::Trigger => schema.triggers.push(parse_trigger(&sql)?),
            _ => {}
        }
    }

    debug!(
        "read schema of '{}': {} columns, {} indexes, {} triggers",
        schema.name,
        schema.columns.len(),
        schema.indexes.len(),
        schema.triggers.len()
    );
    Ok(schema)
}
