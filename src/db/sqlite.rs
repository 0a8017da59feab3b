use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Column, Executor, Row, SqlitePool, TypeInfo, ValueRef,
};

use crate::{
    errors::{DbError, TransformError},
    models::{
        connections::ConnectionConfig,
        schema::{CatalogEntry, ObjectType, TableSchema},
    },
    schema::{lexer::quote_ident, reader},
};

use super::{DbClient, Transaction};

pub struct SqliteClient {
    pub pool: SqlitePool,
}

impl SqliteClient {
    /// Opens a single-connection pool. Foreign key enforcement is off so a
    /// referenced table can be dropped and recreated, and `legacy_alter_table`
    /// keeps renames from rewriting references held by other objects.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, DbError> {
        let options = if config.database_url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(&config.database_url)
                .map_err(|e| DbError::Config(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(&config.database_url)
        };
        let options = options
            .create_if_missing(config.create_if_missing)
            .foreign_keys(false)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("PRAGMA legacy_alter_table = ON").await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }
}

fn row_to_json(row: &SqliteRow) -> Value {
    let json_map = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value = match row.try_get_raw(i) {
                Ok(raw) if !raw.is_null() => {
                    let type_name = raw.type_info().name().to_string();
                    match type_name.as_str() {
                        "INTEGER" => row.try_get::<i64, _>(i).map(Value::from).ok(),
                        "REAL" => row.try_get::<f64, _>(i).map(Value::from).ok(),
                        "BLOB" => row.try_get::<Vec<u8>, _>(i).map(Value::from).ok(),
                        _ => row.try_get::<String, _>(i).map(Value::String).ok(),
                    }
                    .unwrap_or(Value::Null)
                }
                _ => Value::Null,
            };

            (column.name().to_string(), value)
        })
        .collect();

    Value::Object(json_map)
}

fn catalog_entry(row: (String, String, String, Option<String>)) -> Option<CatalogEntry> {
    let (object_type, name, tbl_name, sql) = row;
    Some(CatalogEntry {
        object_type: ObjectType::from_catalog(&object_type)?,
        name,
        tbl_name,
        sql,
    })
}

#[async_trait]
impl DbClient for SqliteClient {
    async fn execute(&self, query: &str) -> Result<(), DbError> {
        sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<Vec<serde_json::Value>, DbError> {
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    /// Takes the write lock up front, so a competing writer is reported before
    /// the schema is read.
    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, DbError> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| match DbError::from_sqlx(e) {
                busy @ DbError::Busy(_) => busy,
                other => DbError::Transaction(other.to_string()),
            })?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let query = r#"
            SELECT name
            FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
        "#;
        let tables: Vec<String> = sqlx::query_scalar(query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;

        Ok(tables)
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableSchema, TransformError> {
        // Read-only, so a plain deferred transaction.
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        let mut tx = SqliteTransaction { tx };
        let schema = reader::read_schema(&mut tx, table_name).await;
        Box::new(tx).rollback().await?;
        schema
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct SqliteTransaction<'a> {
    tx: sqlx::Transaction<'a, sqlx::Sqlite>,
}

#[async_trait]
impl<'a> Transaction for SqliteTransaction<'a> {
    async fn execute(&mut self, query: &str) -> Result<u64, DbError> {
        debug!("executing: {}", query);
        let result = sqlx::query(query)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn fetch_table(&mut self, table_name: &str) -> Result<Option<CatalogEntry>, DbError> {
        let row: Option<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT type, name, tbl_name, sql
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1 COLLATE NOCASE
            "#,
        )
        .bind(table_name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;

        Ok(row.and_then(catalog_entry))
    }

    async fn fetch_dependents(&mut self, table_name: &str) -> Result<Vec<CatalogEntry>, DbError> {
        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT type, name, tbl_name, sql
            FROM sqlite_master
            WHERE type IN ('index', 'trigger')
              AND tbl_name = ?1 COLLATE NOCASE
              AND sql IS NOT NULL
            ORDER BY rowid
            "#,
        )
        .bind(table_name)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;

        Ok(rows.into_iter().filter_map(catalog_entry).collect())
    }

    async fn object_exists(&mut self, name: &str) -> Result<bool, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE name = ?1 COLLATE NOCASE")
                .bind(name)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(DbError::from_sqlx)?;
        Ok(count > 0)
    }

    async fn count_rows(&mut self, table_name: &str) -> Result<i64, DbError> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table_name));
        let count: i64 = sqlx::query_scalar(&query)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await.map_err(|e| match DbError::from_sqlx(e) {
            busy @ DbError::Busy(_) => busy,
            other => DbError::Transaction(other.to_string()),
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_client() -> SqliteClient {
        SqliteClient::connect(&ConnectionConfig::new("sqlite::memory:"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_tables_skips_internal_tables() {
        let client = memory_client().await;
        client
            .execute("CREATE TABLE my_table (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)")
            .await
            .unwrap();
        client
            .execute("INSERT INTO my_table (name) VALUES ('abc')")
            .await
            .unwrap();
        client.execute("CREATE TABLE my_seat (id INTEGER)").await.unwrap();

        let tables = client.list_tables().await.unwrap();
        assert_eq!(tables, vec!["my_seat".to_string(), "my_table".to_string()]);
    }

    #[tokio::test]
    async fn test_describe_table() {
        let client = memory_client().await;
        client
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR(100) NOT NULL)")
            .await
            .unwrap();

        let schema = client.describe_table("users").await.unwrap();
        assert_eq!(schema.name, "users");
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[1].declared_type, "VARCHAR(100)");

        let missing = client.describe_table("orders").await;
        assert!(matches!(missing, Err(TransformError::TableNotFound { .. })));
    }

    #[tokio::test]
    async fn test_in_memory_catalog_queries() {
        let client = memory_client().await;
        client
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, avatar BLOB, score REAL)")
            .await
            .unwrap();
        client
            .execute("CREATE INDEX idx_users_name ON users (name)")
            .await
            .unwrap();
        client
            .execute("INSERT INTO users VALUES (1, 'Alice', x'00ff', 1.5), (2, NULL, NULL, NULL)")
            .await
            .unwrap();

        let rows = client.query("SELECT * FROM users ORDER BY id").await.unwrap();
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[0]["name"], "Alice");
        assert_eq!(rows[0]["avatar"], serde_json::json!([0, 255]));
        assert_eq!(rows[0]["score"], 1.5);
        assert!(rows[1]["name"].is_null());

        let mut tx = client.begin_transaction().await.unwrap();
        let table = tx.fetch_table("USERS").await.unwrap().unwrap();
        assert_eq!(table.name, "users");
        assert_eq!(table.object_type, ObjectType::Table);

        let dependents = tx.fetch_dependents("users").await.unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].name, "idx_users_name");

        assert!(tx.object_exists("idx_users_name").await.unwrap());
        assert!(!tx.object_exists("users_tmp").await.unwrap());
        assert_eq!(tx.count_rows("users").await.unwrap(), 2);
        tx.rollback().await.unwrap();
    }
}
