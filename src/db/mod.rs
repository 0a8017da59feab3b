use crate::{
    errors::{DbError, TransformError},
    models::schema::{CatalogEntry, TableSchema},
};
use async_trait::async_trait;

pub mod sqlite;

#[async_trait]
pub trait DbClient: Send + Sync {
    async fn execute(&self, query: &str) -> Result<(), DbError>;
    async fn query(&self, query: &str) -> Result<Vec<serde_json::Value>, DbError>;
    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, DbError>;
    async fn list_tables(&self) -> Result<Vec<String>, DbError>;
    async fn describe_table(&self, table_name: &str) -> Result<TableSchema, TransformError>;
    async fn close(&self);
}

/// One open transaction. Everything a transformation does to the store goes
/// through here, so nothing it does is visible before `commit`.
#[async_trait]
pub trait Transaction: Send {
    /// Runs a statement and returns the number of rows it affected.
    async fn execute(&mut self, query: &str) -> Result<u64, DbError>;
    /// The catalog row of the table named `table_name` (case-insensitive).
    async fn fetch_table(&mut self, table_name: &str) -> Result<Option<CatalogEntry>, DbError>;
    /// Indexes and triggers attached to `table_name`, in creation order.
    /// Entries without SQL (auto-indexes) are left out.
    async fn fetch_dependents(&mut self, table_name: &str) -> Result<Vec<CatalogEntry>, DbError>;
    /// Whether any catalog object is named `name` (case-insensitive).
    async fn object_exists(&mut self, name: &str) -> Result<bool, DbError>;
    async fn count_rows(&mut self, table_name: &str) -> Result<i64, DbError>;
    async fn commit(self: Box<Self>) -> Result<(), DbError>;
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
