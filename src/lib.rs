use db::{sqlite::SqliteClient, DbClient};
use errors::TransformError;
use guard::TransformReport;
use models::{connections::ConnectionConfig, schema::TableSchema};
use rebuild::RebuildOptions;
use transform::Operation;

pub mod client;
pub mod db;
pub mod errors;
pub mod guard;
pub mod models;
pub mod rebuild;
pub mod schema;
pub mod transform;

/// Column surgery on one table of a SQLite database.
pub struct Squeak {
    client: Box<dyn DbClient>,
    table_name: String,
}

impl Squeak {
    /// Connects and checks that `table_name` exists and can be parsed.
    pub async fn open(config: &ConnectionConfig, table_name: &str) -> Result<Self, TransformError> {
        let client = SqliteClient::connect(config).await?;
        Self::with_client(Box::new(client), table_name).await
    }

    pub async fn with_client(
        client: Box<dyn DbClient>,
        table_name: &str,
    ) -> Result<Self, TransformError> {
        let schema = match client.describe_table(table_name).await {
            Ok(schema) => schema,
            Err(err) => {
                client.close().await;
                return Err(err);
            }
        };

        Ok(Self {
            client,
            table_name: schema.name,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn client(&self) -> &dyn DbClient {
        self.client.as_ref()
    }

    pub async fn schema(&self) -> Result<TableSchema, TransformError> {
        self.client.describe_table(&self.table_name).await
    }

    pub async fn drop_column(
        &self,
        column: &str,
        safe: bool,
    ) -> Result<TransformReport, TransformError> {
        let operation = Operation::DropColumn {
            column: column.to_string(),
        };
        self.apply(&operation, safe).await
    }

    pub async fn rename_column(
        &self,
        old_column: &str,
        new_column: &str,
        safe: bool,
    ) -> Result<TransformReport, TransformError> {
        let operation = Operation::RenameColumn {
            from: old_column.to_string(),
            to: new_column.to_string(),
        };
        self.apply(&operation, safe).await
    }

    /// Replaces everything after the column name, e.g. to add or drop
    /// constraints.
    pub async fn replace_definition(
        &self,
        column: &str,
        definition: &str,
        safe: bool,
    ) -> Result<TransformReport, TransformError> {
        let operation = Operation::ReplaceDefinition {
            column: column.to_string(),
            definition: definition.to_string(),
        };
        self.apply(&operation, safe).await
    }

    pub async fn apply(
        &self,
        operation: &Operation,
        safe: bool,
    ) -> Result<TransformReport, TransformError> {
        let options = RebuildOptions {
            keep_original: safe,
        };
        guard::run_transformation(self.client.as_ref(), &self.table_name, operation, options).await
    }

    pub async fn close(self) {
        self.client.close().await;
    }
}
