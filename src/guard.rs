use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    db::{DbClient, Transaction},
    errors::{Phase, TransformError},
    rebuild::{RebuildOptions, RebuildState, Rebuilder},
    schema::reader,
    transform::{self, Operation},
};

/// Outcome of a committed transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    pub table: String,
    pub operation: Operation,
    pub rows_copied: u64,
    pub dependents_restored: usize,
    pub backup_table: Option<String>,
    pub state: RebuildState,
}

/// Applies `operation` to `table_name` atomically: either every step commits
/// together or the transaction is rolled back and the table is untouched.
pub async fn run_transformation<C>(
    client: &C,
    table_name: &str,
    operation: &Operation,
    options: RebuildOptions,
) -> Result<TransformReport, TransformError>
where
    C: DbClient + ?Sized,
{
    let tx = client
        .begin_transaction()
        .await
        .map_err(|e| TransformError::store(Phase::SchemaRead, e))?;
    run_in_transaction(tx, table_name, operation, options).await
}

/// Runs the whole pipeline on `tx`, then commits it or rolls it back.
pub async fn run_in_transaction<'a>(
    mut tx: Box<dyn Transaction + 'a>,
    table_name: &str,
    operation: &Operation,
    options: RebuildOptions,
) -> Result<TransformReport, TransformError> {
    match transform_table(&mut *tx, table_name, operation, options).await {
        Ok(mut report) => {
            tx.commit()
                .await
                .map_err(|e| TransformError::store(Phase::Committed, e))?;
            report.state = RebuildState::Committed;
            info!(
                "{} on '{}' committed: {} rows copied, {} dependents restored",
                operation, report.table, report.rows_copied, report.dependents_restored
            );
            Ok(report)
        }
        Err(err) => {
            warn!("{} on '{}' rolled back: {}", operation, table_name, err);
            if let Err(rollback_err) = tx.rollback().await {
                error!("rollback of '{}' failed: {}", table_name, rollback_err);
            }
            Err(err)
        }
    }
}

async fn transform_table<T>(
    tx: &mut T,
    table_name: &str,
    operation: &Operation,
    options: RebuildOptions,
) -> Result<TransformReport, TransformError>
where
    T: Transaction + ?Sized,
{
    let source = reader::read_schema(tx, table_name).await?;
    let (target, mapping) = transform::apply(&source, operation)?;

    let mut rebuilder = Rebuilder::new(tx, &source, &target, &mapping, options);
    let summary = rebuilder.run().await?;

    Ok(TransformReport {
        table: source.name.clone(),
        operation: operation.clone(),
        rows_copied: summary.rows_copied,
        dependents_restored: summary.dependents_restored,
        backup_table: summary.backup_table,
        state: rebuilder.state(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DbError;
    use crate::models::schema::{CatalogEntry, ObjectType};
    use async_trait::async_trait;
    use mockall::{mock, predicate};

    mock! {
        pub Transaction {}

        #[async_trait]
        impl Transaction for Transaction {
            async fn execute(&mut self, query: &str) -> Result<u64, DbError>;
            async fn fetch_table(&mut self, table_name: &str) -> Result<Option<CatalogEntry>, DbError>;
            async fn fetch_dependents(&mut self, table_name: &str) -> Result<Vec<CatalogEntry>, DbError>;
            async fn object_exists(&mut self, name: &str) -> Result<bool, DbError>;
            async fn count_rows(&mut self, table_name: &str) -> Result<i64, DbError>;
            async fn commit(self: Box<Self>) -> Result<(), DbError>;
            async fn rollback(self: Box<Self>) -> Result<(), DbError>;
        }
    }

    const MY_TABLE: &str = r#"CREATE TABLE "my_table" (
    "id" integer NOT NULL PRIMARY KEY,
    "name" varchar (20) NOT NULL DEFAULT ""
)"#;

    /// Catalog for `my_table` holding two rows; the staged copy reports `staged_rows`.
    fn catalog_mock(staged_rows: i64) -> MockTransaction {
        let mut mock_tx = MockTransaction::new();
        mock_tx
            .expect_fetch_table()
            .with(predicate::eq("my_table"))
            .returning(|_| {
                Ok(Some(CatalogEntry {
                    object_type: ObjectType::Table,
                    name: "my_table".to_string(),
                    tbl_name: "my_table".to_string(),
                    sql: Some(MY_TABLE.to_string()),
                }))
            });
        mock_tx.expect_fetch_dependents().returning(|_| {
            Ok(vec![CatalogEntry {
                object_type: ObjectType::Index,
                name: "idx_id".to_string(),
                tbl_name: "my_table".to_string(),
                sql: Some("CREATE INDEX idx_id ON my_table (id)".to_string()),
            }])
        });
        mock_tx.expect_object_exists().returning(|_| Ok(false));
        mock_tx
            .expect_count_rows()
            .returning(move |table| Ok(if table.contains("_tmp_") { staged_rows } else { 2 }));
        mock_tx
    }

    #[tokio::test]
    async fn test_commit_after_all_steps() {
        let mut mock_tx = catalog_mock(2);
        mock_tx
            .expect_execute()
            .returning(|query| Ok(if query.starts_with("INSERT") { 2 } else { 0 }));
        mock_tx.expect_commit().times(1).returning(|| Ok(()));
        mock_tx.expect_rollback().never();

        let operation = Operation::DropColumn {
            column: "name".to_string(),
        };
        let report = run_in_transaction(
            Box::new(mock_tx),
            "my_table",
            &operation,
            RebuildOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.table, "my_table");
        assert_eq!(report.rows_copied, 2);
        assert_eq!(report.dependents_restored, 1);
        assert_eq!(report.backup_table, None);
        assert_eq!(report.state, RebuildState::Committed);
    }

    #[tokio::test]
    async fn test_constraint_violation_rolls_back() {
        let mut mock_tx = catalog_mock(2);
        mock_tx.expect_execute().returning(|query| {
            if query.starts_with("INSERT") {
                Err(DbError::Constraint("NOT NULL constraint failed".to_string()))
            } else {
                Ok(0)
            }
        });
        mock_tx.expect_commit().never();
        mock_tx.expect_rollback().times(1).returning(|| Ok(()));

        let operation = Operation::ReplaceDefinition {
            column: "name".to_string(),
            definition: "varchar (20) NOT NULL".to_string(),
        };
        let err = run_in_transaction(
            Box::new(mock_tx),
            "my_table",
            &operation,
            RebuildOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransformError::ConstraintViolation { .. }));
        assert_eq!(err.phase(), Some(Phase::DataCopied));
    }

    #[tokio::test]
    async fn test_short_copy_is_a_violation() {
        let mut mock_tx = catalog_mock(2);
        mock_tx
            .expect_execute()
            .returning(|query| Ok(if query.starts_with("INSERT") { 1 } else { 0 }));
        mock_tx.expect_rollback().times(1).returning(|| Ok(()));

        let operation = Operation::RenameColumn {
            from: "name".to_string(),
            to: "first_name".to_string(),
        };
        let err = run_in_transaction(
            Box::new(mock_tx),
            "my_table",
            &operation,
            RebuildOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransformError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_rows_lost_to_conflict_clause_are_a_violation() {
        let mut mock_tx = catalog_mock(1);
        mock_tx
            .expect_execute()
            .returning(|query| Ok(if query.starts_with("INSERT") { 2 } else { 0 }));
        mock_tx.expect_commit().never();
        mock_tx.expect_rollback().times(1).returning(|| Ok(()));

        let operation = Operation::ReplaceDefinition {
            column: "name".to_string(),
            definition: "varchar (20) UNIQUE ON CONFLICT REPLACE".to_string(),
        };
        let err = run_in_transaction(
            Box::new(mock_tx),
            "my_table",
            &operation,
            RebuildOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransformError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_busy_during_swap_rolls_back() {
        let mut mock_tx = catalog_mock(2);
        mock_tx.expect_execute().returning(|query| {
            if query.starts_with("DROP TABLE") {
                Err(DbError::Busy("database is locked".to_string()))
            } else if query.starts_with("INSERT") {
                Ok(2)
            } else {
                Ok(0)
            }
        });
        mock_tx.expect_rollback().times(1).returning(|| Ok(()));

        let operation = Operation::DropColumn {
            column: "name".to_string(),
        };
        let err = run_in_transaction(
            Box::new(mock_tx),
            "my_table",
            &operation,
            RebuildOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            TransformError::Busy {
                phase: Phase::Swapped,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_table_rolls_back_without_writes() {
        let mut mock_tx = MockTransaction::new();
        mock_tx.expect_fetch_table().returning(|_| Ok(None));
        mock_tx.expect_execute().never();
        mock_tx.expect_rollback().times(1).returning(|| Ok(()));

        let operation = Operation::DropColumn {
            column: "name".to_string(),
        };
        let err = run_in_transaction(
            Box::new(mock_tx),
            "missing",
            &operation,
            RebuildOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransformError::TableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_original_error() {
        let mut mock_tx = catalog_mock(2);
        mock_tx.expect_execute().never();
        mock_tx
            .expect_rollback()
            .times(1)
            .returning(|| Err(DbError::Transaction("connection lost".to_string())));

        let operation = Operation::RenameColumn {
            from: "name".to_string(),
            to: "id".to_string(),
        };
        let err = run_in_transaction(
            Box::new(mock_tx),
            "my_table",
            &operation,
            RebuildOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransformError::NameCollision { .. }));
    }
}
