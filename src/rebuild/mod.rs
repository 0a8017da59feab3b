//! Rebuild-and-swap of one table inside an already open transaction.
//!
//! The physical steps run in a fixed order and each one moves the rebuild to
//! the next [`RebuildState`]. Any error moves it to `Failed` and is handed back
//! to the caller, who owns the transaction and rolls it back.

pub mod dependents;

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::Transaction,
    errors::{DbError, Phase, TransformError},
    models::{mapping::ColumnMapping, schema::TableSchema},
    schema::lexer::{quote_ident, quote_literal},
};

use self::dependents::Replay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildState {
    Planned,
    Staged,
    DataCopied,
    Swapped,
    DependentsRestored,
    Committed,
    Failed,
}

impl fmt::Display for RebuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildOptions {
    /// Keep the original table as `<table>_initial` instead of dropping it.
    pub keep_original: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    pub rows_copied: u64,
    pub dependents_restored: usize,
    pub backup_table: Option<String>,
}

pub struct Rebuilder<'t, T: Transaction + ?Sized> {
    tx: &'t mut T,
    source: &'t TableSchema,
    target: &'t TableSchema,
    mapping: &'t ColumnMapping,
    options: RebuildOptions,
    staging_name: String,
    state: RebuildState,
}

fn staging_name(table_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_tmp_{}", table_name, &suffix[..8])
}

/// Maps a store error raised while executing a structural statement.
fn rebuild_error(phase: Phase, err: DbError) -> TransformError {
    match err {
        DbError::Busy(reason) => TransformError::Busy { phase, reason },
        other => TransformError::Rebuild {
            phase,
            reason: other.to_string(),
        },
    }
}

impl<'t, T: Transaction + ?Sized> Rebuilder<'t, T> {
    pub fn new(
        tx: &'t mut T,
        source: &'t TableSchema,
        target: &'t TableSchema,
        mapping: &'t ColumnMapping,
        options: RebuildOptions,
    ) -> Self {
        Self {
            tx,
            source,
            target,
            mapping,
            options,
            staging_name: staging_name(&source.name),
            state: RebuildState::Planned,
        }
    }

    pub fn state(&self) -> RebuildState {
        self.state
    }

    pub async fn run(&mut self) -> Result<RebuildSummary, TransformError> {
        match self.drive().await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                warn!(
                    "rebuild of '{}' failed after reaching {}: {}",
                    self.source.name, self.state, err
                );
                self.state = RebuildState::Failed;
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<RebuildSummary, TransformError> {
        // Planned up front so an unrestorable dependent fails before any
        // rows are moved.
        let replays = dependents::plan(self.source, self.mapping)?;

        self.stage().await?;
        self.advance(RebuildState::Staged);

        let rows_copied = self.copy_data().await?;
        self.advance(RebuildState::DataCopied);

        let backup_table = self.swap().await?;
        self.advance(RebuildState::Swapped);

        self.restore_dependents(&replays).await?;
        self.advance(RebuildState::DependentsRestored);

        Ok(RebuildSummary {
            rows_copied,
            dependents_restored: replays.len(),
            backup_table,
        })
    }

    fn advance(&mut self, state: RebuildState) {
        debug!("rebuild of '{}': {} -> {}", self.source.name, self.state, state);
        self.state = state;
    }

    async fn stage(&mut self) -> Result<(), TransformError> {
        let exists = self
            .tx
            .object_exists(&self.staging_name)
            .await
            .map_err(|e| TransformError::store(Phase::Staged, e))?;
        if exists {
            return Err(TransformError::Rebuild {
                phase: Phase::Staged,
                reason: format!("staging table '{}' already exists", self.staging_name),
            });
        }

        let query = self.target.create_table_sql(&self.staging_name);
        self.tx
            .execute(&query)
            .await
            .map_err(|e| rebuild_error(Phase::Staged, e))?;
        Ok(())
    }

    async fn copy_data(&mut self) -> Result<u64, TransformError> {
        let expected = self
            .tx
            .count_rows(&self.source.name)
            .await
            .map_err(|e| TransformError::store(Phase::DataCopied, e))?;

        let (targets, sources) = self.mapping.projection(self.target);
        let query = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote_ident(&self.staging_name),
            targets.join(", "),
            sources.join(", "),
            quote_ident(&self.source.name)
        );
        let table = self.source.name.clone();
        let copied = self.tx.execute(&query).await.map_err(|e| match e {
            DbError::Constraint(reason) => TransformError::ConstraintViolation {
                table: table.clone(),
                reason,
            },
            other => rebuild_error(Phase::DataCopied, other),
        })?;

        if copied != expected as u64 {
            return Err(TransformError::ConstraintViolation {
                table,
                reason: format!("only {} of {} rows were copied", copied, expected),
            });
        }

        // Conflict clauses such as ON CONFLICT REPLACE delete rows while every
        // insert is still counted.
        let staged = self
            .tx
            .count_rows(&self.staging_name)
            .await
            .map_err(|e| TransformError::store(Phase::DataCopied, e))?;
        if staged != expected {
            return Err(TransformError::ConstraintViolation {
                table,
                reason: format!("{} of {} rows remain after the copy", staged, expected),
            });
        }
        Ok(staged as u64)
    }

    async fn swap(&mut self) -> Result<Option<String>, TransformError> {
        let source = quote_ident(&self.source.name);
        let mut statements = Vec::new();

        if self.source.uses_autoincrement() && self.target.uses_autoincrement() {
            let staged = quote_literal(&self.staging_name);
            statements.push(format!(
                "DELETE FROM sqlite_sequence WHERE name = {}",
                staged
            ));
            statements.push(format!(
                "INSERT INTO sqlite_sequence (name, seq) \
                 SELECT {}, seq FROM sqlite_sequence WHERE name = {}",
                staged,
                quote_literal(&self.source.name)
            ));
        }

        let backup_table = if self.options.keep_original {
            let backup = format!("{}_initial", self.source.name);
            let exists = self
                .tx
                .object_exists(&backup)
                .await
                .map_err(|e| TransformError::store(Phase::Swapped, e))?;
            if exists {
                return Err(TransformError::Rebuild {
                    phase: Phase::Swapped,
                    reason: format!("backup table '{}' already exists", backup),
                });
            }
            // Dependents move with a renamed table; free their names for the replay.
            for index in &self.source.indexes {
                statements.push(format!("DROP INDEX {}", quote_ident(&index.name)));
            }
            for trigger in &self.source.triggers {
                statements.push(format!("DROP TRIGGER {}", quote_ident(&trigger.name)));
            }
            statements.push(format!(
                "ALTER TABLE {} RENAME TO {}",
                source,
                quote_ident(&backup)
            ));
            Some(backup)
        } else {
            statements.push(format!("DROP TABLE {}", source));
            None
        };

        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&self.staging_name),
            source
        ));

        for statement in &statements {
            self.tx
                .execute(statement)
                .await
                .map_err(|e| rebuild_error(Phase::Swapped, e))?;
        }
        Ok(backup_table)
    }

    async fn restore_dependents(&mut self, replays: &[Replay]) -> Result<(), TransformError> {
        for replay in replays {
            debug!("restoring {:?} '{}'", replay.object_type, replay.name);
            self.tx.execute(&replay.sql).await.map_err(|e| match e {
                DbError::Busy(reason) => TransformError::Busy {
                    phase: Phase::DependentsRestored,
                    reason,
                },
                other => TransformError::DependentObject {
                    name: replay.name.clone(),
                    reason: other.to_string(),
                },
            })?;
        }
        Ok(())
    }
}
