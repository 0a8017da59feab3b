use std::fmt;

use thiserror::Error;

/// SQLite primary result codes the engine distinguishes.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// Custom error type for store operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Error that occurs during database interactions (e.g., SQL query failure).
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// The database file is locked by another writer.
    #[error("Database is busy: {0}")]
    Busy(String),
    /// A statement was rejected by a table constraint.
    #[error("Constraint failed: {0}")]
    Constraint(String),
    /// Configuration error (e.g., invalid database URL or missing parameters).
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transaction error (e.g., failed to begin, commit or rollback a transaction).
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// Connection error (e.g., missing database file or permission problems).
    #[error("Connection error: {0}")]
    Connection(String),
}

impl DbError {
    /// Classifies a sqlx error by its SQLite primary result code.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let classified = match &err {
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| (code & 0xff, db.message().to_string())),
            _ => None,
        };

        match classified {
            Some((SQLITE_BUSY | SQLITE_LOCKED, message)) => DbError::Busy(message),
            Some((SQLITE_CONSTRAINT, message)) => DbError::Constraint(message),
            _ => DbError::Sqlx(err),
        }
    }
}

/// The step of a transformation an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SchemaRead,
    Transform,
    Staged,
    DataCopied,
    Swapped,
    DependentsRestored,
    Committed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::SchemaRead => "schema read",
            Phase::Transform => "transform",
            Phase::Staged => "staging",
            Phase::DataCopied => "data copy",
            Phase::Swapped => "swap",
            Phase::DependentsRestored => "dependent restore",
            Phase::Committed => "commit",
        };
        f.write_str(name)
    }
}

/// Failure of a schema transformation. Whenever one of these is returned from
/// the transaction guard, the table is unchanged.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("No such table: '{table}'")]
    TableNotFound { table: String },

    #[error("No such column: '{column}' in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("Column '{column}' already exists in table '{table}'")]
    NameCollision { table: String, column: String },

    /// A structural definition could not be read.
    #[error("Cannot parse definition of '{object}': {reason}")]
    Parse { object: String, reason: String },

    #[error("Rebuild failed during {phase}: {reason}")]
    Rebuild { phase: Phase, reason: String },

    /// A row was rejected by the new definition while copying.
    #[error("Existing data in '{table}' violates the new definition: {reason}")]
    ConstraintViolation { table: String, reason: String },

    /// An index or trigger could not be recreated against the rebuilt table.
    #[error("Cannot restore '{name}': {reason}")]
    DependentObject { name: String, reason: String },

    #[error("Database is locked by another writer during {phase}: {reason}")]
    Busy { phase: Phase, reason: String },

    #[error("Store error during {phase}: {source}")]
    Store {
        phase: Phase,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

impl TransformError {
    /// Wraps a store error raised in `phase`, keeping lock conflicts distinct.
    pub fn store(phase: Phase, err: DbError) -> Self {
        match err {
            DbError::Busy(reason) => TransformError::Busy { phase, reason },
            source => TransformError::Store { phase, source },
        }
    }

    pub fn parse(object: impl Into<String>, reason: impl Into<String>) -> Self {
        TransformError::Parse {
            object: object.into(),
            reason: reason.into(),
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            TransformError::TableNotFound { .. } | TransformError::Parse { .. } => {
                Some(Phase::SchemaRead)
            }
            TransformError::ColumnNotFound { .. } | TransformError::NameCollision { .. } => {
                Some(Phase::Transform)
            }
            TransformError::Rebuild { phase, .. }
            | TransformError::Busy { phase, .. }
            | TransformError::Store { phase, .. } => Some(*phase),
            TransformError::ConstraintViolation { .. } => Some(Phase::DataCopied),
            TransformError::DependentObject { .. } => Some(Phase::DependentsRestored),
            TransformError::Db(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_keeps_busy_distinct() {
        let err = TransformError::store(Phase::Staged, DbError::Busy("locked".into()));
        assert!(matches!(
            err,
            TransformError::Busy {
                phase: Phase::Staged,
                ..
            }
        ));

        let err = TransformError::store(Phase::Swapped, DbError::Transaction("gone".into()));
        assert_eq!(err.phase(), Some(Phase::Swapped));
    }

    #[test]
    fn test_phase_of_validation_errors() {
        let err = TransformError::NameCollision {
            table: "users".into(),
            column: "id".into(),
        };
        assert_eq!(err.phase(), Some(Phase::Transform));
        assert_eq!(
            err.to_string(),
            "Column 'id' already exists in table 'users'"
        );
    }
}
