use clap::{Parser, Subcommand};

use crate::{
    errors::TransformError,
    guard::TransformReport,
    models::{connections::ConnectionConfig, schema::TableSchema},
    transform::Operation,
    Squeak,
};

#[derive(Parser, Debug)]
#[command(name = "squeak")]
#[command(about = "Drop, rename and redefine columns of a SQLite table")]
pub struct Cli {
    /// Database file or sqlite: URL (defaults to DATABASE_URL)
    #[arg(long, short)]
    pub database: Option<String>,

    /// Table to alter
    pub table: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drop a column
    DropColumn {
        column: String,

        /// Keep the original table as <table>_initial
        #[arg(long)]
        safe: bool,
    },

    /// Rename a column
    RenameColumn {
        old_column: String,
        new_column: String,

        /// Keep the original table as <table>_initial
        #[arg(long)]
        safe: bool,
    },

    /// Replace a column's type and constraints, e.g. `varchar (20) NOT NULL`
    ReplaceDefinition {
        column: String,

        #[arg(required = true, num_args = 1..)]
        definition: Vec<String>,

        /// Keep the original table as <table>_initial
        #[arg(long)]
        safe: bool,
    },

    /// Print the table's columns, indexes and triggers
    Describe,
}

impl Cli {
    pub fn connection_config(&self) -> Result<ConnectionConfig, TransformError> {
        match &self.database {
            Some(database) => {
                let mut config = ConnectionConfig::new(database.clone());
                config.apply_env_overrides()?;
                Ok(config)
            }
            None => Ok(ConnectionConfig::from_env()?),
        }
    }
}

impl Command {
    fn operation(&self) -> Option<(Operation, bool)> {
        match self {
            Command::DropColumn { column, safe } => Some((
                Operation::DropColumn {
                    column: column.clone(),
                },
                *safe,
            )),
            Command::RenameColumn {
                old_column,
                new_column,
                safe,
            } => Some((
                Operation::RenameColumn {
                    from: old_column.clone(),
                    to: new_column.clone(),
                },
                *safe,
            )),
            Command::ReplaceDefinition {
                column,
                definition,
                safe,
            } => Some((
                Operation::ReplaceDefinition {
                    column: column.clone(),
                    definition: definition.join(" "),
                },
                *safe,
            )),
            Command::Describe => None,
        }
    }
}

/// Runs one command and returns the text to print on success.
pub async fn run(cli: Cli) -> Result<String, TransformError> {
    let config = cli.connection_config()?;
    let squeak = Squeak::open(&config, &cli.table).await?;

    let result = match cli.command.operation() {
        Some((operation, safe)) => squeak
            .apply(&operation, safe)
            .await
            .map(|report| success_message(&report)),
        None => squeak.schema().await.map(|schema| describe(&schema)),
    };

    squeak.close().await;
    result
}

pub fn success_message(report: &TransformReport) -> String {
    let mut message = match &report.operation {
        Operation::DropColumn { column } => format!("Column '{}' dropped.", column),
        Operation::RenameColumn { from, to } => {
            format!("Column '{}' renamed to '{}'.", from, to)
        }
        Operation::ReplaceDefinition { column, definition } => format!(
            "Changed the definition for column '{}' to: {}",
            column, definition
        ),
    };
    if let Some(backup) = &report.backup_table {
        message.push_str(&format!(" Original table kept as '{}'.", backup));
    }
    message
}

pub fn failure_message(err: &TransformError) -> String {
    match err.phase() {
        Some(phase) => format!("Error during {}: {}", phase, err),
        None => format!("Error: {}", err),
    }
}

pub fn describe(schema: &TableSchema) -> String {
    let mut lines = vec![format!("{}:", schema.name)];
    for column in &schema.columns {
        lines.push(format!("  {} {}", column.name, column.definition).trim_end().to_string());
    }
    for constraint in &schema.constraints {
        lines.push(format!("  {}", constraint));
    }
    for index in &schema.indexes {
        lines.push(format!("  index {}", index.name));
    }
    for trigger in &schema.triggers {
        lines.push(format!("  trigger {}", trigger.name));
    }
    lines.join("\n")
}
