use serde::{Deserialize, Serialize};

use crate::schema::lexer::{quote_ident, tokenize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Table-level constraints, verbatim.
    pub constraints: Vec<String>,
    /// Text following the closing parenthesis, e.g. `WITHOUT ROWID`.
    pub options: String,
    pub indexes: Vec<IndexDefinition>,
    pub triggers: Vec<TriggerDefinition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
    pub generated: bool,
    /// Everything after the column name. This is what gets written back.
    pub definition: String,
    pub position: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    /// Plain column targets; expression targets are not listed.
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub sql: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TriggerDefinition {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Table,
    Index,
    Trigger,
    View,
}

impl ObjectType {
    pub fn from_catalog(value: &str) -> Option<Self> {
        match value {
            "table" => Some(ObjectType::Table),
            "index" => Some(ObjectType::Index),
            "trigger" => Some(ObjectType::Trigger),
            "view" => Some(ObjectType::View),
            _ => None,
        }
    }
}

/// One row of `sqlite_master`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CatalogEntry {
    pub object_type: ObjectType,
    pub name: String,
    pub tbl_name: String,
    pub sql: Option<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn uses_autoincrement(&self) -> bool {
        self.columns.iter().any(|column| {
            tokenize(&column.definition).map_or(false, |tokens| {
                tokens.iter().any(|t| t.is_keyword("AUTOINCREMENT"))
            })
        })
    }

    /// Renders the `CREATE TABLE` statement for this layout under `table_name`.
    /// Dependent objects are not included.
    pub fn create_table_sql(&self, table_name: &str) -> String {
        let mut elements: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                if column.definition.is_empty() {
                    quote_ident(&column.name)
                } else {
                    format!("{} {}", quote_ident(&column.name), column.definition)
                }
            })
            .collect();
        elements.extend(self.constraints.iter().cloned());

        let mut query = format!(
            "CREATE TABLE {} (\n    {}\n)",
            quote_ident(table_name),
            elements.join(",\n    ")
        );
        if !self.options.is_empty() {
            query.push(' ');
            query.push_str(&self.options);
        }
        query
    }
}
