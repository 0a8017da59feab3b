use serde::{Deserialize, Serialize};

use crate::schema::lexer::quote_ident;

use super::schema::TableSchema;

/// Pairs one target column with the source column its values come from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ColumnPair {
    pub source: Option<String>,
    pub target: String,
}

/// Projection from the old column layout to the new one. There is one pair per
/// target column, in target order; dropped columns have no pair.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ColumnMapping {
    pub pairs: Vec<ColumnPair>,
    pub dropped: Vec<String>,
}

impl ColumnMapping {
    /// The identity mapping over `schema`.
    pub fn identity(schema: &TableSchema) -> Self {
        Self {
            pairs: schema
                .columns
                .iter()
                .map(|column| ColumnPair {
                    source: Some(column.name.clone()),
                    target: column.name.clone(),
                })
                .collect(),
            dropped: Vec::new(),
        }
    }

    /// `(old, new)` for every pair whose name changed.
    pub fn renamed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().filter_map(|pair| match &pair.source {
            Some(source) if source != &pair.target => Some((source.as_str(), pair.target.as_str())),
            _ => None,
        })
    }

    pub fn is_dropped(&self, column: &str) -> bool {
        self.dropped
            .iter()
            .any(|dropped| dropped.eq_ignore_ascii_case(column))
    }

    /// Quoted `(targets, sources)` column lists for the copy statement.
    /// Generated target columns are skipped since SQLite computes them.
    pub fn projection(&self, target: &TableSchema) -> (Vec<String>, Vec<String>) {
        self.pairs
            .iter()
            .filter(|pair| {
                target
                    .column(&pair.target)
                    .map(|column| !column.generated)
                    .unwrap_or(false)
            })
            .filter_map(|pair| {
                pair.source
                    .as_ref()
                    .map(|source| (quote_ident(&pair.target), quote_ident(source)))
            })
            .unzip()
    }
}
