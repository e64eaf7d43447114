//! Tables and table definitions.

use crate::model::column::{ColumnDefinition, ColumnType};
use crate::model::row::{FieldData, Row};
use serde::{Deserialize, Serialize};

/// Per-table operation flag used inside transform contexts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum TableOperation {
    /// Table carried through unchanged.
    #[default]
    None,
    /// Table exists only in the updated image.
    Add,
    /// Table is dropped by the transform.
    Drop,
}

/// A named, ordered column layout shared by every row of a table.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableDefinition {
    name: String,
    columns: Vec<ColumnDefinition>,
    unreal: bool,
    ba_visible: bool,
}

impl TableDefinition {
    /// Creates a definition for a real table (written to the database).
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            columns,
            unreal: false,
            ba_visible: false,
        }
    }

    /// Marks the table as unreal: consumed by the binder, never written to
    /// the final database.
    pub fn unreal(mut self) -> Self {
        self.unreal = true;
        self
    }

    /// Marks the table's rows as visible to the bootstrapper application
    /// data manifest.
    pub fn ba_visible(mut self) -> Self {
        self.ba_visible = true;
        self
    }

    /// The table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered column definitions.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Whether the table is unreal.
    pub fn is_unreal(&self) -> bool {
        self.unreal
    }

    /// Whether the table's rows feed the BA data manifest.
    pub fn is_ba_visible(&self) -> bool {
        self.ba_visible
    }

    /// Index of the named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Whether any column is an Object (binary-stream) column.
    pub fn has_object_columns(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.column_type() == ColumnType::Object)
    }

    /// Indices of the primary-key columns, in column order.
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key())
            .map(|(i, _)| i)
            .collect()
    }
}

/// A table: a definition plus its ordered rows.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Table {
    definition: TableDefinition,
    rows: Vec<Row>,
    operation: TableOperation,
}

impl Table {
    /// Creates an empty table for the given definition.
    pub fn new(definition: TableDefinition) -> Self {
        Self {
            definition,
            rows: Vec::new(),
            operation: TableOperation::None,
        }
    }

    /// The table definition.
    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    /// The table name.
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// The rows, in import order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The rows, mutably.
    pub fn rows_mut(&mut self) -> &mut Vec<Row> {
        &mut self.rows
    }

    /// Appends a row. The row must have one field per column.
    pub fn push_row(&mut self, row: Row) {
        debug_assert_eq!(row.len(), self.definition.columns().len());
        self.rows.push(row);
    }

    /// The transform-context table operation.
    pub fn operation(&self) -> TableOperation {
        self.operation
    }

    /// Sets the transform-context table operation.
    pub fn set_operation(&mut self, operation: TableOperation) {
        self.operation = operation;
    }

    /// The primary-key tuple of a row, rendered as strings in key-column
    /// order. Used for duplicate detection and stream naming.
    pub fn primary_key_of(&self, row: &Row) -> Vec<String> {
        self.definition
            .primary_key_indices()
            .into_iter()
            .map(|i| row.data(i).to_string())
            .collect()
    }

    /// Finds the first row whose primary key matches the given tuple.
    pub fn find_row(&self, key: &[&str]) -> Option<&Row> {
        let indices = self.definition.primary_key_indices();
        self.rows.iter().find(|row| {
            indices.len() == key.len()
                && indices
                    .iter()
                    .zip(key)
                    .all(|(&i, &k)| row.data(i).to_string() == k)
        })
    }

    /// Finds the first row whose field in the named column equals `value`.
    pub fn find_row_by(&self, column: &str, value: &str) -> Option<&Row> {
        let index = self.definition.column_index(column)?;
        self.rows
            .iter()
            .find(|row| row.data(index).as_str() == Some(value))
    }
}

impl Table {
    /// Convenience: reads string data by column name.
    pub fn string_of(&self, row: &Row, column: &str) -> Option<String> {
        let index = self.definition.column_index(column)?;
        match row.data(index) {
            FieldData::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Convenience: reads integer data by column name.
    pub fn int_of(&self, row: &Row, column: &str) -> Option<i32> {
        let index = self.definition.column_index(column)?;
        row.data(index).as_int()
    }
}
