//! Column definitions for the relational table model.
//!
//! Every table is bound to an ordered list of [`ColumnDefinition`]s. The
//! column type drives how field data is validated, written to the physical
//! database, and compared during transform generation.

use serde::{Deserialize, Serialize};

/// The data type of a table column.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum ColumnType {
    /// A string value with a maximum length (0 = unbounded).
    String,
    /// A localizable string value; subject to variable resolution.
    Localized,
    /// A 16-bit integer.
    Int16,
    /// A 32-bit integer.
    Int32,
    /// A binary-stream column. Field data holds the path to the source
    /// file; the payload is attached as a database stream at write time.
    Object,
}

impl ColumnType {
    /// Returns true for the two string-valued column types.
    pub fn is_string(self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Localized)
    }

    /// Returns true when values of this type live in database streams
    /// rather than table cells.
    pub fn is_object(self) -> bool {
        matches!(self, ColumnType::Object)
    }

    /// The minimum representable value for numeric columns, used as the
    /// sentinel for deleted-row synthesis during transform generation.
    pub fn min_value(self) -> i32 {
        match self {
            ColumnType::Int16 => i32::from(i16::MIN + 1),
            _ => i32::MIN + 1,
        }
    }
}

/// Definition of one column within a [`TableDefinition`](crate::model::TableDefinition).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ColumnDefinition {
    name: String,
    column_type: ColumnType,
    length: usize,
    primary_key: bool,
    nullable: bool,
}

impl ColumnDefinition {
    /// Creates a new column definition.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: 0,
            primary_key: false,
            nullable: false,
        }
    }

    /// Marks this column as part of the table's primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks this column as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the maximum length for string columns.
    pub fn length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// The column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The column type.
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Maximum string length (0 = unbounded).
    pub fn max_length(&self) -> usize {
        self.length
    }

    /// Whether this column participates in the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Whether null data is permitted.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}
