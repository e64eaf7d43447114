//! Rows and fields.
//!
//! A [`Row`] is an ordered array of [`Field`]s, one per column of the owning
//! table. Rows carry a source-location tag for diagnostics, a [`RowOperation`]
//! consumed by transform generation, and (for patches) an owning section id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location in an authored source document, attached to rows for diagnostics.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct SourceLocation {
    /// Source file the row was authored in.
    pub path: String,
    /// 1-based line number, when known.
    pub line: Option<u32>,
}

impl SourceLocation {
    /// Creates a location with a path and line number.
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}({})", self.path, line),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Per-row operation flag, set upstream and consumed by the transform
/// differencer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum RowOperation {
    /// No pending operation.
    #[default]
    None,
    /// Row exists only in the updated image.
    Add,
    /// Row exists only in the target image.
    Delete,
    /// Row exists in both images with at least one changed field.
    Modify,
}

/// The data held by one field.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum FieldData {
    /// Null cell.
    #[default]
    Null,
    /// String cell.
    Str(String),
    /// Integer cell (both 16- and 32-bit columns).
    Int(i32),
}

impl FieldData {
    /// String view of the data, when it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldData::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the data, when it is an integer.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            FieldData::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Whether the cell is null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldData::Null)
    }
}

impl fmt::Display for FieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldData::Null => Ok(()),
            FieldData::Str(s) => f.write_str(s),
            FieldData::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for FieldData {
    fn from(value: &str) -> Self {
        FieldData::Str(value.to_string())
    }
}

impl From<String> for FieldData {
    fn from(value: String) -> Self {
        FieldData::Str(value)
    }
}

impl From<i32> for FieldData {
    fn from(value: i32) -> Self {
        FieldData::Int(value)
    }
}

/// Extra state carried by fields of Object (binary-stream) columns.
///
/// Previous-value state is used during patch symbol resolution and transform
/// diffing; the base URI keys the cabinet-extraction cache in the field
/// resolver.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ObjectField {
    /// Data from the previous (target) image, when diffing.
    pub previous_data: Option<FieldData>,
    /// Cabinet file id the previous payload lived in.
    pub previous_cabinet: Option<String>,
    /// Cabinet file id the current payload lives in, when it must be
    /// extracted rather than read from disk.
    pub cabinet: Option<String>,
    /// Base URI the source path is resolved against.
    pub base_uri: Option<String>,
}

/// One cell of a row.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Field {
    data: FieldData,
    modified: bool,
    object: Option<Box<ObjectField>>,
}

impl Field {
    /// Creates a field holding the given data.
    pub fn new(data: FieldData) -> Self {
        Self {
            data,
            modified: false,
            object: None,
        }
    }

    /// The current data.
    pub fn data(&self) -> &FieldData {
        &self.data
    }

    /// Replaces the data without touching the modified flag.
    pub fn set_data(&mut self, data: FieldData) {
        self.data = data;
    }

    /// Whether the field differs from the target image (set upstream).
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Sets the modified flag.
    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Object-column state, when present.
    pub fn object(&self) -> Option<&ObjectField> {
        self.object.as_deref()
    }

    /// Mutable object-column state, created on first use.
    pub fn object_mut(&mut self) -> &mut ObjectField {
        self.object.get_or_insert_with(Default::default)
    }
}

/// One row of a table.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Row {
    fields: Vec<Field>,
    source: SourceLocation,
    operation: RowOperation,
    section_id: Option<String>,
}

impl Row {
    /// Creates a row with one default field per column.
    pub fn new(column_count: usize, source: SourceLocation) -> Self {
        Self {
            fields: (0..column_count).map(|_| Field::default()).collect(),
            source,
            operation: RowOperation::None,
            section_id: None,
        }
    }

    /// Creates a row from field data in column order.
    pub fn from_data(source: SourceLocation, data: Vec<FieldData>) -> Self {
        Self {
            fields: data.into_iter().map(Field::new).collect(),
            source,
            operation: RowOperation::None,
            section_id: None,
        }
    }

    /// Number of fields (always the owning table's column count).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The field at the given column index.
    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// Mutable field at the given column index.
    pub fn field_mut(&mut self, index: usize) -> &mut Field {
        &mut self.fields[index]
    }

    /// All fields in column order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// All fields, mutably.
    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    /// Shorthand for the data at a column index.
    pub fn data(&self, index: usize) -> &FieldData {
        self.fields[index].data()
    }

    /// Shorthand for setting data at a column index.
    pub fn set_data(&mut self, index: usize, data: FieldData) {
        self.fields[index].set_data(data);
    }

    /// The source location this row was authored at.
    pub fn source(&self) -> &SourceLocation {
        &self.source
    }

    /// The row operation consumed by transform generation.
    pub fn operation(&self) -> RowOperation {
        self.operation
    }

    /// Sets the row operation.
    pub fn set_operation(&mut self, operation: RowOperation) {
        self.operation = operation;
    }

    /// The owning section id, for rows that belong to a patch section.
    pub fn section_id(&self) -> Option<&str> {
        self.section_id.as_deref()
    }

    /// Sets the owning section id.
    pub fn set_section_id(&mut self, section_id: Option<String>) {
        self.section_id = section_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_from_data_preserves_order() {
        let row = Row::from_data(
            SourceLocation::new("product.wxs", 12),
            vec!["a".into(), FieldData::Int(7), FieldData::Null],
        );
        assert_eq!(row.len(), 3);
        assert_eq!(row.data(0).as_str(), Some("a"));
        assert_eq!(row.data(1).as_int(), Some(7));
        assert!(row.data(2).is_null());
    }

    #[test]
    fn object_state_created_lazily() {
        let mut field = Field::new("payload.dll".into());
        assert!(field.object().is_none());
        field.object_mut().cabinet = Some("cab1.cab".into());
        assert_eq!(field.object().unwrap().cabinet.as_deref(), Some("cab1.cab"));
    }

    #[test]
    fn source_location_display() {
        assert_eq!(SourceLocation::new("a.wxs", 3).to_string(), "a.wxs(3)");
    }
}
