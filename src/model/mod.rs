//! The relational table model.
//!
//! Typed tables, rows, and fields with primary-key and foreign-key
//! semantics. The upstream compiler populates this model; every binder
//! phase reads and mutates it in place until the final write consumes it.

mod column;
mod output;
mod row;
mod rows;
pub mod schema;
mod table;

pub use column::{ColumnDefinition, ColumnType};
pub use output::{Output, OutputKind, SubStorage};
pub use row::{Field, FieldData, ObjectField, Row, RowOperation, SourceLocation};
pub use rows::{
    CompressionLevel, ComponentRow, FileRow, FileRowCollection, FileRowConflict, MediaRow,
    MediaRowCollection, COMPONENT_ATTR_ODBC_DATA_SOURCE, COMPONENT_ATTR_REGISTRY_KEY_PATH,
    COMPONENT_ATTR_WIN64, FILE_ATTR_COMPRESSED, FILE_ATTR_NONCOMPRESSED,
};
pub use table::{Table, TableDefinition, TableOperation};
