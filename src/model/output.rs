//! The root aggregate a bind operates on.
//!
//! An [`Output`] is a database-shaped collection of tables plus a type tag
//! and codepage. Patch outputs additionally carry named [`SubStorage`]s,
//! each wrapping a nested `Output` that represents one transform.

use crate::model::table::{Table, TableDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of artifact an [`Output`] binds to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum OutputKind {
    /// A product database (.msi).
    Product,
    /// A merge module (.msm).
    Module,
    /// A patch (.msp).
    Patch,
    /// A binary transform (.mst).
    Transform,
    /// A bootstrapper bundle (.exe).
    Bundle,
}

impl OutputKind {
    /// Conventional file extension for this output kind.
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Product => "msi",
            OutputKind::Module => "msm",
            OutputKind::Patch => "msp",
            OutputKind::Transform => "mst",
            OutputKind::Bundle => "exe",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputKind::Product => "product",
            OutputKind::Module => "module",
            OutputKind::Patch => "patch",
            OutputKind::Transform => "transform",
            OutputKind::Bundle => "bundle",
        };
        f.write_str(name)
    }
}

/// A named nested output attached to a patch as a storage.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubStorage {
    /// Storage name inside the patch container.
    pub name: String,
    /// The transform this storage holds.
    pub data: Output,
}

/// The root in-memory aggregate representing one artifact to bind.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Output {
    kind: OutputKind,
    codepage: i32,
    tables: Vec<Table>,
    sub_storages: Vec<SubStorage>,
}

impl Output {
    /// Creates an empty output of the given kind.
    ///
    /// The codepage must be set before any row import; it defaults to
    /// neutral (0).
    pub fn new(kind: OutputKind) -> Self {
        Self {
            kind,
            codepage: 0,
            tables: Vec::new(),
            sub_storages: Vec::new(),
        }
    }

    /// The output kind.
    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    /// The ANSI codepage for string data.
    pub fn codepage(&self) -> i32 {
        self.codepage
    }

    /// Sets the codepage. Must happen before rows are imported.
    pub fn set_codepage(&mut self, codepage: i32) {
        self.codepage = codepage;
    }

    /// All tables.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// All tables, mutably.
    pub fn tables_mut(&mut self) -> &mut Vec<Table> {
        &mut self.tables
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// Looks up a table by name, mutably.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name() == name)
    }

    /// Returns the named table, creating it from `definition` when absent.
    pub fn ensure_table(&mut self, definition: &TableDefinition) -> &mut Table {
        if let Some(index) = self.tables.iter().position(|t| t.name() == definition.name()) {
            return &mut self.tables[index];
        }
        self.tables.push(Table::new(definition.clone()));
        self.tables.last_mut().unwrap()
    }

    /// Removes and returns the named table.
    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        let index = self.tables.iter().position(|t| t.name() == name)?;
        Some(self.tables.remove(index))
    }

    /// Named sub-storages (patch transforms).
    pub fn sub_storages(&self) -> &[SubStorage] {
        &self.sub_storages
    }

    /// Attaches a nested output as a named storage.
    pub fn push_sub_storage(&mut self, name: impl Into<String>, data: Output) {
        self.sub_storages.push(SubStorage {
            name: name.into(),
            data,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::column::{ColumnDefinition, ColumnType};

    #[test]
    fn ensure_table_is_idempotent() {
        let def = TableDefinition::new(
            "Property",
            vec![
                ColumnDefinition::new("Property", ColumnType::String).primary_key(),
                ColumnDefinition::new("Value", ColumnType::Localized),
            ],
        );
        let mut output = Output::new(OutputKind::Product);
        output.ensure_table(&def);
        output.ensure_table(&def);
        assert_eq!(output.tables().len(), 1);
    }

    #[test]
    fn kind_extensions() {
        assert_eq!(OutputKind::Product.extension(), "msi");
        assert_eq!(OutputKind::Transform.extension(), "mst");
        assert_eq!(OutputKind::Bundle.extension(), "exe");
    }
}
