//! Typed row views over the generic table storage.
//!
//! [`FileRow`], [`MediaRow`], and [`ComponentRow`] add typed accessors
//! (sequence numbers, disk ids, compression flags, GUIDs) over `File`,
//! `Media`, and `Component` rows. The collections are built once per bind
//! and shared by the sequencing, cabinet, GUID, and merge phases.

use crate::model::output::Output;
use crate::model::row::{FieldData, SourceLocation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Component attribute bit: the key path names a `Registry` row.
pub const COMPONENT_ATTR_REGISTRY_KEY_PATH: i32 = 0x0004;
/// Component attribute bit: the key path names an ODBC data source.
pub const COMPONENT_ATTR_ODBC_DATA_SOURCE: i32 = 0x0020;
/// Component attribute bit: the component installs to 64-bit locations.
pub const COMPONENT_ATTR_WIN64: i32 = 0x0100;

/// File attribute bit: the file is compressed into a cabinet.
pub const FILE_ATTR_COMPRESSED: i32 = 0x4000;
/// File attribute bit: the file ships uncompressed next to the database.
pub const FILE_ATTR_NONCOMPRESSED: i32 = 0x2000;

/// Cabinet compression level, per media with a global default.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum CompressionLevel {
    /// Store without compression.
    None,
    /// Fast MSZIP compression.
    Low,
    /// Balanced MSZIP compression (the default).
    #[default]
    Medium,
    /// Maximum MSZIP compression.
    High,
}

impl CompressionLevel {
    /// Parses an authored compression-level token.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(CompressionLevel::None),
            "low" => Some(CompressionLevel::Low),
            "medium" => Some(CompressionLevel::Medium),
            "high" | "mszip" => Some(CompressionLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionLevel::None => "none",
            CompressionLevel::Low => "low",
            CompressionLevel::Medium => "medium",
            CompressionLevel::High => "high",
        };
        f.write_str(name)
    }
}

/// Typed view over one `File` row plus its binder-only override data.
#[derive(Clone, Debug)]
pub struct FileRow {
    /// File identifier (primary key).
    pub file: String,
    /// Owning component identifier.
    pub component: String,
    /// Target file name.
    pub file_name: String,
    /// Size in bytes, resolved from the source file when 0.
    pub file_size: i64,
    /// Version string, when the file carries one.
    pub version: Option<String>,
    /// Language ids, when the file carries them.
    pub language: Option<String>,
    /// `File.Attributes` bits.
    pub attributes: i32,
    /// Assigned sequence number (0 until the sequencing phase runs).
    pub sequence: i32,
    /// Assigned disk id.
    pub disk_id: i32,
    /// Resolved source path on disk.
    pub source: PathBuf,
    /// Patch group; patch-added files sort after non-patch files.
    pub patch_group: Option<i32>,
    /// True when this row came from a merge module rather than authored data.
    pub from_module: Option<String>,
    /// Source location for diagnostics.
    pub source_location: SourceLocation,
    /// Index of the backing row in the `File` table, when authored.
    pub row_index: Option<usize>,
}

impl FileRow {
    /// Whether the file is compressed into a cabinet, given the package
    /// default.
    pub fn is_compressed(&self, default_compressed: bool) -> bool {
        if self.attributes & FILE_ATTR_NONCOMPRESSED != 0 {
            false
        } else if self.attributes & FILE_ATTR_COMPRESSED != 0 {
            true
        } else {
            default_compressed
        }
    }
}

/// Why a file row could not be added to the collection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileRowConflict {
    /// Identifier already present with different casing.
    CaseInsensitive { existing: String },
    /// Identifier already present with identical casing.
    Exact,
}

/// All file rows of a bind, indexed by identifier.
#[derive(Clone, Debug, Default)]
pub struct FileRowCollection {
    rows: Vec<FileRow>,
    by_lower_id: HashMap<String, usize>,
}

impl FileRowCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row, rejecting duplicate identifiers.
    ///
    /// Lookup is case-insensitive: `FileA` and `filea` conflict (the
    /// installer treats identifiers case-insensitively even though the
    /// model preserves casing).
    pub fn add(&mut self, row: FileRow) -> Result<(), FileRowConflict> {
        let lower = row.file.to_ascii_lowercase();
        if let Some(&existing) = self.by_lower_id.get(&lower) {
            let existing_id = &self.rows[existing].file;
            return Err(if *existing_id == row.file {
                FileRowConflict::Exact
            } else {
                FileRowConflict::CaseInsensitive {
                    existing: existing_id.clone(),
                }
            });
        }
        self.by_lower_id.insert(lower, self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    /// Looks up a row by identifier (case-insensitive).
    pub fn get(&self, file: &str) -> Option<&FileRow> {
        self.by_lower_id
            .get(&file.to_ascii_lowercase())
            .map(|&i| &self.rows[i])
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> &[FileRow] {
        &self.rows
    }

    /// All rows, mutably.
    pub fn rows_mut(&mut self) -> &mut [FileRow] {
        &mut self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes assigned sequence numbers and attributes back into the
    /// authored `File` table.
    pub fn write_back(&self, output: &mut Output) {
        let Some(table) = output.table_mut("File") else {
            return;
        };
        let (seq_idx, attr_idx) = {
            let def = table.definition();
            (
                def.column_index("Sequence"),
                def.column_index("Attributes"),
            )
        };
        for file_row in &self.rows {
            let Some(index) = file_row.row_index else {
                continue;
            };
            let Some(row) = table.rows_mut().get_mut(index) else {
                continue;
            };
            if let Some(i) = seq_idx {
                row.set_data(i, FieldData::Int(file_row.sequence));
            }
            if let Some(i) = attr_idx {
                row.set_data(i, FieldData::Int(file_row.attributes));
            }
        }
    }
}

/// Typed view over one `Media` row plus binder-only override data.
#[derive(Clone, Debug)]
pub struct MediaRow {
    /// Disk id (primary key).
    pub disk_id: i32,
    /// Highest file sequence assigned to this disk.
    pub last_sequence: i32,
    /// Cabinet name; a leading `#` embeds the cabinet as a database stream.
    pub cabinet: Option<String>,
    /// Volume label.
    pub volume_label: Option<String>,
    /// Per-media compression level override.
    pub compression: Option<CompressionLevel>,
    /// Layout subdirectory for external cabinets.
    pub layout: Option<String>,
    /// Index of the backing row in the `Media` table.
    pub row_index: usize,
}

impl MediaRow {
    /// Whether the cabinet is embedded as a database stream.
    pub fn is_embedded(&self) -> bool {
        self.cabinet
            .as_deref()
            .is_some_and(|name| name.starts_with('#'))
    }

    /// The cabinet name without the embedded-stream marker.
    pub fn cabinet_file_name(&self) -> Option<&str> {
        self.cabinet.as_deref().map(|n| n.trim_start_matches('#'))
    }
}

/// All media rows of a bind, indexed by disk id.
#[derive(Clone, Debug, Default)]
pub struct MediaRowCollection {
    rows: Vec<MediaRow>,
    by_disk_id: HashMap<i32, usize>,
}

impl MediaRowCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row; a duplicate disk id returns the existing row's index.
    pub fn add(&mut self, row: MediaRow) -> Result<(), i32> {
        if self.by_disk_id.contains_key(&row.disk_id) {
            return Err(row.disk_id);
        }
        self.by_disk_id.insert(row.disk_id, self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    /// Looks up a row by disk id.
    pub fn get(&self, disk_id: i32) -> Option<&MediaRow> {
        self.by_disk_id.get(&disk_id).map(|&i| &self.rows[i])
    }

    /// Looks up a row by disk id, mutably.
    pub fn get_mut(&mut self, disk_id: i32) -> Option<&mut MediaRow> {
        let index = *self.by_disk_id.get(&disk_id)?;
        Some(&mut self.rows[index])
    }

    /// All rows in disk-id insertion order.
    pub fn rows(&self) -> &[MediaRow] {
        &self.rows
    }

    /// All rows, mutably.
    pub fn rows_mut(&mut self) -> &mut [MediaRow] {
        &mut self.rows
    }

    /// Writes assigned `LastSequence` values back into the `Media` table.
    pub fn write_back(&self, output: &mut Output) {
        let Some(table) = output.table_mut("Media") else {
            return;
        };
        let last_idx = table.definition().column_index("LastSequence");
        for media_row in &self.rows {
            let Some(row) = table.rows_mut().get_mut(media_row.row_index) else {
                continue;
            };
            if let Some(i) = last_idx {
                row.set_data(i, FieldData::Int(media_row.last_sequence));
            }
        }
    }
}

/// Typed view over one `Component` row.
#[derive(Clone, Debug)]
pub struct ComponentRow {
    /// Component identifier (primary key).
    pub component: String,
    /// Component GUID; `"*"` requests auto-generation.
    pub guid: String,
    /// Target directory identifier.
    pub directory: String,
    /// `Component.Attributes` bits.
    pub attributes: i32,
    /// Key path: a `File` or `Registry` identifier depending on attributes.
    pub key_path: Option<String>,
    /// Source location for diagnostics.
    pub source_location: SourceLocation,
    /// Index of the backing row in the `Component` table.
    pub row_index: usize,
}

impl ComponentRow {
    /// Whether the key path names a registry value.
    pub fn is_registry_key_path(&self) -> bool {
        self.attributes & COMPONENT_ATTR_REGISTRY_KEY_PATH != 0
    }

    /// Whether the key path names an ODBC data source.
    pub fn is_odbc_key_path(&self) -> bool {
        self.attributes & COMPONENT_ATTR_ODBC_DATA_SOURCE != 0
    }

    /// Whether the component targets 64-bit locations.
    pub fn is_win64(&self) -> bool {
        self.attributes & COMPONENT_ATTR_WIN64 != 0
    }
}
