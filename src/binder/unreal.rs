//! Unreal-table merging.
//!
//! Auxiliary ("unreal") tables carry binder-only data the installer never
//! sees: per-file source paths and disk overrides (`BindFile`), per-media
//! compression levels (`BindMedia`). This phase folds them into the typed
//! file and media collections every later phase operates on. Unreal tables
//! stay in the model for reference but are skipped by the database writer.

use crate::binder::messages::Messages;
use crate::model::{
    CompressionLevel, FieldData, FileRow, FileRowCollection, FileRowConflict, MediaRow,
    MediaRowCollection, Output,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// Joined binder-only file data keyed by file id.
struct FileOverride {
    disk_id: Option<i32>,
    source: Option<String>,
    attributes: Option<i32>,
    patch_group: Option<i32>,
}

/// Builds the shared file-row index: `File` rows joined with their
/// `BindFile` overrides.
///
/// Duplicate file identifiers accumulate errors; the first row wins so the
/// rest of the bind can keep collecting diagnostics.
pub fn build_file_rows(output: &Output, messages: &mut Messages) -> FileRowCollection {
    let mut overrides: HashMap<String, FileOverride> = HashMap::new();
    if let Some(table) = output.table("BindFile") {
        for row in table.rows() {
            overrides.insert(
                row.data(0).to_string(),
                FileOverride {
                    disk_id: row.data(1).as_int(),
                    source: row.data(2).as_str().map(str::to_string),
                    attributes: row.data(3).as_int(),
                    patch_group: row.data(4).as_int(),
                },
            );
        }
    }

    let mut files = FileRowCollection::new();
    let Some(table) = output.table("File") else {
        return files;
    };

    for (index, row) in table.rows().iter().enumerate() {
        let id = row.data(0).to_string();
        let over = overrides.get(&id);
        let mut attributes = table.int_of(row, "Attributes").unwrap_or(0);
        if let Some(bits) = over.and_then(|o| o.attributes) {
            attributes |= bits;
        }
        let file_row = FileRow {
            file: id.clone(),
            component: table.string_of(row, "Component_").unwrap_or_default(),
            file_name: table.string_of(row, "FileName").unwrap_or_default(),
            file_size: i64::from(table.int_of(row, "FileSize").unwrap_or(0)),
            version: table.string_of(row, "Version"),
            language: table.string_of(row, "Language"),
            attributes,
            sequence: table.int_of(row, "Sequence").unwrap_or(0),
            disk_id: over.and_then(|o| o.disk_id).unwrap_or(1),
            source: PathBuf::from(
                over.and_then(|o| o.source.clone())
                    .unwrap_or_else(|| table.string_of(row, "FileName").unwrap_or_default()),
            ),
            patch_group: over.and_then(|o| o.patch_group),
            from_module: None,
            source_location: row.source().clone(),
            row_index: Some(index),
        };

        if let Err(conflict) = files.add(file_row) {
            let detail = match conflict {
                FileRowConflict::Exact => String::new(),
                FileRowConflict::CaseInsensitive { existing } => {
                    format!(" (conflicts with '{existing}' by case-insensitive comparison)")
                }
            };
            messages.error_at(
                row.source(),
                format!("duplicate file identifier '{id}'{detail}"),
            );
        }
    }

    files
}

/// Builds the shared media-row index: `Media` rows joined with their
/// `BindMedia` overrides.
pub fn build_media_rows(output: &Output, messages: &mut Messages) -> MediaRowCollection {
    let mut media = MediaRowCollection::new();
    let Some(table) = output.table("Media") else {
        return media;
    };

    let mut overrides: HashMap<i32, (Option<CompressionLevel>, Option<String>)> = HashMap::new();
    if let Some(bind_media) = output.table("BindMedia") {
        for row in bind_media.rows() {
            let disk_id = row.data(0).as_int().unwrap_or(0);
            let compression = row.data(1).as_str().and_then(|token| {
                let level = CompressionLevel::parse(token);
                if level.is_none() {
                    messages.error_at(
                        row.source(),
                        format!("unknown compression level '{token}' for media {disk_id}"),
                    );
                }
                level
            });
            let layout = row.data(2).as_str().map(str::to_string);
            overrides.insert(disk_id, (compression, layout));
        }
    }

    for (index, row) in table.rows().iter().enumerate() {
        let disk_id = row.data(0).as_int().unwrap_or(0);
        let (compression, layout) = overrides.remove(&disk_id).unwrap_or((None, None));
        let media_row = MediaRow {
            disk_id,
            last_sequence: table.int_of(row, "LastSequence").unwrap_or(0),
            cabinet: table.string_of(row, "Cabinet"),
            volume_label: table.string_of(row, "VolumeLabel"),
            compression,
            layout,
            row_index: index,
        };
        if media.add(media_row).is_err() {
            messages.error_at(row.source(), format!("duplicate media disk id {disk_id}"));
        }
    }

    for (disk_id, _) in overrides {
        messages.warning(format!(
            "media override for disk {disk_id} has no matching Media row"
        ));
    }

    media
}

/// Folds a module's synthetic file rows into the collection, reporting
/// collisions against authored rows with the module id in the diagnostic.
pub fn merge_module_files(
    files: &mut FileRowCollection,
    module_id: &str,
    module_files: Vec<FileRow>,
    messages: &mut Messages,
) {
    for mut file_row in module_files {
        file_row.from_module = Some(module_id.to_string());
        let id = file_row.file.clone();
        let location = file_row.source_location.clone();
        if let Err(conflict) = files.add(file_row) {
            let existing = match &conflict {
                FileRowConflict::Exact => id.clone(),
                FileRowConflict::CaseInsensitive { existing } => existing.clone(),
            };
            messages.error_at(
                &location,
                format!(
                    "file identifier '{id}' in merge module '{module_id}' collides with existing file '{existing}'"
                ),
            );
        }
    }
}

/// Drops every unreal table except the patch-headers streaming exception.
///
/// Called after all phases that read override data, immediately before the
/// database write.
pub fn strip_unreal_tables(output: &mut Output) {
    let keep = "MsiPatchHeaders";
    let names: Vec<String> = output
        .tables()
        .iter()
        .filter(|t| t.definition().is_unreal() && t.name() != keep)
        .map(|t| t.name().to_string())
        .collect();
    for name in names {
        output.remove_table(&name);
    }
}

/// Restores null `File.Sequence`/`Attributes` cells to concrete values so
/// the physical write never sees unset required columns.
pub fn normalize_file_table(output: &mut Output) {
    let Some(table) = output.table_mut("File") else {
        return;
    };
    let (seq_idx, attr_idx) = {
        let def = table.definition();
        (def.column_index("Sequence"), def.column_index("Attributes"))
    };
    for row in table.rows_mut() {
        if let Some(i) = seq_idx {
            if row.data(i).is_null() {
                row.set_data(i, FieldData::Int(0));
            }
        }
        if let Some(i) = attr_idx {
            if row.data(i).is_null() {
                row.set_data(i, FieldData::Int(0));
            }
        }
    }
}
