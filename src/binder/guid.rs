//! Stable component GUID generation.
//!
//! Components authored with GUID `"*"` get a deterministic identifier
//! derived from their key-path data: registry key paths hash the fully
//! qualified key+value string, file key paths hash the canonicalized target
//! install path. Hashing is name-based UUID generation over the lower-cased
//! string with a fixed namespace, so identical inputs always produce the
//! same GUID across runs and machines.

use crate::binder::messages::Messages;
use crate::model::{ComponentRow, FieldData, FileRowCollection, Output, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Namespace for component GUID generation. Never change this value;
/// component identities of every previously built package depend on it.
const COMPONENT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3c, 0x71, 0x3f, 0x0e, 0x96, 0x6b, 0x4b, 0x62, 0x90, 0x31, 0xd8, 0x2f, 0x5d, 0x2d, 0x5c,
    0xc6,
]);

/// Marker value requesting GUID auto-generation.
const AUTOGENERATE: &str = "*";

/// Target directories that resolve to per-user locations. A component
/// rooted here has no single canonical install path, so auto-generation
/// is refused.
const PER_USER_FOLDERS: &[&str] = &[
    "AdminToolsFolder",
    "AppDataFolder",
    "DesktopFolder",
    "FavoritesFolder",
    "LocalAppDataFolder",
    "MyPicturesFolder",
    "NetHoodFolder",
    "PersonalFolder",
    "PrintHoodFolder",
    "RecentFolder",
    "SendToFolder",
    "StartMenuFolder",
    "StartupFolder",
    "TempFolder",
    "TemplateFolder",
];

/// Canonical spellings for well-known machine folders. Auto-generated
/// GUIDs must not depend on where Windows actually puts these.
fn canonical_root(directory: &str) -> Option<&'static str> {
    match directory {
        "TARGETDIR" => Some("?:\\"),
        "WindowsFolder" => Some("?:\\windows\\"),
        "SystemFolder" | "System64Folder" => Some("?:\\windows\\system32\\"),
        "ProgramFilesFolder" | "ProgramFiles64Folder" => Some("?:\\program files\\"),
        "CommonFilesFolder" | "CommonFiles64Folder" => {
            Some("?:\\program files\\common files\\")
        }
        _ => None,
    }
}

/// Generates GUIDs for every component marked for auto-generation.
///
/// `legacy` selects the backwards-compatible MD5 (version 3) UUID variant;
/// the default is SHA-1 (version 5). Failures accumulate in `messages` and
/// leave the component untouched.
pub fn generate_component_guids(
    output: &mut Output,
    files: &FileRowCollection,
    legacy: bool,
    messages: &mut Messages,
) {
    let directories = directory_map(output);
    let components = component_rows(output);
    let mut assigned: Vec<(usize, String)> = Vec::new();

    for component in &components {
        if component.guid != AUTOGENERATE {
            continue;
        }

        match keypath_string(component, output, files, &directories, messages) {
            Some(input) => {
                let guid = stable_guid(&input, legacy);
                assigned.push((component.row_index, guid));
            }
            None => {
                // Diagnostic already recorded.
            }
        }
    }

    if let Some(table) = output.table_mut("Component") {
        let id_index = table
            .definition()
            .column_index("ComponentId")
            .unwrap_or(1);
        for (row_index, guid) in assigned {
            if let Some(row) = table.rows_mut().get_mut(row_index) {
                row.set_data(id_index, FieldData::Str(guid));
            }
        }
    }
}

/// Name-based UUID over the lower-cased input, rendered in the registry
/// format the installer expects.
pub fn stable_guid(input: &str, legacy: bool) -> String {
    let lowered = input.to_lowercase();
    let uuid = if legacy {
        Uuid::new_v3(&COMPONENT_NAMESPACE, lowered.as_bytes())
    } else {
        Uuid::new_v5(&COMPONENT_NAMESPACE, lowered.as_bytes())
    };
    format!("{{{}}}", uuid.hyphenated().to_string().to_uppercase())
}

fn keypath_string(
    component: &ComponentRow,
    output: &Output,
    files: &FileRowCollection,
    directories: &HashMap<String, (Option<String>, String)>,
    messages: &mut Messages,
) -> Option<String> {
    if component.is_odbc_key_path() {
        messages.error_at(
            &component.source_location,
            format!(
                "cannot generate a GUID for component '{}': ODBC data-source key paths have no stable identity",
                component.component
            ),
        );
        return None;
    }

    let Some(key_path) = component.key_path.as_deref() else {
        messages.error_at(
            &component.source_location,
            format!(
                "cannot generate a GUID for component '{}': it has no key path",
                component.component
            ),
        );
        return None;
    };

    if component.is_registry_key_path() {
        let Some(registry) = output.table("Registry") else {
            messages.error_at(
                &component.source_location,
                format!(
                    "component '{}' names registry key path '{}' but no Registry table exists",
                    component.component, key_path
                ),
            );
            return None;
        };
        let Some(row) = registry.find_row(&[key_path]) else {
            messages.error_at(
                &component.source_location,
                format!(
                    "component '{}' names unknown registry key path '{}'",
                    component.component, key_path
                ),
            );
            return None;
        };
        let root = registry.int_of(row, "Root").unwrap_or(-1);
        let key = registry.string_of(row, "Key").unwrap_or_default();
        let name = registry.string_of(row, "Name").unwrap_or_default();
        return Some(format!("{root:02}:\\{key}\\{name}"));
    }

    // File key path: canonical target install path.
    let Some(file) = files.get(key_path) else {
        messages.error_at(
            &component.source_location,
            format!(
                "component '{}' names unknown file key path '{}'",
                component.component, key_path
            ),
        );
        return None;
    };

    let mut path = match resolve_directory_path(&component.directory, directories) {
        Ok(path) => path,
        Err(root) => {
            messages.error_at(
                &component.source_location,
                format!(
                    "cannot generate a GUID for component '{}': directory '{}' resolves to the per-user folder '{}'",
                    component.component, component.directory, root
                ),
            );
            return None;
        }
    };

    path.push_str(&long_name(&file.file_name));
    if component.is_win64() {
        path.push_str("64");
    }
    Some(path)
}

/// Walks the directory chain up to a canonical root, concatenating default
/// directory names on the way back down.
///
/// Returns the per-user root name as the error value when the chain ends in
/// a folder with no canonical location.
fn resolve_directory_path(
    directory: &str,
    directories: &HashMap<String, (Option<String>, String)>,
) -> Result<String, String> {
    let mut segments: Vec<String> = Vec::new();
    let mut current = directory.to_string();
    let mut hops = 0usize;

    loop {
        if PER_USER_FOLDERS.contains(&current.as_str()) {
            return Err(current);
        }
        if let Some(root) = canonical_root(&current) {
            let mut path = root.to_string();
            for segment in segments.iter().rev() {
                path.push_str(segment);
                path.push('\\');
            }
            return Ok(path);
        }
        let Some((parent, name)) = directories.get(&current) else {
            // Unknown directory: treat its id as an opaque root. The
            // reference checker reports the dangling id separately.
            let mut path = format!("{current}\\");
            for segment in segments.iter().rev() {
                path.push_str(segment);
                path.push('\\');
            }
            return Ok(path);
        };
        segments.push(name.clone());
        match parent {
            Some(parent) if parent != &current => current = parent.clone(),
            _ => {
                let mut path = String::new();
                for segment in segments.iter().rev() {
                    path.push_str(segment);
                    path.push('\\');
                }
                return Ok(path);
            }
        }
        hops += 1;
        if hops > 1024 {
            // Cycle in the Directory table; bail out with what we have.
            return Ok(segments.join("\\"));
        }
    }
}

/// DefaultDir holds `target:source` pairs of `short|long` names; the long
/// target name is the canonical one.
fn long_name(default_dir: &str) -> String {
    let target = default_dir.split(':').next().unwrap_or(default_dir);
    match target.split_once('|') {
        Some((_, long)) => long.to_string(),
        None => target.to_string(),
    }
}

fn directory_map(output: &Output) -> HashMap<String, (Option<String>, String)> {
    let mut map = HashMap::new();
    if let Some(table) = output.table("Directory") {
        for row in table.rows() {
            let id = row.data(0).to_string();
            let parent = match row.data(1) {
                FieldData::Null => None,
                other => Some(other.to_string()),
            };
            let name = long_name(&row.data(2).to_string());
            map.insert(id, (parent, name));
        }
    }
    map
}

fn component_rows(output: &Output) -> Vec<ComponentRow> {
    let Some(table) = output.table("Component") else {
        return Vec::new();
    };
    let read = |row: &Row, column: &str| table.string_of(row, column);
    table
        .rows()
        .iter()
        .enumerate()
        .map(|(index, row)| ComponentRow {
            component: read(row, "Component").unwrap_or_default(),
            guid: read(row, "ComponentId").unwrap_or_default(),
            directory: read(row, "Directory_").unwrap_or_default(),
            attributes: table.int_of(row, "Attributes").unwrap_or(0),
            key_path: read(row, "KeyPath"),
            source_location: row.source().clone(),
            row_index: index,
        })
        .collect()
}
