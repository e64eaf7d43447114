//! Layout transfers and scratch cleanup.
//!
//! After the database is bound, loose (uncompressed) files and external
//! cabinets are copied into the layout directory next to the output.
//! Transfers whose source and destination resolve to the same file are
//! skipped. Scratch cleanup is best-effort: a file that cannot be deleted
//! is a warning, never a failed bind.

use crate::binder::cabinet::CabinetArtifact;
use crate::binder::error::{ErrorExt, Result};
use crate::binder::messages::Messages;
use crate::model::{FileRowCollection, MediaRowCollection};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One pending copy into the layout directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileTransfer {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Plans transfers for loose files and external cabinets.
///
/// Loose files land under a per-disk subdirectory when the media row
/// declares a layout token, else directly in the layout root.
pub fn plan_transfers(
    files: &FileRowCollection,
    media: &MediaRowCollection,
    cabinets: &[CabinetArtifact],
    layout_dir: &Path,
    default_compressed: bool,
) -> Vec<FileTransfer> {
    let mut transfers = Vec::new();

    for file in files.rows() {
        if file.is_compressed(default_compressed) {
            continue;
        }
        let subdir = media
            .get(file.disk_id)
            .and_then(|m| m.layout.clone())
            .unwrap_or_default();
        transfers.push(FileTransfer {
            source: file.source.clone(),
            destination: layout_dir.join(subdir).join(&file.file_name),
        });
    }

    for cabinet in cabinets {
        if cabinet.embedded {
            continue;
        }
        transfers.push(FileTransfer {
            source: cabinet.path.clone(),
            destination: layout_dir.join(&cabinet.name),
        });
    }

    transfers
}

/// Executes the planned transfers.
///
/// Identical source/destination pairs are skipped; individual copy
/// failures accumulate so one run reports every broken transfer.
pub fn execute_transfers(transfers: &[FileTransfer], messages: &mut Messages) -> Result<()> {
    for transfer in transfers {
        if same_file(&transfer.source, &transfer.destination) {
            log::debug!(
                "skipping transfer of {} onto itself",
                transfer.source.display()
            );
            continue;
        }
        if let Some(parent) = transfer.destination.parent() {
            std::fs::create_dir_all(parent).fs_context("creating layout directory", parent)?;
        }
        if let Err(error) = std::fs::copy(&transfer.source, &transfer.destination) {
            messages.error(format!(
                "cannot transfer '{}' to '{}': {error}",
                transfer.source.display(),
                transfer.destination.display()
            ));
        } else {
            log::debug!(
                "transferred {} -> {}",
                transfer.source.display(),
                transfer.destination.display()
            );
        }
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Removes the bind-owned scratch directory.
///
/// Deletion failures are warnings; the bind already succeeded.
pub fn cleanup_scratch(scratch: &Path, messages: &mut Messages) {
    if !scratch.exists() {
        return;
    }
    let mut entries = 0usize;
    for entry in WalkDir::new(scratch).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                messages.warning(format!("cannot walk scratch directory: {error}"));
                continue;
            }
        };
        entries += 1;
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        if let Err(error) = result {
            messages.warning(format!(
                "cannot remove scratch entry '{}': {error}",
                entry.path().display()
            ));
        }
    }
    log::debug!("cleaned {entries} scratch entr(ies) under {}", scratch.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileRow, MediaRow, SourceLocation, FILE_ATTR_NONCOMPRESSED};

    fn loose_file(id: &str, disk: i32, source: &Path) -> FileRow {
        FileRow {
            file: id.into(),
            component: "c".into(),
            file_name: format!("{id}.txt"),
            file_size: 0,
            version: None,
            language: None,
            attributes: FILE_ATTR_NONCOMPRESSED,
            sequence: 1,
            disk_id: disk,
            source: source.to_path_buf(),
            patch_group: None,
            from_module: None,
            source_location: SourceLocation::default(),
            row_index: None,
        }
    }

    #[test]
    fn loose_files_and_external_cabinets_are_planned() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"a").unwrap();

        let mut files = FileRowCollection::new();
        files.add(loose_file("a", 1, &source)).unwrap();
        let mut media = MediaRowCollection::new();
        media
            .add(MediaRow {
                disk_id: 1,
                last_sequence: 1,
                cabinet: None,
                volume_label: None,
                compression: None,
                layout: Some("disk1".into()),
                row_index: 0,
            })
            .unwrap();
        let cabinets = vec![CabinetArtifact {
            disk_id: 2,
            name: "ext.cab".into(),
            path: dir.path().join("ext.cab"),
            embedded: false,
        }];

        let layout = dir.path().join("layout");
        let transfers = plan_transfers(&files, &media, &cabinets, &layout, true);
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].destination, layout.join("disk1").join("a.txt"));
        assert_eq!(transfers[1].destination, layout.join("ext.cab"));
    }

    #[test]
    fn transfers_copy_and_skip_self() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"payload").unwrap();

        let transfers = vec![
            FileTransfer {
                source: source.clone(),
                destination: dir.path().join("layout").join("a.txt"),
            },
            FileTransfer {
                source: source.clone(),
                destination: source.clone(),
            },
        ];
        let mut messages = Messages::new();
        execute_transfers(&transfers, &mut messages).unwrap();
        assert!(!messages.has_errors());
        assert_eq!(
            std::fs::read(dir.path().join("layout").join("a.txt")).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn missing_transfer_source_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let transfers = vec![FileTransfer {
            source: dir.path().join("ghost.bin"),
            destination: dir.path().join("layout").join("ghost.bin"),
        }];
        let mut messages = Messages::new();
        execute_transfers(&transfers, &mut messages).unwrap();
        assert_eq!(messages.error_count(), 1);
    }

    #[test]
    fn scratch_cleanup_is_silent_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(scratch.join("nested")).unwrap();
        std::fs::write(scratch.join("nested").join("f.bin"), b"x").unwrap();
        let mut messages = Messages::new();
        cleanup_scratch(&scratch, &mut messages);
        assert!(!messages.has_errors());
        assert!(!scratch.join("nested").exists());
    }
}
