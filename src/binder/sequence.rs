//! File sequencing.
//!
//! Windows Installer sequence numbers are global: each media row covers a
//! contiguous range ending at its `LastSequence`. Files are numbered per
//! disk in assignment order, strictly increasing, with patch-added files
//! grouped after non-patch files, and every media row's `LastSequence` is
//! set to the highest sequence assigned to that disk.

use crate::binder::messages::Messages;
use crate::model::{FileRowCollection, MediaRowCollection};

/// Assigns sequence numbers and media ranges.
///
/// Files on unknown disks accumulate errors and are left unsequenced.
pub fn assign_sequences(
    files: &mut FileRowCollection,
    media: &mut MediaRowCollection,
    messages: &mut Messages,
) {
    let mut disk_ids: Vec<i32> = media.rows().iter().map(|m| m.disk_id).collect();
    disk_ids.sort_unstable();

    // Partition file indices by disk, non-patch before patch, patch groups
    // in ascending order, authored order otherwise.
    let mut next_sequence = 1i32;
    for disk_id in disk_ids {
        let mut indices: Vec<usize> = files
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, f)| f.disk_id == disk_id)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by_key(|&i| {
            let row = &files.rows()[i];
            (row.patch_group.map_or(-1, |g| g.max(0)), i)
        });

        let mut last_sequence = next_sequence - 1;
        for index in indices {
            files.rows_mut()[index].sequence = next_sequence;
            last_sequence = next_sequence;
            next_sequence += 1;
        }

        if let Some(media_row) = media.get_mut(disk_id) {
            media_row.last_sequence = last_sequence;
        }
    }

    for row in files.rows() {
        if media.get(row.disk_id).is_none() {
            messages.error_at(
                &row.source_location,
                format!(
                    "file '{}' is assigned to disk {} but no Media row declares it",
                    row.file, row.disk_id
                ),
            );
        }
    }
}
