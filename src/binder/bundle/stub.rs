//! Bundle executable assembly.
//!
//! The stub executable ships with a dedicated marker section. Binding
//! copies the stub, appends the UX container first and every attached
//! container after it, then rewrites the marker section with a small
//! index of container offsets so the engine can find its payloads at
//! runtime. Registration metadata is patched into reserved string
//! markers in the stub's resource data when the stub carries them.
//!
//! Only data sections are ever modified; executable code is left
//! untouched, and patching happens before any code signing.

use crate::bail;
use crate::binder::bundle::BundleInfo;
use crate::binder::error::{Context, ErrorExt, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the marker section in the stub PE image.
pub const MARKER_SECTION: &str = ".mkburn";

/// Magic bytes opening the container index.
const MARKER_MAGIC: &[u8; 4] = b"MKBN";

/// Marker preceding the reserved display-name string in the stub.
const DISPLAY_NAME_MARKER: &[u8] = b"__MKBURN_DISPLAY_NAME";

/// Marker preceding the reserved version string in the stub.
const VERSION_MARKER: &[u8] = b"__MKBURN_VERSION";

/// One container appended to the bundle, with its final location.
#[derive(Clone, Debug)]
pub struct AttachedContainer {
    pub id: String,
    pub source: PathBuf,
    /// Offset from the start of the bundle executable.
    pub offset: u64,
    pub size: u64,
}

/// File-offset window of the marker section.
fn marker_section_window(data: &[u8]) -> Result<(usize, usize)> {
    let pe = goblin::pe::PE::parse(data)?;
    for section in &pe.sections {
        if section.name().map(|n| n == MARKER_SECTION).unwrap_or(false) {
            let offset = section.pointer_to_raw_data as usize;
            let size = section.size_of_raw_data as usize;
            if offset == 0 || offset + size > data.len() {
                bail!("stub marker section points outside the image");
            }
            return Ok((offset, size));
        }
    }
    bail!("stub executable has no {MARKER_SECTION} section")
}

/// Copies the stub and appends the containers in order: UX first, then
/// every attached container.
///
/// Returns the attachment index that was written into the marker section.
pub fn build_bundle_exe(
    stub: &Path,
    output: &Path,
    ux_container: &Path,
    attached: &[(String, PathBuf)],
) -> Result<Vec<AttachedContainer>> {
    let stub_data = std::fs::read(stub).fs_context("reading stub executable", stub)?;
    let (marker_offset, marker_size) = marker_section_window(&stub_data)
        .with_context(|| format!("inspecting stub '{}'", stub.display()))?;

    let entry_count = 1 + attached.len();
    let index_size = MARKER_MAGIC.len() + 4 + entry_count * 16;
    if index_size > marker_size {
        bail!(
            "stub marker section holds {marker_size} bytes but {entry_count} containers need {index_size}"
        );
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).fs_context("creating bundle directory", parent)?;
    }
    std::fs::copy(stub, output).fs_context("copying stub executable", stub)?;

    let mut bundle = OpenOptions::new()
        .write(true)
        .open(output)
        .fs_context("opening bundle for writing", output)?;
    let mut offset = bundle.seek(SeekFrom::End(0))?;

    let mut containers = Vec::with_capacity(entry_count);
    let mut append = |bundle: &mut File, id: &str, source: &Path, offset: &mut u64| -> Result<AttachedContainer> {
        let mut input = File::open(source).fs_context("opening container", source)?;
        let size = std::io::copy(&mut input, bundle)?;
        let container = AttachedContainer {
            id: id.to_string(),
            source: source.to_path_buf(),
            offset: *offset,
            size,
        };
        *offset += size;
        Ok(container)
    };

    containers.push(append(&mut bundle, "UX", ux_container, &mut offset)?);
    for (id, source) in attached {
        containers.push(append(&mut bundle, id, source, &mut offset)?);
    }

    // Rewrite the marker section with the container index.
    let mut index = Vec::with_capacity(index_size);
    index.extend_from_slice(MARKER_MAGIC);
    index.extend_from_slice(&(containers.len() as u32).to_le_bytes());
    for container in &containers {
        index.extend_from_slice(&container.offset.to_le_bytes());
        index.extend_from_slice(&container.size.to_le_bytes());
    }
    bundle.seek(SeekFrom::Start(marker_offset as u64))?;
    bundle.write_all(&index)?;
    bundle.flush()?;

    log::info!(
        "attached {} container(s) to {}",
        containers.len(),
        output.display()
    );
    Ok(containers)
}

/// Patches registration metadata into the stub's reserved string markers.
///
/// Missing markers are not an error; a stub without display resources
/// simply ships unbranded.
pub fn patch_registration(output: &Path, bundle: &BundleInfo) -> Result<()> {
    let mut data = std::fs::read(output).fs_context("reading bundle executable", output)?;
    let mut patched = false;
    patched |= patch_marker_string(&mut data, DISPLAY_NAME_MARKER, &bundle.name);
    patched |= patch_marker_string(&mut data, VERSION_MARKER, &bundle.version);
    if patched {
        std::fs::write(output, data).fs_context("writing patched bundle", output)?;
        log::debug!("patched registration metadata into {}", output.display());
    } else {
        log::debug!("stub carries no registration markers, skipping patch");
    }
    Ok(())
}

/// Writes `value` into the reserved space after `marker`, when present
/// and large enough.
fn patch_marker_string(data: &mut [u8], marker: &[u8], value: &str) -> bool {
    let Some(position) = find_pattern(data, marker) else {
        return false;
    };
    let write_pos = position + marker.len() + 1;
    let bytes = value.as_bytes();
    if write_pos + bytes.len() + 1 > data.len() {
        log::warn!("marker found but not enough reserved space for {} bytes", bytes.len());
        return false;
    }
    data[write_pos..write_pos + bytes.len()].copy_from_slice(bytes);
    data[write_pos + bytes.len()] = 0;
    true
}

fn find_pattern(data: &[u8], pattern: &[u8]) -> Option<usize> {
    data.windows(pattern.len()).position(|window| window == pattern)
}

/// Reads the container index back out of a bundle executable.
///
/// Used by tests and by layout verification.
pub fn read_container_index(bundle: &Path) -> Result<Vec<(u64, u64)>> {
    let data = std::fs::read(bundle).fs_context("reading bundle executable", bundle)?;
    let (offset, size) = marker_section_window(&data)?;
    parse_container_index(&data[offset..offset + size])
}

/// Decodes the marker-section container index. A corrupt or truncated
/// section is an error, never a panic.
fn parse_container_index(window: &[u8]) -> Result<Vec<(u64, u64)>> {
    if window.len() < 8 || &window[..4] != MARKER_MAGIC {
        bail!("bundle marker section holds no container index");
    }
    let count = u32::from_le_bytes(le_bytes(&window[4..8])) as usize;
    let needed = count
        .checked_mul(16)
        .and_then(|entries| entries.checked_add(8));
    match needed {
        Some(needed) if needed <= window.len() => {}
        _ => bail!("bundle container index declares {count} entries but the section is truncated"),
    }
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let base = 8 + i * 16;
        let container_offset = u64::from_le_bytes(le_bytes(&window[base..base + 8]));
        let container_size = u64::from_le_bytes(le_bytes(&window[base + 8..base + 16]));
        entries.push((container_offset, container_size));
    }
    Ok(entries)
}

/// Fixed-size copy of an exact-length slice. Callers bounds-check first.
fn le_bytes<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_search_finds_markers() {
        let data = b"prefix __MKBURN_DISPLAY_NAME\0                    suffix";
        assert_eq!(find_pattern(data, DISPLAY_NAME_MARKER), Some(7));
        assert_eq!(find_pattern(b"nothing here", DISPLAY_NAME_MARKER), None);
    }

    #[test]
    fn marker_string_patch_respects_reserved_space() {
        let mut data = b"__MKBURN_VERSION\0        ".to_vec();
        assert!(patch_marker_string(&mut data, VERSION_MARKER, "1.2.3"));
        let written = &data[VERSION_MARKER.len() + 1..VERSION_MARKER.len() + 1 + 6];
        assert_eq!(written, b"1.2.3\0");

        let mut tiny = b"__MKBURN_VERSION\0".to_vec();
        assert!(!patch_marker_string(&mut tiny, VERSION_MARKER, "1.2.3"));
    }

    #[test]
    fn container_index_round_trips() {
        let mut window = Vec::new();
        window.extend_from_slice(MARKER_MAGIC);
        window.extend_from_slice(&2u32.to_le_bytes());
        for (offset, size) in [(100u64, 10u64), (110, 20)] {
            window.extend_from_slice(&offset.to_le_bytes());
            window.extend_from_slice(&size.to_le_bytes());
        }
        let entries = parse_container_index(&window).unwrap();
        assert_eq!(entries, vec![(100, 10), (110, 20)]);
    }

    #[test]
    fn truncated_container_index_is_an_error_not_a_panic() {
        // Too short for even the magic and count.
        assert!(parse_container_index(b"MK").is_err());

        // Wrong magic.
        assert!(parse_container_index(b"XXXX\x01\x00\x00\x00").is_err());

        // Count promises more entries than the section holds.
        let mut window = Vec::new();
        window.extend_from_slice(MARKER_MAGIC);
        window.extend_from_slice(&5u32.to_le_bytes());
        window.extend_from_slice(&[0u8; 16]);
        let err = parse_container_index(&window).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn missing_marker_section_is_reported() {
        // A stub that is not a PE image at all.
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("stub.exe");
        std::fs::write(&stub, vec![0u8; 128]).unwrap();
        let ux = dir.path().join("ux.cab");
        std::fs::write(&ux, b"cab").unwrap();
        let out = dir.path().join("bundle.exe");
        assert!(build_bundle_exe(&stub, &out, &ux, &[]).is_err());
    }
}
