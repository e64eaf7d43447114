//! Cabinet creation pipeline.
//!
//! Files are partitioned by their media row and compressed into one
//! cabinet per disk on a bounded worker pool. Compression work is CPU
//! bound, so each cabinet builds inside `spawn_blocking`; one failing
//! cabinet never cancels its siblings, all failures are reported
//! together.

use crate::bail;
use crate::binder::error::{Context, ErrorExt, Result};
use crate::binder::messages::Messages;
use crate::model::{CompressionLevel, FileRowCollection, MediaRowCollection};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;

/// Options for the cabinet phase.
#[derive(Clone, Debug)]
pub struct CabinetOptions {
    /// Compression applied to media rows without an explicit level.
    pub default_compression: CompressionLevel,
    /// Package-level policy for files without an explicit compression
    /// attribute.
    pub default_compressed: bool,
    /// Worker-pool size. Defaults to the machine's logical CPU count.
    pub threads: Option<usize>,
}

impl Default for CabinetOptions {
    fn default() -> Self {
        Self {
            default_compression: CompressionLevel::Medium,
            default_compressed: true,
            threads: None,
        }
    }
}

impl CabinetOptions {
    /// Effective worker count: explicit override, else CPU count, never
    /// less than one.
    pub fn worker_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// One cabinet to build: the files of a single disk, in sequence order.
#[derive(Clone, Debug)]
pub struct CabinetPlan {
    pub disk_id: i32,
    /// Cabinet file name without the embedded-stream `#` prefix.
    pub name: String,
    /// Whether the finished cabinet lands inside the database as a stream.
    pub embedded: bool,
    pub compression: CompressionLevel,
    /// (entry name, source path, sequence) triples.
    pub files: Vec<(String, PathBuf, i32)>,
}

/// A finished cabinet on disk.
#[derive(Clone, Debug)]
pub struct CabinetArtifact {
    pub disk_id: i32,
    pub name: String,
    pub path: PathBuf,
    pub embedded: bool,
}

/// Partitions files into per-media cabinet plans.
///
/// Media rows without a cabinet hold loose files and produce no plan; a
/// cabinet-bearing media row with no files gets a warning and is skipped.
pub fn plan_cabinets(
    files: &FileRowCollection,
    media: &MediaRowCollection,
    options: &CabinetOptions,
    messages: &mut Messages,
) -> Vec<CabinetPlan> {
    let mut plans = Vec::new();
    for media_row in media.rows() {
        let Some(name) = media_row.cabinet_file_name() else {
            continue;
        };
        let mut entries: Vec<(String, PathBuf, i32)> = files
            .rows()
            .iter()
            .filter(|f| f.disk_id == media_row.disk_id && f.is_compressed(options.default_compressed))
            .map(|f| (f.file.clone(), f.source.clone(), f.sequence))
            .collect();
        if entries.is_empty() {
            messages.warning(format!(
                "media {} declares cabinet '{name}' but contains no compressed files",
                media_row.disk_id
            ));
            continue;
        }
        entries.sort_by_key(|(_, _, sequence)| *sequence);
        plans.push(CabinetPlan {
            disk_id: media_row.disk_id,
            name: name.to_string(),
            embedded: media_row.is_embedded(),
            compression: media_row.compression.unwrap_or(options.default_compression),
            files: entries,
        });
    }
    plans
}

/// Builds every planned cabinet under `out_dir` on a bounded pool.
///
/// Returns the artifacts on success. On failure every broken cabinet is
/// reported before the phase errors out.
pub async fn build_cabinets(
    plans: Vec<CabinetPlan>,
    out_dir: &Path,
    options: &CabinetOptions,
    messages: &mut Messages,
) -> Result<Vec<CabinetArtifact>> {
    std::fs::create_dir_all(out_dir).fs_context("creating cabinet directory", out_dir)?;

    let workers = options.worker_count();
    log::debug!("building {} cabinet(s) on {workers} worker(s)", plans.len());

    let mut artifacts = Vec::with_capacity(plans.len());
    let mut pending = plans.into_iter();
    let mut join_set: JoinSet<(i32, String, Result<CabinetArtifact>)> = JoinSet::new();
    let mut failed = false;

    let mut spawn_next = |join_set: &mut JoinSet<_>, plan: CabinetPlan, out_dir: &Path| {
        let path = out_dir.join(&plan.name);
        let disk_id = plan.disk_id;
        let name = plan.name.clone();
        join_set.spawn_blocking(move || {
            let result = build_one(&plan, &path);
            (disk_id, name, result)
        });
    };

    for plan in pending.by_ref().take(workers) {
        spawn_next(&mut join_set, plan, out_dir);
    }
    while let Some(joined) = join_set.join_next().await {
        let (disk_id, name, result) = joined.map_err(|e| {
            crate::binder::error::Error::Generic(format!("cabinet worker panicked: {e}"))
        })?;
        match result {
            Ok(artifact) => {
                log::info!("built cabinet {name} for media {disk_id}");
                artifacts.push(artifact);
            }
            Err(err) => {
                failed = true;
                messages.error(format!("cabinet '{name}' for media {disk_id} failed: {err}"));
            }
        }
        if let Some(plan) = pending.next() {
            spawn_next(&mut join_set, plan, out_dir);
        }
    }

    if failed {
        bail!("one or more cabinets failed to build");
    }
    artifacts.sort_by_key(|a| a.disk_id);
    Ok(artifacts)
}

/// Builds a single cabinet synchronously.
fn build_one(plan: &CabinetPlan, path: &Path) -> Result<CabinetArtifact> {
    let compression = match plan.compression {
        CompressionLevel::None => cab::CompressionType::None,
        _ => cab::CompressionType::MsZip,
    };

    let mut builder = cab::CabinetBuilder::new();
    let folder = builder.add_folder(compression);
    for (entry, _, _) in &plan.files {
        folder.add_file(entry.as_str());
    }

    let out = File::create(path).fs_context("creating cabinet", path)?;
    let mut writer = builder.build(out)?;
    let mut sources = plan.files.iter();
    while let Some(mut file_writer) = writer.next_file()? {
        let (entry, source, _) = sources
            .next()
            .ok_or_else(|| crate::binder::error::Error::Generic("cabinet writer out of sync".into()))?;
        let mut input = File::open(source)
            .with_context(|| format!("opening '{}' for cabinet entry '{entry}'", source.display()))?;
        io::copy(&mut input, &mut file_writer)?;
    }
    writer.finish()?;

    Ok(CabinetArtifact {
        disk_id: plan.disk_id,
        name: plan.name.clone(),
        path: path.to_path_buf(),
        embedded: plan.embedded,
    })
}

/// Copies embedded cabinets into the bound database as named streams.
pub fn embed_cabinets(database: &Path, artifacts: &[CabinetArtifact]) -> Result<()> {
    let embedded: Vec<&CabinetArtifact> = artifacts.iter().filter(|a| a.embedded).collect();
    if embedded.is_empty() {
        return Ok(());
    }
    let mut package = msi::open_rw(database).fs_context("reopening database", database)?;
    for artifact in embedded {
        let mut input = File::open(&artifact.path).fs_context("opening cabinet", &artifact.path)?;
        let mut stream = package.write_stream(&artifact.name)?;
        io::copy(&mut input, &mut stream)?;
        log::debug!("embedded cabinet stream {}", artifact.name);
    }
    package.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileRow, MediaRow, SourceLocation, FILE_ATTR_NONCOMPRESSED};
    use std::io::Write;

    fn file_row(id: &str, disk: i32, sequence: i32, source: PathBuf) -> FileRow {
        FileRow {
            file: id.into(),
            component: "c".into(),
            file_name: format!("{id}.txt"),
            file_size: 0,
            version: None,
            language: None,
            attributes: 0,
            sequence,
            disk_id: disk,
            source,
            patch_group: None,
            from_module: None,
            source_location: SourceLocation::default(),
            row_index: None,
        }
    }

    fn media_row(disk: i32, cabinet: &str) -> MediaRow {
        MediaRow {
            disk_id: disk,
            last_sequence: 0,
            cabinet: Some(cabinet.into()),
            volume_label: None,
            compression: None,
            layout: None,
            row_index: disk as usize - 1,
        }
    }

    #[test]
    fn plans_partition_by_disk_in_sequence_order() {
        let mut files = FileRowCollection::new();
        files.add(file_row("b", 1, 2, "b".into())).unwrap();
        files.add(file_row("a", 1, 1, "a".into())).unwrap();
        files.add(file_row("c", 2, 3, "c".into())).unwrap();
        let mut media = MediaRowCollection::new();
        media.add(media_row(1, "#one.cab")).unwrap();
        media.add(media_row(2, "two.cab")).unwrap();

        let mut messages = Messages::new();
        let plans = plan_cabinets(&files, &media, &CabinetOptions::default(), &mut messages);
        assert_eq!(plans.len(), 2);
        assert!(plans[0].embedded);
        assert_eq!(plans[0].name, "one.cab");
        let ids: Vec<&str> = plans[0].files.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(!plans[1].embedded);
    }

    #[test]
    fn uncompressed_files_stay_out_of_cabinets() {
        let mut files = FileRowCollection::new();
        let mut loose = file_row("loose", 1, 1, "loose".into());
        loose.attributes = FILE_ATTR_NONCOMPRESSED;
        files.add(loose).unwrap();
        let mut media = MediaRowCollection::new();
        media.add(media_row(1, "one.cab")).unwrap();

        let mut messages = Messages::new();
        let plans = plan_cabinets(&files, &media, &CabinetOptions::default(), &mut messages);
        assert!(plans.is_empty());
        // The empty cabinet is worth a warning but never an error.
        assert!(!messages.has_errors());
    }

    #[tokio::test]
    async fn builds_a_cabinet_and_reads_it_back() {
        let scratch = tempfile::tempdir().unwrap();
        let source = scratch.path().join("hello.txt");
        std::fs::File::create(&source)
            .unwrap()
            .write_all(b"hello cabinet")
            .unwrap();

        let plan = CabinetPlan {
            disk_id: 1,
            name: "media1.cab".into(),
            embedded: false,
            compression: CompressionLevel::Medium,
            files: vec![("FileA".into(), source, 1)],
        };
        let mut messages = Messages::new();
        let artifacts = build_cabinets(
            vec![plan],
            scratch.path(),
            &CabinetOptions::default(),
            &mut messages,
        )
        .await
        .unwrap();
        assert_eq!(artifacts.len(), 1);

        let mut cabinet = cab::Cabinet::new(File::open(&artifacts[0].path).unwrap()).unwrap();
        let mut data = Vec::new();
        io::Read::read_to_end(&mut cabinet.read_file("FileA").unwrap(), &mut data).unwrap();
        assert_eq!(data, b"hello cabinet");
    }

    #[tokio::test]
    async fn missing_source_fails_without_poisoning_others() {
        let scratch = tempfile::tempdir().unwrap();
        let good_source = scratch.path().join("ok.txt");
        std::fs::write(&good_source, b"ok").unwrap();

        let good = CabinetPlan {
            disk_id: 1,
            name: "good.cab".into(),
            embedded: false,
            compression: CompressionLevel::High,
            files: vec![("Ok".into(), good_source, 1)],
        };
        let bad = CabinetPlan {
            disk_id: 2,
            name: "bad.cab".into(),
            embedded: false,
            compression: CompressionLevel::High,
            files: vec![("Gone".into(), scratch.path().join("missing.bin"), 2)],
        };

        let mut messages = Messages::new();
        let result = build_cabinets(
            vec![good, bad],
            scratch.path(),
            &CabinetOptions::default(),
            &mut messages,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(messages.error_count(), 1);
        assert!(scratch.path().join("good.cab").is_file());
    }
}
