//! The bind pipeline.
//!
//! [`Binder::bind`] dispatches on the output kind. Installer databases run
//! the full phase sequence: field resolution, integrity checks, unreal
//! merging, GUID generation, merge-module loading, sequencing, cabinets,
//! database generation, native merge, validation, and layout. Transforms
//! and bundles take their own shorter paths. Phases execute strictly in
//! order because later phases depend on the mutated table model; the
//! cabinet pipeline is the only parallel region.
//!
//! Authoring errors accumulate in a [`Messages`] sink across phases and
//! fail the bind at defined checkpoints, so one run reports everything.

pub mod bundle;
pub mod cabinet;
pub mod database;
pub mod error;
pub mod guid;
pub mod layout;
pub mod merge;
pub mod messages;
pub mod resolve;
pub mod sequence;
pub mod transform;
pub mod unreal;
pub mod validate;
pub mod verify;

use crate::binder::cabinet::CabinetOptions;
use crate::binder::database::{DatabaseOptions, SubStorageFile};
use crate::binder::error::{Context, Error, ErrorExt, Result};
use crate::binder::messages::Messages;
use crate::binder::resolve::FieldResolver;
use crate::binder::transform::{BuiltinEngine, InstallerEngine};
use crate::binder::validate::ValidationOptions;
use crate::model::{CompressionLevel, Output, OutputKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Hook points extensions attach to.
///
/// Every hook defaults to a no-op; extensions override the phases they
/// care about and may mutate the output or add diagnostics.
#[allow(unused_variables)]
pub trait BinderExtension {
    fn pre_database(&mut self, output: &mut Output, messages: &mut Messages) -> Result<()> {
        Ok(())
    }
    fn post_database(&mut self, output: &mut Output, messages: &mut Messages) -> Result<()> {
        Ok(())
    }
    fn pre_transform(&mut self, output: &mut Output, messages: &mut Messages) -> Result<()> {
        Ok(())
    }
    fn post_transform(&mut self, output: &mut Output, messages: &mut Messages) -> Result<()> {
        Ok(())
    }
    fn pre_bundle(&mut self, output: &mut Output, messages: &mut Messages) -> Result<()> {
        Ok(())
    }
    fn post_bundle(&mut self, output: &mut Output, messages: &mut Messages) -> Result<()> {
        Ok(())
    }
}

/// Options controlling one bind.
#[derive(Debug, Default)]
pub struct BindOptions {
    /// Scratch directory override; a temp directory is used when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Default cabinet compression level.
    pub default_compression: CompressionLevel,
    /// Cabinet worker-pool override.
    pub cabinet_threads: Option<usize>,
    /// Select the backwards-compatible component-GUID variant.
    pub legacy_guids: bool,
    /// Skip `_Validation` generation.
    pub suppress_validation_table: bool,
    /// External validator settings.
    pub validation: ValidationOptions,
    /// Skip layout transfers.
    pub suppress_layout: bool,
    /// Layout directory; defaults to the output's directory.
    pub layout_dir: Option<PathBuf>,
    /// Caller-supplied bind-variable overrides.
    pub bind_variables: HashMap<String, String>,
    /// Debug-database (JSON model dump) path.
    pub pdb_path: Option<PathBuf>,
}

/// Converts a table model into a binary artifact.
pub struct Binder {
    options: BindOptions,
    extensions: Vec<Box<dyn BinderExtension>>,
    installer_engine: Box<dyn InstallerEngine>,
    merge_engine: Option<Box<dyn merge::MergeEngine>>,
}

impl Binder {
    pub fn new(options: BindOptions) -> Self {
        Self {
            options,
            extensions: Vec::new(),
            installer_engine: Box::new(BuiltinEngine),
            merge_engine: None,
        }
    }

    /// Registers an extension; hooks run in registration order.
    pub fn add_extension(&mut self, extension: Box<dyn BinderExtension>) {
        self.extensions.push(extension);
    }

    /// Replaces the transform diff engine.
    pub fn set_installer_engine(&mut self, engine: Box<dyn InstallerEngine>) {
        self.installer_engine = engine;
    }

    /// Replaces the merge engine.
    pub fn set_merge_engine(&mut self, engine: Box<dyn merge::MergeEngine>) {
        self.merge_engine = Some(engine);
    }

    /// Binds an output to its artifact at `path`.
    ///
    /// Diagnostics accumulate in `messages`; the caller owns the sink and
    /// decides how to present it.
    pub async fn bind(
        &mut self,
        output: &mut Output,
        path: &Path,
        messages: &mut Messages,
    ) -> Result<()> {
        let _scratch_guard;
        let scratch: PathBuf = match &self.options.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).fs_context("creating scratch directory", dir)?;
                dir.clone()
            }
            None => {
                let tempdir = tempfile::tempdir().fs_context("creating scratch directory", ".")?;
                let path = tempdir.path().to_path_buf();
                _scratch_guard = tempdir;
                path
            }
        };

        log::info!("binding {} to {}", output.kind(), path.display());

        let result = match output.kind() {
            OutputKind::Product | OutputKind::Module | OutputKind::Patch => {
                self.bind_database(output, path, &scratch, messages).await
            }
            OutputKind::Transform => self.bind_transform(output, path, &scratch, messages),
            OutputKind::Bundle => self.bind_bundle(output, path, &scratch, messages),
        };

        if self.options.scratch_dir.is_some() {
            layout::cleanup_scratch(&scratch, messages);
        }

        match result {
            Ok(()) if messages.has_errors() => Err(Error::BindFailed(messages.error_count())),
            other => other,
        }
    }

    /// The full installer-database pipeline.
    async fn bind_database(
        &mut self,
        output: &mut Output,
        path: &Path,
        scratch: &Path,
        messages: &mut Messages,
    ) -> Result<()> {
        let mut resolver =
            FieldResolver::from_output(output, &self.options.bind_variables, scratch);
        let delayed = resolver.resolve_output(output, messages)?;

        verify::check_duplicate_keys(output, messages);
        verify::check_simple_references(output, messages);

        let mut files = unreal::build_file_rows(output, messages);
        let mut media = unreal::build_media_rows(output, messages);

        let modules = merge::load_merge_modules(
            output,
            &mut files,
            scratch,
            self.options.suppress_layout,
            messages,
        )?;

        guid::generate_component_guids(output, &files, self.options.legacy_guids, messages);
        sequence::assign_sequences(&mut files, &mut media, messages);

        if !delayed.is_empty() {
            let bind_values = bind_time_values(&files);
            resolver.resolve_delayed(output, &delayed, &bind_values, messages)?;
        }

        files.write_back(output);
        media.write_back(output);
        unreal::normalize_file_table(output);

        // No output file is produced once authoring errors exist.
        if messages.has_errors() {
            return Err(Error::BindFailed(messages.error_count()));
        }

        for extension in &mut self.extensions {
            extension.pre_database(output, messages)?;
        }

        let default_compressed = package_is_compressed(output);
        let cabinet_options = CabinetOptions {
            default_compression: self.options.default_compression,
            default_compressed,
            threads: self.options.cabinet_threads,
        };
        let plans = cabinet::plan_cabinets(&files, &media, &cabinet_options, messages);
        let cabinet_dir = scratch.join("cabs");
        let artifacts =
            cabinet::build_cabinets(plans, &cabinet_dir, &cabinet_options, messages).await?;

        // Patch sub-storages bind recursively before the container write.
        let mut sub_storage_files: Vec<SubStorageFile> = Vec::new();
        for (index, storage) in output.sub_storages().iter().enumerate() {
            let storage_path = scratch.join(format!("substorage.{index}.mst"));
            let storage_scratch = scratch.join(format!("substorage.{index}"));
            transform::bind_transform(
                &storage.data,
                &storage_path,
                &storage_scratch,
                self.installer_engine.as_ref(),
            )
            .with_context(|| format!("binding patch transform '{}'", storage.name))?;
            sub_storage_files.push(SubStorageFile {
                name: storage.name.clone(),
                path: storage_path,
            });
        }

        let database_options = DatabaseOptions {
            suppress_validation_table: self.options.suppress_validation_table,
        };
        database::generate_database(output, path, &database_options, &sub_storage_files)?;
        cabinet::embed_cabinets(path, &artifacts)?;

        if !modules.is_empty() {
            let mut builtin;
            let engine: &mut dyn merge::MergeEngine = match &mut self.merge_engine {
                Some(engine) => engine.as_mut(),
                None => {
                    builtin = merge::BuiltinMergeEngine::new(&scratch.join("merge"));
                    &mut builtin
                }
            };
            merge::apply_merge_modules(path, &modules, engine, scratch, messages)?;
            merge::patch_merged_files(path, &files)?;
        }

        for extension in &mut self.extensions {
            extension.post_database(output, messages)?;
        }

        validate::validate_database(path, &self.options.validation, messages)?;

        if !self.options.suppress_layout {
            let layout_dir = self
                .options
                .layout_dir
                .clone()
                .or_else(|| path.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."));
            let transfers =
                layout::plan_transfers(&files, &media, &artifacts, &layout_dir, default_compressed);
            layout::execute_transfers(&transfers, messages)?;
        }

        // The physical database is written; override tables are spent.
        unreal::strip_unreal_tables(output);
        self.dump_debug_database(output)?;
        Ok(())
    }

    fn bind_transform(
        &mut self,
        output: &mut Output,
        path: &Path,
        scratch: &Path,
        messages: &mut Messages,
    ) -> Result<()> {
        let mut resolver =
            FieldResolver::from_output(output, &self.options.bind_variables, scratch);
        resolver.resolve_output(output, messages)?;
        verify::check_duplicate_keys(output, messages);
        if messages.has_errors() {
            return Err(Error::BindFailed(messages.error_count()));
        }

        for extension in &mut self.extensions {
            extension.pre_transform(output, messages)?;
        }
        transform::bind_transform(output, path, scratch, self.installer_engine.as_ref())?;
        for extension in &mut self.extensions {
            extension.post_transform(output, messages)?;
        }
        self.dump_debug_database(output)?;
        Ok(())
    }

    fn bind_bundle(
        &mut self,
        output: &mut Output,
        path: &Path,
        scratch: &Path,
        messages: &mut Messages,
    ) -> Result<()> {
        let mut resolver =
            FieldResolver::from_output(output, &self.options.bind_variables, scratch);
        resolver.resolve_output(output, messages)?;
        verify::check_duplicate_keys(output, messages);
        if messages.has_errors() {
            return Err(Error::BindFailed(messages.error_count()));
        }

        for extension in &mut self.extensions {
            extension.pre_bundle(output, messages)?;
        }
        bundle::bind_bundle(output, path, scratch, messages)?;
        for extension in &mut self.extensions {
            extension.post_bundle(output, messages)?;
        }
        self.dump_debug_database(output)?;
        Ok(())
    }

    /// Dumps the post-bind table model as JSON for debugging tools.
    fn dump_debug_database(&self, output: &Output) -> Result<()> {
        let Some(pdb_path) = &self.options.pdb_path else {
            return Ok(());
        };
        if let Some(parent) = pdb_path.parent() {
            std::fs::create_dir_all(parent).fs_context("creating debug-database directory", parent)?;
        }
        let file = std::fs::File::create(pdb_path).fs_context("creating debug database", pdb_path)?;
        serde_json::to_writer_pretty(file, output)?;
        log::debug!("wrote debug database {}", pdb_path.display());
        Ok(())
    }
}

/// Whether files default to compressed, from bit 2 of the summary word
/// count. Absent summary rows default to compressed.
fn package_is_compressed(output: &Output) -> bool {
    let Some(table) = output.table("_SummaryInformation") else {
        return true;
    };
    for row in table.rows() {
        if row.data(0).as_int() == Some(15) {
            let word_count: i32 = row.data(1).to_string().trim().parse().unwrap_or(0);
            return word_count & 0x2 != 0;
        }
    }
    true
}

/// Bind-time values available to `!(bind.*)` references: per-file version
/// and size, known only after file rows are resolved.
fn bind_time_values(files: &crate::model::FileRowCollection) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for row in files.rows() {
        if let Some(version) = &row.version {
            values.insert(format!("fileVersion.{}", row.file), version.clone());
        }
        let size = if row.file_size > 0 {
            row.file_size as u64
        } else {
            std::fs::metadata(&row.source).map(|m| m.len()).unwrap_or(0)
        };
        values.insert(format!("fileSize.{}", row.file), size.to_string());
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::model::{FieldData, Row, SourceLocation};

    #[test]
    fn bind_time_values_cover_version_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.bin");
        std::fs::write(&source, b"12345").unwrap();
        let mut files = crate::model::FileRowCollection::new();
        files
            .add(crate::model::FileRow {
                file: "FileA".into(),
                component: "c".into(),
                file_name: "a.bin".into(),
                file_size: 0,
                version: Some("1.2.3.4".into()),
                language: None,
                attributes: 0,
                sequence: 1,
                disk_id: 1,
                source,
                patch_group: None,
                from_module: None,
                source_location: SourceLocation::default(),
                row_index: Some(0),
            })
            .unwrap();
        let values = bind_time_values(&files);
        assert_eq!(values["fileVersion.FileA"], "1.2.3.4");
        assert_eq!(values["fileSize.FileA"], "5");
    }

    #[tokio::test]
    async fn accumulated_errors_fail_before_any_output() {
        let mut output = Output::new(OutputKind::Product);
        let table = output.ensure_table(&schema::property());
        for _ in 0..2 {
            table.push_row(Row::from_data(
                SourceLocation::new("product.wxs", 1),
                vec!["Dup".into(), "x".into()],
            ));
        }
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.msi");
        let mut binder = Binder::new(BindOptions::default());
        let mut messages = Messages::new();
        let err = binder
            .bind(&mut output, &target, &mut messages)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BindFailed(_)));
        assert!(!target.exists());
        assert!(messages.has_errors());
    }

    #[tokio::test]
    async fn empty_product_binds_to_a_database() {
        let mut output = Output::new(OutputKind::Product);
        let table = output.ensure_table(&schema::property());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["ProductName".into(), "Sample".into()],
        ));
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.msi");
        let mut binder = Binder::new(BindOptions {
            suppress_layout: true,
            validation: ValidationOptions {
                suppress: true,
                ..Default::default()
            },
            ..Default::default()
        });
        binder
            .bind(&mut output, &target, &mut Messages::new())
            .await
            .unwrap();
        assert!(target.is_file());

        let mut package = msi::open(&target).unwrap();
        let names: Vec<String> = package
            .select_rows(msi::Select::table("Property"))
            .unwrap()
            .map(|row| row[0].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, ["ProductName"]);
    }

    #[derive(Default)]
    struct RecordingExtension {
        calls: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl BinderExtension for RecordingExtension {
        fn pre_database(&mut self, _: &mut Output, _: &mut Messages) -> Result<()> {
            self.calls.lock().unwrap().push("pre");
            Ok(())
        }
        fn post_database(&mut self, _: &mut Output, _: &mut Messages) -> Result<()> {
            self.calls.lock().unwrap().push("post");
            Ok(())
        }
    }

    #[tokio::test]
    async fn extension_hooks_wrap_database_generation() {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut output = Output::new(OutputKind::Product);
        output.ensure_table(&schema::property()).push_row(Row::from_data(
            SourceLocation::default(),
            vec!["A".into(), FieldData::Str("1".into())],
        ));
        let dir = tempfile::tempdir().unwrap();
        let mut binder = Binder::new(BindOptions {
            suppress_layout: true,
            validation: ValidationOptions {
                suppress: true,
                ..Default::default()
            },
            ..Default::default()
        });
        binder.add_extension(Box::new(RecordingExtension {
            calls: calls.clone(),
        }));
        binder
            .bind(&mut output, &dir.path().join("out.msi"), &mut Messages::new())
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), ["pre", "post"]);
    }
}
