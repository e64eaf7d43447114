//! Merge-module integration.
//!
//! Runs in two passes. Before database generation, each authored module is
//! opened read-only: its File table materializes synthetic file rows that
//! join the shared collection (so sequencing and cabinets see them), and
//! its embedded cabinet is extracted into a per-module scratch directory.
//! After the product database exists, a [`MergeEngine`] session merges
//! every module into it; the session is all-or-nothing, and structured
//! error records map to specific diagnostics. Finally the merged File rows
//! are patched in place so attributes and sequence numbers match the
//! compression policy and the ordering computed during sequencing.

use crate::bail;
use crate::binder::error::{Context, Error, ErrorExt, Result};
use crate::binder::messages::Messages;
use crate::binder::unreal;
use crate::model::{
    FileRow, FileRowCollection, Output, SourceLocation, FILE_ATTR_COMPRESSED,
    FILE_ATTR_NONCOMPRESSED,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Stream holding a merge module's embedded cabinet.
const MODULE_CABINET_STREAM: &str = "MergeModule.CABinet";

/// String content of a database cell. `msi::Value`'s `Display` renders
/// strings quoted, so read-backs go through this instead.
fn cell_text(value: &msi::Value) -> String {
    match value {
        msi::Value::Str(s) => s.clone(),
        msi::Value::Int(i) => i.to_string(),
        msi::Value::Null => String::new(),
    }
}

/// Classified error records surfaced by a merge session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeErrorKind {
    /// A module excludes another module that is also being merged.
    Exclusion,
    /// The feature a module row should connect to does not exist.
    MissingFeature,
    /// Module language does not satisfy the requested language.
    LanguageMismatch,
    /// A table row in the module conflicts with the target database.
    TableConflict,
    /// Module platform does not match the package platform.
    PlatformMismatch,
    /// A standard action was moved to accommodate the module.
    RescheduledAction,
}

/// One structured diagnostic from the engine.
#[derive(Clone, Debug)]
pub struct MergeRecord {
    pub kind: MergeErrorKind,
    pub table: Option<String>,
    pub detail: String,
}

/// Narrow capability interface over the merge machinery, so integration
/// logic tests against a fake.
pub trait MergeEngine {
    fn open_log(&mut self, path: &Path) -> Result<()>;
    fn open_database(&mut self, path: &Path) -> Result<()>;
    fn open_module(&mut self, path: &Path, language: i32) -> Result<()>;
    /// Applies one configuration name/value pair.
    fn configure(&mut self, name: &str, value: &str) -> Result<()>;
    /// Merges the open module against a feature and root directory.
    fn merge(&mut self, feature: &str, directory: &str) -> Result<()>;
    /// Connects the open module to a secondary feature.
    fn connect_feature(&mut self, feature: &str) -> Result<()>;
    /// Drains the structured error records collected so far.
    fn error_records(&mut self) -> Vec<MergeRecord>;
    fn close_module(&mut self) -> Result<()>;
    /// Ends the session; `commit` is false when any module failed.
    fn close_database(&mut self, commit: bool) -> Result<()>;
}

/// One authored merge-module reference, joined with its secondary
/// features.
#[derive(Clone, Debug)]
pub struct ModuleReference {
    pub id: String,
    pub feature: String,
    pub directory: String,
    pub source: PathBuf,
    pub language: i32,
    /// Overrides the file-compression attribute of merged files.
    pub file_compression: Option<bool>,
    /// Decoded configuration pairs.
    pub configuration: Vec<(String, String)>,
    pub connected_features: Vec<String>,
    pub source_location: SourceLocation,
}

/// Decodes percent-escaped reserved characters in configuration data.
///
/// Malformed escapes pass through untouched rather than corrupting the
/// value.
pub fn percent_unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parses `name=value;name=value` configuration data with percent escapes.
fn parse_configuration(data: &str) -> Vec<(String, String)> {
    data.split(';')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((percent_unescape(name), percent_unescape(value)))
        })
        .collect()
}

/// Reads the authored module references out of the unreal merge tables.
pub fn module_references(output: &Output) -> Vec<ModuleReference> {
    let mut connected: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(table) = output.table("BindMergeFeatures") {
        for row in table.rows() {
            connected
                .entry(row.data(0).to_string())
                .or_default()
                .push(row.data(1).to_string());
        }
    }

    let Some(table) = output.table("BindMerge") else {
        return Vec::new();
    };
    table
        .rows()
        .iter()
        .map(|row| {
            let id = row.data(0).to_string();
            ModuleReference {
                feature: row.data(1).to_string(),
                directory: row.data(2).to_string(),
                source: PathBuf::from(row.data(3).to_string()),
                language: row.data(4).as_int().unwrap_or(0),
                file_compression: row.data(5).as_int().map(|v| v != 0),
                configuration: row
                    .data(6)
                    .as_str()
                    .map(parse_configuration)
                    .unwrap_or_default(),
                connected_features: connected.remove(&id).unwrap_or_default(),
                source_location: row.source().clone(),
                id,
            }
        })
        .collect()
}

/// Materializes a module's File table as synthetic file rows.
fn read_module_files(module: &ModuleReference, extract_dir: &Path) -> Result<Vec<FileRow>> {
    let mut package = msi::open(&module.source)
        .with_context(|| format!("opening merge module '{}'", module.source.display()))?;
    if !package.has_table("File") {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for row in package.select_rows(msi::Select::table("File"))? {
        let id = cell_text(&row[0]);
        let mut attributes = match &row[6] {
            msi::Value::Int(bits) => *bits,
            _ => 0,
        };
        if let Some(compressed) = module.file_compression {
            attributes &= !(FILE_ATTR_COMPRESSED | FILE_ATTR_NONCOMPRESSED);
            attributes |= if compressed {
                FILE_ATTR_COMPRESSED
            } else {
                FILE_ATTR_NONCOMPRESSED
            };
        }
        rows.push(FileRow {
            source: extract_dir.join(&id),
            file: id,
            component: cell_text(&row[1]),
            file_name: cell_text(&row[2]),
            file_size: match &row[3] {
                msi::Value::Int(size) => i64::from(*size),
                _ => 0,
            },
            version: None,
            language: None,
            attributes,
            sequence: 0,
            disk_id: 1,
            patch_group: None,
            from_module: Some(module.id.clone()),
            source_location: module.source_location.clone(),
            row_index: None,
        });
    }
    Ok(rows)
}

/// Extracts the module's embedded cabinet into `extract_dir`.
fn extract_module_cabinet(module: &ModuleReference, extract_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(extract_dir).fs_context("creating module scratch", extract_dir)?;
    let mut package = msi::open(&module.source)
        .with_context(|| format!("opening merge module '{}'", module.source.display()))?;
    if !package.has_stream(MODULE_CABINET_STREAM) {
        log::debug!("module '{}' carries no embedded cabinet", module.id);
        return Ok(());
    }

    let cabinet_path = extract_dir.join("module.cab");
    {
        let mut stream = package.read_stream(MODULE_CABINET_STREAM)?;
        let mut out = File::create(&cabinet_path).fs_context("writing module cabinet", &cabinet_path)?;
        std::io::copy(&mut stream, &mut out)?;
    }

    let mut cabinet = cab::Cabinet::new(File::open(&cabinet_path).fs_context("opening module cabinet", &cabinet_path)?)?;
    let names: Vec<String> = cabinet
        .folder_entries()
        .flat_map(|f| f.file_entries())
        .map(|f| f.name().to_string())
        .collect();
    for name in names {
        let mut data = Vec::new();
        cabinet.read_file(&name)?.read_to_end(&mut data)?;
        let dest = extract_dir.join(&name);
        File::create(&dest)
            .fs_context("extracting module file", &dest)?
            .write_all(&data)?;
    }
    Ok(())
}

/// Pre-database pass: folds module file rows into the shared collection
/// and extracts module cabinets.
///
/// File-id collisions are reported per module; extraction is skipped when
/// layout is suppressed since the payload bytes are never needed.
pub fn load_merge_modules(
    output: &Output,
    files: &mut FileRowCollection,
    scratch: &Path,
    suppress_layout: bool,
    messages: &mut Messages,
) -> Result<Vec<ModuleReference>> {
    let modules = module_references(output);
    for module in &modules {
        if !module.source.is_file() {
            messages.error_at(
                &module.source_location,
                format!(
                    "merge module '{}' source '{}' was not found",
                    module.id,
                    module.source.display()
                ),
            );
            continue;
        }
        let extract_dir = scratch.join("merge").join(&module.id);
        if !suppress_layout {
            extract_module_cabinet(module, &extract_dir)?;
        }
        let module_files = read_module_files(module, &extract_dir)?;
        unreal::merge_module_files(files, &module.id, module_files, messages);
    }
    Ok(modules)
}

/// Maps one engine record to a diagnostic.
fn report_record(module: &ModuleReference, record: &MergeRecord, messages: &mut Messages) {
    let table = record.table.as_deref().unwrap_or("<none>");
    match record.kind {
        MergeErrorKind::Exclusion => messages.error_at(
            &module.source_location,
            format!("module '{}' is excluded by another merged module: {}", module.id, record.detail),
        ),
        MergeErrorKind::MissingFeature => messages.error_at(
            &module.source_location,
            format!("module '{}' references missing feature: {}", module.id, record.detail),
        ),
        MergeErrorKind::LanguageMismatch => messages.error_at(
            &module.source_location,
            format!(
                "module '{}' does not support language {}: {}",
                module.id, module.language, record.detail
            ),
        ),
        MergeErrorKind::TableConflict => messages.warning(format!(
            "module '{}' caused a merge conflict in table '{table}': {}",
            module.id, record.detail
        )),
        MergeErrorKind::PlatformMismatch => messages.error_at(
            &module.source_location,
            format!("module '{}' targets a different platform: {}", module.id, record.detail),
        ),
        MergeErrorKind::RescheduledAction => messages.warning(format!(
            "module '{}' rescheduled a standard action: {}",
            module.id, record.detail
        )),
    }
}

/// Post-database pass: merges every module into the bound database.
///
/// Any per-module failure leaves the whole session uncommitted.
pub fn apply_merge_modules(
    database: &Path,
    modules: &[ModuleReference],
    engine: &mut dyn MergeEngine,
    scratch: &Path,
    messages: &mut Messages,
) -> Result<()> {
    if modules.is_empty() {
        return Ok(());
    }

    engine.open_log(&scratch.join("merge.log"))?;
    engine.open_database(database)?;
    let mut commit = true;

    for module in modules {
        let merged = merge_one(engine, module, messages);
        for record in engine.error_records() {
            report_record(module, &record, messages);
        }
        if let Err(err) = merged {
            messages.error_at(
                &module.source_location,
                format!("merging module '{}' failed: {err}", module.id),
            );
            commit = false;
        }
        engine.close_module()?;
    }

    if messages.has_errors() {
        commit = false;
    }
    engine.close_database(commit)?;
    if !commit {
        bail!("merge session was not committed");
    }
    Ok(())
}

fn merge_one(
    engine: &mut dyn MergeEngine,
    module: &ModuleReference,
    _messages: &mut Messages,
) -> Result<()> {
    engine.open_module(&module.source, module.language)?;
    for (name, value) in &module.configuration {
        engine.configure(name, value)?;
    }
    engine.merge(&module.feature, &module.directory)?;
    for feature in &module.connected_features {
        engine.connect_feature(feature)?;
    }
    Ok(())
}

/// Rewrites merged File rows in the physical database so attributes and
/// sequences match the collection state computed during sequencing.
pub fn patch_merged_files(database: &Path, files: &FileRowCollection) -> Result<()> {
    let merged: HashMap<&str, &FileRow> = files
        .rows()
        .iter()
        .filter(|f| f.from_module.is_some())
        .map(|f| (f.file.as_str(), f))
        .collect();
    if merged.is_empty() {
        return Ok(());
    }

    let mut package = msi::open_rw(database).fs_context("reopening database", database)?;
    let mut rows: Vec<Vec<msi::Value>> = Vec::new();
    for row in package.select_rows(msi::Select::table("File"))? {
        let mut values: Vec<msi::Value> = (0..row.len()).map(|i| row[i].clone()).collect();
        if let Some(file_row) = row[0].as_str().and_then(|id| merged.get(id)) {
            values[6] = msi::Value::Int(file_row.attributes);
            values[7] = msi::Value::Int(file_row.sequence);
        }
        rows.push(values);
    }
    package.delete_rows(msi::Delete::from("File"))?;
    let mut insert = msi::Insert::into("File");
    for values in rows {
        insert = insert.row(values);
    }
    package.insert_rows(insert)?;
    package.flush()?;
    Ok(())
}

/// Pure-Rust engine: copies module tables into a scratch copy of the
/// target database and swaps it in on commit.
pub struct BuiltinMergeEngine {
    scratch: PathBuf,
    log: Option<File>,
    target: Option<(PathBuf, PathBuf)>,
    module: Option<(PathBuf, i32)>,
    records: Vec<MergeRecord>,
}

/// Module tables that describe the module itself and never merge.
const MODULE_ONLY_TABLES: &[&str] = &[
    "ModuleSignature",
    "ModuleComponents",
    "ModuleDependency",
    "ModuleExclusion",
    "ModuleConfiguration",
    "ModuleSubstitution",
    "ModuleIgnoreTable",
    "_Validation",
];

impl BuiltinMergeEngine {
    pub fn new(scratch: &Path) -> Self {
        Self {
            scratch: scratch.to_path_buf(),
            log: None,
            target: None,
            module: None,
            records: Vec::new(),
        }
    }

    fn log_line(&mut self, line: &str) {
        if let Some(log) = &mut self.log {
            let _ = writeln!(log, "{line}");
        }
    }

    fn work_path(&self) -> Result<&Path> {
        match &self.target {
            Some((_, work)) => Ok(work),
            None => bail!("merge engine has no open database"),
        }
    }

    fn check_language(&mut self, package: &mut msi::Package<File>, requested: i32) -> Result<bool> {
        if !package.has_table("ModuleSignature") {
            return Ok(true);
        }
        for row in package.select_rows(msi::Select::table("ModuleSignature"))? {
            let supported = match &row[1] {
                msi::Value::Int(language) => *language,
                _ => 0,
            };
            // Language 0 is neutral on either side.
            if supported != 0 && requested != 0 && supported != requested {
                self.records.push(MergeRecord {
                    kind: MergeErrorKind::LanguageMismatch,
                    table: Some("ModuleSignature".into()),
                    detail: format!("module language {supported}, requested {requested}"),
                });
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl MergeEngine for BuiltinMergeEngine {
    fn open_log(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).fs_context("creating merge log directory", parent)?;
        }
        self.log = Some(File::create(path).fs_context("creating merge log", path)?);
        Ok(())
    }

    fn open_database(&mut self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.scratch).fs_context("creating merge scratch", &self.scratch)?;
        let work = self.scratch.join("merge.work.msi");
        std::fs::copy(path, &work).fs_context("copying database for merge", path)?;
        self.target = Some((path.to_path_buf(), work));
        self.log_line(&format!("open database {}", path.display()));
        Ok(())
    }

    fn open_module(&mut self, path: &Path, language: i32) -> Result<()> {
        self.module = Some((path.to_path_buf(), language));
        self.log_line(&format!("open module {}", path.display()));
        Ok(())
    }

    fn configure(&mut self, name: &str, value: &str) -> Result<()> {
        self.log_line(&format!("configure {name}={value}"));
        Ok(())
    }

    fn merge(&mut self, feature: &str, directory: &str) -> Result<()> {
        let (module_path, language) = match self.module.clone() {
            Some(open) => open,
            None => bail!("merge engine has no open module"),
        };
        let work = self.work_path()?.to_path_buf();
        self.log_line(&format!(
            "merge {} into feature '{feature}' at '{directory}'",
            module_path.display()
        ));

        let mut module = msi::open(&module_path)
            .with_context(|| format!("opening merge module '{}'", module_path.display()))?;
        if !self.check_language(&mut module, language)? {
            bail!("module language mismatch");
        }

        let mut target = msi::open_rw(&work).fs_context("opening merge work database", &work)?;
        let table_names: Vec<String> = module
            .tables()
            .map(|t| t.name().to_string())
            .filter(|name| !MODULE_ONLY_TABLES.contains(&name.as_str()) && !name.starts_with('_'))
            .collect();

        let mut components: Vec<String> = Vec::new();
        for name in table_names {
            let columns: Vec<msi::Column> = module
                .get_table(&name)
                .map(|t| t.columns().to_vec())
                .unwrap_or_default();
            let existing_keys: Vec<Vec<String>> = if target.has_table(&name) {
                let key_indices: Vec<usize> = columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.is_primary_key())
                    .map(|(i, _)| i)
                    .collect();
                target
                    .select_rows(msi::Select::table(&name))?
                    .map(|row| key_indices.iter().map(|&i| cell_text(&row[i])).collect())
                    .collect()
            } else {
                target.create_table(&name, columns.clone())?;
                Vec::new()
            };

            let key_indices: Vec<usize> = columns
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_primary_key())
                .map(|(i, _)| i)
                .collect();
            let mut insert = msi::Insert::into(&name);
            let mut any = false;
            for row in module.select_rows(msi::Select::table(&name))? {
                let key: Vec<String> = key_indices.iter().map(|&i| cell_text(&row[i])).collect();
                if existing_keys.contains(&key) {
                    self.records.push(MergeRecord {
                        kind: MergeErrorKind::TableConflict,
                        table: Some(name.clone()),
                        detail: format!("row '{}' already exists", key.join("/")),
                    });
                    continue;
                }
                if name == "Component" {
                    components.push(cell_text(&row[0]));
                }
                let values: Vec<msi::Value> = (0..row.len()).map(|i| row[i].clone()).collect();
                insert = insert.row(values);
                any = true;
            }
            if any {
                target.insert_rows(insert)?;
            }
        }

        // Feature connection happens against the target's Feature table.
        let feature_exists = target
            .select_rows(msi::Select::table("Feature"))
            .map(|rows| rows.into_iter().any(|r| r[0].as_str() == Some(feature)))
            .unwrap_or(false);
        if !feature_exists {
            self.records.push(MergeRecord {
                kind: MergeErrorKind::MissingFeature,
                table: Some("Feature".into()),
                detail: format!("feature '{feature}' is not defined"),
            });
            bail!("missing feature '{feature}'");
        }
        if !components.is_empty() {
            let mut insert = msi::Insert::into("FeatureComponents");
            for component in &components {
                insert = insert.row(vec![
                    msi::Value::Str(feature.to_string()),
                    msi::Value::Str(component.clone()),
                ]);
            }
            target.insert_rows(insert)?;
        }
        target.flush()?;
        Ok(())
    }

    fn connect_feature(&mut self, feature: &str) -> Result<()> {
        self.log_line(&format!("connect feature {feature}"));
        let (module_path, _) = match self.module.clone() {
            Some(open) => open,
            None => bail!("merge engine has no open module"),
        };
        let work = self.work_path()?.to_path_buf();
        let mut module = msi::open(&module_path)?;
        if !module.has_table("Component") {
            return Ok(());
        }
        let components: Vec<String> = module
            .select_rows(msi::Select::table("Component"))?
            .map(|row| cell_text(&row[0]))
            .collect();
        let mut target = msi::open_rw(&work).fs_context("opening merge work database", &work)?;
        let mut insert = msi::Insert::into("FeatureComponents");
        for component in &components {
            insert = insert.row(vec![
                msi::Value::Str(feature.to_string()),
                msi::Value::Str(component.clone()),
            ]);
        }
        if !components.is_empty() {
            target.insert_rows(insert)?;
            target.flush()?;
        }
        Ok(())
    }

    fn error_records(&mut self) -> Vec<MergeRecord> {
        std::mem::take(&mut self.records)
    }

    fn close_module(&mut self) -> Result<()> {
        self.module = None;
        Ok(())
    }

    fn close_database(&mut self, commit: bool) -> Result<()> {
        let Some((original, work)) = self.target.take() else {
            return Ok(());
        };
        if commit {
            std::fs::copy(&work, &original).fs_context("committing merged database", &original)?;
            self.log_line("commit");
        } else {
            self.log_line("rollback");
        }
        let _ = std::fs::remove_file(&work);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::model::{OutputKind, Row};

    #[derive(Default)]
    struct FakeEngine {
        calls: Vec<String>,
        records: Vec<MergeRecord>,
        fail_merge: bool,
        committed: Option<bool>,
    }

    impl MergeEngine for FakeEngine {
        fn open_log(&mut self, _: &Path) -> Result<()> {
            self.calls.push("open_log".into());
            Ok(())
        }
        fn open_database(&mut self, _: &Path) -> Result<()> {
            self.calls.push("open_database".into());
            Ok(())
        }
        fn open_module(&mut self, path: &Path, language: i32) -> Result<()> {
            self.calls.push(format!("open_module {} {language}", path.display()));
            Ok(())
        }
        fn configure(&mut self, name: &str, value: &str) -> Result<()> {
            self.calls.push(format!("configure {name}={value}"));
            Ok(())
        }
        fn merge(&mut self, feature: &str, directory: &str) -> Result<()> {
            self.calls.push(format!("merge {feature} {directory}"));
            if self.fail_merge {
                bail!("simulated merge failure");
            }
            Ok(())
        }
        fn connect_feature(&mut self, feature: &str) -> Result<()> {
            self.calls.push(format!("connect {feature}"));
            Ok(())
        }
        fn error_records(&mut self) -> Vec<MergeRecord> {
            std::mem::take(&mut self.records)
        }
        fn close_module(&mut self) -> Result<()> {
            self.calls.push("close_module".into());
            Ok(())
        }
        fn close_database(&mut self, commit: bool) -> Result<()> {
            self.committed = Some(commit);
            Ok(())
        }
    }

    fn module(id: &str) -> ModuleReference {
        ModuleReference {
            id: id.into(),
            feature: "MainFeature".into(),
            directory: "TARGETDIR".into(),
            source: PathBuf::from(format!("{id}.msm")),
            language: 1033,
            file_compression: None,
            configuration: vec![("Prefix".into(), "My".into())],
            connected_features: vec!["Extras".into()],
            source_location: SourceLocation::new("modules.wxs", 4),
        }
    }

    #[test]
    fn percent_escapes_decode() {
        assert_eq!(percent_unescape("a%3db%3bc"), "a=b;c");
        assert_eq!(percent_unescape("100%"), "100%");
        assert_eq!(percent_unescape("plain"), "plain");
    }

    #[test]
    fn configuration_data_splits_into_pairs() {
        let refs = {
            let mut output = Output::new(OutputKind::Product);
            let table = output.ensure_table(&schema::bind_merge());
            table.push_row(Row::from_data(
                SourceLocation::default(),
                vec![
                    "m1".into(),
                    "F".into(),
                    "TARGETDIR".into(),
                    "m1.msm".into(),
                    crate::model::FieldData::Int(1033),
                    crate::model::FieldData::Null,
                    "Name=Value;Escaped=a%3bb".into(),
                ],
            ));
            module_references(&output)
        };
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].configuration[0], ("Name".into(), "Value".into()));
        assert_eq!(refs[0].configuration[1], ("Escaped".into(), "a;b".into()));
    }

    #[test]
    fn session_runs_in_engine_order_and_commits() {
        let mut engine = FakeEngine::default();
        let mut messages = Messages::new();
        let scratch = tempfile::tempdir().unwrap();
        apply_merge_modules(
            Path::new("out.msi"),
            &[module("m1")],
            &mut engine,
            scratch.path(),
            &mut messages,
        )
        .unwrap();
        assert_eq!(engine.committed, Some(true));
        let joined = engine.calls.join(",");
        assert!(joined.contains("open_log"));
        assert!(joined.contains("configure Prefix=My"));
        assert!(joined.contains("merge MainFeature TARGETDIR"));
        assert!(joined.contains("connect Extras"));
    }

    #[test]
    fn failed_merge_leaves_session_uncommitted() {
        let mut engine = FakeEngine {
            fail_merge: true,
            ..Default::default()
        };
        let mut messages = Messages::new();
        let scratch = tempfile::tempdir().unwrap();
        let result = apply_merge_modules(
            Path::new("out.msi"),
            &[module("m1"), module("m2")],
            &mut engine,
            scratch.path(),
            &mut messages,
        );
        assert!(result.is_err());
        assert_eq!(engine.committed, Some(false));
        // Both modules were still attempted so all errors surface at once.
        assert_eq!(messages.error_count(), 2);
    }

    #[test]
    fn merged_file_rows_are_patched_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.msi");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let mut package = msi::Package::create(msi::PackageType::Installer, file).unwrap();
        package
            .create_table(
                "File",
                vec![
                    msi::Column::build("File").primary_key().id_string(72),
                    msi::Column::build("Component_").id_string(72),
                    msi::Column::build("FileName").string(255),
                    msi::Column::build("FileSize").int32(),
                    msi::Column::build("Version").nullable().string(72),
                    msi::Column::build("Language").nullable().string(20),
                    msi::Column::build("Attributes").nullable().int16(),
                    msi::Column::build("Sequence").int32(),
                ],
            )
            .unwrap();
        package
            .insert_rows(msi::Insert::into("File").row(vec![
                msi::Value::Str("ModFile".into()),
                msi::Value::Str("ModComponent".into()),
                msi::Value::Str("mod.dll".into()),
                msi::Value::Int(10),
                msi::Value::Null,
                msi::Value::Null,
                msi::Value::Int(0),
                msi::Value::Int(99),
            ]))
            .unwrap();
        package.flush().unwrap();
        drop(package);

        let mut files = crate::model::FileRowCollection::new();
        files
            .add(FileRow {
                file: "ModFile".into(),
                component: "ModComponent".into(),
                file_name: "mod.dll".into(),
                file_size: 10,
                version: None,
                language: None,
                attributes: FILE_ATTR_COMPRESSED,
                sequence: 7,
                disk_id: 1,
                source: PathBuf::from("mod.dll"),
                patch_group: None,
                from_module: Some("m1".into()),
                source_location: SourceLocation::default(),
                row_index: None,
            })
            .unwrap();

        patch_merged_files(&path, &files).unwrap();

        let mut package = msi::open(&path).unwrap();
        let row = package
            .select_rows(msi::Select::table("File"))
            .unwrap()
            .next()
            .unwrap();
        assert_eq!(row[6], msi::Value::Int(FILE_ATTR_COMPRESSED));
        assert_eq!(row[7], msi::Value::Int(7));
    }

    #[test]
    fn records_map_to_severities() {
        let mut messages = Messages::new();
        let m = module("m1");
        report_record(
            &m,
            &MergeRecord {
                kind: MergeErrorKind::RescheduledAction,
                table: None,
                detail: "InstallFiles moved".into(),
            },
            &mut messages,
        );
        assert!(!messages.has_errors());
        report_record(
            &m,
            &MergeRecord {
                kind: MergeErrorKind::MissingFeature,
                table: Some("Feature".into()),
                detail: "feature 'Gone'".into(),
            },
            &mut messages,
        );
        assert_eq!(messages.error_count(), 1);
    }
}
