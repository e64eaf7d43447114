//! Transform generation.
//!
//! A transform-kind [`Output`] arrives with per-row operations and per-field
//! modified flags already set upstream. This phase synthesizes the two
//! halves of the diff: a "target" (before) and an "updated" (after)
//! database. Added rows land only in the updated half; deleted rows land in
//! the target half with sentinel values in every non-key cell, because
//! installer transforms require full rows for deletions. Modified rows are
//! written to both halves with the target-side cells deliberately set to a
//! different-but-valid value so the diff records the change. Both halves
//! are physically generated and then diffed by an [`InstallerEngine`]; an
//! empty diff is an error, never a silent no-op.

use crate::bail;
use crate::binder::database::{generate_database, DatabaseOptions};
use crate::binder::error::{Context, Error, ErrorExt, Result};
use crate::model::{
    ColumnType, FieldData, Output, OutputKind, Row, RowOperation, Table, TableOperation,
};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Summary validation flag: transform application must check the upgrade
/// code.
pub const TRANSFORM_VALIDATE_UPGRADE_CODE: i32 = 0x0800;

/// Summary property ids with transform-specific encodings.
const PID_TEMPLATE: i32 = 7;
const PID_REVISION: i32 = 9;
const PID_VALIDATION_FLAGS: i32 = 16;

/// Produces the binary transform from two physically generated databases.
///
/// Returns `Ok(false)` when the databases are identical, in which case the
/// caller reports an empty-transform error. A fake implementation keeps the
/// diff logic testable without a real installer service.
pub trait InstallerEngine {
    fn diff_databases(&self, target: &Path, updated: &Path, transform: &Path) -> Result<bool>;
}

/// Transform summary fields pulled out of the generic summary table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformSummary {
    pub template: Option<String>,
    pub target_product_code: Option<String>,
    pub target_version: Option<String>,
    pub updated_product_code: Option<String>,
    pub updated_version: Option<String>,
    pub upgrade_code: Option<String>,
    pub validation_flags: i32,
}

impl TransformSummary {
    /// Reads the special fields from a transform output's summary table.
    ///
    /// The revision field packs both sides:
    /// `{target}version;{updated}version;{upgrade}`.
    pub fn from_output(output: &Output) -> Result<Self> {
        let mut summary = Self::default();
        let Some(table) = output.table("_SummaryInformation") else {
            return Ok(summary);
        };
        for row in table.rows() {
            let id = row.data(0).as_int().unwrap_or(0);
            let value = row.data(1).to_string();
            match id {
                PID_TEMPLATE => summary.template = Some(value),
                PID_REVISION => {
                    let mut segments = value.split(';');
                    if let Some((code, version)) = split_revision_segment(segments.next()) {
                        summary.target_product_code = Some(code);
                        summary.target_version = Some(version);
                    }
                    if let Some((code, version)) = split_revision_segment(segments.next()) {
                        summary.updated_product_code = Some(code);
                        summary.updated_version = Some(version);
                    }
                    summary.upgrade_code = segments
                        .next()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                }
                PID_VALIDATION_FLAGS => {
                    summary.validation_flags = value.parse().unwrap_or_else(|_| {
                        row.data(1).as_int().unwrap_or(0)
                    });
                }
                _ => {}
            }
        }
        if summary.validation_flags & TRANSFORM_VALIDATE_UPGRADE_CODE != 0
            && summary.upgrade_code.is_none()
        {
            bail!("transform validation requires an upgrade code but none was authored");
        }
        Ok(summary)
    }

    /// Re-encodes one side's summary fields into a synthetic half.
    ///
    /// The revision cell carries `{code}version;{upgrade}` so nothing
    /// parsed out of the transform output is dropped on the way through.
    fn apply(&self, output: &mut Output, updated_side: bool) {
        let (code, version) = if updated_side {
            (
                self.updated_product_code.as_deref(),
                self.updated_version.as_deref(),
            )
        } else {
            (
                self.target_product_code.as_deref(),
                self.target_version.as_deref(),
            )
        };
        let table = output.ensure_table(&crate::model::schema::summary_information());
        if let Some(template) = &self.template {
            table.push_row(Row::from_data(
                Default::default(),
                vec![FieldData::Int(PID_TEMPLATE), template.as_str().into()],
            ));
        }
        if code.is_some() || version.is_some() || self.upgrade_code.is_some() {
            let mut revision =
                format!("{}{}", code.unwrap_or_default(), version.unwrap_or_default());
            if let Some(upgrade) = &self.upgrade_code {
                revision.push(';');
                revision.push_str(upgrade);
            }
            table.push_row(Row::from_data(
                Default::default(),
                vec![FieldData::Int(PID_REVISION), revision.into()],
            ));
        }
        if self.validation_flags != 0 {
            table.push_row(Row::from_data(
                Default::default(),
                vec![
                    FieldData::Int(PID_VALIDATION_FLAGS),
                    FieldData::Int(self.validation_flags),
                ],
            ));
        }
    }
}

/// Splits one `{GUID}version` revision segment.
fn split_revision_segment(segment: Option<&str>) -> Option<(String, String)> {
    let segment = segment?.trim();
    if segment.is_empty() {
        return None;
    }
    match segment.find('}') {
        Some(end) => Some((
            segment[..=end].to_string(),
            segment[end + 1..].to_string(),
        )),
        None => Some((segment.to_string(), String::new())),
    }
}

/// A lazily created zero-byte file, the comparison baseline for Object
/// cells with no previous payload.
pub struct EmptySentinel {
    path: PathBuf,
    created: bool,
}

impl EmptySentinel {
    pub fn new(scratch: &Path) -> Self {
        Self {
            path: scratch.join("empty.sentinel"),
            created: false,
        }
    }

    pub fn path(&mut self) -> Result<&Path> {
        if !self.created {
            File::create(&self.path).fs_context("creating empty sentinel", &self.path)?;
            self.created = true;
        }
        Ok(&self.path)
    }
}

/// Byte-for-byte comparison of two files.
fn files_differ(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = std::fs::metadata(a).fs_context("reading file metadata", a)?;
    let meta_b = std::fs::metadata(b).fs_context("reading file metadata", b)?;
    if meta_a.len() != meta_b.len() {
        return Ok(true);
    }
    let mut buf_a = Vec::new();
    let mut buf_b = Vec::new();
    File::open(a)
        .fs_context("opening file", a)?
        .read_to_end(&mut buf_a)?;
    File::open(b)
        .fs_context("opening file", b)?
        .read_to_end(&mut buf_b)?;
    Ok(buf_a != buf_b)
}

/// A value distinct from `current` yet valid for the column type, used on
/// the target side of modified cells.
fn divergent_value(
    column_type: ColumnType,
    current: &FieldData,
    sentinel: &mut EmptySentinel,
) -> Result<FieldData> {
    Ok(match column_type {
        ColumnType::Int16 | ColumnType::Int32 => {
            let min = column_type.min_value();
            match current.as_int() {
                Some(v) if v == min => FieldData::Int(min + 1),
                _ => FieldData::Int(min),
            }
        }
        ColumnType::Object => FieldData::Str(sentinel.path()?.to_string_lossy().into_owned()),
        ColumnType::String | ColumnType::Localized => match current.as_str() {
            Some("0") => FieldData::Str("1".into()),
            _ => FieldData::Str("0".into()),
        },
    })
}

/// Sentinel cell for a deleted row's non-key columns.
fn sentinel_value(column_type: ColumnType, sentinel: &mut EmptySentinel) -> Result<FieldData> {
    Ok(match column_type {
        ColumnType::Int16 | ColumnType::Int32 => FieldData::Int(column_type.min_value()),
        ColumnType::Object => FieldData::Str(sentinel.path()?.to_string_lossy().into_owned()),
        ColumnType::String | ColumnType::Localized => FieldData::Str("0".into()),
    })
}

/// Builds the target and updated halves from a transform-kind output.
pub fn synthesize_halves(transform: &Output, scratch: &Path) -> Result<(Output, Output)> {
    if transform.kind() != OutputKind::Transform {
        bail!("transform synthesis requires a transform output, got {}", transform.kind());
    }
    let mut sentinel = EmptySentinel::new(scratch);
    let mut target = Output::new(OutputKind::Product);
    let mut updated = Output::new(OutputKind::Product);
    target.set_codepage(transform.codepage());
    updated.set_codepage(transform.codepage());

    for table in transform.tables() {
        if table.definition().is_unreal() || table.name() == "_SummaryInformation" {
            continue;
        }
        match table.operation() {
            TableOperation::Add => {
                copy_table(table, &mut updated, |_| true);
                continue;
            }
            TableOperation::Drop => {
                copy_table(table, &mut target, |_| true);
                continue;
            }
            TableOperation::None => {}
        }

        let target_table = Table::new(table.definition().clone());
        let updated_table = Table::new(table.definition().clone());
        let mut target_rows = target_table;
        let mut updated_rows = updated_table;
        for row in table.rows() {
            match row.operation() {
                RowOperation::Add => {
                    updated_rows.push_row(clean_copy(row));
                }
                RowOperation::Delete => {
                    let mut copy = clean_copy(row);
                    for (index, column) in table.definition().columns().iter().enumerate() {
                        if !column.is_primary_key() {
                            copy.set_data(index, sentinel_value(column.column_type(), &mut sentinel)?);
                        }
                    }
                    target_rows.push_row(copy);
                }
                RowOperation::Modify | RowOperation::None => {
                    let (target_row, differs) =
                        diverge_row(table, row, &mut sentinel)?;
                    if differs {
                        target_rows.push_row(target_row);
                        updated_rows.push_row(clean_copy(row));
                    }
                }
            }
        }
        if !target_rows.rows().is_empty() {
            *target.ensure_table(table.definition()) = target_rows;
        }
        if !updated_rows.rows().is_empty() {
            *updated.ensure_table(table.definition()) = updated_rows;
        }
    }

    let summary = TransformSummary::from_output(transform)?;
    summary.apply(&mut target, false);
    summary.apply(&mut updated, true);

    Ok((target, updated))
}

/// Target-side copy of a modified row plus whether any field differs.
fn diverge_row(
    table: &Table,
    row: &Row,
    sentinel: &mut EmptySentinel,
) -> Result<(Row, bool)> {
    let mut copy = clean_copy(row);
    let mut differs = false;
    for (index, column) in table.definition().columns().iter().enumerate() {
        let field = row.field(index);
        if column.column_type().is_object() {
            let current = PathBuf::from(field.data().to_string());
            let previous = match field.object().and_then(|o| o.previous_data.clone()) {
                Some(data) => PathBuf::from(data.to_string()),
                None => sentinel.path()?.to_path_buf(),
            };
            if files_differ(&current, &previous)? {
                differs = true;
                copy.set_data(index, FieldData::Str(previous.to_string_lossy().into_owned()));
            }
            continue;
        }
        if field.is_modified() {
            differs = true;
            copy.set_data(
                index,
                divergent_value(column.column_type(), field.data(), sentinel)?,
            );
        }
    }
    Ok((copy, differs))
}

fn clean_copy(row: &Row) -> Row {
    let mut copy = Row::from_data(
        row.source().clone(),
        row.fields().iter().map(|f| f.data().clone()).collect(),
    );
    copy.set_section_id(row.section_id().map(str::to_string));
    copy
}

fn copy_table(table: &Table, into: &mut Output, keep: impl Fn(&Row) -> bool) {
    let dest = into.ensure_table(table.definition());
    for row in table.rows() {
        if keep(row) {
            dest.push_row(clean_copy(row));
        }
    }
}

/// Binds a transform output to a physical transform file.
///
/// Both synthetic halves are written under `scratch` and handed to the
/// engine; no differences at all is the empty-transform error.
pub fn bind_transform(
    transform: &Output,
    path: &Path,
    scratch: &Path,
    engine: &dyn InstallerEngine,
) -> Result<()> {
    std::fs::create_dir_all(scratch).fs_context("creating transform scratch", scratch)?;
    let (target, updated) = synthesize_halves(transform, scratch)?;

    let options = DatabaseOptions {
        suppress_validation_table: true,
    };
    let target_path = scratch.join("transform.target.msi");
    let updated_path = scratch.join("transform.updated.msi");
    generate_database(&target, &target_path, &options, &[])
        .context("generating transform target half")?;
    generate_database(&updated, &updated_path, &options, &[])
        .context("generating transform updated half")?;

    if !engine.diff_databases(&target_path, &updated_path, path)? {
        return Err(Error::EmptyTransform);
    }
    log::info!("generated transform {}", path.display());
    Ok(())
}

/// One cell as carried in the built-in transform encoding.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
enum CellValue {
    Null,
    Int(i32),
    Str(String),
}

impl From<&msi::Value> for CellValue {
    fn from(value: &msi::Value) -> Self {
        match value {
            msi::Value::Null => CellValue::Null,
            msi::Value::Int(i) => CellValue::Int(*i),
            msi::Value::Str(s) => CellValue::Str(s.clone()),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct TableDiff {
    name: String,
    added: Vec<Vec<CellValue>>,
    deleted: Vec<Vec<CellValue>>,
    modified: Vec<Vec<CellValue>>,
}

#[derive(Debug, Default, Serialize)]
struct TransformDocument {
    tables: Vec<TableDiff>,
}

/// Pure-Rust engine: re-reads both halves and writes the diff as a
/// compound-file transform with a single JSON data stream.
pub struct BuiltinEngine;

impl BuiltinEngine {
    fn read_tables(path: &Path) -> Result<Vec<(String, Vec<usize>, Vec<Vec<CellValue>>)>> {
        let mut package = msi::open(path).fs_context("opening database half", path)?;
        let names: Vec<(String, Vec<usize>)> = package
            .tables()
            .map(|t| {
                let keys = t
                    .columns()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.is_primary_key())
                    .map(|(i, _)| i)
                    .collect();
                (t.name().to_string(), keys)
            })
            .collect();
        let mut tables = Vec::with_capacity(names.len());
        for (name, keys) in names {
            let mut rows = Vec::new();
            for row in package.select_rows(msi::Select::table(&name))? {
                let cells: Vec<CellValue> = (0..row.len()).map(|i| (&row[i]).into()).collect();
                rows.push(cells);
            }
            tables.push((name, keys, rows));
        }
        Ok(tables)
    }
}

impl InstallerEngine for BuiltinEngine {
    fn diff_databases(&self, target: &Path, updated: &Path, transform: &Path) -> Result<bool> {
        let target_tables = Self::read_tables(target)?;
        let updated_tables = Self::read_tables(updated)?;

        let mut document = TransformDocument::default();
        let mut names: Vec<&str> = target_tables
            .iter()
            .chain(updated_tables.iter())
            .map(|(n, _, _)| n.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();

        for name in names {
            let before = target_tables.iter().find(|(n, _, _)| n == name);
            let after = updated_tables.iter().find(|(n, _, _)| n == name);
            let keys = after
                .or(before)
                .map(|(_, k, _)| k.clone())
                .unwrap_or_default();
            let key_of = |row: &Vec<CellValue>| -> Vec<CellValue> {
                keys.iter().map(|&i| row[i].clone()).collect()
            };

            let empty = Vec::new();
            let before_rows = before.map(|(_, _, r)| r).unwrap_or(&empty);
            let after_rows = after.map(|(_, _, r)| r).unwrap_or(&empty);

            let mut diff = TableDiff {
                name: name.to_string(),
                ..Default::default()
            };
            for row in after_rows {
                match before_rows.iter().find(|b| key_of(b) == key_of(row)) {
                    None => diff.added.push(row.clone()),
                    Some(before_row) if before_row != row => diff.modified.push(row.clone()),
                    Some(_) => {}
                }
            }
            for row in before_rows {
                if !after_rows.iter().any(|a| key_of(a) == key_of(row)) {
                    diff.deleted.push(row.clone());
                }
            }
            if !diff.added.is_empty() || !diff.deleted.is_empty() || !diff.modified.is_empty() {
                document.tables.push(diff);
            }
        }

        if document.tables.is_empty() {
            return Ok(false);
        }

        let mut container =
            cfb::create(transform).fs_context("creating transform container", transform)?;
        let json = serde_json::to_vec_pretty(&document)?;
        let mut stream = container
            .create_stream("/TransformData")
            .fs_context("creating transform stream", transform)?;
        stream.write_all(&json)?;
        drop(stream);
        container
            .flush()
            .fs_context("flushing transform container", transform)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::model::SourceLocation;

    fn transform_with_property_rows(rows: Vec<(Row, RowOperation)>) -> Output {
        let mut output = Output::new(OutputKind::Transform);
        let table = output.ensure_table(&schema::property());
        for (mut row, op) in rows {
            row.set_operation(op);
            table.push_row(row);
        }
        output
    }

    fn property_row(name: &str, value: &str) -> Row {
        Row::from_data(SourceLocation::default(), vec![name.into(), value.into()])
    }

    #[test]
    fn added_rows_land_only_in_updated() {
        let transform = transform_with_property_rows(vec![(
            property_row("NewProp", "1"),
            RowOperation::Add,
        )]);
        let scratch = tempfile::tempdir().unwrap();
        let (target, updated) = synthesize_halves(&transform, scratch.path()).unwrap();
        assert!(target.table("Property").is_none());
        assert_eq!(updated.table("Property").unwrap().rows().len(), 1);
    }

    #[test]
    fn deleted_rows_get_full_sentinel_cells() {
        let transform = transform_with_property_rows(vec![(
            property_row("OldProp", "legacy"),
            RowOperation::Delete,
        )]);
        let scratch = tempfile::tempdir().unwrap();
        let (target, updated) = synthesize_halves(&transform, scratch.path()).unwrap();
        let table = target.table("Property").unwrap();
        let row = &table.rows()[0];
        assert_eq!(row.data(0).as_str(), Some("OldProp"));
        assert_eq!(row.data(1).as_str(), Some("0"));
        assert!(updated.table("Property").is_none());
    }

    #[test]
    fn modified_rows_diverge_on_both_sides() {
        let mut row = property_row("Version", "2.0");
        row.field_mut(1).set_modified(true);
        let transform = transform_with_property_rows(vec![(row, RowOperation::Modify)]);
        let scratch = tempfile::tempdir().unwrap();
        let (target, updated) = synthesize_halves(&transform, scratch.path()).unwrap();
        let before = target.table("Property").unwrap().rows()[0].data(1).to_string();
        let after = updated.table("Property").unwrap().rows()[0].data(1).to_string();
        assert_ne!(before, after);
        assert_eq!(after, "2.0");
    }

    #[test]
    fn unmodified_rows_are_dropped_from_both_sides() {
        let transform = transform_with_property_rows(vec![(
            property_row("Same", "value"),
            RowOperation::None,
        )]);
        let scratch = tempfile::tempdir().unwrap();
        let (target, updated) = synthesize_halves(&transform, scratch.path()).unwrap();
        assert!(target.table("Property").is_none());
        assert!(updated.table("Property").is_none());
    }

    #[test]
    fn upgrade_code_validation_needs_an_upgrade_code() {
        let mut output = Output::new(OutputKind::Transform);
        let table = output.ensure_table(&schema::summary_information());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                FieldData::Int(PID_REVISION),
                "{1111}1.0;{2222}2.0".into(),
            ],
        ));
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                FieldData::Int(PID_VALIDATION_FLAGS),
                format!("{TRANSFORM_VALIDATE_UPGRADE_CODE}").into(),
            ],
        ));
        assert!(TransformSummary::from_output(&output).is_err());
    }

    #[test]
    fn revision_field_splits_into_sides() {
        let mut output = Output::new(OutputKind::Transform);
        let table = output.ensure_table(&schema::summary_information());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                FieldData::Int(PID_REVISION),
                "{AAAA}1.0.0;{BBBB}1.1.0;{CCCC}".into(),
            ],
        ));
        let summary = TransformSummary::from_output(&output).unwrap();
        assert_eq!(summary.target_product_code.as_deref(), Some("{AAAA}"));
        assert_eq!(summary.target_version.as_deref(), Some("1.0.0"));
        assert_eq!(summary.updated_product_code.as_deref(), Some("{BBBB}"));
        assert_eq!(summary.upgrade_code.as_deref(), Some("{CCCC}"));
    }

    #[test]
    fn summary_fields_survive_into_both_halves() {
        let summary = TransformSummary {
            template: Some("x64;1033".into()),
            target_product_code: Some("{AAAA}".into()),
            target_version: Some("1.0.0".into()),
            updated_product_code: Some("{BBBB}".into()),
            updated_version: Some("1.1.0".into()),
            upgrade_code: Some("{CCCC}".into()),
            validation_flags: TRANSFORM_VALIDATE_UPGRADE_CODE,
        };

        let mut target = Output::new(OutputKind::Product);
        let mut updated = Output::new(OutputKind::Product);
        summary.apply(&mut target, false);
        summary.apply(&mut updated, true);

        let revision_of = |output: &Output| -> String {
            let table = output.table("_SummaryInformation").unwrap();
            table
                .rows()
                .iter()
                .find(|row| row.data(0).as_int() == Some(PID_REVISION))
                .map(|row| row.data(1).to_string())
                .unwrap()
        };
        assert_eq!(revision_of(&target), "{AAAA}1.0.0;{CCCC}");
        assert_eq!(revision_of(&updated), "{BBBB}1.1.0;{CCCC}");

        let flags = target
            .table("_SummaryInformation")
            .unwrap()
            .rows()
            .iter()
            .find(|row| row.data(0).as_int() == Some(PID_VALIDATION_FLAGS))
            .and_then(|row| row.data(1).as_int());
        assert_eq!(flags, Some(TRANSFORM_VALIDATE_UPGRADE_CODE));
    }

    #[test]
    fn identical_halves_are_an_empty_diff() {
        struct NoDiff;
        impl InstallerEngine for NoDiff {
            fn diff_databases(&self, _: &Path, _: &Path, _: &Path) -> Result<bool> {
                Ok(false)
            }
        }
        let transform = transform_with_property_rows(vec![(
            property_row("Same", "value"),
            RowOperation::None,
        )]);
        let scratch = tempfile::tempdir().unwrap();
        let out = scratch.path().join("out.mst");
        let err = bind_transform(&transform, &out, scratch.path(), &NoDiff).unwrap_err();
        assert!(matches!(err, Error::EmptyTransform));
    }
}
