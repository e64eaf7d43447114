//! Physical database generation.
//!
//! Writes an [`Output`] into a Windows Installer database. Ordinary tables
//! import directly; tables with Object (binary-stream) columns are created
//! first and then populated row by row, because bulk import cannot carry
//! stream payloads. Unreal tables are skipped, with the patch-headers
//! streaming table as the single exception. Summary-information fields are
//! re-encoded from the `_SummaryInformation` table into the summary stream.
//! `_Validation` rows are derived by the package writer from the typed
//! columns; suppression strips them again after all tables are written.

use crate::bail;
use crate::binder::error::{Context, Error, ErrorExt, Result};
use crate::model::{ColumnType, FieldData, Output, OutputKind, Table};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Maximum length of a stream name derived from table and primary-key
/// values. Longer names are a hard error; silent truncation would corrupt
/// the database.
pub const MAX_STREAM_NAME: usize = 62;

/// Maximum length of a sub-storage name in the compound-file container.
/// Longer names are replaced by generated GUID aliases.
pub const MAX_STORAGE_NAME: usize = 31;

/// Summary-information property ids carried in `_SummaryInformation`.
mod pid {
    pub const CODEPAGE: i32 = 1;
    pub const TITLE: i32 = 2;
    pub const SUBJECT: i32 = 3;
    pub const AUTHOR: i32 = 4;
    pub const COMMENTS: i32 = 6;
    pub const TEMPLATE: i32 = 7;
    pub const REVISION: i32 = 9;
    pub const WORD_COUNT: i32 = 15;
    pub const CREATING_APP: i32 = 18;
}

/// Options controlling the database write.
#[derive(Clone, Debug, Default)]
pub struct DatabaseOptions {
    /// Empty the `_Validation` table (also implied for patches). The
    /// package writer maintains the table itself as tables are created,
    /// so suppression strips its rows rather than the table.
    pub suppress_validation_table: bool,
}

/// A sub-storage artifact to attach: name plus the generated transform
/// file on disk.
#[derive(Clone, Debug)]
pub struct SubStorageFile {
    /// Authored storage name.
    pub name: String,
    /// Path of the bound transform.
    pub path: PathBuf,
}

/// Writes the output to `path` as a physical installer database.
pub fn generate_database(
    output: &Output,
    path: &Path,
    options: &DatabaseOptions,
    sub_storages: &[SubStorageFile],
) -> Result<()> {
    let package_type = match output.kind() {
        OutputKind::Product | OutputKind::Module => msi::PackageType::Installer,
        OutputKind::Patch => msi::PackageType::Patch,
        OutputKind::Transform => msi::PackageType::Transform,
        OutputKind::Bundle => bail!("bundles are not database outputs"),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).fs_context("creating output directory", parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .fs_context("creating database", path)?;
    let mut package = msi::Package::create(package_type, file)?;

    write_summary_information(output, &mut package)?;

    for table in output.tables() {
        if table.name() == "_SummaryInformation" {
            continue;
        }
        // The package writer owns `_Validation`; authored rows would
        // collide with the derived ones.
        if table.name() == "_Validation" {
            log::debug!("skipping authored _Validation table; rows are derived");
            continue;
        }
        if table.definition().is_unreal() && table.name() != "MsiPatchHeaders" {
            continue;
        }
        write_table(&mut package, table)
            .with_context(|| format!("writing table '{}'", table.name()))?;
    }

    if options.suppress_validation_table || output.kind() == OutputKind::Patch {
        package.delete_rows(msi::Delete::from("_Validation"))?;
    }

    package.flush()?;
    drop(package);

    if !sub_storages.is_empty() {
        attach_sub_storages(path, sub_storages)?;
    }

    log::info!("generated {} database {}", output.kind(), path.display());
    Ok(())
}

/// The stream name for an Object cell: table name plus the row's
/// primary-key values, dot-joined.
pub fn stream_name(table: &Table, key: &[String]) -> Result<String> {
    let mut name = table.name().to_string();
    for part in key {
        name.push('.');
        name.push_str(part);
    }
    if name.len() > MAX_STREAM_NAME {
        return Err(Error::StreamNameTooLong {
            name,
            max: MAX_STREAM_NAME,
        });
    }
    Ok(name)
}

/// A storage name within the container limit, aliased through a generated
/// GUID when the authored name is too long.
pub fn storage_name(name: &str) -> String {
    if name.len() <= MAX_STORAGE_NAME {
        return name.to_string();
    }
    let alias = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    let mut hex = alias.simple().to_string();
    hex.truncate(MAX_STORAGE_NAME);
    hex
}

fn write_summary_information<F>(output: &Output, package: &mut msi::Package<F>) -> Result<()>
where
    F: io::Read + io::Write + io::Seek,
{
    let summary = package.summary_info_mut();
    summary.set_creation_time_to_now();

    let codepage = output.codepage();
    if codepage != 0 {
        if let Some(cp) = msi::CodePage::from_id(codepage) {
            summary.set_codepage(cp);
        } else {
            log::warn!("unknown codepage {codepage}; summary stream keeps the default");
        }
    }

    let Some(table) = output.table("_SummaryInformation") else {
        return Ok(());
    };
    for row in table.rows() {
        let id = row.data(0).as_int().unwrap_or(0);
        let value = row.data(1).to_string();
        match id {
            pid::CODEPAGE => {
                if let Some(cp) = value.parse().ok().and_then(msi::CodePage::from_id) {
                    summary.set_codepage(cp);
                }
            }
            pid::TITLE => summary.set_title(value),
            pid::SUBJECT => summary.set_subject(value),
            pid::AUTHOR => summary.set_author(value),
            pid::COMMENTS => summary.set_comments(value),
            pid::TEMPLATE => summary.set_arch(value),
            pid::REVISION => {
                // Transform halves pack `{code}version;{upgrade}` here; the
                // stream keeps the leading GUID.
                let first = value.split(';').next().unwrap_or(value.as_str());
                let guid = match first.find('}') {
                    Some(end) => &first[..=end],
                    None => first,
                };
                let trimmed = guid.trim_matches(|c| c == '{' || c == '}');
                match Uuid::parse_str(trimmed) {
                    Ok(uuid) => summary.set_uuid(uuid),
                    Err(_) => bail!("summary revision '{value}' is not a GUID"),
                }
            }
            pid::CREATING_APP => summary.set_creating_application(value),
            pid::WORD_COUNT => match value.trim().parse() {
                Ok(flags) => summary.set_word_count(flags),
                Err(_) => bail!("summary word count '{value}' is not a number"),
            },
            other => log::debug!("unhandled summary property {other}"),
        }
    }
    Ok(())
}

fn write_table<F>(package: &mut msi::Package<F>, table: &Table) -> Result<()>
where
    F: io::Read + io::Write + io::Seek,
{
    let definition = table.definition();
    let mut columns = Vec::with_capacity(definition.columns().len());
    for column in definition.columns() {
        let mut builder = msi::Column::build(column.name());
        if column.is_primary_key() {
            builder = builder.primary_key();
        }
        if column.is_nullable() {
            builder = builder.nullable();
        }
        // Categories flow into the derived `_Validation` rows.
        let built = match column.column_type() {
            ColumnType::Int16 => builder.int16(),
            ColumnType::Int32 => builder.int32(),
            ColumnType::String => {
                let length = match column.max_length() {
                    0 => 255,
                    n => n,
                };
                builder.text_string(length)
            }
            ColumnType::Localized => {
                let length = match column.max_length() {
                    0 => 255,
                    n => n,
                };
                builder.localizable().formatted_string(length)
            }
            // Object cells carry the stream name; payloads are attached
            // after row import.
            ColumnType::Object => builder.binary(),
        };
        columns.push(built);
    }
    package.create_table(table.name(), columns)?;

    if table.rows().is_empty() {
        return Ok(());
    }

    let object_columns: Vec<usize> = definition
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.column_type() == ColumnType::Object)
        .map(|(i, _)| i)
        .collect();

    // Stream payloads and their names, resolved before import so a
    // too-long name fails before any row lands.
    let mut streams: Vec<(String, PathBuf)> = Vec::new();
    let mut insert = msi::Insert::into(table.name());
    for row in table.rows() {
        let key = table.primary_key_of(row);
        let mut values = Vec::with_capacity(row.len());
        for (index, field) in row.fields().iter().enumerate() {
            if object_columns.contains(&index) {
                match field.data() {
                    FieldData::Null => values.push(msi::Value::Null),
                    data => {
                        let name = stream_name(table, &key)?;
                        let source = PathBuf::from(data.to_string());
                        if !source.is_file() {
                            bail!(
                                "stream source '{}' for {} does not exist",
                                source.display(),
                                name
                            );
                        }
                        values.push(msi::Value::Str(name.clone()));
                        streams.push((name, source));
                    }
                }
                continue;
            }
            values.push(match field.data() {
                FieldData::Null => msi::Value::Null,
                FieldData::Str(s) => msi::Value::Str(s.clone()),
                FieldData::Int(i) => msi::Value::Int(*i),
            });
        }
        insert = insert.row(values);
    }
    package.insert_rows(insert)?;

    for (name, source) in streams {
        let mut reader = File::open(&source).fs_context("opening stream source", &source)?;
        let mut writer = package.write_stream(&name)?;
        io::copy(&mut reader, &mut writer)?;
    }

    Ok(())
}

/// Copies each bound transform into the patch container as a named
/// storage, aliasing names over the container limit.
fn attach_sub_storages(path: &Path, sub_storages: &[SubStorageFile]) -> Result<()> {
    let mut container = cfb::open_rw(path).fs_context("reopening database container", path)?;

    for storage in sub_storages {
        let name = storage_name(&storage.name);
        if name != storage.name {
            log::debug!(
                "sub-storage name '{}' exceeds {MAX_STORAGE_NAME} characters; using alias {name}",
                storage.name
            );
        }
        let root = format!("/{name}");
        container
            .create_storage(&root)
            .fs_context("creating sub-storage", path)?;

        let mut source =
            cfb::open(&storage.path).fs_context("opening transform", &storage.path)?;
        let entries: Vec<PathBuf> = source
            .walk()
            .filter(|e| e.is_stream())
            .map(|e| e.path().to_path_buf())
            .collect();
        for entry in entries {
            let mut data = Vec::new();
            {
                let mut stream = source
                    .open_stream(&entry)
                    .fs_context("reading transform stream", &storage.path)?;
                io::Read::read_to_end(&mut stream, &mut data)?;
            }
            let dest = format!("{root}/{}", entry.file_name().unwrap_or_default().to_string_lossy());
            let mut out = container
                .create_stream(&dest)
                .fs_context("writing sub-storage stream", path)?;
            io::Write::write_all(&mut out, &data)?;
        }
    }

    container.flush().fs_context("flushing database container", path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::model::{Row, SourceLocation};

    fn table_with_key(parts: &[&str]) -> (Table, Vec<String>) {
        let mut table = Table::new(schema::file());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                parts[0].into(),
                "c".into(),
                "f.txt".into(),
                FieldData::Int(1),
                FieldData::Null,
                FieldData::Null,
                FieldData::Int(0),
                FieldData::Int(1),
            ],
        ));
        let key = table.primary_key_of(&table.rows()[0]);
        (table, key)
    }

    #[test]
    fn stream_names_join_table_and_keys() {
        let (table, key) = table_with_key(&["FileA"]);
        assert_eq!(stream_name(&table, &key).unwrap(), "File.FileA");
    }

    #[test]
    fn overlong_stream_name_is_a_hard_error() {
        let long_id = "x".repeat(80);
        let (table, key) = table_with_key(&[long_id.as_str()]);
        let err = stream_name(&table, &key).unwrap_err();
        assert!(matches!(err, Error::StreamNameTooLong { .. }));
    }

    #[test]
    fn storage_names_alias_never_truncate() {
        let short = storage_name("product.mst");
        assert_eq!(short, "product.mst");

        let long = "a-very-long-transform-storage-name-that-cannot-fit";
        let aliased = storage_name(long);
        assert_ne!(aliased, long);
        assert!(aliased.len() <= MAX_STORAGE_NAME);
        // Aliasing is stable so repeated binds agree.
        assert_eq!(aliased, storage_name(long));
    }

    fn product_with_property() -> Output {
        let mut output = Output::new(OutputKind::Product);
        let table = output.ensure_table(&schema::property());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["ProductName".into(), "Sample".into()],
        ));
        output
    }

    fn generate(output: &Output, options: &DatabaseOptions) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.msi");
        generate_database(output, &path, options, &[]).unwrap();
        (dir, path)
    }

    #[test]
    fn validation_rows_are_derived_per_created_table() {
        let (_dir, path) = generate(&product_with_property(), &DatabaseOptions::default());
        let mut package = msi::open(&path).unwrap();
        let rows: Vec<(String, String)> = package
            .select_rows(msi::Select::table("_Validation"))
            .unwrap()
            .map(|row| {
                (
                    row[0].as_str().unwrap_or_default().to_string(),
                    row[7].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert!(rows.iter().any(|(table, cat)| table == "Property" && cat == "Text"));
        assert!(rows.iter().any(|(table, cat)| table == "Property" && cat == "Formatted"));
    }

    #[test]
    fn suppressed_validation_leaves_the_table_empty() {
        let options = DatabaseOptions {
            suppress_validation_table: true,
        };
        let (_dir, path) = generate(&product_with_property(), &options);
        let mut package = msi::open(&path).unwrap();
        assert!(package.has_table("_Validation"));
        let count = package
            .select_rows(msi::Select::table("_Validation"))
            .unwrap()
            .count();
        assert_eq!(count, 0);
    }

    #[test]
    fn summary_word_count_reaches_the_stream() {
        let mut output = product_with_property();
        let table = output.ensure_table(&schema::summary_information());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec![FieldData::Int(15), "2".into()],
        ));
        let (_dir, path) = generate(&output, &DatabaseOptions::default());
        let package = msi::open(&path).unwrap();
        assert_eq!(package.summary_info().word_count(), Some(2));
    }

    #[test]
    fn packed_revision_keeps_the_leading_guid() {
        let mut output = product_with_property();
        let table = output.ensure_table(&schema::summary_information());
        table.push_row(Row::from_data(
            SourceLocation::default(),
            vec![
                FieldData::Int(9),
                "{A7C0E3D1-4B6F-4E7A-9C1D-2F3B4A5C6D7E}1.0.0;{B8D1F4E2-5C70-4F8B-8D2E-3A4B5C6D7E8F}".into(),
            ],
        ));
        let (_dir, path) = generate(&output, &DatabaseOptions::default());
        let package = msi::open(&path).unwrap();
        assert_eq!(
            package.summary_info().uuid().map(|u| u.to_string()),
            Some("a7c0e3d1-4b6f-4e7a-9c1d-2f3b4a5c6d7e".to_string())
        );
    }
}
