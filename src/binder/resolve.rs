//! Field resolution.
//!
//! Before any output is generated, every field in every table passes through
//! the resolver. Localization and binder variables (`!(loc.*)`, `!(var.*)`)
//! are substituted immediately; `!(bind.*)` references depend on data that
//! only exists later in the bind (file versions, computed hashes) and are
//! returned as delayed fields for a second pass. Object-column fields
//! additionally resolve their source path, extracting from a referenced
//! cabinet into the bind's scratch directory the first time that cabinet is
//! seen.

use crate::bail;
use crate::binder::error::{Error, ErrorExt, Result};
use crate::binder::messages::Messages;
use crate::model::{ColumnType, FieldData, Output};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// A field whose value could not be fully resolved in the first pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DelayedField {
    /// Owning table name.
    pub table: String,
    /// Row index within the table.
    pub row: usize,
    /// Column index within the row.
    pub column: usize,
    /// The unresolved text, still containing `!(bind.*)` references.
    pub value: String,
}

/// Resolves variables and source paths across an output's fields.
pub struct FieldResolver {
    variables: HashMap<String, String>,
    scratch: PathBuf,
    extracted: HashMap<String, PathBuf>,
}

impl FieldResolver {
    /// Creates a resolver over the given variable map.
    ///
    /// `scratch` is the bind-owned temp directory cabinet payloads are
    /// extracted into.
    pub fn new(variables: HashMap<String, String>, scratch: impl Into<PathBuf>) -> Self {
        Self {
            variables,
            scratch: scratch.into(),
            extracted: HashMap::new(),
        }
    }

    /// Builds the variable map from the output's `BindVariable` table,
    /// overlaid with caller-supplied overrides.
    pub fn from_output(
        output: &Output,
        overrides: &HashMap<String, String>,
        scratch: impl Into<PathBuf>,
    ) -> Self {
        let mut variables = HashMap::new();
        if let Some(table) = output.table("BindVariable") {
            for row in table.rows() {
                let name = row.data(0).to_string();
                let value = match row.data(1) {
                    FieldData::Null => String::new(),
                    other => other.to_string(),
                };
                let overridable = row.data(2).as_int().unwrap_or(0) != 0;
                if overridable && overrides.contains_key(&name) {
                    continue;
                }
                variables.insert(name, value);
            }
        }
        for (name, value) in overrides {
            variables.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Self::new(variables, scratch)
    }

    /// Resolves every field of every table.
    ///
    /// Missing source files accumulate errors in `messages`; malformed
    /// variable references abort with [`Error::InvalidVariableReference`].
    /// Returns the fields whose values still carry `!(bind.*)` references.
    pub fn resolve_output(
        &mut self,
        output: &mut Output,
        messages: &mut Messages,
    ) -> Result<Vec<DelayedField>> {
        let mut delayed = Vec::new();

        for table_index in 0..output.tables().len() {
            let table_name = output.tables()[table_index].name().to_string();
            let column_types: Vec<ColumnType> = output.tables()[table_index]
                .definition()
                .columns()
                .iter()
                .map(|c| c.column_type())
                .collect();

            for row_index in 0..output.tables()[table_index].rows().len() {
                for (column, &column_type) in column_types.iter().enumerate() {
                    let (value, location) = {
                        let row = &output.tables()[table_index].rows()[row_index];
                        match row.data(column) {
                            FieldData::Str(s) => (s.clone(), row.source().clone()),
                            _ => continue,
                        }
                    };

                    let (resolved, has_delayed) = self.resolve_string(&value, &location.to_string())?;
                    if has_delayed {
                        delayed.push(DelayedField {
                            table: table_name.clone(),
                            row: row_index,
                            column,
                            value: resolved.clone(),
                        });
                    }

                    if column_type.is_object() && !has_delayed {
                        let row = &output.tables()[table_index].rows()[row_index];
                        let object = row.field(column).object().cloned().unwrap_or_default();
                        match self.resolve_source_path(&resolved, object.base_uri.as_deref(), object.cabinet.as_deref()) {
                            Ok(path) => {
                                let row = output.tables_mut()[table_index].rows_mut()
                                    [row_index]
                                    .field_mut(column);
                                row.set_data(FieldData::Str(path.display().to_string()));
                                continue;
                            }
                            Err(error) => {
                                messages.error_at(
                                    &location,
                                    format!("cannot find source file '{resolved}': {error}"),
                                );
                                continue;
                            }
                        }
                    }

                    if resolved != value {
                        output.tables_mut()[table_index].rows_mut()[row_index]
                            .set_data(column, FieldData::Str(resolved));
                    }
                }
            }
        }

        Ok(delayed)
    }

    /// Re-resolves previously delayed fields once their `!(bind.*)` values
    /// are known.
    pub fn resolve_delayed(
        &mut self,
        output: &mut Output,
        delayed: &[DelayedField],
        bind_values: &HashMap<String, String>,
        messages: &mut Messages,
    ) -> Result<()> {
        for field in delayed {
            let mut value = field.value.clone();
            for (name, replacement) in bind_values {
                value = value.replace(&format!("!(bind.{name})"), replacement);
            }
            if value.contains("!(bind.") {
                messages.error(format!(
                    "unresolved bind-time reference in {}[{}] column {}: '{}'",
                    field.table, field.row, field.column, value
                ));
                continue;
            }
            if let Some(table) = output.table_mut(&field.table) {
                if let Some(row) = table.rows_mut().get_mut(field.row) {
                    row.set_data(field.column, FieldData::Str(value));
                }
            }
        }
        Ok(())
    }

    /// Substitutes `!(loc.*)` and `!(var.*)` references in one string.
    ///
    /// Returns the resolved text and whether a `!(bind.*)` reference was
    /// left in place for the delayed pass.
    pub fn resolve_string(&self, value: &str, location: &str) -> Result<(String, bool)> {
        let mut result = String::with_capacity(value.len());
        let mut rest = value;
        let mut has_delayed = false;

        while let Some(start) = rest.find("!(") {
            result.push_str(&rest[..start]);
            let reference = &rest[start..];
            let Some(end) = reference.find(')') else {
                return Err(Error::InvalidVariableReference {
                    reference: reference.to_string(),
                    location: location.to_string(),
                });
            };
            let name = &reference[2..end];
            rest = &reference[end + 1..];

            if let Some(bind_name) = name.strip_prefix("bind.") {
                if bind_name.is_empty() {
                    return Err(Error::InvalidVariableReference {
                        reference: format!("!({name})"),
                        location: location.to_string(),
                    });
                }
                has_delayed = true;
                result.push_str("!(");
                result.push_str(name);
                result.push(')');
            } else if let Some(variable) = name
                .strip_prefix("loc.")
                .or_else(|| name.strip_prefix("var."))
            {
                match self.variables.get(variable) {
                    Some(replacement) => result.push_str(replacement),
                    None => {
                        return Err(Error::InvalidVariableReference {
                            reference: format!("!({name})"),
                            location: location.to_string(),
                        })
                    }
                }
            } else {
                return Err(Error::InvalidVariableReference {
                    reference: format!("!({name})"),
                    location: location.to_string(),
                });
            }
        }
        result.push_str(rest);
        Ok((result, has_delayed))
    }

    /// Resolves an Object field's source path to an existing readable file.
    ///
    /// When the field references a cabinet, the cabinet is extracted (once
    /// per source URI) into the scratch directory and the payload is read
    /// from there.
    fn resolve_source_path(
        &mut self,
        value: &str,
        base_uri: Option<&str>,
        cabinet: Option<&str>,
    ) -> Result<PathBuf> {
        if let (Some(base), Some(file_id)) = (base_uri, cabinet) {
            let extract_dir = self.extract_cabinet(base)?;
            let path = extract_dir.join(file_id);
            if !path.is_file() {
                bail!("cabinet '{base}' does not contain file '{file_id}'");
            }
            return Ok(path);
        }

        let path = match base_uri {
            Some(base) if !Path::new(value).is_absolute() => Path::new(base).join(value),
            _ => PathBuf::from(value),
        };
        if !path.is_file() {
            bail!("no such file");
        }
        Ok(path)
    }

    /// Extracts all entries of a cabinet into a scratch subdirectory,
    /// caching the result by source URI.
    fn extract_cabinet(&mut self, uri: &str) -> Result<PathBuf> {
        if let Some(dir) = self.extracted.get(uri) {
            return Ok(dir.clone());
        }

        let dir = self.scratch.join(format!("cab{}", self.extracted.len()));
        std::fs::create_dir_all(&dir).fs_context("creating cabinet extraction directory", &dir)?;

        let file = File::open(uri).fs_context("opening cabinet", uri)?;
        let mut cabinet = cab::Cabinet::new(file)?;
        let names: Vec<String> = cabinet
            .folder_entries()
            .flat_map(|folder| folder.file_entries())
            .map(|entry| entry.name().to_string())
            .collect();
        for name in names {
            let dest = dir.join(&name);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .fs_context("creating cabinet extraction directory", parent)?;
            }
            let mut reader = cabinet.read_file(&name)?;
            let mut writer = File::create(&dest).fs_context("extracting cabinet file", &dest)?;
            io::copy(&mut reader, &mut writer)?;
        }

        log::debug!("extracted cabinet {uri} to {}", dir.display());
        self.extracted.insert(uri.to_string(), dir.clone());
        Ok(dir)
    }
}
