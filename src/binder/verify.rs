//! Model integrity checks.
//!
//! Runs before any output is generated: every primary-key tuple within a
//! table must be unique, and every simple reference (a foreign-key
//! assertion row) must name an existing primary key. Violations accumulate
//! so one run reports them all.

use crate::binder::messages::Messages;
use crate::model::Output;
use std::collections::HashSet;

/// Reports duplicate primary-key tuples in every table.
pub fn check_duplicate_keys(output: &Output, messages: &mut Messages) {
    for table in output.tables() {
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        for row in table.rows() {
            let key = table.primary_key_of(row);
            if key.is_empty() {
                continue;
            }
            if !seen.insert(key.clone()) {
                messages.error_at(
                    row.source(),
                    format!(
                        "duplicate primary key '{}' in table '{}'",
                        key.join("/"),
                        table.name()
                    ),
                );
            }
        }
    }
}

/// Resolves every `SimpleReference` row against the referenced table's
/// primary keys.
pub fn check_simple_references(output: &Output, messages: &mut Messages) {
    let Some(references) = output.table("SimpleReference") else {
        return;
    };

    for row in references.rows() {
        let table_name = row.data(0).to_string();
        let keys = row.data(1).to_string();
        let key_parts: Vec<&str> = keys.split('/').collect();

        let Some(target) = output.table(&table_name) else {
            messages.error_at(
                row.source(),
                format!("reference to unknown table '{table_name}'"),
            );
            continue;
        };

        if target.find_row(&key_parts).is_none() {
            messages.error_at(
                row.source(),
                format!("unresolved reference to {table_name} '{keys}'"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::model::{FieldData, OutputKind, Row, SourceLocation};

    #[test]
    fn duplicate_keys_are_reported_per_row() {
        let mut output = Output::new(OutputKind::Product);
        let table = output.ensure_table(&schema::property());
        for _ in 0..3 {
            table.push_row(Row::from_data(
                SourceLocation::default(),
                vec!["ProductName".into(), "Sample".into()],
            ));
        }
        let mut messages = Messages::new();
        check_duplicate_keys(&output, &mut messages);
        assert_eq!(messages.error_count(), 2);
    }

    #[test]
    fn dangling_reference_fails() {
        let mut output = Output::new(OutputKind::Product);
        output.ensure_table(&schema::directory());
        let refs = output.ensure_table(&schema::simple_reference());
        refs.push_row(Row::from_data(
            SourceLocation::new("product.wxs", 9),
            vec!["Directory".into(), "BINDIR".into()],
        ));
        let mut messages = Messages::new();
        check_simple_references(&output, &mut messages);
        assert_eq!(messages.error_count(), 1);
    }

    #[test]
    fn resolvable_reference_passes() {
        let mut output = Output::new(OutputKind::Product);
        let dirs = output.ensure_table(&schema::directory());
        dirs.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["BINDIR".into(), FieldData::Null, "bin".into()],
        ));
        let refs = output.ensure_table(&schema::simple_reference());
        refs.push_row(Row::from_data(
            SourceLocation::default(),
            vec!["Directory".into(), "BINDIR".into()],
        ));
        let mut messages = Messages::new();
        check_simple_references(&output, &mut messages);
        assert!(!messages.has_errors());
    }
}
