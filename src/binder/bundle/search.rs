//! Bundle search descriptors.
//!
//! Each search row probes the machine state at bundle startup and stores
//! its result in a burn variable. The engine runs searches in the order
//! given by the explicit ordering table; unordered searches follow in
//! authored order.

use crate::binder::error::{Error, Result};
use crate::binder::messages::Messages;
use crate::model::Output;
use std::collections::HashMap;

/// The probe a search performs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchKind {
    /// File existence/version probe.
    File,
    /// Registry value probe.
    Registry,
    /// Installed-component keypath probe.
    Component,
    /// Installed-product state probe.
    Product,
}

impl SearchKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "File" => Some(SearchKind::File),
            "Registry" => Some(SearchKind::Registry),
            "Component" => Some(SearchKind::Component),
            "Product" => Some(SearchKind::Product),
            _ => None,
        }
    }

    /// The manifest element name for this search type.
    pub fn element_name(self) -> &'static str {
        match self {
            SearchKind::File => "FileSearch",
            SearchKind::Registry => "RegistrySearch",
            SearchKind::Component => "MsiComponentSearch",
            SearchKind::Product => "MsiProductSearch",
        }
    }
}

/// One resolved search descriptor.
#[derive(Clone, Debug)]
pub struct SearchInfo {
    pub id: String,
    pub kind: SearchKind,
    /// Type-specific predicate: path, registry key, component GUID, or
    /// product code.
    pub target: String,
    /// Variable receiving the result.
    pub variable: String,
    pub condition: Option<String>,
}

/// Reads searches and applies the explicit ordering.
pub fn gather_searches(output: &Output, messages: &mut Messages) -> Result<Vec<SearchInfo>> {
    let mut order: HashMap<String, i32> = HashMap::new();
    if let Some(table) = output.table("SearchOrder") {
        for row in table.rows() {
            order.insert(row.data(0).to_string(), row.data(1).as_int().unwrap_or(0));
        }
    }

    let Some(table) = output.table("BundleSearch") else {
        return Ok(Vec::new());
    };
    let mut searches = Vec::with_capacity(table.rows().len());
    for (index, row) in table.rows().iter().enumerate() {
        let id = row.data(0).to_string();
        let type_token = row.data(1).to_string();
        let Some(kind) = SearchKind::parse(&type_token) else {
            messages.error_at(
                row.source(),
                format!("search '{id}' has unknown type '{type_token}'"),
            );
            continue;
        };
        let sequence = order
            .remove(&id)
            .unwrap_or_else(|| i32::MAX - table.rows().len() as i32 + index as i32);
        searches.push((
            sequence,
            index,
            SearchInfo {
                id,
                kind,
                target: row.data(2).to_string(),
                variable: row.data(3).to_string(),
                condition: row.data(4).as_str().map(str::to_string),
            },
        ));
    }

    for (id, _) in order {
        return Err(Error::Generic(format!(
            "search order references unknown search '{id}'"
        )));
    }

    searches.sort_by_key(|(sequence, index, _)| (*sequence, *index));
    Ok(searches.into_iter().map(|(_, _, s)| s).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::model::{FieldData, OutputKind, Row, SourceLocation};

    fn output_with_searches(rows: &[(&str, &str)], order: &[(&str, i32)]) -> Output {
        let mut output = Output::new(OutputKind::Bundle);
        let table = output.ensure_table(&schema::bundle_search());
        for (id, kind) in rows {
            table.push_row(Row::from_data(
                SourceLocation::default(),
                vec![
                    (*id).into(),
                    (*kind).into(),
                    "target".into(),
                    format!("Var{id}").into(),
                    FieldData::Null,
                ],
            ));
        }
        let order_table = output.ensure_table(&schema::search_order());
        for (id, sequence) in order {
            order_table.push_row(Row::from_data(
                SourceLocation::default(),
                vec![(*id).into(), FieldData::Int(*sequence)],
            ));
        }
        output
    }

    #[test]
    fn explicit_order_wins_over_authored_order() {
        let output = output_with_searches(
            &[("s1", "File"), ("s2", "Registry")],
            &[("s2", 1), ("s1", 2)],
        );
        let searches = gather_searches(&output, &mut Messages::new()).unwrap();
        let ids: Vec<&str> = searches.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["s2", "s1"]);
    }

    #[test]
    fn unordered_searches_keep_authored_order_at_the_end() {
        let output = output_with_searches(
            &[("a", "Product"), ("b", "Component"), ("c", "File")],
            &[("c", 1)],
        );
        let searches = gather_searches(&output, &mut Messages::new()).unwrap();
        let ids: Vec<&str> = searches.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn unknown_search_type_accumulates() {
        let output = output_with_searches(&[("s1", "Quantum")], &[]);
        let mut messages = Messages::new();
        let searches = gather_searches(&output, &mut messages).unwrap();
        assert!(searches.is_empty());
        assert_eq!(messages.error_count(), 1);
    }
}
