//! Table validation functionality
//!
//! Validates columnar tables: ragged offsets, region bounds, column lengths
//! against the `id` dataset, and `colnames` against the column children.

use super::{GraphView, IssueKind, ValidationIssue, Validator};
use crate::models::{ColumnarTable, DATA_FIELD, FieldValue, ObjectId, RegionRefs};
use crate::spec::{FieldKind, core_type};
use std::collections::BTreeSet;

pub(crate) fn check_table(
    validator: &Validator<'_>,
    view: &GraphView<'_>,
    path: &str,
    id: ObjectId,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(instance) = view.graph.get(id) else {
        return;
    };

    match &instance.data {
        Some(FieldValue::Ragged(ragged)) => {
            if let Err(e) = ragged.check() {
                issues.push(malformed(path, Some(DATA_FIELD), e.to_string()));
            }
        }
        Some(FieldValue::Region(region)) => check_region(view, path, DATA_FIELD, region, issues),
        _ => {}
    }
    for (key, value) in &instance.fields {
        if let FieldValue::Region(region) = value {
            check_region(view, path, key, region, issues);
        }
    }

    let is_table = validator
        .resolve(&instance.type_key)
        .is_ok_and(|t| t.is_a(&core_type("DynamicTable")));
    if !is_table {
        return;
    }
    let table = ColumnarTable { id };
    let rows = match table.row_count(view.graph) {
        Ok(rows) => rows,
        Err(e) => {
            issues.push(malformed(path, Some("id"), e.to_string()));
            return;
        }
    };

    let mut columns = BTreeSet::new();
    for child in view.graph.children(id) {
        let Some(column) = view.graph.get(child) else {
            continue;
        };
        let is_column = validator
            .resolve(&column.type_key)
            .is_ok_and(|t| t.is_a(&core_type("VectorData")));
        if !is_column {
            continue;
        }
        columns.insert(column.name.clone());
        let length = column.data.as_ref().and_then(|d| d.row_count());
        check_length(path, &column.name, rows, length, issues);
    }

    let indexed: Vec<(&String, &FieldValue)> = validator
        .resolve(&instance.type_key)
        .map(|resolved| {
            instance
                .fields
                .iter()
                .filter(|(key, _)| {
                    resolved
                        .field(key)
                        .is_some_and(|f| f.kind() == FieldKind::IndexedColumn)
                })
                .collect()
        })
        .unwrap_or_default();
    for (key, value) in indexed {
        columns.insert(key.clone());
        check_length(path, key, rows, value.row_count(), issues);
    }

    let listed: BTreeSet<String> = table.column_names(view.graph).into_iter().collect();
    for name in listed.difference(&columns) {
        issues.push(malformed(
            path,
            Some("colnames"),
            format!("colnames lists '{}', which is not a column", name),
        ));
    }
    for name in columns.difference(&listed) {
        issues.push(malformed(
            path,
            Some("colnames"),
            format!("column '{}' is missing from colnames", name),
        ));
    }
}

fn check_length(
    path: &str,
    column: &str,
    rows: usize,
    length: Option<usize>,
    issues: &mut Vec<ValidationIssue>,
) {
    if let Some(length) = length
        && length != rows
    {
        issues.push(ValidationIssue::error(
            IssueKind::ColumnLengthMismatch,
            path,
            Some(column),
            format!("column has {} rows, table has {}", length, rows),
        ));
    }
}

/// Region ranges must lie within the referenced table
fn check_region(
    view: &GraphView<'_>,
    path: &str,
    field: &str,
    region: &RegionRefs,
    issues: &mut Vec<ValidationIssue>,
) {
    if !view.live.contains(&region.table) {
        return;
    }
    let Ok(rows) = ColumnarTable::wrap(view.graph, region.table)
        .and_then(|t| t.row_count(view.graph))
    else {
        return;
    };
    if let Some((start, end)) = region.first_out_of_bounds(rows) {
        issues.push(malformed(
            path,
            Some(field),
            format!(
                "region {}..{} outside {} with {} rows",
                start,
                end,
                view.graph.display_path(region.table),
                rows
            ),
        ));
    }
}

fn malformed(path: &str, field: Option<&str>, message: String) -> ValidationIssue {
    ValidationIssue::error(IssueKind::MalformedTable, path, field, message)
}
