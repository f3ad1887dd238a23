//! Link and region checks

use super::{GraphView, IssueKind, ValidationIssue, Validator};
use crate::models::{DATA_FIELD, FieldValue, LinkTarget, ObjectId};
use crate::spec::{FieldKind, ResolvedType, TypeKey, core_type};

pub(crate) fn check_references(
    validator: &Validator<'_>,
    view: &GraphView<'_>,
    path: &str,
    id: ObjectId,
    resolved: &ResolvedType,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(instance) = view.graph.get(id) else {
        return;
    };
    for (key, value) in &instance.fields {
        match value {
            FieldValue::Link(target) => {
                let expected = resolved
                    .field(key)
                    .filter(|f| f.kind() == FieldKind::Link)
                    .and_then(|f| f.target.as_ref());
                check_link(validator, view, path, key, target, expected, issues);
            }
            FieldValue::Region(region) => {
                check_target(validator, view, path, key, region.table, &core_type("DynamicTable"), issues)
            }
            _ => {}
        }
    }
    if let Some(FieldValue::Region(region)) = &instance.data {
        check_target(
            validator,
            view,
            path,
            DATA_FIELD,
            region.table,
            &core_type("DynamicTable"),
            issues,
        );
    }
}

fn check_link(
    validator: &Validator<'_>,
    view: &GraphView<'_>,
    path: &str,
    field: &str,
    target: &LinkTarget,
    expected: Option<&TypeKey>,
    issues: &mut Vec<ValidationIssue>,
) {
    match (target, expected) {
        (LinkTarget::External { location, path: target_path }, _) => {
            issues.push(ValidationIssue::warning(
                IssueKind::ExternalLink,
                path,
                Some(field),
                format!("links to {} in {}, which is not checked", target_path, location),
            ));
        }
        (LinkTarget::Local(target), Some(expected)) => {
            check_target(validator, view, path, field, *target, expected, issues)
        }
        (LinkTarget::Local(target), None) => {
            if !view.live.contains(target) {
                issues.push(dangling(path, field, *target));
            }
        }
    }
}

/// The referenced instance must be reachable and satisfy `expected`
fn check_target(
    validator: &Validator<'_>,
    view: &GraphView<'_>,
    path: &str,
    field: &str,
    target: ObjectId,
    expected: &TypeKey,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(instance) = view.graph.get(target).filter(|_| view.live.contains(&target)) else {
        issues.push(dangling(path, field, target));
        return;
    };
    let compatible = validator
        .resolve(&instance.type_key)
        .is_ok_and(|t| t.is_a(expected));
    if !compatible {
        issues.push(ValidationIssue::error(
            IssueKind::IncompatibleLinkTarget,
            path,
            Some(field),
            format!(
                "target {} is a {}, not a {}",
                view.graph.display_path(target),
                instance.type_key,
                expected
            ),
        ));
    }
}

fn dangling(path: &str, field: &str, target: ObjectId) -> ValidationIssue {
    ValidationIssue::error(
        IssueKind::DanglingLink,
        path,
        Some(field),
        format!("target {} is not part of the graph", target),
    )
}

/// Instances held by the graph but not reachable from its root
pub(crate) fn check_unreachable(view: &GraphView<'_>, issues: &mut Vec<ValidationIssue>) {
    let mut lost: Vec<ObjectId> = view
        .graph
        .iter()
        .map(|i| i.id)
        .filter(|id| !view.live.contains(id))
        .collect();
    lost.sort();
    for id in lost {
        issues.push(ValidationIssue::warning(
            IssueKind::Unreachable,
            &view.graph.display_path(id),
            None,
            "instance is not reachable from the root and will not be written",
        ));
    }
}
