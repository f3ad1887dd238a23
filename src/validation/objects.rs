//! Instance checks
//!
//! Type existence, required fields, field values against their declared
//! dtype and shape, child cardinality and child types, deprecated fields.

use super::{GraphView, IssueKind, ValidationIssue, Validator};
use crate::models::graph::is_set;
use crate::models::{DATA_FIELD, FieldValue, ObjectId, check_dtype, check_field_value, check_shape};
use crate::spec::{FieldKind, ResolvedField, ResolvedType, SpecKind};

pub(crate) fn check_instance(
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
    if resolved.is_abstract {
        issues.push(ValidationIssue::error(
            IssueKind::AbstractType,
            path,
            None,
            format!("{} is abstract", resolved.key),
        ));
    }

    for field in resolved.required_fields() {
        if field.spec.default.is_none() && !is_set(instance.fields.get(field.key())) {
            issues.push(ValidationIssue::error(
                IssueKind::MissingRequiredField,
                path,
                Some(field.key()),
                "required field is not set",
            ));
        }
    }

    if resolved.kind == SpecKind::Dataset {
        match &instance.data {
            None => issues.push(ValidationIssue::error(
                IssueKind::MissingRequiredField,
                path,
                Some(DATA_FIELD),
                "dataset has no data",
            )),
            Some(data) => {
                let checked = check_dtype(path, DATA_FIELD, resolved.dtype, data)
                    .and_then(|_| check_shape(path, DATA_FIELD, resolved.shape.as_ref(), data));
                if let Err(e) = checked {
                    issues.push(ValidationIssue::from_object_error(path, &e));
                }
            }
        }
    }

    for (key, value) in &instance.fields {
        let Some(field) = resolved.field(key) else {
            issues.push(ValidationIssue::error(
                IssueKind::TypeMismatch,
                path,
                Some(key),
                format!("{} declares no field '{}'", resolved.key, key),
            ));
            continue;
        };
        if field.spec.deprecated {
            issues.push(ValidationIssue::warning(
                IssueKind::Deprecated,
                path,
                Some(key),
                "field is deprecated",
            ));
        }
        if field.spec.holds_children() {
            check_children(validator, view, path, field, value, issues);
        } else if field.kind() != FieldKind::Link
            && let Err(e) = check_field_value(path, field, value)
        {
            issues.push(ValidationIssue::from_object_error(path, &e));
        }
    }
}

fn check_children(
    validator: &Validator<'_>,
    view: &GraphView<'_>,
    path: &str,
    field: &ResolvedField,
    value: &FieldValue,
    issues: &mut Vec<ValidationIssue>,
) {
    let key = field.key();
    if !matches!(value, FieldValue::Child(_) | FieldValue::Children(_)) {
        issues.push(ValidationIssue::error(
            IssueKind::TypeMismatch,
            path,
            Some(key),
            format!("expected child instances, got {}", value.describe()),
        ));
        return;
    }
    let children = value.child_ids();
    let quantity = field.spec.quantity;
    if quantity.max().is_some_and(|max| children.len() > max) {
        issues.push(ValidationIssue::error(
            IssueKind::Cardinality,
            path,
            Some(key),
            format!("allows {} value(s), got {}", quantity, children.len()),
        ));
    }

    let Some(target) = &field.target else {
        return;
    };
    for child in children {
        let Some(instance) = view.graph.get(child) else {
            continue;
        };
        let compatible = validator
            .resolve(&instance.type_key)
            .is_ok_and(|t| t.is_a(target));
        if !compatible {
            issues.push(ValidationIssue::error(
                IssueKind::TypeMismatch,
                path,
                Some(key),
                format!(
                    "child '{}' of type {} is not a {}",
                    instance.name, instance.type_key, target
                ),
            ));
        }
    }
}
