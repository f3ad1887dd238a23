//! Validation functionality
//!
//! Checks a built object graph against the type catalog and reports every
//! problem found, ordered by instance path:
//! - Instance checks (types, required fields, dtype/shape, cardinality)
//! - Link checks (dangling and incompatible targets, unreachable instances)
//! - Table checks (ragged offsets, region bounds, column lengths, colnames)
//!
//! Validation never mutates the graph and never stops at the first issue.

pub mod links;
pub mod objects;
pub mod tables;

use crate::models::{ObjectError, ObjectGraph, ObjectId};
use crate::spec::{ResolvedType, TypeCatalog, TypeKey, TypeResolutionError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// What kind of problem an issue reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownType,
    AbstractType,
    MissingRequiredField,
    TypeMismatch,
    ShapeMismatch,
    Cardinality,
    DanglingLink,
    IncompatibleLinkTarget,
    MalformedTable,
    ColumnLengthMismatch,
    Deprecated,
    ExternalLink,
    Unreachable,
}

/// One problem found in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub instance_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(
        kind: IssueKind,
        path: &str,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            instance_path: path.to_string(),
            field_name: field.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn warning(
        kind: IssueKind,
        path: &str,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, path, field, message)
        }
    }

    /// Error issue for a failed value check
    pub(crate) fn from_object_error(path: &str, error: &ObjectError) -> Self {
        let (kind, field) = match error {
            ObjectError::TypeMismatch { field, .. } => (IssueKind::TypeMismatch, Some(field)),
            ObjectError::ShapeMismatch { field, .. } => (IssueKind::ShapeMismatch, Some(field)),
            ObjectError::Cardinality { field, .. } => (IssueKind::Cardinality, Some(field)),
            ObjectError::MissingRequiredField { field, .. } => {
                (IssueKind::MissingRequiredField, Some(field))
            }
            ObjectError::AbstractType(_) => (IssueKind::AbstractType, None),
            ObjectError::UnknownField { field, .. } => (IssueKind::TypeMismatch, Some(field)),
            _ => (IssueKind::MalformedTable, None),
        };
        Self::error(kind, path, field.map(String::as_str), error.to_string())
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.field_name {
            Some(field) => write!(
                f,
                "{} {}.{}: {}",
                severity, self.instance_path, field, self.message
            ),
            None => write!(f, "{} {}: {}", severity, self.instance_path, self.message),
        }
    }
}

/// Whether any issue is an error
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|i| i.severity == Severity::Error)
}

/// Reachable part of a graph, shared by the checks
pub(crate) struct GraphView<'g> {
    pub graph: &'g ObjectGraph,
    pub reachable: Vec<(String, ObjectId)>,
    pub live: HashSet<ObjectId>,
}

impl<'g> GraphView<'g> {
    fn new(graph: &'g ObjectGraph) -> Self {
        let reachable = graph.reachable();
        let live = reachable.iter().map(|(_, id)| *id).collect();
        Self {
            graph,
            reachable,
            live,
        }
    }
}

/// Validates graphs against a type catalog
pub struct Validator<'a> {
    catalog: &'a TypeCatalog,
    namespace: Option<String>,
}

impl<'a> Validator<'a> {
    /// Validate each instance against the type it was created with
    pub fn new(catalog: &'a TypeCatalog) -> Self {
        Self {
            catalog,
            namespace: None,
        }
    }

    /// Validate each instance against the type of the same name as seen
    /// from `namespace` (the namespace first, then its dependencies)
    pub fn for_namespace(
        catalog: &'a TypeCatalog,
        namespace: &str,
    ) -> Result<Self, TypeResolutionError> {
        if catalog.namespace(namespace).is_none() {
            return Err(TypeResolutionError::UnknownNamespace(namespace.to_string()));
        }
        Ok(Self {
            catalog,
            namespace: Some(namespace.to_string()),
        })
    }

    pub(crate) fn catalog(&self) -> &TypeCatalog {
        self.catalog
    }

    /// Type an instance of `type_key` is checked against
    pub(crate) fn resolve(&self, type_key: &TypeKey) -> Result<Arc<ResolvedType>, TypeResolutionError> {
        match &self.namespace {
            Some(namespace) => self.catalog.resolve_type(namespace, &type_key.name),
            None => self.catalog.get(type_key),
        }
    }

    /// Every issue of the graph, ordered by instance path
    pub fn validate(&self, graph: &ObjectGraph) -> Vec<ValidationIssue> {
        let view = GraphView::new(graph);
        let mut issues = Vec::new();
        for (path, id) in &view.reachable {
            let Some(instance) = graph.get(*id) else {
                continue;
            };
            let resolved = match self.resolve(&instance.type_key) {
                Ok(resolved) => resolved,
                Err(e) => {
                    issues.push(ValidationIssue::error(
                        IssueKind::UnknownType,
                        path,
                        None,
                        e.to_string(),
                    ));
                    continue;
                }
            };
            objects::check_instance(self, &view, path, *id, &resolved, &mut issues);
            links::check_references(self, &view, path, *id, &resolved, &mut issues);
            tables::check_table(self, &view, path, *id, &mut issues);
        }
        links::check_unreachable(&view, &mut issues);

        issues.sort_by(|a, b| a.instance_path.cmp(&b.instance_path));
        info!(
            "Validated {} instance(s): {} error(s), {} warning(s)",
            view.reachable.len(),
            issues.iter().filter(|i| i.severity == Severity::Error).count(),
            issues.iter().filter(|i| i.severity == Severity::Warning).count()
        );
        issues
    }
}

/// Validate `graph` against `catalog`
pub fn validate(graph: &ObjectGraph, catalog: &TypeCatalog) -> Vec<ValidationIssue> {
    Validator::new(catalog).validate(graph)
}
