//! Error types for schema loading and type resolution

use super::types::TypeKey;
use thiserror::Error;

/// Errors raised while loading a namespace document
///
/// A failed load never changes the catalog.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("Failed to parse namespace document: {0}")]
    Parse(String),

    #[error("Invalid version '{0}' (expected major.minor.patch)")]
    InvalidVersion(String),

    #[error("Namespace '{namespace}' depends on '{dependency}' {required}, which is not loaded{detail}")]
    UnresolvedDependency {
        namespace: String,
        dependency: String,
        required: String,
        detail: String,
    },

    #[error("Type '{type_name}' is declared twice in namespace '{namespace}'")]
    DuplicateType { namespace: String, type_name: String },

    #[error("Field '{field}' is declared twice in type '{type_name}'")]
    DuplicateField { type_name: String, field: String },

    #[error("Invalid field '{field}' in type '{type_name}': {reason}")]
    InvalidField {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("Type '{type_name}' extends unknown type '{parent}'")]
    UnknownParent { type_name: String, parent: String },

    #[error("Type '{type_name}' is a {kind} but extends {parent} which is a {parent_kind}")]
    KindMismatch {
        type_name: String,
        kind: String,
        parent: String,
        parent_kind: String,
    },

    #[error("Inheritance cycle involving type '{0}'")]
    InheritanceCycle(String),

    #[error("Type '{type_name}' makes required field '{field}' of {parent} optional")]
    RequiredFieldDropped {
        type_name: String,
        field: String,
        parent: TypeKey,
    },

    #[error("Version {version} of namespace '{namespace}' removes or changes required field '{field}' of '{type_name}' (present in {previous})")]
    RequiredFieldRemoved {
        namespace: String,
        version: String,
        previous: String,
        type_name: String,
        field: String,
    },

    #[error("Namespace '{namespace}' version {version} is already loaded with different content")]
    ImmutableVersion { namespace: String, version: String },
}

/// Errors raised while resolving a type name
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TypeResolutionError {
    #[error("Unknown namespace '{0}'")]
    UnknownNamespace(String),

    #[error("Unknown type '{type_name}' in namespace '{namespace}' or its dependencies")]
    UnknownType { namespace: String, type_name: String },

    #[error("Unknown type key {0}")]
    UnknownKey(TypeKey),

    #[error("Ambiguous type: candidates {}", format_candidates(.candidates))]
    AmbiguousType { candidates: Vec<TypeKey> },

    #[error("No candidate types given")]
    NoCandidates,
}

fn format_candidates(candidates: &[TypeKey]) -> String {
    candidates
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type SchemaResult<T> = Result<T, SchemaError>;
