//! Error types for object graph operations

use super::object::ObjectId;
use crate::spec::{Cardinality, TypeKey, TypeResolutionError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ObjectError {
    #[error("An instance named '{name}' already exists under '{parent}'")]
    NameCollision { parent: String, name: String },

    #[error("Invalid instance name '{0}': names must be non-empty, contain no '/' and not start with '.'")]
    InvalidName(String),

    #[error("Type mismatch for '{field}' of '{path}': expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Shape mismatch for '{field}' of '{path}': expected {expected}, got {actual:?}")]
    ShapeMismatch {
        path: String,
        field: String,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Field '{field}' of '{path}' allows {cardinality} value(s), got {count}")]
    Cardinality {
        path: String,
        field: String,
        cardinality: Cardinality,
        count: usize,
    },

    #[error("Required field '{field}' of '{path}' is not set")]
    MissingRequiredField { path: String, field: String },

    #[error("Type {type_key} has no field '{field}'")]
    UnknownField { type_key: TypeKey, field: String },

    #[error("Unknown instance {0}")]
    UnknownInstance(ObjectId),

    #[error("No instance at path '{0}'")]
    UnknownPath(String),

    #[error("Type {0} is abstract and cannot be instantiated")]
    AbstractType(TypeKey),

    #[error("Placing '{child}' under '{parent}' would create a containment cycle")]
    Cycle { parent: String, child: String },

    #[error("No field of '{parent}' ({parent_type}) accepts a {child_type} named '{name}'")]
    NoMatchingField {
        parent: String,
        parent_type: TypeKey,
        child_type: TypeKey,
        name: String,
    },

    #[error("The root instance cannot be removed")]
    RootRemoval,

    #[error(transparent)]
    Type(#[from] TypeResolutionError),

    #[error("Invalid array: {0}")]
    InvalidArray(String),

    #[error("Table '{table}': column '{column}' has {actual} rows, expected {expected}")]
    RowCountMismatch {
        table: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("'{0}' is not a DynamicTable")]
    NotATable(String),

    #[error("Malformed table data: {0}")]
    MalformedTable(String),

    #[error("Stream source failed: {0}")]
    Source(String),
}

pub type ObjectResult<T> = Result<T, ObjectError>;
