//! Error types for object mapping operations

use crate::models::ObjectError;
use crate::spec::{TypeKey, TypeResolutionError};
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while translating between instances and container nodes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    /// A stored node names a type the catalog cannot resolve
    #[error("Node {path} has unresolvable type {namespace}:{type_name}: {reason}")]
    UnresolvedType {
        path: String,
        namespace: String,
        type_name: String,
        reason: String,
    },

    /// A typed node lacks one of the identity attributes
    #[error("Node {path} has no '{attribute}' attribute")]
    MissingTypeAttribute { path: String, attribute: String },

    /// The stored type does not satisfy the field it was found in
    #[error("Node {path} of type {actual} does not satisfy field '{field}' ({expected})")]
    IncompatibleType {
        path: String,
        field: String,
        expected: TypeKey,
        actual: TypeKey,
    },

    /// Ragged or region data violates its invariants
    #[error("Malformed table data at {path}: {reason}")]
    MalformedTable { path: String, reason: String },

    /// A streamed payload was already written once
    #[error("Stream for {path} was already consumed")]
    StreamConsumed { path: String },

    /// The stream source failed midway; the dataset was left incomplete
    #[error("Stream for {path} aborted: {reason}")]
    StreamAborted { path: String, reason: String },

    /// A lazy handle refers to a container that is not available for reading
    #[error("Dataset handle {path} refers to container {location}, which is not open")]
    ForeignHandle { location: String, path: String },

    /// A link or region targets an instance that will not be written
    #[error("{source_path} field '{field}' refers to an instance that is not part of the graph")]
    DanglingLink { source_path: String, field: String },

    /// An attribute has an unexpected value
    #[error("Invalid attribute '{attribute}' at {path}: {reason}")]
    InvalidAttribute {
        path: String,
        attribute: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Object error: {0}")]
    Object(#[from] ObjectError),

    #[error("Type resolution error: {0}")]
    Resolution(#[from] TypeResolutionError),
}

/// Result type for mapping operations
pub type MappingResult<T> = Result<T, MappingError>;
