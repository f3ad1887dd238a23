//! Error types for container sessions

use crate::mapping::MappingError;
use crate::models::{DanglingLink, ObjectError};
use crate::spec::SchemaError;
use crate::storage::StorageError;
use crate::validation::ValidationIssue;
use thiserror::Error;

/// Errors that can occur while reading, writing or exporting a container
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The operation is not allowed in the session's current state
    #[error("Cannot {operation} while the session is {state}")]
    InvalidState { operation: String, state: String },

    /// An export would overwrite the container it reads from
    #[error("Cannot export {0} onto itself")]
    ExportToSource(String),

    /// Links or regions point at instances that are gone
    #[error("{} link(s) would dangle: {}", .0.len(), describe_dangling(.0))]
    DanglingLinks(Vec<DanglingLink>),

    /// The graph failed validation before a write
    #[error("Graph has {} validation error(s)", .0.len())]
    Invalid(Vec<ValidationIssue>),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Object error: {0}")]
    Object(#[from] ObjectError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

fn describe_dangling(links: &[DanglingLink]) -> String {
    links
        .iter()
        .map(|d| format!("{}.{}", d.source_path, d.field))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectId;

    #[test]
    fn test_dangling_display() {
        let err = SessionError::DanglingLinks(vec![DanglingLink {
            source: ObjectId::new(),
            source_path: "/general/group".to_string(),
            field: "device".to_string(),
            target: ObjectId::new(),
        }]);
        assert_eq!(err.to_string(), "1 link(s) would dangle: /general/group.device");
    }
}
