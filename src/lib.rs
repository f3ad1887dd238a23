//! Neurodata SDK - Schema-driven mapping between neurodata objects and containers
//!
//! Provides unified interfaces for:
//! - Namespace loading and type resolution (core and extension namespaces)
//! - Typed object graphs with stable identity and columnar tables
//! - Mapping instances to container groups, datasets, attributes and links
//! - Reading, atomic writing and selective export of containers
//! - Validation of object graphs against the type catalog

pub mod config;
pub mod mapping;
pub mod model;
pub mod models;
pub mod spec;
pub mod storage;
pub mod validation;

// Re-export commonly used types
pub use config::{IoConfig, ResolutionPolicy};
pub use storage::{
    AccessMode, AttributeValue, ChunkCursor, ContainerBackend, MemoryContainerBackend, MemoryStore,
    NodeKind, StorageError,
};
#[cfg(feature = "native-fs")]
pub use storage::filesystem::FileSystemContainerBackend;

pub use mapping::{MappingError, ObjectMapper};
pub use model::{ContainerIo, ExportReport, SessionError, SessionState, export_file};
pub use validation::{IssueKind, Severity, ValidationIssue, Validator, has_errors, validate};

// Re-export the catalog and object model
pub use models::{
    ArrayData, ColumnarTable, DatasetHandle, FieldValue, LinkTarget, ObjectError, ObjectGraph,
    ObjectId, ObjectInstance, RaggedArray, RegionRefs, Scalar, StreamSource,
};
pub use spec::{
    CORE_NAMESPACE, DType, SchemaError, TypeCatalog, TypeKey, TypeResolutionError, core_catalog,
    core_type,
};
