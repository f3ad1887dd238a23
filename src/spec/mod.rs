//! Namespace and type catalog
//!
//! Loads namespace documents, merges core and extension namespaces and
//! resolves a type name plus namespace to its flattened specification.

pub mod catalog;
pub mod core;
pub mod error;
pub mod namespace;
pub mod types;

pub use catalog::{CatalogWarning, ResolvedField, ResolvedType, TypeCatalog};
pub use self::core::{CORE_NAMESPACE, core_catalog, core_type};
pub use error::{SchemaError, SchemaResult, TypeResolutionError};
pub use namespace::{Dependency, Namespace, NamespaceHandle, Version};
pub use types::{
    Cardinality, DType, DefaultValue, FieldKind, FieldSpec, ShapeSpec, SpecKind, TypeKey,
    TypeSpec,
};
