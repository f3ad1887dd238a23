//! Object mapping between instances and container nodes
//!
//! This module provides functionality to:
//! - Write one instance as a typed group or dataset with identity attributes
//! - Encode ragged columns as data plus offsets and regions as row ranges
//! - Copy lazy dataset handles and drain stream sources chunk by chunk
//! - Read typed nodes back, re-resolving their recorded types
//!
//! The orchestrator in [`crate::model`] walks the containment tree and calls
//! the mapper once per instance.

mod error;
mod mapper;

pub use error::{MappingError, MappingResult};
pub use mapper::{
    ChildRef, NAMESPACE_ATTRIBUTE, OBJECT_ID_ATTRIBUTE, ObjectMapper, PendingLink, ReadNode,
    SPECIFICATIONS_GROUP, TABLE_ATTRIBUTE, TABLE_ID_ATTRIBUTE, TARGET_ATTRIBUTE, TYPE_ATTRIBUTE,
    external_link, index_path, parse_external_link, scalar_array,
};
