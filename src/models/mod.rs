//! Object model
//!
//! Typed instances with stable identity, field values, the containment
//! graph and the columnar table pattern.

pub mod error;
pub mod graph;
pub mod object;
pub mod table;
pub mod value;

pub use error::{ObjectError, ObjectResult};
pub use graph::{
    DanglingLink, ObjectGraph, ROOT_NAME, RemovalReport, check_dtype, check_field_value, check_shape,
    validate_name,
};
pub use object::{DATA_FIELD, ObjectId, ObjectInstance, Origin};
pub use table::ColumnarTable;
pub use value::{
    ArrayData, ArrayValues, ChunkSource, DatasetHandle, FieldValue, LinkTarget, RaggedArray,
    RegionRefs, Scalar, StreamSource,
};
