//! Container backend abstraction
//!
//! Defines the ContainerBackend trait through which the engine reaches a
//! hierarchical container of groups, datasets, attributes and links, and
//! implementations for different storage systems:
//! - MemoryContainerBackend: in-process containers shared through a MemoryStore
//! - FileSystemContainerBackend: one directory per node (feature `native-fs`)
//!
//! Writes always go to a staged container that replaces the container at
//! its location only on `commit`; reads come from the container opened with
//! `open`.

use crate::models::{ArrayData, Scalar};
use crate::spec::DType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Range;
use tracing::warn;

pub mod memory;

#[cfg(feature = "native-fs")]
pub mod filesystem;

pub use memory::{MemoryContainer, MemoryContainerBackend, MemoryStore};

/// Error type for storage operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Node not found: {0}")]
    NotFound(String),
    #[error("Node already exists: {0}")]
    AlreadyExists(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Dataset {0} is incomplete")]
    IncompleteDataset(String),
    #[error("No container is open")]
    NotOpen,
    #[error("Container {0} is open read-only")]
    ReadOnly(String),
    #[error("Invalid node path: {0}")]
    InvalidPath(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

impl StorageError {
    /// Failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Dataset,
    Link,
}

/// Layout of a stored dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Rows held by each chunk, in order
    pub chunk_rows: Vec<usize>,
    /// False while a streamed write is in progress or after it was aborted
    pub complete: bool,
}

impl DatasetInfo {
    pub fn chunks(&self) -> usize {
        self.chunk_rows.len()
    }

    /// Layout of a dataset written in one piece
    pub fn whole(data: &ArrayData) -> Self {
        Self {
            dtype: data.dtype,
            shape: data.shape.clone(),
            chunk_rows: vec![data.rows()],
            complete: true,
        }
    }

    /// Layout of a dataset about to be streamed
    pub fn streaming(dtype: DType, inner_shape: &[usize]) -> Self {
        let mut shape = vec![0];
        shape.extend_from_slice(inner_shape);
        Self {
            dtype,
            shape,
            chunk_rows: Vec::new(),
            complete: false,
        }
    }

    /// Account for an appended chunk, checking it matches the layout
    pub fn append(&mut self, path: &str, chunk: &ArrayData) -> StorageResult<()> {
        if self.complete {
            return Err(StorageError::BackendError(format!(
                "dataset {} is not being streamed",
                path
            )));
        }
        if chunk.dtype != self.dtype || chunk.inner_shape() != &self.shape[1..] || chunk.shape.is_empty() {
            return Err(StorageError::BackendError(format!(
                "chunk {} {:?} does not match dataset {} {} {:?}",
                chunk.dtype, chunk.shape, path, self.dtype, self.shape
            )));
        }
        self.shape[0] += chunk.rows();
        self.chunk_rows.push(chunk.rows());
        Ok(())
    }
}

/// Value of an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Scalar(Scalar),
    Array(ArrayData),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Scalar(s) => s.as_text(),
            AttributeValue::Array(_) => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Scalar(Scalar::Text(value.to_string()))
    }
}

/// Normalize a node path to `/a/b` form, rejecting empty, `.` and `..` segments
pub fn normalize_path(path: &str) -> StorageResult<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }
    let mut out = String::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        out.push('/');
        out.push_str(segment);
    }
    Ok(out)
}

/// Parent of a normalized path; `None` for the root
pub fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(i) => Some(path[..i].to_string()),
        None => None,
    }
}

/// Join a normalized parent path and a child name
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Trait for container backends
///
/// One backend value holds at most one opened container (for reads) and
/// one staged container (for writes) at a time.
#[async_trait(?Send)]
pub trait ContainerBackend {
    /// Open an existing container
    async fn open(&mut self, location: &str, mode: AccessMode) -> StorageResult<()>;

    /// Start staging a new container that replaces `location` on commit
    async fn create(&mut self, location: &str) -> StorageResult<()>;

    /// Atomically publish the staged container
    async fn commit(&mut self) -> StorageResult<()>;

    /// Discard the staged container
    async fn abort(&mut self) -> StorageResult<()>;

    /// Release the opened container and discard any staging
    async fn close(&mut self) -> StorageResult<()>;

    async fn exists(&self, location: &str) -> StorageResult<bool>;

    /// Location of the opened container
    fn location(&self) -> Option<&str>;

    async fn create_group(&mut self, path: &str) -> StorageResult<()>;

    /// Write a dataset in one chunk
    async fn create_dataset(&mut self, path: &str, data: &ArrayData) -> StorageResult<()>;

    /// Create an empty, incomplete dataset to be filled with `append_chunk`
    async fn begin_dataset_stream(
        &mut self,
        path: &str,
        dtype: DType,
        inner_shape: &[usize],
    ) -> StorageResult<()>;

    async fn append_chunk(&mut self, path: &str, chunk: &ArrayData) -> StorageResult<()>;

    /// Mark a streamed dataset complete
    async fn finish_dataset_stream(&mut self, path: &str) -> StorageResult<()>;

    async fn create_attribute(
        &mut self,
        path: &str,
        name: &str,
        value: &AttributeValue,
    ) -> StorageResult<()>;

    /// Create a soft link node at `path` pointing at `target`
    async fn create_link(&mut self, path: &str, target: &str) -> StorageResult<()>;

    async fn node_kind(&self, path: &str) -> StorageResult<NodeKind>;

    /// Child names of a group, sorted
    async fn list_children(&self, path: &str) -> StorageResult<Vec<String>>;

    async fn read_attributes(&self, path: &str) -> StorageResult<BTreeMap<String, AttributeValue>>;

    async fn read_attribute(&self, path: &str, name: &str) -> StorageResult<Option<AttributeValue>> {
        Ok(self.read_attributes(path).await?.remove(name))
    }

    async fn read_dataset_info(&self, path: &str) -> StorageResult<DatasetInfo>;

    async fn read_chunk(&self, path: &str, index: usize) -> StorageResult<ArrayData>;

    async fn read_link(&self, path: &str) -> StorageResult<String>;

    /// Read a whole dataset, or a range of rows of it
    async fn read_dataset(&self, path: &str, rows: Option<Range<usize>>) -> StorageResult<ArrayData> {
        let info = self.read_dataset_info(path).await?;
        if !info.complete {
            return Err(StorageError::IncompleteDataset(path.to_string()));
        }
        if info.shape.is_empty() {
            return self.read_chunk(path, 0).await;
        }
        let total = info.shape[0];
        let rows = rows.unwrap_or(0..total);
        if rows.start > rows.end || rows.end > total {
            return Err(StorageError::BackendError(format!(
                "rows {}..{} out of bounds for {} ({} rows)",
                rows.start, rows.end, path, total
            )));
        }

        let mut parts = Vec::new();
        let mut start = 0;
        for (index, count) in info.chunk_rows.iter().enumerate() {
            let end = start + count;
            if end > rows.start && start < rows.end {
                let chunk = self.read_chunk(path, index).await?;
                let lo = rows.start.saturating_sub(start);
                let hi = (rows.end - start).min(*count);
                parts.push(
                    chunk
                        .slice_rows(lo..hi)
                        .map_err(|e| StorageError::SerializationError(e.to_string()))?,
                );
            }
            start = end;
        }
        ArrayData::concat_rows(info.dtype, &info.shape[1..], &parts)
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}

/// Iterates the chunks of a stored dataset, reading each one on demand
pub struct ChunkCursor<'a, B: ContainerBackend + ?Sized> {
    backend: &'a B,
    path: String,
    next: usize,
    total: usize,
}

impl<'a, B: ContainerBackend + ?Sized> ChunkCursor<'a, B> {
    pub async fn new(backend: &'a B, path: &str) -> StorageResult<Self> {
        let info = backend.read_dataset_info(path).await?;
        if !info.complete {
            return Err(StorageError::IncompleteDataset(path.to_string()));
        }
        Ok(Self {
            backend,
            path: path.to_string(),
            next: 0,
            total: info.chunks(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.total - self.next
    }

    pub async fn next(&mut self) -> Option<StorageResult<ArrayData>> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.backend.read_chunk(&self.path, index).await)
    }
}

/// Run a read, retrying up to `retries` times when it fails transiently
pub async fn with_retry<T, F, Fut>(retries: u32, what: &str, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(
                    "Transient failure reading {} ({}); retry {}/{}",
                    what, e, attempt, retries
                );
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("").unwrap(), "/");
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("a/b/").unwrap(), "/a/b");
        assert!(matches!(
            normalize_path("/a//b"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            normalize_path("/a/../b"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_parent_and_join() {
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/a").as_deref(), Some("/"));
        assert_eq!(parent_path("/a/b").as_deref(), Some("/a"));
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
    }

    #[test]
    fn test_streaming_layout() {
        let mut info = DatasetInfo::streaming(DType::Float64, &[2]);
        let chunk = ArrayData::from_f64(vec![1.0, 2.0, 3.0, 4.0])
            .reshape(vec![2, 2])
            .unwrap();
        info.append("/d", &chunk).unwrap();
        assert_eq!(info.shape, vec![2, 2]);
        assert!(info.append("/d", &ArrayData::from_f64(vec![1.0])).is_err());
        assert!(!info.complete);
    }

    #[test]
    fn test_retry_only_transient() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut calls = 0;
            let result = with_retry(1, "x", || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt == 1 {
                        Err(StorageError::Transient("flaky".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
            assert_eq!(result, Ok(2));

            let mut calls = 0;
            let result: StorageResult<()> = with_retry(3, "x", || {
                calls += 1;
                async { Err(StorageError::NotFound("gone".into())) }
            })
            .await;
            assert!(matches!(result, Err(StorageError::NotFound(_))));
            assert_eq!(calls, 1);
        });
    }
}
