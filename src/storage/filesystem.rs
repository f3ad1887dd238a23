//! File system container backend
//!
//! Stores each container as a directory tree under a base directory: one
//! directory per node holding a `.node.json` descriptor, with dataset
//! chunks in `.chunk-NNNNN.json` files next to it. Writes go to a hidden
//! staging directory that is renamed over the container on commit.
//!
//! ## Security
//!
//! All path operations are validated to prevent path traversal attacks.
//! Locations containing ".." are rejected, and all resolved paths are verified
//! to remain within the base directory.

use super::{
    AccessMode, AttributeValue, ContainerBackend, DatasetInfo, NodeKind, StorageError,
    StorageResult, normalize_path, parent_path,
};
use crate::models::ArrayData;
use crate::spec::DType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

const NODE_FILE: &str = ".node.json";

/// Descriptor stored in every node directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NodeMeta {
    kind: NodeKind,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dataset: Option<DatasetInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    link: Option<String>,
}

impl NodeMeta {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attributes: BTreeMap::new(),
            dataset: None,
            link: None,
        }
    }
}

#[derive(Debug)]
struct Staging {
    location: String,
    dir: PathBuf,
    target: PathBuf,
    /// Streamed datasets not yet finished
    incomplete: BTreeSet<String>,
}

/// File system container backend
pub struct FileSystemContainerBackend {
    base_path: PathBuf,
    opened: Option<(String, PathBuf, AccessMode)>,
    staging: Option<Staging>,
}

impl FileSystemContainerBackend {
    /// Create a backend storing containers under `base_path`
    ///
    /// # Example
    ///
    /// ```rust
    /// use neurodata_sdk::storage::filesystem::FileSystemContainerBackend;
    ///
    /// let backend = FileSystemContainerBackend::new("/data/sessions");
    /// ```
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            opened: None,
            staging: None,
        }
    }

    /// Resolve a location relative to the base path with security checks.
    ///
    /// # Security
    ///
    /// - Rejects paths containing ".." components
    /// - Verifies the resolved path stays within base_path
    /// - Handles both existing and non-existing paths safely
    fn resolve_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let normalized = path.trim_start_matches('/');

        if normalized.contains("..") {
            return Err(StorageError::PermissionDenied(
                "Path traversal (..) not allowed".to_string(),
            ));
        }

        let full = self.base_path.join(normalized);

        for component in full.components() {
            if matches!(component, Component::ParentDir) {
                return Err(StorageError::PermissionDenied(
                    "Path traversal not allowed".to_string(),
                ));
            }
        }

        let base_canonical = self
            .base_path
            .canonicalize()
            .unwrap_or_else(|_| self.base_path.clone());

        if full.exists() {
            let canonical = full
                .canonicalize()
                .map_err(|e| StorageError::IoError(format!("Failed to resolve path: {}", e)))?;
            if !canonical.starts_with(&base_canonical) {
                return Err(StorageError::PermissionDenied(
                    "Path escapes base directory".to_string(),
                ));
            }
            return Ok(canonical);
        }

        if let Some(parent) = full.parent()
            && parent.exists()
        {
            let parent_canonical = parent.canonicalize().map_err(|e| {
                StorageError::IoError(format!("Failed to resolve parent path: {}", e))
            })?;
            if !parent_canonical.starts_with(&base_canonical) {
                return Err(StorageError::PermissionDenied(
                    "Path escapes base directory".to_string(),
                ));
            }
        }

        Ok(full)
    }

    /// Hidden sibling of a container directory
    fn sibling(target: &Path, tag: &str) -> StorageResult<PathBuf> {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidPath(target.display().to_string()))?;
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(target.display().to_string()))?;
        Ok(parent.join(format!(".{}.{}-{}", name, tag, Uuid::new_v4())))
    }

    fn opened_root(&self) -> StorageResult<&Path> {
        self.opened
            .as_ref()
            .map(|(_, dir, _)| dir.as_path())
            .ok_or(StorageError::NotOpen)
    }

    fn staged_root(&self) -> StorageResult<&Path> {
        self.staging
            .as_ref()
            .map(|s| s.dir.as_path())
            .ok_or(StorageError::NotOpen)
    }

    async fn insert_node(&self, path: &str, meta: &NodeMeta) -> StorageResult<PathBuf> {
        let root = self.staged_root()?;
        let normalized = normalize_path(path)?;
        let parent = parent_path(&normalized)
            .ok_or_else(|| StorageError::AlreadyExists(normalized.clone()))?;
        let parent_meta = read_meta(&node_dir(root, &parent)?, &parent).await?;
        if parent_meta.kind != NodeKind::Group {
            return Err(StorageError::InvalidPath(format!("{} is not a group", parent)));
        }
        let dir = node_dir(root, &normalized)?;
        if fs::metadata(&dir).await.is_ok() {
            return Err(StorageError::AlreadyExists(normalized));
        }
        fs::create_dir(&dir).await.map_err(|e| io_error(&normalized, e))?;
        write_meta(&dir, &normalized, meta).await?;
        Ok(dir)
    }

    async fn update_meta<F>(&self, path: &str, f: F) -> StorageResult<(PathBuf, NodeMeta)>
    where
        F: FnOnce(&mut NodeMeta) -> StorageResult<()>,
    {
        let dir = node_dir(self.staged_root()?, path)?;
        let mut meta = read_meta(&dir, path).await?;
        f(&mut meta)?;
        write_meta(&dir, path, &meta).await?;
        Ok((dir, meta))
    }

    async fn opened_meta(&self, path: &str) -> StorageResult<(PathBuf, NodeMeta)> {
        let dir = node_dir(self.opened_root()?, path)?;
        let meta = read_meta(&dir, path).await?;
        Ok((dir, meta))
    }
}

impl Drop for FileSystemContainerBackend {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take()
            && let Err(e) = std::fs::remove_dir_all(&staging.dir)
        {
            warn!(
                "Failed to remove staging directory for {}: {}",
                staging.location, e
            );
        }
    }
}

/// Directory of a node inside a container directory
fn node_dir(root: &Path, path: &str) -> StorageResult<PathBuf> {
    let normalized = normalize_path(path)?;
    let mut dir = root.to_path_buf();
    for segment in normalized.split('/').filter(|s| !s.is_empty()) {
        if segment.starts_with('.') {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        dir.push(segment);
    }
    Ok(dir)
}

fn chunk_file(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!(".chunk-{:05}.json", index))
}

fn io_error(path: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut => {
            StorageError::Transient(format!("{}: {}", path, e))
        }
        _ => StorageError::IoError(format!("{}: {}", path, e)),
    }
}

async fn read_meta(dir: &Path, path: &str) -> StorageResult<NodeMeta> {
    let bytes = fs::read(dir.join(NODE_FILE))
        .await
        .map_err(|e| io_error(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", path, e)))
}

async fn write_meta(dir: &Path, path: &str, meta: &NodeMeta) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(meta)
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", path, e)))?;
    fs::write(dir.join(NODE_FILE), bytes)
        .await
        .map_err(|e| io_error(path, e))
}

async fn write_chunk(dir: &Path, path: &str, index: usize, chunk: &ArrayData) -> StorageResult<()> {
    let bytes = serde_json::to_vec(chunk)
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", path, e)))?;
    fs::write(chunk_file(dir, index), bytes)
        .await
        .map_err(|e| io_error(path, e))
}

#[async_trait(?Send)]
impl ContainerBackend for FileSystemContainerBackend {
    async fn open(&mut self, location: &str, mode: AccessMode) -> StorageResult<()> {
        if !self.exists(location).await? {
            return Err(StorageError::NotFound(location.to_string()));
        }
        let dir = self.resolve_path(location)?;
        self.opened = Some((location.to_string(), dir, mode));
        info!("Opened container {} ({:?})", location, mode);
        Ok(())
    }

    async fn create(&mut self, location: &str) -> StorageResult<()> {
        if let Some((opened, _, AccessMode::ReadOnly)) = &self.opened
            && opened == location
        {
            return Err(StorageError::ReadOnly(location.to_string()));
        }
        self.abort().await?;

        let target = self.resolve_path(location)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(location, e))?;
        }
        let dir = Self::sibling(&target, "staging")?;
        fs::create_dir(&dir).await.map_err(|e| io_error(location, e))?;
        write_meta(&dir, "/", &NodeMeta::new(NodeKind::Group)).await?;
        self.staging = Some(Staging {
            location: location.to_string(),
            dir,
            target,
            incomplete: BTreeSet::new(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        let staging = self.staging.take().ok_or(StorageError::NotOpen)?;
        if let Some(path) = staging.incomplete.iter().next().cloned() {
            let _ = fs::remove_dir_all(&staging.dir).await;
            return Err(StorageError::IncompleteDataset(path));
        }

        let backup = if fs::metadata(&staging.target).await.is_ok() {
            let backup = Self::sibling(&staging.target, "backup")?;
            fs::rename(&staging.target, &backup)
                .await
                .map_err(|e| io_error(&staging.location, e))?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staging.dir, &staging.target).await {
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, &staging.target).await;
            }
            let _ = fs::remove_dir_all(&staging.dir).await;
            return Err(io_error(&staging.location, e));
        }
        if let Some(backup) = backup
            && let Err(e) = fs::remove_dir_all(&backup).await
        {
            warn!("Failed to remove previous version of {}: {}", staging.location, e);
        }
        info!("Committed container {}", staging.location);
        Ok(())
    }

    async fn abort(&mut self) -> StorageResult<()> {
        if let Some(staging) = self.staging.take() {
            fs::remove_dir_all(&staging.dir)
                .await
                .map_err(|e| io_error(&staging.location, e))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.abort().await?;
        self.opened = None;
        Ok(())
    }

    async fn exists(&self, location: &str) -> StorageResult<bool> {
        let dir = self.resolve_path(location)?;
        match fs::metadata(dir.join(NODE_FILE)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(location, e)),
        }
    }

    fn location(&self) -> Option<&str> {
        self.opened.as_ref().map(|(location, _, _)| location.as_str())
    }

    async fn create_group(&mut self, path: &str) -> StorageResult<()> {
        self.insert_node(path, &NodeMeta::new(NodeKind::Group)).await?;
        Ok(())
    }

    async fn create_dataset(&mut self, path: &str, data: &ArrayData) -> StorageResult<()> {
        let mut meta = NodeMeta::new(NodeKind::Dataset);
        meta.dataset = Some(DatasetInfo::whole(data));
        let dir = self.insert_node(path, &meta).await?;
        write_chunk(&dir, path, 0, data).await
    }

    async fn begin_dataset_stream(
        &mut self,
        path: &str,
        dtype: DType,
        inner_shape: &[usize],
    ) -> StorageResult<()> {
        let mut meta = NodeMeta::new(NodeKind::Dataset);
        meta.dataset = Some(DatasetInfo::streaming(dtype, inner_shape));
        self.insert_node(path, &meta).await?;
        let normalized = normalize_path(path)?;
        if let Some(staging) = &mut self.staging {
            staging.incomplete.insert(normalized);
        }
        Ok(())
    }

    async fn append_chunk(&mut self, path: &str, chunk: &ArrayData) -> StorageResult<()> {
        let (dir, meta) = self
            .update_meta(path, |meta| {
                meta.dataset
                    .as_mut()
                    .ok_or_else(|| StorageError::InvalidPath(format!("{} is not a dataset", path)))?
                    .append(path, chunk)
            })
            .await?;
        let index = meta.dataset.map(|d| d.chunks()).unwrap_or(1) - 1;
        write_chunk(&dir, path, index, chunk).await
    }

    async fn finish_dataset_stream(&mut self, path: &str) -> StorageResult<()> {
        self.update_meta(path, |meta| {
            meta.dataset
                .as_mut()
                .ok_or_else(|| StorageError::InvalidPath(format!("{} is not a dataset", path)))?
                .complete = true;
            Ok(())
        })
        .await?;
        let normalized = normalize_path(path)?;
        if let Some(staging) = &mut self.staging {
            staging.incomplete.remove(&normalized);
        }
        Ok(())
    }

    async fn create_attribute(
        &mut self,
        path: &str,
        name: &str,
        value: &AttributeValue,
    ) -> StorageResult<()> {
        self.update_meta(path, |meta| {
            if meta.attributes.contains_key(name) {
                return Err(StorageError::AlreadyExists(format!("{}@{}", path, name)));
            }
            meta.attributes.insert(name.to_string(), value.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn create_link(&mut self, path: &str, target: &str) -> StorageResult<()> {
        let mut meta = NodeMeta::new(NodeKind::Link);
        meta.link = Some(target.to_string());
        self.insert_node(path, &meta).await?;
        Ok(())
    }

    async fn node_kind(&self, path: &str) -> StorageResult<NodeKind> {
        Ok(self.opened_meta(path).await?.1.kind)
    }

    async fn list_children(&self, path: &str) -> StorageResult<Vec<String>> {
        let (dir, meta) = self.opened_meta(path).await?;
        if meta.kind != NodeKind::Group {
            return Err(StorageError::InvalidPath(format!("{} is not a group", path)));
        }

        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await.map_err(|e| io_error(path, e))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_error(path, e))?
        {
            if let Ok(file_type) = entry.file_type().await
                && file_type.is_dir()
                && let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                entries.push(name.to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }

    async fn read_attributes(&self, path: &str) -> StorageResult<BTreeMap<String, AttributeValue>> {
        Ok(self.opened_meta(path).await?.1.attributes)
    }

    async fn read_dataset_info(&self, path: &str) -> StorageResult<DatasetInfo> {
        self.opened_meta(path)
            .await?
            .1
            .dataset
            .ok_or_else(|| StorageError::InvalidPath(format!("{} is not a dataset", path)))
    }

    async fn read_chunk(&self, path: &str, index: usize) -> StorageResult<ArrayData> {
        let dir = node_dir(self.opened_root()?, path)?;
        let bytes = fs::read(chunk_file(&dir, index))
            .await
            .map_err(|e| io_error(&format!("{} chunk {}", path, index), e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::SerializationError(format!("{}: {}", path, e)))
    }

    async fn read_link(&self, path: &str) -> StorageResult<String> {
        self.opened_meta(path)
            .await?
            .1
            .link
            .ok_or_else(|| StorageError::InvalidPath(format!("{} is not a link", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_path_traversal_blocked() {
        let temp = TempDir::new().unwrap();
        let backend = FileSystemContainerBackend::new(temp.path());

        let result = backend.resolve_path("../etc/passwd");
        assert!(matches!(result, Err(StorageError::PermissionDenied(_))));

        let result = backend.resolve_path("/foo/../../../etc/passwd");
        assert!(matches!(result, Err(StorageError::PermissionDenied(_))));

        let result = backend.resolve_path("valid/path/session.nwb");
        assert!(result.is_ok());
    }

    #[test]
    fn test_hidden_node_names_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            node_dir(temp.path(), "/a/.node.json"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(node_dir(temp.path(), "/a/b").is_ok());
    }

    #[test]
    fn test_commit_and_read() {
        let temp = TempDir::new().unwrap();
        block_on(async {
            let mut backend = FileSystemContainerBackend::new(temp.path());
            backend.create("session.nwb").await.unwrap();
            backend.create_group("/acquisition").await.unwrap();
            backend
                .create_attribute("/acquisition", "neurodata_type", &"Container".into())
                .await
                .unwrap();
            backend
                .begin_dataset_stream("/acquisition/data", DType::Float64, &[2])
                .await
                .unwrap();
            let chunk = ArrayData::from_f64(vec![1.0, 2.0, 3.0, 4.0])
                .reshape(vec![2, 2])
                .unwrap();
            backend.append_chunk("/acquisition/data", &chunk).await.unwrap();
            backend.append_chunk("/acquisition/data", &chunk).await.unwrap();
            backend.finish_dataset_stream("/acquisition/data").await.unwrap();
            backend.create_link("/alias", "/acquisition").await.unwrap();
            backend.commit().await.unwrap();

            backend.open("session.nwb", AccessMode::ReadOnly).await.unwrap();
            assert_eq!(
                backend.list_children("/").await.unwrap(),
                vec!["acquisition", "alias"]
            );
            assert_eq!(backend.node_kind("/alias").await.unwrap(), NodeKind::Link);
            assert_eq!(backend.read_link("/alias").await.unwrap(), "/acquisition");
            let data = backend.read_dataset("/acquisition/data", None).await.unwrap();
            assert_eq!(data.shape, vec![4, 2]);
            let attr = backend
                .read_attribute("/acquisition", "neurodata_type")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(attr.as_text(), Some("Container"));
        });
    }

    #[test]
    fn test_abort_keeps_previous_container() {
        let temp = TempDir::new().unwrap();
        block_on(async {
            let mut backend = FileSystemContainerBackend::new(temp.path());
            backend.create("session.nwb").await.unwrap();
            backend.create_group("/kept").await.unwrap();
            backend.commit().await.unwrap();

            backend.create("session.nwb").await.unwrap();
            backend.create_group("/discarded").await.unwrap();
            backend.abort().await.unwrap();

            backend.open("session.nwb", AccessMode::ReadOnly).await.unwrap();
            assert_eq!(backend.list_children("/").await.unwrap(), vec!["kept"]);
        });
        let hidden = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(hidden, 0);
    }

    #[test]
    fn test_drop_removes_staging() {
        let temp = TempDir::new().unwrap();
        block_on(async {
            let mut backend = FileSystemContainerBackend::new(temp.path());
            backend.create("session.nwb").await.unwrap();
            backend.create_group("/x").await.unwrap();
        });
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
