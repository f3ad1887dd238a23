//! In-memory container backend
//!
//! Containers live in a [`MemoryStore`] shared by every backend created from
//! it, so one backend can write a container that another one reads. The
//! backend supports fault injection for exercising retry and abort paths.

use super::{
    AccessMode, AttributeValue, ContainerBackend, DatasetInfo, NodeKind, StorageError,
    StorageResult, normalize_path, parent_path,
};
use crate::models::ArrayData;
use crate::spec::DType;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One node of an in-memory container
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNode {
    pub kind: NodeKind,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub dataset: Option<DatasetInfo>,
    pub chunks: Vec<ArrayData>,
    pub link: Option<String>,
}

impl MemoryNode {
    fn group() -> Self {
        Self {
            kind: NodeKind::Group,
            attributes: BTreeMap::new(),
            dataset: None,
            chunks: Vec::new(),
            link: None,
        }
    }
}

/// A complete container, keyed by normalized node path
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContainer {
    pub nodes: BTreeMap<String, MemoryNode>,
}

impl Default for MemoryContainer {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), MemoryNode::group());
        Self { nodes }
    }
}

impl MemoryContainer {
    pub fn node(&self, path: &str) -> StorageResult<&MemoryNode> {
        let path = normalize_path(path)?;
        self.nodes
            .get(&path)
            .ok_or(StorageError::NotFound(path))
    }

    fn node_mut(&mut self, path: &str) -> StorageResult<&mut MemoryNode> {
        self.nodes
            .get_mut(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    /// Insert a node under an existing group
    fn insert(&mut self, path: &str, node: MemoryNode) -> StorageResult<String> {
        let path = normalize_path(path)?;
        if self.nodes.contains_key(&path) {
            return Err(StorageError::AlreadyExists(path));
        }
        let parent = parent_path(&path).ok_or_else(|| StorageError::AlreadyExists(path.clone()))?;
        match self.nodes.get(&parent) {
            Some(p) if p.kind == NodeKind::Group => {}
            Some(_) => {
                return Err(StorageError::InvalidPath(format!(
                    "{} is not a group",
                    parent
                )));
            }
            None => return Err(StorageError::NotFound(parent)),
        }
        self.nodes.insert(path.clone(), node);
        Ok(path)
    }

    /// Paths of streamed datasets that were never finished
    pub fn incomplete_datasets(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.dataset.as_ref().is_some_and(|d| !d.complete))
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Shared storage for in-memory containers
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    containers: Arc<Mutex<HashMap<String, MemoryContainer>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new backend over this store
    pub fn backend(&self) -> MemoryContainerBackend {
        MemoryContainerBackend::new(self.clone())
    }

    /// Copy of the committed container at `location`
    pub fn snapshot(&self, location: &str) -> Option<MemoryContainer> {
        self.containers.lock().get(location).cloned()
    }

    pub fn contains(&self, location: &str) -> bool {
        self.containers.lock().contains_key(location)
    }

    pub fn insert(&self, location: &str, container: MemoryContainer) {
        self.containers
            .lock()
            .insert(location.to_string(), container);
    }

    pub fn remove(&self, location: &str) -> Option<MemoryContainer> {
        self.containers.lock().remove(location)
    }

    pub fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = self.containers.lock().keys().cloned().collect();
        locations.sort();
        locations
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    writes_allowed: Option<usize>,
    writes: usize,
    failing_reads: usize,
    transient: bool,
}

/// Backend over a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryContainerBackend {
    store: MemoryStore,
    opened: Option<(String, AccessMode)>,
    staging: Option<(String, MemoryContainer)>,
    faults: Mutex<FaultPlan>,
}

impl MemoryContainerBackend {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            opened: None,
            staging: None,
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Let `count` more write operations succeed, then fail every write
    pub fn fail_writes_after(&self, count: usize) {
        let mut faults = self.faults.lock();
        faults.writes_allowed = Some(count);
        faults.writes = 0;
    }

    /// Fail the next `count` reads, transiently or permanently
    pub fn fail_next_reads(&self, count: usize, transient: bool) {
        let mut faults = self.faults.lock();
        faults.failing_reads = count;
        faults.transient = transient;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = FaultPlan::default();
    }

    fn check_write(&self, path: &str) -> StorageResult<()> {
        let mut faults = self.faults.lock();
        if let Some(limit) = faults.writes_allowed
            && faults.writes >= limit
        {
            return Err(StorageError::BackendError(format!(
                "injected write failure at {}",
                path
            )));
        }
        faults.writes += 1;
        Ok(())
    }

    fn check_read(&self, path: &str) -> StorageResult<()> {
        let mut faults = self.faults.lock();
        if faults.failing_reads > 0 {
            faults.failing_reads -= 1;
            return Err(if faults.transient {
                StorageError::Transient(format!("injected read failure at {}", path))
            } else {
                StorageError::IoError(format!("injected read failure at {}", path))
            });
        }
        Ok(())
    }

    fn staged(&mut self, path: &str) -> StorageResult<&mut MemoryContainer> {
        self.check_write(path)?;
        self.staging
            .as_mut()
            .map(|(_, container)| container)
            .ok_or(StorageError::NotOpen)
    }

    fn with_opened<T>(
        &self,
        path: &str,
        f: impl FnOnce(&MemoryContainer) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.check_read(path)?;
        let (location, _) = self.opened.as_ref().ok_or(StorageError::NotOpen)?;
        let containers = self.store.containers.lock();
        let container = containers
            .get(location)
            .ok_or_else(|| StorageError::NotFound(location.clone()))?;
        f(container)
    }

    fn dataset_node<'a>(container: &'a MemoryContainer, path: &str) -> StorageResult<&'a MemoryNode> {
        let node = container.node(path)?;
        if node.dataset.is_none() {
            return Err(StorageError::InvalidPath(format!("{} is not a dataset", path)));
        }
        Ok(node)
    }
}

#[async_trait(?Send)]
impl ContainerBackend for MemoryContainerBackend {
    async fn open(&mut self, location: &str, mode: AccessMode) -> StorageResult<()> {
        if !self.store.contains(location) {
            return Err(StorageError::NotFound(location.to_string()));
        }
        self.opened = Some((location.to_string(), mode));
        Ok(())
    }

    async fn create(&mut self, location: &str) -> StorageResult<()> {
        if let Some((opened, AccessMode::ReadOnly)) = &self.opened
            && opened == location
        {
            return Err(StorageError::ReadOnly(location.to_string()));
        }
        self.staging = Some((location.to_string(), MemoryContainer::default()));
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        let (location, container) = self.staging.take().ok_or(StorageError::NotOpen)?;
        if let Some(path) = container.incomplete_datasets().into_iter().next() {
            return Err(StorageError::IncompleteDataset(path));
        }
        self.store.insert(&location, container);
        Ok(())
    }

    async fn abort(&mut self) -> StorageResult<()> {
        self.staging = None;
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.opened = None;
        self.staging = None;
        Ok(())
    }

    async fn exists(&self, location: &str) -> StorageResult<bool> {
        Ok(self.store.contains(location))
    }

    fn location(&self) -> Option<&str> {
        self.opened.as_ref().map(|(location, _)| location.as_str())
    }

    async fn create_group(&mut self, path: &str) -> StorageResult<()> {
        self.staged(path)?.insert(path, MemoryNode::group())?;
        Ok(())
    }

    async fn create_dataset(&mut self, path: &str, data: &ArrayData) -> StorageResult<()> {
        let node = MemoryNode {
            kind: NodeKind::Dataset,
            attributes: BTreeMap::new(),
            dataset: Some(DatasetInfo::whole(data)),
            chunks: vec![data.clone()],
            link: None,
        };
        self.staged(path)?.insert(path, node)?;
        Ok(())
    }

    async fn begin_dataset_stream(
        &mut self,
        path: &str,
        dtype: DType,
        inner_shape: &[usize],
    ) -> StorageResult<()> {
        let node = MemoryNode {
            kind: NodeKind::Dataset,
            attributes: BTreeMap::new(),
            dataset: Some(DatasetInfo::streaming(dtype, inner_shape)),
            chunks: Vec::new(),
            link: None,
        };
        self.staged(path)?.insert(path, node)?;
        Ok(())
    }

    async fn append_chunk(&mut self, path: &str, chunk: &ArrayData) -> StorageResult<()> {
        let normalized = normalize_path(path)?;
        let node = self.staged(path)?.node_mut(&normalized)?;
        let info = node
            .dataset
            .as_mut()
            .ok_or_else(|| StorageError::InvalidPath(format!("{} is not a dataset", path)))?;
        info.append(path, chunk)?;
        node.chunks.push(chunk.clone());
        Ok(())
    }

    async fn finish_dataset_stream(&mut self, path: &str) -> StorageResult<()> {
        let normalized = normalize_path(path)?;
        let node = self.staged(path)?.node_mut(&normalized)?;
        let info = node
            .dataset
            .as_mut()
            .ok_or_else(|| StorageError::InvalidPath(format!("{} is not a dataset", path)))?;
        info.complete = true;
        Ok(())
    }

    async fn create_attribute(
        &mut self,
        path: &str,
        name: &str,
        value: &AttributeValue,
    ) -> StorageResult<()> {
        let normalized = normalize_path(path)?;
        let node = self.staged(path)?.node_mut(&normalized)?;
        if node.attributes.contains_key(name) {
            return Err(StorageError::AlreadyExists(format!("{}@{}", normalized, name)));
        }
        node.attributes.insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn create_link(&mut self, path: &str, target: &str) -> StorageResult<()> {
        let node = MemoryNode {
            kind: NodeKind::Link,
            attributes: BTreeMap::new(),
            dataset: None,
            chunks: Vec::new(),
            link: Some(target.to_string()),
        };
        self.staged(path)?.insert(path, node)?;
        Ok(())
    }

    async fn node_kind(&self, path: &str) -> StorageResult<NodeKind> {
        self.with_opened(path, |c| Ok(c.node(path)?.kind))
    }

    async fn list_children(&self, path: &str) -> StorageResult<Vec<String>> {
        self.with_opened(path, |c| {
            let parent = normalize_path(path)?;
            if c.node(&parent)?.kind != NodeKind::Group {
                return Err(StorageError::InvalidPath(format!("{} is not a group", parent)));
            }
            let mut names: Vec<String> = c
                .nodes
                .keys()
                .filter(|p| parent_path(p).as_deref() == Some(parent.as_str()))
                .filter_map(|p| p.rsplit('/').next().map(str::to_string))
                .collect();
            names.sort();
            Ok(names)
        })
    }

    async fn read_attributes(&self, path: &str) -> StorageResult<BTreeMap<String, AttributeValue>> {
        self.with_opened(path, |c| Ok(c.node(path)?.attributes.clone()))
    }

    async fn read_dataset_info(&self, path: &str) -> StorageResult<DatasetInfo> {
        self.with_opened(path, |c| {
            Self::dataset_node(c, path)?
                .dataset
                .clone()
                .ok_or_else(|| StorageError::InvalidPath(path.to_string()))
        })
    }

    async fn read_chunk(&self, path: &str, index: usize) -> StorageResult<ArrayData> {
        self.with_opened(path, |c| {
            Self::dataset_node(c, path)?
                .chunks
                .get(index)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("{} chunk {}", path, index)))
        })
    }

    async fn read_link(&self, path: &str) -> StorageResult<String> {
        self.with_opened(path, |c| {
            c.node(path)?
                .link
                .clone()
                .ok_or_else(|| StorageError::InvalidPath(format!("{} is not a link", path)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_staged_until_commit() {
        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("a.nwb").await.unwrap();
            backend.create_group("/acquisition").await.unwrap();
            assert!(!store.contains("a.nwb"));
            backend.commit().await.unwrap();
            assert!(store.snapshot("a.nwb").unwrap().nodes.contains_key("/acquisition"));
        });
    }

    #[test]
    fn test_chunked_reads() {
        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("a.nwb").await.unwrap();
            backend.begin_dataset_stream("/d", DType::Int64, &[]).await.unwrap();
            backend
                .append_chunk("/d", &ArrayData::from_i64(vec![0, 1, 2]))
                .await
                .unwrap();
            backend
                .append_chunk("/d", &ArrayData::from_i64(vec![3, 4]))
                .await
                .unwrap();
            backend.finish_dataset_stream("/d").await.unwrap();
            backend.commit().await.unwrap();

            backend.open("a.nwb", AccessMode::ReadOnly).await.unwrap();
            let info = backend.read_dataset_info("/d").await.unwrap();
            assert_eq!(info.shape, vec![5]);
            assert_eq!(info.chunks(), 2);
            let middle = backend.read_dataset("/d", Some(2..4)).await.unwrap();
            assert_eq!(middle.as_i64(), Some(&[2, 3][..]));
            assert_eq!(backend.list_children("/").await.unwrap(), vec!["d"]);
        });
    }

    #[test]
    fn test_incomplete_dataset_blocks_commit() {
        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("a.nwb").await.unwrap();
            backend.begin_dataset_stream("/d", DType::Float64, &[]).await.unwrap();
            assert!(matches!(
                backend.commit().await,
                Err(StorageError::IncompleteDataset(p)) if p == "/d"
            ));
            assert!(!store.contains("a.nwb"));
        });
    }

    #[test]
    fn test_fault_injection() {
        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("a.nwb").await.unwrap();
            backend.commit().await.unwrap();
            backend.open("a.nwb", AccessMode::ReadWrite).await.unwrap();

            backend.fail_next_reads(1, true);
            assert!(backend.list_children("/").await.unwrap_err().is_transient());
            assert!(backend.list_children("/").await.is_ok());

            backend.create("a.nwb").await.unwrap();
            backend.fail_writes_after(1);
            backend.create_group("/x").await.unwrap();
            assert!(matches!(
                backend.create_group("/y").await,
                Err(StorageError::BackendError(_))
            ));
        });
    }

    #[test]
    fn test_read_only_refuses_staging() {
        block_on(async {
            let store = MemoryStore::new();
            store.insert("a.nwb", MemoryContainer::default());
            let mut backend = store.backend();
            backend.open("a.nwb", AccessMode::ReadOnly).await.unwrap();
            assert!(matches!(
                backend.create("a.nwb").await,
                Err(StorageError::ReadOnly(_))
            ));
        });
    }
}
