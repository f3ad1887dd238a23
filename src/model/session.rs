//! Container sessions
//!
//! [`ContainerIo`] owns one backend and drives whole-graph reads, writes and
//! exports against the container it has open.

use super::error::{SessionError, SessionResult};
use super::export::{ExportReport, GraphExporter};
use super::loader::GraphLoader;
use super::namespaces::load_cached_namespaces;
use super::saver::GraphSaver;
use crate::config::IoConfig;
use crate::mapping::MappingError;
use crate::models::{ArrayData, DatasetHandle, ObjectGraph};
use crate::spec::{NamespaceHandle, TypeCatalog};
use crate::storage::{AccessMode, ChunkCursor, ContainerBackend, with_retry};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open(AccessMode),
    Exporting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => write!(f, "closed"),
            SessionState::Open(AccessMode::ReadOnly) => write!(f, "open read-only"),
            SessionState::Open(AccessMode::ReadWrite) => write!(f, "open read-write"),
            SessionState::Exporting => write!(f, "exporting"),
        }
    }
}

/// Reads, writes and exports object graphs through one backend
pub struct ContainerIo<B: ContainerBackend> {
    backend: B,
    /// Catalog the session was created with
    base_catalog: Arc<TypeCatalog>,
    /// Base catalog plus the namespaces cached in the open container
    catalog: Arc<TypeCatalog>,
    config: IoConfig,
    state: SessionState,
    location: Option<String>,
    cached: Vec<NamespaceHandle>,
}

impl<B: ContainerBackend> ContainerIo<B> {
    /// Create a closed session
    ///
    /// The catalog is used with the config's resolution policy.
    pub fn new(backend: B, catalog: Arc<TypeCatalog>, config: IoConfig) -> Self {
        let catalog = if catalog.policy() == config.resolution_policy {
            catalog
        } else {
            Arc::new((*catalog).clone().with_policy(config.resolution_policy))
        };
        Self {
            backend,
            base_catalog: catalog.clone(),
            catalog,
            config,
            state: SessionState::Closed,
            location: None,
            cached: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Location of the open container
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Catalog used for reads, including namespaces cached in the container
    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    /// Namespaces loaded from the open container
    pub fn cached_namespaces(&self) -> &[NamespaceHandle] {
        &self.cached
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Close the session and hand back the backend
    pub async fn into_backend(mut self) -> SessionResult<B> {
        self.close().await?;
        Ok(self.backend)
    }

    fn require_closed(&self, operation: &str) -> SessionResult<()> {
        match self.state {
            SessionState::Closed => Ok(()),
            state => Err(invalid_state(operation, state)),
        }
    }

    fn require_open(&self, operation: &str) -> SessionResult<(String, AccessMode)> {
        match (self.state, &self.location) {
            (SessionState::Open(mode), Some(location)) => Ok((location.clone(), mode)),
            (state, _) => Err(invalid_state(operation, state)),
        }
    }

    /// Open an existing container
    ///
    /// With `load_cached_namespaces`, namespaces stored in the container are
    /// added to the session's copy of the catalog.
    pub async fn open(&mut self, location: &str, mode: AccessMode) -> SessionResult<()> {
        self.require_closed("open")?;
        self.backend.open(location, mode).await?;
        self.location = Some(location.to_string());
        self.state = SessionState::Open(mode);

        if self.config.load_cached_namespaces {
            let mut catalog = (*self.base_catalog).clone();
            match load_cached_namespaces(&self.backend, &mut catalog, self.config.read_retries)
                .await
            {
                Ok(loaded) => {
                    if !loaded.is_empty() {
                        self.catalog = Arc::new(catalog);
                    }
                    self.cached = loaded;
                }
                Err(e) => {
                    self.close().await?;
                    return Err(e);
                }
            }
        }
        info!("Opened {} ({})", location, self.state);
        Ok(())
    }

    /// Create an empty container and open it read-write
    pub async fn create(&mut self, location: &str) -> SessionResult<()> {
        self.require_closed("create")?;
        self.backend.create(location).await?;
        if let Err(e) = self.backend.commit().await {
            if let Err(abort) = self.backend.abort().await {
                warn!("Failed to abort staged container {}: {}", location, abort);
            }
            return Err(e.into());
        }
        self.backend.open(location, AccessMode::ReadWrite).await?;
        self.location = Some(location.to_string());
        self.state = SessionState::Open(AccessMode::ReadWrite);
        info!("Created {}", location);
        Ok(())
    }

    /// Build the object graph of the open container
    pub async fn read(&self) -> SessionResult<ObjectGraph> {
        self.require_open("read")?;
        GraphLoader::new(&self.backend, self.catalog.clone(), &self.config)
            .load()
            .await
    }

    /// Replace the open container's content with `graph`
    ///
    /// On success every instance is marked as read from this container.
    pub async fn write(&mut self, graph: &mut ObjectGraph) -> SessionResult<usize> {
        let (location, mode) = self.require_open("write")?;
        if mode != AccessMode::ReadWrite {
            return Err(invalid_state("write", self.state));
        }
        let streams = graph.stream_paths();
        let written = GraphSaver::new(&mut self.backend, &self.config)
            .save(graph, &location)
            .await?;
        let streamed = self.written_handles(&location, streams).await?;
        graph.mark_written(&location, &streamed);
        Ok(written)
    }

    /// Lazy handles for the datasets just streamed to `location`
    async fn written_handles(
        &self,
        location: &str,
        paths: Vec<String>,
    ) -> SessionResult<HashMap<String, DatasetHandle>> {
        let backend = &self.backend;
        let mut handles = HashMap::with_capacity(paths.len());
        for path in paths {
            let info = with_retry(self.config.read_retries, &path, || {
                backend.read_dataset_info(&path)
            })
            .await?;
            let handle = DatasetHandle {
                location: location.to_string(),
                path: path.clone(),
                dtype: info.dtype,
                shape: info.shape.clone(),
                chunks: info.chunks(),
            };
            handles.insert(path, handle);
        }
        Ok(handles)
    }

    /// Export `graph`, read from the open container, to a new container
    pub async fn export<D>(
        &mut self,
        graph: &ObjectGraph,
        dest: &mut D,
        dest_location: &str,
    ) -> SessionResult<ExportReport>
    where
        D: ContainerBackend + ?Sized,
    {
        let (_, mode) = self.require_open("export")?;
        self.state = SessionState::Exporting;
        let result = GraphExporter::new(&self.backend, dest, &self.config)
            .export(graph, dest_location)
            .await;
        self.state = SessionState::Open(mode);
        result
    }

    /// Release the container; closing a closed session is a no-op
    pub async fn close(&mut self) -> SessionResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.catalog = self.base_catalog.clone();
        self.cached.clear();
        let location = self.location.take();
        self.backend.close().await?;
        if let Some(location) = location {
            info!("Closed {}", location);
        }
        Ok(())
    }

    fn check_handle(&self, handle: &DatasetHandle) -> SessionResult<()> {
        self.require_open("materialize")?;
        if self.location.as_deref() != Some(handle.location.as_str()) {
            return Err(MappingError::ForeignHandle {
                location: handle.location.clone(),
                path: handle.path.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Read the whole dataset behind a lazy handle
    pub async fn materialize(&self, handle: &DatasetHandle) -> SessionResult<ArrayData> {
        self.check_handle(handle)?;
        let backend = &self.backend;
        Ok(with_retry(self.config.read_retries, &handle.path, || {
            backend.read_dataset(&handle.path, None)
        })
        .await?)
    }

    /// Read a range of rows of the dataset behind a lazy handle
    pub async fn materialize_rows(
        &self,
        handle: &DatasetHandle,
        rows: Range<usize>,
    ) -> SessionResult<ArrayData> {
        self.check_handle(handle)?;
        let backend = &self.backend;
        Ok(with_retry(self.config.read_retries, &handle.path, || {
            backend.read_dataset(&handle.path, Some(rows.clone()))
        })
        .await?)
    }

    /// Iterate the stored chunks of the dataset behind a lazy handle
    pub async fn cursor(&self, handle: &DatasetHandle) -> SessionResult<ChunkCursor<'_, B>> {
        self.check_handle(handle)?;
        Ok(ChunkCursor::new(&self.backend, &handle.path).await?)
    }
}

fn invalid_state(operation: &str, state: SessionState) -> SessionError {
    SessionError::InvalidState {
        operation: operation.to_string(),
        state: state.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, Scalar};
    use crate::spec::{core_catalog, core_type};
    use crate::storage::{MemoryContainerBackend, MemoryStore};
    use chrono::DateTime;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn session(store: &MemoryStore) -> ContainerIo<MemoryContainerBackend> {
        ContainerIo::new(store.backend(), Arc::new(core_catalog()), IoConfig::default())
    }

    fn file_graph() -> ObjectGraph {
        let catalog = Arc::new(core_catalog());
        let mut graph = ObjectGraph::new(catalog, &core_type("NWBFile")).unwrap();
        let root = graph.root();
        let start = DateTime::parse_from_rfc3339("2024-03-01T09:30:00+00:00").unwrap();
        graph
            .set_field(root, "session_description", FieldValue::Scalar(Scalar::Text("test".into())))
            .unwrap();
        graph
            .set_field(root, "identifier", FieldValue::Scalar(Scalar::Text("id-1".into())))
            .unwrap();
        graph
            .set_field(root, "session_start_time", FieldValue::Scalar(Scalar::DateTime(start)))
            .unwrap();
        graph
    }

    #[test]
    fn test_state_machine() {
        let store = MemoryStore::new();
        let mut io = session(&store);
        assert_eq!(io.state(), SessionState::Closed);
        assert!(matches!(
            block_on(io.read()),
            Err(SessionError::InvalidState { .. })
        ));

        block_on(io.create("a.nwb")).unwrap();
        assert_eq!(io.state(), SessionState::Open(AccessMode::ReadWrite));
        assert!(matches!(
            block_on(io.open("a.nwb", AccessMode::ReadOnly)),
            Err(SessionError::InvalidState { .. })
        ));

        block_on(io.close()).unwrap();
        block_on(io.close()).unwrap();
        assert_eq!(io.state(), SessionState::Closed);
        assert_eq!(io.location(), None);
    }

    #[test]
    fn test_write_requires_read_write() {
        let store = MemoryStore::new();
        let mut io = session(&store);
        let mut graph = file_graph();
        block_on(io.create("a.nwb")).unwrap();
        block_on(io.write(&mut graph)).unwrap();
        block_on(io.close()).unwrap();

        block_on(io.open("a.nwb", AccessMode::ReadOnly)).unwrap();
        let err = block_on(io.write(&mut graph)).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidState {
                operation: "write".to_string(),
                state: "open read-only".to_string(),
            }
        );
    }

    #[test]
    fn test_write_marks_graph_clean() {
        let store = MemoryStore::new();
        let mut io = session(&store);
        let mut graph = file_graph();
        block_on(io.create("a.nwb")).unwrap();
        block_on(io.write(&mut graph)).unwrap();

        let root = graph.instance(graph.root()).unwrap();
        assert!(!root.modified);
        assert_eq!(root.origin.as_ref().unwrap().location, "a.nwb");
        assert!(graph.removed().is_empty());
    }

    #[test]
    fn test_open_missing_container() {
        let store = MemoryStore::new();
        let mut io = session(&store);
        assert!(matches!(
            block_on(io.open("missing.nwb", AccessMode::ReadOnly)),
            Err(SessionError::Storage(_))
        ));
        assert_eq!(io.state(), SessionState::Closed);
    }
}
