//! Graph saving
//!
//! Writes a whole graph into a staged container and commits it in one step.
//! Any failure aborts the staging, so the destination keeps its previous
//! content.

use super::error::{SessionError, SessionResult};
use super::namespaces::cache_namespaces;
use crate::config::IoConfig;
use crate::mapping::ObjectMapper;
use crate::models::ObjectGraph;
use crate::storage::ContainerBackend;
use crate::validation::{Validator, has_errors};
use tracing::{info, warn};

/// Checks a graph must pass before any container is touched
///
/// Required fields are filled, references are live, and with
/// `validate_before_write` the validator reports no errors.
pub(crate) fn preflight(graph: &ObjectGraph, config: &IoConfig) -> SessionResult<()> {
    let dangling = graph.dangling_links();
    if !dangling.is_empty() {
        return Err(SessionError::DanglingLinks(dangling));
    }
    graph.finalize()?;
    if config.validate_before_write {
        let issues = Validator::new(graph.catalog()).validate(graph);
        if has_errors(&issues) {
            return Err(SessionError::Invalid(issues));
        }
    }
    Ok(())
}

/// Abort the staging after `result` failed, keeping the original error
pub(crate) async fn abort_on_error<D, T>(dest: &mut D, result: SessionResult<T>) -> SessionResult<T>
where
    D: ContainerBackend + ?Sized,
{
    if result.is_err()
        && let Err(e) = dest.abort().await
    {
        warn!("Failed to abort staged container: {}", e);
    }
    result
}

/// Saves object graphs through a backend
pub struct GraphSaver<'a, B: ?Sized> {
    backend: &'a mut B,
    config: &'a IoConfig,
}

impl<'a, B> GraphSaver<'a, B>
where
    B: ContainerBackend + ?Sized,
{
    pub fn new(backend: &'a mut B, config: &'a IoConfig) -> Self {
        Self { backend, config }
    }

    /// Write `graph` to `location`, replacing what is there on commit
    ///
    /// Lazy handles are copied from the container opened in the backend.
    /// Returns the number of instances written.
    pub async fn save(&mut self, graph: &ObjectGraph, location: &str) -> SessionResult<usize> {
        preflight(graph, self.config)?;
        self.backend.create(location).await?;
        let result = self.write_staged(graph).await;
        let written = abort_on_error(&mut *self.backend, result).await?;
        info!("Wrote {} instance(s) to {}", written, location);
        Ok(written)
    }

    async fn write_staged(&mut self, graph: &ObjectGraph) -> SessionResult<usize> {
        let mapper = ObjectMapper::new(graph.catalog(), self.config);
        let mut written = 0;
        let mut stack = vec![(graph.root(), "/".to_string())];
        while let Some((id, path)) = stack.pop() {
            let children = mapper
                .write_instance(graph, id, &path, &mut *self.backend, None::<&B>)
                .await?;
            written += 1;
            stack.extend(children.into_iter().rev());
        }
        if self.config.cache_namespaces {
            cache_namespaces(&mut *self.backend, graph).await?;
        }
        self.backend.commit().await?;
        Ok(written)
    }
}
