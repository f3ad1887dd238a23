//! Export of a modified graph to a new container
//!
//! Subtrees that are unchanged since they were read from the source
//! container are copied node by node, chunks and attributes untouched.
//! Everything else is re-mapped from the graph. Removed instances are
//! simply not written. The source container is only ever read.

use super::error::{SessionError, SessionResult};
use super::namespaces::cache_namespaces;
use super::saver::{abort_on_error, preflight};
use super::session::ContainerIo;
use crate::config::IoConfig;
use crate::mapping::{
    ObjectMapper, TABLE_ATTRIBUTE, TABLE_ID_ATTRIBUTE, index_path, parse_external_link,
};
use crate::models::{FieldValue, ObjectGraph, ObjectId};
use crate::spec::TypeCatalog;
use crate::storage::{AccessMode, AttributeValue, ContainerBackend, NodeKind, join_path, with_retry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an export did with each part of the graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    /// Roots of subtrees copied unchanged from the source
    pub copied: Vec<String>,
    /// Instances written from the graph
    pub remapped: Vec<String>,
    /// Source paths of removed instances that were left out
    pub omitted: Vec<String>,
}

/// Exports one graph from the container opened in `source`
pub struct GraphExporter<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    dest: &'a mut D,
    config: &'a IoConfig,
}

impl<'a, S, D> GraphExporter<'a, S, D>
where
    S: ContainerBackend + ?Sized,
    D: ContainerBackend + ?Sized,
{
    pub fn new(source: &'a S, dest: &'a mut D, config: &'a IoConfig) -> Self {
        Self {
            source,
            dest,
            config,
        }
    }

    /// Write `graph` to `dest_location` through the destination backend
    ///
    /// Fails before the destination is created when links dangle or the
    /// destination is the source container itself.
    pub async fn export(
        &mut self,
        graph: &ObjectGraph,
        dest_location: &str,
    ) -> SessionResult<ExportReport> {
        preflight(graph, self.config)?;
        let source_location = self.source.location().unwrap_or_default().to_string();
        if source_location == dest_location {
            return Err(SessionError::ExportToSource(dest_location.to_string()));
        }

        self.dest.create(dest_location).await?;
        let result = self.write_staged(graph, &source_location).await;
        let mut report = abort_on_error(&mut *self.dest, result).await?;

        report.omitted = graph
            .removed()
            .values()
            .flatten()
            .filter(|origin| origin.location == source_location)
            .map(|origin| origin.path.clone())
            .collect();
        report.omitted.sort();
        info!(
            "Exported {} to {}: {} subtree(s) copied, {} instance(s) re-mapped, {} omitted",
            source_location,
            dest_location,
            report.copied.len(),
            report.remapped.len(),
            report.omitted.len()
        );
        Ok(report)
    }

    async fn write_staged(
        &mut self,
        graph: &ObjectGraph,
        source_location: &str,
    ) -> SessionResult<ExportReport> {
        let mapper = ObjectMapper::new(graph.catalog(), self.config);
        let remap = LinkRemap::new(graph, source_location);
        let mut report = ExportReport::default();

        let mut stack = vec![(graph.root(), "/".to_string())];
        while let Some((id, path)) = stack.pop() {
            if id != graph.root() && is_copyable(graph, id, source_location) {
                self.copy_node(&path, &remap).await?;
                if let Some(FieldValue::Ragged(_)) = graph.get(id).and_then(|i| i.data.as_ref()) {
                    self.copy_node(&index_path(&path), &remap).await?;
                }
                report.copied.push(path);
                continue;
            }
            let children = mapper
                .write_instance(graph, id, &path, &mut *self.dest, Some(self.source))
                .await?;
            report.remapped.push(path);
            stack.extend(children.into_iter().rev());
        }

        if self.config.cache_namespaces {
            cache_namespaces(&mut *self.dest, graph).await?;
        }
        self.dest.commit().await?;
        Ok(report)
    }

    /// Copy the source subtree at `path` node by node
    async fn copy_node(&mut self, path: &str, remap: &LinkRemap<'_>) -> SessionResult<()> {
        let retries = self.config.read_retries;
        let source = self.source;
        let mut stack = vec![path.to_string()];
        while let Some(current) = stack.pop() {
            let kind = with_retry(retries, &current, || source.node_kind(&current)).await?;
            debug!("Copying {:?} {}", kind, current);
            match kind {
                NodeKind::Group => {
                    self.dest.create_group(&current).await?;
                    let names =
                        with_retry(retries, &current, || source.list_children(&current)).await?;
                    stack.extend(names.iter().rev().map(|n| join_path(&current, n)));
                }
                NodeKind::Dataset => self.copy_dataset(&current).await?,
                NodeKind::Link => {
                    let target = with_retry(retries, &current, || source.read_link(&current)).await?;
                    self.dest
                        .create_link(&current, &remap.link_target(&target))
                        .await?;
                    continue;
                }
            }

            let attributes =
                with_retry(retries, &current, || source.read_attributes(&current)).await?;
            for (name, value) in &attributes {
                let value = match (name.as_str(), attributes.get(TABLE_ID_ATTRIBUTE)) {
                    (TABLE_ATTRIBUTE, Some(table_id)) => remap.table_path(table_id, value),
                    _ => value.clone(),
                };
                self.dest.create_attribute(&current, name, &value).await?;
            }
        }
        Ok(())
    }

    async fn copy_dataset(&mut self, path: &str) -> SessionResult<()> {
        let retries = self.config.read_retries;
        let source = self.source;
        let info = with_retry(retries, path, || source.read_dataset_info(path)).await?;
        if info.shape.is_empty() {
            let chunk = with_retry(retries, path, || source.read_chunk(path, 0)).await?;
            self.dest.create_dataset(path, &chunk).await?;
            return Ok(());
        }
        self.dest
            .begin_dataset_stream(path, info.dtype, &info.shape[1..])
            .await?;
        for index in 0..info.chunks() {
            let chunk = with_retry(retries, path, || source.read_chunk(path, index)).await?;
            self.dest.append_chunk(path, &chunk).await?;
        }
        self.dest.finish_dataset_stream(path).await?;
        Ok(())
    }
}

/// Unchanged since it was read from `source_location`, subtree included
fn is_copyable(graph: &ObjectGraph, id: ObjectId, source_location: &str) -> bool {
    graph
        .get(id)
        .and_then(|i| i.origin.as_ref())
        .is_some_and(|o| o.location == source_location)
        && graph.is_subtree_clean(id)
}

/// Maps source paths to where the same instances are written
struct LinkRemap<'g> {
    graph: &'g ObjectGraph,
    by_origin: HashMap<String, ObjectId>,
}

impl<'g> LinkRemap<'g> {
    fn new(graph: &'g ObjectGraph, source_location: &str) -> Self {
        let by_origin = graph
            .iter()
            .filter_map(|i| {
                i.origin
                    .as_ref()
                    .filter(|o| o.location == source_location)
                    .map(|o| (o.path.clone(), i.id))
            })
            .collect();
        Self { graph, by_origin }
    }

    fn link_target(&self, target: &str) -> String {
        if parse_external_link(target).is_some() {
            return target.to_string();
        }
        match self
            .by_origin
            .get(target)
            .and_then(|id| self.graph.path_of(*id))
        {
            Some(path) => path,
            None => {
                warn!("Copying link to {}, which no instance was read from", target);
                target.to_string()
            }
        }
    }

    fn table_path(&self, table_id: &AttributeValue, stored: &AttributeValue) -> AttributeValue {
        table_id
            .as_text()
            .and_then(ObjectId::parse)
            .and_then(|id| self.graph.path_of(id))
            .map(|path| AttributeValue::from(path.as_str()))
            .unwrap_or_else(|| stored.clone())
    }
}

/// Read the container at `source_location` and export it unchanged
///
/// The source is opened read-only and closed on every exit path.
pub async fn export_file<S, D>(
    source: S,
    dest: &mut D,
    source_location: &str,
    dest_location: &str,
    catalog: Arc<TypeCatalog>,
    config: &IoConfig,
) -> SessionResult<ExportReport>
where
    S: ContainerBackend,
    D: ContainerBackend + ?Sized,
{
    let mut session = ContainerIo::new(source, catalog, config.clone());
    session.open(source_location, AccessMode::ReadOnly).await?;
    let result = async {
        let graph = session.read().await?;
        session.export(&graph, dest, dest_location).await
    }
    .await;
    if let Err(e) = session.close().await {
        warn!("Failed to close {}: {}", source_location, e);
    }
    result
}
