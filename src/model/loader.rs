//! Graph loading
//!
//! Reads the container opened in a backend into an [`ObjectGraph`]. The
//! tree is walked breadth first; links are resolved once every instance is
//! known, so they may point anywhere in the container.

use super::error::SessionResult;
use crate::config::IoConfig;
use crate::mapping::{ChildRef, MappingError, OBJECT_ID_ATTRIBUTE, ObjectMapper, PendingLink};
use crate::models::{ColumnarTable, FieldValue, LinkTarget, ObjectGraph, ObjectId, RegionRefs};
use crate::spec::TypeCatalog;
use crate::storage::{ContainerBackend, join_path};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

/// Loads object graphs from an opened container
pub struct GraphLoader<'a, B: ?Sized> {
    backend: &'a B,
    catalog: Arc<TypeCatalog>,
    config: &'a IoConfig,
}

impl<'a, B> GraphLoader<'a, B>
where
    B: ContainerBackend + ?Sized,
{
    pub fn new(backend: &'a B, catalog: Arc<TypeCatalog>, config: &'a IoConfig) -> Self {
        Self {
            backend,
            catalog,
            config,
        }
    }

    /// Read the whole container
    ///
    /// Every instance comes back unmodified with its origin set. Datasets
    /// stay in the container behind lazy handles.
    pub async fn load(&self) -> SessionResult<ObjectGraph> {
        let mapper = ObjectMapper::new(&self.catalog, self.config);
        let root = mapper.read_instance(self.backend, "/", None, None).await?;

        let root_id = root.instance.id;
        let mut graph = ObjectGraph::with_root(self.catalog.clone(), root.instance);
        let mut queue: VecDeque<(ObjectId, ChildRef)> =
            root.children.into_iter().map(|c| (root_id, c)).collect();
        let mut pending: Vec<(ObjectId, PendingLink)> =
            root.links.into_iter().map(|l| (root_id, l)).collect();

        while let Some((parent, child)) = queue.pop_front() {
            let parent_type = graph.resolved_type(parent)?;
            let field = parent_type.field(&child.field);
            let mut node = mapper
                .read_instance(self.backend, &child.path, field, child.index.as_deref())
                .await?;

            let id = node.instance.id;
            if graph.contains(id) {
                return Err(MappingError::InvalidAttribute {
                    path: child.path,
                    attribute: OBJECT_ID_ATTRIBUTE.to_string(),
                    reason: format!("object id {} is used twice", id),
                }
                .into());
            }
            node.instance.parent = Some(parent);
            graph.insert_loaded(node.instance);

            let many = field.is_some_and(|f| f.spec.quantity.allows_many());
            let fields = &mut graph.instance_mut(parent)?.fields;
            if many {
                match fields
                    .entry(child.field)
                    .or_insert_with(|| FieldValue::Children(Vec::new()))
                {
                    FieldValue::Children(ids) => ids.push(id),
                    other => *other = FieldValue::Children(vec![id]),
                }
            } else {
                fields.insert(child.field, FieldValue::Child(id));
            }

            queue.extend(node.children.into_iter().map(|c| (id, c)));
            pending.extend(node.links.into_iter().map(|l| (id, l)));
        }

        self.resolve_links(&mut graph, pending)?;
        check_regions(&graph)?;
        graph.mark_all_clean();
        info!(
            "Read {} instance(s) from {}",
            graph.len(),
            self.backend.location().unwrap_or("<unnamed>")
        );
        Ok(graph)
    }

    /// Point links at the instances read from their target paths
    ///
    /// A target that is not a typed node of the container is kept as a
    /// path into it, so the link survives a later write.
    fn resolve_links(
        &self,
        graph: &mut ObjectGraph,
        pending: Vec<(ObjectId, PendingLink)>,
    ) -> SessionResult<()> {
        let by_path: HashMap<String, ObjectId> = graph.reachable().into_iter().collect();
        let location = self.backend.location().unwrap_or_default().to_string();
        for (source, link) in pending {
            let target = match by_path.get(&link.target_path) {
                Some(target) => LinkTarget::Local(*target),
                None => {
                    warn!(
                        "Link {} of {} points at {}, which holds no instance",
                        link.field,
                        graph.display_path(source),
                        link.target_path
                    );
                    LinkTarget::External {
                        location: location.clone(),
                        path: link.target_path,
                    }
                }
            };
            graph
                .instance_mut(source)?
                .fields
                .insert(link.field, FieldValue::Link(target));
        }
        Ok(())
    }
}

/// Check every region read against the table it selects rows of
fn check_regions(graph: &ObjectGraph) -> SessionResult<()> {
    for (path, id) in graph.reachable() {
        let instance = graph.instance(id)?;
        let mut regions: Vec<(String, &RegionRefs)> = instance
            .fields
            .iter()
            .filter_map(|(key, value)| match value {
                FieldValue::Region(region) => Some((join_path(&path, key), region)),
                _ => None,
            })
            .collect();
        if let Some(FieldValue::Region(region)) = &instance.data {
            regions.push((path.clone(), region));
        }
        for (at, region) in regions {
            check_region(graph, &at, region)?;
        }
    }
    Ok(())
}

fn check_region(graph: &ObjectGraph, path: &str, region: &RegionRefs) -> SessionResult<()> {
    let malformed = |reason: String| MappingError::MalformedTable {
        path: path.to_string(),
        reason,
    };
    let rows = ColumnarTable::wrap(graph, region.table)
        .and_then(|table| table.row_count(graph))
        .map_err(|e| malformed(e.to_string()))?;
    if let Some((start, end)) = region.first_out_of_bounds(rows) {
        return Err(malformed(format!(
            "rows {}..{} outside '{}' with {} rows",
            start,
            end,
            graph.display_path(region.table),
            rows
        ))
        .into());
    }
    Ok(())
}
