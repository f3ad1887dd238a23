//! Namespaces cached inside containers
//!
//! A write stores every namespace the graph uses, with its dependencies, at
//! `/specifications/<name>/<version>/namespace` as a text dataset. Opening
//! a container loads them back into the session catalog in dependency order.

use super::error::SessionResult;
use crate::mapping::{SPECIFICATIONS_GROUP, scalar_array};
use crate::models::{ObjectGraph, Scalar};
use crate::spec::{Namespace, NamespaceHandle, SchemaError, TypeCatalog};
use crate::storage::{ContainerBackend, join_path, with_retry};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

const DOCUMENT_DATASET: &str = "namespace";

/// Namespaces the reachable instances of a graph are typed in, dependencies first
pub fn used_namespaces(graph: &ObjectGraph) -> Vec<Arc<Namespace>> {
    let names: BTreeSet<String> = graph
        .reachable()
        .into_iter()
        .filter_map(|(_, id)| graph.get(id).map(|i| i.type_key.namespace.clone()))
        .collect();
    let names: Vec<String> = names.into_iter().collect();
    graph.catalog().namespace_closure(&names)
}

/// Store the namespaces used by `graph` in the staged container of `dest`
pub async fn cache_namespaces<D>(
    dest: &mut D,
    graph: &ObjectGraph,
) -> SessionResult<Vec<NamespaceHandle>>
where
    D: ContainerBackend + ?Sized,
{
    let namespaces = used_namespaces(graph);
    let root = join_path("/", SPECIFICATIONS_GROUP);
    dest.create_group(&root).await?;

    let mut handles = Vec::with_capacity(namespaces.len());
    for namespace in &namespaces {
        let group = join_path(&root, &namespace.name);
        dest.create_group(&group).await?;
        let version = join_path(&group, &namespace.version.to_string());
        dest.create_group(&version).await?;
        let document = scalar_array(&Scalar::Text(namespace.source.clone()));
        dest.create_dataset(&join_path(&version, DOCUMENT_DATASET), &document)
            .await?;
        handles.push(namespace.handle());
    }
    Ok(handles)
}

/// Load the namespaces cached in the opened container into `catalog`
///
/// Namespaces already loaded with identical content are skipped; a cached
/// version that conflicts with a loaded one is skipped with a warning.
pub async fn load_cached_namespaces<B>(
    backend: &B,
    catalog: &mut TypeCatalog,
    retries: u32,
) -> SessionResult<Vec<NamespaceHandle>>
where
    B: ContainerBackend + ?Sized,
{
    let roots = with_retry(retries, "/", || backend.list_children("/")).await?;
    if !roots.iter().any(|n| n == SPECIFICATIONS_GROUP) {
        return Ok(Vec::new());
    }
    let root = join_path("/", SPECIFICATIONS_GROUP);

    let mut documents = Vec::new();
    for name in with_retry(retries, &root, || backend.list_children(&root)).await? {
        let group = join_path(&root, &name);
        for version in with_retry(retries, &group, || backend.list_children(&group)).await? {
            let path = join_path(&join_path(&group, &version), DOCUMENT_DATASET);
            let data = with_retry(retries, &path, || backend.read_dataset(&path, None)).await?;
            let text = data
                .scalar_at(0)
                .and_then(|s| s.as_text().map(str::to_string))
                .ok_or_else(|| {
                    SchemaError::Parse(format!("cached namespace {} is not text", path))
                })?;
            documents.push((Namespace::parse(&text)?, text));
        }
    }

    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..documents.len()).map(|i| graph.add_node(i)).collect();
    let by_name: HashMap<&str, Vec<usize>> =
        documents
            .iter()
            .enumerate()
            .fold(HashMap::new(), |mut acc, (i, (ns, _))| {
                acc.entry(ns.name.as_str()).or_default().push(i);
                acc
            });
    for (i, (namespace, _)) in documents.iter().enumerate() {
        for dependency in &namespace.dependencies {
            for j in by_name.get(dependency.name.as_str()).into_iter().flatten() {
                graph.add_edge(nodes[*j], nodes[i], ());
            }
        }
    }
    let order = toposort(&graph, None).map_err(|cycle| {
        let (namespace, _) = &documents[graph[cycle.node_id()]];
        SchemaError::UnresolvedDependency {
            namespace: namespace.name.clone(),
            dependency: namespace.name.clone(),
            required: namespace.version.to_string(),
            detail: "cached namespaces depend on each other in a cycle".to_string(),
        }
    })?;

    let mut loaded = Vec::new();
    for node in order {
        let (namespace, text) = &documents[graph[node]];
        match catalog.load_namespace(text) {
            Ok(handle) => loaded.push(handle),
            Err(SchemaError::ImmutableVersion { .. }) => warn!(
                "Cached namespace {} differs from the loaded one; keeping the loaded version",
                namespace.handle()
            ),
            Err(e) => return Err(e.into()),
        }
    }
    info!("Loaded {} cached namespace(s)", loaded.len());
    Ok(loaded)
}
