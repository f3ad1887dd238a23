//! Object mapper
//!
//! Translates one instance to one container subtree and back. Every typed
//! node carries `neurodata_type`, `namespace` and `object_id` attributes;
//! untyped nodes belong to the typed node above them.

use super::error::{MappingError, MappingResult};
use crate::config::IoConfig;
use crate::models::{
    ArrayData, ArrayValues, DATA_FIELD, DatasetHandle, FieldValue, LinkTarget, ObjectError,
    ObjectGraph, ObjectId, ObjectInstance, Origin, ROOT_NAME, RaggedArray, RegionRefs, Scalar,
};
use crate::spec::{
    DType, FieldKind, ResolvedField, ResolvedType, SpecKind, TypeCatalog, TypeKey,
    TypeResolutionError,
};
use crate::storage::{
    AttributeValue, ContainerBackend, DatasetInfo, NodeKind, join_path, with_retry,
};
use chrono::DateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

pub const TYPE_ATTRIBUTE: &str = "neurodata_type";
pub const NAMESPACE_ATTRIBUTE: &str = "namespace";
pub const OBJECT_ID_ATTRIBUTE: &str = "object_id";
/// Attribute of an offsets dataset naming the data dataset it indexes
pub const TARGET_ATTRIBUTE: &str = "target";
/// Attributes of a region dataset naming the referenced table
pub const TABLE_ATTRIBUTE: &str = "table";
pub const TABLE_ID_ATTRIBUTE: &str = "table_object_id";
/// Root group holding cached namespaces
pub const SPECIFICATIONS_GROUP: &str = "specifications";

const INDEX_SUFFIX: &str = "_index";
const EXTERNAL_SEPARATOR: &str = "::";

/// Path of the offsets dataset that indexes `path`
pub fn index_path(path: &str) -> String {
    format!("{}{}", path, INDEX_SUFFIX)
}

/// Stored form of a link into another container
pub fn external_link(location: &str, path: &str) -> String {
    format!("{}{}{}", location, EXTERNAL_SEPARATOR, path)
}

/// Split a stored link into an external `(location, path)`, if it is one
pub fn parse_external_link(target: &str) -> Option<(&str, &str)> {
    target.split_once(EXTERNAL_SEPARATOR)
}

/// A typed child found while reading a node
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRef {
    /// Field of the parent holding the child
    pub field: String,
    pub path: String,
    /// Offsets dataset when the child is a ragged column
    pub index: Option<String>,
}

/// A local link read from a node, resolved once the whole tree is known
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    pub field: String,
    pub target_path: String,
}

/// One instance read from a container
#[derive(Debug, Clone)]
pub struct ReadNode {
    pub instance: ObjectInstance,
    pub children: Vec<ChildRef>,
    pub links: Vec<PendingLink>,
}

/// Translates instances to container nodes and back using a type catalog
pub struct ObjectMapper<'a> {
    catalog: &'a TypeCatalog,
    config: &'a IoConfig,
}

impl<'a> ObjectMapper<'a> {
    pub fn new(catalog: &'a TypeCatalog, config: &'a IoConfig) -> Self {
        Self { catalog, config }
    }

    // Writing

    /// Write one instance at `path` into the staged container of `dest`
    ///
    /// Lazy handles are copied from `source`, or from the container opened
    /// in `dest` when no source is given. Returns the typed children (id and
    /// path) for the caller to write next.
    pub async fn write_instance<D, S>(
        &self,
        graph: &ObjectGraph,
        id: ObjectId,
        path: &str,
        dest: &mut D,
        source: Option<&S>,
    ) -> MappingResult<Vec<(ObjectId, String)>>
    where
        D: ContainerBackend + ?Sized,
        S: ContainerBackend + ?Sized,
    {
        let instance = graph.instance(id)?;
        let resolved = self.catalog.get(&instance.type_key)?;
        debug!("Writing {} as {}", path, resolved.key);

        match resolved.kind {
            SpecKind::Dataset => {
                let payload = instance.data.as_ref().ok_or_else(|| {
                    MappingError::Object(ObjectError::MissingRequiredField {
                        path: path.to_string(),
                        field: DATA_FIELD.to_string(),
                    })
                })?;
                self.write_payload(graph, path, payload, dest, source).await?;
            }
            SpecKind::Group => {
                if path != "/" {
                    dest.create_group(path).await?;
                }
            }
        }
        self.write_identity(dest, path, &instance.type_key, id).await?;

        let mut fields: Vec<&ResolvedField> = resolved
            .fields
            .iter()
            .filter(|f| instance.fields.contains_key(f.key()))
            .collect();
        fields.sort_by_key(|f| f.kind().write_rank());

        let mut children = Vec::new();
        for field in fields {
            let Some(value) = instance.fields.get(field.key()) else {
                continue;
            };
            match field.kind() {
                _ if field.spec.holds_children() => {
                    for child in value.child_ids() {
                        let child_inst = graph.instance(child)?;
                        children.push((child, join_path(path, &child_inst.name)));
                    }
                }
                FieldKind::Attribute => {
                    let attribute = match value {
                        FieldValue::Scalar(s) => AttributeValue::Scalar(s.clone()),
                        FieldValue::Array(a) => AttributeValue::Array(a.clone()),
                        other => return Err(self.unexpected(path, field.key(), other)),
                    };
                    dest.create_attribute(path, field.key(), &attribute).await?;
                }
                FieldKind::Dataset | FieldKind::IndexedColumn => {
                    let target = join_path(path, field.key());
                    self.write_payload(graph, &target, value, dest, source).await?;
                }
                FieldKind::Link => {
                    let target = match value {
                        FieldValue::Link(LinkTarget::Local(target)) => {
                            graph.path_of(*target).ok_or_else(|| MappingError::DanglingLink {
                                source_path: path.to_string(),
                                field: field.key().to_string(),
                            })?
                        }
                        FieldValue::Link(LinkTarget::External {
                            location,
                            path: target_path,
                        }) => external_link(location, target_path),
                        other => return Err(self.unexpected(path, field.key(), other)),
                    };
                    dest.create_link(&join_path(path, field.key()), &target).await?;
                }
                FieldKind::Group => {}
            }
        }
        Ok(children)
    }

    /// Write the identity attributes of a typed node
    pub async fn write_identity<D>(
        &self,
        dest: &mut D,
        path: &str,
        type_key: &TypeKey,
        id: ObjectId,
    ) -> MappingResult<()>
    where
        D: ContainerBackend + ?Sized,
    {
        dest.create_attribute(path, TYPE_ATTRIBUTE, &type_key.name.as_str().into())
            .await?;
        dest.create_attribute(path, NAMESPACE_ATTRIBUTE, &type_key.namespace.as_str().into())
            .await?;
        dest.create_attribute(path, OBJECT_ID_ATTRIBUTE, &id.to_string().as_str().into())
            .await?;
        Ok(())
    }

    fn unexpected(&self, path: &str, field: &str, value: &FieldValue) -> MappingError {
        MappingError::Object(ObjectError::TypeMismatch {
            path: path.to_string(),
            field: field.to_string(),
            expected: "a storable value".to_string(),
            actual: value.describe().to_string(),
        })
    }

    /// Write a data-carrying value as a dataset at `path`
    async fn write_payload<D, S>(
        &self,
        graph: &ObjectGraph,
        path: &str,
        value: &FieldValue,
        dest: &mut D,
        source: Option<&S>,
    ) -> MappingResult<()>
    where
        D: ContainerBackend + ?Sized,
        S: ContainerBackend + ?Sized,
    {
        match value {
            FieldValue::Scalar(s) => {
                dest.create_dataset(path, &scalar_array(s)).await?;
            }
            FieldValue::Array(a) => self.write_array(dest, path, a).await?,
            FieldValue::Dataset(handle) => self.copy_handle(dest, source, path, handle).await?,
            FieldValue::Stream(stream) => {
                let mut chunks = stream.take().ok_or_else(|| MappingError::StreamConsumed {
                    path: path.to_string(),
                })?;
                let dtype = stream.dtype();
                dest.begin_dataset_stream(path, dtype, stream.inner_shape())
                    .await?;
                while let Some(next) = chunks.next_chunk() {
                    let chunk = next
                        .and_then(|c| if c.dtype == dtype { Ok(c) } else { c.cast(dtype) })
                        .map_err(|e| MappingError::StreamAborted {
                            path: path.to_string(),
                            reason: e.to_string(),
                        })?;
                    dest.append_chunk(path, &chunk).await?;
                }
                dest.finish_dataset_stream(path).await?;
            }
            FieldValue::Ragged(ragged) => {
                ragged.check().map_err(|e| MappingError::MalformedTable {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
                self.write_array(dest, path, &ragged.data).await?;
                let index = index_path(path);
                self.write_array(dest, &index, &ArrayData::from_u64(ragged.offsets.clone()))
                    .await?;
                let name = path.rsplit('/').next().unwrap_or(path);
                dest.create_attribute(&index, TARGET_ATTRIBUTE, &name.into())
                    .await?;
            }
            FieldValue::Region(region) => {
                let table_path =
                    graph
                        .path_of(region.table)
                        .ok_or_else(|| MappingError::DanglingLink {
                            source_path: path.to_string(),
                            field: TABLE_ATTRIBUTE.to_string(),
                        })?;
                dest.create_dataset(path, &region_array(region)?).await?;
                dest.create_attribute(path, TABLE_ATTRIBUTE, &table_path.as_str().into())
                    .await?;
                dest.create_attribute(
                    path,
                    TABLE_ID_ATTRIBUTE,
                    &region.table.to_string().as_str().into(),
                )
                .await?;
            }
            other => return Err(self.unexpected(path, DATA_FIELD, other)),
        }
        Ok(())
    }

    /// Write an in-memory array, in chunks of `chunk_rows` rows
    async fn write_array<D>(&self, dest: &mut D, path: &str, data: &ArrayData) -> MappingResult<()>
    where
        D: ContainerBackend + ?Sized,
    {
        let chunk_rows = self.config.chunk_rows.max(1);
        if data.shape.is_empty() || data.rows() <= chunk_rows {
            dest.create_dataset(path, data).await?;
            return Ok(());
        }
        dest.begin_dataset_stream(path, data.dtype, data.inner_shape())
            .await?;
        let mut start = 0;
        while start < data.rows() {
            let end = (start + chunk_rows).min(data.rows());
            dest.append_chunk(path, &data.slice_rows(start..end)?).await?;
            start = end;
        }
        dest.finish_dataset_stream(path).await?;
        Ok(())
    }

    /// Copy a stored dataset chunk by chunk into `path`
    async fn copy_handle<D, S>(
        &self,
        dest: &mut D,
        source: Option<&S>,
        path: &str,
        handle: &DatasetHandle,
    ) -> MappingResult<()>
    where
        D: ContainerBackend + ?Sized,
        S: ContainerBackend + ?Sized,
    {
        let source_location = match source {
            Some(s) => s.location(),
            None => dest.location(),
        };
        if source_location != Some(handle.location.as_str()) {
            return Err(MappingError::ForeignHandle {
                location: handle.location.clone(),
                path: handle.path.clone(),
            });
        }

        let info = match source {
            Some(s) => self.read_info(s, &handle.path).await?,
            None => self.read_info(&*dest, &handle.path).await?,
        };
        if info.shape.is_empty() {
            let chunk = self.source_chunk(&*dest, source, &handle.path, 0).await?;
            dest.create_dataset(path, &chunk).await?;
            return Ok(());
        }
        dest.begin_dataset_stream(path, info.dtype, &info.shape[1..])
            .await?;
        for index in 0..info.chunks() {
            let chunk = self.source_chunk(&*dest, source, &handle.path, index).await?;
            dest.append_chunk(path, &chunk).await?;
        }
        dest.finish_dataset_stream(path).await?;
        Ok(())
    }

    async fn source_chunk<D, S>(
        &self,
        dest: &D,
        source: Option<&S>,
        path: &str,
        index: usize,
    ) -> MappingResult<ArrayData>
    where
        D: ContainerBackend + ?Sized,
        S: ContainerBackend + ?Sized,
    {
        let retries = self.config.read_retries;
        let chunk = match source {
            Some(s) => with_retry(retries, path, || s.read_chunk(path, index)).await?,
            None => with_retry(retries, path, || dest.read_chunk(path, index)).await?,
        };
        Ok(chunk)
    }

    // Reading

    async fn read_info<B>(&self, backend: &B, path: &str) -> MappingResult<DatasetInfo>
    where
        B: ContainerBackend + ?Sized,
    {
        Ok(with_retry(self.config.read_retries, path, || backend.read_dataset_info(path)).await?)
    }

    async fn read_attributes<B>(
        &self,
        backend: &B,
        path: &str,
    ) -> MappingResult<BTreeMap<String, AttributeValue>>
    where
        B: ContainerBackend + ?Sized,
    {
        Ok(with_retry(self.config.read_retries, path, || backend.read_attributes(path)).await?)
    }

    async fn read_array<B>(&self, backend: &B, path: &str) -> MappingResult<ArrayData>
    where
        B: ContainerBackend + ?Sized,
    {
        Ok(with_retry(self.config.read_retries, path, || backend.read_dataset(path, None)).await?)
    }

    /// Resolve the type recorded on a node
    ///
    /// The recorded namespace is searched first; when it is not loaded the
    /// name is resolved across every loaded namespace.
    pub fn resolve_node_type(
        &self,
        path: &str,
        attributes: &BTreeMap<String, AttributeValue>,
    ) -> MappingResult<Arc<ResolvedType>> {
        let type_name = text_attribute(path, attributes, TYPE_ATTRIBUTE)?;
        let namespace = text_attribute(path, attributes, NAMESPACE_ATTRIBUTE)?;
        let resolved = match self.catalog.resolve_type(&namespace, &type_name) {
            Err(TypeResolutionError::UnknownNamespace(_)) => {
                self.catalog.resolve_unqualified(&type_name)
            }
            other => other,
        };
        resolved.map_err(|e| MappingError::UnresolvedType {
            path: path.to_string(),
            namespace,
            type_name,
            reason: e.to_string(),
        })
    }

    /// Read the typed node at `path`
    ///
    /// `expected` is the parent field the node was found in; `index` the
    /// offsets dataset paired with it when it is a ragged column.
    pub async fn read_instance<B>(
        &self,
        backend: &B,
        path: &str,
        expected: Option<&ResolvedField>,
        index: Option<&str>,
    ) -> MappingResult<ReadNode>
    where
        B: ContainerBackend + ?Sized,
    {
        let attributes = self.read_attributes(backend, path).await?;
        let resolved = self.resolve_node_type(path, &attributes)?;
        if let Some(field) = expected
            && let Some(target) = &field.target
            && !resolved.is_a(target)
        {
            return Err(MappingError::IncompatibleType {
                path: path.to_string(),
                field: field.key().to_string(),
                expected: target.clone(),
                actual: resolved.key.clone(),
            });
        }
        let id_text = text_attribute(path, &attributes, OBJECT_ID_ATTRIBUTE)?;
        let id = ObjectId::parse(&id_text).ok_or_else(|| MappingError::InvalidAttribute {
            path: path.to_string(),
            attribute: OBJECT_ID_ATTRIBUTE.to_string(),
            reason: format!("'{}' is not a UUID", id_text),
        })?;
        debug!("Reading {} as {}", path, resolved.key);

        let name = if path == "/" {
            ROOT_NAME.to_string()
        } else {
            path.rsplit('/').next().unwrap_or(path).to_string()
        };
        let mut instance = ObjectInstance::new(resolved.key.clone(), name);
        instance.id = id;
        instance.modified = false;
        instance.origin = Some(Origin {
            location: backend.location().unwrap_or_default().to_string(),
            path: path.to_string(),
        });

        let mut skipped: BTreeSet<&str> =
            [TYPE_ATTRIBUTE, NAMESPACE_ATTRIBUTE, OBJECT_ID_ATTRIBUTE].into();
        if resolved.kind == SpecKind::Dataset {
            let payload = self
                .read_payload(backend, path, &attributes, index)
                .await?;
            if matches!(payload, FieldValue::Region(_)) {
                skipped.insert(TABLE_ATTRIBUTE);
                skipped.insert(TABLE_ID_ATTRIBUTE);
            }
            instance.data = Some(payload);
        }

        for (key, value) in &attributes {
            if skipped.contains(key.as_str()) {
                continue;
            }
            match resolved.field(key) {
                Some(field) if field.kind() == FieldKind::Attribute => {
                    let value = match value {
                        AttributeValue::Scalar(s) => FieldValue::Scalar(restore_scalar(s, field)),
                        AttributeValue::Array(a) => FieldValue::Array(a.clone()),
                    };
                    instance.fields.insert(key.clone(), value);
                }
                _ => debug!("Ignoring undeclared attribute '{}' at {}", key, path),
            }
        }

        let mut node = ReadNode {
            instance,
            children: Vec::new(),
            links: Vec::new(),
        };
        if resolved.kind == SpecKind::Group {
            self.read_members(backend, path, &resolved, &mut node).await?;
        }
        Ok(node)
    }

    /// Read the sub-nodes of a group: typed children, datasets and links
    async fn read_members<B>(
        &self,
        backend: &B,
        path: &str,
        resolved: &ResolvedType,
        node: &mut ReadNode,
    ) -> MappingResult<()>
    where
        B: ContainerBackend + ?Sized,
    {
        let names =
            with_retry(self.config.read_retries, path, || backend.list_children(path)).await?;
        let mut kinds = BTreeMap::new();
        let mut attributes = BTreeMap::new();
        for name in &names {
            if path == "/" && name == SPECIFICATIONS_GROUP {
                continue;
            }
            let child_path = join_path(path, name);
            let kind =
                with_retry(self.config.read_retries, &child_path, || backend.node_kind(&child_path))
                    .await?;
            if kind != NodeKind::Link {
                attributes.insert(name.clone(), self.read_attributes(backend, &child_path).await?);
            }
            kinds.insert(name.clone(), kind);
        }

        // Offsets datasets, keyed by the dataset they index
        let mut indexes: BTreeMap<String, String> = BTreeMap::new();
        for (name, attrs) in &attributes {
            if kinds.get(name) == Some(&NodeKind::Dataset)
                && !attrs.contains_key(TYPE_ATTRIBUTE)
                && let Some(target) = attrs.get(TARGET_ATTRIBUTE).and_then(|a| a.as_text())
                && index_path(target) == *name
                && kinds.contains_key(target)
            {
                indexes.insert(target.to_string(), name.clone());
            }
        }

        for (name, kind) in &kinds {
            let child_path = join_path(path, name);
            if indexes.values().any(|i| i == name) {
                continue;
            }
            if *kind == NodeKind::Link {
                self.read_link_member(backend, &child_path, name, resolved, node)
                    .await?;
                continue;
            }
            let attrs = &attributes[name];
            if attrs.contains_key(TYPE_ATTRIBUTE) {
                let child_type = self.resolve_node_type(&child_path, attrs)?;
                match child_field(resolved, name, &child_type) {
                    Ok(field) => node.children.push(ChildRef {
                        field: field.key().to_string(),
                        path: child_path.clone(),
                        index: indexes.get(name).map(|i| join_path(path, i)),
                    }),
                    Err(Some(field)) => {
                        return Err(MappingError::IncompatibleType {
                            path: child_path,
                            field: field.key().to_string(),
                            expected: field.target.clone().unwrap_or_else(|| resolved.key.clone()),
                            actual: child_type.key.clone(),
                        });
                    }
                    Err(None) => warn!(
                        "Skipping {} at {}: no field of {} holds it",
                        child_type.key, child_path, resolved.key
                    ),
                }
                continue;
            }

            match (kind, resolved.field(name)) {
                (NodeKind::Dataset, Some(field))
                    if matches!(field.kind(), FieldKind::Dataset | FieldKind::IndexedColumn)
                        && !field.spec.holds_children() =>
                {
                    let index = indexes.get(name).map(|i| join_path(path, i));
                    let value = self
                        .read_payload(backend, &child_path, attrs, index.as_deref())
                        .await?;
                    node.instance.fields.insert(name.clone(), value);
                }
                _ => debug!("Ignoring undeclared node {}", child_path),
            }
        }
        Ok(())
    }

    async fn read_link_member<B>(
        &self,
        backend: &B,
        path: &str,
        name: &str,
        resolved: &ResolvedType,
        node: &mut ReadNode,
    ) -> MappingResult<()>
    where
        B: ContainerBackend + ?Sized,
    {
        if !resolved
            .field(name)
            .is_some_and(|f| f.kind() == FieldKind::Link)
        {
            debug!("Ignoring undeclared link {}", path);
            return Ok(());
        }
        let target = with_retry(self.config.read_retries, path, || backend.read_link(path)).await?;
        match parse_external_link(&target) {
            Some((location, target_path)) => {
                node.instance.fields.insert(
                    name.to_string(),
                    FieldValue::Link(LinkTarget::External {
                        location: location.to_string(),
                        path: target_path.to_string(),
                    }),
                );
            }
            None => node.links.push(PendingLink {
                field: name.to_string(),
                target_path: target,
            }),
        }
        Ok(())
    }

    /// Read a dataset as a field value
    ///
    /// Ragged and region data are read eagerly and checked; rank-0 datasets
    /// become scalars; everything else becomes a lazy handle.
    async fn read_payload<B>(
        &self,
        backend: &B,
        path: &str,
        attributes: &BTreeMap<String, AttributeValue>,
        index: Option<&str>,
    ) -> MappingResult<FieldValue>
    where
        B: ContainerBackend + ?Sized,
    {
        let malformed = |reason: String| MappingError::MalformedTable {
            path: path.to_string(),
            reason,
        };

        if let Some(index) = index {
            let data = self.read_array(backend, path).await?;
            let offsets = self
                .read_array(backend, index)
                .await?
                .to_u64_vec()
                .ok_or_else(|| malformed(format!("offsets {} are not unsigned integers", index)))?;
            let ragged = RaggedArray::new(data, offsets).map_err(|e| malformed(e.to_string()))?;
            return Ok(FieldValue::Ragged(ragged));
        }

        if let Some(table_id) = attributes.get(TABLE_ID_ATTRIBUTE) {
            let table = table_id
                .as_text()
                .and_then(ObjectId::parse)
                .ok_or_else(|| malformed("region table id is not a UUID".to_string()))?;
            let data = self.read_array(backend, path).await?;
            let flat = data
                .to_u64_vec()
                .filter(|_| data.shape.len() == 2 && data.shape[1] == 2)
                .ok_or_else(|| {
                    malformed(format!("region data has shape {:?}, expected [n, 2]", data.shape))
                })?;
            let ranges = flat.chunks(2).map(|pair| (pair[0], pair[1])).collect();
            return Ok(FieldValue::Region(RegionRefs::new(table, ranges)));
        }

        let info = self.read_info(backend, path).await?;
        if info.shape.is_empty() {
            let data = self.read_array(backend, path).await?;
            let scalar = data
                .scalar_at(0)
                .ok_or_else(|| malformed("scalar dataset holds no value".to_string()))?;
            return Ok(FieldValue::Scalar(restore_datetime(scalar, data.dtype)));
        }
        Ok(FieldValue::Dataset(DatasetHandle {
            location: backend.location().unwrap_or_default().to_string(),
            path: path.to_string(),
            dtype: info.dtype,
            shape: info.shape.clone(),
            chunks: info.chunks(),
        }))
    }
}

/// The field of `parent` a typed child node belongs to
///
/// `Err(Some(field))` when the node's name matches a named field its type
/// does not satisfy; `Err(None)` when no field fits at all.
fn child_field<'t>(
    parent: &'t ResolvedType,
    name: &str,
    child: &ResolvedType,
) -> Result<&'t ResolvedField, Option<&'t ResolvedField>> {
    if let Some(named) = parent
        .fields
        .iter()
        .find(|f| f.spec.name.as_deref() == Some(name) && f.spec.holds_children())
    {
        return match &named.target {
            Some(target) if child.is_a(target) => Ok(named),
            _ => Err(Some(named)),
        };
    }
    parent
        .fields
        .iter()
        .filter(|f| !f.spec.is_named() && f.spec.holds_children())
        .filter_map(|f| {
            f.target
                .as_ref()
                .and_then(|t| child.distance_to(t))
                .map(|d| (d, f))
        })
        .min_by_key(|(d, _)| *d)
        .map(|(_, f)| f)
        .ok_or(None)
}

fn text_attribute(
    path: &str,
    attributes: &BTreeMap<String, AttributeValue>,
    name: &str,
) -> MappingResult<String> {
    match attributes.get(name) {
        Some(value) => value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| MappingError::InvalidAttribute {
                path: path.to_string(),
                attribute: name.to_string(),
                reason: "expected text".to_string(),
            }),
        None => Err(MappingError::MissingTypeAttribute {
            path: path.to_string(),
            attribute: name.to_string(),
        }),
    }
}

/// Rank-0 array holding one scalar
pub fn scalar_array(value: &Scalar) -> ArrayData {
    let (dtype, values) = match value {
        Scalar::Int(v) => (DType::Int64, ArrayValues::Int(vec![*v])),
        Scalar::UInt(v) => (DType::Uint64, ArrayValues::UInt(vec![*v])),
        Scalar::Float(v) => (DType::Float64, ArrayValues::Float(vec![*v])),
        Scalar::Bool(v) => (DType::Bool, ArrayValues::Bool(vec![*v])),
        Scalar::Text(v) => (DType::Text, ArrayValues::Text(vec![v.clone()])),
        Scalar::DateTime(v) => (DType::Isodatetime, ArrayValues::Text(vec![v.to_rfc3339()])),
    };
    ArrayData {
        dtype,
        shape: Vec::new(),
        values,
    }
}

/// `[n, 2]` array of row ranges
fn region_array(region: &RegionRefs) -> MappingResult<ArrayData> {
    let flat: Vec<u64> = region.ranges.iter().flat_map(|(s, e)| [*s, *e]).collect();
    Ok(ArrayData::from_u64(flat).reshape(vec![region.len(), 2])?)
}

fn restore_datetime(value: Scalar, dtype: DType) -> Scalar {
    match value {
        Scalar::Text(text) if dtype == DType::Isodatetime => match DateTime::parse_from_rfc3339(&text) {
            Ok(parsed) => Scalar::DateTime(parsed),
            Err(_) => Scalar::Text(text),
        },
        other => other,
    }
}

fn restore_scalar(value: &Scalar, field: &ResolvedField) -> Scalar {
    match field.spec.dtype {
        Some(dtype) => restore_datetime(value.clone(), dtype),
        None => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnarTable, StreamSource};
    use crate::spec::{core_catalog, core_type};
    use crate::storage::{AccessMode, MemoryContainerBackend, MemoryStore};

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    async fn write_all(
        mapper: &ObjectMapper<'_>,
        graph: &ObjectGraph,
        backend: &mut MemoryContainerBackend,
    ) -> MappingResult<()> {
        let mut stack = vec![(graph.root(), "/".to_string())];
        while let Some((id, path)) = stack.pop() {
            let children = mapper
                .write_instance(graph, id, &path, backend, None::<&MemoryContainerBackend>)
                .await?;
            stack.extend(children);
        }
        Ok(())
    }

    #[test]
    fn test_ragged_column_layout() {
        let catalog = Arc::new(core_catalog());
        let config = IoConfig::default();
        let mapper = ObjectMapper::new(&catalog, &config);
        let mut graph = ObjectGraph::new(catalog.clone(), &core_type("NWBFile")).unwrap();
        let root = graph.root();
        let table = ColumnarTable::create(&mut graph, root, "events", "events", 3).unwrap();
        table
            .add_ragged_column(
                &mut graph,
                "times",
                "event times",
                RaggedArray::from_f64_rows(vec![vec![0.1, 0.2], vec![], vec![1.0, 1.5, 2.0]])
                    .unwrap(),
            )
            .unwrap();

        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("a.nwb").await.unwrap();
            write_all(&mapper, &graph, &mut backend).await.unwrap();
            backend.commit().await.unwrap();

            let container = store.snapshot("a.nwb").unwrap();
            let index = container.node("/events/times_index").unwrap();
            assert_eq!(
                index.attributes.get(TARGET_ATTRIBUTE).and_then(|a| a.as_text()),
                Some("times")
            );
            assert_eq!(index.chunks[0].to_u64_vec(), Some(vec![2, 2, 5]));
            assert!(container.node("/events/times").unwrap().attributes.contains_key(OBJECT_ID_ATTRIBUTE));

            backend.open("a.nwb", AccessMode::ReadOnly).await.unwrap();
            let node = mapper
                .read_instance(&backend, "/events", None, None)
                .await
                .unwrap();
            let column = node.children.iter().find(|c| c.path == "/events/times").unwrap();
            assert_eq!(column.index.as_deref(), Some("/events/times_index"));
            assert_eq!(column.field, "VectorData");

            let read = mapper
                .read_instance(&backend, &column.path, None, column.index.as_deref())
                .await
                .unwrap();
            match read.instance.data {
                Some(FieldValue::Ragged(r)) => assert_eq!(r.offsets, vec![2, 2, 5]),
                other => panic!("expected ragged payload, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_malformed_offsets_rejected_on_read() {
        let catalog = core_catalog();
        let config = IoConfig::default();
        let mapper = ObjectMapper::new(&catalog, &config);
        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("bad.nwb").await.unwrap();
            backend
                .create_dataset("/times", &ArrayData::from_f64(vec![0.0; 4]))
                .await
                .unwrap();
            mapper
                .write_identity(&mut backend, "/times", &core_type("VectorData"), ObjectId::new())
                .await
                .unwrap();
            backend
                .create_dataset("/times_index", &ArrayData::from_u64(vec![3, 2, 4]))
                .await
                .unwrap();
            backend.commit().await.unwrap();
            backend.open("bad.nwb", AccessMode::ReadOnly).await.unwrap();

            let result = mapper
                .read_instance(&backend, "/times", None, Some("/times_index"))
                .await;
            assert!(matches!(result, Err(MappingError::MalformedTable { .. })));
        });
    }

    #[test]
    fn test_stream_consumed_once() {
        let catalog = Arc::new(core_catalog());
        let config = IoConfig::default();
        let mapper = ObjectMapper::new(&catalog, &config);
        let mut graph = ObjectGraph::new(catalog.clone(), &core_type("NWBFile")).unwrap();
        let root = graph.root();
        let series = graph
            .create_instance(&core_type("TimeSeries"), "raw", Some(root))
            .unwrap();
        let stream = StreamSource::from_chunks(
            DType::Float64,
            vec![],
            vec![ArrayData::from_f64(vec![1.0, 2.0]), ArrayData::from_f64(vec![3.0])],
        );
        graph
            .set_field(series, "data", FieldValue::Stream(stream))
            .unwrap();

        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("a.nwb").await.unwrap();
            write_all(&mapper, &graph, &mut backend).await.unwrap();
            backend.commit().await.unwrap();
            let container = store.snapshot("a.nwb").unwrap();
            let data = container.node("/raw/data").unwrap();
            assert_eq!(data.dataset.as_ref().unwrap().shape, vec![3]);

            backend.create("b.nwb").await.unwrap();
            assert!(matches!(
                write_all(&mapper, &graph, &mut backend).await,
                Err(MappingError::StreamConsumed { .. })
            ));
        });
    }

    #[test]
    fn test_failing_stream_aborts() {
        let catalog = Arc::new(core_catalog());
        let config = IoConfig::default();
        let mapper = ObjectMapper::new(&catalog, &config);
        let mut graph = ObjectGraph::new(catalog.clone(), &core_type("NWBFile")).unwrap();
        let root = graph.root();
        let series = graph
            .create_instance(&core_type("TimeSeries"), "raw", Some(root))
            .unwrap();
        let stream = StreamSource::from_results(
            DType::Float64,
            vec![],
            vec![
                Ok(ArrayData::from_f64(vec![1.0])),
                Err(ObjectError::Source("sensor unplugged".to_string())),
            ],
        );
        graph
            .set_field(series, "data", FieldValue::Stream(stream))
            .unwrap();

        block_on(async {
            let store = MemoryStore::new();
            let mut backend = store.backend();
            backend.create("a.nwb").await.unwrap();
            let result = write_all(&mapper, &graph, &mut backend).await;
            assert!(matches!(result, Err(MappingError::StreamAborted { .. })));
            assert!(matches!(
                backend.commit().await,
                Err(crate::storage::StorageError::IncompleteDataset(p)) if p == "/raw/data"
            ));
        });
    }

    #[test]
    fn test_unknown_namespace_falls_back_to_any() {
        let catalog = core_catalog();
        let config = IoConfig::default();
        let mapper = ObjectMapper::new(&catalog, &config);
        let mut attributes = BTreeMap::new();
        attributes.insert(TYPE_ATTRIBUTE.to_string(), AttributeValue::from("Device"));
        attributes.insert(NAMESPACE_ATTRIBUTE.to_string(), AttributeValue::from("legacy"));
        let resolved = mapper.resolve_node_type("/dev", &attributes).unwrap();
        assert_eq!(resolved.key, core_type("Device"));

        attributes.insert(TYPE_ATTRIBUTE.to_string(), AttributeValue::from("Telescope"));
        assert!(matches!(
            mapper.resolve_node_type("/dev", &attributes),
            Err(MappingError::UnresolvedType { .. })
        ));
    }

    #[test]
    fn test_external_link_format() {
        let stored = external_link("other.nwb", "/devices/probe");
        assert_eq!(parse_external_link(&stored), Some(("other.nwb", "/devices/probe")));
        assert_eq!(parse_external_link("/devices/probe"), None);
    }
}
