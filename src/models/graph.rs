//! Object graph
//!
//! An arena of typed instances keyed by [`ObjectId`]. Containment forms a
//! tree rooted at the root instance; links and regions refer to other
//! instances by id. Every mutation goes through a setter that checks the
//! value against the instance's resolved type.

use super::error::{ObjectError, ObjectResult};
use super::object::{DATA_FIELD, ObjectId, ObjectInstance, Origin};
use super::value::{DatasetHandle, FieldValue, LinkTarget};
use crate::spec::{
    DType, FieldKind, ResolvedField, ResolvedType, ShapeSpec, SpecKind, TypeCatalog, TypeKey,
    core_type,
};
use crate::storage::join_path;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^/.][^/]*$").expect("valid name pattern"));

/// Name of the root instance
pub const ROOT_NAME: &str = "root";

/// A link or region whose target is gone or unreachable
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingLink {
    pub source: ObjectId,
    pub source_path: String,
    pub field: String,
    pub target: ObjectId,
}

/// Result of [`ObjectGraph::remove_instance`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovalReport {
    /// The removed instance and its descendants
    pub removed: Vec<ObjectId>,
    /// Links and regions of remaining instances that pointed into the removed subtree
    pub dangling: Vec<DanglingLink>,
}

/// Check an instance name
pub fn validate_name(name: &str) -> ObjectResult<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(ObjectError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ObjectGraph {
    catalog: Arc<TypeCatalog>,
    objects: HashMap<ObjectId, ObjectInstance>,
    root: ObjectId,
    /// Instances removed from the graph, with where they were read from
    removed: BTreeMap<ObjectId, Option<Origin>>,
}

impl ObjectGraph {
    /// Create a graph with a root instance of `root_type` named `root`
    pub fn new(catalog: Arc<TypeCatalog>, root_type: &TypeKey) -> ObjectResult<Self> {
        let resolved = catalog.get(root_type)?;
        if resolved.is_abstract {
            return Err(ObjectError::AbstractType(resolved.key.clone()));
        }
        let root = ObjectInstance::new(resolved.key.clone(), ROOT_NAME);
        Ok(Self::with_root(catalog, root))
    }

    pub(crate) fn with_root(catalog: Arc<TypeCatalog>, root: ObjectInstance) -> Self {
        let id = root.id;
        let mut objects = HashMap::new();
        objects.insert(id, root);
        Self {
            catalog,
            objects,
            root: id,
            removed: BTreeMap::new(),
        }
    }

    /// Insert an instance read from a container, without checks
    pub(crate) fn insert_loaded(&mut self, instance: ObjectInstance) {
        self.objects.insert(instance.id, instance);
    }

    pub(crate) fn instance_mut(&mut self, id: ObjectId) -> ObjectResult<&mut ObjectInstance> {
        self.objects
            .get_mut(&id)
            .ok_or(ObjectError::UnknownInstance(id))
    }

    /// Drop an instance and its subtree without recording a removal
    pub(crate) fn discard(&mut self, id: ObjectId) -> ObjectResult<()> {
        let subtree = self.descendants(id);
        self.detach(id)?;
        for member in subtree {
            self.objects.remove(&member);
        }
        Ok(())
    }

    /// Reset every modified flag; used after a graph was read
    pub(crate) fn mark_all_clean(&mut self) {
        for instance in self.objects.values_mut() {
            instance.modified = false;
        }
    }

    /// Container paths of the streamed values held by reachable instances
    pub(crate) fn stream_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (path, id) in self.reachable() {
            let Some(instance) = self.objects.get(&id) else {
                continue;
            };
            for (key, value) in &instance.fields {
                if matches!(value, FieldValue::Stream(_)) {
                    out.push(join_path(&path, key));
                }
            }
            if matches!(instance.data, Some(FieldValue::Stream(_))) {
                out.push(path);
            }
        }
        out
    }

    /// Record that every reachable instance now lives at `location`
    ///
    /// Origins move to the written paths, lazy handles are repointed at the
    /// written datasets and the removal log starts over. Consumed streams are
    /// replaced by their entry in `streamed`, keyed by dataset path.
    pub(crate) fn mark_written(
        &mut self,
        location: &str,
        streamed: &HashMap<String, DatasetHandle>,
    ) {
        for (path, id) in self.reachable() {
            let Some(instance) = self.objects.get_mut(&id) else {
                continue;
            };
            for (key, value) in instance.fields.iter_mut() {
                repoint(value, location, join_path(&path, key), streamed);
            }
            if let Some(value) = instance.data.as_mut() {
                repoint(value, location, path.clone(), streamed);
            }
            instance.origin = Some(Origin {
                location: location.to_string(),
                path,
            });
            instance.modified = false;
        }
        self.removed.clear();
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectInstance> {
        self.objects.get(&id)
    }

    pub fn instance(&self, id: ObjectId) -> ObjectResult<&ObjectInstance> {
        self.objects.get(&id).ok_or(ObjectError::UnknownInstance(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectInstance> {
        self.objects.values()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn resolved_type(&self, id: ObjectId) -> ObjectResult<Arc<ResolvedType>> {
        let instance = self.instance(id)?;
        Ok(self.catalog.get(&instance.type_key)?)
    }

    /// Instances removed since the graph was built or read
    pub fn removed(&self) -> &BTreeMap<ObjectId, Option<Origin>> {
        &self.removed
    }

    /// Create an instance, optionally placing it under `parent`
    ///
    /// The child goes to the parent's named field whose name equals `name`
    /// and whose type it satisfies, otherwise to the unnamed child field
    /// with the most specific compatible type.
    pub fn create_instance(
        &mut self,
        type_key: &TypeKey,
        name: &str,
        parent: Option<ObjectId>,
    ) -> ObjectResult<ObjectId> {
        let resolved = self.catalog.get(type_key)?;
        if resolved.is_abstract {
            return Err(ObjectError::AbstractType(resolved.key.clone()));
        }
        validate_name(name)?;
        let placement = match parent {
            Some(p) => Some((p, self.placement_for(p, &resolved, name)?)),
            None => None,
        };

        let instance = ObjectInstance::new(resolved.key.clone(), name);
        let id = instance.id;
        self.objects.insert(id, instance);
        if let Some((parent, key)) = placement
            && let Err(e) = self.attach(parent, &key, id)
        {
            self.objects.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Create an instance under the instance at `parent_path`
    pub fn add_instance(
        &mut self,
        parent_path: &str,
        type_key: &TypeKey,
        name: &str,
    ) -> ObjectResult<ObjectId> {
        let parent = self.resolve_path(parent_path)?;
        self.create_instance(type_key, name, Some(parent))
    }

    fn placement_for(
        &self,
        parent: ObjectId,
        child: &ResolvedType,
        name: &str,
    ) -> ObjectResult<String> {
        let parent_type = self.resolved_type(parent)?;
        self.check_name_free(parent, name, &[])?;

        let named = parent_type.fields.iter().find(|f| {
            f.spec.name.as_deref() == Some(name)
                && f.spec.holds_children()
                && f.target.as_ref().is_some_and(|t| child.is_a(t))
        });
        if let Some(field) = named {
            return Ok(field.key().to_string());
        }

        parent_type
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
            .map(|(_, f)| f.key().to_string())
            .ok_or_else(|| ObjectError::NoMatchingField {
                parent: self.display_path(parent),
                parent_type: parent_type.key.clone(),
                child_type: child.key.clone(),
                name: name.to_string(),
            })
    }

    /// Fail if `name` is taken under `parent` by a child (other than `except`)
    /// or by a named dataset, column or link field
    fn check_name_free(&self, parent: ObjectId, name: &str, except: &[ObjectId]) -> ObjectResult<()> {
        let parent_inst = self.instance(parent)?;
        let parent_type = self.catalog.get(&parent_inst.type_key)?;

        let taken_by_child = parent_inst
            .child_ids()
            .iter()
            .filter(|c| !except.contains(c))
            .filter_map(|c| self.objects.get(c))
            .any(|c| c.name == name);

        let taken_by_field = parent_inst.fields.keys().any(|key| {
            parent_type.field(key).is_some_and(|f| {
                f.spec.is_named()
                    && !f.spec.holds_children()
                    && f.kind() != FieldKind::Attribute
                    && (key == name
                        || (f.kind() == FieldKind::IndexedColumn
                            && format!("{}_index", key) == name))
            })
        });

        if taken_by_child || taken_by_field {
            return Err(ObjectError::NameCollision {
                parent: self.display_path(parent),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn attach(&mut self, parent: ObjectId, key: &str, child: ObjectId) -> ObjectResult<()> {
        let parent_type = self.resolved_type(parent)?;
        let field = parent_type
            .field(key)
            .ok_or_else(|| ObjectError::UnknownField {
                type_key: parent_type.key.clone(),
                field: key.to_string(),
            })?;
        let quantity = field.spec.quantity;
        let path = self.display_path(parent);

        let parent_inst = self.instance_mut(parent)?;
        if quantity.allows_many() {
            let mut ids = parent_inst
                .fields
                .get(key)
                .map(|v| v.child_ids())
                .unwrap_or_default();
            ids.push(child);
            parent_inst
                .fields
                .insert(key.to_string(), FieldValue::Children(ids));
        } else if parent_inst.fields.contains_key(key) {
            return Err(ObjectError::Cardinality {
                path,
                field: key.to_string(),
                cardinality: quantity,
                count: 2,
            });
        } else {
            parent_inst
                .fields
                .insert(key.to_string(), FieldValue::Child(child));
        }
        parent_inst.modified = true;
        self.instance_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Remove `child` from its parent's fields
    fn detach(&mut self, child: ObjectId) -> ObjectResult<()> {
        let Some(parent) = self.instance(child)?.parent else {
            return Ok(());
        };
        if let Some(p) = self.objects.get_mut(&parent) {
            let mut emptied = None;
            for (key, value) in p.fields.iter_mut() {
                match value {
                    FieldValue::Child(c) if *c == child => emptied = Some(key.clone()),
                    FieldValue::Children(cs) if cs.contains(&child) => {
                        cs.retain(|c| *c != child);
                        if cs.is_empty() {
                            emptied = Some(key.clone());
                        }
                    }
                    _ => {}
                }
            }
            if let Some(key) = emptied {
                p.fields.remove(&key);
            }
            p.modified = true;
        }
        self.instance_mut(child)?.parent = None;
        Ok(())
    }

    /// Set a field, checking it against the instance's type
    ///
    /// Child fields take ownership of the children, detaching them from
    /// their previous parent. Link fields never change containment.
    pub fn set_field(
        &mut self,
        id: ObjectId,
        field: &str,
        value: FieldValue,
    ) -> ObjectResult<()> {
        let resolved = self.resolved_type(id)?;
        let spec = resolved
            .field(field)
            .ok_or_else(|| ObjectError::UnknownField {
                type_key: resolved.key.clone(),
                field: field.to_string(),
            })?
            .clone();
        let path = self.display_path(id);

        if spec.spec.holds_children() {
            return self.set_children(id, &spec, &path, value);
        }
        match spec.kind() {
            FieldKind::Link => self.check_link(&path, &spec, &value)?,
            _ => check_field_value(&path, &spec, &value)?,
        }

        // a single value is replaced only after clear_field
        let quantity = spec.spec.quantity;
        if !quantity.allows_many() && self.instance(id)?.fields.contains_key(field) {
            return Err(ObjectError::Cardinality {
                path,
                field: field.to_string(),
                cardinality: quantity,
                count: 2,
            });
        }

        let instance = self.instance_mut(id)?;
        instance.fields.insert(field.to_string(), value);
        instance.modified = true;
        Ok(())
    }

    fn set_children(
        &mut self,
        id: ObjectId,
        spec: &ResolvedField,
        path: &str,
        value: FieldValue,
    ) -> ObjectResult<()> {
        let key = spec.key().to_string();
        let ids = match value {
            FieldValue::Child(c) => vec![c],
            FieldValue::Children(cs) => cs,
            other => {
                return Err(ObjectError::TypeMismatch {
                    path: path.to_string(),
                    field: key,
                    expected: "child instances".to_string(),
                    actual: other.describe().to_string(),
                });
            }
        };
        let quantity = spec.spec.quantity;
        let current: Vec<ObjectId> = self
            .instance(id)?
            .field(&key)
            .map(|v| v.child_ids())
            .unwrap_or_default();

        let over_max = quantity.max().is_some_and(|m| ids.len() > m);
        let replaces_single =
            !quantity.allows_many() && !current.is_empty() && current != ids && !ids.is_empty();
        if over_max || replaces_single {
            return Err(ObjectError::Cardinality {
                path: path.to_string(),
                field: key,
                cardinality: quantity,
                count: if over_max {
                    ids.len()
                } else {
                    current.len() + ids.len()
                },
            });
        }

        let except: Vec<ObjectId> = current.iter().chain(ids.iter()).copied().collect();
        let mut names = HashSet::new();
        for c in &ids {
            let child = self.instance(*c)?;
            let child_type = self.catalog.get(&child.type_key)?;
            if !spec.target.as_ref().is_some_and(|t| child_type.is_a(t)) {
                return Err(ObjectError::TypeMismatch {
                    path: path.to_string(),
                    field: key,
                    expected: spec
                        .target
                        .as_ref()
                        .map(|t| t.to_string())
                        .unwrap_or_default(),
                    actual: child.type_key.to_string(),
                });
            }
            if *c == id || self.is_ancestor(*c, id) {
                return Err(ObjectError::Cycle {
                    parent: path.to_string(),
                    child: self.display_path(*c),
                });
            }
            let name = spec.spec.name.clone().unwrap_or_else(|| child.name.clone());
            if !names.insert(name.clone()) {
                return Err(ObjectError::NameCollision {
                    parent: path.to_string(),
                    name,
                });
            }
            self.check_name_free(id, &name, &except)?;
        }

        for old in current.iter().filter(|o| !ids.contains(o)) {
            if let Some(instance) = self.objects.get_mut(old) {
                instance.parent = None;
            }
        }
        for c in &ids {
            self.detach(*c)?;
        }
        for c in &ids {
            let child = self.instance_mut(*c)?;
            child.parent = Some(id);
            if let Some(name) = &spec.spec.name
                && &child.name != name
            {
                child.name = name.clone();
                child.modified = true;
            }
        }

        let instance = self.instance_mut(id)?;
        if ids.is_empty() {
            instance.fields.remove(&key);
        } else if !quantity.allows_many() && ids.len() == 1 {
            instance.fields.insert(key, FieldValue::Child(ids[0]));
        } else {
            instance.fields.insert(key, FieldValue::Children(ids));
        }
        instance.modified = true;
        Ok(())
    }

    fn check_link(&self, path: &str, spec: &ResolvedField, value: &FieldValue) -> ObjectResult<()> {
        match value {
            FieldValue::Link(LinkTarget::Local(target)) => {
                let target_inst = self.instance(*target)?;
                if let Some(expected) = &spec.target
                    && !self.catalog.is_a(&target_inst.type_key, expected)
                {
                    return Err(ObjectError::TypeMismatch {
                        path: path.to_string(),
                        field: spec.key().to_string(),
                        expected: expected.to_string(),
                        actual: target_inst.type_key.to_string(),
                    });
                }
                Ok(())
            }
            FieldValue::Link(LinkTarget::External { .. }) => Ok(()),
            other => Err(ObjectError::TypeMismatch {
                path: path.to_string(),
                field: spec.key().to_string(),
                expected: "link".to_string(),
                actual: other.describe().to_string(),
            }),
        }
    }

    /// Append a child to a zero-or-more child field
    pub fn push_child(&mut self, id: ObjectId, field: &str, child: ObjectId) -> ObjectResult<()> {
        let mut children = self
            .instance(id)?
            .field(field)
            .map(|v| v.child_ids())
            .unwrap_or_default();
        if children.contains(&child) {
            return Ok(());
        }
        children.push(child);
        self.set_field(id, field, FieldValue::Children(children))
    }

    /// Unset a field; children it held become detached
    pub fn clear_field(&mut self, id: ObjectId, field: &str) -> ObjectResult<()> {
        let resolved = self.resolved_type(id)?;
        if resolved.field(field).is_none() {
            return Err(ObjectError::UnknownField {
                type_key: resolved.key.clone(),
                field: field.to_string(),
            });
        }
        let instance = self.instance_mut(id)?;
        if let Some(previous) = instance.fields.remove(field) {
            instance.modified = true;
            for child in previous.child_ids() {
                if let Some(c) = self.objects.get_mut(&child) {
                    c.parent = None;
                }
            }
        }
        Ok(())
    }

    /// Set the payload of a dataset-kind instance
    pub fn set_data(&mut self, id: ObjectId, value: FieldValue) -> ObjectResult<()> {
        let resolved = self.resolved_type(id)?;
        let path = self.display_path(id);
        if resolved.kind != SpecKind::Dataset {
            return Err(ObjectError::TypeMismatch {
                path,
                field: DATA_FIELD.to_string(),
                expected: "a dataset type".to_string(),
                actual: resolved.key.to_string(),
            });
        }
        match &value {
            FieldValue::Region(region) => {
                let table = self.instance(region.table)?;
                if !self.catalog.is_a(&table.type_key, &core_type("DynamicTable")) {
                    return Err(ObjectError::NotATable(self.display_path(region.table)));
                }
            }
            FieldValue::Scalar(_)
            | FieldValue::Array(_)
            | FieldValue::Dataset(_)
            | FieldValue::Stream(_)
            | FieldValue::Ragged(_) => {
                check_dtype(&path, DATA_FIELD, resolved.dtype, &value)?;
                check_shape(&path, DATA_FIELD, resolved.shape.as_ref(), &value)?;
                if let FieldValue::Ragged(ragged) = &value {
                    ragged.check()?;
                }
            }
            other => {
                return Err(ObjectError::TypeMismatch {
                    path,
                    field: DATA_FIELD.to_string(),
                    expected: "dataset payload".to_string(),
                    actual: other.describe().to_string(),
                });
            }
        }
        let instance = self.instance_mut(id)?;
        instance.data = Some(value);
        instance.modified = true;
        Ok(())
    }

    /// Stored value of a field, or the declared default of an unset optional field
    pub fn get_field(&self, id: ObjectId, field: &str) -> Option<FieldValue> {
        let instance = self.objects.get(&id)?;
        if let Some(value) = instance.fields.get(field) {
            return Some(value.clone());
        }
        self.catalog
            .get(&instance.type_key)
            .ok()?
            .field(field)?
            .spec
            .default_value()
            .map(FieldValue::Scalar)
    }

    /// Fail on the first (by path) required field that is unset and has no default
    pub fn finalize(&self) -> ObjectResult<()> {
        for (path, id) in self.reachable() {
            let instance = self.instance(id)?;
            let resolved = self.catalog.get(&instance.type_key)?;
            for field in resolved.required_fields() {
                if field.spec.default.is_none() && !is_set(instance.fields.get(field.key())) {
                    return Err(ObjectError::MissingRequiredField {
                        path,
                        field: field.key().to_string(),
                    });
                }
            }
            if resolved.kind == SpecKind::Dataset && instance.data.is_none() {
                return Err(ObjectError::MissingRequiredField {
                    path,
                    field: DATA_FIELD.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Remove the instance at `path` and its subtree
    pub fn remove_instance(&mut self, path: &str) -> ObjectResult<RemovalReport> {
        let id = self.resolve_path(path)?;
        if id == self.root {
            return Err(ObjectError::RootRemoval);
        }
        let subtree = self.descendants(id);
        self.detach(id)?;
        for member in &subtree {
            if let Some(instance) = self.objects.remove(member) {
                self.removed.insert(*member, instance.origin);
            }
        }

        let removed: HashSet<ObjectId> = subtree.iter().copied().collect();
        let dangling: Vec<DanglingLink> = self
            .dangling_links()
            .into_iter()
            .filter(|d| removed.contains(&d.target))
            .collect();
        info!(
            "Removed {} instance(s) at {}; {} reference(s) now dangle",
            subtree.len(),
            path,
            dangling.len()
        );
        Ok(RemovalReport {
            removed: subtree,
            dangling,
        })
    }

    /// Links and regions of reachable instances whose target is missing or unreachable
    pub fn dangling_links(&self) -> Vec<DanglingLink> {
        let reachable = self.reachable();
        let live: HashSet<ObjectId> = reachable.iter().map(|(_, id)| *id).collect();
        let mut dangling = Vec::new();
        for (path, id) in &reachable {
            let Some(instance) = self.objects.get(id) else {
                continue;
            };
            for (field, target) in instance.references() {
                if !live.contains(&target) {
                    dangling.push(DanglingLink {
                        source: *id,
                        source_path: path.clone(),
                        field,
                        target,
                    });
                }
            }
        }
        dangling
    }

    /// Path of an instance attached to the root, `/` for the root itself
    pub fn path_of(&self, id: ObjectId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = id;
        for _ in 0..=self.objects.len() {
            if current == self.root {
                segments.reverse();
                return Some(format!("/{}", segments.join("/")));
            }
            let instance = self.objects.get(&current)?;
            segments.push(instance.name.as_str());
            current = instance.parent?;
        }
        None
    }

    /// Path for messages; detached instances are shown by name
    pub fn display_path(&self, id: ObjectId) -> String {
        self.path_of(id).unwrap_or_else(|| match self.objects.get(&id) {
            Some(instance) => format!("<detached {}>", instance.name),
            None => format!("<unknown {}>", id),
        })
    }

    pub fn resolve_path(&self, path: &str) -> ObjectResult<ObjectId> {
        let mut current = self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self
                .children(current)
                .into_iter()
                .find(|c| self.objects.get(c).is_some_and(|i| i.name == segment))
                .ok_or_else(|| ObjectError::UnknownPath(path.to_string()))?;
        }
        Ok(current)
    }

    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.objects
            .get(&id)
            .map(|i| i.child_ids())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: ObjectId) -> Option<ObjectId> {
        self.objects.get(&id).and_then(|i| i.parent)
    }

    /// Whether `ancestor` contains `id`, directly or transitively
    pub fn is_ancestor(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        let mut current = self.parent(id);
        for _ in 0..self.objects.len() {
            match current {
                Some(p) if p == ancestor => return true,
                Some(p) => current = self.parent(p),
                None => return false,
            }
        }
        false
    }

    /// `id` and all its descendants, preorder
    pub fn descendants(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) || !self.objects.contains_key(&current) {
                continue;
            }
            out.push(current);
            let mut children = self.children(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Every instance reachable from the root with its path, ordered by path
    pub fn reachable(&self) -> Vec<(String, ObjectId)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![("/".to_string(), self.root)];
        while let Some((path, id)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for child in self.children(id) {
                if let Some(instance) = self.objects.get(&child) {
                    let child_path = if path == "/" {
                        format!("/{}", instance.name)
                    } else {
                        format!("{}/{}", path, instance.name)
                    };
                    stack.push((child_path, child));
                }
            }
            out.push((path, id));
        }
        out.sort();
        out
    }

    /// Instances that refer to `target` through a link or region, with the field key
    pub fn links_to(&self, target: ObjectId) -> Vec<(ObjectId, String)> {
        let mut refs: Vec<(ObjectId, String)> = self
            .objects
            .values()
            .flat_map(|i| {
                i.references()
                    .into_iter()
                    .filter(|(_, t)| *t == target)
                    .map(move |(field, _)| (i.id, field))
            })
            .collect();
        refs.sort();
        refs
    }

    pub fn mark_modified(&mut self, id: ObjectId) -> ObjectResult<()> {
        self.instance_mut(id)?.modified = true;
        Ok(())
    }

    /// Unmodified, read from one container, and still at the path it was read from
    pub fn is_subtree_clean(&self, id: ObjectId) -> bool {
        let Some(location) = self
            .objects
            .get(&id)
            .and_then(|i| i.origin.as_ref())
            .map(|o| o.location.clone())
        else {
            return false;
        };
        self.descendants(id).into_iter().all(|member| {
            self.objects.get(&member).is_some_and(|i| {
                !i.modified
                    && i.origin.as_ref().is_some_and(|o| {
                        o.location == location && Some(&o.path) == self.path_of(member).as_ref()
                    })
            })
        })
    }

    /// Drop instances not reachable from the root; returns their ids
    pub fn collect_garbage(&mut self) -> Vec<ObjectId> {
        let live: HashSet<ObjectId> = self.reachable().into_iter().map(|(_, id)| id).collect();
        let dead: Vec<ObjectId> = self
            .objects
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for id in &dead {
            if let Some(instance) = self.objects.remove(id)
                && instance.origin.is_some()
            {
                self.removed.insert(*id, instance.origin);
            }
        }
        dead
    }

    /// Path to (type, id) of every reachable instance
    pub fn structure(&self) -> BTreeMap<String, (TypeKey, ObjectId)> {
        self.reachable()
            .into_iter()
            .filter_map(|(path, id)| {
                self.objects
                    .get(&id)
                    .map(|i| (path, (i.type_key.clone(), id)))
            })
            .collect()
    }
}

/// Whether a field holds a value; an empty child list counts as unset
pub(crate) fn is_set(value: Option<&FieldValue>) -> bool {
    match value {
        None => false,
        Some(FieldValue::Children(ids)) => !ids.is_empty(),
        Some(_) => true,
    }
}

/// Check a data value (scalar, array, handle, stream or ragged array) against its field
pub fn check_field_value(path: &str, field: &ResolvedField, value: &FieldValue) -> ObjectResult<()> {
    let key = field.key();
    let variant_ok = matches!(
        (field.kind(), value),
        (FieldKind::Attribute, FieldValue::Scalar(_) | FieldValue::Array(_))
            | (
                FieldKind::Dataset,
                FieldValue::Scalar(_)
                    | FieldValue::Array(_)
                    | FieldValue::Dataset(_)
                    | FieldValue::Stream(_)
            )
            | (FieldKind::IndexedColumn, FieldValue::Ragged(_))
    );
    if !variant_ok {
        return Err(ObjectError::TypeMismatch {
            path: path.to_string(),
            field: key.to_string(),
            expected: format!("{:?} value", field.kind()).to_lowercase(),
            actual: value.describe().to_string(),
        });
    }
    check_dtype(path, key, field.spec.dtype, value)?;
    check_shape(path, key, field.spec.shape.as_ref(), value)?;
    if let FieldValue::Ragged(ragged) = value {
        ragged.check()?;
    }
    Ok(())
}

pub fn check_dtype(
    path: &str,
    key: &str,
    expected: Option<DType>,
    value: &FieldValue,
) -> ObjectResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let ok = match value {
        FieldValue::Scalar(s) => s.fits(expected),
        other => other.dtype().is_none_or(|d| expected.accepts(d)),
    };
    if ok {
        Ok(())
    } else {
        Err(ObjectError::TypeMismatch {
            path: path.to_string(),
            field: key.to_string(),
            expected: expected.to_string(),
            actual: match value {
                FieldValue::Scalar(s) => s.to_string(),
                other => other
                    .dtype()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| other.describe().to_string()),
            },
        })
    }
}

pub fn check_shape(
    path: &str,
    key: &str,
    expected: Option<&ShapeSpec>,
    value: &FieldValue,
) -> ObjectResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let (ok, actual) = match value {
        FieldValue::Scalar(_) => (expected.matches(&[]), Vec::new()),
        FieldValue::Array(a) => (expected.matches(&a.shape), a.shape.clone()),
        FieldValue::Dataset(h) => (expected.matches(&h.shape), h.shape.clone()),
        FieldValue::Stream(s) => {
            let mut shape = vec![0];
            shape.extend_from_slice(s.inner_shape());
            (expected.allows_rank(shape.len()), shape)
        }
        _ => (true, Vec::new()),
    };
    if ok {
        Ok(())
    } else {
        Err(ObjectError::ShapeMismatch {
            path: path.to_string(),
            field: key.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

fn repoint(
    value: &mut FieldValue,
    location: &str,
    path: String,
    streamed: &HashMap<String, DatasetHandle>,
) {
    match value {
        FieldValue::Dataset(handle) => {
            handle.location = location.to_string();
            handle.path = path;
        }
        FieldValue::Stream(_) => {
            if let Some(handle) = streamed.get(&path) {
                *value = FieldValue::Dataset(handle.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::value::{ArrayData, Scalar};
    use crate::spec::core_catalog;

    const FOLDERS: &str = r#"
namespace:
  name: folders
  version: "1.0.0"
  dependencies:
    - name: core
      version: "2.5.0"
types:
  - neurodata_type_def: Folder
    neurodata_type_inc: NWBDataInterface
    fields:
      - kind: group
        type_inc: Folder
        quantity: zero_or_more
"#;

    fn graph() -> ObjectGraph {
        ObjectGraph::new(Arc::new(core_catalog()), &core_type("NWBFile")).unwrap()
    }

    fn text(value: &str) -> FieldValue {
        FieldValue::Scalar(Scalar::Text(value.to_string()))
    }

    #[test]
    fn test_placement_by_name_and_type() {
        let mut g = graph();
        let root = g.root();
        let series = g
            .create_instance(&core_type("ElectricalSeries"), "ecephys", Some(root))
            .unwrap();
        let units = g.create_instance(&core_type("Units"), "units", Some(root)).unwrap();
        let other = g
            .create_instance(&core_type("Units"), "curated_units", Some(root))
            .unwrap();

        let root_inst = g.instance(root).unwrap();
        assert_eq!(
            root_inst.field("NWBDataInterface"),
            Some(&FieldValue::Children(vec![series]))
        );
        assert_eq!(root_inst.field("units"), Some(&FieldValue::Child(units)));
        assert_eq!(
            root_inst.field("DynamicTable"),
            Some(&FieldValue::Children(vec![other]))
        );
        assert_eq!(g.path_of(series).as_deref(), Some("/ecephys"));
        assert_eq!(g.resolve_path("/curated_units").unwrap(), other);

        assert!(matches!(
            g.create_instance(&core_type("Subject"), "mouse", Some(root)),
            Err(ObjectError::NoMatchingField { .. })
        ));
    }

    #[test]
    fn test_name_rules() {
        let mut g = graph();
        let root = g.root();
        g.create_instance(&core_type("Device"), "probe", Some(root)).unwrap();
        assert!(matches!(
            g.create_instance(&core_type("Device"), "probe", Some(root)),
            Err(ObjectError::NameCollision { .. })
        ));
        assert!(matches!(
            g.create_instance(&core_type("TimeSeries"), "probe", Some(root)),
            Err(ObjectError::NameCollision { .. })
        ));
        for bad in ["", "a/b", ".hidden"] {
            assert!(matches!(
                g.create_instance(&core_type("Device"), bad, Some(root)),
                Err(ObjectError::InvalidName(_))
            ));
        }
        assert!(matches!(
            g.create_instance(&core_type("NWBDataInterface"), "x", Some(root)),
            Err(ObjectError::AbstractType(_))
        ));
    }

    #[test]
    fn test_set_field_checks() {
        let mut g = graph();
        let ts = g
            .add_instance("/", &core_type("TimeSeries"), "ts")
            .unwrap();
        assert!(matches!(
            g.set_field(ts, "description", FieldValue::Scalar(Scalar::Int(3))),
            Err(ObjectError::TypeMismatch { .. })
        ));
        assert!(matches!(
            g.set_field(ts, "starting_time", ArrayData::from_f64(vec![1.0, 2.0]).into()),
            Err(ObjectError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            g.set_field(ts, "timestamps", ArrayData::from_i64(vec![1, 2]).into()),
            Err(ObjectError::TypeMismatch { .. })
        ));
        assert!(matches!(
            g.set_field(ts, "nope", text("x")),
            Err(ObjectError::UnknownField { .. })
        ));
        g.set_field(ts, "starting_time", FieldValue::Scalar(Scalar::Float(0.5)))
            .unwrap();
        g.set_field(ts, "data", ArrayData::from_f64(vec![1.0, 2.0]).into())
            .unwrap();
        assert_eq!(
            g.get_field(ts, "unit"),
            Some(text("unknown"))
        );
    }

    #[test]
    fn test_single_value_needs_clear_before_replace() {
        let mut g = graph();
        let root = g.root();
        g.set_field(root, "identifier", text("id-1")).unwrap();
        assert!(matches!(
            g.set_field(root, "identifier", text("id-2")),
            Err(ObjectError::Cardinality { field, .. }) if field == "identifier"
        ));
        assert_eq!(g.get_field(root, "identifier"), Some(text("id-1")));

        let ts = g.add_instance("/", &core_type("TimeSeries"), "ts").unwrap();
        g.set_field(ts, "data", ArrayData::from_f64(vec![1.0, 2.0]).into())
            .unwrap();
        assert!(matches!(
            g.set_field(ts, "data", ArrayData::from_f64(vec![3.0]).into()),
            Err(ObjectError::Cardinality { .. })
        ));

        g.clear_field(root, "identifier").unwrap();
        g.set_field(root, "identifier", text("id-2")).unwrap();
        assert_eq!(g.get_field(root, "identifier"), Some(text("id-2")));
        g.clear_field(ts, "data").unwrap();
        g.set_field(ts, "data", ArrayData::from_f64(vec![3.0]).into())
            .unwrap();
        assert_eq!(
            g.get_field(ts, "data").and_then(|v| v.row_count()),
            Some(1)
        );
    }

    #[test]
    fn test_is_set() {
        assert!(!is_set(None));
        assert!(!is_set(Some(&FieldValue::Children(vec![]))));
        assert!(is_set(Some(&FieldValue::Children(vec![ObjectId::new()]))));
        assert!(is_set(Some(&text("x"))));
    }

    #[test]
    fn test_single_child_cardinality() {
        let mut g = graph();
        let root = g.root();
        g.create_instance(&core_type("Subject"), "subject", Some(root)).unwrap();
        let second = g.create_instance(&core_type("Subject"), "subject", None).unwrap();
        assert!(matches!(
            g.set_field(root, "subject", FieldValue::Child(second)),
            Err(ObjectError::Cardinality { .. })
        ));
        g.clear_field(root, "subject").unwrap();
        g.set_field(root, "subject", FieldValue::Child(second)).unwrap();
        assert_eq!(g.resolve_path("/subject").unwrap(), second);
        assert_eq!(g.collect_garbage().len(), 1);
    }

    #[test]
    fn test_containment_transfer() {
        let mut g = graph();
        let root = g.root();
        let module = g
            .create_instance(&core_type("ProcessingModule"), "behavior", Some(root))
            .unwrap();
        let ts = g.create_instance(&core_type("TimeSeries"), "speed", Some(root)).unwrap();
        g.push_child(module, "NWBDataInterface", ts).unwrap();
        assert_eq!(g.parent(ts), Some(module));
        assert_eq!(g.path_of(ts).as_deref(), Some("/behavior/speed"));
        assert!(g.instance(root).unwrap().field("NWBDataInterface").is_none());
        assert!(g.is_ancestor(root, ts));
    }

    #[test]
    fn test_containment_cycle_rejected() {
        let mut catalog = core_catalog();
        catalog.load_namespace(FOLDERS).unwrap();
        let mut g = ObjectGraph::new(Arc::new(catalog), &core_type("NWBFile")).unwrap();
        let folder = TypeKey::new("folders", "Folder");
        let outer = g.add_instance("/", &folder, "outer").unwrap();
        let inner = g.add_instance("/outer", &folder, "inner").unwrap();
        assert!(matches!(
            g.push_child(inner, "Folder", outer),
            Err(ObjectError::Cycle { .. })
        ));
        assert!(matches!(
            g.push_child(outer, "Folder", outer),
            Err(ObjectError::Cycle { .. })
        ));
    }

    #[test]
    fn test_finalize_reports_first_missing_field() {
        let mut g = graph();
        let root = g.root();
        assert!(matches!(
            g.finalize(),
            Err(ObjectError::MissingRequiredField { field, .. }) if field == "session_description"
        ));
        g.set_field(root, "session_description", text("test")).unwrap();
        g.set_field(root, "identifier", text("id-1")).unwrap();
        g.set_field(root, "session_start_time", text("2024-01-01T00:00:00Z"))
            .unwrap();
        g.finalize().unwrap();

        g.add_instance("/", &core_type("ElectrodeGroup"), "shank0").unwrap();
        assert!(matches!(
            g.finalize(),
            Err(ObjectError::MissingRequiredField { path, field }) if path == "/shank0" && field == "description"
        ));
    }

    #[test]
    fn test_link_checks_and_removal() {
        let mut g = graph();
        let probe = g.add_instance("/", &core_type("Device"), "probe").unwrap();
        let group = g.add_instance("/", &core_type("ElectrodeGroup"), "shank0").unwrap();
        let subject = g.add_instance("/", &core_type("Subject"), "subject").unwrap();

        assert!(matches!(
            g.set_field(group, "device", FieldValue::Link(LinkTarget::Local(subject))),
            Err(ObjectError::TypeMismatch { .. })
        ));
        g.set_field(group, "device", FieldValue::Link(LinkTarget::Local(probe)))
            .unwrap();
        // Links never move the target
        assert_eq!(g.path_of(probe).as_deref(), Some("/probe"));
        assert_eq!(g.links_to(probe), vec![(group, "device".to_string())]);

        let report = g.remove_instance("/probe").unwrap();
        assert_eq!(report.removed, vec![probe]);
        assert_eq!(report.dangling.len(), 1);
        assert_eq!(report.dangling[0].source_path, "/shank0");
        assert_eq!(report.dangling[0].field, "device");
        assert!(g.removed().contains_key(&probe));

        assert!(matches!(g.remove_instance("/"), Err(ObjectError::RootRemoval)));
        assert!(matches!(
            g.remove_instance("/nope"),
            Err(ObjectError::UnknownPath(_))
        ));
    }

    #[test]
    fn test_structure_and_reachable_order() {
        let mut g = graph();
        g.add_instance("/", &core_type("Device"), "b").unwrap();
        g.add_instance("/", &core_type("Device"), "a").unwrap();
        let paths: Vec<String> = g.structure().into_keys().collect();
        assert_eq!(paths, vec!["/", "/a", "/b"]);
    }
}
