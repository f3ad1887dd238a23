//! Type catalog
//!
//! Holds every loaded namespace version and the resolved (inheritance
//! flattened) form of each type of the active version of every namespace.
//! Loading is transactional: the new namespace is resolved against a copy of
//! the catalog which replaces the original only when every check passes.

use super::error::{SchemaError, SchemaResult, TypeResolutionError};
use super::namespace::{Namespace, NamespaceHandle, Version};
use super::types::{DType, FieldKind, FieldSpec, ShapeSpec, SpecKind, TypeKey, TypeSpec};
use crate::config::ResolutionPolicy;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A field of a resolved type
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub spec: FieldSpec,
    /// Resolved `type_inc` of typed children and links
    pub target: Option<TypeKey>,
    /// Type whose declaration this field comes from
    pub declared_by: TypeKey,
}

impl ResolvedField {
    pub fn key(&self) -> &str {
        self.spec.key()
    }

    pub fn kind(&self) -> FieldKind {
        self.spec.kind
    }
}

/// A type with its inheritance chain flattened
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedType {
    pub key: TypeKey,
    pub kind: SpecKind,
    pub is_abstract: bool,
    pub dtype: Option<DType>,
    pub shape: Option<ShapeSpec>,
    pub default_name: Option<String>,
    pub doc: String,
    /// Ancestors, nearest first
    pub ancestors: Vec<TypeKey>,
    /// Inherited fields first; overrides replace the inherited field in place
    pub fields: Vec<ResolvedField>,
}

impl ResolvedType {
    pub fn field(&self, key: &str) -> Option<&ResolvedField> {
        self.fields.iter().find(|f| f.key() == key)
    }

    /// Whether this type is `key` or one of its subtypes
    pub fn is_a(&self, key: &TypeKey) -> bool {
        self.key == *key || self.ancestors.contains(key)
    }

    /// Inheritance distance to `key`: 0 for the type itself
    pub fn distance_to(&self, key: &TypeKey) -> Option<usize> {
        if self.key == *key {
            return Some(0);
        }
        self.ancestors.iter().position(|a| a == key).map(|i| i + 1)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.iter().filter(|f| f.spec.is_required())
    }
}

/// Non-fatal findings recorded while loading namespaces
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogWarning {
    /// A namespace redeclares a type that exists in one of its dependencies
    Shadowed {
        namespace: String,
        type_name: String,
        shadowed: TypeKey,
    },
}

/// Registry of loaded namespaces and their resolved types
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    /// Every loaded version per namespace, ascending; the last one is active
    namespaces: BTreeMap<String, Vec<Arc<Namespace>>>,
    load_order: Vec<NamespaceHandle>,
    resolved: HashMap<TypeKey, Arc<ResolvedType>>,
    warnings: Vec<CatalogWarning>,
    policy: ResolutionPolicy,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_policy(&mut self, policy: ResolutionPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    /// Load a YAML namespace document
    ///
    /// Loading an already loaded version with identical content is a no-op.
    /// On error the catalog is left unchanged.
    pub fn load_namespace(&mut self, document: &str) -> SchemaResult<NamespaceHandle> {
        let namespace = Namespace::parse(document)?;
        let handle = namespace.handle();

        if let Some(existing) = self.namespace_version(&namespace.name, namespace.version) {
            if existing.same_content(&namespace) {
                return Ok(handle);
            }
            return Err(SchemaError::ImmutableVersion {
                namespace: namespace.name,
                version: namespace.version.to_string(),
            });
        }

        let mut next = self.clone();
        next.insert_namespace(namespace)?;
        *self = next;

        info!(
            "Loaded namespace {} ({} types)",
            handle,
            self.namespace_version(&handle.name, handle.version)
                .map(|ns| ns.types.len())
                .unwrap_or_default()
        );
        Ok(handle)
    }

    fn insert_namespace(&mut self, namespace: Namespace) -> SchemaResult<()> {
        for dep in &namespace.dependencies {
            let unresolved = |detail: String| SchemaError::UnresolvedDependency {
                namespace: namespace.name.clone(),
                dependency: dep.name.clone(),
                required: dep.version.to_string(),
                detail,
            };
            if dep.name == namespace.name {
                return Err(unresolved(" (a namespace cannot depend on itself)".to_string()));
            }
            let active = self
                .namespace(&dep.name)
                .ok_or_else(|| unresolved(String::new()))?;
            if !active.version.satisfies(&dep.version) {
                return Err(unresolved(format!(
                    " (loaded version is {})",
                    active.version
                )));
            }
        }

        let mut names = HashSet::new();
        for type_spec in &namespace.types {
            if !names.insert(type_spec.name.as_str()) {
                return Err(SchemaError::DuplicateType {
                    namespace: namespace.name.clone(),
                    type_name: type_spec.name.clone(),
                });
            }
            check_fields(type_spec)?;
        }

        let versions = self.namespaces.entry(namespace.name.clone()).or_default();
        let lower = versions
            .iter()
            .rev()
            .find(|v| v.version < namespace.version)
            .cloned();
        let higher = versions
            .iter()
            .find(|v| v.version > namespace.version)
            .cloned();
        if let Some(lower) = &lower {
            check_compatibility(lower, &namespace)?;
        }
        if let Some(higher) = &higher {
            check_compatibility(&namespace, higher)?;
        }

        let namespace = Arc::new(namespace);
        let becomes_active = higher.is_none();
        versions.push(namespace.clone());
        versions.sort_by_key(|v| v.version);
        self.load_order.push(namespace.handle());

        if becomes_active {
            self.resolved.retain(|key, _| key.namespace != namespace.name);
            self.resolve_namespace_types(&namespace)?;
        }
        Ok(())
    }

    fn resolve_namespace_types(&mut self, namespace: &Namespace) -> SchemaResult<()> {
        let order = self.search_order(&namespace.name);
        let dependencies = &order[1..];

        // Parent -> child edges between types declared in this namespace
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..namespace.types.len())
            .map(|i| graph.add_node(i))
            .collect();
        let local: HashMap<&str, usize> = namespace
            .types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();
        for (i, type_spec) in namespace.types.iter().enumerate() {
            if let Some(parent) = &type_spec.parent
                && parent != &type_spec.name
                && let Some(&p) = local.get(parent.as_str())
            {
                graph.add_edge(nodes[p], nodes[i], ());
            }
        }
        let sorted = toposort(&graph, None).map_err(|cycle| {
            SchemaError::InheritanceCycle(namespace.types[graph[cycle.node_id()]].name.clone())
        })?;

        for node in sorted {
            let type_spec = &namespace.types[graph[node]];
            let parent = match &type_spec.parent {
                None => None,
                Some(parent) => {
                    let found = if parent != &type_spec.name && local.contains_key(parent.as_str()) {
                        self.resolved
                            .get(&TypeKey::new(&namespace.name, parent))
                            .cloned()
                    } else {
                        self.lookup_in(dependencies, parent)
                    };
                    Some(found.ok_or_else(|| SchemaError::UnknownParent {
                        type_name: type_spec.name.clone(),
                        parent: parent.clone(),
                    })?)
                }
            };
            let resolved = build_resolved(&namespace.name, type_spec, parent.as_deref())?;
            self.resolved
                .insert(resolved.key.clone(), Arc::new(resolved));
        }

        // Field targets may name any type visible from this namespace,
        // including types declared later in the same document
        for type_spec in &namespace.types {
            let key = TypeKey::new(&namespace.name, &type_spec.name);
            let Some(current) = self.resolved.get(&key) else {
                continue;
            };
            let mut updated = (**current).clone();
            for field in updated.fields.iter_mut() {
                if field.target.is_some() {
                    continue;
                }
                if let Some(type_inc) = &field.spec.type_inc {
                    let target = self.lookup_in(&order, type_inc).ok_or_else(|| {
                        SchemaError::InvalidField {
                            type_name: type_spec.name.clone(),
                            field: field.key().to_string(),
                            reason: format!("unknown type '{}'", type_inc),
                        }
                    })?;
                    field.target = Some(target.key.clone());
                }
            }
            self.resolved.insert(key, Arc::new(updated));
        }

        for type_spec in &namespace.types {
            if let Some(shadowed) = self.lookup_in(dependencies, &type_spec.name) {
                warn!(
                    "Namespace '{}' type '{}' shadows {}",
                    namespace.name, type_spec.name, shadowed.key
                );
                self.warnings.push(CatalogWarning::Shadowed {
                    namespace: namespace.name.clone(),
                    type_name: type_spec.name.clone(),
                    shadowed: shadowed.key.clone(),
                });
            }
        }
        Ok(())
    }

    fn lookup_in(&self, namespaces: &[String], type_name: &str) -> Option<Arc<ResolvedType>> {
        namespaces
            .iter()
            .find_map(|ns| self.resolved.get(&TypeKey::new(ns, type_name)).cloned())
    }

    /// Resolve a type name as seen from `namespace`
    ///
    /// The namespace itself is searched first, then its dependencies in
    /// declaration order, depth first.
    pub fn resolve_type(
        &self,
        namespace: &str,
        type_name: &str,
    ) -> Result<Arc<ResolvedType>, TypeResolutionError> {
        if !self.namespaces.contains_key(namespace) {
            return Err(TypeResolutionError::UnknownNamespace(namespace.to_string()));
        }
        self.lookup_in(&self.search_order(namespace), type_name)
            .ok_or_else(|| TypeResolutionError::UnknownType {
                namespace: namespace.to_string(),
                type_name: type_name.to_string(),
            })
    }

    pub fn get(&self, key: &TypeKey) -> Result<Arc<ResolvedType>, TypeResolutionError> {
        self.resolved
            .get(key)
            .cloned()
            .ok_or_else(|| TypeResolutionError::UnknownKey(key.clone()))
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.resolved.contains_key(key)
    }

    /// Whether `key` is `ancestor` or one of its subtypes
    pub fn is_a(&self, key: &TypeKey, ancestor: &TypeKey) -> bool {
        self.resolved
            .get(key)
            .is_some_and(|resolved| resolved.is_a(ancestor))
    }

    /// Resolve a type name without a namespace across every loaded namespace
    pub fn resolve_unqualified(
        &self,
        type_name: &str,
    ) -> Result<Arc<ResolvedType>, TypeResolutionError> {
        let candidates = self.types_named(type_name);
        if candidates.is_empty() {
            return Err(TypeResolutionError::UnknownType {
                namespace: "*".to_string(),
                type_name: type_name.to_string(),
            });
        }
        self.most_specific_type(&candidates)
    }

    /// Every resolved type with the given name, ordered by namespace
    pub fn types_named(&self, type_name: &str) -> Vec<TypeKey> {
        let mut keys: Vec<TypeKey> = self
            .resolved
            .keys()
            .filter(|k| k.name == type_name)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Pick the most specific of several candidate types
    ///
    /// Candidates that are ancestors of another candidate are dropped. Of
    /// the remaining ones, same-named redeclarations are tie-broken by the
    /// catalog's [`ResolutionPolicy`]; unrelated types are ambiguous.
    pub fn most_specific_type(
        &self,
        candidates: &[TypeKey],
    ) -> Result<Arc<ResolvedType>, TypeResolutionError> {
        let mut unique: Vec<TypeKey> = candidates.to_vec();
        unique.sort();
        unique.dedup();
        let resolved = unique
            .iter()
            .map(|k| self.get(k))
            .collect::<Result<Vec<_>, _>>()?;

        let remaining: Vec<Arc<ResolvedType>> = resolved
            .iter()
            .filter(|c| {
                !resolved
                    .iter()
                    .any(|other| other.key != c.key && other.ancestors.contains(&c.key))
            })
            .cloned()
            .collect();

        match remaining.as_slice() {
            [] => return Err(TypeResolutionError::NoCandidates),
            [single] => return Ok(single.clone()),
            _ => {}
        }

        let ambiguous = || TypeResolutionError::AmbiguousType {
            candidates: remaining.iter().map(|r| r.key.clone()).collect(),
        };
        let first_name = &remaining[0].key.name;
        if remaining.iter().any(|r| &r.key.name != first_name) {
            return Err(ambiguous());
        }

        let scores: Vec<usize> = match self.policy {
            ResolutionPolicy::Strict => return Err(ambiguous()),
            ResolutionPolicy::MostDependencies => remaining
                .iter()
                .map(|r| self.dependency_count(&r.key.namespace))
                .collect(),
            ResolutionPolicy::LatestLoaded => remaining
                .iter()
                .map(|r| self.load_position(&r.key.namespace).unwrap_or_default())
                .collect(),
        };
        let best = scores.iter().copied().max().unwrap_or_default();
        let mut winners = remaining
            .iter()
            .zip(&scores)
            .filter(|(_, s)| **s == best)
            .map(|(r, _)| r);
        match (winners.next(), winners.next()) {
            (Some(chosen), None) => {
                warn!(
                    "Type '{}' is declared by {} unrelated namespaces; chose {} ({} policy)",
                    first_name,
                    remaining.len(),
                    chosen.key,
                    self.policy
                );
                Ok(chosen.clone())
            }
            _ => Err(ambiguous()),
        }
    }

    /// Namespace names in lookup order: the namespace, then its dependencies
    /// in declaration order, depth first
    pub fn search_order(&self, namespace: &str) -> Vec<String> {
        fn visit(catalog: &TypeCatalog, name: &str, out: &mut Vec<String>) {
            if out.iter().any(|n| n == name) {
                return;
            }
            let Some(ns) = catalog.namespace(name) else {
                return;
            };
            out.push(name.to_string());
            for dep in &ns.dependencies {
                visit(catalog, &dep.name, out);
            }
        }
        let mut out = Vec::new();
        visit(self, namespace, &mut out);
        out
    }

    /// Number of transitive dependencies of a namespace
    pub fn dependency_count(&self, namespace: &str) -> usize {
        self.search_order(namespace).len().saturating_sub(1)
    }

    fn load_position(&self, namespace: &str) -> Option<usize> {
        self.load_order.iter().rposition(|h| h.name == namespace)
    }

    /// Active namespaces that no other loaded namespace depends on
    pub fn most_specific_namespaces(&self) -> Vec<String> {
        let depended_on: HashSet<&str> = self
            .namespaces
            .keys()
            .filter_map(|name| self.namespace(name))
            .flat_map(|ns| ns.dependencies.iter().map(|d| d.name.as_str()))
            .collect();
        self.namespaces
            .keys()
            .filter(|name| !depended_on.contains(name.as_str()))
            .cloned()
            .collect()
    }

    /// The named namespaces and everything they depend on, dependencies first
    pub fn namespace_closure(&self, names: &[String]) -> Vec<Arc<Namespace>> {
        fn visit(
            catalog: &TypeCatalog,
            name: &str,
            seen: &mut HashSet<String>,
            out: &mut Vec<Arc<Namespace>>,
        ) {
            if !seen.insert(name.to_string()) {
                return;
            }
            let Some(ns) = catalog.namespace(name) else {
                return;
            };
            for dep in &ns.dependencies {
                visit(catalog, &dep.name, seen, out);
            }
            out.push(ns.clone());
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in names {
            visit(self, name, &mut seen, &mut out);
        }
        out
    }

    /// Active version of a namespace
    pub fn namespace(&self, name: &str) -> Option<&Arc<Namespace>> {
        self.namespaces.get(name).and_then(|versions| versions.last())
    }

    pub fn namespace_version(&self, name: &str, version: Version) -> Option<&Arc<Namespace>> {
        self.namespaces
            .get(name)
            .and_then(|versions| versions.iter().find(|v| v.version == version))
    }

    pub fn versions(&self, name: &str) -> Vec<Version> {
        self.namespaces
            .get(name)
            .map(|versions| versions.iter().map(|v| v.version).collect())
            .unwrap_or_default()
    }

    /// Active namespace versions, ordered by name
    pub fn namespaces(&self) -> Vec<NamespaceHandle> {
        self.namespaces
            .values()
            .filter_map(|versions| versions.last())
            .map(|ns| ns.handle())
            .collect()
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<ResolvedType>> {
        self.resolved.values()
    }

    pub fn warnings(&self) -> &[CatalogWarning] {
        &self.warnings
    }
}

fn build_resolved(
    namespace: &str,
    spec: &TypeSpec,
    parent: Option<&ResolvedType>,
) -> SchemaResult<ResolvedType> {
    let key = TypeKey::new(namespace, &spec.name);
    let kind = match (spec.kind, parent) {
        (Some(kind), Some(p)) if kind != p.kind => {
            return Err(SchemaError::KindMismatch {
                type_name: spec.name.clone(),
                kind: format!("{:?}", kind).to_lowercase(),
                parent: p.key.to_string(),
                parent_kind: format!("{:?}", p.kind).to_lowercase(),
            });
        }
        (Some(kind), _) => kind,
        (None, Some(p)) => p.kind,
        (None, None) => SpecKind::Group,
    };

    let mut ancestors = Vec::new();
    let mut fields = Vec::new();
    if let Some(p) = parent {
        ancestors.push(p.key.clone());
        ancestors.extend(p.ancestors.iter().cloned());
        fields = p.fields.clone();
    }

    for own in &spec.fields {
        let field = ResolvedField {
            spec: own.clone(),
            target: None,
            declared_by: key.clone(),
        };
        match fields.iter().position(|f| f.key() == own.key()) {
            Some(pos) => {
                let inherited = &fields[pos];
                if inherited.spec.is_required() && !own.is_required() {
                    return Err(SchemaError::RequiredFieldDropped {
                        type_name: spec.name.clone(),
                        field: own.key().to_string(),
                        parent: inherited.declared_by.clone(),
                    });
                }
                fields[pos] = field;
            }
            None => fields.push(field),
        }
    }

    Ok(ResolvedType {
        kind,
        is_abstract: spec.is_abstract,
        dtype: spec.dtype.or_else(|| parent.and_then(|p| p.dtype)),
        shape: spec
            .shape
            .clone()
            .or_else(|| parent.and_then(|p| p.shape.clone())),
        default_name: spec.default_name.clone(),
        doc: spec.doc.clone(),
        ancestors,
        fields,
        key,
    })
}

fn check_fields(spec: &TypeSpec) -> SchemaResult<()> {
    let mut seen = HashSet::new();
    for field in &spec.fields {
        let key = field.key();
        let invalid = |reason: &str| SchemaError::InvalidField {
            type_name: spec.name.clone(),
            field: if key.is_empty() {
                "<unnamed>".to_string()
            } else {
                key.to_string()
            },
            reason: reason.to_string(),
        };
        if key.is_empty() {
            return Err(invalid("field needs a name or a type_inc"));
        }
        if field.name.as_deref().is_some_and(|n| n.contains('/')) {
            return Err(invalid("field names cannot contain '/'"));
        }
        match field.kind {
            FieldKind::Attribute => {
                if field.type_inc.is_some() {
                    return Err(invalid("attributes cannot hold typed values"));
                }
                if field.dtype.is_none() || field.name.is_none() {
                    return Err(invalid("attributes need a name and a dtype"));
                }
            }
            FieldKind::Dataset => {
                if field.type_inc.is_none() && (field.dtype.is_none() || field.name.is_none()) {
                    return Err(invalid("untyped datasets need a name and a dtype"));
                }
            }
            FieldKind::Group => {
                if field.type_inc.is_none() {
                    return Err(invalid("group fields need a type_inc"));
                }
            }
            FieldKind::Link => {
                if field.type_inc.is_none() || field.name.is_none() {
                    return Err(invalid("links need a name and a target type_inc"));
                }
            }
            FieldKind::IndexedColumn => {
                if field.dtype.is_none() || field.name.is_none() {
                    return Err(invalid("indexed columns need a name and a dtype"));
                }
            }
        }
        if !seen.insert(key) {
            return Err(SchemaError::DuplicateField {
                type_name: spec.name.clone(),
                field: key.to_string(),
            });
        }
    }
    Ok(())
}

/// A newer version of the same major version keeps every required field
fn check_compatibility(older: &Namespace, newer: &Namespace) -> SchemaResult<()> {
    if older.version.major != newer.version.major {
        return Ok(());
    }
    for old_type in &older.types {
        for old_field in old_type.fields.iter().filter(|f| f.is_required()) {
            let kept = newer
                .type_spec(&old_type.name)
                .and_then(|t| t.fields.iter().find(|f| f.key() == old_field.key()))
                .is_some_and(|f| {
                    f.kind == old_field.kind && f.dtype == old_field.dtype && f.is_required()
                });
            if !kept {
                return Err(SchemaError::RequiredFieldRemoved {
                    namespace: newer.name.clone(),
                    version: newer.version.to_string(),
                    previous: older.version.to_string(),
                    type_name: old_type.name.clone(),
                    field: old_field.key().to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::core::{CORE_NAMESPACE, core_catalog};

    const EXT: &str = r#"
namespace:
  name: ext
  version: "0.1.0"
  dependencies:
    - name: core
      version: "2.0.0"
types:
  - neurodata_type_def: TimeSeries
    neurodata_type_inc: TimeSeries
    doc: TimeSeries with an extra gain attribute
    fields:
      - name: gain
        kind: attribute
        dtype: float64
        required: false
  - neurodata_type_def: LickSeries
    neurodata_type_inc: TimeSeries
    fields:
      - name: tongue
        kind: attribute
        dtype: text
"#;

    #[test]
    fn test_core_types_resolve() {
        let catalog = core_catalog();
        let series = catalog.resolve_type(CORE_NAMESPACE, "ElectricalSeries").unwrap();
        assert_eq!(series.key, TypeKey::new("core", "ElectricalSeries"));
        assert!(series.is_a(&TypeKey::new("core", "TimeSeries")));
        assert!(series.is_a(&TypeKey::new("core", "Container")));
        assert!(series.field("data").is_some());
        assert_eq!(
            series.field("electrodes").and_then(|f| f.target.clone()),
            Some(TypeKey::new("core", "DynamicTableRegion"))
        );
        let region = catalog.resolve_type("core", "DynamicTableRegion").unwrap();
        assert_eq!(region.kind, SpecKind::Dataset);
    }

    #[test]
    fn test_shadowing_and_lookup_order() {
        let mut catalog = core_catalog();
        catalog.load_namespace(EXT).unwrap();

        let ext_series = catalog.resolve_type("ext", "TimeSeries").unwrap();
        assert_eq!(ext_series.key.namespace, "ext");
        assert!(ext_series.field("gain").is_some());
        assert!(ext_series.field("data").is_some());
        assert!(ext_series.is_a(&TypeKey::new("core", "TimeSeries")));

        let core_series = catalog.resolve_type("core", "TimeSeries").unwrap();
        assert_eq!(core_series.key.namespace, "core");
        assert!(core_series.field("gain").is_none());

        // LickSeries extends ext's TimeSeries, not core's
        let lick = catalog.resolve_type("ext", "LickSeries").unwrap();
        assert_eq!(lick.ancestors[0], TypeKey::new("ext", "TimeSeries"));

        // Types not redeclared fall through to the dependency
        let device = catalog.resolve_type("ext", "Device").unwrap();
        assert_eq!(device.key.namespace, "core");

        assert!(matches!(
            &catalog.warnings()[0],
            CatalogWarning::Shadowed { namespace, type_name, .. }
                if namespace == "ext" && type_name == "TimeSeries"
        ));
    }

    #[test]
    fn test_unknown_lookups() {
        let catalog = core_catalog();
        assert!(matches!(
            catalog.resolve_type("nope", "TimeSeries"),
            Err(TypeResolutionError::UnknownNamespace(_))
        ));
        assert!(matches!(
            catalog.resolve_type("core", "Nope"),
            Err(TypeResolutionError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_idempotent_and_immutable_versions() {
        let mut catalog = core_catalog();
        catalog.load_namespace(EXT).unwrap();
        catalog.load_namespace(EXT).unwrap();
        assert_eq!(catalog.versions("ext").len(), 1);

        let changed = EXT.replace("dtype: text", "dtype: int32");
        assert!(matches!(
            catalog.load_namespace(&changed),
            Err(SchemaError::ImmutableVersion { .. })
        ));
    }

    #[test]
    fn test_required_field_removed_in_minor_version() {
        let mut catalog = core_catalog();
        catalog.load_namespace(EXT).unwrap();
        let next = EXT
            .replace("0.1.0", "0.2.0")
            .replace("dtype: text", "dtype: text\n        required: false");
        assert!(matches!(
            catalog.load_namespace(&next),
            Err(SchemaError::RequiredFieldRemoved { field, .. }) if field == "tongue"
        ));

        // A new major version may break compatibility
        let major = EXT
            .replace("0.1.0", "1.0.0")
            .replace("dtype: text", "dtype: text\n        required: false");
        catalog.load_namespace(&major).unwrap();
        assert_eq!(catalog.namespace("ext").unwrap().version, Version::new(1, 0, 0));
    }

    #[test]
    fn test_failed_load_leaves_catalog_unchanged() {
        let mut catalog = core_catalog();
        let before = catalog.namespaces();
        let doc = r#"
namespace:
  name: broken
  version: "1.0.0"
  dependencies:
    - name: core
      version: "2.0.0"
types:
  - neurodata_type_def: Good
    neurodata_type_inc: Container
  - neurodata_type_def: Bad
    neurodata_type_inc: Missing
"#;
        assert!(matches!(
            catalog.load_namespace(doc),
            Err(SchemaError::UnknownParent { parent, .. }) if parent == "Missing"
        ));
        assert_eq!(catalog.namespaces(), before);
        assert!(catalog.types_named("Good").is_empty());
    }

    #[test]
    fn test_inheritance_cycle() {
        let mut catalog = core_catalog();
        let doc = r#"
namespace:
  name: loop
  version: "1.0.0"
  dependencies:
    - name: core
      version: "2.0.0"
types:
  - neurodata_type_def: A
    neurodata_type_inc: B
  - neurodata_type_def: B
    neurodata_type_inc: A
"#;
        assert!(matches!(
            catalog.load_namespace(doc),
            Err(SchemaError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn test_required_field_cannot_be_dropped() {
        let mut catalog = core_catalog();
        let doc = r#"
namespace:
  name: lax
  version: "1.0.0"
  dependencies:
    - name: core
      version: "2.0.0"
types:
  - neurodata_type_def: LaxGroup
    neurodata_type_inc: ElectrodeGroup
    fields:
      - name: location
        kind: attribute
        dtype: text
        required: false
"#;
        assert!(matches!(
            catalog.load_namespace(doc),
            Err(SchemaError::RequiredFieldDropped { field, .. }) if field == "location"
        ));
    }

    #[test]
    fn test_unresolved_dependency() {
        let mut catalog = core_catalog();
        let doc = EXT.replace("version: \"2.0.0\"", "version: \"3.0.0\"");
        assert!(matches!(
            catalog.load_namespace(&doc),
            Err(SchemaError::UnresolvedDependency { dependency, .. }) if dependency == "core"
        ));

        let mut empty = TypeCatalog::new();
        assert!(matches!(
            empty.load_namespace(EXT),
            Err(SchemaError::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn test_most_specific_type() {
        let mut catalog = core_catalog();
        catalog.load_namespace(EXT).unwrap();

        // Ancestors are dropped
        let chosen = catalog
            .most_specific_type(&[
                TypeKey::new("core", "TimeSeries"),
                TypeKey::new("ext", "TimeSeries"),
            ])
            .unwrap();
        assert_eq!(chosen.key, TypeKey::new("ext", "TimeSeries"));

        // Unrelated types are ambiguous
        assert!(matches!(
            catalog.most_specific_type(&[
                TypeKey::new("core", "Device"),
                TypeKey::new("core", "Subject"),
            ]),
            Err(TypeResolutionError::AmbiguousType { .. })
        ));
        assert!(matches!(
            catalog.most_specific_type(&[]),
            Err(TypeResolutionError::NoCandidates)
        ));
    }

    #[test]
    fn test_tie_break_policies() {
        let other = r#"
namespace:
  name: other
  version: "1.0.0"
  dependencies:
    - name: core
      version: "2.0.0"
types:
  - neurodata_type_def: Probe
    neurodata_type_inc: Device
"#;
        let deeper = r#"
namespace:
  name: deeper
  version: "1.0.0"
  dependencies:
    - name: ext
      version: "0.1.0"
types:
  - neurodata_type_def: Probe
    neurodata_type_inc: Device
"#;
        let mut catalog = core_catalog();
        catalog.load_namespace(EXT).unwrap();
        catalog.load_namespace(deeper).unwrap();
        catalog.load_namespace(other).unwrap();

        let candidates = catalog.types_named("Probe");
        assert_eq!(candidates.len(), 2);

        let chosen = catalog.most_specific_type(&candidates).unwrap();
        assert_eq!(chosen.key.namespace, "deeper");

        catalog.set_policy(ResolutionPolicy::LatestLoaded);
        let chosen = catalog.most_specific_type(&candidates).unwrap();
        assert_eq!(chosen.key.namespace, "other");

        catalog.set_policy(ResolutionPolicy::Strict);
        assert!(matches!(
            catalog.resolve_unqualified("Probe"),
            Err(TypeResolutionError::AmbiguousType { .. })
        ));
    }

    #[test]
    fn test_namespace_queries() {
        let mut catalog = core_catalog();
        catalog.load_namespace(EXT).unwrap();
        assert_eq!(catalog.search_order("ext"), vec!["ext", "core"]);
        assert_eq!(catalog.dependency_count("ext"), 1);
        assert_eq!(catalog.most_specific_namespaces(), vec!["ext".to_string()]);
        let closure: Vec<String> = catalog
            .namespace_closure(&["ext".to_string()])
            .iter()
            .map(|ns| ns.name.clone())
            .collect();
        assert_eq!(closure, vec!["core", "ext"]);
    }

    #[test]
    fn test_invalid_fields() {
        let mut catalog = core_catalog();
        let doc = r#"
namespace:
  name: bad
  version: "1.0.0"
  dependencies:
    - name: core
      version: "2.0.0"
types:
  - neurodata_type_def: Twice
    neurodata_type_inc: Container
    fields:
      - name: a
        kind: attribute
        dtype: text
      - name: a
        kind: attribute
        dtype: int32
"#;
        assert!(matches!(
            catalog.load_namespace(doc),
            Err(SchemaError::DuplicateField { .. })
        ));

        let doc = doc.replace("dtype: int32", "dtype: int32\n        type_inc: Device");
        assert!(matches!(
            catalog.load_namespace(&doc),
            Err(SchemaError::InvalidField { .. })
        ));
    }
}
