//! Built-in core namespace

use super::catalog::{ResolvedType, TypeCatalog};
use super::error::TypeResolutionError;
use super::types::TypeKey;
use std::sync::Arc;

pub const CORE_NAMESPACE: &str = "core";

/// YAML source of the core namespace
pub const CORE_SCHEMA: &str = include_str!("../../schemas/core.namespace.yaml");

/// A catalog with the core namespace loaded
pub fn core_catalog() -> TypeCatalog {
    let mut catalog = TypeCatalog::new();
    // The embedded document is covered by the tests below; a failure here
    // would leave an empty catalog that reports every type as unknown.
    if let Err(e) = catalog.load_namespace(CORE_SCHEMA) {
        tracing::error!("Built-in core namespace failed to load: {}", e);
    }
    catalog
}

/// Key of a core type
pub fn core_type(name: &str) -> TypeKey {
    TypeKey::new(CORE_NAMESPACE, name)
}

/// Resolve a core type in `catalog`
pub fn resolve_core(
    catalog: &TypeCatalog,
    name: &str,
) -> Result<Arc<ResolvedType>, TypeResolutionError> {
    catalog.get(&core_type(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_schema_loads() {
        let mut catalog = TypeCatalog::new();
        let handle = catalog.load_namespace(CORE_SCHEMA).unwrap();
        assert_eq!(handle.name, CORE_NAMESPACE);
        for name in [
            "Container",
            "Data",
            "NWBDataInterface",
            "VectorData",
            "DynamicTableRegion",
            "DynamicTable",
            "Units",
            "TimeSeries",
            "ElectricalSeries",
            "Device",
            "ElectrodeGroup",
            "Subject",
            "ProcessingModule",
            "NWBFile",
        ] {
            assert!(resolve_core(&catalog, name).is_ok(), "missing {}", name);
        }
        assert!(catalog.warnings().is_empty());
    }

    #[test]
    fn test_abstract_and_defaults() {
        let catalog = core_catalog();
        assert!(resolve_core(&catalog, "NWBDataInterface").unwrap().is_abstract);
        let units = resolve_core(&catalog, "Units").unwrap();
        assert_eq!(units.default_name.as_deref(), Some("units"));
        assert!(units.field("id").is_some());
        assert!(units.field("spike_times").is_some());
    }
}
