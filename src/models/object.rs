//! Object identity and instances

use super::value::{FieldValue, LinkTarget};
use crate::spec::TypeKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Field key under which the payload of dataset-kind instances is reported
pub const DATA_FIELD: &str = "(data)";

/// Stable identity of an instance, persisted as the `object_id` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an instance was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub location: String,
    pub path: String,
}

/// One typed object of the graph
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInstance {
    pub id: ObjectId,
    pub type_key: TypeKey,
    pub name: String,
    pub parent: Option<ObjectId>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Payload of dataset-kind types
    pub data: Option<FieldValue>,
    /// Absent for instances created in memory
    pub origin: Option<Origin>,
    /// Changed since it was read (always true for new instances)
    pub modified: bool,
}

impl ObjectInstance {
    pub fn new(type_key: TypeKey, name: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            type_key,
            name: name.into(),
            parent: None,
            fields: BTreeMap::new(),
            data: None,
            origin: None,
            modified: true,
        }
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Instances this one refers to through links and regions, with the field key
    pub fn references(&self) -> Vec<(String, ObjectId)> {
        let mut refs = Vec::new();
        for (key, value) in &self.fields {
            match value {
                FieldValue::Link(LinkTarget::Local(target)) => refs.push((key.clone(), *target)),
                FieldValue::Region(region) => refs.push((key.clone(), region.table)),
                _ => {}
            }
        }
        if let Some(FieldValue::Region(region)) = &self.data {
            refs.push((DATA_FIELD.to_string(), region.table));
        }
        refs
    }

    /// Child ids in field order
    pub fn child_ids(&self) -> Vec<ObjectId> {
        self.fields.values().flat_map(|v| v.child_ids()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::value::RegionRefs;

    #[test]
    fn test_object_id_parse() {
        let id = ObjectId::new();
        assert_eq!(ObjectId::parse(&id.to_string()), Some(id));
        assert_eq!(ObjectId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_references() {
        let target = ObjectId::new();
        let table = ObjectId::new();
        let mut instance = ObjectInstance::new(TypeKey::new("core", "ElectrodeGroup"), "g");
        instance
            .fields
            .insert("device".into(), FieldValue::Link(LinkTarget::Local(target)));
        instance.data = Some(FieldValue::Region(RegionRefs::rows(table, &[0, 1])));
        let refs = instance.references();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&("device".to_string(), target)));
        assert!(refs.contains(&(DATA_FIELD.to_string(), table)));
    }
}
