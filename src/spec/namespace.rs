//! Namespace documents and versions

use super::error::{SchemaError, SchemaResult};
use super::types::TypeSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)$").expect("valid version pattern")
});

/// Semantic version of a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(text: &str) -> SchemaResult<Self> {
        let invalid = || SchemaError::InvalidVersion(text.to_string());
        let caps = VERSION_PATTERN.captures(text.trim()).ok_or_else(invalid)?;
        let part = |i: usize| -> SchemaResult<u64> {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(invalid)
        };
        Ok(Self::new(part(1)?, part(2)?, part(3)?))
    }

    /// Same major version and not older than `required`
    pub fn satisfies(&self, required: &Version) -> bool {
        self.major == required.major && self >= required
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for Version {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// Raw namespace document as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceDocument {
    pub namespace: NamespaceHeader,
    #[serde(default)]
    pub types: Vec<TypeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceHeader {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub doc: String,
    #[serde(default)]
    pub dependencies: Vec<RawDependency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDependency {
    pub name: String,
    pub version: String,
}

/// Dependency on another namespace, satisfied by any loaded version with the
/// same major version that is at least `version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub version: Version,
}

/// A parsed, immutable namespace version
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub version: Version,
    pub doc: String,
    pub dependencies: Vec<Dependency>,
    pub types: Vec<TypeSpec>,
    /// Document text, kept so the namespace can be cached inside containers
    pub source: String,
}

impl Namespace {
    /// Parse a YAML namespace document
    pub fn parse(document: &str) -> SchemaResult<Self> {
        let raw: NamespaceDocument =
            serde_yaml::from_str(document).map_err(|e| SchemaError::Parse(e.to_string()))?;
        if raw.namespace.name.trim().is_empty() {
            return Err(SchemaError::Parse("namespace name is empty".to_string()));
        }
        let version = Version::parse(&raw.namespace.version)?;
        let dependencies = raw
            .namespace
            .dependencies
            .iter()
            .map(|d| {
                Ok(Dependency {
                    name: d.name.clone(),
                    version: Version::parse(&d.version)?,
                })
            })
            .collect::<SchemaResult<Vec<_>>>()?;

        Ok(Self {
            name: raw.namespace.name,
            version,
            doc: raw.namespace.doc,
            dependencies,
            types: raw.types,
            source: document.to_string(),
        })
    }

    pub fn handle(&self) -> NamespaceHandle {
        NamespaceHandle {
            name: self.name.clone(),
            version: self.version,
        }
    }

    pub fn type_spec(&self, name: &str) -> Option<&TypeSpec> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Same declared content (types and dependencies), ignoring formatting
    pub fn same_content(&self, other: &Namespace) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.dependencies == other.dependencies
            && self.types == other.types
    }
}

/// Identifies a loaded namespace version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceHandle {
    pub name: String,
    pub version: Version,
}

impl fmt::Display for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}
