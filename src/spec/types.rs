//! Schema records: data types, shapes, field and type specifications

use crate::models::value::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element data type of an attribute or dataset
///
/// Schema documents may use the aliases `int`, `uint`, `float`, `double`,
/// `utf8`, `ascii` and `str`. `Numeric` only appears in specifications and
/// accepts any numeric element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int8,
    Int16,
    #[serde(alias = "int")]
    Int32,
    Int64,
    Uint8,
    Uint16,
    #[serde(alias = "uint")]
    Uint32,
    Uint64,
    #[serde(alias = "float")]
    Float32,
    #[serde(alias = "double")]
    Float64,
    Bool,
    #[serde(alias = "utf8", alias = "ascii", alias = "str")]
    Text,
    Isodatetime,
    Numeric,
}

impl DType {
    pub fn is_int(self) -> bool {
        matches!(self, DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64)
    }

    pub fn is_uint(self) -> bool {
        matches!(
            self,
            DType::Uint8 | DType::Uint16 | DType::Uint32 | DType::Uint64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_int() || self.is_uint() || self.is_float() || self == DType::Numeric
    }

    pub fn is_textual(self) -> bool {
        matches!(self, DType::Text | DType::Isodatetime)
    }

    /// Width in bits of fixed-size numeric types, 0 otherwise
    pub fn bits(self) -> u32 {
        match self {
            DType::Int8 | DType::Uint8 => 8,
            DType::Int16 | DType::Uint16 => 16,
            DType::Int32 | DType::Uint32 | DType::Float32 => 32,
            DType::Int64 | DType::Uint64 | DType::Float64 => 64,
            _ => 0,
        }
    }

    /// Whether a value stored as `actual` satisfies a specification of `self`
    ///
    /// The same type always matches. Otherwise a narrower type of a compatible
    /// family is accepted: ints take narrower ints and strictly narrower uints,
    /// floats take narrower floats and strictly narrower integers.
    pub fn accepts(self, actual: DType) -> bool {
        if self == actual {
            return true;
        }
        match self {
            DType::Numeric => actual.is_numeric(),
            DType::Text => actual == DType::Isodatetime,
            s if s.is_int() => {
                (actual.is_int() && actual.bits() <= s.bits())
                    || (actual.is_uint() && actual.bits() < s.bits())
            }
            s if s.is_uint() => actual.is_uint() && actual.bits() <= s.bits(),
            s if s.is_float() => {
                (actual.is_float() && actual.bits() <= s.bits())
                    || ((actual.is_int() || actual.is_uint()) && actual.bits() < s.bits())
            }
            _ => false,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Uint64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Text => "text",
            DType::Isodatetime => "isodatetime",
            DType::Numeric => "numeric",
        };
        f.write_str(name)
    }
}

/// Allowed shapes of an attribute or dataset
///
/// A `None` extent accepts any length along that axis; an empty shape is a
/// scalar. Documents write either one shape (`[null, 2]`) or a list of
/// alternatives (`[[null], [null, 2]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShapeSpec {
    Single(Vec<Option<usize>>),
    Alternatives(Vec<Vec<Option<usize>>>),
}

impl ShapeSpec {
    pub fn alternatives(&self) -> Vec<&[Option<usize>]> {
        match self {
            ShapeSpec::Single(shape) => vec![shape.as_slice()],
            ShapeSpec::Alternatives(shapes) => shapes.iter().map(|s| s.as_slice()).collect(),
        }
    }

    pub fn matches(&self, shape: &[usize]) -> bool {
        self.alternatives().iter().any(|allowed| {
            allowed.len() == shape.len()
                && allowed
                    .iter()
                    .zip(shape)
                    .all(|(extent, actual)| extent.is_none_or(|e| e == *actual))
        })
    }

    /// Whether any allowed shape has `rank` axes; used for streams whose extent is unknown
    pub fn allows_rank(&self, rank: usize) -> bool {
        self.alternatives().iter().any(|allowed| allowed.len() == rank)
    }
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |shape: &[Option<usize>]| {
            let dims: Vec<String> = shape
                .iter()
                .map(|d| d.map(|n| n.to_string()).unwrap_or_else(|| "*".to_string()))
                .collect();
            format!("[{}]", dims.join(", "))
        };
        let rendered: Vec<String> = self.alternatives().into_iter().map(render).collect();
        f.write_str(&rendered.join(" | "))
    }
}

/// How many values a field holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    #[serde(alias = "1")]
    ExactlyOne,
    #[serde(alias = "?")]
    ZeroOrOne,
    #[serde(alias = "*")]
    ZeroOrMore,
    #[serde(alias = "+")]
    OneOrMore,
}

impl Cardinality {
    pub fn min(self) -> usize {
        match self {
            Cardinality::ExactlyOne | Cardinality::OneOrMore => 1,
            Cardinality::ZeroOrOne | Cardinality::ZeroOrMore => 0,
        }
    }

    pub fn max(self) -> Option<usize> {
        match self {
            Cardinality::ExactlyOne | Cardinality::ZeroOrOne => Some(1),
            Cardinality::ZeroOrMore | Cardinality::OneOrMore => None,
        }
    }

    pub fn allows_many(self) -> bool {
        self.max().is_none()
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::ExactlyOne => write!(f, "exactly one"),
            Cardinality::ZeroOrOne => write!(f, "zero or one"),
            Cardinality::ZeroOrMore => write!(f, "zero or more"),
            Cardinality::OneOrMore => write!(f, "one or more"),
        }
    }
}

/// Container node a field maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Attribute,
    Dataset,
    Group,
    Link,
    IndexedColumn,
}

impl FieldKind {
    /// Write order: attributes, datasets, nested groups, links
    pub fn write_rank(self) -> u8 {
        match self {
            FieldKind::Attribute => 0,
            FieldKind::Dataset => 1,
            FieldKind::IndexedColumn => 2,
            FieldKind::Group => 3,
            FieldKind::Link => 4,
        }
    }
}

/// Whether a type maps to a group or a dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    #[default]
    Group,
    Dataset,
}

/// Literal default of an optional field as written in a schema document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl DefaultValue {
    pub fn to_scalar(&self) -> Scalar {
        match self {
            DefaultValue::Bool(v) => Scalar::Bool(*v),
            DefaultValue::Int(v) => Scalar::Int(*v),
            DefaultValue::Float(v) => Scalar::Float(*v),
            DefaultValue::Text(v) => Scalar::Text(v.clone()),
        }
    }
}

/// One field of a type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Fixed node name; absent for typed children named by the child itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc: String,
    /// Type of a nested child, or target type of a link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_inc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeSpec>,
    #[serde(default)]
    pub quantity: Cardinality,
    /// Overrides the requirement implied by `quantity`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub deprecated: bool,
}

impl FieldSpec {
    /// Key the field is stored under: its name, or the child type for unnamed fields
    pub fn key(&self) -> &str {
        self.name
            .as_deref()
            .or(self.type_inc.as_deref())
            .unwrap_or_default()
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.quantity.min() > 0)
    }

    /// Group fields and typed dataset fields hold child instances
    pub fn holds_children(&self) -> bool {
        match self.kind {
            FieldKind::Group => true,
            FieldKind::Dataset => self.type_inc.is_some(),
            _ => false,
        }
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn default_value(&self) -> Option<Scalar> {
        self.default.as_ref().map(DefaultValue::to_scalar)
    }
}

/// A type definition as declared in one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    #[serde(rename = "neurodata_type_def")]
    pub name: String,
    #[serde(
        rename = "neurodata_type_inc",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent: Option<String>,
    /// Inherited from the parent when absent; root types default to groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SpecKind>,
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Fully qualified type reference: declaring namespace plus type name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey {
    pub namespace: String,
    pub name: String,
}

impl TypeKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}
