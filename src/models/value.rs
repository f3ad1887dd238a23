//! Field values
//!
//! Scalars, in-memory arrays, lazy dataset handles, single-use stream
//! sources, ragged arrays, region references, child ids and links.

use super::error::{ObjectError, ObjectResult};
use super::object::ObjectId;
use crate::spec::DType;
use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// A single value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Text(String),
    DateTime(DateTime<FixedOffset>),
}

impl Scalar {
    /// Natural data type of the value
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Int(_) => DType::Int64,
            Scalar::UInt(_) => DType::Uint64,
            Scalar::Float(_) => DType::Float64,
            Scalar::Bool(_) => DType::Bool,
            Scalar::Text(_) => DType::Text,
            Scalar::DateTime(_) => DType::Isodatetime,
        }
    }

    /// Whether the value is representable in `dtype`
    pub fn fits(&self, dtype: DType) -> bool {
        match (self, dtype) {
            (Scalar::Int(_) | Scalar::UInt(_) | Scalar::Float(_), DType::Numeric) => true,
            (Scalar::Int(v), d) if d.is_int() => {
                let (min, max) = int_bounds(d);
                (min..=max).contains(v)
            }
            (Scalar::Int(v), d) if d.is_uint() => *v >= 0 && (*v as u64) <= uint_max(d),
            (Scalar::UInt(v), d) if d.is_uint() => *v <= uint_max(d),
            (Scalar::UInt(v), d) if d.is_int() => *v <= int_bounds(d).1 as u64,
            (Scalar::Int(_) | Scalar::UInt(_) | Scalar::Float(_), d) => d.is_float(),
            (Scalar::Bool(_), DType::Bool) => true,
            (Scalar::Text(_), DType::Text) => true,
            (Scalar::Text(s), DType::Isodatetime) => DateTime::parse_from_rfc3339(s).is_ok(),
            (Scalar::DateTime(_), DType::Isodatetime | DType::Text) => true,
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::UInt(v) => Some(*v),
            Scalar::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            Scalar::Int(v) => Some(*v as f64),
            Scalar::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Text(v) => write!(f, "{:?}", v),
            Scalar::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

fn int_bounds(dtype: DType) -> (i64, i64) {
    match dtype {
        DType::Int8 => (i8::MIN as i64, i8::MAX as i64),
        DType::Int16 => (i16::MIN as i64, i16::MAX as i64),
        DType::Int32 => (i32::MIN as i64, i32::MAX as i64),
        _ => (i64::MIN, i64::MAX),
    }
}

fn uint_max(dtype: DType) -> u64 {
    match dtype {
        DType::Uint8 => u8::MAX as u64,
        DType::Uint16 => u16::MAX as u64,
        DType::Uint32 => u32::MAX as u64,
        _ => u64::MAX,
    }
}

/// Element storage of an array; the element type family follows the dtype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum ArrayValues {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
}

impl ArrayValues {
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Int(v) => v.len(),
            ArrayValues::UInt(v) => v.len(),
            ArrayValues::Float(v) => v.len(),
            ArrayValues::Bool(v) => v.len(),
            ArrayValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stores(&self, dtype: DType) -> bool {
        match self {
            ArrayValues::Int(_) => dtype.is_int(),
            ArrayValues::UInt(_) => dtype.is_uint(),
            ArrayValues::Float(_) => dtype.is_float(),
            ArrayValues::Bool(_) => dtype == DType::Bool,
            ArrayValues::Text(_) => dtype.is_textual(),
        }
    }

    fn slice(&self, range: Range<usize>) -> ArrayValues {
        match self {
            ArrayValues::Int(v) => ArrayValues::Int(v[range].to_vec()),
            ArrayValues::UInt(v) => ArrayValues::UInt(v[range].to_vec()),
            ArrayValues::Float(v) => ArrayValues::Float(v[range].to_vec()),
            ArrayValues::Bool(v) => ArrayValues::Bool(v[range].to_vec()),
            ArrayValues::Text(v) => ArrayValues::Text(v[range].to_vec()),
        }
    }

    fn extend(&mut self, other: &ArrayValues) -> bool {
        match (self, other) {
            (ArrayValues::Int(a), ArrayValues::Int(b)) => a.extend_from_slice(b),
            (ArrayValues::UInt(a), ArrayValues::UInt(b)) => a.extend_from_slice(b),
            (ArrayValues::Float(a), ArrayValues::Float(b)) => a.extend_from_slice(b),
            (ArrayValues::Bool(a), ArrayValues::Bool(b)) => a.extend_from_slice(b),
            (ArrayValues::Text(a), ArrayValues::Text(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    fn scalar_at(&self, index: usize) -> Option<Scalar> {
        match self {
            ArrayValues::Int(v) => v.get(index).map(|x| Scalar::Int(*x)),
            ArrayValues::UInt(v) => v.get(index).map(|x| Scalar::UInt(*x)),
            ArrayValues::Float(v) => v.get(index).map(|x| Scalar::Float(*x)),
            ArrayValues::Bool(v) => v.get(index).map(|x| Scalar::Bool(*x)),
            ArrayValues::Text(v) => v.get(index).map(|x| Scalar::Text(x.clone())),
        }
    }

    fn empty_like(&self) -> ArrayValues {
        self.slice(0..0)
    }
}

/// An in-memory n-dimensional array in row-major order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayData {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub values: ArrayValues,
}

impl ArrayData {
    pub fn new(dtype: DType, shape: Vec<usize>, values: ArrayValues) -> ObjectResult<Self> {
        if dtype == DType::Numeric {
            return Err(ObjectError::InvalidArray(
                "'numeric' is not a concrete element type".to_string(),
            ));
        }
        if !values.stores(dtype) {
            return Err(ObjectError::InvalidArray(format!(
                "values cannot be stored as {}",
                dtype
            )));
        }
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(ObjectError::InvalidArray(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        Ok(Self {
            dtype,
            shape,
            values,
        })
    }

    pub fn from_i64(values: Vec<i64>) -> Self {
        Self {
            dtype: DType::Int64,
            shape: vec![values.len()],
            values: ArrayValues::Int(values),
        }
    }

    pub fn from_u64(values: Vec<u64>) -> Self {
        Self {
            dtype: DType::Uint64,
            shape: vec![values.len()],
            values: ArrayValues::UInt(values),
        }
    }

    pub fn from_f64(values: Vec<f64>) -> Self {
        Self {
            dtype: DType::Float64,
            shape: vec![values.len()],
            values: ArrayValues::Float(values),
        }
    }

    pub fn from_bools(values: Vec<bool>) -> Self {
        Self {
            dtype: DType::Bool,
            shape: vec![values.len()],
            values: ArrayValues::Bool(values),
        }
    }

    pub fn from_text<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        Self {
            dtype: DType::Text,
            shape: vec![values.len()],
            values: ArrayValues::Text(values),
        }
    }

    /// Same values with a different shape
    pub fn reshape(mut self, shape: Vec<usize>) -> ObjectResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != self.values.len() {
            return Err(ObjectError::InvalidArray(format!(
                "cannot reshape {} values to {:?}",
                self.values.len(),
                shape
            )));
        }
        self.shape = shape;
        Ok(self)
    }

    /// Convert to another dtype; every value must be representable
    pub fn cast(&self, dtype: DType) -> ObjectResult<Self> {
        for i in 0..self.values.len() {
            if let Some(value) = self.values.scalar_at(i)
                && !value.fits(dtype)
            {
                return Err(ObjectError::InvalidArray(format!(
                    "value {} does not fit {}",
                    value, dtype
                )));
            }
        }
        let values = match &self.values {
            ArrayValues::Int(v) if dtype.is_uint() => {
                ArrayValues::UInt(v.iter().map(|x| *x as u64).collect())
            }
            ArrayValues::Int(v) if dtype.is_float() => {
                ArrayValues::Float(v.iter().map(|x| *x as f64).collect())
            }
            ArrayValues::UInt(v) if dtype.is_int() => {
                ArrayValues::Int(v.iter().map(|x| *x as i64).collect())
            }
            ArrayValues::UInt(v) if dtype.is_float() => {
                ArrayValues::Float(v.iter().map(|x| *x as f64).collect())
            }
            other => other.clone(),
        };
        Self::new(dtype, self.shape.clone(), values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Extent of the first axis; scalars count as one row
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Elements per row
    pub fn row_width(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Shape of one row
    pub fn inner_shape(&self) -> &[usize] {
        if self.shape.is_empty() {
            &[]
        } else {
            &self.shape[1..]
        }
    }

    pub fn scalar_at(&self, index: usize) -> Option<Scalar> {
        self.values.scalar_at(index)
    }

    pub fn slice_rows(&self, rows: Range<usize>) -> ObjectResult<Self> {
        if self.shape.is_empty() {
            return Err(ObjectError::InvalidArray("cannot slice a scalar".to_string()));
        }
        if rows.start > rows.end || rows.end > self.rows() {
            return Err(ObjectError::InvalidArray(format!(
                "rows {}..{} out of bounds for {} rows",
                rows.start,
                rows.end,
                self.rows()
            )));
        }
        let width = self.row_width();
        let mut shape = self.shape.clone();
        shape[0] = rows.end - rows.start;
        Ok(Self {
            dtype: self.dtype,
            shape,
            values: self.values.slice(rows.start * width..rows.end * width),
        })
    }

    /// Concatenate arrays along the first axis
    pub fn concat_rows(dtype: DType, inner_shape: &[usize], parts: &[ArrayData]) -> ObjectResult<Self> {
        let mut shape = vec![0];
        shape.extend_from_slice(inner_shape);
        let mut values = match parts.first() {
            Some(first) => first.values.empty_like(),
            None => empty_values(dtype)?,
        };
        for part in parts {
            if part.inner_shape() != inner_shape || part.shape.is_empty() {
                return Err(ObjectError::InvalidArray(format!(
                    "chunk shape {:?} does not match row shape {:?}",
                    part.shape, inner_shape
                )));
            }
            if !values.extend(&part.values) {
                return Err(ObjectError::InvalidArray(format!(
                    "chunk of {} cannot join {}",
                    part.dtype, dtype
                )));
            }
            shape[0] += part.rows();
        }
        Self::new(dtype, shape, values)
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.values {
            ArrayValues::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.values {
            ArrayValues::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match &self.values {
            ArrayValues::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Values as unsigned integers, if every value is a non-negative integer
    pub fn to_u64_vec(&self) -> Option<Vec<u64>> {
        match &self.values {
            ArrayValues::UInt(v) => Some(v.clone()),
            ArrayValues::Int(v) => v.iter().map(|x| u64::try_from(*x).ok()).collect(),
            _ => None,
        }
    }
}

/// Empty storage for a dtype
pub fn empty_values(dtype: DType) -> ObjectResult<ArrayValues> {
    match dtype {
        d if d.is_int() => Ok(ArrayValues::Int(Vec::new())),
        d if d.is_uint() => Ok(ArrayValues::UInt(Vec::new())),
        d if d.is_float() => Ok(ArrayValues::Float(Vec::new())),
        DType::Bool => Ok(ArrayValues::Bool(Vec::new())),
        DType::Text | DType::Isodatetime => Ok(ArrayValues::Text(Vec::new())),
        other => Err(ObjectError::InvalidArray(format!(
            "'{}' is not a concrete element type",
            other
        ))),
    }
}

/// Variable-length rows packed into one data array
///
/// `offsets[i]` is the exclusive end of row `i` in the first axis of `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct RaggedArray {
    pub data: ArrayData,
    pub offsets: Vec<u64>,
}

impl RaggedArray {
    /// Build from data and offsets, checking the offsets invariant
    pub fn new(data: ArrayData, offsets: Vec<u64>) -> ObjectResult<Self> {
        let ragged = Self { data, offsets };
        ragged.check()?;
        Ok(ragged)
    }

    /// Build from one array per row
    pub fn from_rows(dtype: DType, rows: Vec<ArrayData>) -> ObjectResult<Self> {
        let inner: Vec<usize> = rows
            .first()
            .map(|r| r.inner_shape().to_vec())
            .unwrap_or_default();
        let mut offsets = Vec::with_capacity(rows.len());
        let mut end = 0u64;
        for row in &rows {
            end += row.rows() as u64;
            offsets.push(end);
        }
        let data = ArrayData::concat_rows(dtype, &inner, &rows)?;
        Self::new(data, offsets)
    }

    pub fn from_f64_rows(rows: Vec<Vec<f64>>) -> ObjectResult<Self> {
        Self::from_rows(
            DType::Float64,
            rows.into_iter().map(ArrayData::from_f64).collect(),
        )
    }

    /// Offsets are non-decreasing and the last one equals the data length
    pub fn check(&self) -> ObjectResult<()> {
        if let Some(pair) = self.offsets.windows(2).find(|w| w[0] > w[1]) {
            return Err(ObjectError::MalformedTable(format!(
                "offsets decrease from {} to {}",
                pair[0], pair[1]
            )));
        }
        if self.data.shape.is_empty() {
            return Err(ObjectError::MalformedTable(
                "ragged data cannot be a scalar".to_string(),
            ));
        }
        let data_rows = self.data.rows() as u64;
        let last = self.offsets.last().copied().unwrap_or(0);
        if last != data_rows {
            return Err(ObjectError::MalformedTable(format!(
                "last offset {} does not match data length {}",
                last, data_rows
            )));
        }
        Ok(())
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn row(&self, index: usize) -> ObjectResult<ArrayData> {
        let end = *self.offsets.get(index).ok_or_else(|| {
            ObjectError::MalformedTable(format!(
                "row {} out of range for {} rows",
                index,
                self.offsets.len()
            ))
        })?;
        let start = if index == 0 {
            0
        } else {
            self.offsets[index - 1]
        };
        if start > end || end > self.data.rows() as u64 {
            return Err(ObjectError::MalformedTable(format!(
                "row {} spans {}..{} outside data of {} rows",
                index,
                start,
                end,
                self.data.rows()
            )));
        }
        self.data.slice_rows(start as usize..end as usize)
    }
}

/// Row ranges of another table, one `[start, end)` range per row
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRefs {
    pub table: ObjectId,
    pub ranges: Vec<(u64, u64)>,
}

impl RegionRefs {
    pub fn new(table: ObjectId, ranges: Vec<(u64, u64)>) -> Self {
        Self { table, ranges }
    }

    /// One single-row range per listed row
    pub fn rows(table: ObjectId, rows: &[u64]) -> Self {
        Self {
            table,
            ranges: rows.iter().map(|r| (*r, r + 1)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// First range that is inverted or reaches past `table_rows`
    pub fn first_out_of_bounds(&self, table_rows: usize) -> Option<(u64, u64)> {
        self.ranges
            .iter()
            .copied()
            .find(|(start, end)| start > end || *end > table_rows as u64)
    }
}

/// Reference to a dataset in a container, read only on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub location: String,
    pub path: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub chunks: usize,
}

/// Producer of dataset chunks for streamed writes
pub trait ChunkSource: Send {
    fn dtype(&self) -> DType;

    /// Shape of one row; every chunk is `[n, inner_shape..]`
    fn inner_shape(&self) -> Vec<usize>;

    /// Next chunk, `None` when exhausted
    fn next_chunk(&mut self) -> Option<ObjectResult<ArrayData>>;
}

struct IterSource<I> {
    dtype: DType,
    inner_shape: Vec<usize>,
    chunks: I,
}

impl<I> ChunkSource for IterSource<I>
where
    I: Iterator<Item = ObjectResult<ArrayData>> + Send,
{
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn inner_shape(&self) -> Vec<usize> {
        self.inner_shape.clone()
    }

    fn next_chunk(&mut self) -> Option<ObjectResult<ArrayData>> {
        self.chunks.next()
    }
}

/// Single-use stream of chunks
///
/// Clones share the source; whichever writer takes it first consumes it.
#[derive(Clone)]
pub struct StreamSource {
    dtype: DType,
    inner_shape: Vec<usize>,
    source: Arc<Mutex<Option<Box<dyn ChunkSource>>>>,
}

impl StreamSource {
    pub fn new(source: impl ChunkSource + 'static) -> Self {
        Self {
            dtype: source.dtype(),
            inner_shape: source.inner_shape(),
            source: Arc::new(Mutex::new(Some(Box::new(source)))),
        }
    }

    /// Stream over an iterator of chunk results
    pub fn from_results<I>(dtype: DType, inner_shape: Vec<usize>, chunks: I) -> Self
    where
        I: IntoIterator<Item = ObjectResult<ArrayData>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(IterSource {
            dtype,
            inner_shape,
            chunks: chunks.into_iter(),
        })
    }

    /// Stream over ready chunks
    pub fn from_chunks(dtype: DType, inner_shape: Vec<usize>, chunks: Vec<ArrayData>) -> Self {
        Self::from_results(dtype, inner_shape, chunks.into_iter().map(Ok))
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn inner_shape(&self) -> &[usize] {
        &self.inner_shape
    }

    /// Take the source; `None` once consumed
    pub fn take(&self) -> Option<Box<dyn ChunkSource>> {
        self.source.lock().take()
    }

    pub fn is_consumed(&self) -> bool {
        self.source.lock().is_none()
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("dtype", &self.dtype)
            .field("inner_shape", &self.inner_shape)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

impl PartialEq for StreamSource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }
}

/// Target of a link field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// An instance of the same graph
    Local(ObjectId),
    /// A node of another container
    External { location: String, path: String },
}

/// Value of one field of an instance
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Scalar),
    Array(ArrayData),
    Dataset(DatasetHandle),
    Stream(StreamSource),
    Ragged(RaggedArray),
    Region(RegionRefs),
    Child(ObjectId),
    Children(Vec<ObjectId>),
    Link(LinkTarget),
}

impl FieldValue {
    /// Element type of data-carrying values
    pub fn dtype(&self) -> Option<DType> {
        match self {
            FieldValue::Scalar(s) => Some(s.dtype()),
            FieldValue::Array(a) => Some(a.dtype),
            FieldValue::Dataset(h) => Some(h.dtype),
            FieldValue::Stream(s) => Some(s.dtype()),
            FieldValue::Ragged(r) => Some(r.data.dtype),
            FieldValue::Region(_) => Some(DType::Uint64),
            _ => None,
        }
    }

    /// Number of rows of data-carrying values, if known without reading
    pub fn row_count(&self) -> Option<usize> {
        match self {
            FieldValue::Array(a) => Some(a.rows()),
            FieldValue::Dataset(h) => Some(h.shape.first().copied().unwrap_or(1)),
            FieldValue::Ragged(r) => Some(r.len()),
            FieldValue::Region(r) => Some(r.len()),
            _ => None,
        }
    }

    /// Child instances held by this value (links excluded)
    pub fn child_ids(&self) -> Vec<ObjectId> {
        match self {
            FieldValue::Child(id) => vec![*id],
            FieldValue::Children(ids) => ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            FieldValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            FieldValue::Scalar(_) => "scalar",
            FieldValue::Array(_) => "array",
            FieldValue::Dataset(_) => "dataset handle",
            FieldValue::Stream(_) => "stream",
            FieldValue::Ragged(_) => "ragged array",
            FieldValue::Region(_) => "region",
            FieldValue::Child(_) => "child",
            FieldValue::Children(_) => "children",
            FieldValue::Link(_) => "link",
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(value: Scalar) -> Self {
        FieldValue::Scalar(value)
    }
}

impl From<ArrayData> for FieldValue {
    fn from(value: ArrayData) -> Self {
        FieldValue::Array(value)
    }
}

impl From<RaggedArray> for FieldValue {
    fn from(value: RaggedArray) -> Self {
        FieldValue::Ragged(value)
    }
}
