use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Scalar element types the host graph can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 => 1,
            DType::F16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// Produces a stable tag used when serializing into binary blobs.
    pub fn tag(self) -> u32 {
        match self {
            DType::Bool => 0,
            DType::I8 => 1,
            DType::I32 => 2,
            DType::I64 => 3,
            DType::F16 => 4,
            DType::F32 => 5,
            DType::F64 => 6,
        }
    }

    /// Reconstructs a `DType` from its serialized tag representation.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(DType::Bool),
            1 => Some(DType::I8),
            2 => Some(DType::I32),
            3 => Some(DType::I64),
            4 => Some(DType::F16),
            5 => Some(DType::F32),
            6 => Some(DType::F64),
            _ => None,
        }
    }

    /// Canonical lower-case name used in diagnostics (`float32`, `int64`, ...).
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F16 => "float16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Label of an axis whose extent is only known per invocation, printed as
/// `?N`. Two axes with the same label share one extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(label: &str) -> Self {
        Self(Arc::from(label))
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic(DimSymbol),
}

impl Dimension {
    pub fn as_static(&self) -> Option<usize> {
        if let Dimension::Static(extent) = self {
            Some(*extent)
        } else {
            None
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.as_static().is_none()
    }

    fn admits(&self, extent: usize) -> bool {
        self.as_static().map_or(true, |expected| expected == extent)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(extent) => write!(f, "{extent}"),
            Dimension::Dynamic(symbol) => write!(f, "?{}", symbol.label()),
        }
    }
}

/// Declared extents of a graph value, outermost axis first. Rank 0 is a
/// scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<Dimension>);

impl Shape {
    pub fn new(dims: Vec<Dimension>) -> Self {
        Self(dims)
    }

    pub fn from_static(extents: &[usize]) -> Self {
        Self(extents.iter().map(|&extent| Dimension::Static(extent)).collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.0
    }

    pub fn dim(&self, axis: usize) -> Option<&Dimension> {
        self.0.get(axis)
    }

    /// Concrete extents, or `None` while any axis is symbolic.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.0.iter().map(Dimension::as_static).collect()
    }

    pub fn first_dynamic_axis(&self) -> Option<usize> {
        self.0.iter().position(Dimension::is_dynamic)
    }

    /// True when `concrete` has this rank and matches every static axis.
    pub fn admits(&self, concrete: &[usize]) -> bool {
        self.0.len() == concrete.len()
            && self.0.iter().zip(concrete).all(|(dim, &extent)| dim.admits(extent))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((first, rest)) = self.0.split_first() else {
            return f.write_str("scalar");
        };
        write!(f, "{first}")?;
        rest.iter().try_for_each(|dim| write!(f, "x{dim}"))
    }
}

/// Element type plus shape of a value in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn with_static(dtype: DType, dims: &[usize]) -> Self {
        Self::new(dtype, Shape::from_static(dims))
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .static_dims()
            .and_then(|dims| dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d)))
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{}, {}>", self.dtype, self.shape)
    }
}

/// Static operator attribute values.
///
/// Kept to primitives and arrays so attribute tables serialize without
/// reference to any particular front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    I64(i64),
    I64Array(Vec<i64>),
    F64(#[serde(with = "float_attr")] f64),
    String(String),
}

/// JSON has no spelling for infinities or NaN, so those are written as the
/// strings `"inf"`, `"-inf"` and `"nan"`. Finite values stay numbers.
mod float_attr {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("nan")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatAttrVisitor)
    }

    struct FloatAttrVisitor;

    impl Visitor<'_> for FloatAttrVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"inf\", \"-inf\", \"nan\"")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<f64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<f64, E> {
            match value {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

impl AttrValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::I64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64_array(&self) -> Option<&[i64]> {
        match self {
            AttrValue::I64Array(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::F64(value) => Some(*value),
            AttrValue::I64(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(value) => write!(f, "{value}"),
            AttrValue::I64(value) => write!(f, "{value}"),
            AttrValue::I64Array(values) => write!(f, "{values:?}"),
            AttrValue::F64(value) => write!(f, "{value:?}"),
            AttrValue::String(value) => write!(f, "{value:?}"),
        }
    }
}

/// Ordered attribute table attached to nodes and functions.
pub type Attrs = BTreeMap<String, AttrValue>;
