//! Symbolic tensor specifications used by output contracts and placeholders.
//!
//! A [`TensorSpec`] describes what a value will look like once computed: its dtype and a
//! list of dimensions, each either static or a named dynamic extent such as `?B`. Specs
//! are what the compiler allocates for placeholders before any primitive runs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{DType, Shape, Tensor};
use crate::error::GraphError;

/// Names a symbolic dynamic dimension (e.g. `?B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for DimSymbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DimSymbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(DimSymbol::new(name))
    }
}

/// Represents a single axis extent in a symbolic shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic(DimSymbol),
}

impl Dimension {
    /// Convenience constructor for dynamic extents.
    pub fn dynamic(name: impl Into<String>) -> Self {
        Dimension::Dynamic(DimSymbol::new(name))
    }

    pub fn as_static(&self) -> Option<usize> {
        match self {
            Dimension::Static(value) => Some(*value),
            Dimension::Dynamic(_) => None,
        }
    }

    /// Two dimensions are compatible unless both are static and differ.
    pub fn compatible(&self, other: &Dimension) -> bool {
        match (self, other) {
            (Dimension::Static(a), Dimension::Static(b)) => a == b,
            _ => true,
        }
    }

    /// Whether a concrete extent can inhabit this dimension.
    pub fn admits(&self, extent: usize) -> bool {
        match self {
            Dimension::Static(value) => *value == extent,
            Dimension::Dynamic(_) => true,
        }
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Dimension::Static(value)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(value) => write!(f, "{value}"),
            Dimension::Dynamic(symbol) => write!(f, "?{}", symbol.as_str()),
        }
    }
}

/// Dtype plus symbolic dimensions of a value that may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub dims: Vec<Dimension>,
}

impl TensorSpec {
    pub fn new(dtype: DType, dims: impl IntoIterator<Item = Dimension>) -> Self {
        Self {
            dtype,
            dims: dims.into_iter().collect(),
        }
    }

    /// Fully static spec matching a concrete shape.
    pub fn of_shape(dtype: DType, shape: &Shape) -> Self {
        Self::new(dtype, shape.dims().iter().copied().map(Dimension::Static))
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, [])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Returns the concrete shape when every dimension is static.
    pub fn static_shape(&self) -> Option<Shape> {
        self.dims
            .iter()
            .map(Dimension::as_static)
            .collect::<Option<Vec<_>>>()
            .map(Shape::new)
    }

    /// Whether `tensor` could be bound to a value of this spec.
    pub fn admits(&self, tensor: &Tensor) -> bool {
        tensor.dtype() == self.dtype
            && tensor.shape().rank() == self.rank()
            && self
                .dims
                .iter()
                .zip(tensor.shape().dims())
                .all(|(dim, extent)| dim.admits(*extent))
    }

    /// Dtype and rank equal, and no pair of static dimensions disagrees.
    pub fn compatible(&self, other: &TensorSpec) -> bool {
        self.dtype == other.dtype
            && self.rank() == other.rank()
            && self
                .dims
                .iter()
                .zip(&other.dims)
                .all(|(lhs, rhs)| lhs.compatible(rhs))
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// Parses the textual form produced by `Display`, e.g. `f32[?B,4]` or `i32[]`.
impl FromStr for TensorSpec {
    type Err = GraphError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = GraphError::InvalidSpec;
        let trimmed = raw.trim();
        let (dtype, rest) = trimmed
            .split_once('[')
            .ok_or_else(|| invalid(format!("tensor spec '{raw}' is missing '['")))?;
        let body = rest
            .strip_suffix(']')
            .ok_or_else(|| invalid(format!("tensor spec '{raw}' is missing ']'")))?;
        let dtype = match dtype.trim() {
            "f32" => DType::F32,
            "i32" => DType::I32,
            "bool" => DType::Bool,
            other => return Err(invalid(format!("unknown dtype '{other}' in tensor spec"))),
        };
        let mut dims = Vec::new();
        for part in body.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(symbol) = part.strip_prefix('?') {
                dims.push(Dimension::dynamic(symbol));
            } else {
                let extent = part
                    .parse::<usize>()
                    .map_err(|_| invalid(format!("invalid dimension '{part}' in tensor spec")))?;
                dims.push(Dimension::Static(extent));
            }
        }
        Ok(TensorSpec { dtype, dims })
    }
}
