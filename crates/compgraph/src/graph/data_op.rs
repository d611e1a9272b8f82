//! Values flowing between API methods.

use std::fmt;
use std::sync::Arc;

use super::record::InvocationId;
use crate::error::{GraphError, Result};
use crate::tensor::{Tensor, TensorSpec};

/// Index of a node in a compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Where a placeholder's value comes from once the graph runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaceholderSource {
    /// A named input supplied at execution time.
    Feed(Arc<str>),
    /// The `index`-th output of a recorded invocation.
    Output { invocation: InvocationId, index: usize },
}

/// Stand-in for a value that will only exist after the graph is built and executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    graph: u64,
    source: PlaceholderSource,
    spec: TensorSpec,
}

impl Placeholder {
    pub(crate) fn new(graph: u64, source: PlaceholderSource, spec: TensorSpec) -> Self {
        Self {
            graph,
            source,
            spec,
        }
    }

    pub fn source(&self) -> &PlaceholderSource {
        &self.source
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    /// Identifier of the graph that allocated this placeholder.
    pub fn graph_id(&self) -> u64 {
        self.graph
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            PlaceholderSource::Feed(name) => write!(f, "feed '{name}': {}", self.spec),
            PlaceholderSource::Output { invocation, index } => {
                write!(f, "{invocation}.{index}: {}", self.spec)
            }
        }
    }
}

/// A graph value inside a method body that is being compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    value: ValueId,
    spec: TensorSpec,
}

impl Symbol {
    pub(crate) fn new(value: ValueId, spec: TensorSpec) -> Self {
        Self { value, spec }
    }

    pub fn value(&self) -> ValueId {
        self.value
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }
}

/// Polymorphic value passed to and returned from API methods.
///
/// Which variants appear depends on the backend: immediate execution only ever sees tensors,
/// the symbolic recorder hands out placeholders, and method bodies being compiled operate on
/// symbols. `None` marks an absent optional value in every mode.
#[derive(Debug, Clone, Default)]
pub enum DataOp {
    Tensor(Tensor),
    Placeholder(Placeholder),
    Symbol(Symbol),
    #[default]
    None,
}

impl DataOp {
    pub fn scalar(value: f32) -> Self {
        DataOp::Tensor(Tensor::scalar(value))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DataOp::None)
    }

    /// Spec of the value, or `None` for an absent value.
    pub fn spec(&self) -> Option<TensorSpec> {
        match self {
            DataOp::Tensor(tensor) => Some(tensor.spec()),
            DataOp::Placeholder(placeholder) => Some(placeholder.spec().clone()),
            DataOp::Symbol(symbol) => Some(symbol.spec().clone()),
            DataOp::None => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            DataOp::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_placeholder(&self) -> Option<&Placeholder> {
        match self {
            DataOp::Placeholder(placeholder) => Some(placeholder),
            _ => None,
        }
    }

    /// Extracts a concrete tensor, as produced by immediate execution.
    pub fn into_tensor(self) -> Result<Tensor> {
        match self {
            DataOp::Tensor(tensor) => Ok(tensor),
            other => Err(GraphError::ShapeMismatch(format!(
                "expected a concrete tensor, found {}",
                other.kind_name()
            ))),
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            DataOp::Tensor(_) => "tensor",
            DataOp::Placeholder(_) => "placeholder",
            DataOp::Symbol(_) => "symbol",
            DataOp::None => "none",
        }
    }
}

impl From<Tensor> for DataOp {
    fn from(tensor: Tensor) -> Self {
        DataOp::Tensor(tensor)
    }
}

impl From<Placeholder> for DataOp {
    fn from(placeholder: Placeholder) -> Self {
        DataOp::Placeholder(placeholder)
    }
}

impl From<f32> for DataOp {
    fn from(value: f32) -> Self {
        DataOp::scalar(value)
    }
}

impl From<Option<Tensor>> for DataOp {
    fn from(value: Option<Tensor>) -> Self {
        value.map_or(DataOp::None, DataOp::Tensor)
    }
}
