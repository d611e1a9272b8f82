//! The immutable executable artifact produced by a symbolic build.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::data_op::{Placeholder, PlaceholderSource, ValueId};
use super::record::InvocationId;
use crate::backend::dispatch::check_kernel_output;
use crate::backend::{BackendError, Kernels, Primitive};
use crate::error::{GraphError, Result};
use crate::tensor::{Tensor, TensorSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOp {
    Constant(Tensor),
    Feed(Arc<str>),
    Primitive(Primitive),
}

impl NodeOp {
    pub fn name(&self) -> &'static str {
        match self {
            NodeOp::Constant(_) => "constant",
            NodeOp::Feed(_) => "feed",
            NodeOp::Primitive(primitive) => primitive.name(),
        }
    }
}

/// One node of a compiled graph. Operands always precede the node that uses them.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub op: NodeOp,
    pub operands: Vec<ValueId>,
    pub spec: TensorSpec,
}

/// Wiring of one resolved invocation record.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledInvocation {
    pub id: InvocationId,
    pub scope: String,
    pub method: String,
    /// Graph value bound to each input; `None` for absent inputs.
    pub inputs: Vec<Option<ValueId>>,
    /// Graph value behind each output; `None` for absent outputs.
    pub outputs: Vec<Option<ValueId>>,
}

/// Named tensors supplied to [`CompiledGraph::execute`].
#[derive(Debug, Clone, Default)]
pub struct Feeds {
    values: HashMap<String, Tensor>,
}

impl Feeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.values.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Tensor)> for Feeds {
    fn from_iter<I: IntoIterator<Item = (S, Tensor)>>(iter: I) -> Self {
        let mut feeds = Feeds::new();
        for (name, tensor) in iter {
            feeds.insert(name, tensor);
        }
        feeds
    }
}

/// Frozen result of a build. Holds no per-call state, so one artifact can be executed from
/// many threads at once.
pub struct CompiledGraph {
    graph: u64,
    nodes: Vec<GraphNode>,
    feeds: HashMap<Arc<str>, ValueId>,
    invocations: Vec<CompiledInvocation>,
    outputs: HashMap<(InvocationId, usize), ValueId>,
    kernels: Arc<dyn Kernels>,
}

impl CompiledGraph {
    pub(crate) fn new(
        graph: u64,
        nodes: Vec<GraphNode>,
        feeds: HashMap<Arc<str>, ValueId>,
        invocations: Vec<CompiledInvocation>,
        kernels: Arc<dyn Kernels>,
    ) -> Self {
        let outputs = invocations
            .iter()
            .flat_map(|invocation| {
                invocation
                    .outputs
                    .iter()
                    .enumerate()
                    .filter_map(move |(index, value)| value.map(|value| ((invocation.id, index), value)))
            })
            .collect();
        Self {
            graph,
            nodes,
            feeds,
            invocations,
            outputs,
            kernels,
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn invocations(&self) -> &[CompiledInvocation] {
        &self.invocations
    }

    pub fn invocation(&self, id: InvocationId) -> Option<&CompiledInvocation> {
        self.invocations.iter().find(|invocation| invocation.id == id)
    }

    pub(crate) fn feed_values(&self) -> impl Iterator<Item = (&Arc<str>, ValueId)> {
        self.feeds.iter().map(|(name, value)| (name, *value))
    }

    /// Names of the graph inputs the artifact reads.
    pub fn feed_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.feeds.keys().map(AsRef::as_ref).collect();
        names.sort_unstable();
        names
    }

    pub fn kernels_name(&self) -> &str {
        self.kernels.backend_name()
    }

    /// Graph value computing `placeholder`, if this artifact contains it.
    pub fn value_of(&self, placeholder: &Placeholder) -> Option<ValueId> {
        if placeholder.graph_id() != self.graph {
            return None;
        }
        match placeholder.source() {
            PlaceholderSource::Feed(name) => self.feeds.get(name).copied(),
            PlaceholderSource::Output { invocation, index } => {
                self.outputs.get(&(*invocation, *index)).copied()
            }
        }
    }

    /// Evaluates the fetched placeholders, running only the nodes they depend on.
    pub fn execute(&self, fetches: &[&Placeholder], feeds: &Feeds) -> Result<Vec<Tensor>> {
        let _span = tracing::debug_span!("execute", fetches = fetches.len()).entered();
        let mut targets = Vec::with_capacity(fetches.len());
        for placeholder in fetches {
            targets.push(self.fetch_target(placeholder, feeds)?);
        }

        let mut needed = vec![false; self.nodes.len()];
        let mut stack: Vec<ValueId> = targets.iter().filter_map(Fetch::value).collect();
        while let Some(value) = stack.pop() {
            if !std::mem::replace(&mut needed[value.index()], true) {
                stack.extend(self.nodes[value.index()].operands.iter().copied());
            }
        }

        let mut values: Vec<Option<Cow<'_, Tensor>>> = vec![None; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            if !needed[index] {
                continue;
            }
            let value = match &node.op {
                NodeOp::Constant(tensor) => Cow::Borrowed(tensor),
                NodeOp::Feed(name) => Cow::Borrowed(read_feed(feeds, name, &node.spec)?),
                NodeOp::Primitive(primitive) => {
                    let inputs = node
                        .operands
                        .iter()
                        .map(|operand| {
                            values[operand.index()].as_deref().ok_or_else(|| {
                                BackendError::execution(format!(
                                    "operand {operand} of node %{index} was not evaluated"
                                ))
                            })
                        })
                        .collect::<std::result::Result<Vec<&Tensor>, BackendError>>()?;
                    let out = self.kernels.execute(primitive, &inputs)?;
                    check_kernel_output(primitive, &node.spec, &out)?;
                    Cow::Owned(out)
                }
            };
            values[index] = Some(value);
        }

        targets
            .into_iter()
            .map(|target| match target {
                Fetch::Value(value) => values[value.index()]
                    .as_ref()
                    .map(|tensor| tensor.clone().into_owned())
                    .ok_or_else(|| {
                        GraphError::from(BackendError::execution(format!(
                            "fetched value {value} was not evaluated"
                        )))
                    }),
                Fetch::Feed(tensor) => Ok(tensor.clone()),
            })
            .collect()
    }

    fn fetch_target<'f>(&self, placeholder: &Placeholder, feeds: &'f Feeds) -> Result<Fetch<'f>> {
        if let Some(value) = self.value_of(placeholder) {
            return Ok(Fetch::Value(value));
        }
        match placeholder.source() {
            PlaceholderSource::Feed(name) if placeholder.graph_id() == self.graph => {
                // Declared but never consumed by a method: hand the fed value back.
                Ok(Fetch::Feed(read_feed(feeds, name, placeholder.spec())?))
            }
            PlaceholderSource::Feed(name) => Err(GraphError::FeedMismatch {
                name: name.to_string(),
                expected: format!("an input of graph {}", self.graph),
                got: format!("an input of graph {}", placeholder.graph_id()),
            }),
            PlaceholderSource::Output { invocation, .. } => Err(GraphError::UnresolvedBinding {
                invocation: *invocation,
                detail: if placeholder.graph_id() == self.graph {
                    "the invocation was recorded after this artifact was built".to_string()
                } else {
                    format!("placeholder belongs to graph {}", placeholder.graph_id())
                },
            }),
        }
    }
}

enum Fetch<'f> {
    Value(ValueId),
    Feed(&'f Tensor),
}

impl Fetch<'_> {
    fn value(&self) -> Option<ValueId> {
        match self {
            Fetch::Value(value) => Some(*value),
            Fetch::Feed(_) => None,
        }
    }
}

fn read_feed<'f>(feeds: &'f Feeds, name: &str, spec: &TensorSpec) -> Result<&'f Tensor> {
    let tensor = feeds.get(name).ok_or_else(|| GraphError::MissingFeed {
        name: name.to_string(),
    })?;
    if !spec.admits(tensor) {
        return Err(GraphError::FeedMismatch {
            name: name.to_string(),
            expected: spec.to_string(),
            got: tensor.spec().to_string(),
        });
    }
    Ok(tensor)
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("graph", &self.graph)
            .field("nodes", &self.nodes.len())
            .field("invocations", &self.invocations.len())
            .field("kernels", &self.kernels.backend_name())
            .finish()
    }
}

impl fmt::Display for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, node) in self.nodes.iter().enumerate() {
            write!(f, "%{index} = {}", node.op.name())?;
            match &node.op {
                NodeOp::Feed(name) => write!(f, " '{name}'")?,
                NodeOp::Constant(_) => {}
                NodeOp::Primitive(_) => {
                    let operands: Vec<String> =
                        node.operands.iter().map(ToString::to_string).collect();
                    write!(f, "({})", operands.join(", "))?;
                }
            }
            writeln!(f, " : {}", node.spec)?;
        }
        Ok(())
    }
}
