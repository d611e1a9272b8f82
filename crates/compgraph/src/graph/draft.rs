//! Mutable node list the compiler appends to while resolving invocation records.

use std::collections::HashMap;
use std::sync::Arc;

use super::compiled::{CompiledGraph, GraphNode, NodeOp};
use super::data_op::{Symbol, ValueId};
use super::record::InvocationId;
use crate::backend::Primitive;
use crate::error::Result;
use crate::tensor::{Tensor, TensorSpec};

pub struct GraphDraft {
    nodes: Vec<GraphNode>,
    feeds: HashMap<Arc<str>, ValueId>,
    current: InvocationId,
}

impl GraphDraft {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            feeds: HashMap::new(),
            current: InvocationId(0),
        }
    }

    /// Continues from a finalized artifact; its nodes are carried over unchanged.
    pub(crate) fn extending(base: &CompiledGraph) -> Self {
        Self {
            nodes: base.nodes().to_vec(),
            feeds: base
                .feed_values()
                .map(|(name, value)| (Arc::clone(name), value))
                .collect(),
            current: InvocationId(0),
        }
    }

    pub(crate) fn set_current_invocation(&mut self, invocation: InvocationId) {
        self.current = invocation;
    }

    pub(crate) fn current_invocation(&self) -> InvocationId {
        self.current
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    fn push(&mut self, op: NodeOp, operands: Vec<ValueId>, spec: TensorSpec) -> Symbol {
        let id = ValueId(self.nodes.len() as u32);
        tracing::trace!(value = %id, op = op.name(), spec = %spec, "emitted node");
        self.nodes.push(GraphNode {
            op,
            operands,
            spec: spec.clone(),
        });
        Symbol::new(id, spec)
    }

    pub(crate) fn constant(&mut self, tensor: Tensor) -> Symbol {
        let spec = tensor.spec();
        self.push(NodeOp::Constant(tensor), Vec::new(), spec)
    }

    /// Node for the graph input `name`; one node per name.
    pub(crate) fn feed(&mut self, name: &Arc<str>, spec: &TensorSpec) -> Symbol {
        if let Some(&value) = self.feeds.get(name) {
            return Symbol::new(value, self.nodes[value.index()].spec.clone());
        }
        let symbol = self.push(NodeOp::Feed(Arc::clone(name)), Vec::new(), spec.clone());
        self.feeds.insert(Arc::clone(name), symbol.value());
        symbol
    }

    pub(crate) fn primitive(&mut self, primitive: Primitive, operands: &[Symbol]) -> Result<Symbol> {
        let specs: Vec<TensorSpec> = operands.iter().map(|symbol| symbol.spec().clone()).collect();
        let spec = primitive.infer(&specs)?;
        let operands = operands.iter().map(Symbol::value).collect();
        Ok(self.push(NodeOp::Primitive(primitive), operands, spec))
    }

    pub(crate) fn spec_of(&self, value: ValueId) -> Option<&TensorSpec> {
        self.nodes.get(value.index()).map(|node| &node.spec)
    }

    pub(crate) fn into_parts(self) -> (Vec<GraphNode>, HashMap<Arc<str>, ValueId>) {
        (self.nodes, self.feeds)
    }
}
