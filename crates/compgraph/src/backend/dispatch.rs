//! Routing of primitive applications to either kernels or the graph draft.

use std::sync::Arc;

use super::kernels::Kernels;
use super::primitive::Primitive;
use super::BackendKind;
use crate::error::{GraphError, Result};
use crate::graph::draft::GraphDraft;
use crate::graph::{DataOp, Symbol};
use crate::tensor::{Tensor, TensorSpec};

/// Evaluates or stages one primitive on behalf of a method body.
pub trait Dispatcher {
    fn kind(&self) -> BackendKind;

    fn apply(&mut self, primitive: &Primitive, inputs: &[&DataOp]) -> Result<DataOp>;
}

/// Runs every primitive right away on the kernels.
pub struct ImmediateDispatcher {
    kernels: Arc<dyn Kernels>,
}

impl ImmediateDispatcher {
    pub fn new(kernels: Arc<dyn Kernels>) -> Self {
        Self { kernels }
    }
}

impl Dispatcher for ImmediateDispatcher {
    fn kind(&self) -> BackendKind {
        BackendKind::ImmediateTensor
    }

    fn apply(&mut self, primitive: &Primitive, inputs: &[&DataOp]) -> Result<DataOp> {
        let tensors = inputs
            .iter()
            .map(|input| match input {
                DataOp::Tensor(tensor) => Ok(tensor),
                DataOp::Placeholder(_) | DataOp::Symbol(_) => Err(GraphError::ModeMismatch {
                    expected: BackendKind::SymbolicGraph,
                    found: BackendKind::ImmediateTensor,
                }),
                DataOp::None => Err(absent_operand(primitive)),
            })
            .collect::<Result<Vec<&Tensor>>>()?;
        let expected = primitive.infer(&tensors.iter().map(|t| t.spec()).collect::<Vec<_>>())?;
        let out = self.kernels.execute(primitive, &tensors)?;
        check_kernel_output(primitive, &expected, &out)?;
        Ok(DataOp::Tensor(out))
    }
}

/// Appends primitive nodes to the draft of the graph being compiled.
pub struct SymbolicDispatcher<'d> {
    draft: &'d mut GraphDraft,
}

impl<'d> SymbolicDispatcher<'d> {
    pub(crate) fn new(draft: &'d mut GraphDraft) -> Self {
        Self { draft }
    }
}

impl Dispatcher for SymbolicDispatcher<'_> {
    fn kind(&self) -> BackendKind {
        BackendKind::SymbolicGraph
    }

    fn apply(&mut self, primitive: &Primitive, inputs: &[&DataOp]) -> Result<DataOp> {
        let mut operands: Vec<Symbol> = Vec::with_capacity(inputs.len());
        for input in inputs {
            let symbol = match input {
                DataOp::Symbol(symbol) => symbol.clone(),
                DataOp::Tensor(tensor) => self.draft.constant(tensor.clone()),
                DataOp::Placeholder(placeholder) => {
                    return Err(GraphError::UnresolvedBinding {
                        invocation: self.draft.current_invocation(),
                        detail: format!(
                            "placeholder {placeholder} used inside a method body; pass it as an API input"
                        ),
                    })
                }
                DataOp::None => return Err(absent_operand(primitive)),
            };
            operands.push(symbol);
        }
        Ok(DataOp::Symbol(self.draft.primitive(primitive.clone(), &operands)?))
    }
}

fn absent_operand(primitive: &Primitive) -> GraphError {
    GraphError::ShapeMismatch(format!(
        "{} received an absent operand",
        primitive.name()
    ))
}

/// Kernels must honour the primitive's inferred spec.
pub(crate) fn check_kernel_output(
    primitive: &Primitive,
    expected: &TensorSpec,
    out: &Tensor,
) -> Result<()> {
    if !expected.admits(out) {
        return Err(GraphError::ShapeMismatch(format!(
            "{} kernel produced {} where {expected} was inferred",
            primitive.name(),
            out.spec()
        )));
    }
    Ok(())
}
