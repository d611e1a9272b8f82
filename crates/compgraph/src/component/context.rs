//! Context handed to method bodies.

use crate::backend::{
    BackendKind, BinaryOp, CompareOp, Dispatcher, Primitive, ReduceOp, UnaryOp,
};
use crate::component::api::{resolve_method, ApiOutputs};
use crate::component::{ComponentId, ComponentTree};
use crate::error::{GraphError, Result};
use crate::graph::DataOp;
use crate::tensor::DType;

/// Gives a method body access to its sub-components and to the active dispatcher.
///
/// Every tensor operation goes through [`CallContext::apply`] (or one of the shorthands), so a
/// body never needs to know whether it is being compiled or executed.
pub struct CallContext<'a> {
    tree: &'a ComponentTree,
    component: ComponentId,
    dispatcher: &'a mut dyn Dispatcher,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        tree: &'a ComponentTree,
        component: ComponentId,
        dispatcher: &'a mut dyn Dispatcher,
    ) -> Self {
        Self {
            tree,
            component,
            dispatcher,
        }
    }

    pub fn component_id(&self) -> ComponentId {
        self.component
    }

    pub fn scope(&self) -> &str {
        self.tree.scope(self.component).unwrap_or_default()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.dispatcher.kind()
    }

    /// Calls `method` on the sub-component named `child`.
    pub fn call(&mut self, child: &str, method: &str, inputs: Vec<DataOp>) -> Result<ApiOutputs> {
        let child_id = self
            .tree
            .child(self.component, child)
            .ok_or_else(|| GraphError::UnknownComponent {
                scope: self.scope().to_string(),
                name: child.to_string(),
            })?;
        invoke_method(self.tree, child_id, method, inputs, &mut *self.dispatcher)
    }

    /// Applies one primitive through the active dispatcher.
    pub fn apply(&mut self, primitive: Primitive, inputs: &[&DataOp]) -> Result<DataOp> {
        self.dispatcher.apply(&primitive, inputs)
    }

    pub fn unary(&mut self, op: UnaryOp, x: &DataOp) -> Result<DataOp> {
        self.apply(Primitive::unary(op), &[x])
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.apply(Primitive::binary(op), &[lhs, rhs])
    }

    pub fn add(&mut self, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn maximum(&mut self, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.binary(BinaryOp::Maximum, lhs, rhs)
    }

    pub fn minimum(&mut self, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.binary(BinaryOp::Minimum, lhs, rhs)
    }

    pub fn compare(&mut self, op: CompareOp, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.apply(Primitive::compare(op), &[lhs, rhs])
    }

    pub fn select(&mut self, cond: &DataOp, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.apply(Primitive::Where, &[cond, lhs, rhs])
    }

    pub fn reduce(&mut self, op: ReduceOp, x: &DataOp, axis: Option<usize>) -> Result<DataOp> {
        self.apply(Primitive::reduce(op, axis), &[x])
    }

    pub fn argmax(&mut self, x: &DataOp, axis: usize) -> Result<DataOp> {
        self.apply(Primitive::ArgMax { axis }, &[x])
    }

    pub fn softmax(&mut self, x: &DataOp, axis: usize) -> Result<DataOp> {
        self.apply(Primitive::Softmax { axis }, &[x])
    }

    pub fn log_softmax(&mut self, x: &DataOp, axis: usize) -> Result<DataOp> {
        self.apply(Primitive::LogSoftmax { axis }, &[x])
    }

    pub fn matmul(&mut self, lhs: &DataOp, rhs: &DataOp) -> Result<DataOp> {
        self.apply(Primitive::MatMul, &[lhs, rhs])
    }

    pub fn clip(&mut self, x: &DataOp, min: f32, max: f32) -> Result<DataOp> {
        self.apply(Primitive::Clip { min, max }, &[x])
    }

    pub fn cast(&mut self, x: &DataOp, dtype: DType) -> Result<DataOp> {
        self.apply(Primitive::Cast { dtype }, &[x])
    }

    pub fn stop_gradient(&mut self, x: &DataOp) -> Result<DataOp> {
        self.apply(Primitive::StopGradient, &[x])
    }
}

/// Resolves `method` on `component`, fills defaults, runs the body, and checks the outputs
/// against the declared contract.
pub(crate) fn invoke_method(
    tree: &ComponentTree,
    component: ComponentId,
    method: &str,
    inputs: Vec<DataOp>,
    dispatcher: &mut dyn Dispatcher,
) -> Result<ApiOutputs> {
    let scope = tree.display_name(component);
    let target = tree
        .component(component)
        .ok_or_else(|| GraphError::UnknownComponent {
            scope: scope.clone(),
            name: component.to_string(),
        })?;
    let declared = resolve_method(target, &scope, method)?;
    let inputs = declared.complete_inputs(&scope, inputs)?;
    let specs: Vec<_> = inputs.iter().map(DataOp::spec).collect();

    let mut ctx = CallContext::new(tree, component, dispatcher);
    let outputs = target.invoke(&mut ctx, method, &inputs)?;
    declared.check_outputs(&scope, &specs, &outputs)?;
    Ok(ApiOutputs::new(declared, outputs))
}
