#![allow(dead_code)]

use std::any::Any;

use compgraph::backend::ExecutionBackend;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Component, ComponentGraph, ComponentTree, DType,
    DataOp, OutputRule, Result, Tensor,
};

/// `double(x) -> 2x`.
pub struct Doubler {
    api: ApiTable,
}

impl Doubler {
    pub fn new() -> Self {
        Self {
            api: ApiTable::new().with(
                ApiMethod::new("double")
                    .input("x")
                    .output("y", OutputRule::LikeInput(0)),
            ),
        }
    }
}

impl Component for Doubler {
    fn kind(&self) -> &'static str {
        "doubler"
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let y = ctx.mul(&inputs[0], &DataOp::scalar(2.0))?;
        Ok(vec![y])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Container with no API of its own.
pub struct Root {
    api: ApiTable,
}

impl Root {
    pub fn new() -> Self {
        Self {
            api: ApiTable::new(),
        }
    }
}

impl Component for Root {
    fn kind(&self) -> &'static str {
        "root"
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, method: &str, _inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        Err(compgraph::GraphError::UnknownMethod {
            scope: ctx.scope().to_string(),
            method: method.to_string(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Calls `double` on two children in sequence, and adds two inputs.
pub struct Pipeline {
    api: ApiTable,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            api: ApiTable::new()
                .with(
                    ApiMethod::new("quadruple")
                        .input("x")
                        .output("y", OutputRule::LikeInput(0))
                        .calls("first", "double")
                        .calls("second", "double"),
                )
                .with(
                    ApiMethod::new("add")
                        .input("a")
                        .input_or("b", Tensor::scalar(1.0))
                        .output("sum", OutputRule::LikeInput(0)),
                )
                .with(
                    ApiMethod::new("scaled")
                        .input("x")
                        .output("y", OutputRule::LikeInput(0))
                        .memoized(),
                )
                .with(
                    ApiMethod::new("setup")
                        .input("x")
                        .output("y", OutputRule::LikeInput(0))
                        .no_post_build(),
                )
                .with(
                    ApiMethod::new("maybe")
                        .input("x")
                        .optional_input("mask")
                        .output("y", OutputRule::LikeInput(0))
                        .output("unused", OutputRule::Absent),
                )
                .with(
                    ApiMethod::new("wrong_dtype")
                        .input("x")
                        .output("y", OutputRule::LikeInput(0)),
                ),
        }
    }

    pub fn assembly(name: &str) -> Assembly {
        Assembly::new(name, Pipeline::new())
            .with_child(Assembly::new("first", Doubler::new()))
            .with_child(Assembly::new("second", Doubler::new()))
    }
}

impl Component for Pipeline {
    fn kind(&self) -> &'static str {
        "pipeline"
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        match method {
            "quadruple" => {
                let once = ctx.call("first", "double", vec![inputs[0].clone()])?;
                let twice = ctx.call("second", "double", vec![once[0].clone()])?;
                Ok(vec![twice[0].clone()])
            }
            "add" => Ok(vec![ctx.add(&inputs[0], &inputs[1])?]),
            "scaled" | "setup" => Ok(vec![ctx.mul(&inputs[0], &DataOp::scalar(3.0))?]),
            "maybe" => {
                let y = match &inputs[1] {
                    DataOp::None => inputs[0].clone(),
                    mask => ctx.mul(&inputs[0], mask)?,
                };
                Ok(vec![y, DataOp::None])
            }
            "wrong_dtype" => Ok(vec![ctx.cast(&inputs[0], DType::I32)?]),
            other => Err(compgraph::GraphError::UnknownMethod {
                scope: ctx.scope().to_string(),
                method: other.to_string(),
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Root with a single `doubler` child named `doubler`.
pub fn doubler_tree() -> ComponentTree {
    ComponentTree::new(Assembly::new("root", Root::new()).with_child(Assembly::new("doubler", Doubler::new())))
        .expect("valid tree")
}

pub fn pipeline_tree() -> ComponentTree {
    ComponentTree::new(Pipeline::assembly("pipe")).expect("valid tree")
}

pub fn symbolic(tree: ComponentTree) -> ComponentGraph {
    ComponentGraph::with_backend(tree, ExecutionBackend::symbolic())
}

pub fn immediate(tree: ComponentTree) -> ComponentGraph {
    ComponentGraph::with_backend(tree, ExecutionBackend::immediate())
}
