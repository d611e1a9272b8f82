extern crate self as compgraph;

pub use linkme;

pub mod backend;
pub mod component;
mod config;
mod env;
pub mod error;
pub mod graph;
pub mod spec;
pub mod tensor;

pub use backend::{current_backend, select_backend, BackendKind, ExecutionBackend};
pub use component::{
    ApiMethod, ApiOutputs, ApiTable, Assembly, BuildState, CallContext, Component, ComponentId,
    ComponentTree, OutputRule,
};
pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use graph::{BuildReport, CompiledGraph, ComponentGraph, DataOp, Feeds, Placeholder};
pub use spec::{Capability, ComponentRegistry, ComponentSpec, SpecArgs, SpecSource};
pub use tensor::{DType, Dimension, Shape, Tensor, TensorSpec};
