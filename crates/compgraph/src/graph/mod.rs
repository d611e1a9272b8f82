//! Call recording, compilation, and execution of component graphs.

pub mod compiled;
pub mod compiler;
mod component_graph;
pub mod data_op;
pub(crate) mod draft;
pub mod record;

pub use compiled::{CompiledGraph, CompiledInvocation, Feeds, GraphNode, NodeOp};
pub use compiler::BuildReport;
pub use component_graph::ComponentGraph;
pub use data_op::{DataOp, Placeholder, PlaceholderSource, Symbol, ValueId};
pub use record::{Binding, Invocation, InvocationId};
