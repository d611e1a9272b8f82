use std::sync::Arc;

use approx::abs_diff_eq;
use compgraph::backend::{BackendKind, ExecutionBackend, Kernels};
use compgraph::{Assembly, ComponentGraph, ComponentTree, DataOp, Feeds, Tensor, TensorSpec};

/// Absolute tolerance used when comparing the two execution modes.
pub const TOLERANCE: f32 = 1e-5;

/// One named input of a method call: the spec it is declared with in the compiled graph and
/// the concrete value fed to both modes.
pub struct CallInput {
    pub name: &'static str,
    pub spec: TensorSpec,
    pub value: Tensor,
}

impl CallInput {
    pub fn new(name: &'static str, spec: &str, value: Tensor) -> Self {
        let spec = spec
            .parse()
            .unwrap_or_else(|err| panic!("invalid spec for input '{name}': {err}"));
        Self { name, spec, value }
    }
}

pub fn graph(root: Assembly, kind: BackendKind, kernels: &Arc<dyn Kernels>) -> ComponentGraph {
    let tree = ComponentTree::new(root).expect("component tree assembles");
    ComponentGraph::with_backend(tree, ExecutionBackend::new(kind, Arc::clone(kernels)))
}

/// Calls `method` on the root component immediately.
pub fn run_immediate(
    root: Assembly,
    kernels: &Arc<dyn Kernels>,
    method: &str,
    inputs: &[CallInput],
) -> Vec<Option<Tensor>> {
    let mut graph = graph(root, BackendKind::ImmediateTensor, kernels);
    let root = graph.tree().root();
    let values = inputs.iter().map(|input| input.value.clone()).collect();
    graph
        .call_tensors(root, method, values)
        .unwrap_or_else(|err| panic!("immediate '{method}' failed: {err}"))
}

/// Records `method` on the root component, builds, and executes the artifact with the same
/// values. Absent outputs come back as `None`.
pub fn run_compiled(
    root: Assembly,
    kernels: &Arc<dyn Kernels>,
    method: &str,
    inputs: &[CallInput],
) -> Vec<Option<Tensor>> {
    let mut graph = graph(root, BackendKind::SymbolicGraph, kernels);
    let root = graph.tree().root();
    let mut placeholders = Vec::with_capacity(inputs.len());
    let mut feeds = Feeds::new();
    for input in inputs {
        let placeholder = graph
            .input(input.name, input.spec.clone())
            .unwrap_or_else(|err| panic!("declaring '{}' failed: {err}", input.name));
        placeholders.push(placeholder);
        feeds.insert(input.name, input.value.clone());
    }
    let outputs = graph
        .call(root, method, placeholders)
        .unwrap_or_else(|err| panic!("recording '{method}' failed: {err}"));
    graph
        .build()
        .unwrap_or_else(|err| panic!("building '{method}' failed: {err}"));

    let fetches: Vec<_> = outputs
        .values()
        .iter()
        .filter_map(DataOp::as_placeholder)
        .collect();
    let mut fetched = graph
        .execute(&fetches, &feeds)
        .unwrap_or_else(|err| panic!("executing '{method}' failed: {err}"))
        .into_iter();
    outputs
        .values()
        .iter()
        .map(|output| match output {
            DataOp::Placeholder(_) => fetched.next(),
            _ => None,
        })
        .collect()
}

/// Runs `method` in both modes on fresh assemblies from `build` and asserts they agree.
/// Returns the immediate outputs.
pub fn assert_modes_agree(
    kernels: &Arc<dyn Kernels>,
    build: impl Fn() -> Assembly,
    method: &str,
    inputs: &[CallInput],
) -> Vec<Option<Tensor>> {
    let eager = run_immediate(build(), kernels, method, inputs);
    let compiled = run_compiled(build(), kernels, method, inputs);
    assert_eq!(eager.len(), compiled.len(), "'{method}' output count differs");
    for (index, (lhs, rhs)) in eager.iter().zip(&compiled).enumerate() {
        match (lhs, rhs) {
            (None, None) => {}
            (Some(lhs), Some(rhs)) => assert_tensors_close(lhs, rhs, method, index),
            _ => panic!("'{method}' output {index} present in only one mode"),
        }
    }
    eager
}

pub fn assert_tensors_close(lhs: &Tensor, rhs: &Tensor, method: &str, index: usize) {
    assert_eq!(lhs.dtype(), rhs.dtype(), "'{method}' output {index} dtype");
    assert_eq!(lhs.shape(), rhs.shape(), "'{method}' output {index} shape");
    for (position, (a, b)) in lhs.data().iter().zip(rhs.data()).enumerate() {
        assert!(
            abs_diff_eq!(*a, *b, epsilon = TOLERANCE),
            "'{method}' output {index} differs at {position}: {a} vs {b}"
        );
    }
}

pub fn present(outputs: &[Option<Tensor>], index: usize) -> &Tensor {
    outputs[index]
        .as_ref()
        .unwrap_or_else(|| panic!("output {index} is absent"))
}
