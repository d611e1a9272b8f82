mod common;

use std::any::Any;
use std::sync::Arc;

use compgraph::graph::{Binding, InvocationId};
use compgraph::{
    ApiMethod, ApiTable, Assembly, BuildState, CallContext, Component, ComponentTree, DType,
    DataOp, Feeds, GraphError, OutputRule, Result, Tensor, TensorSpec,
};

use common::{Doubler, Root};

fn f32_input(graph: &mut compgraph::ComponentGraph, name: &str) -> DataOp {
    graph
        .input(name, "f32[?B]".parse().expect("spec"))
        .expect("symbolic graph")
}

#[test]
fn rebuild_extends_without_touching_earlier_wiring() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let x = f32_input(&mut graph, "x");
    let first = graph.call(root, "quadruple", vec![x.clone()])?;
    graph.build()?;
    let artifact = graph.compiled().expect("compiled");

    // Nothing new recorded: the artifact is kept as is.
    let report = graph.build()?;
    assert_eq!(report.invocations_resolved, 0);
    assert!(Arc::ptr_eq(&artifact, &graph.compiled().expect("compiled")));

    let second = graph.call(root, "add", vec![first[0].clone(), x])?;
    let report = graph.build()?;
    assert_eq!(report.invocations_resolved, 1);
    let extended = graph.compiled().expect("compiled");
    assert!(!Arc::ptr_eq(&artifact, &extended));
    assert_eq!(&extended.nodes()[..artifact.nodes().len()], artifact.nodes());
    assert_eq!(&extended.invocations()[..1], artifact.invocations());

    let feeds = Feeds::new().with("x", Tensor::from_vec([2], vec![1.0, 2.0])?);
    let old = artifact.execute(&[first.placeholder("y")?], &feeds)?;
    assert_eq!(old[0].data(), &[4.0, 8.0]);
    let new = extended.execute(&[first.placeholder("y")?, second.placeholder("sum")?], &feeds)?;
    assert_eq!(new[0].data(), &[4.0, 8.0]);
    assert_eq!(new[1].data(), &[5.0, 10.0]);

    // The old artifact does not know about the later invocation.
    let err = artifact
        .execute(&[second.placeholder("sum")?], &feeds)
        .unwrap_err();
    assert!(matches!(err, GraphError::UnresolvedBinding { .. }));
    Ok(())
}

#[test]
fn one_compiled_invocation_per_record() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let x = f32_input(&mut graph, "x");
    let a = graph.call(root, "add", vec![x.clone()])?;
    let b = graph.call(root, "add", vec![x.clone()])?;
    graph.call(root, "add", vec![a[0].clone(), b[0].clone()])?;
    assert_eq!(graph.pending_invocations().len(), 3);

    graph.build()?;
    let artifact = graph.compiled().expect("compiled");
    let ids: Vec<InvocationId> = artifact.invocations().iter().map(|inv| inv.id).collect();
    assert_eq!(ids, vec![InvocationId(0), InvocationId(1), InvocationId(2)]);
    assert_ne!(
        artifact.invocations()[0].outputs,
        artifact.invocations()[1].outputs,
        "identical calls are not deduplicated"
    );
    assert!(graph.pending_invocations().is_empty());
    Ok(())
}

#[test]
fn memoized_methods_reuse_identical_records() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let x = f32_input(&mut graph, "x");
    let a = graph.call(root, "scaled", vec![x.clone()])?;
    let b = graph.call(root, "scaled", vec![x.clone()])?;
    assert_eq!(a.placeholder("y")?, b.placeholder("y")?);
    assert_eq!(graph.pending_invocations().len(), 1);

    let c = graph.call(root, "scaled", vec![Tensor::scalar(2.0).into()])?;
    assert_ne!(a.placeholder("y")?, c.placeholder("y")?);
    assert_eq!(graph.pending_invocations().len(), 2);
    Ok(())
}

#[test]
fn forward_reference_fails_with_unresolved_binding() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let spec = TensorSpec::scalar(DType::F32);
    graph.record_raw(
        root,
        "add",
        vec![Binding::output(InvocationId(1), 0), Binding::Literal(Tensor::scalar(1.0))],
        vec![Some(spec.clone())],
    )?;
    graph.record_raw(
        root,
        "add",
        vec![Binding::Literal(Tensor::scalar(1.0)), Binding::Literal(Tensor::scalar(2.0))],
        vec![Some(spec)],
    )?;

    let err = graph.build().unwrap_err();
    assert!(
        matches!(err, GraphError::UnresolvedBinding { invocation, .. } if invocation == InvocationId(0)),
        "{err}"
    );
    assert_eq!(graph.state(), BuildState::Building);
    Ok(())
}

#[test]
fn build_after_failed_build_is_reentrant() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    graph.call(root, "wrong_dtype", vec![Tensor::scalar(1.0).into()])?;

    let err = graph.build().unwrap_err();
    assert!(matches!(err, GraphError::ContractViolation { .. }), "{err}");
    let err = graph.build().unwrap_err();
    assert!(matches!(err, GraphError::ReentrantBuild { ref scope } if scope == "pipe"));
    let err = graph.call(root, "add", vec![Tensor::scalar(1.0).into()]).unwrap_err();
    assert!(matches!(err, GraphError::ReentrantBuild { .. }));
    Ok(())
}

#[test]
fn post_build_calls_respect_the_method_flag() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let x = f32_input(&mut graph, "x");
    graph.call(root, "setup", vec![x.clone()])?;
    graph.build()?;

    let err = graph.call(root, "setup", vec![x.clone()]).unwrap_err();
    assert!(matches!(err, GraphError::PostBuildInvocation { ref method, .. } if method == "setup"));

    let late = graph.call(root, "add", vec![x])?;
    assert_eq!(graph.pending_invocations().len(), 1);
    graph.build()?;
    let out = graph.execute(
        &[late.placeholder("sum")?],
        &Feeds::new().with("x", Tensor::from_vec([1], vec![2.0])?),
    )?;
    assert_eq!(out[0].data(), &[3.0]);
    Ok(())
}

#[test]
fn unknown_methods_and_arity_are_checked_in_both_modes() -> anyhow::Result<()> {
    for mut graph in [
        common::symbolic(common::pipeline_tree()),
        common::immediate(common::pipeline_tree()),
    ] {
        let root = graph.tree().root();
        let err = graph.call(root, "missing", vec![]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownMethod { ref scope, .. } if scope == "pipe"));

        let err = graph.call(root, "add", vec![]).unwrap_err();
        assert!(matches!(err, GraphError::ArityMismatch { expected: 2, got: 0, .. }));

        let three = vec![DataOp::scalar(1.0), DataOp::scalar(2.0), DataOp::scalar(3.0)];
        let err = graph.call(root, "add", three).unwrap_err();
        assert!(matches!(err, GraphError::ArityMismatch { got: 3, .. }));
    }
    Ok(())
}

#[test]
fn optional_inputs_and_absent_outputs() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let x = f32_input(&mut graph, "x");
    let plain = graph.call(root, "maybe", vec![x.clone()])?;
    assert!(plain.by_name("unused").is_some_and(DataOp::is_none));
    let mask = Tensor::from_vec([2], vec![0.0, 1.0])?;
    let masked = graph.call(root, "maybe", vec![x, mask.into()])?;
    graph.build()?;

    let out = graph.execute(
        &[plain.placeholder("y")?, masked.placeholder("y")?],
        &Feeds::new().with("x", Tensor::from_vec([2], vec![3.0, 4.0])?),
    )?;
    assert_eq!(out[0].data(), &[3.0, 4.0]);
    assert_eq!(out[1].data(), &[0.0, 4.0]);
    Ok(())
}

struct CallsMissingChild {
    api: ApiTable,
}

impl Component for CallsMissingChild {
    fn kind(&self) -> &'static str {
        "calls_missing_child"
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let out = ctx.call("helper", "double", vec![inputs[0].clone()])?;
        Ok(out.into_values())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn calls_missing(child: Option<Assembly>, method: &str) -> ComponentTree {
    let api = ApiTable::new().with(
        ApiMethod::new("run")
            .input("x")
            .output("y", OutputRule::LikeInput(0))
            .calls("helper", method),
    );
    let mut root = Assembly::new("root", CallsMissingChild { api });
    if let Some(child) = child {
        root.add_child(child);
    }
    ComponentTree::new(root).expect("valid tree")
}

#[test]
fn declared_calls_are_validated_before_first_execution() {
    let mut graph = common::immediate(calls_missing(None, "double"));
    let root = graph.tree().root();
    let err = graph.call(root, "run", vec![DataOp::scalar(1.0)]).unwrap_err();
    assert!(matches!(err, GraphError::UnknownComponent { ref name, .. } if name == "helper"));

    let helper = Assembly::new("helper", Doubler::new());
    let mut graph = common::symbolic(calls_missing(Some(helper), "triple"));
    let err = graph.build().unwrap_err();
    assert!(
        matches!(err, GraphError::UnknownMethod { ref scope, ref method } if scope == "root/helper" && method == "triple")
    );

    let helper = Assembly::new("helper", Doubler::new());
    let mut graph = common::immediate(calls_missing(Some(helper), "double"));
    let root = graph.tree().root();
    let out = graph.call_tensors(root, "run", vec![Tensor::scalar(4.0)]).unwrap();
    assert_eq!(out[0].as_ref().unwrap().item().unwrap(), 8.0);
}

#[test]
fn body_outputs_must_match_the_contract() {
    let mut graph = common::immediate(common::pipeline_tree());
    let root = graph.tree().root();
    let err = graph
        .call(root, "wrong_dtype", vec![DataOp::scalar(1.0)])
        .unwrap_err();
    assert!(matches!(err, GraphError::ContractViolation { ref method, .. } if method == "wrong_dtype"));
}

#[test]
fn empty_tree_builds_to_empty_artifact() -> anyhow::Result<()> {
    let tree = ComponentTree::new(Assembly::new("root", Root::new()))?;
    let mut graph = common::symbolic(tree);
    let report = graph.build()?;
    assert_eq!(report.components, 1);
    assert_eq!(report.nodes_emitted, 0);
    assert!(graph.compiled().expect("compiled").nodes().is_empty());
    Ok(())
}
