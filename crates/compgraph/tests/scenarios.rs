mod common;

use compgraph::{Assembly, BuildState, ComponentTree, DType, Feeds, GraphError, Tensor, TensorSpec};

use common::{Doubler, Root};

#[test]
fn symbolic_call_returns_placeholder_until_executed() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::doubler_tree());
    let doubler = graph.tree().find("root/doubler").expect("doubler attached");

    let x = graph.input("x", TensorSpec::scalar(DType::F32))?;
    let outputs = graph.call(doubler, "double", vec![x])?;
    let y = outputs.placeholder("y")?.clone();
    assert!(outputs.tensor("y").is_err(), "no value before build");
    assert_eq!(y.spec(), &TensorSpec::scalar(DType::F32));
    assert_eq!(graph.state(), BuildState::Unbuilt);

    let report = graph.build()?;
    assert_eq!(graph.state(), BuildState::Built);
    assert_eq!(report.components, 2);
    assert_eq!(report.invocations_resolved, 1);

    let result = graph.execute(&[&y], &Feeds::new().with("x", Tensor::scalar(3.0)))?;
    assert_eq!(result[0].item()?, 6.0);
    Ok(())
}

#[test]
fn immediate_call_returns_value_directly() -> anyhow::Result<()> {
    let mut graph = common::immediate(common::doubler_tree());
    let doubler = graph.tree().find("root/doubler").expect("doubler attached");

    let outputs = graph.call(doubler, "double", vec![Tensor::scalar(3.0).into()])?;
    assert_eq!(outputs.tensor("y")?.item()?, 6.0);
    assert!(outputs.placeholder("y").is_err());

    // Only the validation pass ran: nothing was recorded or compiled.
    assert_eq!(graph.state(), BuildState::Built);
    assert!(graph.pending_invocations().is_empty());
    assert!(graph.compiled().is_none());
    Ok(())
}

#[test]
fn attaching_an_attached_child_again_fails() -> anyhow::Result<()> {
    let mut tree = ComponentTree::new(Assembly::new("root", Root::new()))?;
    let a = tree.attach_assembly(tree.root(), Assembly::new("a", Root::new()))?;
    let b = tree.attach_assembly(tree.root(), Assembly::new("b", Root::new()))?;
    let child = tree.insert(Assembly::new("child", Doubler::new()))?;

    tree.attach(a, child, "child")?;
    let err = tree.attach(b, child, "child").unwrap_err();
    assert!(matches!(err, GraphError::AlreadyAttached { .. }), "{err}");

    assert_eq!(tree.scope(child), Some("root/a/child"));
    assert_eq!(tree.parent(child), Some(a));
    assert!(tree.child(b, "child").is_none());
    Ok(())
}
