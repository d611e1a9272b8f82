mod common;

use std::sync::Arc;
use std::thread;

use compgraph::{DataOp, Feeds, GraphError, Tensor};

fn quadruple_graph() -> anyhow::Result<(compgraph::ComponentGraph, compgraph::Placeholder)> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let x = graph.input("x", "f32[?B]".parse()?)?;
    let out = graph.call(root, "quadruple", vec![x])?;
    let y = out.placeholder("y")?.clone();
    graph.build()?;
    Ok((graph, y))
}

#[test]
fn missing_feed_is_reported_by_name() -> anyhow::Result<()> {
    let (graph, y) = quadruple_graph()?;
    let err = graph.execute(&[&y], &Feeds::new()).unwrap_err();
    assert!(matches!(err, GraphError::MissingFeed { ref name } if name == "x"));
    Ok(())
}

#[test]
fn feed_must_match_declared_spec() -> anyhow::Result<()> {
    let (graph, y) = quadruple_graph()?;
    let matrix = Tensor::zeros([2, 2]);
    let err = graph
        .execute(&[&y], &Feeds::new().with("x", matrix))
        .unwrap_err();
    assert!(matches!(err, GraphError::FeedMismatch { ref name, .. } if name == "x"));

    let ints = Tensor::from_i32([2], vec![1, 2])?;
    let err = graph.execute(&[&y], &Feeds::new().with("x", ints)).unwrap_err();
    assert!(matches!(err, GraphError::FeedMismatch { .. }));
    Ok(())
}

#[test]
fn redeclaring_an_input_with_another_spec_fails() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let first = graph.input("x", "f32[?B]".parse()?)?;
    let again = graph.input("x", "f32[?B]".parse()?)?;
    assert_eq!(first.as_placeholder(), again.as_placeholder());
    let err = graph.input("x", "f32[3]".parse()?).unwrap_err();
    assert!(matches!(err, GraphError::FeedMismatch { .. }));
    Ok(())
}

#[test]
fn dynamic_batch_accepts_any_length() -> anyhow::Result<()> {
    let (graph, y) = quadruple_graph()?;
    for len in [1usize, 3, 7] {
        let data: Vec<f32> = (0..len).map(|i| i as f32).collect();
        let out = graph.execute(&[&y], &Feeds::new().with("x", Tensor::from_vec([len], data.clone())?))?;
        let expected: Vec<f32> = data.iter().map(|v| v * 4.0).collect();
        assert_eq!(out[0].data(), expected.as_slice());
    }
    Ok(())
}

#[test]
fn concurrent_executions_share_one_artifact() -> anyhow::Result<()> {
    let (graph, y) = quadruple_graph()?;
    let artifact = graph.compiled().expect("compiled");

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let artifact = Arc::clone(&artifact);
            let y = y.clone();
            thread::spawn(move || {
                let value = worker as f32;
                let feeds = Feeds::new().with("x", Tensor::from_vec([2], vec![value, -value]).unwrap());
                let out = artifact.execute(&[&y], &feeds).unwrap();
                (value, out[0].data().to_vec())
            })
        })
        .collect();

    for handle in handles {
        let (value, data) = handle.join().expect("worker panicked");
        assert_eq!(data, vec![4.0 * value, -4.0 * value]);
    }
    Ok(())
}

#[test]
fn unconsumed_inputs_can_be_fetched() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let unused = graph.input("unused", "f32[]".parse()?)?;
    graph.build()?;
    let placeholder = unused.as_placeholder().expect("placeholder");
    let out = graph.execute(&[placeholder], &Feeds::new().with("unused", Tensor::scalar(5.0)))?;
    assert_eq!(out[0].item()?, 5.0);
    Ok(())
}

#[test]
fn placeholders_of_another_graph_are_rejected() -> anyhow::Result<()> {
    let (graph, _) = quadruple_graph()?;
    let (_, foreign) = quadruple_graph()?;
    let err = graph
        .execute(&[&foreign], &Feeds::new().with("x", Tensor::scalar(1.0)))
        .unwrap_err();
    assert!(matches!(err, GraphError::UnresolvedBinding { .. }), "{err}");
    Ok(())
}

#[test]
fn execute_before_build_is_not_built() -> anyhow::Result<()> {
    let mut graph = common::symbolic(common::pipeline_tree());
    let root = graph.tree().root();
    let x = graph.input("x", "f32[]".parse()?)?;
    let out = graph.call(root, "add", vec![x])?;
    let err = graph
        .execute(&[out.placeholder("sum")?], &Feeds::new())
        .unwrap_err();
    assert!(matches!(err, GraphError::NotBuilt { .. }));
    Ok(())
}

#[test]
fn immediate_graphs_have_no_inputs_or_artifact() {
    let mut graph = common::immediate(common::pipeline_tree());
    let err = graph.input("x", "f32[]".parse().unwrap()).unwrap_err();
    assert!(matches!(err, GraphError::ModeMismatch { .. }));
    let err = graph.execute(&[], &Feeds::new()).unwrap_err();
    assert!(matches!(err, GraphError::ModeMismatch { .. }));
}

#[test]
fn placeholders_cannot_flow_into_immediate_calls() -> anyhow::Result<()> {
    let (symbolic, y) = quadruple_graph()?;
    drop(symbolic);
    let mut graph = common::immediate(common::pipeline_tree());
    let root = graph.tree().root();
    let err = graph
        .call(root, "add", vec![DataOp::Placeholder(y)])
        .unwrap_err();
    assert!(matches!(err, GraphError::ModeMismatch { .. }));
    Ok(())
}

#[test]
fn compiled_graph_dump_lists_every_node() -> anyhow::Result<()> {
    let (graph, _) = quadruple_graph()?;
    let artifact = graph.compiled().expect("compiled");
    let dump = artifact.to_string();
    assert_eq!(dump.lines().count(), artifact.nodes().len());
    assert!(dump.starts_with("%0 = feed 'x'"), "{dump}");
    assert_eq!(artifact.feed_names(), vec!["x"]);
    assert_eq!(artifact.kernels_name(), "ref-cpu");
    Ok(())
}
