use approx::assert_abs_diff_eq;
use compgraph::backend::ExecutionBackend;
use compgraph::{
    Assembly, ComponentGraph, ComponentTree, DataOp, Feeds, GraphError, SpecSource, Tensor,
};
use compgraph_components::actor::{
    GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS, GET_PREPROCESSED_STATE_AND_ACTION,
};
use compgraph_components::dense::{Activation, DenseLayer};
use compgraph_components::exploration::EpsilonConfig;
use compgraph_components::{
    ActorComponent, EpsilonExploration, Policy, ScalePreprocessor, Stack, ACTOR,
};
use serde_json::{json, Value};

fn policy_spec() -> Value {
    json!({
        "type": "policy",
        "network": [{"type": "dense", "weights": [[1.0, 0.0], [0.0, 1.0]]}],
        "action_adapter": {"type": "dense", "weights": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]},
    })
}

fn actor_spec(exploration: Value) -> Value {
    json!({
        "type": "actor-component",
        "preprocessor_spec": [{"type": "scale", "factor": 2.0}],
        "policy_spec": policy_spec(),
        "exploration_spec": exploration,
    })
}

fn graph(actor: Assembly, backend: ExecutionBackend) -> anyhow::Result<ComponentGraph> {
    Ok(ComponentGraph::with_backend(ComponentTree::new(actor)?, backend))
}

fn states() -> anyhow::Result<Tensor> {
    Ok(Tensor::from_vec([2, 2], vec![1.0, 0.0, 0.0, 1.0])?)
}

#[test]
fn actor_spec_builds_the_expected_tree() -> anyhow::Result<()> {
    let registry = compgraph_components::registry();
    let actor = registry.instantiate(actor_spec(Value::Null), &ACTOR)?;
    let tree = ComponentTree::new(actor)?;
    assert!(tree.find("actor-component/preprocessor/scale").is_some());
    assert!(tree.find("actor-component/policy/network").is_some());
    assert!(tree.find("actor-component/policy/action-adapter").is_some());
    assert!(tree.find("actor-component/exploration").is_none());
    Ok(())
}

#[test]
fn greedy_actor_in_immediate_mode() -> anyhow::Result<()> {
    let registry = compgraph_components::registry();
    let actor = registry.instantiate(actor_spec(Value::Null), &ACTOR)?;
    let mut graph = graph(actor, ExecutionBackend::immediate())?;
    let root = graph.tree().root();

    let out = graph.call(root, GET_PREPROCESSED_STATE_AND_ACTION, vec![states()?.into()])?;
    assert_eq!(out.len(), 3);
    let preprocessed = out.output("preprocessed_state")?.clone().into_tensor()?;
    assert_eq!(preprocessed.data(), &[2.0, 0.0, 0.0, 2.0]);
    let action = out.output("action")?.clone().into_tensor()?;
    assert_eq!(action.to_i32_vec(), vec![0, 1]);
    assert!(out.output("last_internal_states")?.is_none());
    Ok(())
}

#[test]
fn action_probs_come_from_the_same_logits() -> anyhow::Result<()> {
    let registry = compgraph_components::registry();
    let actor = registry.instantiate(actor_spec(Value::Null), &ACTOR)?;
    let mut graph = graph(actor, ExecutionBackend::immediate())?;
    let root = graph.tree().root();

    let out = graph.call(
        root,
        GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS,
        vec![states()?.into()],
    )?;
    assert_eq!(out.len(), 4);
    let action = out.output("action")?.clone().into_tensor()?;
    assert_eq!(action.to_i32_vec(), vec![0, 1]);
    let probs = out.output("action_probs")?.clone().into_tensor()?;
    assert_eq!(probs.shape().dims(), &[2, 3]);
    let e2 = 2.0f32.exp();
    assert_abs_diff_eq!(probs.data()[0], e2 / (e2 + 2.0), epsilon = 1e-5);
    assert_abs_diff_eq!(probs.data()[1], 1.0 / (e2 + 2.0), epsilon = 1e-5);
    Ok(())
}

#[test]
fn compiled_actor_matches_immediate_actor() -> anyhow::Result<()> {
    let registry = compgraph_components::registry();
    let spec = actor_spec(json!({
        "type": "epsilon-exploration",
        "num_actions": 3,
        "epsilon_start": 0.5,
        "epsilon_end": 0.5,
        "seed": 4,
    }));
    let batch = Tensor::from_vec([4, 2], vec![1.0, 0.0, 0.0, 1.0, 3.0, 1.0, -1.0, 2.0])?;
    let step = Tensor::scalar_i32(12);

    let actor = registry.instantiate(spec.clone(), &ACTOR)?;
    let mut eager = graph(actor, ExecutionBackend::immediate())?;
    let root = eager.tree().root();
    let expected = eager.call(
        root,
        GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS,
        vec![batch.clone().into(), DataOp::None, step.clone().into()],
    )?;

    let actor = registry.instantiate(spec, &ACTOR)?;
    let mut compiled = graph(actor, ExecutionBackend::symbolic())?;
    let root = compiled.tree().root();
    let states = compiled.input("states", "f32[?B,2]".parse()?)?;
    let time_step = compiled.input("time_step", "i32[]".parse()?)?;
    let out = compiled.call(
        root,
        GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS,
        vec![states, DataOp::None, time_step],
    )?;
    let action = out.placeholder("action")?.clone();
    let probs = out.placeholder("action_probs")?.clone();
    compiled.build()?;

    let feeds = Feeds::new().with("states", batch).with("time_step", step);
    let got = compiled.execute(&[&action, &probs], &feeds)?;
    assert_eq!(&got[0], expected.output("action")?.as_tensor().expect("tensor"));
    assert_eq!(&got[1], expected.output("action_probs")?.as_tensor().expect("tensor"));
    Ok(())
}

#[test]
fn exploration_flag_is_forwarded() -> anyhow::Result<()> {
    let registry = compgraph_components::registry();
    let spec = actor_spec(json!({
        "type": "epsilon-exploration",
        "num_actions": 3,
        "epsilon_start": 1.0,
        "epsilon_end": 1.0,
    }));
    let actor = registry.instantiate(spec, &ACTOR)?;
    let mut graph = graph(actor, ExecutionBackend::immediate())?;
    let root = graph.tree().root();

    let out = graph.call(
        root,
        GET_PREPROCESSED_STATE_AND_ACTION,
        vec![
            states()?.into(),
            DataOp::None,
            Tensor::scalar_i32(0).into(),
            Tensor::scalar_bool(false).into(),
        ],
    )?;
    let action = out.output("action")?.clone().into_tensor()?;
    assert_eq!(action.to_i32_vec(), vec![0, 1]);
    Ok(())
}

#[test]
fn actor_from_instances() -> anyhow::Result<()> {
    let registry = compgraph_components::registry();
    let preprocessor = Stack::preprocessor(vec![Assembly::new(
        ScalePreprocessor::KIND,
        ScalePreprocessor::new(-1.0),
    )])?;
    let network = Stack::network(vec![Assembly::new(
        "hidden",
        DenseLayer::with_weights(
            Tensor::from_vec([2, 2], vec![1.0, 0.0, 0.0, 1.0])?,
            None,
            Activation::Relu,
        )?,
    )])?;
    let policy = Policy::assembly(network, 2, 0)?;
    let exploration = Assembly::new(
        EpsilonExploration::KIND,
        EpsilonExploration::new(EpsilonConfig::new(2))?,
    );
    let actor = ActorComponent::from_sources(
        &registry,
        preprocessor,
        policy,
        Some(SpecSource::from(exploration)),
    )?;
    let tree = ComponentTree::new(actor)?;
    assert!(tree.find("actor-component/exploration").is_some());
    assert!(tree.find("actor-component/policy/network/hidden").is_some());
    Ok(())
}

#[test]
fn policy_spec_is_required() {
    let registry = compgraph_components::registry();
    let err = registry
        .instantiate(json!({"type": "actor-component"}), &ACTOR)
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidSpec(_)));
}

#[test]
fn parts_are_checked_against_their_capabilities() -> anyhow::Result<()> {
    let registry = compgraph_components::registry();
    let err = ActorComponent::from_sources(
        &registry,
        json!([]),
        json!({"type": "scale", "factor": 1.0}),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::CapabilityMismatch { .. }));

    let err = ActorComponent::from_sources(
        &registry,
        json!([]),
        policy_spec(),
        Some(json!({"type": "clip", "min": 0.0, "max": 1.0}).into()),
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::CapabilityMismatch { .. }));
    Ok(())
}
