//! Component scenarios every kernels implementation must run identically in both execution
//! modes.

use std::sync::Arc;
use std::thread;

use approx::assert_abs_diff_eq;
use compgraph::backend::{BackendKind, Kernels};
use compgraph::{Assembly, Feeds, Tensor};
use compgraph_components::actor::GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS;
use compgraph_components::advantage::{GaeConfig, CALC_GAE_VALUES};
use compgraph_components::dense::{Activation, DenseConfig, DenseLayer, CALL};
use compgraph_components::exploration::{EpsilonConfig, GET_ACTION as EXPLORE};
use compgraph_components::policy::GET_ACTION;
use compgraph_components::preprocessing::PREPROCESS;
use compgraph_components::{
    ActorComponent, EpsilonExploration, GeneralizedAdvantageEstimation, Stack, ACTOR, POLICY,
    PREPROCESSOR,
};
use serde_json::json;

use crate::harness::{self, present, CallInput};

fn from_spec(spec: serde_json::Value, capability: &compgraph::Capability) -> Assembly {
    compgraph_components::registry()
        .instantiate(spec, capability)
        .unwrap_or_else(|err| panic!("spec failed to instantiate: {err}"))
}

pub fn preprocessing_stack(kernels: &Arc<dyn Kernels>) {
    let spec = json!({
        "type": "preprocessor-stack",
        "layers": [
            {"type": "convert-to-float"},
            {"type": "scale", "factor": 0.5},
            {"type": "clip", "min": -1.0, "max": 2.0},
        ],
    });
    let states = Tensor::from_i32([2, 3], vec![-4, 0, 1, 2, 3, 9]).expect("states");
    let out = harness::assert_modes_agree(
        kernels,
        || from_spec(spec.clone(), &PREPROCESSOR),
        PREPROCESS,
        &[CallInput::new("states", "i32[?B,3]", states)],
    );
    assert_eq!(present(&out, 0).data(), &[-1.0, 0.0, 0.5, 1.0, 1.5, 2.0]);
}

pub fn dense_network(kernels: &Arc<dyn Kernels>) {
    let build = || {
        Stack::network(vec![
            Assembly::new(
                "hidden",
                DenseLayer::new(
                    DenseConfig::new(3, 5)
                        .with_activation(Activation::Tanh)
                        .with_seed(1),
                ),
            ),
            Assembly::new(
                "out",
                DenseLayer::new(
                    DenseConfig::new(5, 2)
                        .with_activation(Activation::Sigmoid)
                        .with_seed(2),
                ),
            ),
        ])
        .expect("network assembles")
    };
    let x = Tensor::from_vec([4, 3], (0..12).map(|i| i as f32 / 6.0 - 1.0).collect()).expect("x");
    let out = harness::assert_modes_agree(kernels, build, CALL, &[CallInput::new("x", "f32[?B,3]", x)]);
    let y = present(&out, 0);
    assert_eq!(y.shape().dims(), &[4, 2]);
    assert!(y.data().iter().all(|v| (0.0..=1.0).contains(v)));
}

pub fn policy_outputs(kernels: &Arc<dyn Kernels>) {
    let spec = json!({
        "type": "policy",
        "network": [{"type": "dense", "in_features": 4, "units": 6, "activation": "relu", "seed": 3}],
        "num_actions": 3,
        "seed": 4,
    });
    let nn_input = Tensor::from_vec([3, 4], (0..12).map(|i| (i % 5) as f32 - 2.0).collect())
        .expect("nn_input");
    let out = harness::assert_modes_agree(
        kernels,
        || from_spec(spec.clone(), &POLICY),
        GET_ACTION,
        &[CallInput::new("nn_input", "f32[?B,4]", nn_input)],
    );
    assert_eq!(out.len(), 5);
    assert!(out[4].is_none());

    let actions = present(&out, 0).to_i32_vec();
    let logits = present(&out, 1);
    let probs = present(&out, 2);
    for (row, action) in actions.iter().enumerate() {
        let row_logits = &logits.data()[row * 3..row * 3 + 3];
        let best = row_logits
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if *v > row_logits[best] { i } else { best });
        assert_eq!(*action as usize, best);
        let total: f32 = probs.data()[row * 3..row * 3 + 3].iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
    }
}

pub fn epsilon_exploration(kernels: &Arc<dyn Kernels>) {
    let config = EpsilonConfig::new(4).with_schedule(0.8, 0.2, 10).with_seed(17);
    let build = || {
        Assembly::new(
            EpsilonExploration::KIND,
            EpsilonExploration::new(config.clone()).expect("valid config"),
        )
    };
    let action = Tensor::from_i32([32], vec![2; 32]).expect("action");
    let out = harness::assert_modes_agree(
        kernels,
        build,
        EXPLORE,
        &[
            CallInput::new("action", "i32[?B]", action),
            CallInput::new("time_step", "i32[]", Tensor::scalar_i32(5)),
            CallInput::new("use_exploration", "bool[]", Tensor::scalar_bool(true)),
        ],
    );
    assert!(present(&out, 0).to_i32_vec().iter().all(|a| (0..4).contains(a)));
}

pub fn generalized_advantage_estimation(kernels: &Arc<dyn Kernels>) {
    let build = || {
        let config = GaeConfig {
            discount: 0.9,
            gae_lambda: 0.95,
        };
        Assembly::new(
            GeneralizedAdvantageEstimation::KIND,
            GeneralizedAdvantageEstimation::new(config).expect("valid config"),
        )
    };
    let values = Tensor::from_vec([6], vec![0.5, 0.4, 0.3, 1.0, 0.8, 0.6]).expect("values");
    let rewards = Tensor::from_vec([6], vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0]).expect("rewards");
    let terminals = Tensor::from_vec([6], vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]).expect("terminals");
    let fragments = Tensor::from_vec([6], vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0]).expect("fragments");
    let out = harness::assert_modes_agree(
        kernels,
        build,
        CALC_GAE_VALUES,
        &[
            CallInput::new("baseline_values", "f32[?T]", values.clone()),
            CallInput::new("rewards", "f32[?T]", rewards.clone()),
            CallInput::new("terminals", "f32[?T]", terminals.clone()),
            CallInput::new("sequence_indices", "f32[?T]", fragments.clone()),
        ],
    );
    let expected = reference_gae(
        values.data(),
        rewards.data(),
        terminals.data(),
        fragments.data(),
        0.9,
        0.95,
    );
    for (got, want) in present(&out, 0).data().iter().zip(expected) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-5);
    }
}

/// Step-by-step GAE over flat fragments.
fn reference_gae(
    values: &[f32],
    rewards: &[f32],
    terminals: &[f32],
    fragments: &[f32],
    discount: f32,
    gae_lambda: f32,
) -> Vec<f32> {
    let steps = values.len();
    let mut advantages = vec![0.0; steps];
    let mut running = 0.0;
    for t in (0..steps).rev() {
        let terminal = terminals[t] > 0.0;
        let end = terminal || fragments[t] > 0.0;
        let next_value = if terminal {
            0.0
        } else if end {
            values[t]
        } else {
            values[t + 1]
        };
        if end {
            running = 0.0;
        }
        let delta = rewards[t] + discount * next_value - values[t];
        running = delta + discount * gae_lambda * running;
        advantages[t] = running;
    }
    advantages
}

fn actor_spec() -> serde_json::Value {
    json!({
        "type": "actor-component",
        "preprocessor_spec": [{"type": "scale", "factor": 0.1}],
        "policy_spec": {
            "type": "policy",
            "network": [{"type": "dense", "in_features": 2, "units": 4, "activation": "tanh", "seed": 8}],
            "num_actions": 3,
            "seed": 9,
        },
        "exploration_spec": {
            "type": "epsilon-exploration",
            "num_actions": 3,
            "epsilon_start": 0.3,
            "epsilon_end": 0.3,
            "seed": 10,
        },
    })
}

pub fn actor_component(kernels: &Arc<dyn Kernels>) {
    let states = Tensor::from_vec([5, 2], (0..10).map(|i| i as f32).collect()).expect("states");
    let out = harness::assert_modes_agree(
        kernels,
        || from_spec(actor_spec(), &ACTOR),
        GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS,
        &[CallInput::new("states", "f32[?B,2]", states)],
    );
    assert_eq!(out.len(), 4);
    assert_eq!(present(&out, 2).shape().dims(), &[5, 3]);
    assert!(out[3].is_none());
}

/// One compiled actor driven from several threads returns the same actions as a single
/// caller.
pub fn shared_artifact_across_threads(kernels: &Arc<dyn Kernels>) {
    let actor: Assembly = from_spec(actor_spec(), &ACTOR);
    assert_eq!(actor.component().kind(), ActorComponent::KIND);
    let mut graph = harness::graph(actor, BackendKind::SymbolicGraph, kernels);
    let root = graph.tree().root();
    let states = graph
        .input("states", "f32[?B,2]".parse().expect("spec"))
        .expect("input");
    let step = graph
        .input("time_step", "i32[]".parse().expect("spec"))
        .expect("input");
    let out = graph
        .call(
            root,
            GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS,
            vec![states, compgraph::DataOp::None, step],
        )
        .expect("record");
    let action = out.placeholder("action").expect("action").clone();
    graph.build().expect("build");
    let compiled = graph.compiled().expect("compiled artifact");

    let feeds_for = |step: i32| {
        let states = Tensor::from_vec([3, 2], vec![1.0, -1.0, 0.5, 2.0, -3.0, 0.0]).expect("states");
        Feeds::new()
            .with("states", states)
            .with("time_step", Tensor::scalar_i32(step))
    };
    let expected: Vec<Tensor> = (0..4)
        .map(|step| compiled.execute(&[&action], &feeds_for(step)).expect("execute")[0].clone())
        .collect();

    let handles: Vec<_> = (0..4)
        .map(|step| {
            let compiled = Arc::clone(&compiled);
            let action = action.clone();
            let feeds = feeds_for(step);
            thread::spawn(move || compiled.execute(&[&action], &feeds).expect("execute")[0].clone())
        })
        .collect();
    for (handle, expected) in handles.into_iter().zip(expected) {
        assert_eq!(handle.join().expect("worker panicked"), expected);
    }
}
