//! Discrete-action policy: a network followed by an action adapter producing one logit per
//! action.

use std::any::Any;

use compgraph::spec::ComponentRegistry;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Component, DType, DataOp, Dimension, GraphError,
    OutputRule, Result, SpecArgs, TensorSpec,
};
use serde_json::Value;

use crate::dense::{DenseConfig, DenseLayer, CALL};
use crate::stack::{first_output_rule, Stack, LAYER};
use crate::BATCH;

pub const GET_ACTION: &str = "get_action";
pub const GET_LOGITS_PARAMETERS_LOG_PROBS: &str = "get_logits_parameters_log_probs";
pub const GET_ACTION_FROM_LOGITS_AND_PROBABILITIES: &str =
    "get_action_from_logits_and_probabilities";

const NETWORK: &str = "network";
const ACTION_ADAPTER: &str = "action-adapter";

/// Maps network inputs to logits over `num_actions` discrete actions.
///
/// `parameters` are the softmax probabilities of the logits; actions are picked greedily.
/// Recurrent networks are not supported, so `internal_states` is accepted and ignored and
/// `last_internal_states` is always absent.
pub struct Policy {
    num_actions: usize,
    api: ApiTable,
}

impl Policy {
    pub const KIND: &'static str = "policy";

    /// Puts a fresh action adapter (seeded with `seed`) on top of `network`. The network must
    /// declare a static output width.
    pub fn assembly(network: Assembly, num_actions: usize, seed: u64) -> Result<Assembly> {
        let width = output_width(&network)?;
        let adapter = DenseLayer::new(DenseConfig::new(width, num_actions).with_seed(seed));
        Self::with_adapter(network, Assembly::new(ACTION_ADAPTER, adapter))
    }

    /// Uses an explicit action adapter; its output width is the number of actions.
    pub fn with_adapter(network: Assembly, adapter: Assembly) -> Result<Assembly> {
        LAYER.check(network.component())?;
        LAYER.check(adapter.component())?;
        let num_actions = output_width(&adapter)?;
        let policy = Policy {
            num_actions,
            api: policy_api(num_actions),
        };
        Ok(Assembly::new(Self::KIND, policy)
            .with_child(network.renamed(NETWORK))
            .with_child(adapter.renamed(ACTION_ADAPTER)))
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// `{"type": "policy", "network": <spec or list of layer specs>, "num_actions": n,
    /// "seed": s}`; an `action_adapter` spec replaces the generated adapter, and
    /// `in_features` sizes the adapter when the network has no fixed width.
    pub fn from_spec(args: &SpecArgs<'_>, registry: &ComponentRegistry) -> Result<Assembly> {
        let network = match args.raw(NETWORK) {
            Some(value) => Stack::resolve_network(value.clone(), registry)?,
            None => Stack::network(Vec::new())?,
        };
        if let Some(adapter) = args.raw("action_adapter") {
            let adapter = Stack::resolve_network(adapter.clone(), registry)?;
            return Self::with_adapter(network, adapter);
        }
        let num_actions = args.require("num_actions")?;
        let seed = args.u64_or("seed", 0)?;
        // A network without a fixed output width (e.g. no layers) needs `in_features`.
        let width = match output_width(&network) {
            Ok(width) => width,
            Err(err) => args.get("in_features")?.ok_or(err)?,
        };
        let adapter = DenseLayer::new(DenseConfig::new(width, num_actions).with_seed(seed));
        Self::with_adapter(network, Assembly::new(ACTION_ADAPTER, adapter))
    }

    fn logits_and_probabilities(
        &self,
        ctx: &mut CallContext<'_>,
        nn_input: &DataOp,
    ) -> Result<(DataOp, DataOp, DataOp)> {
        let features = ctx.call(NETWORK, CALL, vec![nn_input.clone()])?;
        let logits = ctx.call(ACTION_ADAPTER, CALL, vec![features[0].clone()])?[0].clone();
        let parameters = ctx.softmax(&logits, 1)?;
        let log_probs = ctx.log_softmax(&logits, 1)?;
        Ok((logits, parameters, log_probs))
    }
}

fn policy_api(num_actions: usize) -> ApiTable {
    let per_action = TensorSpec::new(
        DType::F32,
        [Dimension::dynamic(BATCH), Dimension::Static(num_actions)],
    );
    let action = TensorSpec::new(DType::I32, [Dimension::dynamic(BATCH)]);
    ApiTable::new()
        .with(
            ApiMethod::new(GET_ACTION)
                .input("nn_input")
                .optional_input("internal_states")
                .output("action", OutputRule::Fixed(action.clone()))
                .output("logits", OutputRule::Fixed(per_action.clone()))
                .output("parameters", OutputRule::Fixed(per_action.clone()))
                .output("log_probs", OutputRule::Fixed(per_action.clone()))
                .output("last_internal_states", OutputRule::Absent)
                .calls(NETWORK, CALL)
                .calls(ACTION_ADAPTER, CALL),
        )
        .with(
            ApiMethod::new(GET_LOGITS_PARAMETERS_LOG_PROBS)
                .input("nn_input")
                .optional_input("internal_states")
                .output("logits", OutputRule::Fixed(per_action.clone()))
                .output("parameters", OutputRule::Fixed(per_action.clone()))
                .output("log_probs", OutputRule::Fixed(per_action))
                .output("last_internal_states", OutputRule::Absent)
                .memoized()
                .calls(NETWORK, CALL)
                .calls(ACTION_ADAPTER, CALL),
        )
        .with(
            ApiMethod::new(GET_ACTION_FROM_LOGITS_AND_PROBABILITIES)
                .input("logits")
                .input("parameters")
                .output("action", OutputRule::Fixed(action)),
        )
}

impl Component for Policy {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        match method {
            GET_ACTION => {
                let (logits, parameters, log_probs) = self.logits_and_probabilities(ctx, &inputs[0])?;
                let action = ctx.argmax(&logits, 1)?;
                Ok(vec![action, logits, parameters, log_probs, DataOp::None])
            }
            GET_LOGITS_PARAMETERS_LOG_PROBS => {
                let (logits, parameters, log_probs) = self.logits_and_probabilities(ctx, &inputs[0])?;
                Ok(vec![logits, parameters, log_probs, DataOp::None])
            }
            GET_ACTION_FROM_LOGITS_AND_PROBABILITIES => Ok(vec![ctx.argmax(&inputs[0], 1)?]),
            other => Err(GraphError::UnknownMethod {
                scope: ctx.scope().to_string(),
                method: other.to_string(),
            }),
        }
    }

    fn config(&self) -> Value {
        serde_json::json!({ "num_actions": self.num_actions })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Static trailing extent of a layer's `call` output.
fn output_width(layer: &Assembly) -> Result<usize> {
    let width = match first_output_rule(layer.component(), CALL)? {
        OutputRule::Fixed(spec) => spec.dims.last().and_then(Dimension::as_static),
        _ => None,
    };
    width.ok_or_else(|| {
        GraphError::InvalidSpec(format!(
            "'{}' must declare a fixed output width to sit inside a policy",
            layer.component().kind()
        ))
    })
}

