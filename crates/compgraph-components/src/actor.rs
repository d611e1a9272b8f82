//! The full path from an environment state to an action: preprocessing, the policy, and
//! optional exploration on top.

use std::any::Any;

use compgraph::spec::ComponentRegistry;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Component, DataOp, GraphError, OutputRule,
    Result, SpecArgs, SpecSource, Tensor,
};
use serde_json::Value;

use crate::exploration::GET_ACTION as EXPLORE;
use crate::policy::{
    GET_ACTION, GET_ACTION_FROM_LOGITS_AND_PROBABILITIES, GET_LOGITS_PARAMETERS_LOG_PROBS,
};
use crate::preprocessing::PREPROCESS;
use crate::stack::{first_output_rule, Stack};
use crate::{EXPLORATION, POLICY, PREPROCESSOR};

pub const GET_PREPROCESSED_STATE_AND_ACTION: &str = "get_preprocessed_state_and_action";
pub const GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS: &str =
    "get_preprocessed_state_action_and_action_probs";

const PREPROCESSOR_CHILD: &str = "preprocessor";
const POLICY_CHILD: &str = "policy";
const EXPLORATION_CHILD: &str = "exploration";

/// Without an exploration child, `time_step` and `use_exploration` are accepted and ignored.
pub struct ActorComponent {
    explores: bool,
    api: ApiTable,
}

impl ActorComponent {
    pub const KIND: &'static str = "actor-component";

    /// Composes already constructed parts. Each is checked against its capability.
    pub fn assembly(
        preprocessor: Assembly,
        policy: Assembly,
        exploration: Option<Assembly>,
    ) -> Result<Assembly> {
        PREPROCESSOR.check(preprocessor.component())?;
        POLICY.check(policy.component())?;
        if let Some(exploration) = &exploration {
            EXPLORATION.check(exploration.component())?;
        }

        let preprocessed = first_output_rule(preprocessor.component(), PREPROCESS)?;
        let action = output_rule(policy.component(), GET_ACTION, "action")?;
        let probs = output_rule(
            policy.component(),
            GET_LOGITS_PARAMETERS_LOG_PROBS,
            "parameters",
        )?;
        let internal = output_rule(policy.component(), GET_ACTION, "last_internal_states")?;

        let explores = exploration.is_some();
        let with_inputs = |method: &str| {
            let declared = ApiMethod::new(method)
                .input("states")
                .optional_input("internal_states")
                .input_or("time_step", Tensor::scalar_i32(0))
                .input_or("use_exploration", Tensor::scalar_bool(true))
                .calls(PREPROCESSOR_CHILD, PREPROCESS);
            if explores {
                declared.calls(EXPLORATION_CHILD, EXPLORE)
            } else {
                declared
            }
        };
        let api = ApiTable::new()
            .with(
                with_inputs(GET_PREPROCESSED_STATE_AND_ACTION)
                    .output("preprocessed_state", preprocessed.clone())
                    .output("action", action.clone())
                    .output("last_internal_states", internal.clone())
                    .calls(POLICY_CHILD, GET_ACTION),
            )
            .with(
                with_inputs(GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS)
                    .output("preprocessed_state", preprocessed)
                    .output("action", action)
                    .output("action_probs", probs)
                    .output("last_internal_states", internal)
                    .calls(POLICY_CHILD, GET_LOGITS_PARAMETERS_LOG_PROBS)
                    .calls(POLICY_CHILD, GET_ACTION_FROM_LOGITS_AND_PROBABILITIES),
            );

        let mut assembly = Assembly::new(Self::KIND, ActorComponent { explores, api })
            .with_child(preprocessor.renamed(PREPROCESSOR_CHILD))
            .with_child(policy.renamed(POLICY_CHILD));
        if let Some(exploration) = exploration {
            assembly.add_child(exploration.renamed(EXPLORATION_CHILD));
        }
        tracing::debug!(explores, "assembled actor component");
        Ok(assembly)
    }

    /// Resolves each part from an instance or a spec. The preprocessor may also be a bare
    /// list of layer specs.
    pub fn from_sources(
        registry: &ComponentRegistry,
        preprocessor: impl Into<SpecSource>,
        policy: impl Into<SpecSource>,
        exploration: Option<SpecSource>,
    ) -> Result<Assembly> {
        let preprocessor = Stack::resolve_preprocessor(preprocessor, registry)?;
        let policy = registry.instantiate(policy, &POLICY)?;
        let exploration = exploration
            .map(|source| registry.instantiate(source, &EXPLORATION))
            .transpose()?;
        Self::assembly(preprocessor, policy, exploration)
    }

    pub fn from_spec(args: &SpecArgs<'_>, registry: &ComponentRegistry) -> Result<Assembly> {
        let preprocessor = args
            .raw("preprocessor_spec")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let policy = args
            .raw("policy_spec")
            .cloned()
            .ok_or_else(|| GraphError::InvalidSpec(format!("'{}' requires 'policy_spec'", args.tag())))?;
        let exploration = match args.raw("exploration_spec") {
            None | Some(Value::Null) => None,
            Some(value) => Some(SpecSource::Json(value.clone())),
        };
        Self::from_sources(registry, preprocessor, policy, exploration)
    }

    /// Exploration on top of the greedy action, when configured.
    fn explore(&self, ctx: &mut CallContext<'_>, action: DataOp, inputs: &[DataOp]) -> Result<DataOp> {
        if !self.explores {
            return Ok(action);
        }
        let out = ctx.call(
            EXPLORATION_CHILD,
            EXPLORE,
            vec![action, inputs[2].clone(), inputs[3].clone()],
        )?;
        Ok(out[0].clone())
    }
}

impl Component for ActorComponent {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let states = ctx.call(PREPROCESSOR_CHILD, PREPROCESS, vec![inputs[0].clone()])?[0].clone();
        let internal_states = inputs[1].clone();
        match method {
            GET_PREPROCESSED_STATE_AND_ACTION => {
                let out = ctx.call(
                    POLICY_CHILD,
                    GET_ACTION,
                    vec![states.clone(), internal_states],
                )?;
                let action = self.explore(ctx, out.output("action")?.clone(), inputs)?;
                let last = out.output("last_internal_states")?.clone();
                Ok(vec![states, action, last])
            }
            GET_PREPROCESSED_STATE_ACTION_AND_ACTION_PROBS => {
                let out = ctx.call(
                    POLICY_CHILD,
                    GET_LOGITS_PARAMETERS_LOG_PROBS,
                    vec![states.clone(), internal_states],
                )?;
                let logits = out.output("logits")?.clone();
                let probs = out.output("parameters")?.clone();
                let sample = ctx.call(
                    POLICY_CHILD,
                    GET_ACTION_FROM_LOGITS_AND_PROBABILITIES,
                    vec![logits, probs.clone()],
                )?;
                let action = self.explore(ctx, sample.output("action")?.clone(), inputs)?;
                let last = out.output("last_internal_states")?.clone();
                Ok(vec![states, action, probs, last])
            }
            other => Err(GraphError::UnknownMethod {
                scope: ctx.scope().to_string(),
                method: other.to_string(),
            }),
        }
    }

    fn config(&self) -> Value {
        serde_json::json!({ "exploration": self.explores })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn output_rule(component: &dyn Component, method: &str, output: &str) -> Result<OutputRule> {
    let declared = component.api().get(method).ok_or_else(|| GraphError::UnknownMethod {
        scope: component.kind().to_string(),
        method: method.to_string(),
    })?;
    let rule = declared
        .outputs()
        .iter()
        .find(|slot| slot.name == output)
        .map(|slot| slot.rule.clone())
        .ok_or_else(|| {
            GraphError::InvalidSpec(format!(
                "'{}' method '{method}' declares no output '{output}'",
                component.kind()
            ))
        })?;
    match rule {
        OutputRule::Fixed(_) | OutputRule::Absent => Ok(rule),
        other => Err(GraphError::InvalidSpec(format!(
            "'{}' output '{output}' of '{method}' must have a fixed contract, got {other:?}",
            component.kind()
        ))),
    }
}

