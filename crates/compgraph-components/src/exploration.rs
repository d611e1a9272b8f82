//! Epsilon-greedy exploration over discrete actions.

use std::any::Any;

use compgraph::backend::{CompareOp, Primitive};
use compgraph::spec::ComponentRegistry;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Component, DType, DataOp, GraphError,
    OutputRule, Result, SpecArgs, Tensor,
};
use serde::{Deserialize, Serialize};

pub const GET_ACTION: &str = "get_action";

/// Decorrelates the "explore?" draw from the random-action draw.
const ACTION_STREAM: u64 = 0x5851_F42D_4C95_7F2D;

fn default_epsilon_start() -> f32 {
    1.0
}

fn default_epsilon_end() -> f32 {
    0.1
}

fn default_decay_steps() -> u32 {
    10_000
}

/// Epsilon decays linearly from `epsilon_start` to `epsilon_end` over `decay_steps` time
/// steps and then stays at `epsilon_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpsilonConfig {
    pub num_actions: usize,
    #[serde(default = "default_epsilon_start")]
    pub epsilon_start: f32,
    #[serde(default = "default_epsilon_end")]
    pub epsilon_end: f32,
    #[serde(default = "default_decay_steps")]
    pub decay_steps: u32,
    #[serde(default)]
    pub seed: u64,
}

impl EpsilonConfig {
    pub fn new(num_actions: usize) -> Self {
        Self {
            num_actions,
            epsilon_start: default_epsilon_start(),
            epsilon_end: default_epsilon_end(),
            decay_steps: default_decay_steps(),
            seed: 0,
        }
    }

    pub fn with_schedule(mut self, start: f32, end: f32, decay_steps: u32) -> Self {
        self.epsilon_start = start;
        self.epsilon_end = end;
        self.decay_steps = decay_steps;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Host-side value of the schedule, matching what `get_action` computes in the graph.
    pub fn epsilon_at(&self, time_step: u32) -> f32 {
        let progress = (time_step as f32 / self.decay_steps.max(1) as f32).min(1.0);
        self.epsilon_start - (self.epsilon_start - self.epsilon_end) * progress
    }
}

/// `get_action(action, time_step, use_exploration)`: with probability epsilon (per batch
/// element) replaces the given action with a uniformly random one.
///
/// Random draws are a pure function of `(seed, time_step, element)`, so a compiled graph
/// gives the same answer for the same feeds on every run.
pub struct EpsilonExploration {
    config: EpsilonConfig,
    api: ApiTable,
}

impl EpsilonExploration {
    pub const KIND: &'static str = "epsilon-exploration";

    pub fn new(config: EpsilonConfig) -> Result<Self> {
        if config.num_actions == 0 {
            return Err(GraphError::InvalidSpec(
                "epsilon exploration needs at least one action".to_string(),
            ));
        }
        let bounds = 0.0f32..=1.0;
        if !bounds.contains(&config.epsilon_start) || !bounds.contains(&config.epsilon_end) {
            return Err(GraphError::InvalidSpec(format!(
                "epsilon schedule [{}, {}] leaves [0, 1]",
                config.epsilon_start, config.epsilon_end
            )));
        }
        let api = ApiTable::new().with(
            ApiMethod::new(GET_ACTION)
                .input("action")
                .input_or("time_step", Tensor::scalar_i32(0))
                .input_or("use_exploration", Tensor::scalar_bool(true))
                .output("action", OutputRule::LikeInput(0)),
        );
        Ok(Self { config, api })
    }

    pub fn epsilon_config(&self) -> &EpsilonConfig {
        &self.config
    }

    pub fn from_spec(args: &SpecArgs<'_>, _registry: &ComponentRegistry) -> Result<Assembly> {
        Ok(Assembly::new(Self::KIND, Self::new(args.parse()?)?))
    }
}

impl Component for EpsilonExploration {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let (action, time_step, use_exploration) = (&inputs[0], &inputs[1], &inputs[2]);
        let config = &self.config;

        let step = ctx.cast(time_step, DType::F32)?;
        let progress = ctx.div(&step, &DataOp::scalar(config.decay_steps.max(1) as f32))?;
        let progress = ctx.minimum(&progress, &DataOp::scalar(1.0))?;
        let span = DataOp::scalar(config.epsilon_start - config.epsilon_end);
        let decayed = ctx.mul(&progress, &span)?;
        let epsilon = ctx.sub(&DataOp::scalar(config.epsilon_start), &decayed)?;

        let draw = ctx.apply(Primitive::RandomUniform { seed: config.seed }, &[time_step, action])?;
        let explore = ctx.compare(CompareOp::Less, &draw, &epsilon)?;
        let explore = ctx.select(use_exploration, &explore, &DataOp::from(Tensor::scalar_bool(false)))?;

        let pick = ctx.apply(
            Primitive::RandomUniform {
                seed: config.seed ^ ACTION_STREAM,
            },
            &[time_step, action],
        )?;
        let scaled = ctx.mul(&pick, &DataOp::scalar(config.num_actions as f32))?;
        let random_action = ctx.cast(&scaled, action_dtype(action))?;
        Ok(vec![ctx.select(&explore, &random_action, action)?])
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn action_dtype(action: &DataOp) -> DType {
    action.spec().map_or(DType::I32, |spec| spec.dtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_decays_linearly_then_holds() {
        let config = EpsilonConfig::new(4).with_schedule(1.0, 0.2, 100);
        assert_eq!(config.epsilon_at(0), 1.0);
        assert!((config.epsilon_at(50) - 0.6).abs() < 1e-6);
        assert!((config.epsilon_at(100) - 0.2).abs() < 1e-6);
        assert!((config.epsilon_at(1_000) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(EpsilonExploration::new(EpsilonConfig::new(0)).is_err());
        let config = EpsilonConfig::new(2).with_schedule(1.5, 0.1, 10);
        assert!(EpsilonExploration::new(config).is_err());
    }
}
