//! Generalized advantage estimation over a flat batch of time steps.

use std::any::Any;

use compgraph::backend::Primitive;
use compgraph::spec::ComponentRegistry;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Component, DType, DataOp, GraphError,
    OutputRule, Result, SpecArgs,
};
use serde::{Deserialize, Serialize};

pub const CALC_GAE_VALUES: &str = "calc_gae_values";

fn default_discount() -> f32 {
    0.99
}

fn default_gae_lambda() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaeConfig {
    #[serde(default = "default_discount")]
    pub discount: f32,
    #[serde(default = "default_gae_lambda")]
    pub gae_lambda: f32,
}

impl Default for GaeConfig {
    fn default() -> Self {
        Self {
            discount: default_discount(),
            gae_lambda: default_gae_lambda(),
        }
    }
}

/// `calc_gae_values(baseline_values, rewards, terminals, sequence_indices)`.
///
/// All four inputs are `[T]` sequences laid out back to back. `terminals` marks the last step
/// of an episode; `sequence_indices` marks the last step of a fragment, which need not be
/// terminal. Non-terminal fragment ends bootstrap from their own baseline value. The result
/// is a gradient-stopped `[T]` tensor of advantages.
pub struct GeneralizedAdvantageEstimation {
    config: GaeConfig,
    api: ApiTable,
}

impl GeneralizedAdvantageEstimation {
    pub const KIND: &'static str = "generalized-advantage-estimation";

    pub fn new(config: GaeConfig) -> Result<Self> {
        let unit = 0.0f32..=1.0;
        if !unit.contains(&config.discount) || !unit.contains(&config.gae_lambda) {
            return Err(GraphError::InvalidSpec(format!(
                "discount ({}) and gae_lambda ({}) must lie in [0, 1]",
                config.discount, config.gae_lambda
            )));
        }
        let api = ApiTable::new().with(
            ApiMethod::new(CALC_GAE_VALUES)
                .input("baseline_values")
                .input("rewards")
                .input("terminals")
                .input("sequence_indices")
                .output("advantages", OutputRule::LikeInputAs(1, DType::F32)),
        );
        Ok(Self { config, api })
    }

    pub fn from_spec(args: &SpecArgs<'_>, _registry: &ComponentRegistry) -> Result<Assembly> {
        Ok(Assembly::new(Self::KIND, Self::new(args.parse()?)?))
    }
}

impl Component for GeneralizedAdvantageEstimation {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let values = ctx.cast(&inputs[0], DType::F32)?;
        let rewards = ctx.cast(&inputs[1], DType::F32)?;
        let terminals = ctx.cast(&inputs[2], DType::F32)?;
        let fragment_ends = ctx.cast(&inputs[3], DType::F32)?;
        let one = DataOp::scalar(1.0);

        // next[t] = V[t+1] inside a fragment, V[t] at a non-terminal fragment end, 0 at a terminal.
        let boundary = ctx.maximum(&terminals, &fragment_ends)?;
        let shifted = ctx.apply(Primitive::ShiftLeft { fill: 0.0 }, &[&values])?;
        let continues = ctx.sub(&one, &boundary)?;
        let inside = ctx.mul(&shifted, &continues)?;
        let not_terminal = ctx.sub(&one, &terminals)?;
        let bootstrap = ctx.mul(&values, &fragment_ends)?;
        let bootstrap = ctx.mul(&bootstrap, &not_terminal)?;
        let next = ctx.add(&inside, &bootstrap)?;

        let discounted = ctx.mul(&next, &DataOp::scalar(self.config.discount))?;
        let target = ctx.add(&rewards, &discounted)?;
        let deltas = ctx.sub(&target, &values)?;

        let advantages = ctx.apply(
            Primitive::DiscountedCumsum {
                discount: self.config.discount * self.config.gae_lambda,
            },
            &[&deltas, &boundary],
        )?;
        Ok(vec![ctx.stop_gradient(&advantages)?])
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(self.config).unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

