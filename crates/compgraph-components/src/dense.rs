//! Fully connected layer `y = act(x W + b)` with host-initialized parameters.

use std::any::Any;

use compgraph::spec::ComponentRegistry;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Component, DType, DataOp, Dimension, GraphError,
    OutputRule, Result, SpecArgs, Tensor, TensorSpec,
};
use compgraph::backend::UnaryOp;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::BATCH;

pub const CALL: &str = "call";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    fn op(self) -> Option<UnaryOp> {
        match self {
            Activation::Linear => None,
            Activation::Relu => Some(UnaryOp::Relu),
            Activation::Tanh => Some(UnaryOp::Tanh),
            Activation::Sigmoid => Some(UnaryOp::Sigmoid),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Construction arguments of a [`DenseLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseConfig {
    pub in_features: usize,
    pub units: usize,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_true")]
    pub use_bias: bool,
    /// Seed for the weight initializer.
    #[serde(default)]
    pub seed: u64,
}

impl DenseConfig {
    pub fn new(in_features: usize, units: usize) -> Self {
        Self {
            in_features,
            units,
            activation: Activation::Linear,
            use_bias: true,
            seed: 0,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

pub struct DenseLayer {
    config: DenseConfig,
    weight: Tensor,
    bias: Option<Tensor>,
    api: ApiTable,
}

impl DenseLayer {
    pub const KIND: &'static str = "dense";

    /// Draws weights from `N(0, 1 / in_features)` using the configured seed; biases start at
    /// zero.
    pub fn new(config: DenseConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let std = (config.in_features.max(1) as f32).sqrt().recip();
        let weight = Tensor::randn([config.in_features, config.units], std, &mut rng);
        let bias = config.use_bias.then(|| Tensor::zeros([config.units]));
        Self::assemble(config, weight, bias)
    }

    /// Uses the given parameters; `weight` must be `[in_features, units]`.
    pub fn with_weights(weight: Tensor, bias: Option<Tensor>, activation: Activation) -> Result<Self> {
        let dims = weight.shape().dims();
        if dims.len() != 2 {
            return Err(GraphError::ShapeMismatch(format!(
                "dense weight must be 2D, got shape {}",
                weight.shape()
            )));
        }
        let (in_features, units) = (dims[0], dims[1]);
        if let Some(bias) = &bias {
            if bias.shape().dims() != [units] {
                return Err(GraphError::ShapeMismatch(format!(
                    "dense bias must be [{units}], got shape {}",
                    bias.shape()
                )));
            }
        }
        let config = DenseConfig {
            in_features,
            units,
            activation,
            use_bias: bias.is_some(),
            seed: 0,
        };
        Ok(Self::assemble(config, weight, bias))
    }

    fn assemble(config: DenseConfig, weight: Tensor, bias: Option<Tensor>) -> Self {
        let out = TensorSpec::new(
            DType::F32,
            [Dimension::dynamic(BATCH), Dimension::Static(config.units)],
        );
        let api = ApiTable::new().with(
            ApiMethod::new(CALL)
                .input("x")
                .output("y", OutputRule::Fixed(out)),
        );
        Self {
            config,
            weight,
            bias,
            api,
        }
    }

    pub fn units(&self) -> usize {
        self.config.units
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn from_spec(args: &SpecArgs<'_>, _registry: &ComponentRegistry) -> Result<Assembly> {
        let layer = match args.tensor("weights")? {
            Some(weight) => {
                let bias = args.tensor("bias")?;
                let activation = args.get("activation")?.unwrap_or_default();
                Self::with_weights(weight, bias, activation)?
            }
            None => Self::new(args.parse()?),
        };
        Ok(Assembly::new(Self::KIND, layer))
    }
}

impl Component for DenseLayer {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let weight = DataOp::Tensor(self.weight.clone());
        let mut y = ctx.matmul(&inputs[0], &weight)?;
        if let Some(bias) = &self.bias {
            y = ctx.add(&y, &DataOp::Tensor(bias.clone()))?;
        }
        if let Some(op) = self.config.activation.op() {
            y = ctx.unary(op, &y)?;
        }
        Ok(vec![y])
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_weights() {
        let a = DenseLayer::new(DenseConfig::new(4, 3).with_seed(9));
        let b = DenseLayer::new(DenseConfig::new(4, 3).with_seed(9));
        let c = DenseLayer::new(DenseConfig::new(4, 3).with_seed(10));
        assert_eq!(a.weight(), b.weight());
        assert_ne!(a.weight(), c.weight());
        assert_eq!(a.weight().shape().dims(), &[4, 3]);
    }

    #[test]
    fn explicit_weights_are_validated() {
        let weight = Tensor::zeros([3]);
        assert!(DenseLayer::with_weights(weight, None, Activation::Linear).is_err());

        let weight = Tensor::zeros([2, 3]);
        let bias = Tensor::zeros([2]);
        assert!(DenseLayer::with_weights(weight, Some(bias), Activation::Relu).is_err());
    }
}
