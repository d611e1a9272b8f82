//! Elementwise preprocessing layers. Each exposes `preprocess(x)` and is usually stacked with
//! [`Stack::preprocessor`](crate::stack::Stack::preprocessor).

use std::any::Any;

use compgraph::spec::ComponentRegistry;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Component, DType, DataOp, GraphError,
    OutputRule, Result, SpecArgs,
};
use serde::{Deserialize, Serialize};

pub const PREPROCESS: &str = "preprocess";

fn preprocess_api(rule: OutputRule) -> ApiTable {
    ApiTable::new().with(ApiMethod::new(PREPROCESS).input("x").output("y", rule))
}

/// Multiplies every element by a constant factor.
pub struct ScalePreprocessor {
    factor: f32,
    api: ApiTable,
}

impl ScalePreprocessor {
    pub const KIND: &'static str = "scale";

    pub fn new(factor: f32) -> Self {
        Self {
            factor,
            api: preprocess_api(OutputRule::LikeInput(0)),
        }
    }

    pub fn from_spec(args: &SpecArgs<'_>, _registry: &ComponentRegistry) -> Result<Assembly> {
        let factor = args.require("factor")?;
        Ok(Assembly::new(Self::KIND, Self::new(factor)))
    }
}

impl Component for ScalePreprocessor {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        Ok(vec![ctx.mul(&inputs[0], &DataOp::scalar(self.factor))?])
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({ "factor": self.factor })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipConfig {
    pub min: f32,
    pub max: f32,
}

/// Clamps every element into `[min, max]`.
pub struct ClipPreprocessor {
    min: f32,
    max: f32,
    api: ApiTable,
}

impl ClipPreprocessor {
    pub const KIND: &'static str = "clip";

    pub fn new(min: f32, max: f32) -> Result<Self> {
        if min > max {
            return Err(GraphError::InvalidSpec(format!(
                "clip bounds inverted: [{min}, {max}]"
            )));
        }
        Ok(Self {
            min,
            max,
            api: preprocess_api(OutputRule::LikeInput(0)),
        })
    }

    pub fn from_spec(args: &SpecArgs<'_>, _registry: &ComponentRegistry) -> Result<Assembly> {
        let config: ClipConfig = args.parse()?;
        Ok(Assembly::new(Self::KIND, Self::new(config.min, config.max)?))
    }
}

impl Component for ClipPreprocessor {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        Ok(vec![ctx.clip(&inputs[0], self.min, self.max)?])
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(ClipConfig {
            min: self.min,
            max: self.max,
        })
        .unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Casts raw observations (e.g. integer pixels or flags) to `f32`.
pub struct ConvertToFloat {
    api: ApiTable,
}

impl ConvertToFloat {
    pub const KIND: &'static str = "convert-to-float";

    pub fn new() -> Self {
        Self {
            api: preprocess_api(OutputRule::LikeInputAs(0, DType::F32)),
        }
    }

    pub fn from_spec(_args: &SpecArgs<'_>, _registry: &ComponentRegistry) -> Result<Assembly> {
        Ok(Assembly::new(Self::KIND, Self::new()))
    }
}

impl Default for ConvertToFloat {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for ConvertToFloat {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        Ok(vec![ctx.cast(&inputs[0], DType::F32)?])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

