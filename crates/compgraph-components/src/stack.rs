//! Sequential containers: a preprocessor stack and a feed-forward network share one
//! implementation that threads a single input through every layer in order.

use std::any::Any;
use std::collections::HashSet;

use compgraph::spec::ComponentRegistry;
use compgraph::{
    ApiMethod, ApiTable, Assembly, CallContext, Capability, Component, DataOp, GraphError,
    OutputRule, Result, SpecArgs, SpecSource,
};
use serde_json::Value;

use crate::dense::CALL;
use crate::preprocessing::PREPROCESS;
use crate::PREPROCESSOR;

/// Layers of a [`Stack::network`] must expose `call(x)`.
pub const LAYER: Capability = Capability::new("layer", &[CALL]);

/// Applies `method` of each child layer in order.
pub struct Stack {
    kind: &'static str,
    method: &'static str,
    layers: Vec<String>,
    api: ApiTable,
}

impl Stack {
    pub const PREPROCESSOR_KIND: &'static str = "preprocessor-stack";
    pub const NETWORK_KIND: &'static str = "neural-network";

    /// Stack of `preprocess` layers.
    pub fn preprocessor(layers: Vec<Assembly>) -> Result<Assembly> {
        Self::assemble(Self::PREPROCESSOR_KIND, PREPROCESS, &PREPROCESSOR, layers)
    }

    /// Stack of `call` layers.
    pub fn network(layers: Vec<Assembly>) -> Result<Assembly> {
        Self::assemble(Self::NETWORK_KIND, CALL, &LAYER, layers)
    }

    fn assemble(
        kind: &'static str,
        method: &'static str,
        capability: &Capability,
        layers: Vec<Assembly>,
    ) -> Result<Assembly> {
        let mut rule = OutputRule::LikeInput(0);
        let mut names = Vec::with_capacity(layers.len());
        let mut taken = HashSet::new();
        let mut renamed = Vec::with_capacity(layers.len());
        for layer in layers {
            capability.check(layer.component())?;
            rule = compose(rule, first_output_rule(layer.component(), method)?);
            let name = unique_name(layer.name(), &mut taken);
            names.push(name.clone());
            renamed.push(layer.renamed(name));
        }

        let mut declared = ApiMethod::new(method).input("x").output("y", rule);
        for name in &names {
            declared = declared.calls(name.as_str(), method);
        }
        let stack = Stack {
            kind,
            method,
            layers: names,
            api: ApiTable::new().with(declared),
        };
        tracing::trace!(kind, layers = renamed.len(), "assembled stack");
        let assembly = renamed
            .into_iter()
            .fold(Assembly::new(kind, stack), Assembly::with_child);
        Ok(assembly)
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Resolves a preprocessor given as an instance, a spec, or a bare list of layer specs.
    pub fn resolve_preprocessor(
        source: impl Into<SpecSource>,
        registry: &ComponentRegistry,
    ) -> Result<Assembly> {
        match source.into() {
            SpecSource::Json(Value::Array(items)) => {
                Self::preprocessor(instantiate_layers(items, registry, &PREPROCESSOR)?)
            }
            source => registry.instantiate(source, &PREPROCESSOR),
        }
    }

    /// Resolves a network given as an instance, a spec, or a bare list of layer specs.
    pub fn resolve_network(
        source: impl Into<SpecSource>,
        registry: &ComponentRegistry,
    ) -> Result<Assembly> {
        match source.into() {
            SpecSource::Json(Value::Array(items)) => {
                Self::network(instantiate_layers(items, registry, &LAYER)?)
            }
            source => registry.instantiate(source, &LAYER),
        }
    }

    pub(crate) fn preprocessor_from_spec(args: &SpecArgs<'_>, registry: &ComponentRegistry) -> Result<Assembly> {
        Self::preprocessor(instantiate_layers(layer_specs(args)?, registry, &PREPROCESSOR)?)
    }

    pub(crate) fn network_from_spec(args: &SpecArgs<'_>, registry: &ComponentRegistry) -> Result<Assembly> {
        Self::network(instantiate_layers(layer_specs(args)?, registry, &LAYER)?)
    }
}

impl Component for Stack {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn api(&self) -> &ApiTable {
        &self.api
    }

    fn invoke(&self, ctx: &mut CallContext<'_>, _method: &str, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let mut x = inputs[0].clone();
        for layer in &self.layers {
            let out = ctx.call(layer, self.method, vec![x])?;
            x = out[0].clone();
        }
        Ok(vec![x])
    }

    fn config(&self) -> Value {
        serde_json::json!({ "layers": self.layers })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Rule of the first output of `method`, which every stacked layer declares.
pub(crate) fn first_output_rule(component: &dyn Component, method: &str) -> Result<OutputRule> {
    component
        .api()
        .get(method)
        .and_then(|declared| declared.outputs().first())
        .map(|slot| slot.rule.clone())
        .ok_or_else(|| GraphError::InvalidSpec(format!(
            "'{}' declares no output for '{method}'",
            component.kind()
        )))
}

/// Contract of applying `next` to the output of a stage whose contract is `prev`. Both rules
/// describe single-input stages, so `LikeInput(0)` in `next` refers to `prev`'s output.
pub(crate) fn compose(prev: OutputRule, next: OutputRule) -> OutputRule {
    match next {
        OutputRule::LikeInput(0) => prev,
        OutputRule::LikeInputAs(0, dtype) => match prev {
            OutputRule::LikeInput(index) | OutputRule::LikeInputAs(index, _) => {
                OutputRule::LikeInputAs(index, dtype)
            }
            OutputRule::Fixed(spec) => OutputRule::Fixed(spec.with_dtype(dtype)),
            other => other,
        },
        other => other,
    }
}

fn layer_specs(args: &SpecArgs<'_>) -> Result<Vec<Value>> {
    match args.raw("layers") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(GraphError::InvalidSpec(format!(
            "'{}' argument 'layers' must be a list, got {other}",
            args.tag()
        ))),
    }
}

fn instantiate_layers(
    specs: Vec<Value>,
    registry: &ComponentRegistry,
    capability: &Capability,
) -> Result<Vec<Assembly>> {
    specs
        .into_iter()
        .map(|layer| registry.instantiate(SpecSource::Json(layer), capability))
        .collect()
}

fn unique_name(base: &str, taken: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut suffix = 1;
    while !taken.insert(name.clone()) {
        name = format!("{base}-{suffix}");
        suffix += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use compgraph::{DType, Dimension, TensorSpec};

    use super::*;

    #[test]
    fn composed_rules_track_dtype_changes() {
        let cast = compose(OutputRule::LikeInput(0), OutputRule::LikeInputAs(0, DType::F32));
        assert!(matches!(cast, OutputRule::LikeInputAs(0, DType::F32)));

        let fixed = TensorSpec::new(DType::F32, [Dimension::Static(3)]);
        let after_fixed = compose(OutputRule::Fixed(fixed.clone()), OutputRule::LikeInput(0));
        assert!(matches!(after_fixed, OutputRule::Fixed(spec) if spec == fixed));
    }

    #[test]
    fn repeated_layer_names_get_suffixes() {
        let mut taken = HashSet::new();
        let names: Vec<String> = ["scale", "scale", "clip", "scale"]
            .into_iter()
            .map(|name| unique_name(name, &mut taken))
            .collect();
        assert_eq!(names, vec!["scale", "scale-1", "clip", "scale-2"]);
    }
}
