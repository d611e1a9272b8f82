//! Component specs: declarative `{"type": ..., ...}` descriptions resolved into assemblies.

pub mod registry;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::component::{Assembly, Component};
use crate::error::{GraphError, Result};
use crate::tensor::{Shape, Tensor};

pub use registry::{
    global_registry, instantiate, register_component, ComponentFactory, ComponentRegistry,
    ConstructorFn, COMPONENT_FACTORIES,
};

/// Keyword argument that overrides the local name of the constructed component.
pub const SCOPE_KEY: &str = "scope";

/// A type tag plus constructor keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl ComponentSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            args: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(GraphError::InvalidSpec(format!(
                "component spec must be an object, got {value}"
            )));
        }
        if value.get("type").is_none() {
            return Err(GraphError::InvalidSpec(format!(
                "component spec is missing 'type': {value}"
            )));
        }
        serde_json::from_value(value).map_err(|err| GraphError::InvalidSpec(err.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| GraphError::InvalidSpec(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn args(&self) -> SpecArgs<'_> {
        SpecArgs {
            tag: &self.tag,
            args: &self.args,
        }
    }
}

/// Anything that can be resolved into an assembly.
#[derive(Debug)]
pub enum SpecSource {
    /// An already constructed component, passed through after the capability check.
    Instance(Assembly),
    Spec(ComponentSpec),
    Json(Value),
}

impl From<Assembly> for SpecSource {
    fn from(assembly: Assembly) -> Self {
        SpecSource::Instance(assembly)
    }
}

impl From<ComponentSpec> for SpecSource {
    fn from(spec: ComponentSpec) -> Self {
        SpecSource::Spec(spec)
    }
}

impl From<Value> for SpecSource {
    fn from(value: Value) -> Self {
        SpecSource::Json(value)
    }
}

/// Required API surface of a component slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub name: &'static str,
    pub methods: &'static [&'static str],
}

impl Capability {
    /// Accepts every component.
    pub const ANY: Capability = Capability::new("any", &[]);

    pub const fn new(name: &'static str, methods: &'static [&'static str]) -> Self {
        Self { name, methods }
    }

    pub fn check(&self, component: &dyn Component) -> Result<()> {
        let missing: Vec<String> = self
            .methods
            .iter()
            .filter(|method| !component.api().contains(method))
            .map(|method| method.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GraphError::CapabilityMismatch {
                capability: self.name,
                kind: component.kind().to_string(),
                missing,
            })
        }
    }
}

/// Typed view over the keyword arguments of a spec.
#[derive(Debug, Clone, Copy)]
pub struct SpecArgs<'a> {
    tag: &'a str,
    args: &'a Map<String, Value>,
}

impl<'a> SpecArgs<'a> {
    pub fn tag(&self) -> &'a str {
        self.tag
    }

    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.args.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.args.contains_key(key)
    }

    /// Deserializes `key` if present.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.args.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| {
                    GraphError::InvalidSpec(format!("'{}' argument '{key}': {err}", self.tag))
                }),
        }
    }

    /// Deserializes every argument into a config struct. Keys the struct does not name,
    /// such as `scope` or nested specs, are ignored unless the struct denies them.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_value())
            .map_err(|err| GraphError::InvalidSpec(format!("'{}': {err}", self.tag)))
    }

    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?.ok_or_else(|| {
            GraphError::InvalidSpec(format!("'{}' requires argument '{key}'", self.tag))
        })
    }

    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn string_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// The `scope` argument, or `default`.
    pub fn scope_or(&self, default: &str) -> Result<String> {
        self.string_or(SCOPE_KEY, default)
    }

    /// An `f32` tensor from a (possibly nested) numeric array.
    pub fn tensor(&self, key: &str) -> Result<Option<Tensor>> {
        let Some(value) = self.args.get(key) else {
            return Ok(None);
        };
        let mut dims = Vec::new();
        let mut probe = value;
        while let Value::Array(items) = probe {
            dims.push(items.len());
            match items.first() {
                Some(first) => probe = first,
                None => break,
            }
        }
        let mut data = Vec::new();
        flatten_numbers(value, &mut data).map_err(|detail| {
            GraphError::InvalidSpec(format!("'{}' argument '{key}': {detail}", self.tag))
        })?;
        Tensor::from_vec(Shape::new(dims), data).map(Some).map_err(|_| {
            GraphError::InvalidSpec(format!(
                "'{}' argument '{key}' is not a rectangular array",
                self.tag
            ))
        })
    }

    /// Nested spec or instance-free sub-spec stored under `key`.
    pub fn nested(&self, key: &str) -> Option<SpecSource> {
        self.args.get(key).map(|value| SpecSource::Json(value.clone()))
    }

    /// All arguments as a JSON object, for [`Component::config`].
    pub fn to_value(&self) -> Value {
        Value::Object(self.args.clone())
    }
}

fn flatten_numbers(value: &Value, out: &mut Vec<f32>) -> std::result::Result<(), String> {
    match value {
        Value::Array(items) => items.iter().try_for_each(|item| flatten_numbers(item, out)),
        Value::Number(number) => {
            let value = number
                .as_f64()
                .ok_or_else(|| format!("number {number} is not representable"))?;
            out.push(value as f32);
            Ok(())
        }
        Value::Bool(flag) => {
            out.push(if *flag { 1.0 } else { 0.0 });
            Ok(())
        }
        other => Err(format!("expected numbers, found {other}")),
    }
}
