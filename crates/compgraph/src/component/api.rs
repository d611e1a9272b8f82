//! Declared API methods: the externally callable surface of a component.

use std::fmt;

use super::Component;
use crate::error::{GraphError, Result};
use crate::graph::DataOp;
use crate::tensor::{DType, Tensor, TensorSpec};

/// Derives an output spec from the input specs (`None` entries are absent inputs).
pub type DeriveSpecFn = fn(&[Option<TensorSpec>]) -> Result<Option<TensorSpec>>;

/// Shape/dtype contract of one output.
#[derive(Clone)]
pub enum OutputRule {
    /// Same spec as the given input.
    LikeInput(usize),
    /// Same dimensions as the given input, with another dtype.
    LikeInputAs(usize, DType),
    Fixed(TensorSpec),
    /// The output is always absent.
    Absent,
    Derived(DeriveSpecFn),
}

impl OutputRule {
    pub fn apply(&self, inputs: &[Option<TensorSpec>]) -> Result<Option<TensorSpec>> {
        match self {
            OutputRule::LikeInput(index) => Ok(input_spec(inputs, *index)?.cloned()),
            OutputRule::LikeInputAs(index, dtype) => {
                Ok(input_spec(inputs, *index)?.map(|spec| spec.clone().with_dtype(*dtype)))
            }
            OutputRule::Fixed(spec) => Ok(Some(spec.clone())),
            OutputRule::Absent => Ok(None),
            OutputRule::Derived(derive) => derive(inputs),
        }
    }
}

fn input_spec(inputs: &[Option<TensorSpec>], index: usize) -> Result<Option<&TensorSpec>> {
    inputs
        .get(index)
        .map(Option::as_ref)
        .ok_or_else(|| {
            GraphError::InvalidSpec(format!(
                "output rule refers to input {index} of a {}-input method",
                inputs.len()
            ))
        })
}

impl fmt::Debug for OutputRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputRule::LikeInput(index) => write!(f, "LikeInput({index})"),
            OutputRule::LikeInputAs(index, dtype) => write!(f, "LikeInputAs({index}, {dtype})"),
            OutputRule::Fixed(spec) => write!(f, "Fixed({spec})"),
            OutputRule::Absent => f.write_str("Absent"),
            OutputRule::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// What an input slot takes when the caller leaves it out.
#[derive(Debug, Clone)]
pub enum InputDefault {
    Required,
    Value(Tensor),
    Absent,
}

#[derive(Debug, Clone)]
pub struct InputSlot {
    pub name: String,
    pub default: InputDefault,
}

#[derive(Debug, Clone)]
pub struct OutputSlot {
    pub name: String,
    pub rule: OutputRule,
}

/// Declaration of one API method.
#[derive(Debug, Clone)]
pub struct ApiMethod {
    name: String,
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputSlot>,
    memoized: bool,
    post_build: bool,
    calls: Vec<(String, String)>,
}

impl ApiMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            memoized: false,
            post_build: true,
            calls: Vec::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(InputSlot {
            name: name.into(),
            default: InputDefault::Required,
        });
        self
    }

    /// Input that falls back to `value` when omitted.
    pub fn input_or(mut self, name: impl Into<String>, value: Tensor) -> Self {
        self.inputs.push(InputSlot {
            name: name.into(),
            default: InputDefault::Value(value),
        });
        self
    }

    /// Input that is [`DataOp::None`] when omitted.
    pub fn optional_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(InputSlot {
            name: name.into(),
            default: InputDefault::Absent,
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>, rule: OutputRule) -> Self {
        self.outputs.push(OutputSlot {
            name: name.into(),
            rule,
        });
        self
    }

    /// Structurally identical symbolic calls reuse one record instead of recording again.
    pub fn memoized(mut self) -> Self {
        self.memoized = true;
        self
    }

    /// Rejects calls made after the graph has been built.
    pub fn no_post_build(mut self) -> Self {
        self.post_build = false;
        self
    }

    /// Declares that the body calls `method` on sub-component `child`.
    pub fn calls(mut self, child: impl Into<String>, method: impl Into<String>) -> Self {
        self.calls.push((child.into(), method.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    pub fn is_memoized(&self) -> bool {
        self.memoized
    }

    pub fn allows_post_build(&self) -> bool {
        self.post_build
    }

    pub fn declared_calls(&self) -> &[(String, String)] {
        &self.calls
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|slot| slot.name.as_str())
    }

    /// Checks arity and fills omitted trailing inputs from their declared defaults.
    pub fn complete_inputs(&self, scope: &str, mut inputs: Vec<DataOp>) -> Result<Vec<DataOp>> {
        let required = self
            .inputs
            .iter()
            .take_while(|slot| matches!(slot.default, InputDefault::Required))
            .count();
        if inputs.len() < required || inputs.len() > self.inputs.len() {
            return Err(GraphError::ArityMismatch {
                scope: scope.to_string(),
                method: self.name.clone(),
                expected: self.inputs.len(),
                got: inputs.len(),
            });
        }
        for slot in &self.inputs[inputs.len()..] {
            inputs.push(match &slot.default {
                InputDefault::Value(value) => DataOp::Tensor(value.clone()),
                InputDefault::Absent => DataOp::None,
                InputDefault::Required => {
                    return Err(GraphError::ArityMismatch {
                        scope: scope.to_string(),
                        method: self.name.clone(),
                        expected: self.inputs.len(),
                        got: inputs.len(),
                    })
                }
            });
        }
        Ok(inputs)
    }

    /// Output specs implied by the contract for inputs of the given specs.
    pub fn infer_outputs(&self, inputs: &[Option<TensorSpec>]) -> Result<Vec<Option<TensorSpec>>> {
        self.outputs
            .iter()
            .map(|slot| slot.rule.apply(inputs))
            .collect()
    }

    /// Verifies produced outputs against the contract.
    pub fn check_outputs(
        &self,
        scope: &str,
        inputs: &[Option<TensorSpec>],
        outputs: &[DataOp],
    ) -> Result<()> {
        let violation = |detail: String| GraphError::ContractViolation {
            scope: scope.to_string(),
            method: self.name.clone(),
            detail,
        };
        if outputs.len() != self.outputs.len() {
            return Err(violation(format!(
                "declared {} outputs, body returned {}",
                self.outputs.len(),
                outputs.len()
            )));
        }
        let expected = self.infer_outputs(inputs)?;
        for ((slot, expected), produced) in self.outputs.iter().zip(expected).zip(outputs) {
            match (expected, produced.spec()) {
                (None, None) => {}
                (Some(expected), Some(got)) if expected.compatible(&got) => {}
                (None, Some(got)) => {
                    return Err(violation(format!(
                        "output '{}' must be absent, got {got}",
                        slot.name
                    )))
                }
                (Some(expected), None) => {
                    return Err(violation(format!(
                        "output '{}' is missing, expected {expected}",
                        slot.name
                    )))
                }
                (Some(expected), Some(got)) => {
                    return Err(violation(format!(
                        "output '{}' expected {expected}, got {got}",
                        slot.name
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Ordered set of API methods a component declares.
#[derive(Debug, Clone, Default)]
pub struct ApiTable {
    methods: Vec<ApiMethod>,
}

impl ApiTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, method: ApiMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ApiMethod> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn methods(&self) -> &[ApiMethod] {
        &self.methods
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|method| method.name.as_str())
    }
}

/// Looks up `method` on `component`, reporting the scope on failure.
pub(crate) fn resolve_method<'c>(
    component: &'c dyn Component,
    scope: &str,
    method: &str,
) -> Result<&'c ApiMethod> {
    component
        .api()
        .get(method)
        .ok_or_else(|| GraphError::UnknownMethod {
            scope: scope.to_string(),
            method: method.to_string(),
        })
}

/// Outputs of an API call, addressable by position or by declared name.
#[derive(Debug, Clone)]
pub struct ApiOutputs {
    names: Vec<String>,
    values: Vec<DataOp>,
}

impl ApiOutputs {
    pub(crate) fn new(method: &ApiMethod, values: Vec<DataOp>) -> Self {
        Self {
            names: method.output_names().map(str::to_string).collect(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DataOp> {
        self.values.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&DataOp> {
        let index = self.names.iter().position(|candidate| candidate == name)?;
        self.values.get(index)
    }

    /// Output `name`, or an error naming the missing key.
    pub fn output(&self, name: &str) -> Result<&DataOp> {
        self.by_name(name).ok_or_else(|| {
            GraphError::InvalidSpec(format!(
                "no output named '{name}' (available: {})",
                self.names.join(", ")
            ))
        })
    }

    /// Placeholder behind output `name`, for fetching from a compiled graph.
    pub fn placeholder(&self, name: &str) -> Result<&crate::graph::Placeholder> {
        let value = self.output(name)?;
        value.as_placeholder().ok_or_else(|| {
            GraphError::ShapeMismatch(format!(
                "output '{name}' is a {}, not a placeholder",
                value.kind_name()
            ))
        })
    }

    /// Concrete tensor behind output `name`, as produced by immediate execution.
    pub fn tensor(&self, name: &str) -> Result<&Tensor> {
        let value = self.output(name)?;
        value.as_tensor().ok_or_else(|| {
            GraphError::ShapeMismatch(format!(
                "output '{name}' is a {}, not a tensor",
                value.kind_name()
            ))
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[DataOp] {
        &self.values
    }

    pub fn into_values(self) -> Vec<DataOp> {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataOp)> {
        self.names.iter().map(String::as_str).zip(&self.values)
    }
}

impl std::ops::Index<usize> for ApiOutputs {
    type Output = DataOp;

    fn index(&self, index: usize) -> &DataOp {
        &self.values[index]
    }
}
