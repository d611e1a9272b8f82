//! The primitive operation set shared by both execution backends.
//!
//! Each primitive is declared once together with its shape/dtype rule, so the symbolic
//! dispatcher can allocate outputs without running anything and the immediate dispatcher can
//! check kernel results against the same contract.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::tensor::{DType, Dimension, TensorSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Square,
    Tanh,
    Sigmoid,
    Relu,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Greater,
    GreaterEqual,
    Less,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

/// One tensor operation, evaluated by a [`Kernels`](super::Kernels) implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Primitive {
    Unary {
        op: UnaryOp,
    },
    /// Elementwise with numpy-style broadcasting.
    Binary {
        op: BinaryOp,
    },
    Compare {
        op: CompareOp,
    },
    /// `where(cond, x, y)`, broadcasting all three operands.
    Where,
    /// Reduction over `axis`, or over every axis when `None`.
    Reduce {
        op: ReduceOp,
        axis: Option<usize>,
        keep_dims: bool,
    },
    ArgMax {
        axis: usize,
    },
    Softmax {
        axis: usize,
    },
    LogSoftmax {
        axis: usize,
    },
    /// `[m, k] x [k, n] -> [m, n]`.
    MatMul,
    Clip {
        min: f32,
        max: f32,
    },
    Cast {
        dtype: DType,
    },
    Squeeze {
        axis: usize,
    },
    ExpandDims {
        axis: usize,
    },
    /// Identity on values; marks a target that must not be differentiated through.
    StopGradient,
    /// `out[t] = x[t + 1]` along axis 0, the last step filled with `fill`.
    ShiftLeft {
        fill: f32,
    },
    /// Reverse discounted sum along axis 0:
    /// `out[t] = x[t] + discount * out[t + 1] * (1 - reset[t])`.
    DiscountedCumsum {
        discount: f32,
    },
    /// Uniform `[0, 1)` samples shaped like the second operand, a pure function of
    /// `(seed, step, element index)` where `step` is the scalar first operand.
    RandomUniform {
        seed: u64,
    },
    OneHot {
        depth: usize,
    },
}

impl Primitive {
    pub fn unary(op: UnaryOp) -> Self {
        Primitive::Unary { op }
    }

    pub fn binary(op: BinaryOp) -> Self {
        Primitive::Binary { op }
    }

    pub fn compare(op: CompareOp) -> Self {
        Primitive::Compare { op }
    }

    pub fn reduce(op: ReduceOp, axis: Option<usize>) -> Self {
        Primitive::Reduce {
            op,
            axis,
            keep_dims: false,
        }
    }

    /// Stable name used in logs and node dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Unary { op } => match op {
                UnaryOp::Neg => "neg",
                UnaryOp::Abs => "abs",
                UnaryOp::Exp => "exp",
                UnaryOp::Log => "log",
                UnaryOp::Sqrt => "sqrt",
                UnaryOp::Square => "square",
                UnaryOp::Tanh => "tanh",
                UnaryOp::Sigmoid => "sigmoid",
                UnaryOp::Relu => "relu",
                UnaryOp::LogicalNot => "logical_not",
            },
            Primitive::Binary { op } => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div => "div",
                BinaryOp::Maximum => "maximum",
                BinaryOp::Minimum => "minimum",
                BinaryOp::Pow => "pow",
            },
            Primitive::Compare { op } => match op {
                CompareOp::Greater => "greater",
                CompareOp::GreaterEqual => "greater_equal",
                CompareOp::Less => "less",
                CompareOp::Equal => "equal",
            },
            Primitive::Where => "where",
            Primitive::Reduce { op, .. } => match op {
                ReduceOp::Sum => "reduce_sum",
                ReduceOp::Mean => "reduce_mean",
                ReduceOp::Max => "reduce_max",
                ReduceOp::Min => "reduce_min",
            },
            Primitive::ArgMax { .. } => "argmax",
            Primitive::Softmax { .. } => "softmax",
            Primitive::LogSoftmax { .. } => "log_softmax",
            Primitive::MatMul => "matmul",
            Primitive::Clip { .. } => "clip",
            Primitive::Cast { .. } => "cast",
            Primitive::Squeeze { .. } => "squeeze",
            Primitive::ExpandDims { .. } => "expand_dims",
            Primitive::StopGradient => "stop_gradient",
            Primitive::ShiftLeft { .. } => "shift_left",
            Primitive::DiscountedCumsum { .. } => "discounted_cumsum",
            Primitive::RandomUniform { .. } => "random_uniform",
            Primitive::OneHot { .. } => "one_hot",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Primitive::Binary { .. }
            | Primitive::Compare { .. }
            | Primitive::MatMul
            | Primitive::DiscountedCumsum { .. }
            | Primitive::RandomUniform { .. } => 2,
            Primitive::Where => 3,
            _ => 1,
        }
    }

    /// Output spec for operands of the given specs.
    pub fn infer(&self, inputs: &[TensorSpec]) -> Result<TensorSpec> {
        if inputs.len() != self.arity() {
            return Err(shape_error(format!(
                "{} expects {} operands, got {}",
                self.name(),
                self.arity(),
                inputs.len()
            )));
        }
        match self {
            Primitive::Unary { op } => {
                let input = &inputs[0];
                match op {
                    UnaryOp::LogicalNot => Ok(input.clone().with_dtype(DType::Bool)),
                    UnaryOp::Neg | UnaryOp::Abs | UnaryOp::Square | UnaryOp::Relu => {
                        Ok(input.clone())
                    }
                    _ => {
                        require_float(self, input)?;
                        Ok(input.clone())
                    }
                }
            }
            Primitive::Binary { .. } => {
                require_same_dtype(self, &inputs[0], &inputs[1])?;
                let dims = broadcast_dims(&inputs[0].dims, &inputs[1].dims)?;
                Ok(TensorSpec::new(inputs[0].dtype, dims))
            }
            Primitive::Compare { .. } => {
                require_same_dtype(self, &inputs[0], &inputs[1])?;
                let dims = broadcast_dims(&inputs[0].dims, &inputs[1].dims)?;
                Ok(TensorSpec::new(DType::Bool, dims))
            }
            Primitive::Where => {
                let (cond, lhs, rhs) = (&inputs[0], &inputs[1], &inputs[2]);
                if cond.dtype != DType::Bool {
                    return Err(shape_error(format!(
                        "where condition must be bool, got {cond}"
                    )));
                }
                require_same_dtype(self, lhs, rhs)?;
                let dims = broadcast_dims(&cond.dims, &lhs.dims)?;
                let dims = broadcast_dims(&dims, &rhs.dims)?;
                Ok(TensorSpec::new(lhs.dtype, dims))
            }
            Primitive::Reduce {
                op,
                axis,
                keep_dims,
            } => {
                let input = &inputs[0];
                let dtype = match op {
                    ReduceOp::Mean => DType::F32,
                    _ => input.dtype,
                };
                let dims = match axis {
                    Some(axis) => {
                        check_axis(self, input, *axis)?;
                        reduce_dims(&input.dims, |i| i == *axis, *keep_dims)
                    }
                    None => reduce_dims(&input.dims, |_| true, *keep_dims),
                };
                Ok(TensorSpec::new(dtype, dims))
            }
            Primitive::ArgMax { axis } => {
                let input = &inputs[0];
                check_axis(self, input, *axis)?;
                Ok(TensorSpec::new(
                    DType::I32,
                    reduce_dims(&input.dims, |i| i == *axis, false),
                ))
            }
            Primitive::Softmax { axis } | Primitive::LogSoftmax { axis } => {
                let input = &inputs[0];
                require_float(self, input)?;
                check_axis(self, input, *axis)?;
                Ok(input.clone())
            }
            Primitive::MatMul => {
                let (lhs, rhs) = (&inputs[0], &inputs[1]);
                require_same_dtype(self, lhs, rhs)?;
                if lhs.rank() != 2 || rhs.rank() != 2 {
                    return Err(shape_error(format!(
                        "matmul expects rank-2 operands, got {lhs} and {rhs}"
                    )));
                }
                if !lhs.dims[1].compatible(&rhs.dims[0]) {
                    return Err(shape_error(format!(
                        "matmul contraction mismatch: {lhs} x {rhs}"
                    )));
                }
                Ok(TensorSpec::new(
                    lhs.dtype,
                    [lhs.dims[0].clone(), rhs.dims[1].clone()],
                ))
            }
            Primitive::Clip { min, max } => {
                if min > max {
                    return Err(shape_error(format!("clip bounds inverted: [{min}, {max}]")));
                }
                Ok(inputs[0].clone())
            }
            Primitive::Cast { dtype } => Ok(inputs[0].clone().with_dtype(*dtype)),
            Primitive::Squeeze { axis } => {
                let input = &inputs[0];
                check_axis(self, input, *axis)?;
                if let Dimension::Static(extent) = input.dims[*axis] {
                    if extent != 1 {
                        return Err(shape_error(format!(
                            "cannot squeeze axis {axis} of {input}: extent is {extent}"
                        )));
                    }
                }
                Ok(TensorSpec::new(
                    input.dtype,
                    reduce_dims(&input.dims, |i| i == *axis, false),
                ))
            }
            Primitive::ExpandDims { axis } => {
                let input = &inputs[0];
                if *axis > input.rank() {
                    return Err(shape_error(format!(
                        "expand_dims axis {axis} out of range for {input}"
                    )));
                }
                let mut dims = input.dims.clone();
                dims.insert(*axis, Dimension::Static(1));
                Ok(TensorSpec::new(input.dtype, dims))
            }
            Primitive::StopGradient => Ok(inputs[0].clone()),
            Primitive::ShiftLeft { .. } => {
                let input = &inputs[0];
                if input.rank() == 0 {
                    return Err(shape_error("shift_left requires a sequence axis".into()));
                }
                Ok(input.clone())
            }
            Primitive::DiscountedCumsum { .. } => {
                let (values, resets) = (&inputs[0], &inputs[1]);
                require_float(self, values)?;
                if values.rank() == 0
                    || values.rank() != resets.rank()
                    || !values
                        .dims
                        .iter()
                        .zip(&resets.dims)
                        .all(|(lhs, rhs)| lhs.compatible(rhs))
                {
                    return Err(shape_error(format!(
                        "discounted_cumsum expects matching sequences, got {values} and {resets}"
                    )));
                }
                Ok(values.clone())
            }
            Primitive::RandomUniform { .. } => {
                let step = &inputs[0];
                if step.rank() != 0 {
                    return Err(shape_error(format!(
                        "random_uniform step must be a scalar, got {step}"
                    )));
                }
                Ok(inputs[1].clone().with_dtype(DType::F32))
            }
            Primitive::OneHot { depth } => {
                let input = &inputs[0];
                if input.dtype != DType::I32 {
                    return Err(shape_error(format!(
                        "one_hot expects i32 indices, got {input}"
                    )));
                }
                let mut dims = input.dims.clone();
                dims.push(Dimension::Static(*depth));
                Ok(TensorSpec::new(DType::F32, dims))
            }
        }
    }
}

/// Right-aligned broadcasting of two symbolic shapes.
///
/// A static extent of 1 stretches to the other side. A dynamic extent paired with a static one
/// resolves to the static extent; the kernels verify the concrete value at execution time.
pub fn broadcast_dims(lhs: &[Dimension], rhs: &[Dimension]) -> Result<Vec<Dimension>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let a = (i + lhs.len()).checked_sub(rank).map(|idx| &lhs[idx]);
        let b = (i + rhs.len()).checked_sub(rank).map(|idx| &rhs[idx]);
        let dim = match (a, b) {
            (Some(a), None) => a.clone(),
            (None, Some(b)) => b.clone(),
            (Some(a), Some(b)) => match (a, b) {
                (Dimension::Static(1), other) | (other, Dimension::Static(1)) => other.clone(),
                (Dimension::Static(x), Dimension::Static(y)) if x != y => {
                    return Err(shape_error(format!(
                        "cannot broadcast {} against {}",
                        render_dims(lhs),
                        render_dims(rhs)
                    )));
                }
                (Dimension::Static(x), _) | (_, Dimension::Static(x)) => Dimension::Static(*x),
                (dynamic, _) => dynamic.clone(),
            },
            (None, None) => unreachable!("index below broadcast rank"),
        };
        out.push(dim);
    }
    Ok(out)
}

fn reduce_dims(dims: &[Dimension], reduced: impl Fn(usize) -> bool, keep: bool) -> Vec<Dimension> {
    dims.iter()
        .enumerate()
        .filter_map(|(i, dim)| match (reduced(i), keep) {
            (false, _) => Some(dim.clone()),
            (true, true) => Some(Dimension::Static(1)),
            (true, false) => None,
        })
        .collect()
}

fn render_dims(dims: &[Dimension]) -> String {
    let parts: Vec<String> = dims.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(","))
}

fn check_axis(primitive: &Primitive, input: &TensorSpec, axis: usize) -> Result<()> {
    if axis >= input.rank() {
        return Err(shape_error(format!(
            "{} axis {axis} out of range for {input}",
            primitive.name()
        )));
    }
    Ok(())
}

fn require_float(primitive: &Primitive, input: &TensorSpec) -> Result<()> {
    if !input.dtype.is_float() {
        return Err(shape_error(format!(
            "{} requires a float operand, got {input}",
            primitive.name()
        )));
    }
    Ok(())
}

fn require_same_dtype(primitive: &Primitive, lhs: &TensorSpec, rhs: &TensorSpec) -> Result<()> {
    if lhs.dtype != rhs.dtype {
        return Err(shape_error(format!(
            "{} operands disagree on dtype: {lhs} vs {rhs}",
            primitive.name()
        )));
    }
    Ok(())
}

fn shape_error(message: String) -> GraphError {
    GraphError::ShapeMismatch(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(raw: &str) -> TensorSpec {
        raw.parse().unwrap()
    }

    #[test]
    fn broadcasting_keeps_dynamic_batch() {
        let out = Primitive::binary(BinaryOp::Add)
            .infer(&[spec("f32[?B,4]"), spec("f32[4]")])
            .unwrap();
        assert_eq!(out, spec("f32[?B,4]"));

        let err = Primitive::binary(BinaryOp::Add)
            .infer(&[spec("f32[3,4]"), spec("f32[5]")])
            .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch(_)));
    }

    #[test]
    fn reductions_drop_axes() {
        let argmax = Primitive::ArgMax { axis: 1 }
            .infer(&[spec("f32[?B,6]")])
            .unwrap();
        assert_eq!(argmax, spec("i32[?B]"));

        let mean = Primitive::reduce(ReduceOp::Mean, None)
            .infer(&[spec("i32[2,3]")])
            .unwrap();
        assert_eq!(mean, spec("f32[]"));
    }

    #[test]
    fn matmul_checks_contraction() {
        let out = Primitive::MatMul
            .infer(&[spec("f32[?B,3]"), spec("f32[3,2]")])
            .unwrap();
        assert_eq!(out, spec("f32[?B,2]"));
        assert!(Primitive::MatMul
            .infer(&[spec("f32[?B,3]"), spec("f32[4,2]")])
            .is_err());
    }
}
