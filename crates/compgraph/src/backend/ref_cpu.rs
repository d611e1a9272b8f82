//! Reference CPU kernels: straightforward loops over host tensors.

use super::kernels::{BackendError, BackendResult, Kernels};
use super::primitive::{BinaryOp, CompareOp, Primitive, ReduceOp, UnaryOp};
use crate::tensor::{Shape, Tensor, TensorSpec};

/// Name under which the reference kernels are registered.
pub const REF_CPU: &str = "ref-cpu";

#[derive(Debug, Clone, Copy, Default)]
pub struct RefCpuKernels;

impl RefCpuKernels {
    pub fn new() -> Self {
        RefCpuKernels
    }
}

impl Kernels for RefCpuKernels {
    fn backend_name(&self) -> &str {
        REF_CPU
    }

    fn execute(&self, primitive: &Primitive, inputs: &[&Tensor]) -> BackendResult<Tensor> {
        let specs: Vec<TensorSpec> = inputs.iter().map(|tensor| tensor.spec()).collect();
        let out_spec = primitive
            .infer(&specs)
            .map_err(|err| BackendError::shape(err.to_string()))?;
        let out_shape = out_spec.static_shape().ok_or_else(|| {
            BackendError::shape(format!(
                "{} produced a non-static spec {out_spec}",
                primitive.name()
            ))
        })?;

        let data: Vec<f32> = match primitive {
            Primitive::Unary { op } => inputs[0].data().iter().map(|&x| unary(*op, x)).collect(),
            Primitive::Binary { op } => {
                broadcast_zip(&out_shape, inputs[0], inputs[1], |a, b| binary(*op, a, b))
            }
            Primitive::Compare { op } => {
                broadcast_zip(&out_shape, inputs[0], inputs[1], |a, b| compare(*op, a, b))
            }
            Primitive::Where => {
                let cond = broadcast_to(inputs[0], &out_shape);
                let lhs = broadcast_to(inputs[1], &out_shape);
                let rhs = broadcast_to(inputs[2], &out_shape);
                cond.iter()
                    .zip(lhs.iter().zip(&rhs))
                    .map(|(&c, (&a, &b))| if c != 0.0 { a } else { b })
                    .collect()
            }
            Primitive::Reduce { op, axis, .. } => reduce(inputs[0], *op, *axis),
            Primitive::ArgMax { axis } => argmax(inputs[0], *axis),
            Primitive::Softmax { axis } => softmax(inputs[0], *axis, false),
            Primitive::LogSoftmax { axis } => softmax(inputs[0], *axis, true),
            Primitive::MatMul => matmul(inputs[0], inputs[1]),
            Primitive::Clip { min, max } => inputs[0]
                .data()
                .iter()
                .map(|&x| x.clamp(*min, *max))
                .collect(),
            Primitive::Cast { .. } | Primitive::Squeeze { .. } | Primitive::ExpandDims { .. } => {
                inputs[0].data().to_vec()
            }
            Primitive::StopGradient => inputs[0].data().to_vec(),
            Primitive::ShiftLeft { fill } => shift_left(inputs[0], *fill),
            Primitive::DiscountedCumsum { discount } => {
                discounted_cumsum(inputs[0], inputs[1], *discount)?
            }
            Primitive::RandomUniform { seed } => {
                let step = inputs[0].data()[0] as i64 as u64;
                (0..out_shape.num_elements() as u64)
                    .map(|index| uniform(*seed, step, index))
                    .collect()
            }
            Primitive::OneHot { depth } => one_hot(inputs[0], *depth)?,
        };

        Tensor::with_dtype(out_shape, out_spec.dtype, data)
            .map_err(|err| BackendError::execution(err.to_string()))
    }
}

fn unary(op: UnaryOp, x: f32) -> f32 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Abs => x.abs(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Square => x * x,
        UnaryOp::Tanh => x.tanh(),
        UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        UnaryOp::Relu => x.max(0.0),
        UnaryOp::LogicalNot => bool_value(x == 0.0),
    }
}

fn binary(op: BinaryOp, a: f32, b: f32) -> f32 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Maximum => a.max(b),
        BinaryOp::Minimum => a.min(b),
        BinaryOp::Pow => a.powf(b),
    }
}

fn compare(op: CompareOp, a: f32, b: f32) -> f32 {
    bool_value(match op {
        CompareOp::Greater => a > b,
        CompareOp::GreaterEqual => a >= b,
        CompareOp::Less => a < b,
        CompareOp::Equal => a == b,
    })
}

fn bool_value(flag: bool) -> f32 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Materializes `tensor` at `shape` following right-aligned broadcasting rules.
fn broadcast_to(tensor: &Tensor, shape: &Shape) -> Vec<f32> {
    if tensor.shape() == shape {
        return tensor.data().to_vec();
    }
    let out_dims = shape.dims();
    let in_dims = tensor.shape().dims();
    let offset = out_dims.len() - in_dims.len();
    let in_strides = tensor.shape().strides();
    let out_strides = shape.strides();
    (0..shape.num_elements())
        .map(|flat| {
            let mut source = 0;
            for (axis, (&extent, &stride)) in in_dims.iter().zip(&in_strides).enumerate() {
                if extent == 1 {
                    continue;
                }
                let coord = (flat / out_strides[axis + offset]) % out_dims[axis + offset];
                source += coord * stride;
            }
            tensor.data()[source]
        })
        .collect()
}

fn broadcast_zip(
    shape: &Shape,
    lhs: &Tensor,
    rhs: &Tensor,
    f: impl Fn(f32, f32) -> f32,
) -> Vec<f32> {
    let lhs = broadcast_to(lhs, shape);
    let rhs = broadcast_to(rhs, shape);
    lhs.into_iter().zip(rhs).map(|(a, b)| f(a, b)).collect()
}

/// Splits `dims` around `axis` into `(outer, extent, inner)` element counts.
fn split_axis(dims: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = dims[..axis].iter().product();
    let inner = dims[axis + 1..].iter().product();
    (outer, dims[axis], inner)
}

fn fold_lane(op: ReduceOp, values: impl Iterator<Item = f32>, count: usize) -> f32 {
    match op {
        ReduceOp::Sum => values.sum(),
        ReduceOp::Mean => values.sum::<f32>() / count.max(1) as f32,
        ReduceOp::Max => values.fold(f32::NEG_INFINITY, f32::max),
        ReduceOp::Min => values.fold(f32::INFINITY, f32::min),
    }
}

fn reduce(tensor: &Tensor, op: ReduceOp, axis: Option<usize>) -> Vec<f32> {
    let data = tensor.data();
    match axis {
        None => vec![fold_lane(op, data.iter().copied(), data.len())],
        Some(axis) => {
            let (outer, extent, inner) = split_axis(tensor.shape().dims(), axis);
            let mut out = Vec::with_capacity(outer * inner);
            for o in 0..outer {
                for i in 0..inner {
                    let lane = (0..extent).map(|k| data[(o * extent + k) * inner + i]);
                    out.push(fold_lane(op, lane, extent));
                }
            }
            out
        }
    }
}

fn argmax(tensor: &Tensor, axis: usize) -> Vec<f32> {
    let data = tensor.data();
    let (outer, extent, inner) = split_axis(tensor.shape().dims(), axis);
    let mut out = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let mut best = 0;
            let mut best_value = f32::NEG_INFINITY;
            for k in 0..extent {
                let value = data[(o * extent + k) * inner + i];
                if value > best_value {
                    best = k;
                    best_value = value;
                }
            }
            out.push(best as f32);
        }
    }
    out
}

fn softmax(tensor: &Tensor, axis: usize, log: bool) -> Vec<f32> {
    let data = tensor.data();
    let (outer, extent, inner) = split_axis(tensor.shape().dims(), axis);
    let mut out = vec![0.0; data.len()];
    for o in 0..outer {
        for i in 0..inner {
            let index = |k: usize| (o * extent + k) * inner + i;
            let max = (0..extent)
                .map(|k| data[index(k)])
                .fold(f32::NEG_INFINITY, f32::max);
            let sum: f32 = (0..extent).map(|k| (data[index(k)] - max).exp()).sum();
            for k in 0..extent {
                let shifted = data[index(k)] - max;
                out[index(k)] = if log {
                    shifted - sum.ln()
                } else {
                    shifted.exp() / sum
                };
            }
        }
    }
    out
}

fn matmul(lhs: &Tensor, rhs: &Tensor) -> Vec<f32> {
    let (m, k) = (lhs.shape().dims()[0], lhs.shape().dims()[1]);
    let n = rhs.shape().dims()[1];
    let (a, b) = (lhs.data(), rhs.data());
    let mut out = vec![0.0; m * n];
    for row in 0..m {
        for inner in 0..k {
            let scale = a[row * k + inner];
            for col in 0..n {
                out[row * n + col] += scale * b[inner * n + col];
            }
        }
    }
    out
}

fn shift_left(tensor: &Tensor, fill: f32) -> Vec<f32> {
    let data = tensor.data();
    let steps = tensor.shape().dims()[0];
    if steps == 0 {
        return Vec::new();
    }
    let row = data.len() / steps;
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&data[row..]);
    out.extend(std::iter::repeat(fill).take(row));
    out
}

fn discounted_cumsum(values: &Tensor, resets: &Tensor, discount: f32) -> BackendResult<Vec<f32>> {
    if values.shape() != resets.shape() {
        return Err(BackendError::shape(format!(
            "discounted_cumsum resets shaped {} do not match values shaped {}",
            resets.shape(),
            values.shape()
        )));
    }
    let data = values.data();
    let resets = resets.data();
    let steps = values.shape().dims()[0];
    if steps == 0 {
        return Ok(Vec::new());
    }
    let row = data.len() / steps;
    let mut out = vec![0.0; data.len()];
    for t in (0..steps).rev() {
        for j in 0..row {
            let idx = t * row + j;
            let carry = if t + 1 < steps && resets[idx] == 0.0 {
                out[idx + row]
            } else {
                0.0
            };
            out[idx] = data[idx] + discount * carry;
        }
    }
    Ok(out)
}

fn one_hot(indices: &Tensor, depth: usize) -> BackendResult<Vec<f32>> {
    let mut out = vec![0.0; indices.len() * depth];
    for (row, &index) in indices.data().iter().enumerate() {
        let index = index as i64;
        if index < 0 || index as usize >= depth {
            return Err(BackendError::execution(format!(
                "one_hot index {index} out of range for depth {depth}"
            )));
        }
        out[row * depth + index as usize] = 1.0;
    }
    Ok(out)
}

/// Counter-based sampling: splitmix64 over `(seed, step, index)`, mapped to `[0, 1)`.
fn uniform(seed: u64, step: u64, index: u64) -> f32 {
    let mut z = seed
        ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ index.wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 40) as f32 / (1u64 << 24) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_is_pure_and_in_range() {
        for index in 0..64 {
            let value = uniform(7, 3, index);
            assert!((0.0..1.0).contains(&value));
            assert_eq!(value, uniform(7, 3, index));
        }
        assert_ne!(uniform(7, 3, 0), uniform(7, 4, 0));
    }

    #[test]
    fn broadcast_repeats_rows() {
        let bias = Tensor::from_vec([2], vec![1.0, 2.0]).unwrap();
        let out = broadcast_to(&bias, &Shape::new([3, 2]));
        assert_eq!(out, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }
}
