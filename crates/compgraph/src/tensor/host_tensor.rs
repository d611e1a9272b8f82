//! Host-backed tensor used for literals, feeds, fetched results, and kernel execution.

use rand::Rng;

use super::{DType, Shape, TensorSpec};
use crate::error::{GraphError, Result};

/// Dense row-major tensor stored on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<f32>,
}

impl Tensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        Self::with_dtype(shape.into(), DType::F32, data)
    }

    /// Constructs an `I32` tensor, ensuring the payload matches the expected element count.
    pub fn from_i32(shape: impl Into<Shape>, data: Vec<i32>) -> Result<Self> {
        let data = data.into_iter().map(|value| value as f32).collect();
        Self::with_dtype(shape.into(), DType::I32, data)
    }

    /// Constructs a `Bool` tensor.
    pub fn from_bools(shape: impl Into<Shape>, data: Vec<bool>) -> Result<Self> {
        let data = data
            .into_iter()
            .map(|value| if value { 1.0 } else { 0.0 })
            .collect();
        Self::with_dtype(shape.into(), DType::Bool, data)
    }

    /// Builds a tensor of `dtype` from an `f32` payload, coercing values to the dtype.
    pub fn with_dtype(shape: Shape, dtype: DType, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            return Err(GraphError::ShapeMismatch(format!(
                "tensor data length ({}) does not match shape {}",
                data.len(),
                shape
            )));
        }
        let data = match dtype {
            DType::F32 => data,
            _ => data.into_iter().map(|value| dtype.coerce(value)).collect(),
        };
        Ok(Tensor { shape, dtype, data })
    }

    /// Rank-0 `F32` tensor.
    pub fn scalar(value: f32) -> Self {
        Tensor {
            shape: Shape::scalar(),
            dtype: DType::F32,
            data: vec![value],
        }
    }

    /// Rank-0 `I32` tensor.
    pub fn scalar_i32(value: i32) -> Self {
        Tensor {
            shape: Shape::scalar(),
            dtype: DType::I32,
            data: vec![value as f32],
        }
    }

    /// Rank-0 `Bool` tensor.
    pub fn scalar_bool(value: bool) -> Self {
        Tensor {
            shape: Shape::scalar(),
            dtype: DType::Bool,
            data: vec![if value { 1.0 } else { 0.0 }],
        }
    }

    /// Returns a tensor of the requested shape filled with `value`.
    pub fn full(shape: impl Into<Shape>, value: f32) -> Self {
        let shape = shape.into();
        let len = shape.num_elements();
        Tensor {
            shape,
            dtype: DType::F32,
            data: vec![value; len],
        }
    }

    /// Returns a zero-initialized `F32` tensor of the requested shape.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Returns a one-initialized `F32` tensor of the requested shape.
    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Samples from a normal distribution (`N(0, std^2)`) using the Box-Muller transform.
    pub fn randn(shape: impl Into<Shape>, std: f32, rng: &mut impl Rng) -> Self {
        let shape = shape.into();
        let len = shape.num_elements();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen::<f32>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            values.push(r * theta.cos() * std);
            if values.len() < len {
                values.push(r * theta.sin() * std);
            }
        }
        Tensor {
            shape,
            dtype: DType::F32,
            data: values,
        }
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Borrows the raw payload. Integral and boolean dtypes expose exact integer values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Payload converted to `i32`, truncating toward zero.
    pub fn to_i32_vec(&self) -> Vec<i32> {
        self.data.iter().map(|value| *value as i32).collect()
    }

    /// Payload interpreted as booleans (non-zero is `true`).
    pub fn to_bool_vec(&self) -> Vec<bool> {
        self.data.iter().map(|value| *value != 0.0).collect()
    }

    /// Single value of a one-element tensor.
    pub fn item(&self) -> Result<f32> {
        match self.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(GraphError::ShapeMismatch(format!(
                "item() requires a single element, tensor has shape {}",
                self.shape
            ))),
        }
    }

    /// Fully static spec describing this tensor.
    pub fn spec(&self) -> TensorSpec {
        TensorSpec::of_shape(self.dtype, &self.shape)
    }

    /// Reinterprets the payload under a new shape with the same element count.
    pub fn reshape(self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.num_elements() != self.data.len() {
            return Err(GraphError::ShapeMismatch(format!(
                "cannot reshape {} elements into {}",
                self.data.len(),
                shape
            )));
        }
        Ok(Tensor { shape, ..self })
    }
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Tensor::scalar(value)
    }
}
