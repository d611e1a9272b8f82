//! Host tensors, dtypes, and the symbolic specs that describe not-yet-computed values.

mod dtype;
mod host_tensor;
mod shape;
mod spec;

pub use dtype::DType;
pub use host_tensor::Tensor;
pub use shape::Shape;
pub use spec::{DimSymbol, Dimension, TensorSpec};
