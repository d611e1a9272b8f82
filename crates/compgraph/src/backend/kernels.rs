use thiserror::Error;

use super::primitive::Primitive;
use crate::tensor::Tensor;

/// Failures raised by kernel implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
    #[error("backend shape violation: {message}")]
    ShapeMismatch { message: String },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        BackendError::ShapeMismatch {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by kernel routines.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Numeric implementation of the primitive set.
///
/// A kernels instance is stateless from the caller's point of view: the same primitive on the
/// same inputs yields the same tensor, which is what lets a compiled graph be executed from
/// several threads at once.
pub trait Kernels: Send + Sync {
    /// Human-readable identifier (e.g. `"ref-cpu"`).
    fn backend_name(&self) -> &str;

    /// Evaluates one primitive on concrete host tensors.
    fn execute(&self, primitive: &Primitive, inputs: &[&Tensor]) -> BackendResult<Tensor>;
}
