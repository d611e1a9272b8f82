//! Enumerates the scalar element types understood by primitives and output contracts.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between host tensors and symbolic specs.
///
/// Host storage is always `f32`; integral and boolean dtypes hold exact integer values
/// (`0.0`/`1.0` for booleans).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 32-bit signed integer, used for action indices and sequence markers.
    I32,
    /// Boolean mask produced by comparisons.
    Bool,
}

impl DType {
    /// Returns `true` for the floating-point dtype.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32)
    }

    /// Short lowercase name used in error messages and summaries.
    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I32 => "i32",
            DType::Bool => "bool",
        }
    }

    /// Normalises a raw `f32` payload value to the representable set of this dtype.
    pub fn coerce(self, value: f32) -> f32 {
        match self {
            DType::F32 => value,
            DType::I32 => value.trunc(),
            DType::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
