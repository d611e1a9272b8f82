//! Execution backends: the primitive set, kernels that evaluate it, and the process-wide
//! choice between deferred (symbolic) and per-call (immediate) execution.

pub mod dispatch;
pub mod kernels;
pub mod primitive;
pub mod ref_cpu;
pub mod registry;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::Result;

pub use dispatch::{Dispatcher, ImmediateDispatcher, SymbolicDispatcher};
pub use kernels::{BackendError, BackendResult, Kernels};
pub use primitive::{BinaryOp, CompareOp, Primitive, ReduceOp, UnaryOp};
pub use ref_cpu::{RefCpuKernels, REF_CPU};

/// How API method calls are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Calls are recorded, compiled once by `build()`, and executed many times.
    SymbolicGraph,
    /// Calls run their bodies immediately against concrete tensors.
    ImmediateTensor,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::SymbolicGraph => "symbolic_graph",
            BackendKind::ImmediateTensor => "immediate_tensor",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "symbolic" | "symbolic_graph" | "graph" | "static" => Ok(BackendKind::SymbolicGraph),
            "immediate" | "immediate_tensor" | "eager" => Ok(BackendKind::ImmediateTensor),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

static SELECTED_BACKEND: OnceLock<BackendKind> = OnceLock::new();

/// Fixes the process-wide backend and returns the effective selection.
///
/// The first selection wins. Selecting a different backend afterwards is unsupported: the call
/// returns the earlier choice and graphs already created keep the backend they were given.
pub fn select_backend(kind: BackendKind) -> BackendKind {
    let selected = *SELECTED_BACKEND.get_or_init(|| kind);
    if selected != kind {
        tracing::warn!(requested = %kind, selected = %selected, "backend already selected");
    }
    selected
}

/// Process-wide backend: the first [`select_backend`] call, else `COMPGRAPH_BACKEND`,
/// else [`BackendKind::SymbolicGraph`].
pub fn current_backend() -> BackendKind {
    *SELECTED_BACKEND
        .get_or_init(|| env::backend_from_env().unwrap_or(BackendKind::SymbolicGraph))
}

/// Strategy object injected into every graph: the evaluation mode plus the kernels that
/// evaluate primitives.
#[derive(Clone)]
pub struct ExecutionBackend {
    kind: BackendKind,
    kernels: Arc<dyn Kernels>,
}

impl ExecutionBackend {
    pub fn new(kind: BackendKind, kernels: Arc<dyn Kernels>) -> Self {
        Self { kind, kernels }
    }

    /// The process-wide backend on the default kernels.
    pub fn from_global() -> Result<Self> {
        Ok(Self::new(current_backend(), registry::default_kernels()?))
    }

    /// Symbolic backend on the reference CPU kernels.
    pub fn symbolic() -> Self {
        Self::new(BackendKind::SymbolicGraph, Arc::new(RefCpuKernels::new()))
    }

    /// Immediate backend on the reference CPU kernels.
    pub fn immediate() -> Self {
        Self::new(BackendKind::ImmediateTensor, Arc::new(RefCpuKernels::new()))
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn kernels(&self) -> &Arc<dyn Kernels> {
        &self.kernels
    }
}

impl fmt::Debug for ExecutionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionBackend")
            .field("kind", &self.kind)
            .field("kernels", &self.kernels.backend_name())
            .finish()
    }
}
