use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use compgraph::backend::{BackendResult, Kernels, Primitive};
use compgraph::Tensor;

/// Test-only kernels that forward to another implementation and count the primitives they
/// evaluate.
pub struct RecordingKernels {
    inner: Arc<dyn Kernels>,
    counts: Mutex<BTreeMap<&'static str, usize>>,
}

impl RecordingKernels {
    pub fn new(inner: Arc<dyn Kernels>) -> Self {
        Self {
            inner,
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Evaluations per primitive name since construction or the last [`reset`](Self::reset).
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        self.counts.lock().expect("counts mutex poisoned").clone()
    }

    pub fn count(&self, primitive: &str) -> usize {
        self.counts().get(primitive).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts().values().sum()
    }

    pub fn reset(&self) {
        self.counts.lock().expect("counts mutex poisoned").clear();
    }
}

impl Kernels for RecordingKernels {
    fn backend_name(&self) -> &str {
        "recording"
    }

    fn execute(&self, primitive: &Primitive, inputs: &[&Tensor]) -> BackendResult<Tensor> {
        *self
            .counts
            .lock()
            .expect("counts mutex poisoned")
            .entry(primitive.name())
            .or_default() += 1;
        self.inner.execute(primitive, inputs)
    }
}
