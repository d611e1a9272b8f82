//! Explicit graph configuration, as an alternative to the process-wide environment defaults.

use serde::{Deserialize, Serialize};

use crate::backend::{self, BackendKind, ExecutionBackend};
use crate::error::Result;

/// Serializable description of how a [`ComponentGraph`](crate::graph::ComponentGraph) executes.
///
/// Missing fields fall back to the process-wide selection (`COMPGRAPH_BACKEND`,
/// `COMPGRAPH_KERNELS`, then the symbolic backend on the reference CPU kernels).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: Option<BackendKind>,
    pub kernels: Option<String>,
}

impl GraphConfig {
    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    pub fn with_kernels(mut self, name: impl Into<String>) -> Self {
        self.kernels = Some(name.into());
        self
    }

    /// Resolves the configuration into the strategy object injected into a graph.
    pub fn into_backend(self) -> Result<ExecutionBackend> {
        let kind = self.backend.unwrap_or_else(backend::current_backend);
        let kernels = match self.kernels {
            Some(name) => backend::registry::require_kernels(&name)?,
            None => backend::registry::default_kernels()?,
        };
        Ok(ExecutionBackend::new(kind, kernels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_config() {
        let config: GraphConfig =
            serde_json::from_str(r#"{ "backend": "immediate_tensor" }"#).unwrap();
        assert_eq!(config.backend, Some(BackendKind::ImmediateTensor));
        assert_eq!(config.kernels, None);

        let backend = config.with_kernels("ref-cpu").into_backend().unwrap();
        assert_eq!(backend.kind(), BackendKind::ImmediateTensor);
        assert_eq!(backend.kernels().backend_name(), "ref-cpu");
    }
}
