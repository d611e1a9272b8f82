use std::env;
use std::sync::OnceLock;

use crate::backend::BackendKind;

static COMPGRAPH_BACKEND: OnceLock<Option<BackendKind>> = OnceLock::new();
static COMPGRAPH_KERNELS: OnceLock<Option<String>> = OnceLock::new();

/// Backend requested through `COMPGRAPH_BACKEND`, if set to a recognised value.
pub(crate) fn backend_from_env() -> Option<BackendKind> {
    *COMPGRAPH_BACKEND.get_or_init(|| match env::var("COMPGRAPH_BACKEND") {
        Ok(value) if !value.trim().is_empty() => {
            let parsed = value.parse::<BackendKind>().ok();
            if parsed.is_none() {
                tracing::warn!(value = %value, "ignoring unrecognised COMPGRAPH_BACKEND");
            }
            parsed
        }
        _ => None,
    })
}

/// Kernel implementation requested through `COMPGRAPH_KERNELS`.
pub(crate) fn kernels_from_env() -> Option<&'static str> {
    COMPGRAPH_KERNELS
        .get_or_init(|| match env::var("COMPGRAPH_KERNELS") {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            _ => None,
        })
        .as_deref()
}
