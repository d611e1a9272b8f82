//! Error taxonomy for assembling, building, and executing component graphs.
//!
//! Structural errors describe a malformed component tree, spec, or call graph and abort the
//! operation that raised them. Kernel failures are carried unchanged in [`GraphError::Backend`].

use thiserror::Error;

use crate::backend::{BackendError, BackendKind};
use crate::graph::InvocationId;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("component '{parent}' already has a sub-component named '{name}'")]
    NameConflict { parent: String, name: String },

    #[error("component '{child}' is already attached under '{parent}'")]
    AlreadyAttached { child: String, parent: String },

    #[error("invalid component name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("component tree is frozen once a build has started")]
    TreeFrozen,

    #[error("no component constructor registered for type tag '{tag}'")]
    UnknownTypeTag { tag: String },

    #[error("component of kind '{kind}' does not satisfy capability '{capability}' (missing: {missing:?})")]
    CapabilityMismatch {
        capability: &'static str,
        kind: String,
        missing: Vec<String>,
    },

    #[error("invalid component spec: {0}")]
    InvalidSpec(String),

    #[error("component '{scope}' has no API method '{method}'")]
    UnknownMethod { scope: String, method: String },

    #[error("no sub-component '{name}' under '{scope}'")]
    UnknownComponent { scope: String, name: String },

    #[error("'{scope}.{method}' expects {expected} inputs, got {got}")]
    ArityMismatch {
        scope: String,
        method: String,
        expected: usize,
        got: usize,
    },

    #[error("invocation {invocation} has an unresolved binding: {detail}")]
    UnresolvedBinding {
        invocation: InvocationId,
        detail: String,
    },

    #[error("build re-entered while '{scope}' is still building")]
    ReentrantBuild { scope: String },

    #[error("'{scope}.{method}' cannot be invoked after the graph has been built")]
    PostBuildInvocation { scope: String, method: String },

    #[error("'{scope}.{method}' violated its output contract: {detail}")]
    ContractViolation {
        scope: String,
        method: String,
        detail: String,
    },

    #[error("graph rooted at '{scope}' has not been built")]
    NotBuilt { scope: String },

    #[error("operation requires the {expected:?} backend but the graph runs on {found:?}")]
    ModeMismatch {
        expected: BackendKind,
        found: BackendKind,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("no value fed for input '{name}'")]
    MissingFeed { name: String },

    #[error("value fed for '{name}' does not match {expected}: got {got}")]
    FeedMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Convenience Result type used throughout the crate.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;
