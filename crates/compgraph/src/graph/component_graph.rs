use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::compiled::{CompiledGraph, Feeds};
use super::data_op::{DataOp, Placeholder, PlaceholderSource};
use super::record::{bind_inputs, Binding, CallRecorder, Invocation};
use crate::backend::{BackendKind, ExecutionBackend, ImmediateDispatcher};
use crate::component::api::{resolve_method, ApiMethod, ApiOutputs};
use crate::component::context::invoke_method;
use crate::component::{BuildState, ComponentId, ComponentTree};
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::tensor::{Tensor, TensorSpec};

static GRAPH_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_graph_id() -> u64 {
    GRAPH_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A component tree bound to an execution backend.
///
/// Under [`BackendKind::SymbolicGraph`], [`call`](Self::call) records invocations and hands
/// back placeholders; [`build`](Self::build) compiles them into a [`CompiledGraph`] that is
/// executed with [`execute`](Self::execute). Under [`BackendKind::ImmediateTensor`], calls run
/// their bodies right away and `build` only validates the tree.
pub struct ComponentGraph {
    pub(crate) id: u64,
    pub(crate) tree: ComponentTree,
    pub(crate) backend: ExecutionBackend,
    pub(crate) recorder: CallRecorder,
    pub(crate) compiled: Option<Arc<CompiledGraph>>,
}

impl ComponentGraph {
    /// Binds `tree` to the process-wide backend selection.
    pub fn new(tree: ComponentTree) -> Result<Self> {
        Ok(Self::with_backend(tree, ExecutionBackend::from_global()?))
    }

    pub fn with_backend(tree: ComponentTree, backend: ExecutionBackend) -> Self {
        tracing::debug!(backend = %backend.kind(), kernels = backend.kernels().backend_name(), "created component graph");
        Self {
            id: next_graph_id(),
            tree,
            backend,
            recorder: CallRecorder::default(),
            compiled: None,
        }
    }

    pub fn with_config(tree: ComponentTree, config: GraphConfig) -> Result<Self> {
        Ok(Self::with_backend(tree, config.into_backend()?))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    /// Mutable access for assembly; structural edits fail once a build has started.
    pub fn tree_mut(&mut self) -> &mut ComponentTree {
        &mut self.tree
    }

    pub fn backend(&self) -> &ExecutionBackend {
        &self.backend
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Lifecycle state of the root component.
    pub fn state(&self) -> BuildState {
        self.tree
            .state(self.tree.root())
            .unwrap_or(BuildState::Unbuilt)
    }

    /// Most recent compiled artifact, if a symbolic build has completed.
    pub fn compiled(&self) -> Option<Arc<CompiledGraph>> {
        self.compiled.clone()
    }

    /// Invocation records waiting for the next build.
    pub fn pending_invocations(&self) -> &[Invocation] {
        self.recorder.pending()
    }

    /// Declares a named graph input. Redeclaring a name with the same spec returns the same
    /// placeholder.
    pub fn input(&mut self, name: &str, spec: TensorSpec) -> Result<DataOp> {
        self.require_symbolic()?;
        let name = self.recorder.declare_feed(name, spec.clone())?;
        Ok(DataOp::Placeholder(Placeholder::new(
            self.id,
            PlaceholderSource::Feed(name),
            spec,
        )))
    }

    /// Calls `method` on the component at `scope`.
    pub fn call_scope(
        &mut self,
        scope: &str,
        method: &str,
        inputs: Vec<DataOp>,
    ) -> Result<ApiOutputs> {
        let component = self
            .tree
            .find(scope)
            .ok_or_else(|| GraphError::UnknownComponent {
                scope: self.root_scope(),
                name: scope.to_string(),
            })?;
        self.call(component, method, inputs)
    }

    /// Calls `method` on `component`: recorded under the symbolic backend, executed under the
    /// immediate one.
    pub fn call(
        &mut self,
        component: ComponentId,
        method: &str,
        inputs: Vec<DataOp>,
    ) -> Result<ApiOutputs> {
        let (scope, declared) = self.declared_method(component, method)?;
        match self.backend.kind() {
            BackendKind::ImmediateTensor => self.call_immediate(component, method, inputs),
            BackendKind::SymbolicGraph => self.record_call(component, scope, &declared, inputs),
        }
    }

    /// Immediate-mode convenience: calls with tensors and returns the outputs as tensors.
    pub fn call_tensors(
        &mut self,
        component: ComponentId,
        method: &str,
        inputs: Vec<Tensor>,
    ) -> Result<Vec<Option<Tensor>>> {
        let outputs = self.call(component, method, inputs.into_iter().map(DataOp::from).collect())?;
        outputs
            .into_values()
            .into_iter()
            .map(|value| match value {
                DataOp::None => Ok(None),
                other => other.into_tensor().map(Some),
            })
            .collect()
    }

    /// Appends an invocation record with explicit bindings and output specs.
    ///
    /// Unlike [`call`](Self::call), bindings are taken as given and not checked against
    /// existing records; dangling references surface as
    /// [`GraphError::UnresolvedBinding`] when the graph is built.
    pub fn record_raw(
        &mut self,
        component: ComponentId,
        method: &str,
        inputs: Vec<Binding>,
        output_specs: Vec<Option<TensorSpec>>,
    ) -> Result<Vec<DataOp>> {
        self.require_symbolic()?;
        let (scope, declared) = self.declared_method(component, method)?;
        self.check_recordable(&scope, &declared)?;
        if inputs.len() != declared.inputs().len() {
            return Err(GraphError::ArityMismatch {
                scope,
                method: method.to_string(),
                expected: declared.inputs().len(),
                got: inputs.len(),
            });
        }
        if output_specs.len() != declared.outputs().len() {
            return Err(GraphError::ContractViolation {
                scope,
                method: method.to_string(),
                detail: format!(
                    "declared {} outputs, record supplies {} specs",
                    declared.outputs().len(),
                    output_specs.len()
                ),
            });
        }
        let outputs = self.recorder.push(
            self.id,
            component,
            scope,
            method.to_string(),
            inputs,
            output_specs,
            false,
        );
        Ok(outputs
            .into_iter()
            .map(|output| output.map_or(DataOp::None, DataOp::Placeholder))
            .collect())
    }

    /// Runs the latest compiled artifact.
    pub fn execute(&self, fetches: &[&Placeholder], feeds: &Feeds) -> Result<Vec<Tensor>> {
        self.require_symbolic()?;
        let compiled = self.compiled.as_ref().ok_or_else(|| GraphError::NotBuilt {
            scope: self.root_scope(),
        })?;
        compiled.execute(fetches, feeds)
    }

    fn declared_method(&self, component: ComponentId, method: &str) -> Result<(String, ApiMethod)> {
        let scope = self
            .tree
            .scope(component)
            .ok_or_else(|| GraphError::UnknownComponent {
                scope: self.root_scope(),
                name: self
                    .tree
                    .name(component)
                    .map_or_else(|| component.to_string(), str::to_string),
            })?
            .to_string();
        let target = self
            .tree
            .component(component)
            .ok_or_else(|| GraphError::UnknownComponent {
                scope: self.root_scope(),
                name: component.to_string(),
            })?;
        let declared = resolve_method(target, &scope, method)?.clone();
        Ok((scope, declared))
    }

    fn call_immediate(
        &mut self,
        component: ComponentId,
        method: &str,
        inputs: Vec<DataOp>,
    ) -> Result<ApiOutputs> {
        match self.state() {
            BuildState::Building => {
                return Err(GraphError::ReentrantBuild {
                    scope: self.root_scope(),
                })
            }
            BuildState::Unbuilt => {
                self.build()?;
            }
            BuildState::Built => {}
        }
        if inputs
            .iter()
            .any(|input| matches!(input, DataOp::Placeholder(_) | DataOp::Symbol(_)))
        {
            return Err(GraphError::ModeMismatch {
                expected: BackendKind::SymbolicGraph,
                found: BackendKind::ImmediateTensor,
            });
        }
        let mut dispatcher = ImmediateDispatcher::new(Arc::clone(self.backend.kernels()));
        invoke_method(&self.tree, component, method, inputs, &mut dispatcher)
    }

    fn record_call(
        &mut self,
        component: ComponentId,
        scope: String,
        declared: &ApiMethod,
        inputs: Vec<DataOp>,
    ) -> Result<ApiOutputs> {
        self.check_recordable(&scope, declared)?;
        let inputs = declared.complete_inputs(&scope, inputs)?;
        let specs: Vec<Option<TensorSpec>> = inputs.iter().map(DataOp::spec).collect();
        let output_specs = declared.infer_outputs(&specs)?;
        let bindings = bind_inputs(self.id, self.recorder.next_id(), &inputs)?;

        if declared.is_memoized() {
            if let Some(outputs) = self
                .recorder
                .lookup_memo(component, declared.name(), &bindings)
            {
                tracing::trace!(scope = %scope, method = declared.name(), "reused memoized invocation");
                return Ok(placeholder_outputs(declared, outputs));
            }
        }

        let outputs = self.recorder.push(
            self.id,
            component,
            scope,
            declared.name().to_string(),
            bindings,
            output_specs,
            declared.is_memoized(),
        );
        Ok(placeholder_outputs(declared, outputs))
    }

    fn check_recordable(&self, scope: &str, declared: &ApiMethod) -> Result<()> {
        match self.state() {
            BuildState::Building => Err(GraphError::ReentrantBuild {
                scope: self.root_scope(),
            }),
            BuildState::Built if !declared.allows_post_build() => {
                Err(GraphError::PostBuildInvocation {
                    scope: scope.to_string(),
                    method: declared.name().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn require_symbolic(&self) -> Result<()> {
        match self.backend.kind() {
            BackendKind::SymbolicGraph => Ok(()),
            found => Err(GraphError::ModeMismatch {
                expected: BackendKind::SymbolicGraph,
                found,
            }),
        }
    }

    pub(crate) fn root_scope(&self) -> String {
        self.tree.display_name(self.tree.root())
    }
}

fn placeholder_outputs(declared: &ApiMethod, outputs: Vec<Option<Placeholder>>) -> ApiOutputs {
    ApiOutputs::new(
        declared,
        outputs
            .into_iter()
            .map(|output| output.map_or(DataOp::None, DataOp::Placeholder))
            .collect(),
    )
}
