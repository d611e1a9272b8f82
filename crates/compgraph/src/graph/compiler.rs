//! Build phase: validates the tree and compiles pending invocation records.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use super::compiled::{CompiledGraph, CompiledInvocation};
use super::component_graph::ComponentGraph;
use super::data_op::{DataOp, Symbol};
use super::draft::GraphDraft;
use super::record::{Binding, Invocation, InvocationId};
use crate::backend::{BackendKind, ExecutionBackend, SymbolicDispatcher};
use crate::component::context::invoke_method;
use crate::component::{BuildState, ComponentId, ComponentTree};
use crate::error::{GraphError, Result};
use crate::tensor::TensorSpec;

/// Summary of one `build()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    pub backend: BackendKind,
    /// Components reachable from the root.
    pub components: usize,
    pub invocations_resolved: usize,
    pub nodes_emitted: usize,
}

impl ComponentGraph {
    /// Runs the build phase.
    ///
    /// The first build freezes the tree, moves every component to [`BuildState::Building`],
    /// validates declared sub-component calls, resolves the recorded invocations (symbolic
    /// backend only), and finalizes components bottom-up. Later builds resolve only records
    /// added since; the previous artifact is extended, never modified.
    ///
    /// A failed first build leaves the tree in `Building`, and any further build reports
    /// [`GraphError::ReentrantBuild`].
    pub fn build(&mut self) -> Result<BuildReport> {
        let state = self.state();
        if state == BuildState::Building {
            return Err(GraphError::ReentrantBuild {
                scope: self.root_scope(),
            });
        }
        let kind = self.backend.kind();
        let _span = tracing::debug_span!("build", backend = %kind, root = %self.root_scope()).entered();

        let order = self.tree.walk();
        if state == BuildState::Unbuilt {
            self.tree.freeze();
            for &id in &order {
                self.tree.advance(id, BuildState::Building);
            }
            validate_declared_calls(&self.tree, &order)?;
            tracing::debug!(components = order.len(), "validated declared calls");
        }

        let mut report = BuildReport {
            backend: kind,
            components: order.len(),
            invocations_resolved: 0,
            nodes_emitted: 0,
        };

        if kind == BackendKind::SymbolicGraph
            && (self.compiled.is_none() || !self.recorder.pending().is_empty())
        {
            let records = self.recorder.take_pending();
            let resolution = resolve(
                self.id,
                &self.tree,
                &self.backend,
                self.compiled.as_deref(),
                &records,
                self.recorder.feeds(),
            );
            match resolution {
                Ok((artifact, emitted)) => {
                    report.invocations_resolved = records.len();
                    report.nodes_emitted = emitted;
                    self.compiled = Some(Arc::new(artifact));
                }
                Err(err) => {
                    tracing::debug!(error = %err, "resolution failed");
                    self.recorder.restore_pending(records);
                    return Err(err);
                }
            }
        }

        if state == BuildState::Unbuilt {
            for &id in order.iter().rev() {
                self.tree.advance(id, BuildState::Built);
            }
        }
        tracing::debug!(
            invocations = report.invocations_resolved,
            nodes = report.nodes_emitted,
            "build finished"
        );
        Ok(report)
    }
}

/// Every `calls(child, method)` declaration must name an existing child and one of its methods.
fn validate_declared_calls(tree: &ComponentTree, order: &[ComponentId]) -> Result<()> {
    for &id in order {
        let Some(component) = tree.component(id) else {
            continue;
        };
        let scope = tree.display_name(id);
        for method in component.api().methods() {
            for (child, child_method) in method.declared_calls() {
                let child_id =
                    tree.child(id, child)
                        .ok_or_else(|| GraphError::UnknownComponent {
                            scope: scope.clone(),
                            name: child.clone(),
                        })?;
                let declares = tree
                    .component(child_id)
                    .is_some_and(|target| target.api().contains(child_method));
                if !declares {
                    return Err(GraphError::UnknownMethod {
                        scope: tree.display_name(child_id),
                        method: child_method.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Resolves `records` in order into a new artifact that extends `base`.
fn resolve(
    graph: u64,
    tree: &ComponentTree,
    backend: &ExecutionBackend,
    base: Option<&CompiledGraph>,
    records: &[Invocation],
    feeds: &IndexMap<Arc<str>, TensorSpec>,
) -> Result<(CompiledGraph, usize)> {
    let mut draft = match base {
        Some(base) => GraphDraft::extending(base),
        None => GraphDraft::new(),
    };
    let start = draft.len();
    let mut invocations: Vec<CompiledInvocation> =
        base.map(|base| base.invocations().to_vec()).unwrap_or_default();
    let mut resolved: HashMap<InvocationId, Vec<Option<Symbol>>> = HashMap::new();

    for record in records {
        let _span = tracing::trace_span!(
            "resolve",
            invocation = %record.id,
            scope = %record.scope,
            method = %record.method
        )
        .entered();
        draft.set_current_invocation(record.id);

        let mut args = Vec::with_capacity(record.inputs.len());
        let mut input_values = Vec::with_capacity(record.inputs.len());
        for binding in &record.inputs {
            let symbol = match binding {
                Binding::Literal(tensor) => Some(draft.constant(tensor.clone())),
                Binding::Feed(name) => {
                    let spec = feeds
                        .get(name)
                        .ok_or_else(|| GraphError::UnresolvedBinding {
                            invocation: record.id,
                            detail: format!("no graph input named '{name}'"),
                        })?;
                    Some(draft.feed(name, spec))
                }
                Binding::Output { invocation, index } => {
                    lookup_output(&draft, base, &resolved, record.id, *invocation, *index)?
                }
                Binding::Absent => None,
            };
            input_values.push(symbol.as_ref().map(Symbol::value));
            args.push(symbol.map_or(DataOp::None, DataOp::Symbol));
        }

        let produced = {
            let mut dispatcher = SymbolicDispatcher::new(&mut draft);
            invoke_method(tree, record.component, &record.method, args, &mut dispatcher)?
        };

        let violation = |detail: String| GraphError::ContractViolation {
            scope: record.scope.clone(),
            method: record.method.clone(),
            detail,
        };
        if produced.len() != record.outputs.len() {
            return Err(violation(format!(
                "recorded {} outputs, body returned {}",
                record.outputs.len(),
                produced.len()
            )));
        }
        let mut outputs = Vec::with_capacity(record.outputs.len());
        for (index, (placeholder, value)) in record
            .outputs
            .iter()
            .zip(produced.into_values())
            .enumerate()
        {
            let symbol = match (placeholder, value) {
                (None, DataOp::None) => None,
                (Some(placeholder), DataOp::Symbol(symbol))
                    if placeholder.spec().compatible(symbol.spec()) =>
                {
                    Some(symbol)
                }
                (Some(placeholder), DataOp::Tensor(tensor)) if placeholder.spec().admits(&tensor) => {
                    Some(draft.constant(tensor))
                }
                (placeholder, value) => {
                    let expected = placeholder
                        .as_ref()
                        .map_or_else(|| "nothing".to_string(), |p| p.spec().to_string());
                    let got = value
                        .spec()
                        .map_or_else(|| "nothing".to_string(), |spec| spec.to_string());
                    return Err(violation(format!(
                        "output {index} produced {got} ({}) where the placeholder expects {expected}",
                        value.kind_name()
                    )));
                }
            };
            outputs.push(symbol);
        }

        invocations.push(CompiledInvocation {
            id: record.id,
            scope: record.scope.clone(),
            method: record.method.clone(),
            inputs: input_values,
            outputs: outputs.iter().map(|s| s.as_ref().map(Symbol::value)).collect(),
        });
        resolved.insert(record.id, outputs);
    }

    let emitted = draft.len() - start;
    let (nodes, feed_values) = draft.into_parts();
    let artifact = CompiledGraph::new(
        graph,
        nodes,
        feed_values,
        invocations,
        Arc::clone(backend.kernels()),
    );
    Ok((artifact, emitted))
}

/// Graph value of output `index` of an invocation resolved earlier in this build or in a
/// previous one.
fn lookup_output(
    draft: &GraphDraft,
    base: Option<&CompiledGraph>,
    resolved: &HashMap<InvocationId, Vec<Option<Symbol>>>,
    current: InvocationId,
    invocation: InvocationId,
    index: usize,
) -> Result<Option<Symbol>> {
    let out_of_range = || GraphError::UnresolvedBinding {
        invocation: current,
        detail: format!("{invocation} has no output {index}"),
    };
    if let Some(outputs) = resolved.get(&invocation) {
        return outputs.get(index).cloned().ok_or_else(out_of_range);
    }
    if let Some(compiled) = base.and_then(|base| base.invocation(invocation)) {
        let value = compiled.outputs.get(index).ok_or_else(out_of_range)?;
        return Ok(value.and_then(|value| {
            draft
                .spec_of(value)
                .map(|spec| Symbol::new(value, spec.clone()))
        }));
    }
    let detail = if invocation >= current {
        format!("refers to {invocation}, which is not resolved before {current}")
    } else {
        format!("refers to unknown invocation {invocation}")
    };
    Err(GraphError::UnresolvedBinding {
        invocation: current,
        detail,
    })
}
