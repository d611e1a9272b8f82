//! Invocation records produced by symbolic API calls, and the recorder that owns them until
//! the next build.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use super::data_op::{DataOp, Placeholder, PlaceholderSource};
use crate::component::ComponentId;
use crate::error::{GraphError, Result};
use crate::tensor::{Tensor, TensorSpec};

/// Position of an invocation in lazy (recording) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(pub u32);

impl InvocationId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How one input of a recorded invocation obtains its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A tensor known at record time, lowered to a constant.
    Literal(Tensor),
    /// A named graph input.
    Feed(Arc<str>),
    /// An output of another invocation.
    Output { invocation: InvocationId, index: usize },
    /// An optional input that was left out.
    Absent,
}

impl Binding {
    pub fn feed(name: impl AsRef<str>) -> Self {
        Binding::Feed(Arc::from(name.as_ref()))
    }

    pub fn output(invocation: InvocationId, index: usize) -> Self {
        Binding::Output { invocation, index }
    }

    fn add_to_cache_key(&self, builder: &mut CacheKeyBuilder) {
        match self {
            Binding::Literal(tensor) => {
                builder.combine_hash(&0u8);
                builder.combine_hash(tensor.shape().dims());
                builder.combine_hash(&tensor.dtype());
                for value in tensor.data() {
                    builder.combine_hash(&value.to_bits());
                }
            }
            Binding::Feed(name) => {
                builder.combine_hash(&1u8);
                builder.combine_hash(name.as_ref());
            }
            Binding::Output { invocation, index } => {
                builder.combine_hash(&2u8);
                builder.combine_hash(invocation);
                builder.combine_hash(index);
            }
            Binding::Absent => builder.combine_hash(&3u8),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Literal(tensor) => write!(f, "literal {}", tensor.spec()),
            Binding::Feed(name) => write!(f, "feed '{name}'"),
            Binding::Output { invocation, index } => write!(f, "{invocation}.{index}"),
            Binding::Absent => f.write_str("absent"),
        }
    }
}

/// One API-method call captured before the build phase.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: InvocationId,
    pub component: ComponentId,
    /// Scope of the component whose method was called.
    pub scope: String,
    pub method: String,
    pub inputs: Vec<Binding>,
    /// Output placeholders handed back to the caller; `None` for absent outputs.
    pub outputs: Vec<Option<Placeholder>>,
}

/// Deterministic hash of a method call, used to find memoizable repeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CallKey(u64);

struct CacheKeyBuilder {
    hasher: DefaultHasher,
}

impl CacheKeyBuilder {
    fn new() -> Self {
        CacheKeyBuilder {
            hasher: DefaultHasher::new(),
        }
    }

    fn combine_hash<T: Hash + ?Sized>(&mut self, value: &T) {
        value.hash(&mut self.hasher);
    }

    fn finish(self) -> CallKey {
        CallKey(self.hasher.finish())
    }
}

fn call_key(component: ComponentId, method: &str, inputs: &[Binding]) -> CallKey {
    let mut builder = CacheKeyBuilder::new();
    builder.combine_hash(&component);
    builder.combine_hash(method);
    for binding in inputs {
        binding.add_to_cache_key(&mut builder);
    }
    builder.finish()
}

/// Pending invocation records plus the graph inputs declared so far.
#[derive(Debug, Default)]
pub(crate) struct CallRecorder {
    next_id: u32,
    pending: Vec<Invocation>,
    feeds: IndexMap<Arc<str>, TensorSpec>,
    memo: HashMap<CallKey, Vec<(InvocationId, Vec<Option<Placeholder>>)>>,
}

impl CallRecorder {
    pub(crate) fn pending(&self) -> &[Invocation] {
        &self.pending
    }

    pub(crate) fn next_id(&self) -> InvocationId {
        InvocationId(self.next_id)
    }

    pub(crate) fn feeds(&self) -> &IndexMap<Arc<str>, TensorSpec> {
        &self.feeds
    }

    pub(crate) fn declare_feed(&mut self, name: &str, spec: TensorSpec) -> Result<Arc<str>> {
        if let Some((existing, declared)) = self.feeds.get_key_value(name) {
            if *declared != spec {
                return Err(GraphError::FeedMismatch {
                    name: name.to_string(),
                    expected: declared.to_string(),
                    got: spec.to_string(),
                });
            }
            return Ok(Arc::clone(existing));
        }
        let name: Arc<str> = Arc::from(name);
        self.feeds.insert(Arc::clone(&name), spec);
        Ok(name)
    }

    /// Earlier outputs of a memoized call with structurally identical bindings.
    pub(crate) fn lookup_memo(
        &self,
        component: ComponentId,
        method: &str,
        inputs: &[Binding],
    ) -> Option<Vec<Option<Placeholder>>> {
        let candidates = self.memo.get(&call_key(component, method, inputs))?;
        candidates.iter().find_map(|(id, outputs)| {
            let earlier = self.pending.iter().find(|inv| inv.id == *id)?;
            (earlier.component == component
                && earlier.method == method
                && earlier.inputs == inputs)
                .then(|| outputs.clone())
        })
    }

    /// Appends a record and allocates placeholders for every output that has a spec.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push(
        &mut self,
        graph: u64,
        component: ComponentId,
        scope: String,
        method: String,
        inputs: Vec<Binding>,
        output_specs: Vec<Option<TensorSpec>>,
        memoize: bool,
    ) -> Vec<Option<Placeholder>> {
        let id = InvocationId(self.next_id);
        self.next_id += 1;
        let outputs: Vec<Option<Placeholder>> = output_specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                spec.map(|spec| {
                    Placeholder::new(
                        graph,
                        PlaceholderSource::Output {
                            invocation: id,
                            index,
                        },
                        spec,
                    )
                })
            })
            .collect();
        tracing::trace!(invocation = %id, scope = %scope, method = %method, "recorded invocation");
        if memoize {
            self.memo
                .entry(call_key(component, &method, &inputs))
                .or_default()
                .push((id, outputs.clone()));
        }
        self.pending.push(Invocation {
            id,
            component,
            scope,
            method,
            inputs,
            outputs: outputs.clone(),
        });
        outputs
    }

    /// Hands the pending records to the compiler. Memo entries only cover pending records.
    pub(crate) fn take_pending(&mut self) -> Vec<Invocation> {
        self.memo.clear();
        std::mem::take(&mut self.pending)
    }

    /// Puts back records whose resolution failed so the next build reports the same error.
    pub(crate) fn restore_pending(&mut self, records: Vec<Invocation>) {
        let mut restored = records;
        restored.append(&mut self.pending);
        self.pending = restored;
    }
}

/// Converts call arguments into bindings, rejecting values that cannot be recorded.
pub(crate) fn bind_inputs(
    graph: u64,
    next: InvocationId,
    inputs: &[DataOp],
) -> Result<Vec<Binding>> {
    inputs
        .iter()
        .map(|input| match input {
            DataOp::Tensor(tensor) => Ok(Binding::Literal(tensor.clone())),
            DataOp::None => Ok(Binding::Absent),
            DataOp::Placeholder(placeholder) if placeholder.graph_id() != graph => {
                Err(GraphError::UnresolvedBinding {
                    invocation: next,
                    detail: format!("placeholder {placeholder} belongs to another graph"),
                })
            }
            DataOp::Placeholder(placeholder) => Ok(match placeholder.source() {
                PlaceholderSource::Feed(name) => Binding::Feed(Arc::clone(name)),
                PlaceholderSource::Output { invocation, index } => Binding::Output {
                    invocation: *invocation,
                    index: *index,
                },
            }),
            DataOp::Symbol(symbol) => Err(GraphError::UnresolvedBinding {
                invocation: next,
                detail: format!(
                    "symbol {} escaped the method body that produced it",
                    symbol.value()
                ),
            }),
        })
        .collect()
}
