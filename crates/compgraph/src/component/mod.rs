//! Components: independently authored units that expose API methods and own sub-components.

pub mod api;
pub mod context;
pub mod tree;

use std::any::Any;
use std::fmt;

use crate::error::Result;
use crate::graph::DataOp;

pub use api::{ApiMethod, ApiOutputs, ApiTable, InputDefault, InputSlot, OutputRule, OutputSlot};
pub use context::CallContext;
pub use tree::{BuildState, ComponentId, ComponentTree, SCOPE_SEPARATOR};

/// A unit of computation with a declared API.
///
/// Method bodies receive a [`CallContext`] and must route every tensor operation through it,
/// so the same body runs under either backend.
pub trait Component: Send + Sync + 'static {
    /// Type tag, also used by the spec factory.
    fn kind(&self) -> &'static str;

    fn api(&self) -> &ApiTable;

    /// Runs the body of `method`. `inputs` already has one entry per declared input slot.
    fn invoke(
        &self,
        ctx: &mut CallContext<'_>,
        method: &str,
        inputs: &[DataOp],
    ) -> Result<Vec<DataOp>>;

    /// Construction arguments, for inspection and determinism checks.
    fn config(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn as_any(&self) -> &dyn Any;
}

/// A component together with sub-components that have not been inserted into a tree yet.
pub struct Assembly {
    name: String,
    component: Box<dyn Component>,
    children: Vec<Assembly>,
}

impl Assembly {
    pub fn new(name: impl Into<String>, component: impl Component) -> Self {
        Self::from_box(name, Box::new(component))
    }

    pub fn from_box(name: impl Into<String>, component: Box<dyn Component>) -> Self {
        Self {
            name: name.into(),
            component,
            children: Vec::new(),
        }
    }

    /// Adds a sub-component, attached under its own name when the assembly is inserted.
    pub fn with_child(mut self, child: Assembly) -> Self {
        self.children.push(child);
        self
    }

    pub fn add_child(&mut self, child: Assembly) {
        self.children.push(child);
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component(&self) -> &dyn Component {
        self.component.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = &Assembly> {
        self.children.iter()
    }

    pub fn child(&self, name: &str) -> Option<&Assembly> {
        self.children.iter().find(|child| child.name == name)
    }

    pub(crate) fn into_parts(self) -> (String, Box<dyn Component>, Vec<Assembly>) {
        (self.name, self.component, self.children)
    }
}

impl fmt::Debug for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembly")
            .field("name", &self.name)
            .field("kind", &self.component.kind())
            .field("children", &self.children)
            .finish()
    }
}
