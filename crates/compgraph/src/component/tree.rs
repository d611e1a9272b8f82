//! Arena-backed component tree with hierarchical scopes.

use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use super::{Assembly, Component};
use crate::error::{GraphError, Result};

/// Separator between name segments in a scope.
pub const SCOPE_SEPARATOR: char = '/';

/// Handle to a node of a [`ComponentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Lifecycle of a node. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildState {
    Unbuilt,
    Building,
    Built,
}

struct Node {
    name: String,
    parent: Option<ComponentId>,
    children: IndexMap<String, ComponentId>,
    scope: OnceCell<String>,
    state: BuildState,
    component: Box<dyn Component>,
}

/// Owns every component of one graph. Parents refer to children by [`ComponentId`]; the
/// reverse link is a plain index, so there are no ownership cycles.
pub struct ComponentTree {
    nodes: Vec<Node>,
    root: ComponentId,
    frozen: bool,
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "names must be non-empty"
    } else if !name.is_ascii() {
        "names must be ASCII"
    } else if name.contains(SCOPE_SEPARATOR) {
        "names must not contain the scope separator '/'"
    } else {
        return Ok(());
    };
    Err(GraphError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Rejects invalid or duplicate names anywhere in `assembly` before anything is inserted.
fn validate_assembly(assembly: &Assembly) -> Result<()> {
    validate_name(assembly.name())?;
    let mut seen = std::collections::HashSet::new();
    for child in assembly.children() {
        if !seen.insert(child.name()) {
            return Err(GraphError::NameConflict {
                parent: assembly.name().to_string(),
                name: child.name().to_string(),
            });
        }
        validate_assembly(child)?;
    }
    Ok(())
}

impl ComponentTree {
    /// Creates a tree whose root is `root`; the root's scope is its name.
    pub fn new(root: Assembly) -> Result<Self> {
        validate_assembly(&root)?;
        let mut tree = ComponentTree {
            nodes: Vec::new(),
            root: ComponentId(0),
            frozen: false,
        };
        tree.root = tree.insert_unchecked(root);
        Ok(tree)
    }

    pub fn root(&self) -> ComponentId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stores `assembly` as an unattached subtree and returns the handle of its top node.
    pub fn insert(&mut self, assembly: Assembly) -> Result<ComponentId> {
        self.ensure_mutable()?;
        validate_assembly(&assembly)?;
        Ok(self.insert_unchecked(assembly))
    }

    fn insert_unchecked(&mut self, assembly: Assembly) -> ComponentId {
        let (name, component, children) = assembly.into_parts();
        let id = ComponentId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name,
            parent: None,
            children: IndexMap::new(),
            scope: OnceCell::new(),
            state: BuildState::Unbuilt,
            component,
        });
        for child in children {
            let child_id = self.insert_unchecked(child);
            let child_name = self.nodes[child_id.index()].name.clone();
            self.nodes[child_id.index()].parent = Some(id);
            self.nodes[id.index()].children.insert(child_name, child_id);
        }
        id
    }

    /// Attaches the unattached node `child` under `parent` as `name`.
    ///
    /// On error the tree is left exactly as it was.
    pub fn attach(&mut self, parent: ComponentId, child: ComponentId, name: &str) -> Result<()> {
        self.ensure_mutable()?;
        validate_name(name)?;
        self.node(parent)?;
        let child_node = self.node(child)?;
        if let Some(existing) = child_node.parent {
            return Err(GraphError::AlreadyAttached {
                child: self.display_name(child),
                parent: self.display_name(existing),
            });
        }
        if child == self.root || self.is_ancestor(child, parent) {
            return Err(GraphError::AlreadyAttached {
                child: self.display_name(child),
                parent: self.display_name(parent),
            });
        }
        if self.nodes[parent.index()].children.contains_key(name) {
            return Err(GraphError::NameConflict {
                parent: self.display_name(parent),
                name: name.to_string(),
            });
        }
        let node = &mut self.nodes[child.index()];
        node.name = name.to_string();
        node.parent = Some(parent);
        self.nodes[parent.index()]
            .children
            .insert(name.to_string(), child);
        tracing::trace!(parent = %self.display_name(parent), child = name, "attached component");
        Ok(())
    }

    /// Inserts `assembly` and attaches it under `parent` using the assembly's own name.
    pub fn attach_assembly(&mut self, parent: ComponentId, assembly: Assembly) -> Result<ComponentId> {
        self.ensure_mutable()?;
        self.node(parent)?;
        validate_assembly(&assembly)?;
        if self.nodes[parent.index()]
            .children
            .contains_key(assembly.name())
        {
            return Err(GraphError::NameConflict {
                parent: self.display_name(parent),
                name: assembly.name().to_string(),
            });
        }
        let name = assembly.name().to_string();
        let child = self.insert_unchecked(assembly);
        self.attach(parent, child, &name)?;
        Ok(child)
    }

    fn is_ancestor(&self, candidate: ComponentId, of: ComponentId) -> bool {
        let mut current = Some(of);
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            current = self.nodes[id.index()].parent;
        }
        false
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(GraphError::TreeFrozen);
        }
        Ok(())
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn node(&self, id: ComponentId) -> Result<&Node> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| GraphError::UnknownComponent {
                scope: self.nodes[self.root.index()].name.clone(),
                name: id.to_string(),
            })
    }

    /// Scope if the node is connected to the root, otherwise its local name.
    pub(crate) fn display_name(&self, id: ComponentId) -> String {
        match self.scope(id) {
            Some(scope) => scope.to_string(),
            None => self.nodes[id.index()].name.clone(),
        }
    }

    /// Fully qualified scope, or `None` while the node is not connected to the root.
    pub fn scope(&self, id: ComponentId) -> Option<&str> {
        let node = self.nodes.get(id.index())?;
        if let Some(scope) = node.scope.get() {
            return Some(scope);
        }
        let computed = if id == self.root {
            node.name.clone()
        } else {
            let parent = node.parent?;
            format!("{}{SCOPE_SEPARATOR}{}", self.scope(parent)?, node.name)
        };
        Some(node.scope.get_or_init(|| computed))
    }

    pub fn name(&self, id: ComponentId) -> Option<&str> {
        self.nodes.get(id.index()).map(|node| node.name.as_str())
    }

    pub fn parent(&self, id: ComponentId) -> Option<ComponentId> {
        self.nodes.get(id.index())?.parent
    }

    pub fn child(&self, parent: ComponentId, name: &str) -> Option<ComponentId> {
        self.nodes.get(parent.index())?.children.get(name).copied()
    }

    /// Children in attachment order.
    pub fn children(&self, id: ComponentId) -> impl Iterator<Item = (&str, ComponentId)> + '_ {
        self.nodes
            .get(id.index())
            .into_iter()
            .flat_map(|node| node.children.iter().map(|(name, id)| (name.as_str(), *id)))
    }

    /// Resolves a fully qualified scope such as `"agent/policy/dense"`.
    pub fn find(&self, scope: &str) -> Option<ComponentId> {
        let mut segments = scope.split(SCOPE_SEPARATOR);
        if segments.next()? != self.nodes[self.root.index()].name {
            return None;
        }
        segments.try_fold(self.root, |current, segment| self.child(current, segment))
    }

    /// Nodes reachable from the root, parents before children.
    pub fn walk(&self) -> Vec<ComponentId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            let children: Vec<ComponentId> = self.nodes[id.index()].children.values().copied().collect();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    pub fn component(&self, id: ComponentId) -> Option<&dyn Component> {
        self.nodes.get(id.index()).map(|node| node.component.as_ref())
    }

    /// Downcasts the component at `id` to its concrete type.
    pub fn component_as<T: Component>(&self, id: ComponentId) -> Option<&T> {
        self.component(id)?.as_any().downcast_ref::<T>()
    }

    pub fn state(&self, id: ComponentId) -> Option<BuildState> {
        self.nodes.get(id.index()).map(|node| node.state)
    }

    /// Moves a node forward in its lifecycle; earlier states are ignored.
    pub(crate) fn advance(&mut self, id: ComponentId, state: BuildState) {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            if state > node.state {
                node.state = state;
            }
        }
    }
}

impl fmt::Debug for ComponentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for id in self.walk() {
            let node = &self.nodes[id.index()];
            list.entry(&format_args!(
                "{} ({}, {:?})",
                self.display_name(id),
                node.component.kind(),
                node.state
            ));
        }
        list.finish()
    }
}
