//! Type-tag registry used to turn specs into assemblies.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use super::{Capability, ComponentSpec, SpecArgs, SpecSource, SCOPE_KEY};
use crate::component::tree::validate_name;
use crate::component::Assembly;
use crate::error::{GraphError, Result};

/// Builds an assembly from spec arguments. Nested specs are resolved through the registry
/// passed in, so a constructor never depends on global state.
pub type ConstructorFn = fn(&SpecArgs<'_>, &ComponentRegistry) -> Result<Assembly>;

/// Statically registered component constructor.
#[derive(Clone, Copy)]
pub struct ComponentFactory {
    pub tag: &'static str,
    pub build: ConstructorFn,
}

#[linkme::distributed_slice]
pub static COMPONENT_FACTORIES: [ComponentFactory] = [..];

/// Maps type tags to constructors.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    constructors: HashMap<String, ConstructorFn>,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every statically registered factory.
    pub fn with_factories() -> Self {
        let mut registry = Self::new();
        for factory in COMPONENT_FACTORIES {
            registry.register(factory.tag, factory.build);
        }
        registry
    }

    /// Registers `constructor` under `tag`, returning the constructor it replaces.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        constructor: ConstructorFn,
    ) -> Option<ConstructorFn> {
        self.constructors.insert(tag.into(), constructor)
    }

    pub fn has(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Resolves `source` into an assembly satisfying `capability`.
    pub fn instantiate(
        &self,
        source: impl Into<SpecSource>,
        capability: &Capability,
    ) -> Result<Assembly> {
        let assembly = match source.into() {
            SpecSource::Instance(assembly) => assembly,
            SpecSource::Spec(spec) => self.build(&spec)?,
            SpecSource::Json(value) => self.build(&ComponentSpec::from_value(value)?)?,
        };
        capability.check(assembly.component())?;
        Ok(assembly)
    }

    /// Constructs the component described by `spec` without a capability check.
    pub fn build(&self, spec: &ComponentSpec) -> Result<Assembly> {
        let constructor =
            self.constructors
                .get(&spec.tag)
                .ok_or_else(|| GraphError::UnknownTypeTag {
                    tag: spec.tag.clone(),
                })?;
        let args = spec.args();
        let assembly = constructor(&args, self)?;
        let assembly = match args.get::<String>(SCOPE_KEY)? {
            Some(scope) => {
                validate_name(&scope)?;
                assembly.renamed(scope)
            }
            None => assembly,
        };
        tracing::trace!(tag = %spec.tag, name = assembly.name(), "constructed component from spec");
        Ok(assembly)
    }
}

static GLOBAL_REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn global() -> &'static RwLock<ComponentRegistry> {
    GLOBAL_REGISTRY.get_or_init(|| RwLock::new(ComponentRegistry::with_factories()))
}

/// Adds a constructor to the process-wide registry.
pub fn register_component(tag: impl Into<String>, constructor: ConstructorFn) {
    global()
        .write()
        .expect("component registry poisoned")
        .register(tag, constructor);
}

/// Snapshot of the process-wide registry.
pub fn global_registry() -> ComponentRegistry {
    global().read().expect("component registry poisoned").clone()
}

/// Resolves `source` through the process-wide registry.
pub fn instantiate(source: impl Into<SpecSource>, capability: &Capability) -> Result<Assembly> {
    global_registry().instantiate(source, capability)
}
