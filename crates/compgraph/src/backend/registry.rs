//! Runtime kernel registry for selecting numeric implementations by name.
//!
//! Implementations contribute a [`KernelsFactory`] to [`KERNEL_FACTORIES`] and are picked up
//! when the registry is first used; [`register_kernels`] adds more at runtime. Selection happens
//! through `COMPGRAPH_KERNELS` or [`GraphConfig::kernels`](crate::GraphConfig).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use super::kernels::{BackendError, Kernels};
use super::ref_cpu::{RefCpuKernels, REF_CPU};
use crate::env;
use crate::error::Result;

/// Factory that creates a kernels instance.
pub type KernelsConstructor = Box<dyn Fn() -> Arc<dyn Kernels> + Send + Sync>;

/// Statically registered kernels implementation.
#[derive(Clone, Copy)]
pub struct KernelsFactory {
    pub name: &'static str,
    pub create: fn() -> Arc<dyn Kernels>,
}

#[linkme::distributed_slice]
pub static KERNEL_FACTORIES: [KernelsFactory] = [..];

#[linkme::distributed_slice(KERNEL_FACTORIES)]
static REF_CPU_FACTORY: KernelsFactory = KernelsFactory {
    name: REF_CPU,
    create: create_ref_cpu,
};

fn create_ref_cpu() -> Arc<dyn Kernels> {
    Arc::new(RefCpuKernels::new())
}

struct KernelRegistry {
    kernels: RwLock<HashMap<String, KernelsConstructor>>,
}

impl KernelRegistry {
    fn with_factories() -> Self {
        let mut kernels: HashMap<String, KernelsConstructor> = HashMap::new();
        for factory in KERNEL_FACTORIES {
            kernels.insert(factory.name.to_string(), Box::new(factory.create));
        }
        Self {
            kernels: RwLock::new(kernels),
        }
    }

    fn register(&self, name: String, constructor: KernelsConstructor) {
        self.kernels
            .write()
            .expect("kernel registry poisoned")
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn Kernels>> {
        let registry = self.kernels.read().expect("kernel registry poisoned");
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .kernels
            .read()
            .expect("kernel registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn has(&self, name: &str) -> bool {
        self.kernels
            .read()
            .expect("kernel registry poisoned")
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<KernelRegistry> = OnceLock::new();

fn global_registry() -> &'static KernelRegistry {
    GLOBAL_REGISTRY.get_or_init(KernelRegistry::with_factories)
}

/// Register kernels by name; a later registration under the same name replaces the earlier one.
///
/// # Example
/// ```ignore
/// use compgraph::backend::registry::register_kernels;
///
/// register_kernels("my-kernels", || Arc::new(MyKernels::default()));
/// ```
pub fn register_kernels<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn Kernels> + Send + Sync + 'static,
{
    let name = name.into();
    tracing::debug!(kernels = %name, "registering kernels");
    global_registry().register(name, Box::new(constructor));
}

/// Create a kernels instance by name, or `None` if nothing is registered under it.
pub fn create_kernels(name: &str) -> Option<Arc<dyn Kernels>> {
    global_registry().create(name)
}

/// List all registered kernel names, sorted.
pub fn list_kernels() -> Vec<String> {
    global_registry().list()
}

pub fn has_kernels(name: &str) -> bool {
    global_registry().has(name)
}

/// Like [`create_kernels`], but reports unknown names as an error.
pub fn require_kernels(name: &str) -> Result<Arc<dyn Kernels>> {
    create_kernels(name).ok_or_else(|| {
        BackendError::unimplemented(
            "kernels",
            format!(
                "no kernels registered as '{name}' (available: {})",
                list_kernels().join(", ")
            ),
        )
        .into()
    })
}

/// Kernels named by `COMPGRAPH_KERNELS`, falling back to the reference CPU kernels.
pub fn default_kernels() -> Result<Arc<dyn Kernels>> {
    require_kernels(env::kernels_from_env().unwrap_or(REF_CPU))
}
