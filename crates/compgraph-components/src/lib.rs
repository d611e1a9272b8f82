//! Reference components built on `compgraph`.
//!
//! Every component here can be constructed directly or from a `{"type": ...}` spec. The
//! constructors are registered with [`compgraph::spec::COMPONENT_FACTORIES`]; [`registry`]
//! returns a registry that resolves every tag below.

pub mod actor;
pub mod advantage;
pub mod dense;
pub mod exploration;
pub mod policy;
pub mod preprocessing;
pub mod stack;

use compgraph::linkme;
use compgraph::spec::{ComponentFactory, ComponentRegistry, COMPONENT_FACTORIES};
use compgraph::Capability;

pub use actor::ActorComponent;
pub use advantage::GeneralizedAdvantageEstimation;
pub use dense::DenseLayer;
pub use exploration::EpsilonExploration;
pub use policy::Policy;
pub use preprocessing::{ClipPreprocessor, ConvertToFloat, ScalePreprocessor};
pub use stack::Stack;

/// Anything that maps network inputs to action choices.
pub const POLICY: Capability = Capability::new(
    "policy",
    &[
        "get_action",
        "get_logits_parameters_log_probs",
        "get_action_from_logits_and_probabilities",
    ],
);

pub const PREPROCESSOR: Capability = Capability::new("preprocessor", &["preprocess"]);

pub const EXPLORATION: Capability = Capability::new("exploration", &["get_action"]);

pub const ACTOR: Capability = Capability::new(
    "actor",
    &[
        "get_preprocessed_state_and_action",
        "get_preprocessed_state_action_and_action_probs",
    ],
);

pub const ADVANTAGE_ESTIMATOR: Capability =
    Capability::new("advantage_estimator", &["calc_gae_values"]);

/// Dynamic batch dimension shared by the component contracts.
pub const BATCH: &str = "B";

/// Dynamic time dimension of sequence inputs.
pub const TIME: &str = "T";

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static SCALE: ComponentFactory = ComponentFactory {
    tag: ScalePreprocessor::KIND,
    build: ScalePreprocessor::from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static CLIP: ComponentFactory = ComponentFactory {
    tag: ClipPreprocessor::KIND,
    build: ClipPreprocessor::from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static CONVERT_TO_FLOAT: ComponentFactory = ComponentFactory {
    tag: ConvertToFloat::KIND,
    build: ConvertToFloat::from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static PREPROCESSOR_STACK: ComponentFactory = ComponentFactory {
    tag: Stack::PREPROCESSOR_KIND,
    build: Stack::preprocessor_from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static NEURAL_NETWORK: ComponentFactory = ComponentFactory {
    tag: Stack::NETWORK_KIND,
    build: Stack::network_from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static DENSE: ComponentFactory = ComponentFactory {
    tag: DenseLayer::KIND,
    build: DenseLayer::from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static POLICY_FACTORY: ComponentFactory = ComponentFactory {
    tag: Policy::KIND,
    build: Policy::from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static EPSILON_EXPLORATION: ComponentFactory = ComponentFactory {
    tag: EpsilonExploration::KIND,
    build: EpsilonExploration::from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static GAE: ComponentFactory = ComponentFactory {
    tag: GeneralizedAdvantageEstimation::KIND,
    build: GeneralizedAdvantageEstimation::from_spec,
};

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
#[linkme(crate = compgraph::linkme)]
static ACTOR_COMPONENT: ComponentFactory = ComponentFactory {
    tag: ActorComponent::KIND,
    build: ActorComponent::from_spec,
};

/// A registry holding every factory linked into the binary, this crate's included.
pub fn registry() -> ComponentRegistry {
    ComponentRegistry::with_factories()
}
