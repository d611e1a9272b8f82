//! Conformance suite for kernels implementations.
//!
//! [`define_backend_tests!`] expands to one `#[test]` per scenario for a kernels constructor.
//! Every scenario runs a component from `compgraph-components` under both execution modes and
//! checks that they agree with each other and with known answers.

pub mod harness;
pub mod recording_kernels;
pub mod scenarios;

pub use recording_kernels::RecordingKernels;

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $kernels_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use std::sync::Arc;

            use $crate::scenarios;

            fn kernels() -> Arc<dyn ::compgraph::backend::Kernels> {
                ($kernels_ctor)()
            }

            macro_rules! scenario_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        scenarios::$name(&kernels());
                    }
                };
            }

            scenario_test!(preprocessing_stack);
            scenario_test!(dense_network);
            scenario_test!(policy_outputs);
            scenario_test!(epsilon_exploration);
            scenario_test!(generalized_advantage_estimation);
            scenario_test!(actor_component);
            scenario_test!(shared_artifact_across_threads);
        }
    };
}
