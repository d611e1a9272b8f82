use std::sync::Arc;

use compgraph::backend::registry::{create_kernels, register_kernels};
use compgraph::backend::{Kernels, RefCpuKernels, REF_CPU};
use compgraph_backend_tests::{harness, scenarios, RecordingKernels};

compgraph_backend_tests::define_backend_tests!(ref_cpu, || {
    create_kernels(REF_CPU).expect("reference kernels are always registered")
});

compgraph_backend_tests::define_backend_tests!(recording, || -> Arc<dyn Kernels> {
    Arc::new(RecordingKernels::new(Arc::new(RefCpuKernels::new())))
});

#[test]
fn recording_kernels_see_every_evaluated_primitive() {
    let recording = Arc::new(RecordingKernels::new(Arc::new(RefCpuKernels::new())));
    let kernels: Arc<dyn Kernels> = recording.clone();
    scenarios::generalized_advantage_estimation(&kernels);
    assert_eq!(recording.count("discounted_cumsum"), 2);
    assert_eq!(recording.count("shift_left"), 2);
    assert!(recording.total() > 10);

    recording.reset();
    assert_eq!(recording.total(), 0);
}

#[test]
fn registered_kernels_run_the_suite() {
    register_kernels("recording-ref-cpu", || {
        Arc::new(RecordingKernels::new(Arc::new(RefCpuKernels::new()))) as Arc<dyn Kernels>
    });
    let kernels = create_kernels("recording-ref-cpu").expect("just registered");
    assert_eq!(kernels.backend_name(), "recording");
    scenarios::preprocessing_stack(&kernels);
    scenarios::policy_outputs(&kernels);
}

#[test]
fn tolerance_comparison_reports_mismatches() {
    let a = compgraph::Tensor::from_vec([2], vec![1.0, 2.0]).expect("tensor");
    let b = compgraph::Tensor::from_vec([2], vec![1.0, 2.0 + harness::TOLERANCE / 2.0]).expect("tensor");
    harness::assert_tensors_close(&a, &b, "probe", 0);

    let c = compgraph::Tensor::from_vec([2], vec![1.0, 2.5]).expect("tensor");
    let mismatch = std::panic::catch_unwind(|| harness::assert_tensors_close(&a, &c, "probe", 0));
    assert!(mismatch.is_err());
}
