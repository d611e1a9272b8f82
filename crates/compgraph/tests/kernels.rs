use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use compgraph::backend::registry::{create_kernels, has_kernels, list_kernels, register_kernels, require_kernels};
use compgraph::backend::{
    BackendKind, BackendResult, ExecutionBackend, Kernels, Primitive, RefCpuKernels, REF_CPU,
};
use compgraph::{DType, GraphError, Tensor};

fn run(primitive: Primitive, inputs: &[&Tensor]) -> Tensor {
    RefCpuKernels::new()
        .execute(&primitive, inputs)
        .expect("kernel failed")
}

#[test]
fn reference_kernels_are_registered() {
    assert!(has_kernels(REF_CPU));
    assert!(list_kernels().iter().any(|name| name == REF_CPU));
    let kernels = create_kernels(REF_CPU).expect("ref-cpu kernels");
    assert_eq!(kernels.backend_name(), REF_CPU);
}

#[test]
fn unknown_kernels_list_the_available_ones() {
    let err = require_kernels("does-not-exist").err().expect("unknown kernels must fail");
    let message = err.to_string();
    assert!(matches!(err, GraphError::Backend(_)));
    assert!(message.contains(REF_CPU), "{message}");
}

static COUNTED: AtomicUsize = AtomicUsize::new(0);

struct CountingKernels {
    inner: RefCpuKernels,
}

impl Kernels for CountingKernels {
    fn backend_name(&self) -> &str {
        "counting"
    }

    fn execute(&self, primitive: &Primitive, inputs: &[&Tensor]) -> BackendResult<Tensor> {
        COUNTED.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(primitive, inputs)
    }
}

#[test]
fn custom_kernels_drive_immediate_calls() -> anyhow::Result<()> {
    register_kernels("counting", || {
        Arc::new(CountingKernels {
            inner: RefCpuKernels::new(),
        })
    });
    let kernels = require_kernels("counting")?;
    let backend = ExecutionBackend::new(BackendKind::ImmediateTensor, kernels);
    let before = COUNTED.load(Ordering::SeqCst);
    let out = backend.kernels().execute(
        &Primitive::Binary {
            op: compgraph::backend::BinaryOp::Add,
        },
        &[&Tensor::scalar(1.0), &Tensor::scalar(2.0)],
    )?;
    assert_eq!(out.item()?, 3.0);
    assert_eq!(COUNTED.load(Ordering::SeqCst), before + 1);
    Ok(())
}

#[test]
fn softmax_rows_sum_to_one() -> anyhow::Result<()> {
    let logits = Tensor::from_vec([2, 3], vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0])?;
    let probs = run(Primitive::Softmax { axis: 1 }, &[&logits]);
    for row in probs.data().chunks(3) {
        assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(probs.data()[3], 1.0 / 3.0, epsilon = 1e-6);

    let log_probs = run(Primitive::LogSoftmax { axis: 1 }, &[&logits]);
    for (log_p, p) in log_probs.data().iter().zip(probs.data()) {
        assert_abs_diff_eq!(log_p.exp(), *p, epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn discounted_cumsum_stops_at_resets() -> anyhow::Result<()> {
    let values = Tensor::from_vec([4], vec![1.0, 1.0, 1.0, 1.0])?;
    let resets = Tensor::from_vec([4], vec![0.0, 1.0, 0.0, 0.0])?;
    let out = run(Primitive::DiscountedCumsum { discount: 0.5 }, &[&values, &resets]);
    let expected = [1.5, 1.0, 1.5, 1.0];
    for (got, want) in out.data().iter().zip(expected) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn shift_left_moves_rows_forward() -> anyhow::Result<()> {
    let x = Tensor::from_vec([3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
    let out = run(Primitive::ShiftLeft { fill: 0.0 }, &[&x]);
    assert_eq!(out.data(), &[3.0, 4.0, 5.0, 6.0, 0.0, 0.0]);
    assert_eq!(out.shape().dims(), &[3, 2]);
    Ok(())
}

#[test]
fn argmax_and_one_hot() -> anyhow::Result<()> {
    let x = Tensor::from_vec([2, 3], vec![0.1, 0.7, 0.2, 0.9, 0.05, 0.05])?;
    let index = run(Primitive::ArgMax { axis: 1 }, &[&x]);
    assert_eq!(index.dtype(), DType::I32);
    assert_eq!(index.data(), &[1.0, 0.0]);

    let encoded = run(Primitive::OneHot { depth: 3 }, &[&index]);
    assert_eq!(encoded.shape().dims(), &[2, 3]);
    assert_eq!(encoded.data(), &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);

    let out_of_range = Tensor::from_i32([1], vec![5])?;
    let err = RefCpuKernels::new()
        .execute(&Primitive::OneHot { depth: 3 }, &[&out_of_range])
        .unwrap_err();
    assert!(err.to_string().contains("out of range"), "{err}");
    Ok(())
}

#[test]
fn matmul_contracts_inner_dimension() -> anyhow::Result<()> {
    let lhs = Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
    let rhs = Tensor::from_vec([2, 1], vec![1.0, -1.0])?;
    let out = run(Primitive::MatMul, &[&lhs, &rhs]);
    assert_eq!(out.shape().dims(), &[2, 1]);
    assert_eq!(out.data(), &[-1.0, -1.0]);
    Ok(())
}

#[test]
fn random_uniform_is_a_function_of_seed_and_step() -> anyhow::Result<()> {
    let like = Tensor::zeros([16]);
    let sample = |seed, step: f32| run(Primitive::RandomUniform { seed }, &[&Tensor::scalar(step), &like]);

    let a = sample(11, 3.0);
    assert_eq!(a.data(), sample(11, 3.0).data());
    assert_ne!(a.data(), sample(11, 4.0).data());
    assert_ne!(a.data(), sample(12, 3.0).data());
    assert!(a.data().iter().all(|v| (0.0..1.0).contains(v)));
    Ok(())
}
