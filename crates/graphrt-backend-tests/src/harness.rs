//! Helpers for driving a backend from tests.

use std::sync::Arc;

use graphrt::{Backend, BackendResult, DType, Element, Function, Tensor};
use rand::rngs::StdRng;
use rand::Rng;

/// Installs a test-writer subscriber filtered by `RUST_LOG` (default `warn`).
/// Later calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(false)
        .try_init();
}

/// Allocates outputs through `backend`, runs `function` and returns them.
pub fn run(backend: &dyn Backend, function: &Function, inputs: &[Tensor]) -> BackendResult<Vec<Tensor>> {
    let mut outputs: Vec<Tensor> = function
        .result_specs()
        .into_iter()
        .map(|spec| backend.create_tensor(spec.dtype, spec.shape))
        .collect();
    let input_refs: Vec<&Tensor> = inputs.iter().collect();
    let mut output_refs: Vec<&mut Tensor> = outputs.iter_mut().collect();
    backend.call_with_validate(function, &mut output_refs, &input_refs)?;
    Ok(outputs)
}

pub fn tensor<T: Element>(shape: &[usize], data: &[T]) -> Tensor {
    Tensor::from_slice(shape, data).expect("tensor data matches shape")
}

pub fn random_tensor(rng: &mut StdRng, dtype: DType, shape: &[usize]) -> Tensor {
    let count: usize = shape.iter().product();
    match dtype {
        DType::F32 => {
            let data: Vec<f32> = (0..count).map(|_| rng.gen_range(-4.0f32..4.0)).collect();
            tensor(shape, &data)
        }
        DType::F64 => {
            let data: Vec<f64> = (0..count).map(|_| rng.gen_range(-4.0f64..4.0)).collect();
            tensor(shape, &data)
        }
        DType::I32 => {
            let data: Vec<i32> = (0..count).map(|_| rng.gen_range(-50..50)).collect();
            tensor(shape, &data)
        }
        DType::I64 => {
            let data: Vec<i64> = (0..count).map(|_| rng.gen_range(-50..50)).collect();
            tensor(shape, &data)
        }
        DType::U8 => {
            let data: Vec<u8> = (0..count).map(|_| rng.gen()).collect();
            tensor(shape, &data)
        }
        other => panic!("no random generator for {other}"),
    }
}

/// Strictly positive values, for operations undefined at or below zero.
pub fn random_positive_f32(rng: &mut StdRng, shape: &[usize]) -> Tensor {
    let count: usize = shape.iter().product();
    let data: Vec<f32> = (0..count).map(|_| rng.gen_range(0.1f32..8.0)).collect();
    tensor(shape, &data)
}

pub fn assert_close(actual: &Tensor, expected: &Tensor, tolerance: f64) {
    assert_eq!(actual.spec(), expected.spec(), "spec mismatch");
    match actual.dtype() {
        DType::F32 => {
            let a = actual.read::<f32>().expect("f32 data");
            let e = expected.read::<f32>().expect("f32 data");
            for (i, (x, y)) in a.iter().zip(&e).enumerate() {
                let diff = (*x as f64 - *y as f64).abs();
                assert!(
                    diff <= tolerance * (1.0 + y.abs() as f64),
                    "element {i}: {x} vs {y}"
                );
            }
        }
        DType::F64 => {
            let a = actual.read::<f64>().expect("f64 data");
            let e = expected.read::<f64>().expect("f64 data");
            for (i, (x, y)) in a.iter().zip(&e).enumerate() {
                assert!((x - y).abs() <= tolerance * (1.0 + y.abs()), "element {i}: {x} vs {y}");
            }
        }
        _ => assert_eq!(actual.as_bytes(), expected.as_bytes(), "integer data differs"),
    }
}

/// Runs `function` on `backend` and on a fresh interpreter and compares.
pub fn assert_matches_interpreter(
    backend: &Arc<dyn Backend>,
    function: &Function,
    inputs: &[Tensor],
    tolerance: f64,
) {
    let reference = graphrt_backend_interpreter::new_backend();
    let expected = run(&reference, function, inputs).expect("interpreter run");
    let actual = run(backend.as_ref(), function, inputs).expect("backend run");
    for (a, e) in actual.iter().zip(&expected) {
        assert_close(a, e, tolerance);
    }
}
