mod common;

use std::sync::Arc;
use std::thread;

use common::{counting_backend, AbcOp};
use graphrt::{Backend, BackendError, BackendKind, DType, Function, FunctionBuilder, Tensor};

fn identity_function() -> Function {
    let mut builder = FunctionBuilder::new("identity");
    let x = builder.parameter(DType::F32, [4]);
    let y = builder.identity(x).expect("identity");
    builder.finish(&[y]).expect("finish")
}

fn run_identity(backend: &dyn Backend, function: &Function) -> Vec<f32> {
    let input = Tensor::from_slice([4], &[1.0f32, 2.0, 3.0, 4.0]).expect("input");
    let mut output = backend.create_tensor(DType::F32, [4].into());
    backend
        .call(function, &mut [&mut output], &[&input])
        .expect("call");
    output.read::<f32>().expect("read")
}

#[test]
fn compile_twice_lowers_once() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    backend.compile(&function).expect("first compile");
    backend.compile(&function).expect("second compile");
    assert_eq!(backend.compiler().lowerings(), 1);
    assert!(backend.is_compiled(&function));
}

#[test]
fn call_compiles_implicitly() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    assert_eq!(run_identity(&backend, &function), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(run_identity(&backend, &function), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(backend.compiler().lowerings(), 1);
}

#[test]
fn remove_forces_relowering() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    backend.compile(&function).expect("compile");
    backend.remove_compiled_function(&function);
    backend.remove_compiled_function(&function);
    assert!(!backend.is_compiled(&function));
    run_identity(&backend, &function);
    assert_eq!(backend.compiler().lowerings(), 2);
}

#[test]
fn backends_cache_independently() {
    let first = counting_backend(BackendKind::Interpreter);
    let second = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    first.compile(&function).expect("compile");
    assert!(!second.is_compiled(&function));
    second.compile(&function).expect("compile");
    assert_eq!(first.compiler().lowerings(), 1);
    assert_eq!(second.compiler().lowerings(), 1);
}

#[test]
fn failed_lowering_leaves_no_artifact() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    backend.compiler().fail_next_lowering();
    let err = backend.compile(&function).expect_err("injected failure");
    assert!(matches!(err, BackendError::Execution(_)));
    assert!(!backend.is_compiled(&function));
    backend.compile(&function).expect("retry");
    assert_eq!(backend.compiler().lowerings(), 2);
}

#[test]
fn unsupported_node_fails_lowering_by_name() {
    let backend = counting_backend(BackendKind::Cpu);
    let mut builder = FunctionBuilder::new("neg");
    let x = builder.parameter(DType::F32, [2]);
    let y = builder
        .unary(graphrt::UnaryOp::Negative, x)
        .expect("negative");
    let function = builder.finish(&[y]).expect("finish");
    match backend.compile(&function) {
        Err(BackendError::Unimplemented { name, kind, .. }) => {
            assert_eq!(name, "Negative_1");
            assert_eq!(kind, "Negative");
        }
        other => panic!("expected unimplemented error, got {other:?}"),
    }
}

#[test]
fn performance_data_must_precede_compile() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    backend.compile(&function).expect("compile");
    let err = backend
        .enable_performance_data(&function, true)
        .expect_err("ordering");
    assert!(matches!(err, BackendError::PerformanceOrdering));
    assert!(backend.get_performance_data(&function).is_empty());
}

#[test]
fn performance_data_reports_per_node_counters() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    assert!(backend.get_performance_data(&function).is_empty());
    backend
        .enable_performance_data(&function, true)
        .expect("enable before compile");
    assert!(backend.get_performance_data(&function).is_empty());
    run_identity(&backend, &function);
    run_identity(&backend, &function);
    let counters = backend.get_performance_data(&function);
    assert_eq!(counters.len(), 2);
    assert_eq!(counters[1].name(), "Identity_1");
    assert!(counters.iter().all(|c| c.call_count() == 2));
}

#[test]
fn call_checks_arity() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    let mut output = Tensor::new(DType::F32, [4]);
    let err = backend
        .call(&function, &mut [&mut output], &[])
        .expect_err("missing input");
    assert!(matches!(err, BackendError::Interface(_)));
}

#[test]
fn call_with_validate_rejects_wrong_shape() {
    let backend = counting_backend(BackendKind::Interpreter);
    let function = identity_function();
    let input = Tensor::new(DType::F32, [5]);
    let mut output = Tensor::new(DType::F32, [4]);
    let err = backend
        .call_with_validate(&function, &mut [&mut output], &[&input])
        .expect_err("shape mismatch");
    assert!(matches!(err, BackendError::Interface(_)));
    assert_eq!(backend.compiler().lowerings(), 0);
}

#[test]
fn concurrent_compiles_lower_once_per_function() {
    let backend = Arc::new(counting_backend(BackendKind::Interpreter));
    let functions: Vec<Function> = (0..4).map(|_| identity_function()).collect();
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let backend = Arc::clone(&backend);
            let function = functions[i % functions.len()].clone();
            thread::spawn(move || {
                backend.compile(&function).expect("compile");
                run_identity(backend.as_ref(), &function)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("thread"), vec![1.0, 2.0, 3.0, 4.0]);
    }
    assert_eq!(backend.compiler().lowerings(), functions.len());
}

#[test]
fn custom_op_runs_through_interpreter_identity() {
    let backend = counting_backend(BackendKind::Interpreter);
    let mut builder = FunctionBuilder::new("abc");
    let a = builder.parameter(DType::F32, [2, 2]);
    let b = builder.parameter(DType::F32, [2, 2]);
    let c = builder.parameter(DType::F32, [2, 2]);
    let out = builder.custom(&[a, b, c], AbcOp::new).expect("abc")[0];
    let function = builder.finish(&[out]).expect("finish");

    let ta = Tensor::from_slice([2, 2], &[1.0f32, 2.0, 3.0, 4.0]).expect("a");
    let tb = Tensor::from_slice([2, 2], &[5.0f32, 6.0, 7.0, 8.0]).expect("b");
    let tc = Tensor::from_slice([2, 2], &[9.0f32, 10.0, 11.0, 12.0]).expect("c");
    let mut result = Tensor::new(DType::F32, [2, 2]);
    backend
        .call_with_validate(&function, &mut [&mut result], &[&ta, &tb, &tc])
        .expect("call");
    assert_eq!(result.read::<f32>().expect("read"), vec![54.0, 80.0, 110.0, 144.0]);
}

#[test]
fn custom_op_without_kernel_is_a_dispatch_miss() {
    let backend = counting_backend(BackendKind::Gpu);
    let mut builder = FunctionBuilder::new("abc");
    let a = builder.parameter(DType::F32, [2]);
    let out = builder.custom(&[a, a, a], AbcOp::new).expect("abc")[0];
    let function = builder.finish(&[out]).expect("finish");
    let input = Tensor::new(DType::F32, [2]);
    let mut result = Tensor::new(DType::F32, [2]);
    match backend.call(&function, &mut [&mut result], &[&input]) {
        Err(BackendError::DispatchMiss { backend, kind, .. }) => {
            assert_eq!(backend, "GPU");
            assert_eq!(kind, "ABC");
        }
        other => panic!("expected dispatch miss, got {other:?}"),
    }
}
