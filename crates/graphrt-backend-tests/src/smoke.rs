//! Behavioural checks every backend must pass.

use std::sync::Arc;

use graphrt::{Backend, BackendError, BackendKind, DType, ExternalBuffer, Function, FunctionBuilder, Tensor};

use crate::harness::{run, tensor};
use crate::ops::{AbcOp, SplitSignOp, UnsupportedOp};

fn add_function() -> Function {
    let mut builder = FunctionBuilder::new("add");
    let a = builder.parameter(DType::F32, [2, 2]);
    let b = builder.parameter(DType::F32, [2, 2]);
    let sum = builder.add(a, b).unwrap();
    builder.finish(&[sum]).unwrap()
}

fn abc_function(order: [usize; 3]) -> Function {
    let mut builder = FunctionBuilder::new("abc");
    let params: Vec<_> = (0..3).map(|_| builder.parameter(DType::F32, [2, 2])).collect();
    let args = [params[order[0]], params[order[1]], params[order[2]]];
    let out = builder.custom(&args, AbcOp::new).unwrap();
    builder.finish(&out).unwrap()
}

pub fn add_matches_expected(backend: &Arc<dyn Backend>) {
    let function = add_function();
    let a = tensor(&[2, 2], &[1.0f32, 2.0, 3.0, 4.0]);
    let b = tensor(&[2, 2], &[5.0f32, 6.0, 7.0, 8.0]);
    let out = run(backend.as_ref(), &function, &[a, b]).unwrap();
    assert_eq!(out[0].read::<f32>().unwrap(), vec![6.0, 8.0, 10.0, 12.0]);
}

pub fn abc_custom_op_matches_expected(backend: &Arc<dyn Backend>) {
    let a = tensor(&[2, 2], &[1.0f32, 2.0, 3.0, 4.0]);
    let b = tensor(&[2, 2], &[5.0f32, 6.0, 7.0, 8.0]);
    let c = tensor(&[2, 2], &[9.0f32, 10.0, 11.0, 12.0]);
    let inputs = [a, b, c];

    let cases: [([usize; 3], [f32; 4]); 3] = [
        ([0, 1, 2], [54.0, 80.0, 110.0, 144.0]),
        ([1, 0, 2], [54.0, 80.0, 110.0, 144.0]),
        ([0, 2, 1], [50.0, 72.0, 98.0, 128.0]),
    ];
    for (order, expected) in cases {
        let function = abc_function(order);
        let out = run(backend.as_ref(), &function, &inputs).unwrap();
        assert_eq!(out[0].read::<f32>().unwrap(), expected.to_vec(), "order {order:?}");
    }
}

pub fn unsupported_custom_op_reports_dispatch_miss(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("unsupported");
    let out = builder.custom(&[], UnsupportedOp::new).unwrap();
    let function = builder.finish(&out).unwrap();
    let err = run(backend.as_ref(), &function, &[]).unwrap_err();
    match err {
        BackendError::DispatchMiss { backend: identity, kind, .. } => {
            assert_eq!(identity, backend.kind().identity());
            assert_eq!(kind, "Unsupported");
        }
        other => panic!("expected dispatch miss, got {other}"),
    }
}

pub fn compile_is_idempotent(backend: &Arc<dyn Backend>) {
    let function = add_function();
    backend.compile(&function).unwrap();
    backend.compile(&function).unwrap();
    let a = tensor(&[2, 2], &[1.0f32; 4]);
    let out = run(backend.as_ref(), &function, &[a.clone(), a]).unwrap();
    assert_eq!(out[0].read::<f32>().unwrap(), vec![2.0; 4]);
}

pub fn call_frame_is_reusable(backend: &Arc<dyn Backend>) {
    let function = add_function();
    for round in 0..3 {
        let base = round as f32;
        let a = tensor(&[2, 2], &[base, base + 1.0, base + 2.0, base + 3.0]);
        let b = tensor(&[2, 2], &[10.0f32; 4]);
        let out = run(backend.as_ref(), &function, &[a, b]).unwrap();
        assert_eq!(
            out[0].read::<f32>().unwrap(),
            vec![base + 10.0, base + 11.0, base + 12.0, base + 13.0]
        );
    }
}

pub fn remove_compiled_function_recompiles(backend: &Arc<dyn Backend>) {
    let function = add_function();
    let a = tensor(&[2, 2], &[1.0f32, 2.0, 3.0, 4.0]);
    run(backend.as_ref(), &function, &[a.clone(), a.clone()]).unwrap();
    backend.remove_compiled_function(&function);
    backend.remove_compiled_function(&function);
    // With the artifact gone the ordering rule no longer applies.
    backend.enable_performance_data(&function, true).unwrap();
    let out = run(backend.as_ref(), &function, &[a.clone(), a]).unwrap();
    assert_eq!(out[0].read::<f32>().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
    assert!(!backend.get_performance_data(&function).is_empty());
}

pub fn performance_data_must_precede_compile(backend: &Arc<dyn Backend>) {
    let function = add_function();
    backend.compile(&function).unwrap();
    assert!(matches!(
        backend.enable_performance_data(&function, true),
        Err(BackendError::PerformanceOrdering)
    ));
    assert!(backend.get_performance_data(&function).is_empty());
}

pub fn performance_data_counts_calls(backend: &Arc<dyn Backend>) {
    let function = add_function();
    assert!(backend.get_performance_data(&function).is_empty());
    backend.enable_performance_data(&function, true).unwrap();
    let a = tensor(&[2, 2], &[1.0f32; 4]);
    for _ in 0..2 {
        run(backend.as_ref(), &function, &[a.clone(), a.clone()]).unwrap();
    }
    let counters = backend.get_performance_data(&function);
    assert!(!counters.is_empty());
    let add = counters
        .iter()
        .find(|counter| counter.name() == "Add_2")
        .expect("counter for the add node");
    assert_eq!(add.call_count(), 2);
    // Restartable: a second retrieval sees the same cumulative data.
    assert_eq!(backend.get_performance_data(&function), counters);
}

pub fn zero_element_tensors_are_accepted(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("empty");
    let a = builder.parameter(DType::F32, [0, 4]);
    let b = builder.parameter(DType::F32, [0, 4]);
    let sum = builder.add(a, b).unwrap();
    let neg = builder.unary(graphrt::UnaryOp::Negative, sum).unwrap();
    let function = builder.finish(&[neg]).unwrap();
    let empty = Tensor::new(DType::F32, [0, 4]);
    let out = run(backend.as_ref(), &function, &[empty.clone(), empty]).unwrap();
    assert_eq!(out[0].element_count(), 0);
}

pub fn zero_element_nodes_report_no_counters(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("empty_timed");
    let x = builder.parameter(DType::F32, [0]);
    let y = builder.parameter(DType::F32, [2]);
    let neg = builder.unary(graphrt::UnaryOp::Negative, x).unwrap();
    let copy = builder.identity(neg).unwrap();
    let abs = builder.unary(graphrt::UnaryOp::Abs, y).unwrap();
    let function = builder.finish(&[copy, abs]).unwrap();
    backend.enable_performance_data(&function, true).unwrap();

    let empty = Tensor::new(DType::F32, [0]);
    let values = tensor(&[2], &[-1.0f32, 2.0]);
    let out = run(backend.as_ref(), &function, &[empty, values]).unwrap();
    assert_eq!(out[0].element_count(), 0);
    assert_eq!(out[1].read::<f32>().unwrap(), vec![1.0, 2.0]);

    let names: Vec<String> = backend
        .get_performance_data(&function)
        .iter()
        .map(|counter| counter.name().to_string())
        .collect();
    assert_eq!(names, ["Abs_4"]);
}

pub fn multi_output_custom_op(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("split");
    let x = builder.parameter(DType::F32, [3]);
    let outs = builder.custom(&[x], SplitSignOp::new).unwrap();
    let sum = builder.add(outs[0], outs[1]).unwrap();
    let function = builder.finish(&[outs[1], outs[0], sum]).unwrap();
    let input = tensor(&[3], &[1.5f32, -2.0, 0.25]);
    let out = run(backend.as_ref(), &function, &[input]).unwrap();
    assert_eq!(out[0].read::<f32>().unwrap(), vec![-1.5, 2.0, -0.25]);
    assert_eq!(out[1].read::<f32>().unwrap(), vec![1.5, -2.0, 0.25]);
    assert_eq!(out[2].read::<f32>().unwrap(), vec![0.0; 3]);
}

pub fn results_may_alias_inputs_and_constants(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("aliases");
    let x = builder.parameter(DType::I32, [3]);
    let k = builder.constant::<i32>([3], &[10, 20, 30]).unwrap();
    let sum = builder.add(x, k).unwrap();
    let function = builder.finish(&[x, k, sum, sum]).unwrap();
    let input = tensor(&[3], &[1i32, 2, 3]);
    let out = run(backend.as_ref(), &function, &[input]).unwrap();
    assert_eq!(out[0].read::<i32>().unwrap(), vec![1, 2, 3]);
    assert_eq!(out[1].read::<i32>().unwrap(), vec![10, 20, 30]);
    assert_eq!(out[2].read::<i32>().unwrap(), vec![11, 22, 33]);
    assert_eq!(out[3].read::<i32>().unwrap(), vec![11, 22, 33]);
}

pub fn integer_arithmetic_wraps(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("int_math");
    let a = builder.parameter(DType::I32, [4]);
    let b = builder.parameter(DType::I32, [4]);
    let quotient = builder.divide(a, b).unwrap();
    let sum = builder.add(a, b).unwrap();
    let function = builder.finish(&[quotient, sum]).unwrap();
    let lhs = tensor(&[4], &[7i32, -7, i32::MAX, i32::MIN]);
    let rhs = tensor(&[4], &[0i32, 2, 1, -1]);
    let out = run(backend.as_ref(), &function, &[lhs, rhs]).unwrap();
    assert_eq!(out[0].read::<i32>().unwrap(), vec![0, -3, i32::MAX, i32::MIN]);
    assert_eq!(out[1].read::<i32>().unwrap(), vec![7, -5, i32::MIN, i32::MAX]);
}

pub fn convert_follows_numeric_conventions(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("convert");
    let x = builder.parameter(DType::F32, [4]);
    let as_int = builder.convert(x, DType::I32).unwrap();
    let as_bool = builder.convert(x, DType::Boolean).unwrap();
    let function = builder.finish(&[as_int, as_bool]).unwrap();
    let input = tensor(&[4], &[1.75f32, -2.5, 0.0, 3.0]);
    let out = run(backend.as_ref(), &function, &[input]).unwrap();
    assert_eq!(out[0].read::<i32>().unwrap(), vec![1, -2, 0, 3]);
    assert_eq!(out[1].read::<u8>().unwrap(), vec![1, 1, 0, 1]);
}

pub fn dot_matches_expected(backend: &Arc<dyn Backend>) {
    let mut builder = FunctionBuilder::new("dot");
    let a = builder.parameter(DType::F32, [2, 3]);
    let b = builder.parameter(DType::F32, [3, 2]);
    let product = builder.dot(a, b).unwrap();
    let function = builder.finish(&[product]).unwrap();
    let lhs = tensor(&[2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let rhs = tensor(&[3, 2], &[7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]);
    let result = run(backend.as_ref(), &function, &[lhs, rhs]);
    if backend.kind() == BackendKind::Gpu {
        match result {
            Err(BackendError::Unimplemented { name, kind, .. }) => {
                assert_eq!(name, "Dot_2");
                assert_eq!(kind, "Dot");
            }
            other => panic!("expected unimplemented Dot, got {other:?}"),
        }
        return;
    }
    let out = result.unwrap();
    assert_eq!(out[0].read::<f32>().unwrap(), vec![58.0, 64.0, 139.0, 154.0]);
}

pub fn writes_into_external_buffers(backend: &Arc<dyn Backend>) {
    let function = add_function();
    let mut storage = vec![0.0f32; 4];
    {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut storage);
        let buffer = unsafe { ExternalBuffer::from_slice(bytes) };
        let mut out = backend
            .create_tensor_with_buffer(DType::F32, [2, 2].into(), buffer)
            .unwrap();
        assert!(out.is_external());
        let a = tensor(&[2, 2], &[1.0f32, 2.0, 3.0, 4.0]);
        backend.call(&function, &mut [&mut out], &[&a, &a]).unwrap();
    }
    assert_eq!(storage, vec![2.0, 4.0, 6.0, 8.0]);
}

pub fn mismatched_tensors_are_rejected(backend: &Arc<dyn Backend>) {
    let function = add_function();
    let a = tensor(&[2, 2], &[1.0f32; 4]);
    let wrong = tensor(&[4], &[1.0f32; 4]);
    let err = run(backend.as_ref(), &function, &[a.clone(), wrong]).unwrap_err();
    assert!(matches!(err, BackendError::Interface(_)), "{err}");
    let mut out = Tensor::new(DType::F32, [2, 2]);
    let err = backend.call(&function, &mut [&mut out], &[&a]).unwrap_err();
    assert!(matches!(err, BackendError::Interface(_)), "{err}");
}
