use graphrt::{create_backend, Backend, BackendError, DType, FunctionBuilder, Tensor, UnaryOp};
use graphrt_backend_interpreter::{new_backend, register_interpreter_backend, INTERPRETER_IDENTITY};

#[test]
fn registers_under_interpreter_identity() {
    register_interpreter_backend();
    let backend = create_backend(INTERPRETER_IDENTITY, "").unwrap();
    assert_eq!(backend.kind().identity(), "INTERPRETER");
    assert!(matches!(
        create_backend(INTERPRETER_IDENTITY, "threads=4"),
        Err(BackendError::Config(_))
    ));
}

#[test]
fn intermediate_values_do_not_leak_between_calls() {
    let mut builder = FunctionBuilder::new("chain");
    let x = builder.parameter(DType::F64, [3]);
    let negated = builder.unary(UnaryOp::Negative, x).unwrap();
    let magnitude = builder.unary(UnaryOp::Abs, negated).unwrap();
    let doubled = builder.add(magnitude, magnitude).unwrap();
    let function = builder.finish(&[doubled, negated]).unwrap();

    let backend = new_backend();
    for scale in [1.0f64, -3.0] {
        let input = Tensor::from_slice([3], &[scale, 2.0 * scale, 0.5]).unwrap();
        let mut doubled = Tensor::new(DType::F64, [3]);
        let mut negated = Tensor::new(DType::F64, [3]);
        backend
            .call(&function, &mut [&mut doubled, &mut negated], &[&input])
            .unwrap();
        assert_eq!(
            doubled.read::<f64>().unwrap(),
            vec![2.0 * scale.abs(), 4.0 * scale.abs(), 1.0]
        );
        assert_eq!(negated.read::<f64>().unwrap(), vec![-scale, -2.0 * scale, -0.5]);
    }
    assert_eq!(backend.cached_function_count(), 1);
}

#[test]
fn per_node_counters_follow_schedule_order() {
    let mut builder = FunctionBuilder::new("timed");
    let x = builder.parameter(DType::F32, [2]);
    let k = builder.constant::<f32>([2], &[1.0, 2.0]).unwrap();
    let sum = builder.add(x, k).unwrap();
    let out = builder.unary(UnaryOp::Relu, sum).unwrap();
    let function = builder.finish(&[out]).unwrap();

    let backend = new_backend();
    backend.enable_performance_data(&function, true).unwrap();
    let input = Tensor::from_slice([2], &[-4.0f32, 4.0]).unwrap();
    let mut output = Tensor::new(DType::F32, [2]);
    backend.call(&function, &mut [&mut output], &[&input]).unwrap();
    assert_eq!(output.read::<f32>().unwrap(), vec![0.0, 6.0]);

    let names: Vec<String> = backend
        .get_performance_data(&function)
        .into_iter()
        .map(|counter| counter.name)
        .collect();
    assert_eq!(names, vec!["Add_2".to_string(), "Relu_3".to_string()]);
}
