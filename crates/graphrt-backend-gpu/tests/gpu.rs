use anyhow::Result;
use graphrt::backend::LoweringOptions;
use graphrt::{create_backend, Backend, BackendError, DType, FunctionBuilder, Tensor, UnaryOp};
use graphrt_backend_gpu::{
    is_available, new_backend, register_gpu_backend, GpuCompiler, GpuOptions, GPU_IDENTITY,
};

#[test]
fn configuration_is_checked_before_the_device() {
    register_gpu_backend();
    for bad in ["threads=4", "block=7", "device=first"] {
        let err = create_backend(GPU_IDENTITY, bad).err();
        assert!(matches!(err, Some(BackendError::Config(_))), "{bad}");
    }
}

#[test]
fn missing_device_reports_unavailable() {
    if is_available() {
        return;
    }
    let err = graphrt_backend_gpu::create_backend("").err();
    assert!(matches!(err, Some(BackendError::Unavailable { .. })));
}

#[test]
fn primitives_are_shared_by_one_compiler() -> Result<()> {
    let build = |name: &str, shape: [usize; 1]| {
        let mut builder = FunctionBuilder::new(name);
        let x = builder.parameter(DType::F32, shape);
        let y = builder.unary(UnaryOp::Exp, x)?;
        let z = builder.subtract(y, x)?;
        builder.finish(&[z])
    };
    let compiler = GpuCompiler::new(GpuOptions::default());
    let options = LoweringOptions::default();
    compiler.lower_function(&build("a", [16])?, &options)?;
    compiler.lower_function(&build("b", [16])?, &options)?;
    assert_eq!(compiler.primitive_count(), 2);
    let lowered = compiler.lower_function(&build("c", [32])?, &options)?;
    assert_eq!(compiler.primitive_count(), 4);
    assert_eq!(lowered.primitive_handles(), vec![2, 3]);
    Ok(())
}

#[test]
fn repeated_calls_reuse_device_state() -> Result<()> {
    if !is_available() {
        eprintln!("skipping: no CUDA device");
        return Ok(());
    }
    let mut builder = FunctionBuilder::new("scale");
    let x = builder.parameter(DType::I64, [5]);
    let k = builder.constant::<i64>([5], &[1, 2, 3, 4, 5])?;
    let y = builder.multiply(x, k)?;
    let z = builder.unary(UnaryOp::Negative, y)?;
    let function = builder.finish(&[z, y])?;

    let backend = new_backend(GpuOptions::default());
    backend.enable_performance_data(&function, true)?;
    for scale in [1i64, -2] {
        let input = Tensor::from_slice([5], &[scale; 5])?;
        let mut negated = Tensor::new(DType::I64, [5]);
        let mut product = Tensor::new(DType::I64, [5]);
        backend.call(&function, &mut [&mut negated, &mut product], &[&input])?;
        let expected: Vec<i64> = (1..=5).map(|v| v * scale).collect();
        assert_eq!(product.read::<i64>()?, expected);
        assert_eq!(
            negated.read::<i64>()?,
            expected.iter().map(|v| -v).collect::<Vec<_>>()
        );
    }
    let counters = backend.get_performance_data(&function);
    let names: Vec<&str> = counters.iter().map(|c| c.name()).collect();
    assert_eq!(names, ["Multiply_2", "Negative_3"]);
    assert!(counters.iter().all(|c| c.call_count() == 2));
    Ok(())
}
