use std::fs;
use std::sync::Arc;

use anyhow::Result;
use graphrt::{
    create_backend, Backend, BackendError, BackendResult, CustomOp, DType, ExecTable,
    FunctionBuilder, GraphResult, Tensor, TensorSpec, UnaryOp,
};
use graphrt_backend_cpu::{is_available, new_backend, register_cpu_backend, CpuOptions, CPU_IDENTITY};
use tempfile::TempDir;

fn backend_in(dir: &TempDir) -> Option<graphrt_backend_cpu::CpuBackend> {
    if !is_available() {
        eprintln!("skipping: no C compiler found");
        return None;
    }
    Some(new_backend(CpuOptions {
        cache_dir: dir.path().to_path_buf(),
        ..CpuOptions::default()
    }))
}

fn shared_objects(dir: &TempDir) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir.path())? {
        let name = entry?.file_name();
        if name.to_string_lossy().starts_with("libgraphrt_cpu_") {
            count += 1;
        }
    }
    Ok(count)
}

#[test]
fn rejects_unknown_configuration_keys() {
    register_cpu_backend();
    let err = create_backend(CPU_IDENTITY, "threads=4").err();
    assert!(matches!(err, Some(BackendError::Config(_))));
    let err = create_backend(CPU_IDENTITY, "alignment=48").err();
    assert!(matches!(err, Some(BackendError::Config(_))));
}

#[test]
fn missing_compiler_makes_backend_unavailable() {
    let err = graphrt_backend_cpu::create_backend("cc=/nonexistent/graphrt-cc").err();
    assert!(matches!(err, Some(BackendError::Unavailable { .. })));
}

#[test]
fn identical_functions_share_a_cached_shared_object() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let Some(backend) = backend_in(&dir) else {
        return Ok(());
    };

    let build = |name: &str| {
        let mut builder = FunctionBuilder::new(name);
        let x = builder.parameter(DType::F32, [4]);
        let y = builder.unary(UnaryOp::Exp, x)?;
        builder.finish(&[y])
    };
    let first = build("first")?;
    let second = build("second")?;
    backend.compile(&first)?;
    backend.compile(&second)?;
    assert_eq!(backend.cached_function_count(), 2);
    assert_eq!(shared_objects(&dir)?, 1);

    let fresh = backend_in(&dir).expect("compiler checked above");
    let input = Tensor::from_slice([4], &[0.0f32, 1.0, 2.0, -1.0])?;
    let mut output = Tensor::new(DType::F32, [4]);
    fresh.call(&second, &mut [&mut output], &[&input])?;
    assert_eq!(shared_objects(&dir)?, 1);
    let values = output.read::<f32>()?;
    assert!((values[1] - std::f32::consts::E).abs() < 1e-5);
    Ok(())
}

#[test]
fn instrumented_functions_get_private_counters() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let Some(backend) = backend_in(&dir) else {
        return Ok(());
    };

    let mut builder = FunctionBuilder::new("timed");
    let x = builder.parameter(DType::I32, [3]);
    let y = builder.add(x, x)?;
    let function = builder.finish(&[y])?;
    let other = backend_in(&dir).expect("compiler checked above");

    backend.enable_performance_data(&function, true)?;
    other.enable_performance_data(&function, true)?;
    let input = Tensor::from_slice([3], &[1i32, 2, 3])?;
    let mut output = Tensor::new(DType::I32, [3]);
    for _ in 0..3 {
        backend.call(&function, &mut [&mut output], &[&input])?;
    }
    other.call(&function, &mut [&mut output], &[&input])?;
    assert_eq!(output.read::<i32>()?, vec![2, 4, 6]);

    let counts = |backend: &dyn Backend| -> Vec<(String, u64)> {
        backend
            .get_performance_data(&function)
            .into_iter()
            .map(|counter| (counter.name, counter.call_count))
            .collect()
    };
    assert_eq!(counts(&backend), vec![("Add_1".to_string(), 3)]);
    assert_eq!(counts(&other), vec![("Add_1".to_string(), 1)]);
    Ok(())
}

#[test]
fn instrumented_artifacts_are_removed_with_their_function() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let Some(backend) = backend_in(&dir) else {
        return Ok(());
    };

    let mut builder = FunctionBuilder::new("timed");
    let x = builder.parameter(DType::F32, [2]);
    let y = builder.unary(UnaryOp::Negative, x)?;
    let function = builder.finish(&[y])?;
    backend.enable_performance_data(&function, true)?;
    backend.compile(&function)?;
    assert_eq!(shared_objects(&dir)?, 1);

    backend.remove_compiled_function(&function);
    assert_eq!(shared_objects(&dir)?, 0);
    assert_eq!(fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

struct PanickingOp {
    outputs: Vec<TensorSpec>,
    exec: ExecTable,
}

impl PanickingOp {
    fn new(args: &[TensorSpec]) -> GraphResult<Self> {
        let mut exec = ExecTable::new();
        exec.register_exec(CPU_IDENTITY, |_, _, _| -> BackendResult<()> {
            panic!("kernel exploded")
        });
        Ok(PanickingOp {
            outputs: args.to_vec(),
            exec,
        })
    }
}

impl CustomOp for PanickingOp {
    fn kind(&self) -> &str {
        "Panicking"
    }

    fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn exec_table(&self) -> &ExecTable {
        &self.exec
    }

    fn copy_with_new_args(&self, args: &[TensorSpec]) -> GraphResult<Arc<dyn CustomOp>> {
        Ok(Arc::new(PanickingOp::new(args)?))
    }
}

#[test]
fn panicking_custom_kernel_becomes_an_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let Some(backend) = backend_in(&dir) else {
        return Ok(());
    };
    let mut builder = FunctionBuilder::new("panics");
    let x = builder.parameter(DType::F32, [2]);
    let y = builder.custom(&[x], PanickingOp::new)?;
    let function = builder.finish(&[y[0]])?;

    let input = Tensor::from_slice([2], &[1.0f32, 2.0])?;
    let mut output = Tensor::new(DType::F32, [2]);
    let err = backend
        .call(&function, &mut [&mut output], &[&input])
        .unwrap_err();
    assert!(matches!(err, BackendError::Execution(_)));

    let backend: Arc<dyn Backend> = Arc::new(backend);
    let err = backend.call(&function, &mut [&mut output], &[&input]);
    assert!(err.is_err());
    Ok(())
}
