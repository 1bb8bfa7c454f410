//! The backend contract: compile a [`Function`] once, call it many times.

mod cache;
mod external;
mod perf;
pub mod plugin;
pub mod registry;
mod runtime;

use std::fmt;

pub use cache::{CompiledFunction, FunctionCache, FunctionInstance, InstanceState};
pub use external::{CallFrame, Compiler, ExternalFunction, LoweringOptions};
pub use perf::{
    collect_performance_data, performance_report_json, DebugTimerTable, DebugTimers,
    PerformanceCounter,
};
pub use registry::{
    create_backend, has_backend, list_backends, register_backend, unregister_backend,
    BackendFactory,
};
pub use runtime::RuntimeBackend;

use crate::error::{BackendError, BackendResult};
use crate::graph::Function;
use crate::tensor::{DType, ExternalBuffer, Shape, Tensor, TensorSpec};

/// Identity tag of a backend implementation. Custom kernels are keyed by
/// [`BackendKind::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Interpreter,
    Cpu,
    Gpu,
    /// Out-of-tree backends, typically loaded as plugins.
    Custom(String),
}

impl BackendKind {
    pub fn identity(&self) -> &str {
        match self {
            BackendKind::Interpreter => "INTERPRETER",
            BackendKind::Cpu => "CPU",
            BackendKind::Gpu => "GPU",
            BackendKind::Custom(identity) => identity,
        }
    }

    pub fn from_identity(identity: &str) -> Self {
        match identity {
            "INTERPRETER" => BackendKind::Interpreter,
            "CPU" => BackendKind::Cpu,
            "GPU" => BackendKind::Gpu,
            other => BackendKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity())
    }
}

/// Uniform entry point of every hardware target.
///
/// `compile` is idempotent and `call` compiles on demand. Compiled artifacts are
/// cached per function inside the backend; the function itself is never touched.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn create_tensor(&self, dtype: DType, shape: Shape) -> Tensor {
        Tensor::new(dtype, shape)
    }

    /// Binds a tensor to caller-owned memory without taking ownership of it.
    fn create_tensor_with_buffer(
        &self,
        dtype: DType,
        shape: Shape,
        buffer: ExternalBuffer,
    ) -> BackendResult<Tensor> {
        Tensor::from_external(dtype, shape, buffer)
    }

    fn compile(&self, function: &Function) -> BackendResult<()>;

    /// Runs `function`; `inputs` follow the parameter order, `outputs` the
    /// result order. Tensor types are the caller's responsibility (see
    /// [`Backend::call_with_validate`]).
    fn call(
        &self,
        function: &Function,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()>;

    /// Like [`Backend::call`], after checking every tensor against the
    /// function's declared interface.
    fn call_with_validate(
        &self,
        function: &Function,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        let outs: Vec<&Tensor> = outputs.iter().map(|t| &**t).collect();
        validate_call_interface(function, &outs, inputs)?;
        self.call(function, outputs, inputs)
    }

    fn remove_compiled_function(&self, function: &Function);

    /// Must be called before the function is first compiled.
    fn enable_performance_data(&self, function: &Function, enable: bool) -> BackendResult<()>;

    /// Cumulative per-node counters. Empty unless the function was compiled with
    /// performance data enabled.
    fn get_performance_data(&self, function: &Function) -> Vec<PerformanceCounter>;
}

/// Convenience alias for [`registry::create_backend`].
pub fn create(identity: &str, configuration: &str) -> BackendResult<std::sync::Arc<dyn Backend>> {
    create_backend(identity, configuration)
}

pub fn check_call_arity(function: &Function, outputs: usize, inputs: usize) -> BackendResult<()> {
    let (results, params) = (function.results().len(), function.parameters().len());
    if outputs != results || inputs != params {
        return Err(BackendError::Interface(format!(
            "function {} takes {params} inputs and {results} outputs, got {inputs} and {outputs}",
            function.name()
        )));
    }
    Ok(())
}

pub fn validate_call_interface(
    function: &Function,
    outputs: &[&Tensor],
    inputs: &[&Tensor],
) -> BackendResult<()> {
    check_call_arity(function, outputs.len(), inputs.len())?;
    let check = |role: &str, index: usize, expected: &TensorSpec, tensor: &Tensor| {
        let actual = tensor.spec();
        if &actual == expected {
            Ok(())
        } else {
            Err(BackendError::Interface(format!(
                "{role} {index} ({tensor}) is {actual}, expected {expected}"
            )))
        }
    };
    for (index, (spec, tensor)) in function.parameter_specs().iter().zip(inputs).enumerate() {
        check("input", index, spec, tensor)?;
    }
    for (index, (spec, tensor)) in function.result_specs().iter().zip(outputs).enumerate() {
        check("output", index, spec, tensor)?;
    }
    Ok(())
}
