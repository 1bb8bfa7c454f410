//! Reference interpreter backend, registered as `"INTERPRETER"`.
//!
//! Lowering produces a schedule of live nodes; each call walks it with a fresh
//! value table. Slow but simple, and the behavioural reference for the
//! code-generating backends.

mod frame;
mod kernels;
mod lowering;

use std::sync::Arc;

use graphrt::backend::{register_backend, Compiler, ExternalFunction, LoweringOptions, RuntimeBackend};
use graphrt::{Backend, BackendConfig, BackendKind, BackendResult, Function};

pub use lowering::InterpretedFunction;

pub const INTERPRETER_IDENTITY: &str = "INTERPRETER";

#[derive(Debug, Default, Clone)]
pub struct InterpreterCompiler;

impl Compiler for InterpreterCompiler {
    fn kind(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn lower(
        &self,
        function: &Function,
        options: &LoweringOptions,
    ) -> BackendResult<Arc<dyn ExternalFunction>> {
        let lowered = InterpretedFunction::lower(function, options)?;
        tracing::debug!(
            function = %function.id(),
            steps = lowered.steps.len(),
            "interpreter schedule built"
        );
        Ok(Arc::new(lowered))
    }
}

pub type InterpreterBackend = RuntimeBackend<InterpreterCompiler>;

pub fn new_backend() -> InterpreterBackend {
    RuntimeBackend::new(InterpreterCompiler)
}

/// Builds an interpreter from a configuration string. No options are defined.
pub fn create_backend(configuration: &str) -> BackendResult<Arc<dyn Backend>> {
    BackendConfig::parse(configuration)?.ensure_known(INTERPRETER_IDENTITY, &[])?;
    Ok(Arc::new(new_backend()))
}

pub fn register_interpreter_backend() {
    register_backend(INTERPRETER_IDENTITY, create_backend);
}
