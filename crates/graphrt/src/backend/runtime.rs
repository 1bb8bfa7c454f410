use std::fmt;

use super::cache::{CompiledFunction, FunctionCache, InstanceState};
use super::{
    check_call_arity, collect_performance_data, Backend, BackendKind, Compiler,
    LoweringOptions, PerformanceCounter,
};
use crate::error::{BackendError, BackendResult};
use crate::graph::Function;
use crate::tensor::Tensor;

/// [`Backend`] implementation shared by the in-tree targets: owns the function
/// cache and delegates lowering to a [`Compiler`].
pub struct RuntimeBackend<C: Compiler> {
    compiler: C,
    cache: FunctionCache,
}

impl<C: Compiler> RuntimeBackend<C> {
    pub fn new(compiler: C) -> Self {
        RuntimeBackend {
            compiler,
            cache: FunctionCache::new(),
        }
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// Number of functions with a cache entry (compiled or merely configured).
    pub fn cached_function_count(&self) -> usize {
        self.cache.len()
    }

    pub fn is_compiled(&self, function: &Function) -> bool {
        self.cache
            .get(function.id())
            .is_some_and(|instance| instance.lock().compiled.is_some())
    }

    fn ensure_compiled<'a>(
        &self,
        state: &'a mut InstanceState,
        function: &Function,
    ) -> BackendResult<&'a mut CompiledFunction> {
        let compiled = match state.compiled.take() {
            Some(compiled) => compiled,
            None => self.lower(function, state.performance_counters_enabled)?,
        };
        Ok(state.compiled.insert(compiled))
    }

    fn lower(&self, function: &Function, emit_timing: bool) -> BackendResult<CompiledFunction> {
        let options = LoweringOptions { emit_timing };
        tracing::debug!(
            backend = %self.compiler.kind(),
            function = %function.id(),
            name = function.name(),
            emit_timing,
            "lowering function"
        );
        let external = self.compiler.lower(function, &options)?;
        let call_frame = std::sync::Arc::clone(&external).make_call_frame()?;
        Ok(CompiledFunction {
            external,
            call_frame,
        })
    }
}

impl<C: Compiler> Backend for RuntimeBackend<C> {
    fn kind(&self) -> BackendKind {
        self.compiler.kind()
    }

    fn compile(&self, function: &Function) -> BackendResult<()> {
        let instance = self.cache.instance(function.id());
        let mut state = instance.lock();
        self.ensure_compiled(&mut state, function)?;
        Ok(())
    }

    fn call(
        &self,
        function: &Function,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        check_call_arity(function, outputs.len(), inputs.len())?;
        let instance = self.cache.instance(function.id());
        let mut state = instance.lock();
        let compiled = self.ensure_compiled(&mut state, function)?;
        compiled.call_frame.call(self, outputs, inputs)
    }

    fn remove_compiled_function(&self, function: &Function) {
        if self.cache.remove(function.id()) {
            tracing::debug!(function = %function.id(), "evicted compiled function");
        }
    }

    fn enable_performance_data(&self, function: &Function, enable: bool) -> BackendResult<()> {
        let instance = self.cache.instance(function.id());
        let mut state = instance.lock();
        if state.compiled.is_some() {
            return Err(BackendError::PerformanceOrdering);
        }
        state.performance_counters_enabled = enable;
        Ok(())
    }

    fn get_performance_data(&self, function: &Function) -> Vec<PerformanceCounter> {
        let Some(instance) = self.cache.get(function.id()) else {
            return Vec::new();
        };
        let state = instance.lock();
        state
            .compiled
            .as_ref()
            .and_then(|compiled| {
                compiled
                    .external
                    .debug_timers()
                    .map(|timers| collect_performance_data(timers.as_ref()))
            })
            .unwrap_or_default()
    }
}

impl<C: Compiler> fmt::Debug for RuntimeBackend<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBackend")
            .field("kind", &self.compiler.kind())
            .field("cached_functions", &self.cache.len())
            .finish()
    }
}
