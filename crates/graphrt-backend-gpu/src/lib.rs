//! GPU backend, registered as `"GPU"`.
//!
//! Lowering is host-only: elementwise nodes become launches of kernels built
//! by a [`PrimitiveEmitter`] keyed on type and shape signatures, identities
//! become device copies and custom operations run their host kernel on staged
//! copies. The CUDA driver and NVRTC are loaded when the first call frame is
//! built, and every call synchronises the device before returning.

mod cache;
mod device;
mod emitter;
mod frame;
mod kernels;
mod lowering;
mod nvrtc;
mod options;

use std::sync::{Arc, Mutex};

use graphrt::backend::{register_backend, Compiler, ExternalFunction, LoweringOptions, RuntimeBackend};
use graphrt::{Backend, BackendConfig, BackendKind, BackendResult, Function};

use cache::KernelCache;
use emitter::SharedEmitter;

pub use emitter::{ElementwiseKind, Primitive, PrimitiveEmitter};
pub use lowering::GpuFunction;
pub use options::GpuOptions;

pub const GPU_IDENTITY: &str = "GPU";

pub struct GpuCompiler {
    options: GpuOptions,
    emitter: SharedEmitter,
    kernels: Arc<KernelCache>,
}

impl GpuCompiler {
    pub fn new(options: GpuOptions) -> Self {
        GpuCompiler {
            options,
            emitter: Arc::new(Mutex::new(PrimitiveEmitter::new())),
            kernels: Arc::new(KernelCache::default()),
        }
    }

    pub fn options(&self) -> &GpuOptions {
        &self.options
    }

    /// Number of distinct elementwise kernels built so far.
    pub fn primitive_count(&self) -> usize {
        self.emitter.lock().map(|emitter| emitter.len()).unwrap_or(0)
    }

    /// Lowers without binding device resources.
    pub fn lower_function(
        &self,
        function: &Function,
        options: &LoweringOptions,
    ) -> BackendResult<GpuFunction> {
        lowering::lower(function, options, &self.options, &self.emitter, &self.kernels)
    }
}

impl Compiler for GpuCompiler {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn lower(
        &self,
        function: &Function,
        options: &LoweringOptions,
    ) -> BackendResult<Arc<dyn ExternalFunction>> {
        let lowered = self.lower_function(function, options)?;
        tracing::debug!(
            function = %function.id(),
            launches = lowered.steps.len(),
            pool_size = lowered.pool_size,
            "GPU launch list built"
        );
        Ok(Arc::new(lowered))
    }
}

pub type GpuBackend = RuntimeBackend<GpuCompiler>;

pub fn new_backend(options: GpuOptions) -> GpuBackend {
    RuntimeBackend::new(GpuCompiler::new(options))
}

/// True when the CUDA driver, a device and NVRTC can all be loaded.
pub fn is_available() -> bool {
    match GpuOptions::from_config(&BackendConfig::default()) {
        Ok(options) => device::is_available(options.device) && nvrtc::nvrtc().is_ok(),
        Err(_) => false,
    }
}

/// Builds a GPU backend from a configuration string (see [`GpuOptions::from_config`]).
pub fn create_backend(configuration: &str) -> BackendResult<Arc<dyn Backend>> {
    let options = GpuOptions::from_config(&BackendConfig::parse(configuration)?)?;
    device::driver(options.device)?;
    nvrtc::nvrtc()?;
    Ok(Arc::new(new_backend(options)))
}

pub fn register_gpu_backend() {
    register_backend(GPU_IDENTITY, create_backend);
}
