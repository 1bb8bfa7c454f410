use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use graphrt::{BackendError, BackendResult};

use crate::device::{CudaDriver, CudaFunction};
use crate::emitter::Primitive;
use crate::nvrtc::nvrtc;

/// Loaded kernels by symbol. Symbols are derived from the primitive
/// signature, so a hit is always the same code.
#[derive(Default)]
pub(crate) struct KernelCache {
    loaded: Mutex<HashMap<String, CudaFunction>>,
}

impl KernelCache {
    pub(crate) fn load(
        &self,
        driver: &Arc<CudaDriver>,
        primitive: &Primitive,
        arch: &str,
    ) -> BackendResult<CudaFunction> {
        if let Some(found) = self.lock()?.get(&primitive.symbol) {
            return Ok(found.clone());
        }

        let ptx = nvrtc()?.compile_ptx(&primitive.source, &primitive.symbol, arch)?;
        let module = driver.load_ptx_module(&ptx)?;
        let function = driver.get_function(&module, &primitive.symbol)?;
        tracing::debug!(symbol = %primitive.symbol, arch, "loaded elementwise kernel");
        self.lock()?
            .insert(primitive.symbol.clone(), function.clone());
        Ok(function)
    }

    fn lock(&self) -> BackendResult<std::sync::MutexGuard<'_, HashMap<String, CudaFunction>>> {
        self.loaded
            .lock()
            .map_err(|_| BackendError::execution("GPU kernel cache mutex poisoned"))
    }
}
