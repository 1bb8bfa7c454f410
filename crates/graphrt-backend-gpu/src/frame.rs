use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;

use graphrt::backend::CallFrame;
use graphrt::op::dispatch_custom;
use graphrt::{Backend, BackendError, BackendResult, Tensor};

use crate::device::{self, CUdeviceptr, CudaDriver, CudaFunction, DeviceBuffer};
use crate::lowering::{GpuFunction, Launch, Slot, Step};

/// Device state bound to one [`GpuFunction`]: the value pool, uploaded
/// constants, loaded kernels and staging buffers for the caller's tensors.
pub(crate) struct GpuCallFrame {
    function: Arc<GpuFunction>,
    driver: Arc<CudaDriver>,
    pool: Arc<DeviceBuffer>,
    constants: Vec<Arc<DeviceBuffer>>,
    kernels: HashMap<usize, CudaFunction>,
    inputs: Vec<Arc<DeviceBuffer>>,
    outputs: Vec<Arc<DeviceBuffer>>,
}

impl GpuCallFrame {
    pub(crate) fn new(function: Arc<GpuFunction>) -> BackendResult<Self> {
        let driver = device::driver(function.options.device)?;
        let arch = match &function.options.arch {
            Some(arch) => arch.clone(),
            None => {
                let (major, minor) = driver.compute_capability();
                format!("compute_{major}{minor}")
            }
        };

        let mut kernels = HashMap::new();
        for handle in function.primitive_handles() {
            if kernels.contains_key(&handle) {
                continue;
            }
            let primitive = function
                .emitter
                .lock()
                .map_err(|_| BackendError::execution("GPU primitive emitter mutex poisoned"))?
                .primitive(handle)
                .ok_or_else(|| BackendError::execution(format!("unknown primitive handle {handle}")))?;
            kernels.insert(handle, function.kernels.load(&driver, &primitive, &arch)?);
        }

        let pool = driver.alloc_zeroed(function.pool_size)?;
        let constants = function
            .constants
            .iter()
            .map(|bytes| driver.alloc_and_upload(bytes))
            .collect::<BackendResult<Vec<_>>>()?;
        tracing::debug!(
            function = %function.name,
            pool_size = function.pool_size,
            kernels = kernels.len(),
            "GPU call frame ready"
        );
        Ok(GpuCallFrame {
            function,
            driver,
            pool,
            constants,
            kernels,
            inputs: Vec::new(),
            outputs: Vec::new(),
        })
    }

    /// Reuses a staging buffer when it already has the right size.
    fn stage(
        driver: &Arc<CudaDriver>,
        buffers: &mut Vec<Arc<DeviceBuffer>>,
        index: usize,
        bytes: usize,
    ) -> BackendResult<CUdeviceptr> {
        if let Some(existing) = buffers.get(index) {
            if existing.bytes() == bytes {
                return Ok(existing.device_ptr());
            }
        }
        let buffer = driver.alloc_zeroed(bytes)?;
        let ptr = buffer.device_ptr();
        if index < buffers.len() {
            buffers[index] = buffer;
        } else {
            buffers.push(buffer);
        }
        Ok(ptr)
    }

    fn address(&self, slot: Slot) -> BackendResult<CUdeviceptr> {
        let missing = || BackendError::execution(format!("no device buffer for {slot:?}"));
        match slot {
            Slot::Parameter(index) => self.inputs.get(index).map(|b| b.device_ptr()).ok_or_else(missing),
            Slot::Result(index) => self.outputs.get(index).map(|b| b.device_ptr()).ok_or_else(missing),
            Slot::Constant(index) => self
                .constants
                .get(index)
                .map(|b| b.device_ptr())
                .ok_or_else(missing),
            Slot::Pool(offset) => Ok(self.pool.device_ptr() + offset as u64),
        }
    }

    fn run_step(&self, step: &Step, backend: &dyn Backend) -> BackendResult<()> {
        match &step.launch {
            Launch::Elementwise {
                handle,
                element_count,
                inputs,
                output,
            } => {
                let kernel = self
                    .kernels
                    .get(handle)
                    .ok_or_else(|| BackendError::execution(format!("kernel {handle} not loaded")))?;
                let mut args = inputs
                    .iter()
                    .map(|slot| self.address(*slot))
                    .collect::<BackendResult<Vec<CUdeviceptr>>>()?;
                args.push(self.address(*output)?);
                let mut params: Vec<*mut c_void> = args
                    .iter_mut()
                    .map(|arg| arg as *mut CUdeviceptr as *mut c_void)
                    .collect();
                let block = self.function.options.block_size;
                let grid = element_count.div_ceil(block as usize) as u32;
                self.driver
                    .launch_kernel(kernel, (grid, 1, 1), (block, 1, 1), &mut params)
            }
            Launch::Copy { src, dst, bytes } => {
                self.driver
                    .copy_device_to_device(self.address(*dst)?, self.address(*src)?, *bytes)
            }
            Launch::Custom { op, inputs, outputs } => {
                let mut host_inputs = Vec::with_capacity(inputs.len());
                for (slot, spec) in inputs {
                    let mut tensor = Tensor::from_spec(spec);
                    self.driver.download_into(self.address(*slot)?, tensor.as_bytes_mut())?;
                    host_inputs.push(tensor);
                }
                let mut host_outputs: Vec<Tensor> =
                    outputs.iter().map(|(_, spec)| Tensor::from_spec(spec)).collect();
                {
                    let ins: Vec<&Tensor> = host_inputs.iter().collect();
                    let mut outs: Vec<&mut Tensor> = host_outputs.iter_mut().collect();
                    dispatch_custom(op.as_ref(), &step.name, backend, &mut outs, &ins)?;
                }
                for ((slot, _), tensor) in outputs.iter().zip(&host_outputs) {
                    self.driver.upload(self.address(*slot)?, tensor.as_bytes())?;
                }
                Ok(())
            }
        }
    }
}

impl CallFrame for GpuCallFrame {
    fn call(
        &mut self,
        backend: &dyn Backend,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        for (index, input) in inputs.iter().enumerate() {
            let ptr = Self::stage(&self.driver, &mut self.inputs, index, input.byte_len())?;
            self.driver.upload(ptr, input.as_bytes())?;
        }
        for (index, output) in outputs.iter().enumerate() {
            Self::stage(&self.driver, &mut self.outputs, index, output.byte_len())?;
        }

        let function = Arc::clone(&self.function);
        for (index, step) in function.steps.iter().enumerate() {
            match &function.timers {
                Some(timers) => timers.time(index, || {
                    self.run_step(step, backend)?;
                    self.driver.synchronize()
                })?,
                None => self.run_step(step, backend)?,
            }
        }
        for (src, result, bytes) in &function.result_copies {
            let dst = self.address(Slot::Result(*result))?;
            self.driver.copy_device_to_device(dst, self.address(*src)?, *bytes)?;
        }
        self.driver.synchronize()?;

        for (index, output) in outputs.iter_mut().enumerate() {
            let src = self.address(Slot::Result(index))?;
            self.driver.download_into(src, output.as_bytes_mut())?;
        }
        Ok(())
    }
}
