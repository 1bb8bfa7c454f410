//! Binding caller buffers to a loaded module, and the custom-op trampoline.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use graphrt::backend::CallFrame;
use graphrt::op::dispatch_custom;
use graphrt::tensor::AlignedBuffer;
use graphrt::{Backend, BackendError, BackendResult, ExternalBuffer, Tensor, TensorSpec};

use crate::codegen::CustomNode;
use crate::module::CompiledModule;

type CustomFn =
    unsafe extern "C" fn(*mut c_void, u32, *const *mut c_void, *const *mut c_void) -> i32;

/// Mirrors `graphrt_ctx` in the generated prelude.
#[repr(C)]
pub(crate) struct CallContext {
    user: *mut c_void,
    invoke_custom: CustomFn,
    pool: *mut u8,
}

const CUSTOM_FAILED: i32 = 1;
const CUSTOM_PANICKED: i32 = 2;

/// State the trampoline reaches through `ctx->user` during one call.
struct CustomDispatch<'a> {
    backend: &'a dyn Backend,
    nodes: &'a [CustomNode],
    error: Option<BackendError>,
}

impl CustomDispatch<'_> {
    /// # Safety
    ///
    /// `ptrs` must hold one valid pointer per spec, each covering the spec's bytes.
    unsafe fn bind(specs: &[TensorSpec], ptrs: *const *mut c_void) -> BackendResult<Vec<Tensor>> {
        specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let ptr = *ptrs.add(index) as *mut u8;
                let buffer = ExternalBuffer::new(ptr, spec.byte_len()).ok_or_else(|| {
                    BackendError::execution(format!("null buffer for custom operand {index}"))
                })?;
                Tensor::from_external(spec.dtype, spec.shape.clone(), buffer)
            })
            .collect()
    }

    unsafe fn run(
        &self,
        node: usize,
        inputs: *const *mut c_void,
        outputs: *const *mut c_void,
    ) -> BackendResult<()> {
        let custom = self
            .nodes
            .get(node)
            .ok_or_else(|| BackendError::execution(format!("unknown custom node index {node}")))?;
        let inputs = Self::bind(&custom.inputs, inputs)?;
        let mut outputs = Self::bind(&custom.outputs, outputs)?;
        let input_refs: Vec<&Tensor> = inputs.iter().collect();
        let mut output_refs: Vec<&mut Tensor> = outputs.iter_mut().collect();
        dispatch_custom(
            custom.op.as_ref(),
            &custom.name,
            self.backend,
            &mut output_refs,
            &input_refs,
        )
    }
}

unsafe extern "C" fn invoke_custom(
    user: *mut c_void,
    node: u32,
    inputs: *const *mut c_void,
    outputs: *const *mut c_void,
) -> i32 {
    let dispatch = &mut *(user as *mut CustomDispatch<'_>);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        dispatch.run(node as usize, inputs, outputs)
    }));
    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            dispatch.error = Some(err);
            CUSTOM_FAILED
        }
        Err(_) => {
            let name = dispatch
                .nodes
                .get(node as usize)
                .map(|custom| custom.name.as_str())
                .unwrap_or("?");
            dispatch.error = Some(BackendError::execution(format!(
                "custom kernel for {name} panicked"
            )));
            CUSTOM_PANICKED
        }
    }
}

pub(crate) struct CpuCallFrame {
    module: Arc<CompiledModule>,
    pool: AlignedBuffer,
}

impl CpuCallFrame {
    pub(crate) fn new(module: Arc<CompiledModule>) -> Self {
        let pool = AlignedBuffer::zeroed(module.pool_size);
        CpuCallFrame { module, pool }
    }
}

impl CallFrame for CpuCallFrame {
    fn call(
        &mut self,
        backend: &dyn Backend,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        let input_ptrs: Vec<*mut c_void> = inputs
            .iter()
            .map(|tensor| tensor.as_bytes().as_ptr() as *mut c_void)
            .collect();
        let output_ptrs: Vec<*mut c_void> = outputs
            .iter_mut()
            .map(|tensor| tensor.as_bytes_mut().as_mut_ptr() as *mut c_void)
            .collect();

        let mut dispatch = CustomDispatch {
            backend,
            nodes: &self.module.custom_nodes,
            error: None,
        };
        let mut ctx = CallContext {
            user: &mut dispatch as *mut CustomDispatch<'_> as *mut c_void,
            invoke_custom,
            pool: self.pool.as_mut_ptr(),
        };
        let status = unsafe { (self.module.entry)(&mut ctx, input_ptrs.as_ptr(), output_ptrs.as_ptr()) };
        if status == 0 {
            return Ok(());
        }
        Err(dispatch.error.take().unwrap_or_else(|| {
            BackendError::execution(format!(
                "generated code for {} returned status {status}",
                self.module.name
            ))
        }))
    }
}
