//! CUDA driver API, loaded at runtime so the crate builds without a toolkit.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use graphrt::{BackendError, BackendResult};
use libloading::Library;

type CUresult = i32;
type CUdevice = i32;
type CUcontext = *mut c_void;
pub(crate) type CUdeviceptr = u64;
type CUmodule = *mut c_void;
type CUfunction = *mut c_void;
type CUstream = *mut c_void;

const CUDA_SUCCESS: CUresult = 0;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: i32 = 75;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: i32 = 76;

type CuInitFn = unsafe extern "C" fn(flags: u32) -> CUresult;
type CuDeviceGetFn = unsafe extern "C" fn(device: *mut CUdevice, ordinal: i32) -> CUresult;
type CuDeviceGetAttributeFn =
    unsafe extern "C" fn(value: *mut i32, attribute: i32, dev: CUdevice) -> CUresult;
type CuCtxCreateV2Fn =
    unsafe extern "C" fn(ctx: *mut CUcontext, flags: u32, dev: CUdevice) -> CUresult;
type CuCtxDestroyV2Fn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxSetCurrentFn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxSynchronizeFn = unsafe extern "C" fn() -> CUresult;
type CuMemAllocV2Fn = unsafe extern "C" fn(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;
type CuMemFreeV2Fn = unsafe extern "C" fn(dptr: CUdeviceptr) -> CUresult;
type CuMemcpyHtoDV2Fn = unsafe extern "C" fn(
    dst_device: CUdeviceptr,
    src_host: *const c_void,
    byte_count: usize,
) -> CUresult;
type CuMemcpyDtoHV2Fn = unsafe extern "C" fn(
    dst_host: *mut c_void,
    src_device: CUdeviceptr,
    byte_count: usize,
) -> CUresult;
type CuMemcpyDtoDV2Fn = unsafe extern "C" fn(
    dst_device: CUdeviceptr,
    src_device: CUdeviceptr,
    byte_count: usize,
) -> CUresult;
type CuMemsetD8V2Fn =
    unsafe extern "C" fn(dst_device: CUdeviceptr, value: u8, count: usize) -> CUresult;
type CuModuleLoadDataExFn = unsafe extern "C" fn(
    module: *mut CUmodule,
    image: *const c_void,
    num_options: u32,
    options: *mut u32,
    option_values: *mut *mut c_void,
) -> CUresult;
type CuModuleUnloadFn = unsafe extern "C" fn(module: CUmodule) -> CUresult;
type CuModuleGetFunctionFn =
    unsafe extern "C" fn(hfunc: *mut CUfunction, hmod: CUmodule, name: *const c_char) -> CUresult;
type CuLaunchKernelFn = unsafe extern "C" fn(
    f: CUfunction,
    grid_dim_x: u32,
    grid_dim_y: u32,
    grid_dim_z: u32,
    block_dim_x: u32,
    block_dim_y: u32,
    block_dim_z: u32,
    shared_mem_bytes: u32,
    h_stream: CUstream,
    kernel_params: *mut *mut c_void,
    extra: *mut *mut c_void,
) -> CUresult;

struct DriverFns {
    cu_init: CuInitFn,
    cu_device_get: CuDeviceGetFn,
    cu_device_get_attribute: CuDeviceGetAttributeFn,
    cu_ctx_create_v2: CuCtxCreateV2Fn,
    cu_ctx_destroy_v2: CuCtxDestroyV2Fn,
    cu_ctx_set_current: CuCtxSetCurrentFn,
    cu_ctx_synchronize: CuCtxSynchronizeFn,
    cu_mem_alloc_v2: CuMemAllocV2Fn,
    cu_mem_free_v2: CuMemFreeV2Fn,
    cu_memcpy_hto_d_v2: CuMemcpyHtoDV2Fn,
    cu_memcpy_dto_h_v2: CuMemcpyDtoHV2Fn,
    cu_memcpy_dto_d_v2: CuMemcpyDtoDV2Fn,
    cu_memset_d8_v2: CuMemsetD8V2Fn,
    cu_module_load_data_ex: CuModuleLoadDataExFn,
    cu_module_unload: CuModuleUnloadFn,
    cu_module_get_function: CuModuleGetFunctionFn,
    cu_launch_kernel: CuLaunchKernelFn,
}

/// One CUDA context on one device.
pub struct CudaDriver {
    _lib: Library,
    fns: DriverFns,
    ordinal: i32,
    compute_capability: (i32, i32),
    // Stored as usize so the driver can be shared across threads.
    ctx: usize,
}

impl Drop for CudaDriver {
    fn drop(&mut self) {
        if self.ctx != 0 {
            // SAFETY: Context is owned by this driver instance and destroyed once on drop.
            let _ = unsafe { (self.fns.cu_ctx_destroy_v2)(self.ctx_ptr()) };
            self.ctx = 0;
        }
    }
}

impl fmt::Debug for CudaDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaDriver")
            .field("ordinal", &self.ordinal)
            .field("compute_capability", &self.compute_capability)
            .finish()
    }
}

/// Device allocation released on drop. Zero-byte buffers still own a one-byte
/// allocation so every slot has a valid address.
pub struct DeviceBuffer {
    driver: Arc<CudaDriver>,
    ptr: CUdeviceptr,
    bytes: usize,
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl DeviceBuffer {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn device_ptr(&self) -> CUdeviceptr {
        self.ptr
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // SAFETY: Device pointer was allocated by this driver and is released once on drop.
        let _ = unsafe { (self.driver.fns.cu_mem_free_v2)(self.ptr) };
    }
}

#[derive(Clone)]
pub struct CudaFunction {
    _module: Arc<CudaModule>,
    func: usize,
}

pub struct CudaModule {
    driver: Arc<CudaDriver>,
    module: usize,
}

impl Drop for CudaModule {
    fn drop(&mut self) {
        if self.module != 0 {
            // SAFETY: Module belongs to this driver and is unloaded once.
            let _ = unsafe { (self.driver.fns.cu_module_unload)(self.module_ptr()) };
            self.module = 0;
        }
    }
}

type DriverSlot = Result<Arc<CudaDriver>, String>;

static CUDA_DRIVERS: OnceLock<Mutex<HashMap<i32, DriverSlot>>> = OnceLock::new();

pub fn is_available(ordinal: i32) -> bool {
    driver(ordinal).is_ok()
}

/// The process-wide context for `ordinal`, created on first use. A failed
/// initialisation is remembered and reported on every later request.
pub fn driver(ordinal: i32) -> BackendResult<Arc<CudaDriver>> {
    let drivers = CUDA_DRIVERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut drivers = drivers
        .lock()
        .map_err(|_| BackendError::execution("CUDA driver table mutex poisoned"))?;
    let slot = drivers.entry(ordinal).or_insert_with(|| {
        CudaDriver::new(ordinal)
            .map(Arc::new)
            .map_err(|err| err.to_string())
    });
    match slot {
        Ok(driver) => Ok(Arc::clone(driver)),
        Err(msg) => Err(BackendError::unavailable(
            crate::GPU_IDENTITY,
            format!("CUDA device {ordinal}: {msg}"),
        )),
    }
}

impl CudaDriver {
    fn new(ordinal: i32) -> BackendResult<Self> {
        let lib = load_cuda_library()?;
        let fns = DriverFns {
            cu_init: load_symbol(&lib, b"cuInit\0")?,
            cu_device_get: load_symbol(&lib, b"cuDeviceGet\0")?,
            cu_device_get_attribute: load_symbol(&lib, b"cuDeviceGetAttribute\0")?,
            cu_ctx_create_v2: load_symbol(&lib, b"cuCtxCreate_v2\0")?,
            cu_ctx_destroy_v2: load_symbol(&lib, b"cuCtxDestroy_v2\0")?,
            cu_ctx_set_current: load_symbol(&lib, b"cuCtxSetCurrent\0")?,
            cu_ctx_synchronize: load_symbol(&lib, b"cuCtxSynchronize\0")?,
            cu_mem_alloc_v2: load_symbol(&lib, b"cuMemAlloc_v2\0")?,
            cu_mem_free_v2: load_symbol(&lib, b"cuMemFree_v2\0")?,
            cu_memcpy_hto_d_v2: load_symbol(&lib, b"cuMemcpyHtoD_v2\0")?,
            cu_memcpy_dto_h_v2: load_symbol(&lib, b"cuMemcpyDtoH_v2\0")?,
            cu_memcpy_dto_d_v2: load_symbol(&lib, b"cuMemcpyDtoD_v2\0")?,
            cu_memset_d8_v2: load_symbol(&lib, b"cuMemsetD8_v2\0")?,
            cu_module_load_data_ex: load_symbol(&lib, b"cuModuleLoadDataEx\0")?,
            cu_module_unload: load_symbol(&lib, b"cuModuleUnload\0")?,
            cu_module_get_function: load_symbol(&lib, b"cuModuleGetFunction\0")?,
            cu_launch_kernel: load_symbol(&lib, b"cuLaunchKernel\0")?,
        };

        // SAFETY: Calls are made with valid pointers and follow CUDA driver API contract.
        unsafe {
            check_cuda((fns.cu_init)(0), "cuInit")?;
            let mut dev: CUdevice = 0;
            check_cuda(
                (fns.cu_device_get)(&mut dev as *mut CUdevice, ordinal),
                "cuDeviceGet",
            )?;
            let mut major = 0i32;
            let mut minor = 0i32;
            check_cuda(
                (fns.cu_device_get_attribute)(
                    &mut major,
                    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
                    dev,
                ),
                "cuDeviceGetAttribute",
            )?;
            check_cuda(
                (fns.cu_device_get_attribute)(
                    &mut minor,
                    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
                    dev,
                ),
                "cuDeviceGetAttribute",
            )?;
            let mut ctx: CUcontext = std::ptr::null_mut();
            check_cuda(
                (fns.cu_ctx_create_v2)(&mut ctx as *mut CUcontext, 0, dev),
                "cuCtxCreate_v2",
            )?;
            check_cuda((fns.cu_ctx_set_current)(ctx), "cuCtxSetCurrent")?;
            tracing::debug!(ordinal, major, minor, "CUDA context created");
            Ok(Self {
                _lib: lib,
                fns,
                ordinal,
                compute_capability: (major, minor),
                ctx: ctx as usize,
            })
        }
    }

    pub fn compute_capability(&self) -> (i32, i32) {
        self.compute_capability
    }

    pub fn alloc_and_upload(self: &Arc<Self>, bytes: &[u8]) -> BackendResult<Arc<DeviceBuffer>> {
        let buffer = self.alloc(bytes.len())?;
        self.upload(buffer.ptr, bytes)?;
        Ok(buffer)
    }

    pub fn alloc_zeroed(self: &Arc<Self>, bytes: usize) -> BackendResult<Arc<DeviceBuffer>> {
        let buffer = self.alloc(bytes)?;
        if bytes != 0 {
            self.ensure_current()?;
            // SAFETY: Destination is a valid allocated device pointer; memset count is bounded by allocation size.
            unsafe {
                check_cuda(
                    (self.fns.cu_memset_d8_v2)(buffer.ptr, 0, bytes),
                    "cuMemsetD8_v2",
                )?;
            }
        }
        Ok(buffer)
    }

    pub fn upload(&self, dst: CUdeviceptr, bytes: &[u8]) -> BackendResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.ensure_current()?;
        // SAFETY: Destination is a valid allocated device pointer and source host slice is valid.
        unsafe {
            check_cuda(
                (self.fns.cu_memcpy_hto_d_v2)(dst, bytes.as_ptr() as *const c_void, bytes.len()),
                "cuMemcpyHtoD_v2",
            )
        }
    }

    /// Fills `out` from device memory at `src`.
    pub fn download_into(&self, src: CUdeviceptr, out: &mut [u8]) -> BackendResult<()> {
        if out.is_empty() {
            return Ok(());
        }
        self.ensure_current()?;
        // SAFETY: Source device pointer is valid for `out.len()`; destination host buffer is valid and writable.
        unsafe {
            check_cuda(
                (self.fns.cu_memcpy_dto_h_v2)(out.as_mut_ptr() as *mut c_void, src, out.len()),
                "cuMemcpyDtoH_v2",
            )
        }
    }

    pub fn copy_device_to_device(
        &self,
        dst: CUdeviceptr,
        src: CUdeviceptr,
        bytes: usize,
    ) -> BackendResult<()> {
        if bytes == 0 || dst == src {
            return Ok(());
        }
        self.ensure_current()?;
        // SAFETY: src/dst pointers are valid CUDA allocations and byte range is provided by caller.
        unsafe {
            check_cuda(
                (self.fns.cu_memcpy_dto_d_v2)(dst, src, bytes),
                "cuMemcpyDtoD_v2",
            )?;
        }
        Ok(())
    }

    fn alloc(self: &Arc<Self>, bytes: usize) -> BackendResult<Arc<DeviceBuffer>> {
        self.ensure_current()?;
        let mut ptr: CUdeviceptr = 0;
        // SAFETY: `ptr` is a valid out pointer for CUDA allocation.
        unsafe {
            check_cuda(
                (self.fns.cu_mem_alloc_v2)(&mut ptr as *mut CUdeviceptr, bytes.max(1)),
                "cuMemAlloc_v2",
            )?;
        }
        Ok(Arc::new(DeviceBuffer {
            driver: Arc::clone(self),
            ptr,
            bytes,
        }))
    }

    pub fn load_ptx_module(self: &Arc<Self>, ptx: &str) -> BackendResult<Arc<CudaModule>> {
        self.ensure_current()?;
        let c_ptx = CString::new(ptx)
            .map_err(|_| BackendError::execution("ptx source contains NUL byte"))?;
        let mut module: CUmodule = std::ptr::null_mut();
        // SAFETY: pointer arguments are valid for cuModuleLoadDataEx.
        unsafe {
            check_cuda(
                (self.fns.cu_module_load_data_ex)(
                    &mut module as *mut CUmodule,
                    c_ptx.as_ptr() as *const c_void,
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                ),
                "cuModuleLoadDataEx",
            )?;
        }
        Ok(Arc::new(CudaModule {
            driver: Arc::clone(self),
            module: module as usize,
        }))
    }

    pub fn get_function(
        &self,
        module: &Arc<CudaModule>,
        symbol: &str,
    ) -> BackendResult<CudaFunction> {
        self.ensure_current()?;
        let c_symbol = CString::new(symbol)
            .map_err(|_| BackendError::execution("kernel symbol contains NUL byte"))?;
        let mut function: CUfunction = std::ptr::null_mut();
        // SAFETY: module and output pointers are valid.
        unsafe {
            check_cuda(
                (self.fns.cu_module_get_function)(
                    &mut function as *mut CUfunction,
                    module.module_ptr(),
                    c_symbol.as_ptr(),
                ),
                "cuModuleGetFunction",
            )?;
        }

        Ok(CudaFunction {
            _module: Arc::clone(module),
            func: function as usize,
        })
    }

    pub fn launch_kernel(
        &self,
        function: &CudaFunction,
        grid: (u32, u32, u32),
        block: (u32, u32, u32),
        params: &mut [*mut c_void],
    ) -> BackendResult<()> {
        self.ensure_current()?;
        // SAFETY: function and parameter pointers are valid for kernel launch.
        unsafe {
            check_cuda(
                (self.fns.cu_launch_kernel)(
                    function.func_ptr(),
                    grid.0,
                    grid.1,
                    grid.2,
                    block.0,
                    block.1,
                    block.2,
                    0,
                    std::ptr::null_mut(),
                    params.as_mut_ptr(),
                    std::ptr::null_mut(),
                ),
                "cuLaunchKernel",
            )?;
        }
        Ok(())
    }

    /// Blocks until all work queued on this context has finished.
    pub fn synchronize(&self) -> BackendResult<()> {
        self.ensure_current()?;
        // SAFETY: The context is current on this thread.
        unsafe { check_cuda((self.fns.cu_ctx_synchronize)(), "cuCtxSynchronize") }
    }

    pub fn ensure_current(&self) -> BackendResult<()> {
        // SAFETY: Context was created by this driver and remains valid until drop.
        unsafe {
            check_cuda(
                (self.fns.cu_ctx_set_current)(self.ctx_ptr()),
                "cuCtxSetCurrent",
            )
        }
    }

    fn ctx_ptr(&self) -> CUcontext {
        self.ctx as CUcontext
    }
}

impl CudaFunction {
    fn func_ptr(&self) -> CUfunction {
        self.func as CUfunction
    }
}

impl CudaModule {
    fn module_ptr(&self) -> CUmodule {
        self.module as CUmodule
    }
}

fn load_cuda_library() -> BackendResult<Library> {
    let candidates = ["libcuda.so.1", "libcuda.so", "nvcuda.dll", "libcuda.dylib"];

    for candidate in candidates {
        // SAFETY: Only checks that the library loads; no symbols are invoked here.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            return Ok(lib);
        }
    }

    Err(BackendError::execution(
        "failed to load CUDA driver library (tried libcuda.so.1, libcuda.so, nvcuda.dll, libcuda.dylib)",
    ))
}

pub(crate) fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> BackendResult<T> {
    // SAFETY: Caller provides expected symbol type from the library's C API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        BackendError::execution(format!(
            "failed to resolve symbol {}: {err}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        ))
    })?;
    Ok(*sym)
}

fn check_cuda(code: CUresult, op: &str) -> BackendResult<()> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(BackendError::execution(format!(
            "CUDA driver call {op} failed with code {code}"
        )))
    }
}
