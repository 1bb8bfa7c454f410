//! Runtime compilation of CUDA C to PTX through NVRTC, loaded dynamically.

use std::ffi::{c_char, CString};
use std::sync::{Arc, OnceLock};

use graphrt::{BackendError, BackendResult};
use libloading::Library;

use crate::device::load_symbol;

type NvrtcResult = i32;
type NvrtcProgram = *mut std::ffi::c_void;

const NVRTC_SUCCESS: NvrtcResult = 0;

type CreateProgramFn = unsafe extern "C" fn(
    prog: *mut NvrtcProgram,
    src: *const c_char,
    name: *const c_char,
    num_headers: i32,
    headers: *const *const c_char,
    include_names: *const *const c_char,
) -> NvrtcResult;
type CompileProgramFn =
    unsafe extern "C" fn(prog: NvrtcProgram, num_options: i32, options: *const *const c_char) -> NvrtcResult;
type GetSizeFn = unsafe extern "C" fn(prog: NvrtcProgram, size: *mut usize) -> NvrtcResult;
type GetBytesFn = unsafe extern "C" fn(prog: NvrtcProgram, out: *mut c_char) -> NvrtcResult;
type DestroyProgramFn = unsafe extern "C" fn(prog: *mut NvrtcProgram) -> NvrtcResult;

pub struct Nvrtc {
    _lib: Library,
    create_program: CreateProgramFn,
    compile_program: CompileProgramFn,
    get_ptx_size: GetSizeFn,
    get_ptx: GetBytesFn,
    get_log_size: GetSizeFn,
    get_log: GetBytesFn,
    destroy_program: DestroyProgramFn,
}

static NVRTC: OnceLock<Result<Arc<Nvrtc>, String>> = OnceLock::new();

pub fn nvrtc() -> BackendResult<Arc<Nvrtc>> {
    let init = NVRTC.get_or_init(|| match Nvrtc::new() {
        Ok(nvrtc) => Ok(Arc::new(nvrtc)),
        Err(err) => Err(err.to_string()),
    });
    match init {
        Ok(nvrtc) => Ok(Arc::clone(nvrtc)),
        Err(msg) => Err(BackendError::unavailable(crate::GPU_IDENTITY, msg.clone())),
    }
}

/// Releases the program handle on every exit path.
struct Program<'a> {
    nvrtc: &'a Nvrtc,
    handle: NvrtcProgram,
}

impl Drop for Program<'_> {
    fn drop(&mut self) {
        // SAFETY: The handle was created by nvrtcCreateProgram and is destroyed once.
        let _ = unsafe { (self.nvrtc.destroy_program)(&mut self.handle) };
    }
}

impl Nvrtc {
    fn new() -> BackendResult<Self> {
        let lib = load_nvrtc_library()?;
        Ok(Nvrtc {
            create_program: load_symbol(&lib, b"nvrtcCreateProgram\0")?,
            compile_program: load_symbol(&lib, b"nvrtcCompileProgram\0")?,
            get_ptx_size: load_symbol(&lib, b"nvrtcGetPTXSize\0")?,
            get_ptx: load_symbol(&lib, b"nvrtcGetPTX\0")?,
            get_log_size: load_symbol(&lib, b"nvrtcGetProgramLogSize\0")?,
            get_log: load_symbol(&lib, b"nvrtcGetProgramLog\0")?,
            destroy_program: load_symbol(&lib, b"nvrtcDestroyProgram\0")?,
            _lib: lib,
        })
    }

    /// Compiles `source` for the virtual architecture `arch` (e.g. `compute_80`).
    pub fn compile_ptx(&self, source: &str, name: &str, arch: &str) -> BackendResult<String> {
        let c_source = CString::new(source)
            .map_err(|_| BackendError::execution("kernel source contains NUL byte"))?;
        let c_name = CString::new(name)
            .map_err(|_| BackendError::execution("kernel name contains NUL byte"))?;
        let options = [format!("--gpu-architecture={arch}"), "--std=c++11".to_string()]
            .into_iter()
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| BackendError::execution("NVRTC option contains NUL byte"))?;
        let option_ptrs: Vec<*const c_char> = options.iter().map(|opt| opt.as_ptr()).collect();

        let mut program = Program {
            nvrtc: self,
            handle: std::ptr::null_mut(),
        };
        // SAFETY: All pointers reference live NUL-terminated strings for the duration of each call.
        unsafe {
            check_nvrtc(
                (self.create_program)(
                    &mut program.handle,
                    c_source.as_ptr(),
                    c_name.as_ptr(),
                    0,
                    std::ptr::null(),
                    std::ptr::null(),
                ),
                "nvrtcCreateProgram",
            )?;
            let status = (self.compile_program)(
                program.handle,
                option_ptrs.len() as i32,
                option_ptrs.as_ptr(),
            );
            if status != NVRTC_SUCCESS {
                let log = self.read_string(&program, self.get_log_size, self.get_log)?;
                return Err(BackendError::execution(format!(
                    "NVRTC failed to compile {name} (code {status}): {log}"
                )));
            }
            self.read_string(&program, self.get_ptx_size, self.get_ptx)
        }
    }

    unsafe fn read_string(
        &self,
        program: &Program<'_>,
        size_fn: GetSizeFn,
        bytes_fn: GetBytesFn,
    ) -> BackendResult<String> {
        let mut size = 0usize;
        check_nvrtc(size_fn(program.handle, &mut size), "nvrtcGetSize")?;
        let mut buffer = vec![0u8; size.max(1)];
        check_nvrtc(
            bytes_fn(program.handle, buffer.as_mut_ptr() as *mut c_char),
            "nvrtcGetBytes",
        )?;
        if let Some(end) = buffer.iter().position(|b| *b == 0) {
            buffer.truncate(end);
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn load_nvrtc_library() -> BackendResult<Library> {
    let candidates = [
        "libnvrtc.so",
        "libnvrtc.so.12",
        "libnvrtc.so.11.2",
        "nvrtc64_120_0.dll",
        "nvrtc64_112_0.dll",
        "libnvrtc.dylib",
    ];
    for candidate in candidates {
        // SAFETY: Only checks that the library loads; no symbols are invoked here.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            return Ok(lib);
        }
    }
    Err(BackendError::execution(format!(
        "failed to load NVRTC (tried {})",
        candidates.join(", ")
    )))
}

fn check_nvrtc(code: NvrtcResult, op: &str) -> BackendResult<()> {
    if code == NVRTC_SUCCESS {
        Ok(())
    } else {
        Err(BackendError::execution(format!(
            "NVRTC call {op} failed with code {code}"
        )))
    }
}
