//! A compiled and loaded translation unit.

use std::ffi::{c_char, c_void, CStr};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graphrt::backend::{CallFrame, DebugTimers, ExternalFunction};
use graphrt::{BackendError, BackendResult};
use libloading::{Library, Symbol};

use crate::codegen::{
    CustomNode, ENTRY_SYMBOL, TIMER_CALL_COUNT_SYMBOL, TIMER_COUNT_SYMBOL,
    TIMER_MICROSECONDS_SYMBOL, TIMER_NAME_SYMBOL,
};
use crate::frame::{CallContext, CpuCallFrame};

pub(crate) type EntryFn =
    unsafe extern "C" fn(*mut CallContext, *const *mut c_void, *const *mut c_void) -> i32;
type TimerCountFn = unsafe extern "C" fn() -> usize;
type TimerNameFn = unsafe extern "C" fn(usize) -> *const c_char;
type TimerValueFn = unsafe extern "C" fn(usize) -> u64;

pub struct CompiledModule {
    pub(crate) name: String,
    pub(crate) entry: EntryFn,
    pub(crate) custom_nodes: Vec<CustomNode>,
    pub(crate) pool_size: usize,
    library: Option<Library>,
    /// Files removed on drop; only instrumented builds own theirs.
    owned_artifacts: Vec<PathBuf>,
}

impl CompiledModule {
    pub(crate) fn load(
        name: String,
        path: &Path,
        custom_nodes: Vec<CustomNode>,
        pool_size: usize,
    ) -> BackendResult<Self> {
        let library = unsafe { Library::new(path) }
            .map_err(|err| BackendError::execution(format!("cannot load {}: {err}", path.display())))?;
        let entry = unsafe { library.get::<EntryFn>(ENTRY_SYMBOL).map(|symbol| *symbol) }
            .map_err(|err| BackendError::execution(format!("{} has no entry point: {err}", path.display())))?;
        Ok(CompiledModule {
            name,
            entry,
            custom_nodes,
            pool_size,
            library: Some(library),
            owned_artifacts: Vec::new(),
        })
    }

    pub(crate) fn owning_artifacts(mut self, paths: Vec<PathBuf>) -> Self {
        self.owned_artifacts = paths;
        self
    }
}

impl Drop for CompiledModule {
    fn drop(&mut self) {
        // Unload before unlinking.
        self.library.take();
        for path in &self.owned_artifacts {
            if let Err(err) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), %err, "cannot remove instrumented artifact");
            }
        }
    }
}

impl ExternalFunction for CompiledModule {
    fn make_call_frame(self: Arc<Self>) -> BackendResult<Box<dyn CallFrame>> {
        Ok(Box::new(CpuCallFrame::new(self)))
    }

    /// Resolves the four timer accessors by name. A library built without
    /// instrumentation lacks them, which reads as "no timers".
    fn debug_timers(&self) -> Option<Box<dyn DebugTimers + '_>> {
        let library = self.library.as_ref()?;
        let timers = unsafe {
            NativeTimers {
                count: library.get(TIMER_COUNT_SYMBOL).ok()?,
                name: library.get(TIMER_NAME_SYMBOL).ok()?,
                microseconds: library.get(TIMER_MICROSECONDS_SYMBOL).ok()?,
                call_count: library.get(TIMER_CALL_COUNT_SYMBOL).ok()?,
            }
        };
        Some(Box::new(timers))
    }
}

struct NativeTimers<'lib> {
    count: Symbol<'lib, TimerCountFn>,
    name: Symbol<'lib, TimerNameFn>,
    microseconds: Symbol<'lib, TimerValueFn>,
    call_count: Symbol<'lib, TimerValueFn>,
}

impl DebugTimers for NativeTimers<'_> {
    fn count(&self) -> usize {
        unsafe { (self.count)() }
    }

    fn name(&self, index: usize) -> Option<String> {
        let ptr = unsafe { (self.name)(index) };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    fn microseconds(&self, index: usize) -> u64 {
        unsafe { (self.microseconds)(index) }
    }

    fn call_count(&self, index: usize) -> u64 {
        unsafe { (self.call_count)(index) }
    }
}
