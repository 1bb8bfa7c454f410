//! Dynamic backend plugins.
//!
//! A plugin is a shared library exporting three C entry points: a version
//! accessor, a factory taking a configuration string and returning an owned
//! backend handle, and a destructor for that handle. [`export_backend_plugin!`]
//! generates all three; [`BackendPlugin::load`] consumes them.
//!
//! The handle is a boxed `Arc<dyn Backend>`, so host and plugin must be built
//! against the same core version with the same compiler. The version check
//! catches the former.
//!
//! [`export_backend_plugin!`]: crate::export_backend_plugin

use std::ffi::{c_char, c_void, CStr, CString, OsStr};
use std::panic::AssertUnwindSafe;
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::Library;

use super::{register_backend, Backend, BackendKind, PerformanceCounter};
use crate::error::{BackendError, BackendResult};
use crate::graph::Function;
use crate::tensor::{DType, ExternalBuffer, Shape, Tensor};

pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
#[doc(hidden)]
pub const CORE_VERSION_CSTR: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

pub const VERSION_SYMBOL: &[u8] = b"graphrt_backend_version\0";
pub const FACTORY_SYMBOL: &[u8] = b"graphrt_new_backend\0";
pub const DESTRUCTOR_SYMBOL: &[u8] = b"graphrt_delete_backend\0";

pub type VersionFn = unsafe extern "C" fn() -> *const c_char;
pub type FactoryFn = unsafe extern "C" fn(configuration: *const c_char) -> *mut c_void;
pub type DestructorFn = unsafe extern "C" fn(backend: *mut c_void);

#[derive(Clone, Copy)]
pub struct PluginEntryPoints {
    pub version: VersionFn,
    pub factory: FactoryFn,
    pub destructor: DestructorFn,
}

pub struct BackendPlugin {
    // Keeps the entry points mapped; dropped after every PluginBackend.
    _library: Option<Library>,
    entry: PluginEntryPoints,
    version: String,
}

impl BackendPlugin {
    /// Loads a plugin library and checks its version against this crate's.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initialisers, and the exported symbols are
    /// trusted to have the documented signatures.
    pub unsafe fn load(path: impl AsRef<OsStr>) -> BackendResult<Arc<Self>> {
        let path = path.as_ref();
        let library = Library::new(path).map_err(|err| {
            BackendError::Plugin(format!("failed to load {}: {err}", path.to_string_lossy()))
        })?;
        let entry = PluginEntryPoints {
            version: load_symbol(&library, VERSION_SYMBOL)?,
            factory: load_symbol(&library, FACTORY_SYMBOL)?,
            destructor: load_symbol(&library, DESTRUCTOR_SYMBOL)?,
        };
        Self::with_entry_points(Some(library), entry)
    }

    /// Wraps entry points that are already linked into the process.
    ///
    /// # Safety
    ///
    /// The entry points must honour the plugin contract.
    pub unsafe fn from_entry_points(entry: PluginEntryPoints) -> BackendResult<Arc<Self>> {
        Self::with_entry_points(None, entry)
    }

    unsafe fn with_entry_points(
        library: Option<Library>,
        entry: PluginEntryPoints,
    ) -> BackendResult<Arc<Self>> {
        let raw = (entry.version)();
        if raw.is_null() {
            return Err(BackendError::Plugin("plugin reported no version".into()));
        }
        let version = CStr::from_ptr(raw).to_string_lossy().into_owned();
        if version != CORE_VERSION {
            return Err(BackendError::Plugin(format!(
                "plugin built against version {version}, host is {CORE_VERSION}"
            )));
        }
        Ok(Arc::new(BackendPlugin {
            _library: library,
            entry,
            version,
        }))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Calls the plugin factory. The returned backend owns the handle and
    /// releases it through the plugin destructor.
    pub fn create(self: &Arc<Self>, configuration: &str) -> BackendResult<PluginBackend> {
        let config = CString::new(configuration).map_err(|_| {
            BackendError::Config("configuration string contains a NUL byte".into())
        })?;
        // SAFETY: entry points were validated at load time; `config` outlives the call.
        let raw = unsafe { (self.entry.factory)(config.as_ptr()) };
        let raw = NonNull::new(raw.cast::<Arc<dyn Backend>>()).ok_or_else(|| {
            BackendError::Plugin(format!(
                "plugin factory rejected configuration {configuration:?}"
            ))
        })?;
        Ok(PluginBackend {
            plugin: Arc::clone(self),
            raw,
        })
    }
}

/// Registers a loaded plugin under `identity`.
pub fn register_plugin(identity: impl Into<String>, plugin: Arc<BackendPlugin>) {
    register_backend(identity, move |configuration| {
        Ok(Arc::new(plugin.create(configuration)?) as Arc<dyn Backend>)
    });
}

/// A backend owned by a plugin.
pub struct PluginBackend {
    plugin: Arc<BackendPlugin>,
    raw: NonNull<Arc<dyn Backend>>,
}

// SAFETY: the pointee is an `Arc<dyn Backend>`, which is Send + Sync.
unsafe impl Send for PluginBackend {}
// SAFETY: as above.
unsafe impl Sync for PluginBackend {}

impl PluginBackend {
    fn inner(&self) -> &dyn Backend {
        // SAFETY: `raw` came from the plugin factory and stays valid until drop.
        unsafe { self.raw.as_ref().as_ref() }
    }
}

impl Drop for PluginBackend {
    fn drop(&mut self) {
        // SAFETY: the handle was produced by this plugin's factory and is released once.
        unsafe { (self.plugin.entry.destructor)(self.raw.as_ptr().cast()) };
    }
}

impl Backend for PluginBackend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn create_tensor(&self, dtype: DType, shape: Shape) -> Tensor {
        self.inner().create_tensor(dtype, shape)
    }

    fn create_tensor_with_buffer(
        &self,
        dtype: DType,
        shape: Shape,
        buffer: ExternalBuffer,
    ) -> BackendResult<Tensor> {
        self.inner().create_tensor_with_buffer(dtype, shape, buffer)
    }

    fn compile(&self, function: &Function) -> BackendResult<()> {
        self.inner().compile(function)
    }

    fn call(
        &self,
        function: &Function,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        self.inner().call(function, outputs, inputs)
    }

    fn remove_compiled_function(&self, function: &Function) {
        self.inner().remove_compiled_function(function)
    }

    fn enable_performance_data(&self, function: &Function, enable: bool) -> BackendResult<()> {
        self.inner().enable_performance_data(function, enable)
    }

    fn get_performance_data(&self, function: &Function) -> Vec<PerformanceCounter> {
        self.inner().get_performance_data(function)
    }
}

/// Generates the three plugin entry points around a backend factory of type
/// `Fn(&str) -> BackendResult<Arc<dyn Backend>>`.
#[macro_export]
macro_rules! export_backend_plugin {
    ($factory:expr) => {
        #[no_mangle]
        pub extern "C" fn graphrt_backend_version() -> *const ::std::ffi::c_char {
            $crate::backend::plugin::CORE_VERSION_CSTR.as_ptr().cast()
        }

        #[no_mangle]
        pub unsafe extern "C" fn graphrt_new_backend(
            configuration: *const ::std::ffi::c_char,
        ) -> *mut ::std::ffi::c_void {
            $crate::backend::plugin::new_backend_raw(configuration, $factory)
        }

        #[no_mangle]
        pub unsafe extern "C" fn graphrt_delete_backend(backend: *mut ::std::ffi::c_void) {
            $crate::backend::plugin::delete_backend_raw(backend)
        }
    };
}

#[doc(hidden)]
/// # Safety
///
/// `configuration` must be null or a valid NUL-terminated string.
pub unsafe fn new_backend_raw<F>(configuration: *const c_char, factory: F) -> *mut c_void
where
    F: FnOnce(&str) -> BackendResult<Arc<dyn Backend>>,
{
    let config = if configuration.is_null() {
        String::new()
    } else {
        CStr::from_ptr(configuration).to_string_lossy().into_owned()
    };
    match std::panic::catch_unwind(AssertUnwindSafe(|| factory(&config))) {
        Ok(Ok(backend)) => Box::into_raw(Box::new(backend)).cast(),
        Ok(Err(err)) => {
            tracing::warn!(%err, configuration = %config, "plugin backend factory failed");
            std::ptr::null_mut()
        }
        Err(_) => {
            tracing::warn!(configuration = %config, "plugin backend factory panicked");
            std::ptr::null_mut()
        }
    }
}

#[doc(hidden)]
/// # Safety
///
/// `backend` must be null or a handle returned by [`new_backend_raw`].
pub unsafe fn delete_backend_raw(backend: *mut c_void) {
    if !backend.is_null() {
        drop(Box::from_raw(backend.cast::<Arc<dyn Backend>>()));
    }
}

fn load_symbol<T: Copy>(library: &Library, name: &'static [u8]) -> BackendResult<T> {
    // SAFETY: caller provides the documented signature for each plugin symbol.
    let symbol = unsafe { library.get::<T>(name) }.map_err(|err| {
        BackendError::Plugin(format!(
            "missing plugin symbol {}: {err}",
            String::from_utf8_lossy(&name[..name.len() - 1])
        ))
    })?;
    Ok(*symbol)
}
