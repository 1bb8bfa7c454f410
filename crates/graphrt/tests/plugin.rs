mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::counting_backend;
use graphrt::backend::plugin::{register_plugin, BackendPlugin, PluginEntryPoints, CORE_VERSION};
use graphrt::{Backend, BackendError, BackendKind, BackendResult, DType, FunctionBuilder, Tensor};

static LIVE_BACKENDS: AtomicUsize = AtomicUsize::new(0);

struct Tracked(common::CountingBackend, bool);

impl Drop for Tracked {
    fn drop(&mut self) {
        if self.1 {
            LIVE_BACKENDS.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Backend for Tracked {
    fn kind(&self) -> BackendKind {
        self.0.kind()
    }

    fn compile(&self, function: &graphrt::Function) -> BackendResult<()> {
        self.0.compile(function)
    }

    fn call(
        &self,
        function: &graphrt::Function,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        self.0.call(function, outputs, inputs)
    }

    fn remove_compiled_function(&self, function: &graphrt::Function) {
        self.0.remove_compiled_function(function)
    }

    fn enable_performance_data(&self, function: &graphrt::Function, enable: bool) -> BackendResult<()> {
        self.0.enable_performance_data(function, enable)
    }

    fn get_performance_data(&self, function: &graphrt::Function) -> Vec<graphrt::PerformanceCounter> {
        self.0.get_performance_data(function)
    }
}

fn plugin_factory(configuration: &str) -> BackendResult<Arc<dyn Backend>> {
    if configuration == "reject" {
        return Err(BackendError::Config("rejected".into()));
    }
    let tracked = configuration == "tracked";
    if tracked {
        LIVE_BACKENDS.fetch_add(1, Ordering::SeqCst);
    }
    Ok(Arc::new(Tracked(
        counting_backend(BackendKind::Custom("PLUGIN".into())),
        tracked,
    )))
}

graphrt::export_backend_plugin!(plugin_factory);

fn plugin() -> Arc<BackendPlugin> {
    // SAFETY: the entry points come from export_backend_plugin! above.
    unsafe {
        BackendPlugin::from_entry_points(PluginEntryPoints {
            version: graphrt_backend_version,
            factory: graphrt_new_backend,
            destructor: graphrt_delete_backend,
        })
    }
    .expect("plugin")
}

#[test]
fn plugin_lifecycle_runs_destructor() {
    let plugin = plugin();
    assert_eq!(plugin.version(), CORE_VERSION);

    let backend = plugin.create("tracked").expect("tracked backend");
    assert_eq!(LIVE_BACKENDS.load(Ordering::SeqCst), 1);
    assert_eq!(backend.kind().identity(), "PLUGIN");

    let mut builder = FunctionBuilder::new("copy");
    let x = builder.parameter(DType::I64, [3]);
    let y = builder.identity(x).expect("identity");
    let function = builder.finish(&[y]).expect("finish");
    let input = Tensor::from_slice([3], &[7i64, 8, 9]).expect("input");
    let mut output = Tensor::new(DType::I64, [3]);
    backend
        .call(&function, &mut [&mut output], &[&input])
        .expect("call");
    assert_eq!(output.read::<i64>().expect("read"), vec![7, 8, 9]);

    drop(backend);
    assert_eq!(LIVE_BACKENDS.load(Ordering::SeqCst), 0);
}

#[test]
fn factory_failure_surfaces_as_plugin_error() {
    let err = plugin().create("reject").err().expect("rejected");
    assert!(matches!(err, BackendError::Plugin(_)));
}

#[test]
fn registered_plugin_is_reachable_through_registry() {
    register_plugin("PLUGIN", plugin());
    let backend = graphrt::create_backend("PLUGIN", "").expect("create");
    assert_eq!(backend.kind(), BackendKind::Custom("PLUGIN".into()));
}
