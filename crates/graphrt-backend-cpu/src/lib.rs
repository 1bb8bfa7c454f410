//! CPU backend, registered as `"CPU"`.
//!
//! Each function is planned into a single memory pool, lowered to one C
//! translation unit, compiled into a shared object with the system C compiler
//! and loaded with `libloading`. Shared objects are cached on disk by the FNV
//! fingerprint of their source and compiler flags.

mod codegen;
mod frame;
mod module;
mod options;
mod toolchain;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use graphrt::backend::{register_backend, Compiler, ExternalFunction, LoweringOptions, RuntimeBackend};
use graphrt::planner::{plan_memory, PlanOptions};
use graphrt::{fnv_hash, Backend, BackendConfig, BackendError, BackendKind, BackendResult, Function};

pub use module::CompiledModule;
pub use options::CpuOptions;

pub const CPU_IDENTITY: &str = "CPU";

static INSTRUMENTED_BUILDS: AtomicU64 = AtomicU64::new(0);

/// Instrumented artifacts keep their counters in static storage, so each one
/// gets a distinct source (and therefore a distinct shared object).
fn next_instance_tag() -> String {
    let serial = INSTRUMENTED_BUILDS.fetch_add(1, Ordering::Relaxed);
    format!("{}-{serial}", std::process::id())
}

#[derive(Debug, Clone, Default)]
pub struct CpuCompiler {
    options: CpuOptions,
}

impl CpuCompiler {
    pub fn new(options: CpuOptions) -> Self {
        CpuCompiler { options }
    }

    pub fn options(&self) -> &CpuOptions {
        &self.options
    }

    fn fingerprint(&self, source: &str) -> u64 {
        let mut key = Vec::with_capacity(source.len() + 32);
        key.extend_from_slice(source.as_bytes());
        for part in [&self.options.compiler, &self.options.opt_level] {
            key.push(0);
            key.extend_from_slice(part.as_bytes());
        }
        fnv_hash(&key)
    }
}

impl Compiler for CpuCompiler {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn lower(
        &self,
        function: &Function,
        options: &LoweringOptions,
    ) -> BackendResult<Arc<dyn ExternalFunction>> {
        let plan = plan_memory(
            function,
            PlanOptions {
                alignment: self.options.alignment,
                layout_alignment: Some(self.options.alignment),
            },
        );
        let tag = options.emit_timing.then(next_instance_tag);
        let module = codegen::generate_module(function, &plan, options.emit_timing, tag.as_deref())?;
        if self.options.dump_source {
            tracing::debug!(function = function.name(), source = %module.source, "generated C");
        }

        let fingerprint = self.fingerprint(&module.source);
        let path = toolchain::build_shared_object(&self.options, &module.source, fingerprint)?;
        tracing::debug!(
            function = %function.id(),
            fingerprint = format_args!("{fingerprint:016x}"),
            pool_size = plan.pool_size,
            timers = module.timer_names.len(),
            "loaded CPU artifact"
        );
        let compiled = CompiledModule::load(
            function.name().to_string(),
            &path,
            module.custom_nodes,
            plan.pool_size,
        )?;
        // Tagged builds are never shared, so they clean up after themselves.
        let owned = if tag.is_some() {
            toolchain::artifact_paths(&self.options, fingerprint).to_vec()
        } else {
            Vec::new()
        };
        Ok(Arc::new(compiled.owning_artifacts(owned)))
    }
}

pub type CpuBackend = RuntimeBackend<CpuCompiler>;

pub fn new_backend(options: CpuOptions) -> CpuBackend {
    RuntimeBackend::new(CpuCompiler::new(options))
}

/// True when the C compiler selected by the environment can be run.
pub fn is_available() -> bool {
    match CpuOptions::from_config(&BackendConfig::default()) {
        Ok(options) => toolchain::compiler_available(&options.compiler),
        Err(_) => false,
    }
}

/// Builds a CPU backend from a configuration string (see [`CpuOptions::from_config`]).
pub fn create_backend(configuration: &str) -> BackendResult<Arc<dyn Backend>> {
    let options = CpuOptions::from_config(&BackendConfig::parse(configuration)?)?;
    if !toolchain::compiler_available(&options.compiler) {
        return Err(BackendError::unavailable(
            CPU_IDENTITY,
            format!("C compiler {:?} cannot be executed", options.compiler),
        ));
    }
    Ok(Arc::new(new_backend(options)))
}

pub fn register_cpu_backend() {
    register_backend(CPU_IDENTITY, create_backend);
}
