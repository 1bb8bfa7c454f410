use std::sync::{Arc, OnceLock};

use graphrt::Backend;
use graphrt_backend_cpu::{is_available, new_backend, CpuOptions};
use graphrt_backend_tests::define_backend_tests;
use tempfile::TempDir;

fn cache_dir() -> &'static TempDir {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| tempfile::tempdir().expect("temporary cache directory"))
}

fn cpu() -> Option<Arc<dyn Backend>> {
    if !is_available() {
        eprintln!("skipping CPU backend suite: no C compiler found");
        return None;
    }
    let options = CpuOptions {
        cache_dir: cache_dir().path().to_path_buf(),
        ..CpuOptions::default()
    };
    Some(Arc::new(new_backend(options)))
}

define_backend_tests!(cpu_suite, cpu);
