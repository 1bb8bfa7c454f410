use std::sync::Arc;

use graphrt::Backend;
use graphrt_backend_gpu::{is_available, new_backend, GpuOptions};
use graphrt_backend_tests::define_backend_tests;

fn gpu() -> Option<Arc<dyn Backend>> {
    if !is_available() {
        eprintln!("skipping GPU backend suite: CUDA driver or NVRTC not found");
        return None;
    }
    Some(Arc::new(new_backend(GpuOptions::default())))
}

define_backend_tests!(gpu_suite, gpu);
