//! One-call registration of the in-tree backends.

use std::sync::Once;

pub use graphrt;
pub use graphrt_backend_interpreter as interpreter;

#[cfg(feature = "cpu")]
pub use graphrt_backend_cpu as cpu;
#[cfg(feature = "gpu")]
pub use graphrt_backend_gpu as gpu;

static REGISTER: Once = Once::new();

/// Registers `"INTERPRETER"` and, when their features are enabled, `"CPU"` and
/// `"GPU"`. Safe to call any number of times. Backends whose toolchain or
/// device is missing are still registered; creating them reports
/// [`graphrt::BackendError::Unavailable`].
pub fn register_all_backends() {
    REGISTER.call_once(|| {
        graphrt_backend_interpreter::register_interpreter_backend();

        #[cfg(feature = "cpu")]
        graphrt_backend_cpu::register_cpu_backend();

        #[cfg(feature = "gpu")]
        graphrt_backend_gpu::register_gpu_backend();

        tracing::debug!(backends = ?graphrt::list_backends(), "registered in-tree backends");
    });
}
