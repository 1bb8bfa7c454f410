//! Lowering contract shared by every in-tree backend.
//!
//! A [`Compiler`] turns a [`Function`] into an [`ExternalFunction`] (the
//! compiled artifact), which in turn makes reusable [`CallFrame`]s.

use std::sync::Arc;

use super::{Backend, BackendKind, DebugTimers};
use crate::error::BackendResult;
use crate::graph::Function;
use crate::tensor::Tensor;

/// Flags fixed at lowering time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoweringOptions {
    /// Emit per-node timing counters into the artifact.
    pub emit_timing: bool,
}

/// Backend-specific lowering stage.
///
/// Every node must either map to a code generation strategy or fail with
/// [`crate::BackendError::Unimplemented`] naming the node and its kind.
pub trait Compiler: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    fn lower(
        &self,
        function: &Function,
        options: &LoweringOptions,
    ) -> BackendResult<Arc<dyn ExternalFunction>>;
}

/// A compiled artifact.
pub trait ExternalFunction: Send + Sync {
    fn make_call_frame(self: Arc<Self>) -> BackendResult<Box<dyn CallFrame>>;

    /// The artifact's timing accessors, looked up at retrieval time. `None` when
    /// the artifact was built without instrumentation.
    fn debug_timers(&self) -> Option<Box<dyn DebugTimers + '_>>;
}

/// Binds one artifact to live buffers. Borrowed tensors are never retained past
/// the end of `call`, and outputs are complete when it returns.
pub trait CallFrame: Send {
    fn call(
        &mut self,
        backend: &dyn Backend,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()>;
}
