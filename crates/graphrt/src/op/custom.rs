//! Extension point for user-defined operations.
//!
//! A custom operation owns an [`ExecTable`] mapping backend identities to
//! kernels. At call time the running backend's identity selects the kernel; a
//! missing entry means the operation is unsupported on that backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult, GraphError, GraphResult};
use crate::tensor::{Tensor, TensorSpec};

/// Kernel invoked with the running backend, the output tensors and the inputs.
pub type ExecKernel =
    Arc<dyn Fn(&dyn Backend, &mut [&mut Tensor], &[&Tensor]) -> BackendResult<()> + Send + Sync>;

/// Backend identity to kernel mapping, populated while the operation is built.
#[derive(Clone, Default)]
pub struct ExecTable {
    kernels: HashMap<String, ExecKernel>,
}

impl ExecTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a kernel with a backend identity. Re-registering an identity
    /// replaces the previous kernel.
    pub fn register_exec<F>(&mut self, identity: impl Into<String>, kernel: F)
    where
        F: Fn(&dyn Backend, &mut [&mut Tensor], &[&Tensor]) -> BackendResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.kernels.insert(identity.into(), Arc::new(kernel));
    }

    pub fn lookup(&self, identity: &str) -> Option<&ExecKernel> {
        self.kernels.get(identity)
    }

    pub fn identities(&self) -> Vec<&str> {
        let mut identities: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        identities.sort_unstable();
        identities
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl fmt::Debug for ExecTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecTable")
            .field("identities", &self.identities())
            .finish()
    }
}

/// A user-defined graph operation.
pub trait CustomOp: Send + Sync {
    /// Operation kind, e.g. `"ABC"`. Used in diagnostics and dispatch errors.
    fn kind(&self) -> &str;

    /// Result specs, fixed when the operation is constructed.
    fn output_specs(&self) -> &[TensorSpec];

    fn exec_table(&self) -> &ExecTable;

    /// Rebuilds the operation against a replacement operand list.
    ///
    /// Implementations must reject an operand count differing from the original
    /// arity (see [`check_arity`]) and re-run their operand validation.
    fn copy_with_new_args(&self, args: &[TensorSpec]) -> GraphResult<Arc<dyn CustomOp>>;
}

impl fmt::Debug for dyn CustomOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOp")
            .field("kind", &self.kind())
            .field("outputs", &self.output_specs())
            .field("exec", self.exec_table())
            .finish()
    }
}

/// Runs the kernel registered for `backend`'s identity.
pub fn dispatch_custom(
    op: &dyn CustomOp,
    node_name: &str,
    backend: &dyn Backend,
    outputs: &mut [&mut Tensor],
    inputs: &[&Tensor],
) -> BackendResult<()> {
    let kind = backend.kind();
    let identity = kind.identity();
    let Some(kernel) = op.exec_table().lookup(identity) else {
        return Err(BackendError::DispatchMiss {
            backend: identity.to_string(),
            name: node_name.to_string(),
            kind: op.kind().to_string(),
        });
    };
    tracing::trace!(op = op.kind(), node = node_name, backend = identity, "dispatching custom kernel");
    kernel(backend, outputs, inputs)
}

pub fn check_arity(op: &str, expected: usize, actual: usize) -> GraphResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(GraphError::ArityMismatch {
            op: op.to_string(),
            expected,
            actual,
        })
    }
}

/// Requires every operand to share the first operand's element type and shape.
pub fn validate_uniform_operands(op: &str, args: &[TensorSpec]) -> GraphResult<()> {
    let Some(first) = args.first() else {
        return Ok(());
    };
    for arg in &args[1..] {
        if arg.dtype != first.dtype {
            return Err(GraphError::ElementTypeMismatch {
                op: op.to_string(),
                expected: first.dtype,
                actual: arg.dtype,
            });
        }
        if arg.shape != first.shape {
            return Err(GraphError::ShapeMismatch {
                op: op.to_string(),
                expected: first.shape.clone(),
                actual: arg.shape.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn last_registration_wins() {
        let mut table = ExecTable::new();
        table.register_exec("INTERPRETER", |_, _, _| Err(BackendError::execution("first")));
        table.register_exec("INTERPRETER", |_, _, _| Ok(()));
        table.register_exec("CPU", |_, _, _| Ok(()));
        assert_eq!(table.identities(), vec!["CPU", "INTERPRETER"]);
        assert!(table.lookup("GPU").is_none());
    }

    #[test]
    fn uniform_operands_reject_shape_mismatch() {
        let a = TensorSpec::new(DType::F32, [2, 2]);
        let b = TensorSpec::new(DType::F32, [4]);
        let err = validate_uniform_operands("ABC", &[a.clone(), b]).expect_err("shape");
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
        validate_uniform_operands("ABC", &[a.clone(), a]).expect("uniform");
    }
}
