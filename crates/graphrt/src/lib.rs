//! Compilation and execution runtime for typed dataflow graphs.
//!
//! A [`Function`] is built once with a [`FunctionBuilder`], handed to a
//! [`Backend`] obtained from the registry, and then called repeatedly with live
//! [`Tensor`]s. Backends compile each function at most once and cache the
//! resulting artifact together with its call frame.

pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod op;
pub mod planner;
pub mod tensor;

pub use backend::{
    create_backend, list_backends, register_backend, Backend, BackendKind, PerformanceCounter,
};
pub use config::BackendConfig;
pub use error::{BackendError, BackendResult, GraphError, GraphResult};
pub use graph::{Function, FunctionBuilder, FunctionId, Node, NodeId, ValueRef};
pub use op::{BinaryOp, CustomOp, ExecTable, Op, UnaryOp};
pub use tensor::{DType, Element, ExternalBuffer, Shape, Tensor, TensorDescriptor, TensorSpec};

/// FNV-1a hash used to fingerprint generated sources and kernel signatures.
pub fn fnv_hash(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
