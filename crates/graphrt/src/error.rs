//! Error types for graph construction and backend execution.

use thiserror::Error;

use crate::graph::NodeId;
use crate::tensor::{DType, Shape, TensorSpec};

/// Construction-time validation failures. Raised while building a graph, never
/// during execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("{op}: arguments must have the same element type (expected {expected}, got {actual})")]
    ElementTypeMismatch {
        op: String,
        expected: DType,
        actual: DType,
    },
    #[error("{op}: arguments must have the same shape (expected {expected}, got {actual})")]
    ShapeMismatch {
        op: String,
        expected: Shape,
        actual: Shape,
    },
    #[error("incorrect number of arguments for {op}: expected {expected}, got {actual}")]
    ArityMismatch {
        op: String,
        expected: usize,
        actual: usize,
    },
    #[error("{op}: {reason}")]
    InvalidOperation { op: String, reason: String },
    #[error("{op}: {spec} is too large to address")]
    SizeOverflow { op: String, spec: TensorSpec },
    #[error("value {output} of node {node} does not exist in this graph")]
    UnknownValue { node: NodeId, output: usize },
}

impl GraphError {
    pub fn invalid(op: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::InvalidOperation {
            op: op.into(),
            reason: reason.into(),
        }
    }
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Failures surfaced by backends while compiling, calling or constructing.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unimplemented operation {name} ({kind}) on {backend} backend: {reason}")]
    Unimplemented {
        backend: String,
        name: String,
        kind: String,
        reason: String,
    },
    #[error("multi-output elementwise operation {name} ({kind}) is not supported")]
    MultiOutputElementwise { name: String, kind: String },
    #[error("operation {name} ({kind}) has no kernel registered for backend {backend}")]
    DispatchMiss {
        backend: String,
        name: String,
        kind: String,
    },
    #[error("performance data collection must be enabled prior to compiling")]
    PerformanceOrdering,
    #[error("no backend registered under identity {0:?}")]
    UnknownBackend(String),
    #[error("{backend} backend is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },
    #[error("invalid backend configuration: {0}")]
    Config(String),
    #[error("call interface mismatch: {0}")]
    Interface(String),
    #[error("tensor error: {0}")]
    Tensor(String),
    #[error("backend plugin error: {0}")]
    Plugin(String),
    #[error("{0}")]
    Execution(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl BackendError {
    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution(message.into())
    }

    pub fn unimplemented(
        backend: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BackendError::Unimplemented {
            backend: backend.into(),
            name: name.into(),
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Unavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
