//! Signature-keyed elementwise kernel builder.
//!
//! `build_elementwise` returns a handle for a (kind, operand types, result
//! type, shape) signature, generating CUDA source the first time a signature
//! is seen. Lowered functions refer to kernels only by handle, so one handle
//! serves every node, function and call with that signature.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use graphrt::op::{BinaryOp, UnaryOp};
use graphrt::{fnv_hash, DType, Shape};

use crate::kernels::{binary_expr, convert_expr, cuda_type, unary_expr, PRELUDE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementwiseKind {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Convert,
}

impl ElementwiseKind {
    pub fn name(self) -> &'static str {
        match self {
            ElementwiseKind::Unary(op) => op.name(),
            ElementwiseKind::Binary(op) => op.name(),
            ElementwiseKind::Convert => "Convert",
        }
    }

    fn arity(self) -> usize {
        match self {
            ElementwiseKind::Binary(_) => 2,
            ElementwiseKind::Unary(_) | ElementwiseKind::Convert => 1,
        }
    }
}

/// One generated kernel. The kernel takes one device pointer per operand
/// followed by the result pointer.
#[derive(Debug)]
pub struct Primitive {
    pub signature: String,
    pub symbol: String,
    pub source: String,
    pub element_count: usize,
}

#[derive(Debug, Default)]
pub struct PrimitiveEmitter {
    primitives: Vec<Arc<Primitive>>,
    by_signature: HashMap<String, usize>,
}

pub(crate) type SharedEmitter = Arc<Mutex<PrimitiveEmitter>>;

impl PrimitiveEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn primitive(&self, handle: usize) -> Option<Arc<Primitive>> {
        self.primitives.get(handle).cloned()
    }

    /// `dtypes` lists the operand types followed by the result type. Returns
    /// `None` when the operation has no CUDA form for those types.
    pub fn build_elementwise(
        &mut self,
        kind: ElementwiseKind,
        dtypes: &[DType],
        shape: &Shape,
    ) -> Option<usize> {
        let (&result, operands) = dtypes.split_last()?;
        if operands.len() != kind.arity() {
            return None;
        }
        let signature = signature(kind, operands, result, shape);
        if let Some(handle) = self.by_signature.get(&signature) {
            return Some(*handle);
        }

        let args: Vec<String> = (0..operands.len()).map(|i| format!("in{i}[i]")).collect();
        let expr = match kind {
            ElementwiseKind::Unary(op) => unary_expr(op, operands[0], &args[0])?,
            ElementwiseKind::Binary(op) => binary_expr(op, operands[0], &args[0], &args[1])?,
            ElementwiseKind::Convert => convert_expr(operands[0], result, &args[0]),
        };
        let symbol = format!(
            "graphrt_{}_{:016x}",
            kind.name().to_ascii_lowercase(),
            fnv_hash(signature.as_bytes())
        );
        let count = shape.element_count();
        let source = kernel_source(&symbol, operands, result, count, &expr);

        let handle = self.primitives.len();
        tracing::debug!(handle, %signature, "built elementwise primitive");
        self.primitives.push(Arc::new(Primitive {
            signature: signature.clone(),
            symbol,
            source,
            element_count: count,
        }));
        self.by_signature.insert(signature, handle);
        Some(handle)
    }
}

fn signature(kind: ElementwiseKind, operands: &[DType], result: DType, shape: &Shape) -> String {
    let operands: Vec<&str> = operands.iter().map(|dtype| dtype.name()).collect();
    format!("{}({})->{}{}", kind.name(), operands.join(","), result.name(), shape)
}

fn kernel_source(symbol: &str, operands: &[DType], result: DType, count: usize, expr: &str) -> String {
    let mut params = String::new();
    for (index, dtype) in operands.iter().enumerate() {
        let _ = write!(params, "const {}* in{index}, ", cuda_type(*dtype));
    }
    let _ = write!(params, "{}* out0", cuda_type(result));
    format!(
        "{PRELUDE}
extern \"C\" __global__ void {symbol}({params}) {{
  const uint64_t i = (uint64_t)blockIdx.x * blockDim.x + threadIdx.x;
  if (i >= {count}ull) {{
    return;
  }}
  out0[i] = {expr};
}}
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_handle_per_signature() {
        let mut emitter = PrimitiveEmitter::new();
        let shape = Shape::from([2, 3]);
        let add = ElementwiseKind::Binary(BinaryOp::Add);
        let first = emitter.build_elementwise(add, &[DType::F32; 3], &shape).unwrap();
        let again = emitter.build_elementwise(add, &[DType::F32; 3], &shape).unwrap();
        assert_eq!(first, again);

        let other_shape = emitter
            .build_elementwise(add, &[DType::F32; 3], &Shape::from([6]))
            .unwrap();
        let other_type = emitter.build_elementwise(add, &[DType::I32; 3], &shape).unwrap();
        assert_eq!(emitter.len(), 3);
        assert!(first != other_shape && other_shape != other_type);
    }

    #[test]
    fn kernels_bind_operands_then_result() {
        let mut emitter = PrimitiveEmitter::new();
        let handle = emitter
            .build_elementwise(ElementwiseKind::Convert, &[DType::F64, DType::I8], &Shape::from([5]))
            .unwrap();
        let primitive = emitter.primitive(handle).unwrap();
        assert_eq!(primitive.element_count, 5);
        assert!(primitive.symbol.starts_with("graphrt_convert_"));
        assert!(primitive
            .source
            .contains(&format!("void {}(const double* in0, int8_t* out0)", primitive.symbol)));
        assert!(primitive.source.contains("if (i >= 5ull)"));
    }

    #[test]
    fn undefined_operations_build_nothing() {
        let mut emitter = PrimitiveEmitter::new();
        let exp = ElementwiseKind::Unary(UnaryOp::Exp);
        assert!(emitter.build_elementwise(exp, &[DType::I64, DType::I64], &Shape::from([1])).is_none());
        assert!(emitter.build_elementwise(exp, &[DType::F32], &Shape::from([1])).is_none());
        assert!(emitter.is_empty());
    }
}
