//! Operation kinds that may appear in a graph.
//!
//! Operator semantics proper belong to the backends; this module only records
//! what a node is and validates its operands at construction time.

mod custom;

use std::fmt;
use std::sync::Arc;

pub use custom::{
    check_arity, dispatch_custom, validate_uniform_operands, CustomOp, ExecKernel, ExecTable,
};

use crate::error::{GraphError, GraphResult};
use crate::tensor::{DType, Shape, TensorSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negative,
    Abs,
    Relu,
    Exp,
    Log,
    Sqrt,
    Tanh,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Negative => "Negative",
            UnaryOp::Abs => "Abs",
            UnaryOp::Relu => "Relu",
            UnaryOp::Exp => "Exp",
            UnaryOp::Log => "Log",
            UnaryOp::Sqrt => "Sqrt",
            UnaryOp::Tanh => "Tanh",
        }
    }

    /// Transcendental ops are only defined for floating point operands.
    pub fn requires_float(self) -> bool {
        matches!(
            self,
            UnaryOp::Exp | UnaryOp::Log | UnaryOp::Sqrt | UnaryOp::Tanh
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Subtract => "Subtract",
            BinaryOp::Multiply => "Multiply",
            BinaryOp::Divide => "Divide",
            BinaryOp::Maximum => "Maximum",
            BinaryOp::Minimum => "Minimum",
        }
    }
}

/// The operation carried by a graph node.
#[derive(Clone)]
pub enum Op {
    /// Function input; lowers to nothing.
    Parameter,
    /// Literal bytes laid out densely in row-major order.
    Constant(Arc<[u8]>),
    Identity,
    Unary(UnaryOp),
    Binary(BinaryOp),
    Convert(DType),
    /// Rank-2 matrix product.
    Dot,
    Custom(Arc<dyn CustomOp>),
}

impl Op {
    pub fn kind(&self) -> &str {
        match self {
            Op::Parameter => "Parameter",
            Op::Constant(_) => "Constant",
            Op::Identity => "Identity",
            Op::Unary(op) => op.name(),
            Op::Binary(op) => op.name(),
            Op::Convert(_) => "Convert",
            Op::Dot => "Dot",
            Op::Custom(op) => op.kind(),
        }
    }

    pub fn is_elementwise(&self) -> bool {
        matches!(self, Op::Unary(_) | Op::Binary(_) | Op::Convert(_))
    }

    pub fn arity(&self) -> Option<usize> {
        match self {
            Op::Parameter | Op::Constant(_) => Some(0),
            Op::Identity | Op::Unary(_) | Op::Convert(_) => Some(1),
            Op::Binary(_) | Op::Dot => Some(2),
            Op::Custom(_) => None,
        }
    }

    /// Validates operands and derives output specs for a built-in operation.
    ///
    /// `Parameter`, `Constant` and custom operations carry their outputs with
    /// them and are rejected here.
    pub(crate) fn infer_outputs(&self, args: &[TensorSpec]) -> GraphResult<Vec<TensorSpec>> {
        if let Some(expected) = self.arity() {
            check_arity(self.kind(), expected, args.len())?;
        }
        match self {
            Op::Parameter | Op::Constant(_) | Op::Custom(_) => Err(GraphError::invalid(
                self.kind(),
                "outputs are fixed at construction",
            )),
            Op::Identity => Ok(vec![args[0].clone()]),
            Op::Unary(op) => {
                let arg = &args[0];
                reject_boolean(op.name(), arg.dtype)?;
                if op.requires_float() && !arg.dtype.is_float() {
                    return Err(GraphError::invalid(
                        op.name(),
                        format!("requires a floating point operand, got {}", arg.dtype),
                    ));
                }
                Ok(vec![arg.clone()])
            }
            Op::Binary(op) => {
                validate_uniform_operands(op.name(), args)?;
                reject_boolean(op.name(), args[0].dtype)?;
                Ok(vec![args[0].clone()])
            }
            Op::Convert(dtype) => Ok(vec![TensorSpec::new(*dtype, args[0].shape.clone())]),
            Op::Dot => infer_dot(&args[0], &args[1]).map(|spec| vec![spec]),
        }
    }
}

fn reject_boolean(op: &str, dtype: DType) -> GraphResult<()> {
    if dtype == DType::Boolean {
        Err(GraphError::invalid(op, "boolean operands are not arithmetic"))
    } else {
        Ok(())
    }
}

fn infer_dot(lhs: &TensorSpec, rhs: &TensorSpec) -> GraphResult<TensorSpec> {
    if lhs.dtype != rhs.dtype {
        return Err(GraphError::ElementTypeMismatch {
            op: "Dot".into(),
            expected: lhs.dtype,
            actual: rhs.dtype,
        });
    }
    reject_boolean("Dot", lhs.dtype)?;
    let (l, r) = (lhs.shape.dims(), rhs.shape.dims());
    if l.len() != 2 || r.len() != 2 {
        return Err(GraphError::invalid(
            "Dot",
            format!("expects rank-2 operands, got {} and {}", lhs.shape, rhs.shape),
        ));
    }
    if l[1] != r[0] {
        return Err(GraphError::ShapeMismatch {
            op: "Dot".into(),
            expected: Shape::from([r[0], r[1]]),
            actual: rhs.shape.clone(),
        });
    }
    Ok(TensorSpec::new(lhs.dtype, [l[0], r[1]]))
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Constant(bytes) => write!(f, "Constant({} bytes)", bytes.len()),
            Op::Convert(dtype) => write!(f, "Convert({dtype})"),
            other => f.write_str(other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_requires_matching_types() {
        let a = TensorSpec::new(DType::F32, [2]);
        let b = TensorSpec::new(DType::I32, [2]);
        let err = Op::Binary(BinaryOp::Add)
            .infer_outputs(&[a, b])
            .expect_err("mismatch");
        assert!(matches!(err, GraphError::ElementTypeMismatch { .. }));
    }

    #[test]
    fn transcendental_rejects_integers() {
        let arg = TensorSpec::new(DType::I32, [3]);
        assert!(Op::Unary(UnaryOp::Exp).infer_outputs(&[arg.clone()]).is_err());
        assert!(Op::Unary(UnaryOp::Negative).infer_outputs(&[arg]).is_ok());
    }

    #[test]
    fn dot_infers_matrix_shape() {
        let a = TensorSpec::new(DType::F64, [2, 3]);
        let b = TensorSpec::new(DType::F64, [3, 4]);
        let out = Op::Dot.infer_outputs(&[a.clone(), b]).expect("dot");
        assert_eq!(out, vec![TensorSpec::new(DType::F64, [2, 4])]);
        assert!(Op::Dot.infer_outputs(&[a.clone(), a]).is_err());
    }

    #[test]
    fn wrong_arity_names_counts() {
        let arg = TensorSpec::new(DType::F32, [1]);
        let err = Op::Dot.infer_outputs(&[arg]).expect_err("arity");
        assert_eq!(
            err.to_string(),
            "incorrect number of arguments for Dot: expected 2, got 1"
        );
    }
}
