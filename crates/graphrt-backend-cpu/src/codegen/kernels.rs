//! C expressions and loops for the built-in operations.
//!
//! These follow the numeric conventions of the interpreter's reference
//! kernels: wrapping integer arithmetic (the translation unit is compiled with
//! `-fwrapv`), integer division by zero yields zero, `maximum`/`minimum` keep
//! the first operand on ties and float to integer conversion saturates.

use graphrt::op::{BinaryOp, UnaryOp};
use graphrt::DType;

use super::utils::{c_type, push_block};

/// `None` when the operation has no C form for `dtype`.
pub(super) fn unary_expr(op: UnaryOp, dtype: DType, x: &str) -> Option<String> {
    let ty = c_type(dtype);
    if dtype.is_float() {
        let suffix = if dtype == DType::F32 { "f" } else { "" };
        let call = |name: &str| format!("{name}{suffix}({x})");
        return Some(match op {
            UnaryOp::Negative => format!("(-{x})"),
            UnaryOp::Abs => call("fabs"),
            UnaryOp::Relu => format!("({x} > 0 ? {x} : ({ty})0)"),
            UnaryOp::Exp => call("exp"),
            UnaryOp::Log => call("log"),
            UnaryOp::Sqrt => call("sqrt"),
            UnaryOp::Tanh => call("tanh"),
        });
    }
    if dtype == DType::Boolean {
        return None;
    }
    match op {
        UnaryOp::Negative => Some(format!("({ty})(-{x})")),
        UnaryOp::Abs if dtype.is_signed() => Some(format!("({x} < 0 ? ({ty})(-{x}) : {x})")),
        UnaryOp::Abs => Some(x.to_string()),
        UnaryOp::Relu => Some(format!("({x} > 0 ? {x} : ({ty})0)")),
        _ => None,
    }
}

pub(super) fn binary_expr(op: BinaryOp, dtype: DType, a: &str, b: &str) -> Option<String> {
    if dtype == DType::Boolean {
        return None;
    }
    let ty = c_type(dtype);
    Some(match op {
        BinaryOp::Add => format!("({ty})({a} + {b})"),
        BinaryOp::Subtract => format!("({ty})({a} - {b})"),
        BinaryOp::Multiply => format!("({ty})({a} * {b})"),
        BinaryOp::Divide if dtype.is_float() => format!("({a} / {b})"),
        BinaryOp::Divide if dtype.is_signed() => format!(
            "({b} == 0 ? ({ty})0 : ({b} == -1 ? ({ty})(-{a}) : ({ty})({a} / {b})))"
        ),
        BinaryOp::Divide => format!("({b} == 0 ? ({ty})0 : ({ty})({a} / {b}))"),
        BinaryOp::Maximum => format!("({a} > {b} ? {a} : {b})"),
        BinaryOp::Minimum => format!("({a} < {b} ? {a} : {b})"),
    })
}

fn integer_limits(dtype: DType) -> (&'static str, &'static str) {
    match dtype {
        DType::I8 => ("INT8_MIN", "INT8_MAX"),
        DType::I16 => ("INT16_MIN", "INT16_MAX"),
        DType::I32 => ("INT32_MIN", "INT32_MAX"),
        DType::I64 => ("INT64_MIN", "INT64_MAX"),
        DType::U8 | DType::Boolean => ("0", "UINT8_MAX"),
        DType::U16 => ("0", "UINT16_MAX"),
        DType::U32 => ("0", "UINT32_MAX"),
        DType::U64 => ("0", "UINT64_MAX"),
        DType::F32 | DType::F64 => ("0", "0"),
    }
}

pub(super) fn convert_expr(from: DType, to: DType, x: &str) -> String {
    let ty = c_type(to);
    if to == DType::Boolean {
        return format!("(uint8_t)({x} != 0)");
    }
    if from.is_float() && to.is_integer() {
        let (min, max) = integer_limits(to);
        return format!(
            "({x} != {x} ? ({ty})0 : {x} <= (double){min} ? ({ty}){min} : {x} >= (double){max} ? ({ty}){max} : ({ty}){x})"
        );
    }
    format!("({ty}){x}")
}

/// Row-major `[m, k] x [k, n]` product accumulated in the element type.
pub(super) fn emit_dot(
    module: &mut String,
    dtype: DType,
    out: &str,
    lhs: &str,
    rhs: &str,
    (m, k, n): (usize, usize, usize),
) {
    let ty = c_type(dtype);
    let block = format!(
        r#"
            for (size_t i = 0; i < {m}; ++i) {{
              for (size_t j = 0; j < {n}; ++j) {{
                {ty} acc = 0;
                for (size_t p = 0; p < {k}; ++p) {{
                  acc = ({ty})(acc + ({ty})({lhs}[i * {k} + p] * {rhs}[p * {n} + j]));
                }}
                {out}[i * {n} + j] = acc;
              }}
            }}
        "#
    );
    push_block(module, 2, &block);
}
