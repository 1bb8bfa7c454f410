//! CUDA C expressions for the elementwise operations.
//!
//! NVRTC has no `-fwrapv`, so integer arithmetic is carried out in an unsigned
//! type of at least 32 bits and truncated back. Division by zero yields zero,
//! ties in `maximum`/`minimum` keep the first operand and float to integer
//! conversion saturates with NaN mapping to zero.

use graphrt::op::{BinaryOp, UnaryOp};
use graphrt::DType;

/// Fixed-width typedefs; NVRTC does not ship `<stdint.h>` on every toolkit.
pub(crate) const PRELUDE: &str = "typedef signed char int8_t;
typedef short int16_t;
typedef int int32_t;
typedef long long int64_t;
typedef unsigned char uint8_t;
typedef unsigned short uint16_t;
typedef unsigned int uint32_t;
typedef unsigned long long uint64_t;
";

pub(crate) fn cuda_type(dtype: DType) -> &'static str {
    match dtype {
        DType::F32 => "float",
        DType::F64 => "double",
        DType::I8 => "int8_t",
        DType::I16 => "int16_t",
        DType::I32 => "int32_t",
        DType::I64 => "int64_t",
        DType::U8 | DType::Boolean => "uint8_t",
        DType::U16 => "uint16_t",
        DType::U32 => "uint32_t",
        DType::U64 => "uint64_t",
    }
}

/// Unsigned type wide enough that arithmetic on it never promotes to `int`.
fn wrap_type(dtype: DType) -> &'static str {
    if dtype.size_in_bytes() == 8 {
        "uint64_t"
    } else {
        "uint32_t"
    }
}

pub(crate) fn unary_expr(op: UnaryOp, dtype: DType, x: &str) -> Option<String> {
    let ty = cuda_type(dtype);
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
    let wide = wrap_type(dtype);
    let negate = format!("({ty})(({wide})0 - ({wide}){x})");
    match op {
        UnaryOp::Negative => Some(negate),
        UnaryOp::Abs if dtype.is_signed() => Some(format!("({x} < 0 ? {negate} : {x})")),
        UnaryOp::Abs => Some(x.to_string()),
        UnaryOp::Relu => Some(format!("({x} > 0 ? {x} : ({ty})0)")),
        _ => None,
    }
}

pub(crate) fn binary_expr(op: BinaryOp, dtype: DType, a: &str, b: &str) -> Option<String> {
    if dtype == DType::Boolean {
        return None;
    }
    let ty = cuda_type(dtype);
    if dtype.is_float() {
        return Some(match op {
            BinaryOp::Add => format!("({a} + {b})"),
            BinaryOp::Subtract => format!("({a} - {b})"),
            BinaryOp::Multiply => format!("({a} * {b})"),
            BinaryOp::Divide => format!("({a} / {b})"),
            BinaryOp::Maximum => format!("({a} > {b} ? {a} : {b})"),
            BinaryOp::Minimum => format!("({a} < {b} ? {a} : {b})"),
        });
    }
    let wide = wrap_type(dtype);
    let wrapped = |sym: &str| format!("({ty})(({wide}){a} {sym} ({wide}){b})");
    Some(match op {
        BinaryOp::Add => wrapped("+"),
        BinaryOp::Subtract => wrapped("-"),
        BinaryOp::Multiply => wrapped("*"),
        BinaryOp::Divide if dtype.is_signed() => format!(
            "({b} == 0 ? ({ty})0 : ({b} == -1 ? ({ty})(({wide})0 - ({wide}){a}) : ({ty})({a} / {b})))"
        ),
        BinaryOp::Divide => format!("({b} == 0 ? ({ty})0 : ({ty})({a} / {b}))"),
        BinaryOp::Maximum => format!("({a} > {b} ? {a} : {b})"),
        BinaryOp::Minimum => format!("({a} < {b} ? {a} : {b})"),
    })
}

fn integer_limits(dtype: DType) -> (&'static str, &'static str) {
    match dtype {
        DType::I8 => ("-128", "127"),
        DType::I16 => ("-32768", "32767"),
        DType::I32 => ("(-2147483647 - 1)", "2147483647"),
        DType::I64 => ("(-9223372036854775807LL - 1)", "9223372036854775807LL"),
        DType::U8 | DType::Boolean => ("0", "255"),
        DType::U16 => ("0", "65535"),
        DType::U32 => ("0", "4294967295u"),
        DType::U64 => ("0", "18446744073709551615ull"),
        DType::F32 | DType::F64 => ("0", "0"),
    }
}

pub(crate) fn convert_expr(from: DType, to: DType, x: &str) -> String {
    let ty = cuda_type(to);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integers_wrap_through_unsigned_int() {
        let add = binary_expr(BinaryOp::Add, DType::I16, "a", "b").unwrap();
        assert_eq!(add, "(int16_t)((uint32_t)a + (uint32_t)b)");
        let mul = binary_expr(BinaryOp::Multiply, DType::U64, "a", "b").unwrap();
        assert_eq!(mul, "(uint64_t)((uint64_t)a * (uint64_t)b)");
        assert_eq!(
            unary_expr(UnaryOp::Negative, DType::I32, "x").unwrap(),
            "(int32_t)((uint32_t)0 - (uint32_t)x)"
        );
    }

    #[test]
    fn float_math_uses_single_precision_intrinsics() {
        assert_eq!(unary_expr(UnaryOp::Tanh, DType::F32, "x").unwrap(), "tanhf(x)");
        assert_eq!(unary_expr(UnaryOp::Log, DType::F64, "x").unwrap(), "log(x)");
        assert!(unary_expr(UnaryOp::Sqrt, DType::U8, "x").is_none());
        assert!(binary_expr(BinaryOp::Add, DType::Boolean, "a", "b").is_none());
    }

    #[test]
    fn conversions_saturate_and_test_truth() {
        let expr = convert_expr(DType::F64, DType::U32, "x");
        assert!(expr.starts_with("(x != x ? (uint32_t)0"));
        assert!(expr.contains("4294967295u"));
        assert_eq!(convert_expr(DType::F32, DType::Boolean, "x"), "(uint8_t)(x != 0)");
        assert_eq!(convert_expr(DType::U8, DType::F32, "x"), "(float)x");
    }
}
