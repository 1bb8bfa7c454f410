//! Reference kernels for the built-in operations.
//!
//! Integer arithmetic wraps, integer division by zero yields zero, and
//! `maximum`/`minimum` pick the first operand unless the comparison strictly
//! favours the second. The generated C of the CPU backend follows the same rules.

use graphrt::op::{BinaryOp, UnaryOp};
use graphrt::{BackendError, BackendResult, DType, Element, Tensor};

pub(crate) trait Scalar: Element + PartialOrd {
    const ZERO: Self;

    /// `None` when `op` is not defined for the element type.
    fn apply_unary(self, op: UnaryOp) -> Option<Self>;
    fn apply_binary(self, op: BinaryOp, rhs: Self) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
    /// Exact integer value, `None` for floating point types.
    fn to_i128(self) -> Option<i128>;
    fn from_i128(value: i128) -> Self;
}

fn select<T: PartialOrd>(op: BinaryOp, lhs: T, rhs: T) -> Option<T> {
    match op {
        BinaryOp::Maximum => Some(if lhs > rhs { lhs } else { rhs }),
        BinaryOp::Minimum => Some(if lhs < rhs { lhs } else { rhs }),
        _ => None,
    }
}

macro_rules! float_scalar {
    ($($ty:ty),*) => {
        $(
            impl Scalar for $ty {
                const ZERO: Self = 0.0;

                fn apply_unary(self, op: UnaryOp) -> Option<Self> {
                    Some(match op {
                        UnaryOp::Exp => self.exp(),
                        UnaryOp::Log => self.ln(),
                        UnaryOp::Sqrt => self.sqrt(),
                        UnaryOp::Tanh => self.tanh(),
                        UnaryOp::Negative => -self,
                        UnaryOp::Abs => self.abs(),
                        UnaryOp::Relu => if self > 0.0 { self } else { 0.0 },
                    })
                }

                fn apply_binary(self, op: BinaryOp, rhs: Self) -> Self {
                    if let Some(picked) = select(op, self, rhs) {
                        return picked;
                    }
                    match op {
                        BinaryOp::Add => self + rhs,
                        BinaryOp::Subtract => self - rhs,
                        BinaryOp::Multiply => self * rhs,
                        _ => self / rhs,
                    }
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value as $ty
                }

                fn to_i128(self) -> Option<i128> {
                    None
                }

                fn from_i128(value: i128) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

macro_rules! int_scalar {
    ($($ty:ty => $abs:expr),*) => {
        $(
            impl Scalar for $ty {
                const ZERO: Self = 0;

                fn apply_unary(self, op: UnaryOp) -> Option<Self> {
                    match op {
                        UnaryOp::Negative => Some(self.wrapping_neg()),
                        UnaryOp::Abs => Some(($abs)(self)),
                        UnaryOp::Relu => Some(if self > 0 { self } else { 0 }),
                        UnaryOp::Exp | UnaryOp::Log | UnaryOp::Sqrt | UnaryOp::Tanh => None,
                    }
                }

                fn apply_binary(self, op: BinaryOp, rhs: Self) -> Self {
                    if let Some(picked) = select(op, self, rhs) {
                        return picked;
                    }
                    match op {
                        BinaryOp::Add => self.wrapping_add(rhs),
                        BinaryOp::Subtract => self.wrapping_sub(rhs),
                        BinaryOp::Multiply => self.wrapping_mul(rhs),
                        _ => if rhs == 0 { 0 } else { self.wrapping_div(rhs) },
                    }
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value as $ty
                }

                fn to_i128(self) -> Option<i128> {
                    Some(self as i128)
                }

                fn from_i128(value: i128) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

float_scalar!(f32, f64);
int_scalar!(
    i8 => i8::wrapping_abs,
    i16 => i16::wrapping_abs,
    i32 => i32::wrapping_abs,
    i64 => i64::wrapping_abs,
    u8 => |x: u8| x,
    u16 => |x: u16| x,
    u32 => |x: u32| x,
    u64 => |x: u64| x
);

/// Expands `$body` once per numeric element type with `$t` bound to the Rust
/// scalar; booleans take the separate `$on_bool` arm.
macro_rules! with_scalar {
    ($dtype:expr, $t:ident => $body:expr, boolean => $on_bool:expr) => {
        match $dtype {
            DType::F32 => { type $t = f32; $body }
            DType::F64 => { type $t = f64; $body }
            DType::I8 => { type $t = i8; $body }
            DType::I16 => { type $t = i16; $body }
            DType::I32 => { type $t = i32; $body }
            DType::I64 => { type $t = i64; $body }
            DType::U8 => { type $t = u8; $body }
            DType::U16 => { type $t = u16; $body }
            DType::U32 => { type $t = u32; $body }
            DType::U64 => { type $t = u64; $body }
            DType::Boolean => $on_bool,
        }
    };
}

fn boolean_operands(op: &str) -> BackendError {
    BackendError::execution(format!("{op} does not accept boolean operands"))
}

pub(crate) fn unary(op: UnaryOp, input: &Tensor, output: &mut Tensor) -> BackendResult<()> {
    with_scalar!(input.dtype(), T => map_unary::<T>(op, input, output), boolean => Err(boolean_operands(op.name())))
}

fn map_unary<T: Scalar>(op: UnaryOp, input: &Tensor, output: &mut Tensor) -> BackendResult<()> {
    let src = input.as_slice::<T>()?;
    let dst = output.as_mut_slice::<T>()?;
    for (out, x) in dst.iter_mut().zip(src) {
        *out = x.apply_unary(op).ok_or_else(|| {
            BackendError::execution(format!("{} is not defined for {}", op.name(), input.dtype()))
        })?;
    }
    Ok(())
}

pub(crate) fn binary(
    op: BinaryOp,
    lhs: &Tensor,
    rhs: &Tensor,
    output: &mut Tensor,
) -> BackendResult<()> {
    with_scalar!(lhs.dtype(), T => map_binary::<T>(op, lhs, rhs, output), boolean => Err(boolean_operands(op.name())))
}

fn map_binary<T: Scalar>(
    op: BinaryOp,
    lhs: &Tensor,
    rhs: &Tensor,
    output: &mut Tensor,
) -> BackendResult<()> {
    let (a, b) = (lhs.as_slice::<T>()?, rhs.as_slice::<T>()?);
    let dst = output.as_mut_slice::<T>()?;
    for ((out, x), y) in dst.iter_mut().zip(a).zip(b) {
        *out = x.apply_binary(op, *y);
    }
    Ok(())
}

pub(crate) fn convert(input: &Tensor, output: &mut Tensor) -> BackendResult<()> {
    with_scalar!(input.dtype(), S => convert_from::<S>(input, output), boolean => convert_from::<u8>(input, output))
}

fn convert_from<S: Scalar>(input: &Tensor, output: &mut Tensor) -> BackendResult<()> {
    let src = input.as_slice::<S>()?;
    if output.dtype() == DType::Boolean {
        let dst = output.as_mut_slice::<u8>()?;
        for (out, x) in dst.iter_mut().zip(src) {
            *out = u8::from(*x != S::ZERO);
        }
        return Ok(());
    }
    with_scalar!(output.dtype(), D => {
        let dst = output.as_mut_slice::<D>()?;
        for (out, x) in dst.iter_mut().zip(src) {
            *out = match x.to_i128() {
                Some(exact) => D::from_i128(exact),
                None => D::from_f64(x.to_f64()),
            };
        }
        Ok(())
    }, boolean => Ok(()))
}

/// Row-major `[m, k] x [k, n]` product, accumulating in the element type.
pub(crate) fn dot(lhs: &Tensor, rhs: &Tensor, output: &mut Tensor) -> BackendResult<()> {
    with_scalar!(lhs.dtype(), T => dot_typed::<T>(lhs, rhs, output), boolean => Err(boolean_operands("Dot")))
}

fn dot_typed<T: Scalar>(lhs: &Tensor, rhs: &Tensor, output: &mut Tensor) -> BackendResult<()> {
    let (m, k) = (lhs.shape().dims()[0], lhs.shape().dims()[1]);
    let n = rhs.shape().dims()[1];
    let (a, b) = (lhs.as_slice::<T>()?, rhs.as_slice::<T>()?);
    let dst = output.as_mut_slice::<T>()?;
    for i in 0..m {
        for j in 0..n {
            let mut acc = T::ZERO;
            for p in 0..k {
                let product = a[i * k + p].apply_binary(BinaryOp::Multiply, b[p * n + j]);
                acc = acc.apply_binary(BinaryOp::Add, product);
            }
            dst[i * n + j] = acc;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_by_zero_is_zero() {
        assert_eq!(7i32.apply_binary(BinaryOp::Divide, 0), 0);
        assert_eq!(i32::MIN.apply_binary(BinaryOp::Divide, -1), i32::MIN);
        assert_eq!(9u8.apply_binary(BinaryOp::Divide, 2), 4);
    }

    #[test]
    fn transcendental_ops_are_undefined_for_integers() {
        assert_eq!(4i32.apply_unary(UnaryOp::Sqrt), None);
        assert_eq!(1u8.apply_unary(UnaryOp::Exp), None);
        assert_eq!(4.0f32.apply_unary(UnaryOp::Sqrt), Some(2.0));

        let input = Tensor::from_slice([2], &[4i32, 9]).unwrap();
        let mut output = Tensor::new(DType::I32, [2]);
        let err = unary(UnaryOp::Sqrt, &input, &mut output).unwrap_err();
        assert!(matches!(err, BackendError::Execution(_)));
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(250u8.apply_binary(BinaryOp::Add, 10), 4);
        assert_eq!(i8::MIN.apply_unary(UnaryOp::Negative), Some(i8::MIN));
        assert_eq!(i8::MIN.apply_unary(UnaryOp::Abs), Some(i8::MIN));
    }

    #[test]
    fn convert_to_boolean_tests_nonzero() {
        let input = Tensor::from_slice([3], &[0.0f32, -2.5, 1.0]).expect("input");
        let mut output = Tensor::new(DType::Boolean, [3]);
        convert(&input, &mut output).expect("convert");
        assert_eq!(output.read::<u8>().expect("read"), vec![0, 1, 1]);
    }

    #[test]
    fn wide_integer_convert_is_exact() {
        let input = Tensor::from_slice([1], &[i64::MAX - 1]).expect("input");
        let mut output = Tensor::new(DType::U64, [1]);
        convert(&input, &mut output).expect("convert");
        assert_eq!(output.read::<u64>().expect("read"), vec![(i64::MAX - 1) as u64]);
    }

    #[test]
    fn dot_multiplies_matrices() {
        let a = Tensor::from_slice([2, 3], &[1i32, 2, 3, 4, 5, 6]).expect("a");
        let b = Tensor::from_slice([3, 2], &[7i32, 8, 9, 10, 11, 12]).expect("b");
        let mut out = Tensor::new(DType::I32, [2, 2]);
        dot(&a, &b, &mut out).expect("dot");
        assert_eq!(out.read::<i32>().expect("read"), vec![58, 64, 139, 154]);
    }
}
