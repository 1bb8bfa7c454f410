//! Randomised comparisons against the interpreter.

use std::sync::Arc;

use graphrt::{Backend, BackendKind, DType, FunctionBuilder, UnaryOp};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::harness::{assert_matches_interpreter, random_positive_f32, random_tensor};

pub fn float_elementwise_chain(backend: &Arc<dyn Backend>) {
    let mut rng = StdRng::seed_from_u64(11);
    for dtype in [DType::F32, DType::F64] {
        let shape = [3, 17];
        let mut builder = FunctionBuilder::new("float_chain");
        let a = builder.parameter(dtype, shape);
        let b = builder.parameter(dtype, shape);
        let sum = builder.add(a, b).unwrap();
        let diff = builder.subtract(a, b).unwrap();
        let prod = builder.multiply(sum, diff).unwrap();
        let squashed = builder.unary(UnaryOp::Tanh, prod).unwrap();
        let rectified = builder.unary(UnaryOp::Relu, diff).unwrap();
        let hi = builder.maximum(squashed, rectified).unwrap();
        let lo = builder.minimum(squashed, rectified).unwrap();
        let magnitude = builder.unary(UnaryOp::Abs, lo).unwrap();
        let grown = builder.unary(UnaryOp::Exp, magnitude).unwrap();
        let ratio = builder.divide(hi, grown).unwrap();
        let negated = builder.unary(UnaryOp::Negative, ratio).unwrap();
        let function = builder.finish(&[negated, hi]).unwrap();

        let inputs = [
            random_tensor(&mut rng, dtype, &shape),
            random_tensor(&mut rng, dtype, &shape),
        ];
        assert_matches_interpreter(backend, &function, &inputs, 1e-5);
    }
}

pub fn positive_domain_ops(backend: &Arc<dyn Backend>) {
    let mut rng = StdRng::seed_from_u64(23);
    let shape = [64];
    let mut builder = FunctionBuilder::new("positive");
    let x = builder.parameter(DType::F32, shape);
    let root = builder.unary(UnaryOp::Sqrt, x).unwrap();
    let log = builder.unary(UnaryOp::Log, root).unwrap();
    let function = builder.finish(&[root, log]).unwrap();
    let inputs = [random_positive_f32(&mut rng, &shape)];
    assert_matches_interpreter(backend, &function, &inputs, 1e-5);
}

pub fn integer_elementwise_chain(backend: &Arc<dyn Backend>) {
    let mut rng = StdRng::seed_from_u64(5);
    for dtype in [DType::I32, DType::I64] {
        let shape = [5, 9];
        let mut builder = FunctionBuilder::new("int_chain");
        let a = builder.parameter(dtype, shape);
        let b = builder.parameter(dtype, shape);
        let prod = builder.multiply(a, b).unwrap();
        let quotient = builder.divide(prod, b).unwrap();
        let hi = builder.maximum(quotient, a).unwrap();
        let magnitude = builder.unary(UnaryOp::Abs, hi).unwrap();
        let clipped = builder.unary(UnaryOp::Relu, b).unwrap();
        let out = builder.subtract(magnitude, clipped).unwrap();
        let function = builder.finish(&[out, quotient]).unwrap();
        let inputs = [
            random_tensor(&mut rng, dtype, &shape),
            random_tensor(&mut rng, dtype, &shape),
        ];
        assert_matches_interpreter(backend, &function, &inputs, 0.0);
    }
}

pub fn conversions(backend: &Arc<dyn Backend>) {
    let mut rng = StdRng::seed_from_u64(31);
    let shape = [4, 8];
    let mut builder = FunctionBuilder::new("conversions");
    let x = builder.parameter(DType::I32, shape);
    let bytes = builder.parameter(DType::U8, shape);
    let widened = builder.convert(x, DType::F64).unwrap();
    let halved = builder.convert(widened, DType::F32).unwrap();
    let back = builder.convert(halved, DType::I64).unwrap();
    let flags = builder.convert(x, DType::Boolean).unwrap();
    let wide_bytes = builder.convert(bytes, DType::I16).unwrap();
    let function = builder.finish(&[back, flags, wide_bytes]).unwrap();
    let inputs = [
        random_tensor(&mut rng, DType::I32, &shape),
        random_tensor(&mut rng, DType::U8, &shape),
    ];
    assert_matches_interpreter(backend, &function, &inputs, 0.0);
}

pub fn matrix_products(backend: &Arc<dyn Backend>) {
    if backend.kind() == BackendKind::Gpu {
        return;
    }
    let mut rng = StdRng::seed_from_u64(47);
    for (m, k, n) in [(1, 1, 1), (4, 5, 3), (7, 13, 9)] {
        let mut builder = FunctionBuilder::new("matmul");
        let a = builder.parameter(DType::F32, [m, k]);
        let b = builder.parameter(DType::F32, [k, n]);
        let product = builder.dot(a, b).unwrap();
        let function = builder.finish(&[product]).unwrap();
        let inputs = [
            random_tensor(&mut rng, DType::F32, &[m, k]),
            random_tensor(&mut rng, DType::F32, &[k, n]),
        ];
        assert_matches_interpreter(backend, &function, &inputs, 1e-4);
    }
}
