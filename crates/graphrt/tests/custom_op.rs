mod common;

use common::AbcOp;
use graphrt::{DType, FunctionBuilder, GraphError, Op};

#[test]
fn construction_rejects_mismatched_element_types() {
    let mut builder = FunctionBuilder::new("abc");
    let a = builder.parameter(DType::F32, [2, 2]);
    let b = builder.parameter(DType::F64, [2, 2]);
    let c = builder.parameter(DType::F32, [2, 2]);
    let err = builder.custom(&[a, b, c], AbcOp::new).expect_err("types differ");
    assert!(matches!(err, GraphError::ElementTypeMismatch { .. }));
}

#[test]
fn construction_rejects_mismatched_shapes() {
    let mut builder = FunctionBuilder::new("abc");
    let a = builder.parameter(DType::F32, [2, 2]);
    let b = builder.parameter(DType::F32, [4]);
    let err = builder.custom(&[a, a, b], AbcOp::new).expect_err("shapes differ");
    assert!(matches!(err, GraphError::ShapeMismatch { .. }));
}

#[test]
fn copy_with_new_args_enforces_arity() {
    let mut builder = FunctionBuilder::new("abc");
    let a = builder.parameter(DType::F32, [2, 2]);
    let b = builder.parameter(DType::F32, [2, 2]);
    let c = builder.parameter(DType::F32, [2, 2]);
    let abc = builder.custom(&[a, b, c], AbcOp::new).expect("abc")[0];

    let err = builder
        .copy_with_new_args(abc.node, &[a, b])
        .expect_err("two operands");
    assert_eq!(
        err.to_string(),
        "incorrect number of arguments for ABC: expected 3, got 2"
    );

    let copy = builder
        .copy_with_new_args(abc.node, &[c, a, b])
        .expect("same arity");
    let node = builder.node(copy).expect("copied node");
    assert_eq!(node.inputs(), &[c, a, b]);
    assert_eq!(node.kind(), "ABC");
    assert_eq!(node.outputs()[0].spec(), builder.spec(abc).expect("spec"));
    let Op::Custom(op) = node.op() else {
        panic!("copy is not a custom op");
    };
    assert_eq!(op.exec_table().identities(), vec!["INTERPRETER"]);
}

#[test]
fn custom_copy_reports_its_own_arity_error() {
    let a = graphrt::TensorSpec::new(DType::F32, [1]);
    let op = AbcOp::new(&[a.clone(), a.clone(), a.clone()]).expect("abc");
    let err = graphrt::CustomOp::copy_with_new_args(&op, &[a])
        .err()
        .expect("arity error");
    assert_eq!(
        err,
        GraphError::ArityMismatch {
            op: "AbcOp".into(),
            expected: 3,
            actual: 1
        }
    );
}
