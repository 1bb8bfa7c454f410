//! Custom operations used by the conformance suite.

use std::sync::Arc;

use graphrt::op::{check_arity, validate_uniform_operands};
use graphrt::{
    Backend, BackendResult, CustomOp, DType, ExecTable, GraphError, GraphResult, Tensor,
    TensorSpec,
};

/// Identities every in-tree backend registers under.
pub const IN_TREE_IDENTITIES: [&str; 3] = ["INTERPRETER", "CPU", "GPU"];

fn abc_kernel(
    _backend: &dyn Backend,
    outputs: &mut [&mut Tensor],
    inputs: &[&Tensor],
) -> BackendResult<()> {
    let a = inputs[0].as_slice::<f32>()?;
    let b = inputs[1].as_slice::<f32>()?;
    let c = inputs[2].as_slice::<f32>()?;
    let out = outputs[0].as_mut_slice::<f32>()?;
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (a[i] + b[i]) * c[i];
    }
    Ok(())
}

/// Elementwise `(a + b) * c` over three f32 operands of one shape.
pub struct AbcOp {
    outputs: Vec<TensorSpec>,
    exec: ExecTable,
}

impl AbcOp {
    pub fn new(args: &[TensorSpec]) -> GraphResult<Self> {
        check_arity("ABC", 3, args.len())?;
        validate_uniform_operands("ABC", args)?;
        if args[0].dtype != DType::F32 {
            return Err(GraphError::invalid("ABC", "only f32 operands are supported"));
        }
        let mut exec = ExecTable::new();
        for identity in IN_TREE_IDENTITIES {
            exec.register_exec(identity, abc_kernel);
        }
        Ok(AbcOp {
            outputs: vec![args[0].clone()],
            exec,
        })
    }
}

impl CustomOp for AbcOp {
    fn kind(&self) -> &str {
        "ABC"
    }

    fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn exec_table(&self) -> &ExecTable {
        &self.exec
    }

    fn copy_with_new_args(&self, args: &[TensorSpec]) -> GraphResult<Arc<dyn CustomOp>> {
        check_arity("ABC", 3, args.len())?;
        Ok(Arc::new(AbcOp::new(args)?))
    }
}

/// Zero-operand operation with no kernels at all.
pub struct UnsupportedOp {
    outputs: Vec<TensorSpec>,
    exec: ExecTable,
}

impl UnsupportedOp {
    pub fn new(args: &[TensorSpec]) -> GraphResult<Self> {
        check_arity("Unsupported", 0, args.len())?;
        Ok(UnsupportedOp {
            outputs: vec![TensorSpec::new(DType::F32, [1])],
            exec: ExecTable::new(),
        })
    }
}

impl CustomOp for UnsupportedOp {
    fn kind(&self) -> &str {
        "Unsupported"
    }

    fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn exec_table(&self) -> &ExecTable {
        &self.exec
    }

    fn copy_with_new_args(&self, args: &[TensorSpec]) -> GraphResult<Arc<dyn CustomOp>> {
        Ok(Arc::new(UnsupportedOp::new(args)?))
    }
}

/// Two outputs from one f32 operand: the operand itself and its negation.
pub struct SplitSignOp {
    outputs: Vec<TensorSpec>,
    exec: ExecTable,
}

impl SplitSignOp {
    pub fn new(args: &[TensorSpec]) -> GraphResult<Self> {
        check_arity("SplitSign", 1, args.len())?;
        if args[0].dtype != DType::F32 {
            return Err(GraphError::invalid("SplitSign", "only f32 operands are supported"));
        }
        let mut exec = ExecTable::new();
        for identity in IN_TREE_IDENTITIES {
            exec.register_exec(identity, |_: &dyn Backend, outputs: &mut [&mut Tensor], inputs: &[&Tensor]| {
                let input = inputs[0].as_slice::<f32>()?.to_vec();
                outputs[0].write(&input)?;
                let negated: Vec<f32> = input.iter().map(|x| -x).collect();
                outputs[1].write(&negated)
            });
        }
        Ok(SplitSignOp {
            outputs: vec![args[0].clone(), args[0].clone()],
            exec,
        })
    }
}

impl CustomOp for SplitSignOp {
    fn kind(&self) -> &str {
        "SplitSign"
    }

    fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn exec_table(&self) -> &ExecTable {
        &self.exec
    }

    fn copy_with_new_args(&self, args: &[TensorSpec]) -> GraphResult<Arc<dyn CustomOp>> {
        Ok(Arc::new(SplitSignOp::new(args)?))
    }
}
