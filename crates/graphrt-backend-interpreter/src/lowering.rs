//! Lowering to a node-visitation schedule.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use graphrt::backend::{CallFrame, DebugTimerTable, DebugTimers, ExternalFunction, LoweringOptions};
use graphrt::op::{BinaryOp, CustomOp, UnaryOp};
use graphrt::{BackendResult, Function, NodeId, Op, Tensor, TensorSpec, ValueRef};

use crate::frame::InterpreterCallFrame;

pub(crate) enum StepKernel {
    Identity,
    Unary(UnaryOp),
    Binary(BinaryOp),
    Convert,
    Dot,
    Custom(Arc<dyn CustomOp>),
}

pub(crate) struct Step {
    pub name: String,
    pub node: NodeId,
    pub kernel: StepKernel,
    pub inputs: Vec<ValueRef>,
    pub outputs: Vec<TensorSpec>,
    /// Values whose last reader is this step.
    pub release: Vec<ValueRef>,
}

/// The interpreter's compiled artifact.
pub struct InterpretedFunction {
    pub(crate) steps: Vec<Step>,
    pub(crate) parameters: HashMap<NodeId, usize>,
    pub(crate) constants: HashMap<ValueRef, Tensor>,
    pub(crate) results: Vec<ValueRef>,
    pub(crate) timers: Option<DebugTimerTable>,
}

impl InterpretedFunction {
    pub(crate) fn lower(function: &Function, options: &LoweringOptions) -> BackendResult<Self> {
        let mut steps = Vec::new();
        let mut constants = HashMap::new();
        for id in function.live_nodes() {
            let node = function.node(id);
            let kernel = match node.op() {
                Op::Parameter => continue,
                Op::Constant(bytes) => {
                    let mut tensor = Tensor::from_spec(&node.outputs()[0].spec());
                    tensor.write_bytes(bytes)?;
                    constants.insert(node.output(0), tensor);
                    continue;
                }
                Op::Identity => StepKernel::Identity,
                Op::Unary(op) => StepKernel::Unary(*op),
                Op::Binary(op) => StepKernel::Binary(*op),
                Op::Convert(_) => StepKernel::Convert,
                Op::Dot => StepKernel::Dot,
                Op::Custom(op) => StepKernel::Custom(Arc::clone(op)),
            };
            // Built-in nodes with an empty output emit no step and no counter.
            let spec = node.outputs()[0].spec();
            if !matches!(kernel, StepKernel::Custom(_)) && spec.element_count() == 0 {
                tracing::trace!(node = node.name(), "skipping zero-element output");
                constants.insert(node.output(0), Tensor::from_spec(&spec));
                continue;
            }
            tracing::trace!(node = %node, "scheduled");
            steps.push(Step {
                name: node.name().to_string(),
                node: id,
                kernel,
                inputs: node.inputs().to_vec(),
                outputs: node.outputs().iter().map(|desc| desc.spec()).collect(),
                release: Vec::new(),
            });
        }

        let results: Vec<ValueRef> = function.results().to_vec();
        let mut last_reader: HashMap<ValueRef, usize> = HashMap::new();
        for (index, step) in steps.iter().enumerate() {
            for input in &step.inputs {
                last_reader.insert(*input, index);
            }
        }
        let scheduled: HashSet<NodeId> = steps.iter().map(|step| step.node).collect();
        for (value, index) in last_reader {
            if scheduled.contains(&value.node) && !results.contains(&value) {
                steps[index].release.push(value);
            }
        }

        let parameters = function
            .parameters()
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();
        let timers = options
            .emit_timing
            .then(|| DebugTimerTable::new(steps.iter().map(|step| step.name.clone()).collect()));

        Ok(InterpretedFunction {
            steps,
            parameters,
            constants,
            results,
            timers,
        })
    }
}

impl ExternalFunction for InterpretedFunction {
    fn make_call_frame(self: Arc<Self>) -> BackendResult<Box<dyn CallFrame>> {
        Ok(Box::new(InterpreterCallFrame::new(self)))
    }

    fn debug_timers(&self) -> Option<Box<dyn DebugTimers + '_>> {
        self.timers
            .as_ref()
            .map(|timers| Box::new(timers) as Box<dyn DebugTimers + '_>)
    }
}
