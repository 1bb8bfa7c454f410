use std::collections::HashMap;
use std::sync::Arc;

use graphrt::op::dispatch_custom;
use graphrt::{Backend, BackendError, BackendResult, Tensor, ValueRef};

use crate::kernels;
use crate::lowering::{InterpretedFunction, Step, StepKernel};

pub(crate) struct InterpreterCallFrame {
    function: Arc<InterpretedFunction>,
}

impl InterpreterCallFrame {
    pub(crate) fn new(function: Arc<InterpretedFunction>) -> Self {
        InterpreterCallFrame { function }
    }
}

/// Values visible to a step: caller inputs, artifact constants and the
/// tensors computed so far in this call.
struct Values<'a> {
    function: &'a InterpretedFunction,
    inputs: &'a [&'a Tensor],
    computed: HashMap<ValueRef, Tensor>,
}

impl<'a> Values<'a> {
    fn get(&self, value: ValueRef) -> BackendResult<&Tensor> {
        if let Some(index) = self.function.parameters.get(&value.node) {
            return self.inputs.get(*index).copied().ok_or_else(|| {
                BackendError::Interface(format!("missing input {index}"))
            });
        }
        self.function
            .constants
            .get(&value)
            .or_else(|| self.computed.get(&value))
            .ok_or_else(|| BackendError::execution(format!("value {value} was not computed")))
    }
}

impl graphrt::backend::CallFrame for InterpreterCallFrame {
    fn call(
        &mut self,
        backend: &dyn Backend,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        let function = Arc::clone(&self.function);
        let mut values = Values {
            function: &function,
            inputs,
            computed: HashMap::new(),
        };
        for (index, step) in function.steps.iter().enumerate() {
            let produced = match &function.timers {
                Some(timers) => timers.time(index, || execute(step, backend, &values))?,
                None => execute(step, backend, &values)?,
            };
            for (output, tensor) in produced.into_iter().enumerate() {
                values.computed.insert(ValueRef::new(step.node, output), tensor);
            }
            for value in &step.release {
                values.computed.remove(value);
            }
        }
        for (output, value) in outputs.iter_mut().zip(&function.results) {
            output.copy_from(values.get(*value)?)?;
        }
        Ok(())
    }
}

fn execute(step: &Step, backend: &dyn Backend, values: &Values<'_>) -> BackendResult<Vec<Tensor>> {
    let args = step
        .inputs
        .iter()
        .map(|value| values.get(*value))
        .collect::<BackendResult<Vec<&Tensor>>>()?;
    let mut outputs: Vec<Tensor> = step.outputs.iter().map(Tensor::from_spec).collect();
    match &step.kernel {
        StepKernel::Identity => outputs[0].copy_from(args[0])?,
        StepKernel::Unary(op) => kernels::unary(*op, args[0], &mut outputs[0])?,
        StepKernel::Binary(op) => kernels::binary(*op, args[0], args[1], &mut outputs[0])?,
        StepKernel::Convert => kernels::convert(args[0], &mut outputs[0])?,
        StepKernel::Dot => kernels::dot(args[0], args[1], &mut outputs[0])?,
        StepKernel::Custom(op) => {
            let mut refs: Vec<&mut Tensor> = outputs.iter_mut().collect();
            dispatch_custom(op.as_ref(), &step.name, backend, &mut refs, &args)?;
        }
    }
    Ok(outputs)
}
