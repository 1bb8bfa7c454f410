#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use graphrt::backend::{
    CallFrame, Compiler, DebugTimerTable, DebugTimers, ExternalFunction, LoweringOptions,
    RuntimeBackend,
};
use graphrt::op::dispatch_custom;
use graphrt::tensor::TensorSpec;
use graphrt::{
    Backend, BackendError, BackendKind, BackendResult, DType, Function, GraphError, GraphResult,
    Op, Tensor, ValueRef,
};

/// Test double: counts lowerings and runs Identity and custom nodes only.
pub struct CountingCompiler {
    kind: BackendKind,
    lowerings: Arc<AtomicUsize>,
    fail_next: Mutex<bool>,
}

impl CountingCompiler {
    pub fn new(kind: BackendKind) -> Self {
        CountingCompiler {
            kind,
            lowerings: Arc::new(AtomicUsize::new(0)),
            fail_next: Mutex::new(false),
        }
    }

    pub fn lowerings(&self) -> usize {
        self.lowerings.load(Ordering::SeqCst)
    }

    pub fn fail_next_lowering(&self) {
        *self.fail_next.lock().expect("flag") = true;
    }
}

impl Compiler for CountingCompiler {
    fn kind(&self) -> BackendKind {
        self.kind.clone()
    }

    fn lower(
        &self,
        function: &Function,
        options: &LoweringOptions,
    ) -> BackendResult<Arc<dyn ExternalFunction>> {
        self.lowerings.fetch_add(1, Ordering::SeqCst);
        if std::mem::take(&mut *self.fail_next.lock().expect("flag")) {
            return Err(BackendError::execution("injected lowering failure"));
        }
        let schedule = function.live_nodes();
        for id in &schedule {
            let node = function.node(*id);
            if !matches!(node.op(), Op::Parameter | Op::Identity | Op::Custom(_)) {
                return Err(BackendError::unimplemented(
                    self.kind.identity(),
                    node.name(),
                    node.kind(),
                    "test compiler",
                ));
            }
        }
        let timers = options.emit_timing.then(|| {
            DebugTimerTable::new(
                schedule
                    .iter()
                    .map(|id| function.node(*id).name().to_string())
                    .collect(),
            )
        });
        Ok(Arc::new(Lowered {
            function: function.clone(),
            schedule: schedule.into_iter().map(|id| id.index()).collect(),
            timers,
        }))
    }
}

struct Lowered {
    function: Function,
    schedule: Vec<usize>,
    timers: Option<DebugTimerTable>,
}

impl ExternalFunction for Lowered {
    fn make_call_frame(self: Arc<Self>) -> BackendResult<Box<dyn CallFrame>> {
        Ok(Box::new(Frame { lowered: self }))
    }

    fn debug_timers(&self) -> Option<Box<dyn DebugTimers + '_>> {
        self.timers
            .as_ref()
            .map(|timers| Box::new(timers) as Box<dyn DebugTimers + '_>)
    }
}

struct Frame {
    lowered: Arc<Lowered>,
}

impl CallFrame for Frame {
    fn call(
        &mut self,
        backend: &dyn Backend,
        outputs: &mut [&mut Tensor],
        inputs: &[&Tensor],
    ) -> BackendResult<()> {
        let function = &self.lowered.function;
        let mut values: HashMap<ValueRef, Tensor> = HashMap::new();
        for (param, input) in function.parameters().iter().zip(inputs) {
            values.insert(ValueRef::new(*param, 0), (*input).clone());
        }
        for (step, index) in self.lowered.schedule.iter().enumerate() {
            let node = &function.nodes()[*index];
            let run = |values: &mut HashMap<ValueRef, Tensor>| -> BackendResult<()> {
                match node.op() {
                    Op::Parameter => Ok(()),
                    Op::Identity => {
                        let copy = values[&node.inputs()[0]].clone();
                        values.insert(node.output(0), copy);
                        Ok(())
                    }
                    Op::Custom(op) => {
                        let mut outs: Vec<Tensor> = node
                            .outputs()
                            .iter()
                            .map(|desc| Tensor::from_spec(&desc.spec()))
                            .collect();
                        {
                            let ins: Vec<&Tensor> =
                                node.inputs().iter().map(|v| &values[v]).collect();
                            let mut out_refs: Vec<&mut Tensor> = outs.iter_mut().collect();
                            dispatch_custom(op.as_ref(), node.name(), backend, &mut out_refs, &ins)?;
                        }
                        for (idx, tensor) in outs.into_iter().enumerate() {
                            values.insert(node.output(idx), tensor);
                        }
                        Ok(())
                    }
                    _ => Err(BackendError::execution("unreachable op")),
                }
            };
            match &self.lowered.timers {
                Some(timers) => timers.time(step, || run(&mut values))?,
                None => run(&mut values)?,
            }
        }
        for (output, value) in outputs.iter_mut().zip(function.results()) {
            output.copy_from(&values[value])?;
        }
        Ok(())
    }
}

pub type CountingBackend = RuntimeBackend<CountingCompiler>;

pub fn counting_backend(kind: BackendKind) -> CountingBackend {
    RuntimeBackend::new(CountingCompiler::new(kind))
}

/// `(a + b) * c` over three f32 operands of identical shape.
pub struct AbcOp {
    outputs: Vec<TensorSpec>,
    exec: graphrt::ExecTable,
}

impl AbcOp {
    pub fn new(args: &[TensorSpec]) -> GraphResult<Self> {
        graphrt::op::check_arity("ABC", 3, args.len())?;
        graphrt::op::validate_uniform_operands("ABC", args)?;
        if args[0].dtype != DType::F32 {
            return Err(GraphError::invalid("ABC", "only f32 operands are supported"));
        }
        let mut exec = graphrt::ExecTable::new();
        exec.register_exec("INTERPRETER", |_backend: &dyn Backend, outputs: &mut [&mut Tensor], inputs: &[&Tensor]| {
            let a = inputs[0].as_slice::<f32>()?;
            let b = inputs[1].as_slice::<f32>()?;
            let c = inputs[2].as_slice::<f32>()?;
            let out = outputs[0].as_mut_slice::<f32>()?;
            for i in 0..out.len() {
                out[i] = (a[i] + b[i]) * c[i];
            }
            Ok(())
        });
        Ok(AbcOp {
            outputs: vec![args[0].clone()],
            exec,
        })
    }
}

impl graphrt::CustomOp for AbcOp {
    fn kind(&self) -> &str {
        "ABC"
    }

    fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn exec_table(&self) -> &graphrt::ExecTable {
        &self.exec
    }

    fn copy_with_new_args(&self, args: &[TensorSpec]) -> GraphResult<Arc<dyn graphrt::CustomOp>> {
        if args.len() != 3 {
            return Err(GraphError::ArityMismatch {
                op: "AbcOp".into(),
                expected: 3,
                actual: args.len(),
            });
        }
        Ok(Arc::new(AbcOp::new(args)?))
    }
}
