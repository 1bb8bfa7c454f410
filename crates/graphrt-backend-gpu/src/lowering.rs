//! Host-side lowering to a list of kernel launches.
//!
//! Nothing here touches the device: elementwise nodes are resolved to
//! primitive handles, values to planned slots, and the call frame binds both
//! to device resources later.

use std::collections::HashMap;
use std::sync::Arc;

use graphrt::backend::{CallFrame, DebugTimerTable, DebugTimers, ExternalFunction, LoweringOptions};
use graphrt::planner::{plan_memory, Location, MemoryPlan, PlanOptions};
use graphrt::{
    BackendError, BackendResult, CustomOp, DType, Function, Node, Op, TensorSpec, ValueRef,
};

use crate::cache::KernelCache;
use crate::emitter::{ElementwiseKind, SharedEmitter};
use crate::frame::GpuCallFrame;
use crate::options::GpuOptions;
use crate::GPU_IDENTITY;

/// Device allocations are at least 256-byte aligned, so pool offsets follow.
pub(crate) const POOL_ALIGNMENT: usize = 256;

/// Where a value lives while a call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Parameter(usize),
    Result(usize),
    Constant(usize),
    Pool(usize),
}

pub(crate) enum Launch {
    Elementwise {
        handle: usize,
        element_count: usize,
        inputs: Vec<Slot>,
        output: Slot,
    },
    Copy {
        src: Slot,
        dst: Slot,
        bytes: usize,
    },
    /// Runs a host kernel on staging copies of its operands.
    Custom {
        op: Arc<dyn CustomOp>,
        inputs: Vec<(Slot, TensorSpec)>,
        outputs: Vec<(Slot, TensorSpec)>,
    },
}

pub(crate) struct Step {
    pub name: String,
    pub launch: Launch,
}

/// The GPU backend's compiled artifact.
pub struct GpuFunction {
    pub(crate) name: String,
    pub(crate) steps: Vec<Step>,
    pub(crate) result_copies: Vec<(Slot, usize, usize)>,
    pub(crate) constants: Vec<Arc<[u8]>>,
    pub(crate) pool_size: usize,
    pub(crate) timers: Option<DebugTimerTable>,
    pub(crate) options: GpuOptions,
    pub(crate) emitter: SharedEmitter,
    pub(crate) kernels: Arc<KernelCache>,
}

impl GpuFunction {
    /// Primitive handles launched by this function, in launch order.
    pub fn primitive_handles(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter_map(|step| match step.launch {
                Launch::Elementwise { handle, .. } => Some(handle),
                _ => None,
            })
            .collect()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

struct Lowering<'a> {
    function: &'a Function,
    plan: MemoryPlan,
    emitter: &'a SharedEmitter,
    constant_slots: HashMap<ValueRef, usize>,
    constants: Vec<Arc<[u8]>>,
    steps: Vec<Step>,
}

pub(crate) fn lower(
    function: &Function,
    options: &LoweringOptions,
    gpu: &GpuOptions,
    emitter: &SharedEmitter,
    kernels: &Arc<KernelCache>,
) -> BackendResult<GpuFunction> {
    let plan = plan_memory(
        function,
        PlanOptions {
            alignment: POOL_ALIGNMENT,
            layout_alignment: None,
        },
    );
    let mut lowering = Lowering {
        function,
        plan,
        emitter,
        constant_slots: HashMap::new(),
        constants: Vec::new(),
        steps: Vec::new(),
    };
    lowering.collect_constants();
    let schedule = lowering.plan.schedule.clone();
    for id in schedule {
        lowering.lower_node(function.node(id))?;
    }

    let mut result_copies = Vec::new();
    for copy in &lowering.plan.result_copies {
        let bytes = function.descriptor(copy.value).spec().byte_len();
        result_copies.push((lowering.slot(copy.value)?, copy.result, bytes));
    }
    let timers = options.emit_timing.then(|| {
        DebugTimerTable::new(lowering.steps.iter().map(|step| step.name.clone()).collect())
    });

    Ok(GpuFunction {
        name: function.name().to_string(),
        steps: lowering.steps,
        result_copies,
        constants: lowering.constants,
        pool_size: lowering.plan.pool_size,
        timers,
        options: gpu.clone(),
        emitter: Arc::clone(emitter),
        kernels: Arc::clone(kernels),
    })
}

impl Lowering<'_> {
    fn collect_constants(&mut self) {
        for planned in &self.plan.values {
            if planned.location != Location::Constant {
                continue;
            }
            if let Op::Constant(bytes) = self.function.node(planned.value.node).op() {
                self.constant_slots.insert(planned.value, self.constants.len());
                self.constants.push(Arc::clone(bytes));
            }
        }
    }

    fn slot(&self, value: ValueRef) -> BackendResult<Slot> {
        match self.plan.location(value) {
            Some(Location::Parameter(index)) => Ok(Slot::Parameter(index)),
            Some(Location::Result(index)) => Ok(Slot::Result(index)),
            Some(Location::Pool { offset, .. }) => Ok(Slot::Pool(offset)),
            Some(Location::Constant) => self
                .constant_slots
                .get(&value)
                .map(|index| Slot::Constant(*index))
                .ok_or_else(|| BackendError::execution(format!("constant {value} has no data"))),
            None => Err(BackendError::execution(format!("value {value} was not planned"))),
        }
    }

    fn slots(&self, values: &[ValueRef]) -> BackendResult<Vec<Slot>> {
        values.iter().map(|value| self.slot(*value)).collect()
    }

    fn lower_node(&mut self, node: &Node) -> BackendResult<()> {
        tracing::trace!(node = %node, "lowering for GPU");
        let launch = match node.op() {
            Op::Parameter | Op::Constant(_) => return Ok(()),
            Op::Identity => {
                let bytes = node.outputs()[0].spec().byte_len();
                if bytes == 0 {
                    return Ok(());
                }
                Launch::Copy {
                    src: self.slot(node.inputs()[0])?,
                    dst: self.slot(node.output(0))?,
                    bytes,
                }
            }
            Op::Unary(op) => match self.elementwise(node, ElementwiseKind::Unary(*op))? {
                Some(launch) => launch,
                None => return Ok(()),
            },
            Op::Binary(op) => match self.elementwise(node, ElementwiseKind::Binary(*op))? {
                Some(launch) => launch,
                None => return Ok(()),
            },
            Op::Convert(_) => match self.elementwise(node, ElementwiseKind::Convert)? {
                Some(launch) => launch,
                None => return Ok(()),
            },
            Op::Dot => {
                return Err(BackendError::unimplemented(
                    GPU_IDENTITY,
                    node.name(),
                    node.kind(),
                    "no GPU kernel strategy for matrix products",
                ))
            }
            Op::Custom(op) => Launch::Custom {
                op: Arc::clone(op),
                inputs: node
                    .inputs()
                    .iter()
                    .map(|value| Ok((self.slot(*value)?, self.function.descriptor(*value).spec())))
                    .collect::<BackendResult<_>>()?,
                outputs: node
                    .outputs()
                    .iter()
                    .enumerate()
                    .map(|(index, desc)| Ok((self.slot(node.output(index))?, desc.spec())))
                    .collect::<BackendResult<_>>()?,
            },
        };
        self.steps.push(Step {
            name: node.name().to_string(),
            launch,
        });
        Ok(())
    }

    /// `None` when the output is empty and nothing needs to run.
    fn elementwise(&mut self, node: &Node, kind: ElementwiseKind) -> BackendResult<Option<Launch>> {
        if node.outputs().len() != 1 {
            return Err(BackendError::MultiOutputElementwise {
                name: node.name().to_string(),
                kind: node.kind().to_string(),
            });
        }
        let output = node.outputs()[0].spec();
        if output.element_count() == 0 {
            tracing::trace!(node = node.name(), "skipping zero-element output");
            return Ok(None);
        }
        let mut dtypes: Vec<DType> = node
            .inputs()
            .iter()
            .map(|value| self.function.descriptor(*value).dtype())
            .collect();
        dtypes.push(output.dtype);

        let handle = {
            let mut emitter = self
                .emitter
                .lock()
                .map_err(|_| BackendError::execution("GPU primitive emitter mutex poisoned"))?;
            emitter.build_elementwise(kind, &dtypes, &output.shape)
        };
        let handle = handle.ok_or_else(|| {
            BackendError::unimplemented(
                GPU_IDENTITY,
                node.name(),
                node.kind(),
                format!("no CUDA form for {}", dtypes[0]),
            )
        })?;
        Ok(Some(Launch::Elementwise {
            handle,
            element_count: output.element_count(),
            inputs: self.slots(node.inputs())?,
            output: self.slot(node.output(0))?,
        }))
    }
}

impl ExternalFunction for GpuFunction {
    fn make_call_frame(self: Arc<Self>) -> BackendResult<Box<dyn CallFrame>> {
        Ok(Box::new(GpuCallFrame::new(self)?))
    }

    fn debug_timers(&self) -> Option<Box<dyn DebugTimers + '_>> {
        self.timers
            .as_ref()
            .map(|timers| Box::new(timers) as Box<dyn DebugTimers + '_>)
    }
}
