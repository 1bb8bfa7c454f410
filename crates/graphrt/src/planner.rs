//! Static memory planning.
//!
//! Every value a function computes gets a home before the first call:
//! parameters and results are bound to the caller's tensors, constants to the
//! artifact, and everything else to an offset in a single backend-owned pool.
//! Offsets are reused once a value's last consumer has run.

use std::collections::HashMap;

use crate::graph::{Function, NodeId, ValueRef};
use crate::op::Op;
use crate::tensor::{round_up, DenseLayout, TensorDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub start: usize,
    pub end: usize,
}

impl LiveRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Where a value's bytes live during a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// The caller's input tensor at this parameter index.
    Parameter(usize),
    /// The caller's output tensor at this result index.
    Result(usize),
    /// Literal data owned by the artifact.
    Constant,
    /// `size` bytes at `offset` in the pool.
    Pool { offset: usize, size: usize },
}

#[derive(Debug, Clone)]
pub struct PlannedValue {
    pub value: ValueRef,
    pub descriptor: TensorDescriptor,
    pub location: Location,
    pub live_range: LiveRange,
}

/// A result whose bytes have to be copied into the output tensor after the
/// schedule ran: it aliases a parameter, a constant or another result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCopy {
    pub value: ValueRef,
    pub result: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Alignment of every pool offset, in bytes.
    pub alignment: usize,
    /// When set, binds a [`DenseLayout`] with this allocation alignment to each
    /// planned descriptor, so pool sizes include the layout's padding.
    pub layout_alignment: Option<usize>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        PlanOptions {
            alignment: 64,
            layout_alignment: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPlan {
    /// Live nodes in execution order.
    pub schedule: Vec<NodeId>,
    pub values: Vec<PlannedValue>,
    pub result_copies: Vec<ResultCopy>,
    pub pool_size: usize,
    pub alignment: usize,
    index: HashMap<ValueRef, usize>,
}

impl MemoryPlan {
    pub fn value(&self, value: ValueRef) -> Option<&PlannedValue> {
        self.index.get(&value).map(|idx| &self.values[*idx])
    }

    pub fn location(&self, value: ValueRef) -> Option<Location> {
        self.value(value).map(|planned| planned.location)
    }

    pub fn pool_values(&self) -> impl Iterator<Item = &PlannedValue> {
        self.values
            .iter()
            .filter(|planned| matches!(planned.location, Location::Pool { .. }))
    }
}

pub fn plan_memory(function: &Function, options: PlanOptions) -> MemoryPlan {
    let alignment = options.alignment.max(1);
    let schedule = function.live_nodes();
    let step_of: HashMap<NodeId, usize> = schedule
        .iter()
        .enumerate()
        .map(|(step, id)| (*id, step))
        .collect();

    let mut locations: HashMap<ValueRef, Location> = HashMap::new();
    for (index, id) in function.parameters().iter().enumerate() {
        locations.insert(ValueRef::new(*id, 0), Location::Parameter(index));
    }

    let mut result_copies = Vec::new();
    for (result, value) in function.results().iter().enumerate() {
        let node = function.node(value.node);
        let writable = !matches!(node.op(), Op::Parameter | Op::Constant(_));
        if writable && !locations.contains_key(value) {
            locations.insert(*value, Location::Result(result));
        } else {
            result_copies.push(ResultCopy {
                value: *value,
                result,
            });
        }
    }

    // Last step at which each value is read. Values copied out after the schedule
    // stay live to the end.
    let end_of_schedule = schedule.len();
    let mut last_use: HashMap<ValueRef, usize> = HashMap::new();
    for id in &schedule {
        let step = step_of[id];
        for input in function.node(*id).inputs() {
            let entry = last_use.entry(*input).or_insert(step);
            *entry = (*entry).max(step);
        }
    }
    for copy in &result_copies {
        last_use.insert(copy.value, end_of_schedule);
    }

    let mut values = Vec::new();
    let mut index = HashMap::new();
    let mut active: Vec<(LiveRange, usize, usize)> = Vec::new();
    let mut pool_size = 0usize;

    for id in &schedule {
        let node = function.node(*id);
        let step = step_of[id];
        for (output, base) in node.outputs().iter().enumerate() {
            let value = ValueRef::new(*id, output);
            let mut descriptor = base.clone();
            if let Some(layout_alignment) = options.layout_alignment {
                descriptor.set_layout(Box::new(DenseLayout::with_alignment(
                    descriptor.dtype(),
                    descriptor.shape().clone(),
                    layout_alignment,
                )));
            }
            let live_range = LiveRange::new(step, last_use.get(&value).copied().unwrap_or(step));
            let location = match (node.op(), locations.get(&value)) {
                (_, Some(location)) => *location,
                (Op::Constant(_), None) => Location::Constant,
                _ => {
                    let size = round_up(descriptor.size(), alignment);
                    active.retain(|(range, _, _)| range.end >= step);
                    let offset = first_fit(&active, size, alignment);
                    active.push((live_range, offset, size));
                    pool_size = pool_size.max(offset + size);
                    descriptor.set_pool_offset(offset);
                    Location::Pool { offset, size }
                }
            };
            index.insert(value, values.len());
            values.push(PlannedValue {
                value,
                descriptor,
                location,
                live_range,
            });
        }
    }

    tracing::debug!(
        function = %function.id(),
        pool_size,
        values = values.len(),
        copies = result_copies.len(),
        "planned memory"
    );

    MemoryPlan {
        schedule,
        values,
        result_copies,
        pool_size,
        alignment,
        index,
    }
}

/// Lowest aligned offset where `size` bytes fit between the live blocks.
fn first_fit(active: &[(LiveRange, usize, usize)], size: usize, alignment: usize) -> usize {
    let mut blocks: Vec<(usize, usize)> = active
        .iter()
        .filter(|(_, _, len)| *len > 0)
        .map(|(_, offset, len)| (*offset, *len))
        .collect();
    blocks.sort_unstable();
    let mut candidate = 0usize;
    for (offset, len) in blocks {
        if candidate + size <= offset {
            break;
        }
        candidate = candidate.max(round_up(offset + len, alignment));
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FunctionBuilder;
    use crate::op::UnaryOp;
    use crate::tensor::DType;

    fn chain(len: usize) -> Function {
        let mut builder = FunctionBuilder::new("chain");
        let x = builder.parameter(DType::F32, [16]);
        let mut value = x;
        for _ in 0..len {
            value = builder.unary(UnaryOp::Negative, value).expect("neg");
        }
        builder.finish(&[value]).expect("finish")
    }

    #[test]
    fn chain_reuses_two_slots() {
        let function = chain(6);
        let plan = plan_memory(&function, PlanOptions::default());
        // Five temporaries, at most two alive at once, each 64 bytes.
        assert_eq!(plan.pool_values().count(), 5);
        assert_eq!(plan.pool_size, 128);
        let result = function.results()[0];
        assert_eq!(plan.location(result), Some(Location::Result(0)));
    }

    #[test]
    fn simultaneously_live_values_never_overlap() {
        let mut builder = FunctionBuilder::new("fan");
        let x = builder.parameter(DType::F64, [3, 3]);
        let a = builder.unary(UnaryOp::Abs, x).expect("abs");
        let b = builder.unary(UnaryOp::Negative, x).expect("neg");
        let c = builder.unary(UnaryOp::Relu, x).expect("relu");
        let ab = builder.add(a, b).expect("add");
        let abc = builder.multiply(ab, c).expect("mul");
        let function = builder.finish(&[abc]).expect("finish");
        let plan = plan_memory(&function, PlanOptions::default());

        let pool: Vec<&PlannedValue> = plan.pool_values().collect();
        for (i, lhs) in pool.iter().enumerate() {
            for rhs in &pool[i + 1..] {
                if lhs.live_range.overlaps(&rhs.live_range) {
                    let (Location::Pool { offset: lo, size: ls }, Location::Pool { offset: ro, size: rs }) =
                        (lhs.location, rhs.location)
                    else {
                        unreachable!()
                    };
                    assert!(lo + ls <= ro || ro + rs <= lo, "{lhs:?} overlaps {rhs:?}");
                }
            }
        }
        for planned in &pool {
            assert_eq!(
                planned.descriptor.pool_offset(),
                match planned.location {
                    Location::Pool { offset, .. } => Some(offset),
                    _ => None,
                }
            );
        }
    }

    #[test]
    fn layout_padding_drives_pool_size() {
        let function = chain(2);
        let plain = plan_memory(
            &function,
            PlanOptions {
                alignment: 1,
                layout_alignment: None,
            },
        );
        let padded = plan_memory(
            &function,
            PlanOptions {
                alignment: 1,
                layout_alignment: Some(256),
            },
        );
        assert_eq!(plain.pool_size, 64);
        assert_eq!(padded.pool_size, 256);
    }

    #[test]
    fn aliasing_results_are_copied() {
        let mut builder = FunctionBuilder::new("alias");
        let x = builder.parameter(DType::I32, [2]);
        let k = builder.constant([2], &[1i32, 2]).expect("constant");
        let y = builder.add(x, k).expect("add");
        let function = builder.finish(&[x, y, k, y]).expect("finish");
        let plan = plan_memory(&function, PlanOptions::default());
        assert_eq!(plan.location(x), Some(Location::Parameter(0)));
        assert_eq!(plan.location(k), Some(Location::Constant));
        assert_eq!(plan.location(y), Some(Location::Result(1)));
        assert_eq!(
            plan.result_copies,
            vec![
                ResultCopy { value: x, result: 0 },
                ResultCopy { value: k, result: 2 },
                ResultCopy { value: y, result: 3 },
            ]
        );
        assert_eq!(plan.pool_size, 0);
    }
}
