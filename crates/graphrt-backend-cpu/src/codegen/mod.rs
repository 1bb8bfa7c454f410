//! Lowering a planned [`Function`] to one C translation unit.
//!
//! The unit exports `graphrt_entry(ctx, inputs, outputs)`. Every value is
//! addressed through a typed pointer bound once at the top of the entry:
//! caller buffers for parameters and results, static arrays for constants and
//! `ctx->pool + offset` for everything else.

mod kernels;
mod profile;
mod utils;

use std::sync::Arc;

use graphrt::planner::{Location, MemoryPlan};
use graphrt::{BackendError, BackendResult, CustomOp, Function, Node, Op, TensorSpec, ValueRef};

pub(crate) use profile::{
    TIMER_CALL_COUNT_SYMBOL, TIMER_COUNT_SYMBOL, TIMER_MICROSECONDS_SYMBOL, TIMER_NAME_SYMBOL,
};

use crate::CPU_IDENTITY;
use profile::{emit_timer_begin, emit_timer_end, TimerTable};
use utils::{byte_initializer, c_type, emit_flat_loop, push_block, push_line};

pub(crate) const ENTRY_SYMBOL: &[u8] = b"graphrt_entry\0";

/// A custom node the generated code calls back into Rust for.
pub(crate) struct CustomNode {
    pub name: String,
    pub op: Arc<dyn CustomOp>,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

pub(crate) struct CModule {
    pub source: String,
    pub custom_nodes: Vec<CustomNode>,
    pub timer_names: Vec<String>,
}

const PRELUDE: &str = r#"
    #define _POSIX_C_SOURCE 199309L
    #include <math.h>
    #include <stddef.h>
    #include <stdint.h>
    #include <string.h>
    #include <time.h>

    typedef int (*graphrt_custom_fn)(void* user, uint32_t node, void* const* inputs, void* const* outputs);

    typedef struct {
      void* user;
      graphrt_custom_fn invoke_custom;
      char* pool;
    } graphrt_ctx;

"#;

fn var(value: ValueRef) -> String {
    format!("v{}_{}", value.node.index(), value.output)
}

fn const_name(value: ValueRef) -> String {
    format!("graphrt_const_{}_{}", value.node.index(), value.output)
}

struct Emitter<'a> {
    function: &'a Function,
    plan: &'a MemoryPlan,
    body: String,
    timers: TimerTable,
    custom_nodes: Vec<CustomNode>,
}

/// Generates the translation unit. `tag` is written into a leading comment so
/// that otherwise identical sources get distinct fingerprints.
pub(crate) fn generate_module(
    function: &Function,
    plan: &MemoryPlan,
    emit_timing: bool,
    tag: Option<&str>,
) -> BackendResult<CModule> {
    let mut emitter = Emitter {
        function,
        plan,
        body: String::new(),
        timers: TimerTable::new(emit_timing),
        custom_nodes: Vec::new(),
    };
    for id in &plan.schedule {
        emitter.emit_node(function.node(*id))?;
    }
    emitter.emit_result_copies();

    let mut source = String::new();
    push_line(&mut source, 0, &format!("/* graphrt cpu artifact: {} */", function.name()));
    if let Some(tag) = tag {
        push_line(&mut source, 0, &format!("/* instance {tag} */"));
    }
    push_block(&mut source, 0, PRELUDE);
    source.push('\n');
    emitter.emit_constants(&mut source);
    source.push_str(&emitter.timers.emit_definitions());
    push_line(
        &mut source,
        0,
        "int graphrt_entry(graphrt_ctx* ctx, void* const* inputs, void* const* outputs) {",
    );
    push_line(&mut source, 1, "char* pool = ctx->pool;");
    push_line(&mut source, 1, "(void)pool; (void)inputs; (void)outputs;");
    emitter.emit_bindings(&mut source);
    source.push_str(&emitter.body);
    push_line(&mut source, 1, "return 0;");
    push_line(&mut source, 0, "}");

    Ok(CModule {
        source,
        custom_nodes: emitter.custom_nodes,
        timer_names: emitter.timers.names().to_vec(),
    })
}

impl Emitter<'_> {
    fn emit_constants(&self, source: &mut String) {
        for planned in &self.plan.values {
            if planned.location != Location::Constant {
                continue;
            }
            let Op::Constant(bytes) = self.function.node(planned.value.node).op() else {
                continue;
            };
            let len = bytes.len().max(1);
            let block = format!(
                "static _Alignas(64) const uint8_t {}[{len}] = {{\n  {}\n}};\n",
                const_name(planned.value),
                byte_initializer(bytes)
            );
            push_block(source, 0, &block);
            source.push('\n');
        }
    }

    fn emit_bindings(&self, source: &mut String) {
        for planned in &self.plan.values {
            let ty = c_type(planned.descriptor.dtype());
            let base = match planned.location {
                Location::Parameter(index) => format!("inputs[{index}]"),
                Location::Result(index) => format!("outputs[{index}]"),
                Location::Constant => const_name(planned.value),
                Location::Pool { offset, .. } => format!("(pool + {offset})"),
            };
            push_line(
                source,
                1,
                &format!("{ty}* {} = ({ty}*){base};", var(planned.value)),
            );
        }
    }

    fn emit_result_copies(&mut self) {
        for copy in &self.plan.result_copies {
            let bytes = self.function.descriptor(copy.value).spec().byte_len();
            if bytes == 0 {
                continue;
            }
            push_line(
                &mut self.body,
                1,
                &format!("memcpy(outputs[{}], {}, {bytes});", copy.result, var(copy.value)),
            );
        }
    }

    /// Wraps `emit` in a block charged to the node's timer.
    fn emit_timed<F>(&mut self, node: &Node, emit: F)
    where
        F: FnOnce(&mut String),
    {
        let timer = self.timers.register(node.name());
        push_line(&mut self.body, 1, &format!("{{ /* {} */", node.name()));
        emit_timer_begin(&mut self.body, timer);
        emit(&mut self.body);
        emit_timer_end(&mut self.body, timer);
        push_line(&mut self.body, 1, "}");
    }

    fn emit_node(&mut self, node: &Node) -> BackendResult<()> {
        tracing::trace!(node = %node, "emitting C");
        match node.op() {
            Op::Parameter | Op::Constant(_) => Ok(()),
            Op::Identity => {
                let out = var(node.output(0));
                let input = var(node.inputs()[0]);
                let bytes = node.outputs()[0].spec().byte_len();
                if bytes == 0 {
                    return Ok(());
                }
                self.emit_timed(node, |body| {
                    push_line(body, 2, &format!("memcpy({out}, {input}, {bytes});"));
                });
                Ok(())
            }
            Op::Unary(op) => {
                let dtype = self.elementwise_dtype(node)?;
                let expr = kernels::unary_expr(*op, dtype, &format!("{}[i]", var(node.inputs()[0])))
                    .ok_or_else(|| unsupported(node, &format!("{} is not defined for {dtype}", op.name())))?;
                self.emit_elementwise(node, &expr);
                Ok(())
            }
            Op::Binary(op) => {
                let dtype = self.elementwise_dtype(node)?;
                let lhs = format!("{}[i]", var(node.inputs()[0]));
                let rhs = format!("{}[i]", var(node.inputs()[1]));
                let expr = kernels::binary_expr(*op, dtype, &lhs, &rhs)
                    .ok_or_else(|| unsupported(node, &format!("{} is not defined for {dtype}", op.name())))?;
                self.emit_elementwise(node, &expr);
                Ok(())
            }
            Op::Convert(to) => {
                let from = self.elementwise_dtype(node)?;
                let input = format!("{}[i]", var(node.inputs()[0]));
                let expr = kernels::convert_expr(from, *to, &input);
                self.emit_elementwise(node, &expr);
                Ok(())
            }
            Op::Dot => self.emit_dot(node),
            Op::Custom(op) => {
                self.emit_custom(node, op);
                Ok(())
            }
        }
    }

    /// Operand element type of an elementwise node, rejecting multi-output ones.
    fn elementwise_dtype(&self, node: &Node) -> BackendResult<graphrt::DType> {
        if node.outputs().len() != 1 {
            return Err(BackendError::MultiOutputElementwise {
                name: node.name().to_string(),
                kind: node.kind().to_string(),
            });
        }
        Ok(self.function.descriptor(node.inputs()[0]).dtype())
    }

    fn emit_elementwise(&mut self, node: &Node, expr: &str) {
        let count = node.outputs()[0].spec().element_count();
        if count == 0 {
            tracing::trace!(node = node.name(), "skipping zero-element output");
            return;
        }
        let out = var(node.output(0));
        let statement = format!("{out}[i] = {expr};");
        self.emit_timed(node, |body| emit_flat_loop(body, 2, "i", count, &statement));
    }

    fn emit_dot(&mut self, node: &Node) -> BackendResult<()> {
        let lhs = self.function.descriptor(node.inputs()[0]);
        let rhs = self.function.descriptor(node.inputs()[1]);
        let (m, k) = (lhs.shape().dims()[0], lhs.shape().dims()[1]);
        let n = rhs.shape().dims()[1];
        let dtype = lhs.dtype();
        if dtype == graphrt::DType::Boolean {
            return Err(unsupported(node, "boolean matrix products"));
        }
        if m * n == 0 {
            return Ok(());
        }
        let (out, a, b) = (var(node.output(0)), var(node.inputs()[0]), var(node.inputs()[1]));
        self.emit_timed(node, |body| kernels::emit_dot(body, dtype, &out, &a, &b, (m, k, n)));
        Ok(())
    }

    fn emit_custom(&mut self, node: &Node, op: &Arc<dyn CustomOp>) {
        let index = self.custom_nodes.len();
        self.custom_nodes.push(CustomNode {
            name: node.name().to_string(),
            op: Arc::clone(op),
            inputs: node
                .inputs()
                .iter()
                .map(|value| self.function.descriptor(*value).spec())
                .collect(),
            outputs: node.outputs().iter().map(|desc| desc.spec()).collect(),
        });
        let pointer_list = |values: Vec<ValueRef>| -> (usize, String) {
            if values.is_empty() {
                (1, "0".to_string())
            } else {
                let names: Vec<String> = values.into_iter().map(var).collect();
                (names.len(), names.join(", "))
            }
        };
        let (in_len, ins) = pointer_list(node.inputs().to_vec());
        let (out_len, outs) =
            pointer_list((0..node.outputs().len()).map(|o| node.output(o)).collect());
        let block = format!(
            r#"
                void* graphrt_in[{in_len}] = {{{ins}}};
                void* graphrt_out[{out_len}] = {{{outs}}};
                int status = ctx->invoke_custom(ctx->user, {index}u, graphrt_in, graphrt_out);
                if (status != 0) {{ return status; }}
            "#
        );
        self.emit_timed(node, |body| push_block(body, 2, &block));
    }
}

fn unsupported(node: &Node, reason: &str) -> BackendError {
    BackendError::unimplemented(CPU_IDENTITY, node.name(), node.kind(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrt::planner::{plan_memory, PlanOptions};
    use graphrt::{DType, FunctionBuilder, UnaryOp};

    fn generate(function: &Function, emit_timing: bool) -> CModule {
        let plan = plan_memory(function, PlanOptions::default());
        generate_module(function, &plan, emit_timing, None).unwrap()
    }

    #[test]
    fn binds_values_to_their_planned_homes() {
        let mut builder = FunctionBuilder::new("bindings");
        let x = builder.parameter(DType::F32, [4]);
        let k = builder.constant::<f32>([4], &[1.0; 4]).unwrap();
        let sum = builder.add(x, k).unwrap();
        let out = builder.unary(UnaryOp::Tanh, sum).unwrap();
        let function = builder.finish(&[out, x]).unwrap();

        let module = generate(&function, false);
        let src = &module.source;
        assert!(src.contains("float* v0_0 = (float*)inputs[0];"));
        assert!(src.contains("static _Alignas(64) const uint8_t graphrt_const_1_0[16]"));
        assert!(src.contains("float* v2_0 = (float*)(pool + 0);"));
        assert!(src.contains("float* v3_0 = (float*)outputs[0];"));
        assert!(src.contains("v3_0[i] = tanhf(v2_0[i]);"));
        assert!(src.contains("memcpy(outputs[1], v0_0, 16);"));
        assert!(!src.contains("get_debug_timer_count"));
        assert!(module.timer_names.is_empty());
    }

    #[test]
    fn zero_element_nodes_emit_nothing() {
        let mut builder = FunctionBuilder::new("empty");
        let x = builder.parameter(DType::I32, [0]);
        let y = builder.unary(UnaryOp::Negative, x).unwrap();
        let function = builder.finish(&[y]).unwrap();
        let module = generate(&function, true);
        assert!(!module.source.contains("Negative_1 */"));
        assert!(module.timer_names.is_empty());
        assert!(module.source.contains("get_debug_timer_count"));
    }

    #[test]
    fn instrumented_units_export_one_timer_per_node() {
        let mut builder = FunctionBuilder::new("timed");
        let x = builder.parameter(DType::F64, [2, 2]);
        let y = builder.dot(x, x).unwrap();
        let z = builder.identity(y).unwrap();
        let function = builder.finish(&[z]).unwrap();
        let module = generate(&function, true);
        assert_eq!(module.timer_names, vec!["Dot_1".to_string(), "Identity_2".to_string()]);
        for symbol in [
            "get_debug_timer_count",
            "get_debug_timer_name",
            "get_debug_timer_microseconds",
            "get_debug_timer_call_count",
        ] {
            assert!(module.source.contains(symbol), "missing {symbol}");
        }
        assert!(module.source.contains("graphrt_timer_calls[1] += 1;"));
    }

    #[test]
    fn tags_change_the_source() {
        let mut builder = FunctionBuilder::new("tagged");
        let x = builder.parameter(DType::U8, [3]);
        let function = builder.finish(&[x]).unwrap();
        let plan = plan_memory(&function, PlanOptions::default());
        let plain = generate_module(&function, &plan, false, None).unwrap();
        let tagged = generate_module(&function, &plan, false, Some("7")).unwrap();
        assert_ne!(plain.source, tagged.source);
    }
}
