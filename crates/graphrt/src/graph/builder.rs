use std::collections::HashSet;
use std::sync::Arc;

use super::function::Function;
use super::node::{Node, NodeId, ValueRef};
use crate::error::{GraphError, GraphResult};
use crate::op::{check_arity, BinaryOp, CustomOp, Op, UnaryOp};
use crate::tensor::{DType, Element, Shape, TensorDescriptor, TensorSpec};

/// Appends validated nodes to an arena and seals it into a [`Function`].
///
/// A node may only reference nodes added before it, so the arena is always in
/// topological order and cannot contain cycles.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionBuilder {
            name: name.into(),
            nodes: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn parameter(&mut self, dtype: DType, shape: impl Into<Shape>) -> ValueRef {
        let spec = TensorSpec::new(dtype, shape);
        let id = self.push(Op::Parameter, Vec::new(), vec![spec]);
        self.parameters.push(id);
        ValueRef::new(id, 0)
    }

    pub fn constant<T: Element>(
        &mut self,
        shape: impl Into<Shape>,
        data: &[T],
    ) -> GraphResult<ValueRef> {
        let spec = TensorSpec::new(T::DTYPE, shape);
        self.constant_bytes(spec, bytemuck::cast_slice::<T, u8>(data))
    }

    pub fn constant_bytes(&mut self, spec: TensorSpec, bytes: &[u8]) -> GraphResult<ValueRef> {
        check_sizes("Constant", std::slice::from_ref(&spec))?;
        if bytes.len() != spec.byte_len() {
            return Err(GraphError::invalid(
                "Constant",
                format!(
                    "payload of {} bytes does not match {spec} ({} bytes)",
                    bytes.len(),
                    spec.byte_len()
                ),
            ));
        }
        let id = self.push(Op::Constant(Arc::from(bytes)), Vec::new(), vec![spec]);
        Ok(ValueRef::new(id, 0))
    }

    pub fn identity(&mut self, x: ValueRef) -> GraphResult<ValueRef> {
        self.builtin(Op::Identity, &[x])
    }

    pub fn unary(&mut self, op: UnaryOp, x: ValueRef) -> GraphResult<ValueRef> {
        self.builtin(Op::Unary(op), &[x])
    }

    pub fn binary(&mut self, op: BinaryOp, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.builtin(Op::Binary(op), &[a, b])
    }

    pub fn add(&mut self, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn subtract(&mut self, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.binary(BinaryOp::Subtract, a, b)
    }

    pub fn multiply(&mut self, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.binary(BinaryOp::Multiply, a, b)
    }

    pub fn divide(&mut self, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.binary(BinaryOp::Divide, a, b)
    }

    pub fn maximum(&mut self, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.binary(BinaryOp::Maximum, a, b)
    }

    pub fn minimum(&mut self, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.binary(BinaryOp::Minimum, a, b)
    }

    pub fn convert(&mut self, x: ValueRef, dtype: DType) -> GraphResult<ValueRef> {
        self.builtin(Op::Convert(dtype), &[x])
    }

    pub fn dot(&mut self, a: ValueRef, b: ValueRef) -> GraphResult<ValueRef> {
        self.builtin(Op::Dot, &[a, b])
    }

    /// Adds a custom operation constructed against the operand specs of `args`.
    ///
    /// `construct` runs the operation's own validation; its error aborts the
    /// insertion and leaves the builder untouched.
    pub fn custom<O, F>(&mut self, args: &[ValueRef], construct: F) -> GraphResult<Vec<ValueRef>>
    where
        O: CustomOp + 'static,
        F: FnOnce(&[TensorSpec]) -> GraphResult<O>,
    {
        let specs = self.specs(args)?;
        let op: Arc<dyn CustomOp> = Arc::new(construct(&specs)?);
        check_sizes(op.kind(), op.output_specs())?;
        let id = self.insert_custom(op, args);
        let count = self.nodes[id.index()].outputs.len();
        Ok((0..count).map(|output| ValueRef::new(id, output)).collect())
    }

    /// Rebuilds `node` against `new_args`, appending the copy to the arena.
    ///
    /// The operand count must equal the original node's; the operation re-runs
    /// its construction-time validation on the new operand specs.
    pub fn copy_with_new_args(&mut self, node: NodeId, new_args: &[ValueRef]) -> GraphResult<NodeId> {
        let original = self
            .nodes
            .get(node.index())
            .ok_or(GraphError::UnknownValue { node, output: 0 })?;
        let op = original.op.clone();
        let kind = op.kind().to_string();
        check_arity(&kind, original.inputs.len(), new_args.len())?;
        let specs = self.specs(new_args)?;
        let id = match op {
            Op::Parameter => {
                let spec = self.nodes[node.index()].outputs[0].spec();
                self.parameter(spec.dtype, spec.shape).node
            }
            Op::Constant(_) => {
                let outputs = self.nodes[node.index()]
                    .outputs
                    .iter()
                    .map(TensorDescriptor::spec)
                    .collect();
                self.push(op, Vec::new(), outputs)
            }
            Op::Custom(custom) => {
                let rebuilt = custom.copy_with_new_args(&specs)?;
                check_sizes(rebuilt.kind(), rebuilt.output_specs())?;
                self.insert_custom(rebuilt, new_args)
            }
            builtin => {
                let outputs = builtin.infer_outputs(&specs)?;
                check_sizes(&kind, &outputs)?;
                self.push(builtin, new_args.to_vec(), outputs)
            }
        };
        Ok(id)
    }

    pub fn spec(&self, value: ValueRef) -> GraphResult<TensorSpec> {
        self.nodes
            .get(value.node.index())
            .and_then(|node| node.outputs.get(value.output))
            .map(TensorDescriptor::spec)
            .ok_or(GraphError::UnknownValue {
                node: value.node,
                output: value.output,
            })
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Renames a node. Names are diagnostic only and need not be unique.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            let name = name.into();
            for (idx, output) in node.outputs.iter_mut().enumerate() {
                let spec = output.spec();
                *output = TensorDescriptor::from_spec(&spec, output_name(&name, idx));
            }
            node.name = name;
        }
    }

    /// Seals the graph with parameters in declaration order.
    pub fn finish(self, results: &[ValueRef]) -> GraphResult<Function> {
        let parameters = self.parameters.clone();
        self.seal(results, parameters)
    }

    /// Seals the graph with an explicit parameter order.
    pub fn finish_with_parameters(
        self,
        results: &[ValueRef],
        parameters: &[ValueRef],
    ) -> GraphResult<Function> {
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(parameters.len());
        for value in parameters {
            let node = self.nodes.get(value.node.index()).ok_or(GraphError::UnknownValue {
                node: value.node,
                output: value.output,
            })?;
            if !matches!(node.op, Op::Parameter) || value.output != 0 {
                return Err(GraphError::invalid(
                    "Function",
                    format!("{node} is not a parameter"),
                ));
            }
            if !seen.insert(value.node) {
                return Err(GraphError::invalid(
                    "Function",
                    format!("{node} is listed more than once"),
                ));
            }
            ids.push(value.node);
        }
        self.seal(results, ids)
    }

    fn seal(self, results: &[ValueRef], parameters: Vec<NodeId>) -> GraphResult<Function> {
        if results.is_empty() {
            return Err(GraphError::invalid("Function", "at least one result is required"));
        }
        self.specs(results)?;
        for id in &parameters {
            let specs: Vec<TensorSpec> = self.nodes[id.index()]
                .outputs
                .iter()
                .map(TensorDescriptor::spec)
                .collect();
            check_sizes("Parameter", &specs)?;
        }
        let function = Function::from_parts(self.name, self.nodes, parameters, results.to_vec());
        for id in function.live_nodes() {
            let node = function.node(id);
            if matches!(node.op, Op::Parameter) && function.parameter_index(id).is_none() {
                return Err(GraphError::invalid(
                    "Function",
                    format!("{node} is used but missing from the parameter list"),
                ));
            }
        }
        tracing::debug!(
            function = %function.id(),
            name = function.name(),
            nodes = function.nodes().len(),
            "sealed function"
        );
        Ok(function)
    }

    fn builtin(&mut self, op: Op, args: &[ValueRef]) -> GraphResult<ValueRef> {
        let specs = self.specs(args)?;
        let outputs = op.infer_outputs(&specs)?;
        check_sizes(op.kind(), &outputs)?;
        let id = self.push(op, args.to_vec(), outputs);
        Ok(ValueRef::new(id, 0))
    }

    fn insert_custom(&mut self, op: Arc<dyn CustomOp>, args: &[ValueRef]) -> NodeId {
        let outputs = op.output_specs().to_vec();
        self.push(Op::Custom(op), args.to_vec(), outputs)
    }

    fn specs(&self, args: &[ValueRef]) -> GraphResult<Vec<TensorSpec>> {
        args.iter().map(|value| self.spec(*value)).collect()
    }

    fn push(&mut self, op: Op, inputs: Vec<ValueRef>, outputs: Vec<TensorSpec>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let name = format!("{}_{}", op.kind(), id.0);
        let outputs = outputs
            .iter()
            .enumerate()
            .map(|(idx, spec)| TensorDescriptor::from_spec(spec, output_name(&name, idx)))
            .collect();
        self.nodes.push(Node {
            id,
            name,
            op,
            inputs,
            outputs,
        });
        id
    }
}

fn output_name(node_name: &str, index: usize) -> String {
    format!("{node_name}_{index}")
}
/// Rejects specs whose byte length does not fit in `usize`.
fn check_sizes(op: &str, specs: &[TensorSpec]) -> GraphResult<()> {
    match specs.iter().find(|spec| spec.checked_byte_len().is_none()) {
        Some(spec) => Err(GraphError::SizeOverflow {
            op: op.to_string(),
            spec: spec.clone(),
        }),
        None => Ok(()),
    }
}

