use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::node::{Node, NodeId, ValueRef};
use crate::tensor::{TensorDescriptor, TensorSpec};

static NEXT_FUNCTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Function`]; the key of every compilation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(u64);

impl FunctionId {
    pub(crate) fn fresh() -> Self {
        FunctionId(NEXT_FUNCTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

#[derive(Debug)]
struct FunctionInner {
    id: FunctionId,
    name: String,
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<ValueRef>,
}

/// Immutable dataflow graph: an arena of nodes, ordered parameters and results.
///
/// Cloning is cheap and preserves identity; compiled state lives in backends.
#[derive(Debug, Clone)]
pub struct Function {
    inner: Arc<FunctionInner>,
}

impl Function {
    pub(crate) fn from_parts(
        name: String,
        nodes: Vec<Node>,
        parameters: Vec<NodeId>,
        results: Vec<ValueRef>,
    ) -> Self {
        Function {
            inner: Arc::new(FunctionInner {
                id: FunctionId::fresh(),
                name,
                nodes,
                parameters,
                results,
            }),
        }
    }

    pub fn id(&self) -> FunctionId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// All nodes in insertion order, which is a topological order.
    pub fn nodes(&self) -> &[Node] {
        &self.inner.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.inner.nodes[id.index()]
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.inner.parameters
    }

    pub fn results(&self) -> &[ValueRef] {
        &self.inner.results
    }

    pub fn descriptor(&self, value: ValueRef) -> &TensorDescriptor {
        &self.node(value.node).outputs[value.output]
    }

    pub fn parameter_specs(&self) -> Vec<TensorSpec> {
        self.inner
            .parameters
            .iter()
            .map(|id| self.node(*id).outputs[0].spec())
            .collect()
    }

    pub fn result_specs(&self) -> Vec<TensorSpec> {
        self.inner
            .results
            .iter()
            .map(|value| self.descriptor(*value).spec())
            .collect()
    }

    /// Position of `node` in the parameter list, if it is a parameter.
    pub fn parameter_index(&self, node: NodeId) -> Option<usize> {
        self.inner.parameters.iter().position(|id| *id == node)
    }

    /// Nodes the results depend on, in topological order. Parameters are always
    /// included so that every declared input has a slot.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        let nodes = &self.inner.nodes;
        let mut live = vec![false; nodes.len()];
        for param in &self.inner.parameters {
            live[param.index()] = true;
        }
        for value in &self.inner.results {
            live[value.node.index()] = true;
        }
        for node in nodes.iter().rev() {
            if live[node.id.index()] {
                for input in &node.inputs {
                    live[input.node.index()] = true;
                }
            }
        }
        nodes
            .iter()
            .filter(|node| live[node.id.index()])
            .map(|node| node.id)
            .collect()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Function {}

impl std::hash::Hash for Function {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {} ({}) {{", self.name(), self.id())?;
        for node in self.nodes() {
            let inputs: Vec<String> = node.inputs.iter().map(|v| v.to_string()).collect();
            let outputs: Vec<String> = node.outputs.iter().map(|d| d.spec().to_string()).collect();
            writeln!(
                f,
                "  {} = {}({}) -> {}",
                node.id,
                node,
                inputs.join(", "),
                outputs.join(", ")
            )?;
        }
        let results: Vec<String> = self.results().iter().map(|v| v.to_string()).collect();
        writeln!(f, "  return {}", results.join(", "))?;
        f.write_str("}")
    }
}
