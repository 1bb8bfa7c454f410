use std::fmt;

use crate::op::Op;
use crate::tensor::TensorDescriptor;

/// Stable handle of a node inside its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// One output of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueRef {
    pub node: NodeId,
    pub output: usize,
}

impl ValueRef {
    pub fn new(node: NodeId, output: usize) -> Self {
        ValueRef { node, output }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.output)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) op: Op,
    pub(crate) inputs: Vec<ValueRef>,
    pub(crate) outputs: Vec<TensorDescriptor>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn kind(&self) -> &str {
        self.op.kind()
    }

    pub fn inputs(&self) -> &[ValueRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorDescriptor] {
        &self.outputs
    }

    pub fn output(&self, index: usize) -> ValueRef {
        ValueRef::new(self.id, index)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Node({}): {}>", self.kind(), self.name)
    }
}
