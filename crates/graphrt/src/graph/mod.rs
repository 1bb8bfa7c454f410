//! Arena-backed dataflow graphs.
//!
//! Nodes live in a `Vec` owned by the [`Function`] and refer to their operands
//! through [`ValueRef`] handles, so a graph never holds references to itself.

mod builder;
mod function;
mod node;

pub use builder::FunctionBuilder;
pub use function::{Function, FunctionId};
pub use node::{Node, NodeId, ValueRef};
