//! Tensor metadata (shape, layout, descriptor) and host tensors.

mod buffer;
mod descriptor;
mod dtype;
mod host;
mod layout;
mod shape;

pub use buffer::{AlignedBuffer, ExternalBuffer, HOST_ALIGNMENT};
pub use descriptor::{TensorDescriptor, TensorSpec};
pub use dtype::{element_matches, DType, Element};
pub use host::Tensor;
pub use layout::{DenseLayout, TensorLayout};
pub(crate) use layout::round_up;
pub use shape::{checked_element_count, element_count, row_major_strides, Shape};
