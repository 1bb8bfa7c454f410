//! Per-tensor metadata: type, shape, name, layout and planned pool offset.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DType, Shape, TensorLayout};

/// Element type plus shape: the interface contract of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        TensorSpec {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape.element_count()
    }

    /// Logical byte length of a dense tensor with this spec.
    pub fn byte_len(&self) -> usize {
        self.element_count() * self.dtype.size_in_bytes()
    }

    /// Byte length, or `None` if it does not fit in `usize`.
    pub fn checked_byte_len(&self) -> Option<usize> {
        self.shape
            .checked_element_count()?
            .checked_mul(self.dtype.size_in_bytes())
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

/// Describes one tensor's storage independently of any live buffer.
#[derive(Debug)]
pub struct TensorDescriptor {
    dtype: DType,
    shape: Shape,
    name: String,
    layout: Option<Box<dyn TensorLayout>>,
    pool_offset: Option<usize>,
}

impl TensorDescriptor {
    pub fn new(dtype: DType, shape: impl Into<Shape>, name: impl Into<String>) -> Self {
        TensorDescriptor {
            dtype,
            shape: shape.into(),
            name: name.into(),
            layout: None,
            pool_offset: None,
        }
    }

    pub fn from_spec(spec: &TensorSpec, name: impl Into<String>) -> Self {
        Self::new(spec.dtype, spec.shape.clone(), name)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.dtype, self.shape.clone())
    }

    pub fn element_count(&self) -> usize {
        self.shape.element_count()
    }

    pub fn layout(&self) -> Option<&dyn TensorLayout> {
        self.layout.as_deref()
    }

    pub fn set_layout(&mut self, layout: Box<dyn TensorLayout>) {
        self.layout = Some(layout);
    }

    /// Allocation size in bytes.
    ///
    /// The bound layout decides when present; otherwise the dense logical size.
    pub fn size(&self) -> usize {
        match &self.layout {
            Some(layout) => layout.allocated_size(),
            None => self.shape.element_count() * self.dtype.size_in_bytes(),
        }
    }

    /// Retypes the tensor, propagating the change to a bound layout.
    pub fn set_type_and_shape(&mut self, dtype: DType, shape: impl Into<Shape>) {
        self.dtype = dtype;
        self.shape = shape.into();
        if let Some(layout) = self.layout.as_mut() {
            layout.set_type_and_shape(dtype, &self.shape);
        }
    }

    pub fn pool_offset(&self) -> Option<usize> {
        self.pool_offset
    }

    /// Records where in a backend-owned pool the data will live. Allocates nothing.
    pub fn set_pool_offset(&mut self, offset: usize) {
        self.pool_offset = Some(offset);
    }
}

impl Clone for TensorDescriptor {
    fn clone(&self) -> Self {
        TensorDescriptor {
            dtype: self.dtype,
            shape: self.shape.clone(),
            name: self.name.clone(),
            layout: self.layout.as_ref().map(|layout| layout.clone_layout()),
            pool_offset: self.pool_offset,
        }
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DenseLayout;

    #[test]
    fn size_without_layout_is_dense() {
        for dtype in DType::ALL {
            for dims in [vec![], vec![0], vec![7], vec![2, 3, 5]] {
                let shape = Shape::new(dims);
                let desc = TensorDescriptor::new(dtype, shape.clone(), "t");
                assert_eq!(desc.size(), shape.element_count() * dtype.size_in_bytes());
            }
        }
    }

    #[test]
    fn size_follows_bound_layout() {
        let mut desc = TensorDescriptor::new(DType::F32, [5], "padded");
        desc.set_layout(Box::new(DenseLayout::with_alignment(
            DType::F32,
            Shape::from([5]),
            32,
        )));
        assert_eq!(desc.size(), 32);
    }

    #[test]
    fn retype_propagates_to_layout() {
        let mut desc = TensorDescriptor::new(DType::F32, [2, 2], "x");
        desc.set_layout(Box::new(DenseLayout::new(DType::F32, Shape::from([2, 2]))));
        desc.set_type_and_shape(DType::F64, [3, 3]);
        let layout = desc.layout().expect("layout bound");
        assert_eq!(layout.dtype(), DType::F64);
        assert_eq!(layout.shape(), &Shape::from([3, 3]));
        assert_eq!(desc.size(), 72);
    }

    #[test]
    fn pool_offset_defaults_unset() {
        let mut desc = TensorDescriptor::new(DType::I32, [4], "y");
        assert_eq!(desc.pool_offset(), None);
        desc.set_pool_offset(128);
        assert_eq!(desc.clone().pool_offset(), Some(128));
    }

    #[test]
    fn displays_as_tensor_name() {
        let desc = TensorDescriptor::new(DType::F32, [1], "weights");
        assert_eq!(desc.to_string(), "Tensor(weights)");
    }
}
