//! Concrete storage layouts bound to tensor descriptors.

use std::fmt;

use super::{DType, Shape};

/// Storage layout of a tensor: how its logical elements map to bytes.
///
/// A layout may allocate more than the logical byte size (padding, alignment),
/// which is why memory planning goes through [`super::TensorDescriptor::size`].
pub trait TensorLayout: fmt::Debug + Send + Sync {
    fn dtype(&self) -> DType;

    fn shape(&self) -> &Shape;

    /// Element strides per axis.
    fn strides(&self) -> &[usize];

    /// Bytes reserved for the tensor under this layout.
    fn allocated_size(&self) -> usize;

    /// Rebinds the layout to a new element type and shape.
    fn set_type_and_shape(&mut self, dtype: DType, shape: &Shape);

    fn clone_layout(&self) -> Box<dyn TensorLayout>;
}

/// Row-major layout whose allocation is rounded up to `alignment` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseLayout {
    dtype: DType,
    shape: Shape,
    strides: Vec<usize>,
    alignment: usize,
}

impl DenseLayout {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self::with_alignment(dtype, shape, 1)
    }

    pub fn with_alignment(dtype: DType, shape: Shape, alignment: usize) -> Self {
        let strides = shape.row_major_strides();
        DenseLayout {
            dtype,
            shape,
            strides,
            alignment: alignment.max(1),
        }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl TensorLayout for DenseLayout {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn strides(&self) -> &[usize] {
        &self.strides
    }

    fn allocated_size(&self) -> usize {
        let logical = self.shape.element_count() * self.dtype.size_in_bytes();
        round_up(logical, self.alignment)
    }

    fn set_type_and_shape(&mut self, dtype: DType, shape: &Shape) {
        self.dtype = dtype;
        self.shape = shape.clone();
        self.strides = shape.row_major_strides();
    }

    fn clone_layout(&self) -> Box<dyn TensorLayout> {
        Box::new(self.clone())
    }
}

pub(crate) fn round_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_layout_pads_to_alignment() {
        let layout = DenseLayout::with_alignment(DType::F32, Shape::from([3]), 64);
        assert_eq!(layout.allocated_size(), 64);
        assert_eq!(layout.strides(), &[1]);
    }

    #[test]
    fn retype_recomputes_strides() {
        let mut layout = DenseLayout::new(DType::F32, Shape::from([2, 3]));
        layout.set_type_and_shape(DType::F64, &Shape::from([4, 5]));
        assert_eq!(layout.dtype(), DType::F64);
        assert_eq!(layout.strides(), &[5, 1]);
        assert_eq!(layout.allocated_size(), 160);
    }
}
