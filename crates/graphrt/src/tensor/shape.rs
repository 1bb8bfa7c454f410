//! Tensor extents and the quantities derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical dimensions of a tensor. Rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Product of all extents; the empty product is 1.
    pub fn element_count(&self) -> usize {
        element_count(&self.dims)
    }

    /// `None` when the product does not fit in `usize`.
    pub fn checked_element_count(&self) -> Option<usize> {
        checked_element_count(&self.dims)
    }

    pub fn row_major_strides(&self) -> Vec<usize> {
        row_major_strides(&self.dims)
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn is_vector(&self) -> bool {
        self.dims.len() == 1
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape { dims }
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }
}

/// Product of `dims`. Graph construction rejects shapes whose product
/// overflows, so this saturates instead of wrapping.
pub fn element_count(dims: &[usize]) -> usize {
    checked_element_count(dims).unwrap_or(usize::MAX)
}

pub fn checked_element_count(dims: &[usize]) -> Option<usize> {
    if dims.contains(&0) {
        return Some(0);
    }
    dims.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
}

/// Strides in elements, computed right to left: each stride is the product of
/// the extents strictly to its right.
pub fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    let mut running = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = running;
        running = running.saturating_mul(dims[axis]);
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_one_element() {
        let shape = Shape::scalar();
        assert!(shape.is_scalar());
        assert_eq!(shape.element_count(), 1);
        assert!(shape.row_major_strides().is_empty());
    }

    #[test]
    fn strides_are_row_major() {
        let shape = Shape::from([2, 3, 4]);
        assert_eq!(shape.row_major_strides(), vec![12, 4, 1]);
        assert_eq!(shape.element_count(), 24);
        assert!(!shape.is_vector());
    }

    #[test]
    fn zero_extent_collapses_count() {
        let shape = Shape::from([3, 0, 2]);
        assert_eq!(shape.element_count(), 0);
        assert_eq!(shape.row_major_strides(), vec![0, 2, 1]);
    }

    #[test]
    fn overflowing_extents_are_detected() {
        let shape = Shape::from([usize::MAX, 2]);
        assert_eq!(shape.checked_element_count(), None);
        assert_eq!(Shape::from([usize::MAX, 2, 0]).checked_element_count(), Some(0));
        assert_eq!(Shape::from([1 << 20, 1 << 20]).checked_element_count(), Some(1 << 40));
    }

    #[test]
    fn display_lists_dims() {
        assert_eq!(Shape::from([2, 2]).to_string(), "[2, 2]");
        assert_eq!(Shape::scalar().to_string(), "[]");
    }
}
