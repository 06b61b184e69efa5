use crate::error::{Result, TensorError};
use std::fmt;

/// A tensor shape, wrapping a vector of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Create a shape from a slice of dimensions.
    pub fn from_slice(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of the dimension `i` places from the end, so
    /// `dim_from_end(0)` is the innermost dimension.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim_from_end(&self, i: usize) -> usize {
        self.dims[self.dims.len() - 1 - i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Leading dimensions left after dropping the `trailing` innermost ones.
    /// Empty when the rank is `trailing` or less.
    pub fn batch_dims(&self, trailing: usize) -> &[usize] {
        let end = self.dims.len().saturating_sub(trailing);
        &self.dims[..end]
    }

    /// Checks that the shape can back a tensor: at least one dimension and
    /// every dimension positive.
    pub fn validate(&self) -> Result<()> {
        if self.dims.is_empty() || self.dims.contains(&0) {
            return Err(TensorError::InvalidShape(self.dims.clone()));
        }
        Ok(())
    }

    /// Computes row-major contiguous strides for this shape.
    ///
    /// For a shape [d0, d1, d2], the strides are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![0usize; self.dims.len()];
        strides[self.dims.len() - 1] = 1;
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Returns true if `operand` broadcasts to exactly `target` (it may be
    /// shorter, and any of its dimensions may be 1).
    pub fn broadcasts_to(operand: &[usize], target: &[usize]) -> bool {
        if operand.len() > target.len() {
            return false;
        }
        operand
            .iter()
            .rev()
            .zip(target.iter().rev())
            .all(|(&o, &t)| o == t || o == 1)
    }
}

/// Map a flat index over `out_dims` to the flat index of the element it
/// reads in an operand with `operand_dims`, which must broadcast to
/// `out_dims` (right-aligned, size-1 dimensions repeat).
pub fn broadcast_index(out_dims: &[usize], operand_dims: &[usize], flat: usize) -> usize {
    let mut remaining = flat;
    let mut index = 0;
    let mut stride = 1;
    let offset = out_dims.len() - operand_dims.len();
    for axis in (0..out_dims.len()).rev() {
        let coord = remaining % out_dims[axis];
        remaining /= out_dims[axis];
        if axis >= offset {
            let dim = operand_dims[axis - offset];
            if dim != 1 {
                index += coord * stride;
            }
            stride *= dim;
        }
    }
    index
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}
