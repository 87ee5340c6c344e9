//! Array shapes
//!
//! A [`Shape`] is a validated, non-empty list of positive axis lengths.
//! Linearization is row-major: the rightmost axis varies fastest.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ShapeMismatchError;

/// Global shape of a logical array
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a shape, rejecting empty shapes, zero-length axes and element
    /// counts that overflow `usize`
    pub fn new(dims: Vec<usize>) -> Result<Self, ShapeMismatchError> {
        if dims.is_empty() {
            return Err(ShapeMismatchError::EmptyShape {
                operation: "shape".to_string(),
            });
        }

        if let Some(axis) = dims.iter().position(|&d| d == 0) {
            return Err(ShapeMismatchError::ZeroDimension {
                operation: "shape".to_string(),
                axis,
                shape: dims,
            });
        }

        if dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).is_none() {
            return Err(ShapeMismatchError::TooManyElements {
                operation: "shape".to_string(),
                shape: dims,
            });
        }

        Ok(Self { dims })
    }

    /// Axis lengths
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Length of one axis
    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Row-major strides in elements
    pub fn strides(&self) -> Vec<usize> {
        row_major_strides(&self.dims)
    }

    /// Flat (row-major) position of a multi-index
    pub fn flat_index(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.rank());
        index
            .iter()
            .zip(self.strides())
            .map(|(&i, stride)| i * stride)
            .sum()
    }

    /// Multi-index of a flat (row-major) position
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let mut index = Vec::with_capacity(self.rank());
        for stride in self.strides() {
            index.push(flat / stride);
            flat %= stride;
        }
        index
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = ShapeMismatchError;

    fn try_from(dims: &[usize]) -> Result<Self, Self::Error> {
        Shape::new(dims.to_vec())
    }
}

/// Row-major strides for the given axis lengths
pub fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}
