//! Build-time error types
//!
//! Every shape or chunking problem is detected while a graph is being built,
//! before any chunk is computed. These errors are never produced at execution time.
//!
//! # Examples
//!
//! ```
//! use lazydot_core::error::ShapeMismatchError;
//! use lazydot_core::Shape;
//!
//! let err = Shape::new(vec![4, 0]).unwrap_err();
//! assert!(matches!(err, ShapeMismatchError::ZeroDimension { axis: 1, .. }));
//! ```

use thiserror::Error;

/// Shapes or chunkings that are incompatible with the requested operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeMismatchError {
    /// A shape with no axes
    #[error("{operation}: shape must have at least one axis")]
    EmptyShape { operation: String },

    /// An axis of length zero
    #[error("{operation}: axis {axis} has zero length in shape {shape:?}")]
    ZeroDimension {
        operation: String,
        axis: usize,
        shape: Vec<usize>,
    },

    /// A shape whose element count does not fit in `usize`
    #[error("{operation}: element count of shape {shape:?} overflows usize")]
    TooManyElements { operation: String, shape: Vec<usize> },

    /// Two ranks that should agree do not
    #[error("{operation}: rank mismatch - expected {expected}, got {actual}")]
    RankMismatch {
        operation: String,
        expected: usize,
        actual: usize,
    },

    /// A chunk extent of zero
    #[error("{operation}: chunk extent {index} along axis {axis} is zero")]
    ZeroExtent {
        operation: String,
        axis: usize,
        index: usize,
    },

    /// Chunk extents along an axis do not cover the axis exactly
    #[error("{operation}: chunk extents along axis {axis} sum to {sum}, expected {expected}")]
    ExtentSum {
        operation: String,
        axis: usize,
        sum: usize,
        expected: usize,
    },

    /// Reshape between shapes with different element counts
    #[error("reshape: cannot reshape {from:?} ({from_size} elements) into {to:?} ({to_size} elements)")]
    ElementCount {
        from: Vec<usize>,
        to: Vec<usize>,
        from_size: usize,
        to_size: usize,
    },

    /// Matrix product with different inner dimensions
    #[error("matmul: inner dimensions differ - left {left:?}, right {right:?}")]
    InnerDimension { left: Vec<usize>, right: Vec<usize> },

    /// Slice range outside the array or empty
    #[error("slice: range {start}..{end} is invalid for axis {axis} of length {len}")]
    SliceOutOfBounds {
        axis: usize,
        start: usize,
        end: usize,
        len: usize,
    },
}

impl ShapeMismatchError {
    /// Create a rank mismatch error
    pub fn rank_mismatch(operation: impl Into<String>, expected: usize, actual: usize) -> Self {
        ShapeMismatchError::RankMismatch {
            operation: operation.into(),
            expected,
            actual,
        }
    }
}

/// Errors from the distribution summarizer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("empirical distribution needs at least one value")]
    EmptySample,

    #[error("sample value at position {position} is NaN")]
    NanValue { position: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_count_display() {
        let err = ShapeMismatchError::ElementCount {
            from: vec![6],
            to: vec![4, 2],
            from_size: 6,
            to_size: 8,
        };

        let msg = err.to_string();
        assert!(msg.contains("reshape"));
        assert!(msg.contains("[6]"));
        assert!(msg.contains("[4, 2]"));
        assert!(msg.contains("8 elements"));
    }

    #[test]
    fn test_inner_dimension_display() {
        let err = ShapeMismatchError::InnerDimension {
            left: vec![4, 3],
            right: vec![2, 5],
        };

        let msg = err.to_string();
        assert!(msg.contains("matmul"));
        assert!(msg.contains("[4, 3]"));
        assert!(msg.contains("[2, 5]"));
    }

    #[test]
    fn test_rank_mismatch_helper() {
        let err = ShapeMismatchError::rank_mismatch("chunking", 2, 3);
        assert_eq!(
            err.to_string(),
            "chunking: rank mismatch - expected 2, got 3"
        );
    }
}
