//! Array chunking
//!
//! A [`Chunking`] splits every axis of a [`Shape`] into an ordered list of positive
//! chunk extents. The extents along an axis always sum to the axis length, so the
//! cross product of per-axis chunks tiles the array exactly once.
//!
//! # Features
//!
//! - Explicit per-axis extents, validated eagerly
//! - Regular tiling with a smaller trailing chunk
//! - `auto` chunk sizes bounded by a byte budget
//! - Deterministic row-major chunk iteration
//!
//! # Example
//!
//! ```
//! use lazydot_core::{ChunkSize, Chunking, Shape};
//!
//! let shape = Shape::new(vec![1000, 1_000_000]).unwrap();
//! let chunking = Chunking::resolve(
//!     &shape,
//!     &[ChunkSize::Auto, ChunkSize::Fixed(10_000)],
//!     128 * 1024 * 1024,
//! )
//! .unwrap();
//!
//! assert_eq!(chunking.num_chunks(), vec![1, 100]);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ShapeMismatchError;
use crate::shape::Shape;

/// Default byte budget for a chunk whose size is requested as `auto`
pub const DEFAULT_AUTO_CHUNK_BYTES: usize = 128 * 1024 * 1024;

const ELEMENT_BYTES: usize = std::mem::size_of::<f64>();

/// Requested chunk size along one axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSize {
    /// Regular chunks of this length; the last one may be shorter
    Fixed(usize),
    /// A single chunk spanning the axis
    Full,
    /// Size chosen so the chunk stays within the auto byte budget
    Auto,
    /// Exact extents; must sum to the axis length
    Explicit(Vec<usize>),
}

/// Per-axis chunk boundaries of an array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunking {
    shape: Shape,
    /// Chunk extents per axis
    extents: Vec<Vec<usize>>,
    /// Chunk start offsets per axis, with the axis length appended
    offsets: Vec<Vec<usize>>,
}

impl Chunking {
    /// Create a chunking from explicit per-axis extents
    ///
    /// # Errors
    ///
    /// Returns [`ShapeMismatchError`] if the rank differs from the shape, an extent
    /// is zero, or the extents along an axis do not sum to the axis length.
    pub fn new(shape: &Shape, extents: Vec<Vec<usize>>) -> Result<Self, ShapeMismatchError> {
        if extents.len() != shape.rank() {
            return Err(ShapeMismatchError::rank_mismatch(
                "chunking",
                shape.rank(),
                extents.len(),
            ));
        }

        for (axis, axis_extents) in extents.iter().enumerate() {
            if let Some(index) = axis_extents.iter().position(|&e| e == 0) {
                return Err(ShapeMismatchError::ZeroExtent {
                    operation: "chunking".to_string(),
                    axis,
                    index,
                });
            }

            let sum: usize = axis_extents.iter().sum();
            if sum != shape.dim(axis) {
                return Err(ShapeMismatchError::ExtentSum {
                    operation: "chunking".to_string(),
                    axis,
                    sum,
                    expected: shape.dim(axis),
                });
            }
        }

        let offsets = extents
            .iter()
            .map(|axis_extents| {
                let mut starts = Vec::with_capacity(axis_extents.len() + 1);
                let mut acc = 0;
                starts.push(0);
                for &e in axis_extents {
                    acc += e;
                    starts.push(acc);
                }
                starts
            })
            .collect();

        Ok(Self {
            shape: shape.clone(),
            extents,
            offsets,
        })
    }

    /// Regular tiling with a fixed chunk size per axis
    ///
    /// Edge chunks are smaller when the size does not divide the axis.
    pub fn regular(shape: &Shape, chunk_size: &[usize]) -> Result<Self, ShapeMismatchError> {
        let sizes: Vec<ChunkSize> = chunk_size.iter().map(|&c| ChunkSize::Fixed(c)).collect();
        Self::resolve(shape, &sizes, DEFAULT_AUTO_CHUNK_BYTES)
    }

    /// Resolve requested chunk sizes against a shape
    ///
    /// `Auto` axes share the element budget left by the other axes. The budget is
    /// split evenly in log space between auto axes, shortest axis first, and each
    /// auto size is clamped to its axis length.
    pub fn resolve(
        shape: &Shape,
        sizes: &[ChunkSize],
        auto_limit_bytes: usize,
    ) -> Result<Self, ShapeMismatchError> {
        if sizes.len() != shape.rank() {
            return Err(ShapeMismatchError::rank_mismatch(
                "chunking",
                shape.rank(),
                sizes.len(),
            ));
        }

        let mut resolved: Vec<Option<usize>> = vec![None; shape.rank()];
        let mut explicit: Vec<Option<Vec<usize>>> = vec![None; shape.rank()];
        let mut fixed_elements: usize = 1;

        for (axis, size) in sizes.iter().enumerate() {
            let dim = shape.dim(axis);
            match size {
                ChunkSize::Fixed(0) => {
                    return Err(ShapeMismatchError::ZeroExtent {
                        operation: "chunking".to_string(),
                        axis,
                        index: 0,
                    });
                }
                ChunkSize::Fixed(n) => {
                    let n = (*n).min(dim);
                    resolved[axis] = Some(n);
                    fixed_elements = fixed_elements.saturating_mul(n);
                }
                ChunkSize::Full => {
                    resolved[axis] = Some(dim);
                    fixed_elements = fixed_elements.saturating_mul(dim);
                }
                ChunkSize::Explicit(e) => {
                    let largest = e.iter().copied().max().unwrap_or(dim).max(1);
                    explicit[axis] = Some(e.clone());
                    fixed_elements = fixed_elements.saturating_mul(largest);
                }
                ChunkSize::Auto => {}
            }
        }

        let mut auto_axes: Vec<usize> = sizes
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, ChunkSize::Auto))
            .map(|(axis, _)| axis)
            .collect();
        auto_axes.sort_by_key(|&axis| (shape.dim(axis), axis));

        let mut budget = (auto_limit_bytes / ELEMENT_BYTES / fixed_elements.max(1)).max(1);
        let mut remaining = auto_axes.len();
        for axis in auto_axes {
            let share = ((budget as f64).powf(1.0 / remaining as f64) + 1e-9).floor() as usize;
            let size = share.clamp(1, shape.dim(axis));
            resolved[axis] = Some(size);
            budget = (budget / size).max(1);
            remaining -= 1;
        }

        let extents = (0..shape.rank())
            .map(|axis| match explicit[axis].take() {
                Some(e) => e,
                None => regular_extents(shape.dim(axis), resolved[axis].unwrap_or(1)),
            })
            .collect();

        Self::new(shape, extents)
    }

    /// The chunked array's shape
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Chunk extents along one axis
    pub fn extents(&self, axis: usize) -> &[usize] {
        &self.extents[axis]
    }

    /// Chunk extents along every axis
    pub fn all_extents(&self) -> &[Vec<usize>] {
        &self.extents
    }

    /// Chunk start offsets along one axis, followed by the axis length
    pub fn offsets(&self, axis: usize) -> &[usize] {
        &self.offsets[axis]
    }

    /// Number of chunks per axis
    pub fn num_chunks(&self) -> Vec<usize> {
        self.extents.iter().map(Vec::len).collect()
    }

    /// Total number of chunks
    pub fn total_chunks(&self) -> usize {
        self.extents.iter().map(Vec::len).product()
    }

    /// Number of elements in the largest chunk
    pub fn max_chunk_elements(&self) -> usize {
        self.extents
            .iter()
            .map(|e| e.iter().copied().max().unwrap_or(0))
            .product()
    }

    /// Index of the chunk containing `position` along `axis`
    pub fn locate(&self, axis: usize, position: usize) -> usize {
        let offsets = &self.offsets[axis];
        debug_assert!(position < offsets[offsets.len() - 1]);
        offsets.partition_point(|&start| start <= position) - 1
    }

    /// Get the bounds (start, end) of a chunk in element coordinates
    pub fn chunk_bounds(&self, chunk_idx: &ChunkIndex) -> (Vec<usize>, Vec<usize>) {
        assert_eq!(chunk_idx.coords.len(), self.rank());

        let mut start = Vec::with_capacity(self.rank());
        let mut end = Vec::with_capacity(self.rank());

        for (axis, &c) in chunk_idx.coords.iter().enumerate() {
            start.push(self.offsets[axis][c]);
            end.push(self.offsets[axis][c + 1]);
        }

        (start, end)
    }

    /// Get the shape of a chunk
    pub fn chunk_shape(&self, chunk_idx: &ChunkIndex) -> Vec<usize> {
        chunk_idx
            .coords
            .iter()
            .enumerate()
            .map(|(axis, &c)| self.extents[axis][c])
            .collect()
    }

    /// Check if a chunk index is valid
    pub fn is_valid_chunk(&self, chunk_idx: &ChunkIndex) -> bool {
        if chunk_idx.coords.len() != self.rank() {
            return false;
        }

        chunk_idx
            .coords
            .iter()
            .zip(self.extents.iter())
            .all(|(&coord, e)| coord < e.len())
    }

    /// Iterate over chunk indices in row-major order
    pub fn iter(&self) -> ChunkIterator {
        ChunkIterator::new(self.num_chunks())
    }
}

/// Extents of a regular tiling of `dim` by `size`
pub fn regular_extents(dim: usize, size: usize) -> Vec<usize> {
    let size = size.max(1);
    let mut extents = vec![size; dim / size];
    if dim % size != 0 {
        extents.push(dim % size);
    }
    extents
}

/// Index representing a specific chunk's position
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkIndex {
    /// Coordinates in chunk space (not element space)
    pub coords: Vec<usize>,
}

impl ChunkIndex {
    /// Create a new chunk index
    pub fn new(coords: Vec<usize>) -> Self {
        Self { coords }
    }

    /// Create a chunk index from a row-major linear index
    pub fn from_linear(linear_idx: usize, num_chunks: &[usize]) -> Self {
        let mut coords = Vec::with_capacity(num_chunks.len());
        let mut remaining = linear_idx;

        for i in 0..num_chunks.len() {
            let stride: usize = num_chunks[i + 1..].iter().product();
            coords.push(remaining / stride);
            remaining %= stride;
        }

        Self { coords }
    }

    /// Convert to a row-major linear index
    pub fn to_linear(&self, num_chunks: &[usize]) -> usize {
        assert_eq!(self.coords.len(), num_chunks.len());

        let mut linear = 0;
        let mut stride = 1;

        for i in (0..self.coords.len()).rev() {
            linear += self.coords[i] * stride;
            stride *= num_chunks[i];
        }

        linear
    }
}

impl fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.coords.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

/// Iterator over chunk indices in deterministic row-major order
pub struct ChunkIterator {
    num_chunks: Vec<usize>,
    current_linear: usize,
    total_chunks: usize,
}

impl ChunkIterator {
    /// Create an iterator over a grid with `num_chunks` chunks per axis
    pub fn new(num_chunks: Vec<usize>) -> Self {
        let total_chunks = num_chunks.iter().product();
        Self {
            num_chunks,
            current_linear: 0,
            total_chunks,
        }
    }
}

impl Iterator for ChunkIterator {
    type Item = ChunkIndex;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_linear >= self.total_chunks {
            return None;
        }

        let chunk_idx = ChunkIndex::from_linear(self.current_linear, &self.num_chunks);
        self.current_linear += 1;

        Some(chunk_idx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_chunks - self.current_linear;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkIterator {}
