//! Deferred chunked arrays
//!
//! A [`GraphBuilder`] records array expressions as tasks in a [`TaskGraph`] and
//! hands out [`ChunkedArray`] handles. Handles never own data: they name the task
//! that produces each chunk. Every shape and chunking check happens here, before
//! any chunk is computed.
//!
//! # Example
//!
//! ```
//! use lazydot_core::{ChunkSize, Chunking, Shape};
//! use lazydot_exec::{ExecConfig, Executor, GraphBuilder};
//!
//! let mut builder = GraphBuilder::new(7);
//! let a = builder.random("A", Chunking::regular(&Shape::new(vec![4, 6])?, &[2, 3])?);
//! let b = builder.random("B", Chunking::regular(&Shape::new(vec![6, 2])?, &[2, 2])?);
//! let ab = builder.matmul(&a, &b)?;
//!
//! let graph = builder.into_graph();
//! let output = Executor::new(ExecConfig::new().num_workers(2)).execute(&graph, ab.tasks())?;
//! let product = ab.assemble(&output)?;
//! assert_eq!(product.shape(), &[4, 2]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::ops::Range;
use std::sync::Arc;

use lazydot_core::{ChunkIndex, ChunkSize, Chunking, Shape, ShapeMismatchError, DEFAULT_AUTO_CHUNK_BYTES};
use scirs2_core::ndarray_ext::{Array, ArrayD, IxDyn};

use crate::error::{ExecError, KernelError};
use crate::executor::ExecutionOutput;
use crate::overlap::{common_refinement, copy_region, flat_copy_plan, region_copy_plan, CopyPlan};
use crate::task_graph::{Task, TaskGraph, TaskId, TaskKind};

const ELEMENT_BYTES: usize = std::mem::size_of::<f64>();

/// Handle to a deferred chunked array
#[derive(Debug, Clone)]
pub struct ChunkedArray {
    name: Arc<str>,
    chunking: Chunking,
    /// Producing task per chunk, row-major over the chunk grid
    tasks: Vec<TaskId>,
}

impl ChunkedArray {
    /// Array name used in task labels and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global shape
    pub fn shape(&self) -> &Shape {
        self.chunking.shape()
    }

    /// Chunk boundaries
    pub fn chunking(&self) -> &Chunking {
        &self.chunking
    }

    /// Producing task of every chunk, row-major
    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    /// Producing task of one chunk
    pub fn task_for(&self, chunk: &ChunkIndex) -> Option<TaskId> {
        if !self.chunking.is_valid_chunk(chunk) {
            return None;
        }
        self.tasks
            .get(chunk.to_linear(&self.chunking.num_chunks()))
            .copied()
    }

    /// Total number of chunks
    pub fn num_chunks(&self) -> usize {
        self.tasks.len()
    }

    /// Copy this array's chunks out of an execution output into one dense array
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::MissingChunk`] if a chunk was not a target of the run,
    /// and [`ExecError::Kernel`] if a block does not match its chunk's shape.
    pub fn assemble(&self, output: &ExecutionOutput) -> Result<ArrayD<f64>, ExecError> {
        let dims = self.shape().dims().to_vec();
        let mut data = vec![0.0; self.shape().size()];

        for (chunk, &task) in self.chunking.iter().zip(&self.tasks) {
            let block = output.chunk(task).ok_or(ExecError::MissingChunk { task })?;
            let (start, _) = self.chunking.chunk_bounds(&chunk);
            let extent = self.chunking.chunk_shape(&chunk);
            if block.shape() != extent.as_slice() {
                return Err(KernelError::InputShape {
                    input: task,
                    expected: extent,
                    actual: block.shape().to_vec(),
                }
                .into());
            }

            let standard = block.as_standard_layout();
            let src = standard.as_slice().ok_or_else(|| {
                KernelError::Layout(format!("block of task {} is not contiguous", task))
            })?;
            copy_region(
                src,
                &extent,
                &vec![0; extent.len()],
                &mut data,
                &dims,
                &start,
                &extent,
            );
        }

        Array::from_shape_vec(IxDyn(&dims), data)
            .map_err(|e| KernelError::Layout(e.to_string()).into())
    }
}

/// Records chunked array expressions into a task graph
#[derive(Debug)]
pub struct GraphBuilder {
    graph: TaskGraph,
    seed: u64,
    arrays: u64,
    auto_chunk_bytes: usize,
}

impl GraphBuilder {
    /// Create a builder; `seed` determines every generated value
    pub fn new(seed: u64) -> Self {
        Self {
            graph: TaskGraph::new(),
            seed,
            arrays: 0,
            auto_chunk_bytes: DEFAULT_AUTO_CHUNK_BYTES,
        }
    }

    /// Set the byte budget of `auto` chunk sizes
    pub fn with_auto_chunk_bytes(mut self, bytes: usize) -> Self {
        self.auto_chunk_bytes = bytes.max(ELEMENT_BYTES);
        self
    }

    /// The graph built so far
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Finish building
    pub fn into_graph(self) -> TaskGraph {
        self.graph
    }

    /// Resolve requested chunk sizes with this builder's auto budget
    pub fn chunking(&self, shape: &Shape, sizes: &[ChunkSize]) -> Result<Chunking, ShapeMismatchError> {
        Chunking::resolve(shape, sizes, self.auto_chunk_bytes)
    }

    fn next_ordinal(&mut self) -> u64 {
        let ordinal = self.arrays;
        self.arrays += 1;
        ordinal
    }

    /// Array of independent uniform `[0, 1)` values, one `Generate` task per chunk
    pub fn random(&mut self, name: &str, chunking: Chunking) -> ChunkedArray {
        let ordinal = self.next_ordinal();
        let name: Arc<str> = Arc::from(name);

        let tasks = chunking
            .iter()
            .enumerate()
            .map(|(linear, chunk)| {
                let shape = chunking.chunk_shape(&chunk);
                let seed = chunk_seed(self.seed, ordinal, linear as u64);
                self.graph.push_task(Task::new(
                    TaskKind::Generate { seed },
                    Arc::clone(&name),
                    chunk,
                    vec![],
                    shape,
                ))
            })
            .collect();

        tracing::debug!(
            array = %name,
            shape = %chunking.shape(),
            chunks = chunking.total_chunks(),
            "random array"
        );

        ChunkedArray {
            name,
            chunking,
            tasks,
        }
    }

    /// [`random`](Self::random) with chunk sizes resolved against `shape`
    pub fn random_with_sizes(
        &mut self,
        name: &str,
        shape: Shape,
        sizes: &[ChunkSize],
    ) -> Result<ChunkedArray, ShapeMismatchError> {
        let chunking = self.chunking(&shape, sizes)?;
        Ok(self.random(name, chunking))
    }

    /// Reinterpret the row-major element sequence of `array` with a new shape
    ///
    /// `Auto` sizes are filled innermost axis first and bounded by the input's
    /// largest chunk, so output chunks hold whole rows and keep the input's chunk
    /// volume where the shapes allow it.
    ///
    /// # Errors
    ///
    /// [`ShapeMismatchError::ElementCount`] unless both shapes hold the same number
    /// of elements, or any chunking error of `sizes`.
    pub fn reshape(
        &mut self,
        array: &ChunkedArray,
        shape: Shape,
        sizes: &[ChunkSize],
    ) -> Result<ChunkedArray, ShapeMismatchError> {
        if shape.size() != array.shape().size() {
            return Err(ShapeMismatchError::ElementCount {
                from: array.shape().dims().to_vec(),
                to: shape.dims().to_vec(),
                from_size: array.shape().size(),
                to_size: shape.size(),
            });
        }

        if sizes.len() != shape.rank() {
            return Err(ShapeMismatchError::rank_mismatch(
                "reshape",
                shape.rank(),
                sizes.len(),
            ));
        }

        let sizes = innermost_auto_sizes(&shape, sizes, array.chunking.max_chunk_elements());
        let chunking = self.chunking(&shape, &sizes)?;

        let ordinal = self.next_ordinal();
        let name: Arc<str> = Arc::from(format!("reshape-{}", ordinal));

        let mut tasks = Vec::with_capacity(chunking.total_chunks());
        for chunk in chunking.iter() {
            let (start, end) = chunking.chunk_bounds(&chunk);
            let (slots, copies) = flat_copy_plan(&array.chunking, shape.dims(), &start, &end);
            let inputs = slots.iter().map(|&linear| array.tasks[linear]).collect();
            let extent = chunking.chunk_shape(&chunk);

            tasks.push(self.graph.push_task(Task::new(
                TaskKind::Reshape {
                    plan: CopyPlan::Flat(copies),
                },
                Arc::clone(&name),
                chunk,
                inputs,
                extent,
            )));
        }

        tracing::debug!(
            from = %array.shape(),
            to = %shape,
            chunks = tasks.len(),
            "reshape"
        );

        Ok(ChunkedArray {
            name,
            chunking,
            tasks,
        })
    }

    /// Same array with new chunk boundaries
    pub fn rechunk(
        &mut self,
        array: &ChunkedArray,
        sizes: &[ChunkSize],
    ) -> Result<ChunkedArray, ShapeMismatchError> {
        let chunking = self.chunking(array.shape(), sizes)?;
        self.rechunk_to(array, chunking)
    }

    /// Same array with the given chunking
    ///
    /// Returns `array` itself when the boundaries already match.
    pub fn rechunk_to(
        &mut self,
        array: &ChunkedArray,
        chunking: Chunking,
    ) -> Result<ChunkedArray, ShapeMismatchError> {
        if chunking.shape() != array.shape() {
            return Err(ShapeMismatchError::ElementCount {
                from: array.shape().dims().to_vec(),
                to: chunking.shape().dims().to_vec(),
                from_size: array.shape().size(),
                to_size: chunking.shape().size(),
            });
        }
        if chunking == array.chunking {
            return Ok(array.clone());
        }

        let origin = vec![0; array.shape().rank()];
        Ok(self.region_array("rechunk", array, chunking, &origin))
    }

    /// Rectangular sub-array; output chunks are the input chunks clipped to the ranges
    ///
    /// # Errors
    ///
    /// [`ShapeMismatchError::SliceOutOfBounds`] for an empty range or one that ends
    /// past its axis.
    pub fn slice(
        &mut self,
        array: &ChunkedArray,
        ranges: &[Range<usize>],
    ) -> Result<ChunkedArray, ShapeMismatchError> {
        let rank = array.shape().rank();
        if ranges.len() != rank {
            return Err(ShapeMismatchError::rank_mismatch("slice", rank, ranges.len()));
        }

        for (axis, range) in ranges.iter().enumerate() {
            let len = array.shape().dim(axis);
            if range.start >= range.end || range.end > len {
                return Err(ShapeMismatchError::SliceOutOfBounds {
                    axis,
                    start: range.start,
                    end: range.end,
                    len,
                });
            }
        }

        let shape = Shape::new(ranges.iter().map(|r| r.end - r.start).collect())?;
        let extents = ranges
            .iter()
            .enumerate()
            .map(|(axis, range)| {
                let offsets = array.chunking.offsets(axis);
                let first = array.chunking.locate(axis, range.start);
                let last = array.chunking.locate(axis, range.end - 1);
                (first..=last)
                    .map(|c| offsets[c + 1].min(range.end) - offsets[c].max(range.start))
                    .collect()
            })
            .collect();
        let chunking = Chunking::new(&shape, extents)?;

        let origin: Vec<usize> = ranges.iter().map(|r| r.start).collect();
        Ok(self.region_array("slice", array, chunking, &origin))
    }

    /// The first `len` entries along the leading axis
    pub fn prefix(
        &mut self,
        array: &ChunkedArray,
        len: usize,
    ) -> Result<ChunkedArray, ShapeMismatchError> {
        let mut ranges: Vec<Range<usize>> = array.shape().dims().iter().map(|&d| 0..d).collect();
        ranges[0] = 0..len;
        self.slice(array, &ranges)
    }

    /// Build one region-copy task per output chunk; output position `p` reads
    /// input position `p + origin`
    fn region_array(
        &mut self,
        label: &str,
        array: &ChunkedArray,
        chunking: Chunking,
        origin: &[usize],
    ) -> ChunkedArray {
        let ordinal = self.next_ordinal();
        let name: Arc<str> = Arc::from(format!("{}-{}", label, ordinal));

        let mut tasks = Vec::with_capacity(chunking.total_chunks());
        for chunk in chunking.iter() {
            let (start, end) = chunking.chunk_bounds(&chunk);
            let (slots, copies) = region_copy_plan(&array.chunking, origin, &start, &end);
            let inputs = slots.iter().map(|&linear| array.tasks[linear]).collect();
            let extent = chunking.chunk_shape(&chunk);

            tasks.push(self.graph.push_task(Task::new(
                TaskKind::Reshape {
                    plan: CopyPlan::Region(copies),
                },
                Arc::clone(&name),
                chunk,
                inputs,
                extent,
            )));
        }

        tracing::debug!(
            array = %name,
            source = %array.name,
            shape = %chunking.shape(),
            chunks = tasks.len(),
            "region copy"
        );

        ChunkedArray {
            name,
            chunking,
            tasks,
        }
    }

    /// Chunked matrix product `left · right`
    ///
    /// Output chunk `(i, j)` is one `MultiplyAccumulate` task over the pairs
    /// `left(i, k)`, `right(k, j)`. If the contracted axis is chunked differently
    /// on the two sides, both operands are first rechunked to the common
    /// refinement of their boundaries.
    ///
    /// # Errors
    ///
    /// [`ShapeMismatchError::RankMismatch`] unless both operands are matrices, and
    /// [`ShapeMismatchError::InnerDimension`] unless the inner dimensions agree.
    pub fn matmul(
        &mut self,
        left: &ChunkedArray,
        right: &ChunkedArray,
    ) -> Result<ChunkedArray, ShapeMismatchError> {
        for operand in [left, right] {
            if operand.shape().rank() != 2 {
                return Err(ShapeMismatchError::rank_mismatch(
                    "matmul",
                    2,
                    operand.shape().rank(),
                ));
            }
        }
        if left.shape().dim(1) != right.shape().dim(0) {
            return Err(ShapeMismatchError::InnerDimension {
                left: left.shape().dims().to_vec(),
                right: right.shape().dims().to_vec(),
            });
        }

        let (left, right) = if left.chunking.extents(1) != right.chunking.extents(0) {
            let inner = common_refinement(left.chunking.extents(1), right.chunking.extents(0));
            tracing::debug!(
                left = %left.name,
                right = %right.name,
                inner_chunks = inner.len(),
                "unifying contracted axis chunks"
            );
            let left_chunking = Chunking::new(
                left.shape(),
                vec![left.chunking.extents(0).to_vec(), inner.clone()],
            )?;
            let right_chunking =
                Chunking::new(right.shape(), vec![inner, right.chunking.extents(1).to_vec()])?;
            (
                self.rechunk_to(left, left_chunking)?,
                self.rechunk_to(right, right_chunking)?,
            )
        } else {
            (left.clone(), right.clone())
        };

        let shape = Shape::new(vec![left.shape().dim(0), right.shape().dim(1)])?;
        let chunking = Chunking::new(
            &shape,
            vec![
                left.chunking.extents(0).to_vec(),
                right.chunking.extents(1).to_vec(),
            ],
        )?;

        let name: Arc<str> = Arc::from(format!("matmul({}, {})", left.name, right.name));
        let inner_chunks = left.chunking.extents(1).len();
        let inner_len = left.shape().dim(1) as u64;

        let mut tasks = Vec::with_capacity(chunking.total_chunks());
        for chunk in chunking.iter() {
            let (i, j) = (chunk.coords[0], chunk.coords[1]);
            let mut inputs = Vec::with_capacity(2 * inner_chunks);
            for k in 0..inner_chunks {
                inputs.push(left.tasks[i * inner_chunks + k]);
                inputs.push(right.tasks[k * right.chunking.extents(1).len() + j]);
            }

            let extent = chunking.chunk_shape(&chunk);
            let flops = 2 * extent[0] as u64 * extent[1] as u64 * inner_len;
            tasks.push(self.graph.push_task(
                Task::new(
                    TaskKind::MultiplyAccumulate,
                    Arc::clone(&name),
                    chunk,
                    inputs,
                    extent,
                )
                .with_compute_cost(flops),
            ));
        }

        tracing::debug!(
            array = %name,
            shape = %shape,
            chunks = tasks.len(),
            fan_in = 2 * inner_chunks,
            "matmul"
        );

        Ok(ChunkedArray {
            name,
            chunking,
            tasks,
        })
    }
}

/// Replace `Auto` sizes by fixed ones, innermost axis first, within a budget of
/// `budget` elements per chunk
fn innermost_auto_sizes(shape: &Shape, sizes: &[ChunkSize], budget: usize) -> Vec<ChunkSize> {
    let fixed = sizes
        .iter()
        .enumerate()
        .map(|(axis, size)| match size {
            ChunkSize::Fixed(n) => (*n).clamp(1, shape.dim(axis)),
            ChunkSize::Full => shape.dim(axis),
            ChunkSize::Explicit(e) => e.iter().copied().max().unwrap_or(1),
            ChunkSize::Auto => 1,
        })
        .fold(1usize, usize::saturating_mul);

    let mut budget = (budget / fixed.max(1)).max(1);
    let mut resolved = sizes.to_vec();
    for axis in (0..sizes.len()).rev() {
        if sizes[axis] == ChunkSize::Auto {
            let size = budget.min(shape.dim(axis));
            resolved[axis] = ChunkSize::Fixed(size);
            budget = (budget / size).max(1);
        }
    }
    resolved
}

/// Seed of one generated chunk (splitmix64 finalizer over the mixed inputs)
fn chunk_seed(seed: u64, ordinal: u64, linear: u64) -> u64 {
    let mut z = seed
        ^ ordinal.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ linear.wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
