//! Per-task chunk computations
//!
//! A [`TaskRunner`] turns a task and its input blocks into the task's output
//! block. The executor owns scheduling; runners only compute. [`ChunkKernels`] is
//! the default runner and implements every [`TaskKind`].

use scirs2_core::ndarray_ext::{Array, Array2, ArrayD, Ix2, IxDyn};
use scirs2_core::random::{Rng, SeedableRng, StdRng};

use crate::error::KernelError;
use crate::overlap::{copy_region, CopyPlan, FlatCopy, RegionCopy};
use crate::task_graph::{Task, TaskKind};

/// A materialized chunk in standard row-major layout
pub type Block = ArrayD<f64>;

/// Computes one task's output block from its input blocks
///
/// `inputs` are in the order of `task.inputs`. Implementations must be pure:
/// running the same task on the same inputs twice yields the same block.
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &Task, inputs: &[&Block]) -> Result<Block, KernelError>;
}

/// Default chunk kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkKernels {
    check_finite: bool,
}

impl Default for ChunkKernels {
    fn default() -> Self {
        Self { check_finite: true }
    }
}

impl ChunkKernels {
    /// Create kernels; `check_finite` rejects products containing NaN or infinity
    pub fn new(check_finite: bool) -> Self {
        Self { check_finite }
    }
}

impl TaskRunner for ChunkKernels {
    fn run(&self, task: &Task, inputs: &[&Block]) -> Result<Block, KernelError> {
        if inputs.len() != task.inputs.len() {
            return Err(KernelError::InputCount {
                expected: task.inputs.len(),
                actual: inputs.len(),
            });
        }

        match &task.kind {
            TaskKind::Generate { seed } => generate(&task.shape, *seed),
            TaskKind::Reshape { plan } => match plan {
                CopyPlan::Flat(copies) => apply_flat(&task.shape, inputs, copies),
                CopyPlan::Region(copies) => apply_region(&task.shape, inputs, copies),
            },
            TaskKind::MultiplyAccumulate => {
                let block = multiply_accumulate(&task.shape, inputs)?;
                if self.check_finite {
                    let count = block.iter().filter(|v| !v.is_finite()).count();
                    if count > 0 {
                        return Err(KernelError::NonFinite { count });
                    }
                }
                Ok(block)
            }
        }
    }
}

/// Uniform `[0, 1)` values from a generator seeded with `seed`
pub fn generate(shape: &[usize], seed: u64) -> Result<Block, KernelError> {
    let len: usize = shape.iter().product();
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f64> = (0..len).map(|_| rng.random::<f64>()).collect();

    Array::from_shape_vec(IxDyn(shape), data).map_err(|e| KernelError::Layout(e.to_string()))
}

fn apply_flat(shape: &[usize], inputs: &[&Block], copies: &[FlatCopy]) -> Result<Block, KernelError> {
    let len: usize = shape.iter().product();
    let mut data = vec![0.0; len];

    let sources = contiguous_inputs(inputs)?;
    for copy in copies {
        let src = sources
            .get(copy.input)
            .ok_or(KernelError::InputCount {
                expected: copy.input + 1,
                actual: sources.len(),
            })?;
        let (src_end, dst_end) = (copy.src_offset + copy.len, copy.dst_offset + copy.len);
        if src_end > src.len() || dst_end > len {
            return Err(KernelError::Layout(format!(
                "copy {}..{} -> {}..{} exceeds block bounds",
                copy.src_offset, src_end, copy.dst_offset, dst_end
            )));
        }
        data[copy.dst_offset..dst_end].copy_from_slice(&src[copy.src_offset..src_end]);
    }

    Array::from_shape_vec(IxDyn(shape), data).map_err(|e| KernelError::Layout(e.to_string()))
}

fn apply_region(
    shape: &[usize],
    inputs: &[&Block],
    copies: &[RegionCopy],
) -> Result<Block, KernelError> {
    let len: usize = shape.iter().product();
    let mut data = vec![0.0; len];

    let sources = contiguous_inputs(inputs)?;
    for copy in copies {
        let (src, block) = sources
            .get(copy.input)
            .zip(inputs.get(copy.input))
            .ok_or(KernelError::InputCount {
                expected: copy.input + 1,
                actual: sources.len(),
            })?;
        let src_dims = block.shape();

        let fits = |start: &[usize], dims: &[usize]| {
            start.len() == dims.len()
                && copy.extent.len() == dims.len()
                && (0..dims.len()).all(|a| start[a] + copy.extent[a] <= dims[a])
        };
        if !fits(&copy.src_start, src_dims) || !fits(&copy.dst_start, shape) {
            return Err(KernelError::Layout(format!(
                "region {:?}+{:?} -> {:?} exceeds block bounds",
                copy.src_start, copy.extent, copy.dst_start
            )));
        }

        copy_region(
            src,
            src_dims,
            &copy.src_start,
            &mut data,
            shape,
            &copy.dst_start,
            &copy.extent,
        );
    }

    Array::from_shape_vec(IxDyn(shape), data).map_err(|e| KernelError::Layout(e.to_string()))
}

fn multiply_accumulate(shape: &[usize], inputs: &[&Block]) -> Result<Block, KernelError> {
    if inputs.is_empty() || inputs.len() % 2 != 0 {
        return Err(KernelError::InputCount {
            expected: inputs.len().max(1).next_multiple_of(2),
            actual: inputs.len(),
        });
    }
    if shape.len() != 2 {
        return Err(KernelError::Layout(format!(
            "product block must be two-dimensional, got shape {:?}",
            shape
        )));
    }

    let mut acc = Array2::<f64>::zeros((shape[0], shape[1]));

    for (pair, operands) in inputs.chunks_exact(2).enumerate() {
        let left = operands[0]
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| KernelError::Layout(e.to_string()))?;
        let right = operands[1]
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| KernelError::Layout(e.to_string()))?;

        if left.nrows() != shape[0] || right.ncols() != shape[1] || left.ncols() != right.nrows() {
            return Err(KernelError::InputShape {
                input: 2 * pair,
                expected: vec![shape[0], right.nrows()],
                actual: left.shape().to_vec(),
            });
        }

        acc += &left.dot(&right);
    }

    Ok(acc.into_dyn())
}

fn contiguous_inputs<'a>(inputs: &[&'a Block]) -> Result<Vec<&'a [f64]>, KernelError> {
    inputs
        .iter()
        .enumerate()
        .map(|(i, block)| {
            block
                .as_slice()
                .ok_or_else(|| KernelError::Layout(format!("input block {} is not contiguous", i)))
        })
        .collect()
}
