//! Overlaps between chunk layouts
//!
//! Reshape, rechunk and slice tasks assemble their output block from pieces of
//! input blocks. This module computes, at graph-build time, which input chunks an
//! output chunk touches and the copies that move the data, so kernels only ever
//! execute precomputed plans.
//!
//! Two plan shapes exist:
//!
//! - [`FlatCopy`] for reshape: the output chunk is split into runs that are
//!   contiguous in the row-major flattened index space, and each run is cut where
//!   it crosses an input chunk boundary.
//! - [`RegionCopy`] for rechunk and slice: the shape is unchanged (up to an
//!   origin shift), so overlaps are computed per axis and crossed.

use std::collections::HashMap;

use lazydot_core::{row_major_strides, ChunkIndex, ChunkIterator, Chunking};

/// A contiguous copy between flat block buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatCopy {
    /// Position of the source block in the task's input list
    pub input: usize,
    pub src_offset: usize,
    pub dst_offset: usize,
    pub len: usize,
}

/// A rectangular copy between blocks of equal rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCopy {
    /// Position of the source block in the task's input list
    pub input: usize,
    /// Start of the region inside the source block
    pub src_start: Vec<usize>,
    /// Start of the region inside the destination block
    pub dst_start: Vec<usize>,
    pub extent: Vec<usize>,
}

/// Copy plan of a reshape task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPlan {
    Flat(Vec<FlatCopy>),
    Region(Vec<RegionCopy>),
}

impl CopyPlan {
    /// Number of copies in the plan
    pub fn len(&self) -> usize {
        match self {
            CopyPlan::Flat(copies) => copies.len(),
            CopyPlan::Region(copies) => copies.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A run of consecutive flat positions inside a region of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatRun {
    /// Flat position of the first element in the whole array
    pub flat_start: usize,
    /// Position of the first element inside the region, row-major
    pub local_offset: usize,
    pub len: usize,
}

/// Decompose the region `[start, end)` of an array into row-major contiguous runs
///
/// Trailing axes that the region spans completely merge into one run, so a chunk
/// of full rows is a single run.
pub fn contiguous_runs(dims: &[usize], start: &[usize], end: &[usize]) -> Vec<FlatRun> {
    let rank = dims.len();
    let strides = row_major_strides(dims);

    let j = split_axis(dims, start, end);
    let run_len = (end[j] - start[j]) * strides[j];

    let mut index: Vec<usize> = start[..j].to_vec();
    let mut runs = Vec::new();
    let mut local_offset = 0;

    loop {
        let flat_start = index
            .iter()
            .zip(&strides)
            .map(|(&i, &s)| i * s)
            .sum::<usize>()
            + start[j] * strides[j];

        runs.push(FlatRun {
            flat_start,
            local_offset,
            len: run_len,
        });
        local_offset += run_len;

        // Odometer over the axes before j
        let mut axis = j;
        loop {
            if axis == 0 {
                debug_assert_eq!(
                    local_offset,
                    (0..rank).map(|a| end[a] - start[a]).product::<usize>()
                );
                return runs;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < end[axis] {
                break;
            }
            index[axis] = start[axis];
        }
    }
}

/// Innermost axis at which a region stops being contiguous
///
/// Every axis after the returned one is spanned completely by the region.
fn split_axis(dims: &[usize], start: &[usize], end: &[usize]) -> usize {
    let mut j = dims.len() - 1;
    while j > 0 && start[j] == 0 && end[j] == dims[j] {
        j -= 1;
    }
    j
}

/// Plan the copies that fill the output region `[dst_start, dst_end)` of an array
/// with shape `dst_dims` from the chunks of `src`, where both arrays share the
/// same row-major flat index space
///
/// Returns the linear indices of the source chunks in input-slot order, and the
/// copies referring to those slots.
pub fn flat_copy_plan(
    src: &Chunking,
    dst_dims: &[usize],
    dst_start: &[usize],
    dst_end: &[usize],
) -> (Vec<usize>, Vec<FlatCopy>) {
    let src_dims = src.shape().dims();
    let src_strides = row_major_strides(src_dims);
    let num_chunks = src.num_chunks();
    let rank = src_dims.len();

    let mut slots: Vec<usize> = Vec::new();
    let mut slot_of: HashMap<usize, usize> = HashMap::new();
    let mut copies = Vec::new();

    for run in contiguous_runs(dst_dims, dst_start, dst_end) {
        let stop = run.flat_start + run.len;
        let mut position = run.flat_start;

        while position < stop {
            let index = unravel(position, &src_strides);
            let chunk = ChunkIndex::new((0..rank).map(|a| src.locate(a, index[a])).collect());
            let (chunk_start, chunk_end) = src.chunk_bounds(&chunk);

            // Elements from `position` stay inside this chunk until the end of its
            // contiguous stretch along the split axis
            let j = split_axis(src_dims, &chunk_start, &chunk_end);
            let prefix: usize = (0..j).map(|a| index[a] * src_strides[a]).sum();
            let stretch_end = prefix + chunk_end[j] * src_strides[j];
            let len = (stretch_end - position).min(stop - position);

            let local_dims: Vec<usize> = (0..rank).map(|a| chunk_end[a] - chunk_start[a]).collect();
            let local_strides = row_major_strides(&local_dims);
            let src_offset = (0..rank)
                .map(|a| (index[a] - chunk_start[a]) * local_strides[a])
                .sum();

            let linear = chunk.to_linear(&num_chunks);
            let input = *slot_of.entry(linear).or_insert_with(|| {
                slots.push(linear);
                slots.len() - 1
            });

            copies.push(FlatCopy {
                input,
                src_offset,
                dst_offset: run.local_offset + (position - run.flat_start),
                len,
            });
            position += len;
        }
    }

    (slots, copies)
}

/// Plan the copies that fill the output region `[dst_start, dst_end)` from the
/// chunks of `src`, where output position `p` reads source position `p + origin`
///
/// Returns the linear indices of the source chunks in input-slot order, and the
/// copies referring to those slots.
pub fn region_copy_plan(
    src: &Chunking,
    origin: &[usize],
    dst_start: &[usize],
    dst_end: &[usize],
) -> (Vec<usize>, Vec<RegionCopy>) {
    let rank = src.rank();
    let num_chunks = src.num_chunks();

    // Per axis: (source chunk, start in source chunk, start in output chunk, length)
    let per_axis: Vec<Vec<(usize, usize, usize, usize)>> = (0..rank)
        .map(|axis| {
            let offsets = src.offsets(axis);
            let lo = dst_start[axis] + origin[axis];
            let hi = dst_end[axis] + origin[axis];

            let mut pieces = Vec::new();
            let mut position = lo;
            while position < hi {
                let chunk = src.locate(axis, position);
                let stop = offsets[chunk + 1].min(hi);
                pieces.push((chunk, position - offsets[chunk], position - lo, stop - position));
                position = stop;
            }
            pieces
        })
        .collect();

    let counts: Vec<usize> = per_axis.iter().map(Vec::len).collect();
    let mut slots = Vec::with_capacity(counts.iter().product());
    let mut copies = Vec::with_capacity(slots.capacity());

    for combination in ChunkIterator::new(counts) {
        let pieces: Vec<&(usize, usize, usize, usize)> = combination
            .coords
            .iter()
            .enumerate()
            .map(|(axis, &p)| &per_axis[axis][p])
            .collect();

        let chunk = ChunkIndex::new(pieces.iter().map(|p| p.0).collect());
        slots.push(chunk.to_linear(&num_chunks));

        copies.push(RegionCopy {
            input: copies.len(),
            src_start: pieces.iter().map(|p| p.1).collect(),
            dst_start: pieces.iter().map(|p| p.2).collect(),
            extent: pieces.iter().map(|p| p.3).collect(),
        });
    }

    (slots, copies)
}

/// Copy a rectangular region between two row-major buffers
///
/// `src_dims` and `dst_dims` are the full shapes of the buffers; the region has
/// shape `extent` and starts at `src_start` in the source and `dst_start` in the
/// destination.
pub fn copy_region(
    src: &[f64],
    src_dims: &[usize],
    src_start: &[usize],
    dst: &mut [f64],
    dst_dims: &[usize],
    dst_start: &[usize],
    extent: &[usize],
) {
    let rank = extent.len();
    if rank == 0 || extent.iter().any(|&e| e == 0) {
        return;
    }

    let src_strides = row_major_strides(src_dims);
    let dst_strides = row_major_strides(dst_dims);
    let row = extent[rank - 1];

    for outer in ChunkIterator::new(extent[..rank - 1].to_vec()) {
        let mut src_offset = src_start[rank - 1];
        let mut dst_offset = dst_start[rank - 1];
        for (axis, &i) in outer.coords.iter().enumerate() {
            src_offset += (src_start[axis] + i) * src_strides[axis];
            dst_offset += (dst_start[axis] + i) * dst_strides[axis];
        }
        dst[dst_offset..dst_offset + row].copy_from_slice(&src[src_offset..src_offset + row]);
    }
}

/// Sorted union of the chunk boundaries of two tilings of the same axis
pub fn common_refinement(left: &[usize], right: &[usize]) -> Vec<usize> {
    let mut boundaries: Vec<usize> = Vec::with_capacity(left.len() + right.len());
    for extents in [left, right] {
        let mut acc = 0;
        for &e in extents {
            acc += e;
            boundaries.push(acc);
        }
    }
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut previous = 0;
    boundaries
        .into_iter()
        .map(|b| {
            let extent = b - previous;
            previous = b;
            extent
        })
        .collect()
}

fn unravel(mut flat: usize, strides: &[usize]) -> Vec<usize> {
    strides
        .iter()
        .map(|&stride| {
            let i = flat / stride;
            flat %= stride;
            i
        })
        .collect()
}
