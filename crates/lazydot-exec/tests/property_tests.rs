//! Property-based tests for graph construction and copy planning
//!
//! Uses proptest to check build-time validation and value preservation across
//! random shapes and chunkings.

use lazydot_core::{ChunkSize, Chunking, Shape, ShapeMismatchError};
use lazydot_exec::overlap::{common_refinement, contiguous_runs};
use lazydot_exec::{ExecConfig, Executor, GraphBuilder};
use proptest::prelude::*;

fn small_dims(rank: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..7, rank)
}

proptest! {
    /// Reshape fails exactly when the element counts differ
    #[test]
    fn test_reshape_validates_element_count(
        from in small_dims(2),
        to in small_dims(2),
    ) {
        let mut builder = GraphBuilder::new(1);
        let array = builder.random("A", Chunking::regular(&Shape::new(from.clone()).unwrap(), &[2, 2]).unwrap());
        let before = builder.graph().len();

        let result = builder.reshape(&array, Shape::new(to.clone()).unwrap(), &[ChunkSize::Auto, ChunkSize::Auto]);
        let same = from.iter().product::<usize>() == to.iter().product::<usize>();

        match result {
            Ok(reshaped) => {
                prop_assert!(same);
                prop_assert_eq!(reshaped.shape().dims(), &to[..]);
            }
            Err(ShapeMismatchError::ElementCount { from_size, to_size, .. }) => {
                prop_assert!(!same);
                prop_assert_ne!(from_size, to_size);
                // A rejected operation adds nothing to the graph
                prop_assert_eq!(builder.graph().len(), before);
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }

    /// Matrix product fails exactly when the contracted dimensions differ
    #[test]
    fn test_matmul_validates_inner_dimension(
        rows in 1usize..9,
        inner_left in 1usize..9,
        inner_right in 1usize..9,
        cols in 1usize..9,
        chunk in 1usize..5,
    ) {
        let mut builder = GraphBuilder::new(2);
        let left = builder.random("A", Chunking::regular(&Shape::new(vec![rows, inner_left]).unwrap(), &[chunk, chunk]).unwrap());
        let right = builder.random("B", Chunking::regular(&Shape::new(vec![inner_right, cols]).unwrap(), &[chunk + 1, chunk]).unwrap());

        match builder.matmul(&left, &right) {
            Ok(product) => {
                prop_assert_eq!(inner_left, inner_right);
                prop_assert_eq!(product.shape().dims(), &[rows, cols][..]);
                prop_assert_eq!(product.chunking().extents(0), left.chunking().extents(0));
                prop_assert_eq!(product.chunking().extents(1), right.chunking().extents(1));
            }
            Err(ShapeMismatchError::InnerDimension { left: l, right: r }) => {
                prop_assert_ne!(inner_left, inner_right);
                prop_assert_eq!(l, vec![rows, inner_left]);
                prop_assert_eq!(r, vec![inner_right, cols]);
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }

    /// Rechunking never changes values or their order
    #[test]
    fn test_rechunk_preserves_values(
        dims in small_dims(2),
        from in (1usize..5, 1usize..5),
        to in (1usize..5, 1usize..5),
    ) {
        let shape = Shape::new(dims).unwrap();
        let mut builder = GraphBuilder::new(3);
        let array = builder.random("A", Chunking::regular(&shape, &[from.0, from.1]).unwrap());
        let rechunked = builder.rechunk(&array, &[ChunkSize::Fixed(to.0), ChunkSize::Fixed(to.1)]).unwrap();
        let graph = builder.into_graph();

        let targets: Vec<usize> = array.tasks().iter().chain(rechunked.tasks()).copied().collect();
        let output = Executor::new(ExecConfig::new().num_workers(2)).execute(&graph, &targets).unwrap();

        prop_assert_eq!(array.assemble(&output).unwrap(), rechunked.assemble(&output).unwrap());
    }

    /// Contiguous runs tile a region exactly once, in row-major order
    #[test]
    fn test_contiguous_runs_cover_region(
        dims in small_dims(3),
        seed in (any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>()),
    ) {
        let raw = [seed.0, seed.1, seed.2, seed.3, seed.4, seed.5];
        let mut start = Vec::new();
        let mut end = Vec::new();
        for (axis, &dim) in dims.iter().enumerate() {
            let a = raw[2 * axis] as usize % dim;
            let b = raw[2 * axis + 1] as usize % dim;
            start.push(a.min(b));
            end.push(a.max(b) + 1);
        }

        let shape = Shape::new(dims.clone()).unwrap();
        let mut expected = Vec::new();
        for i in start[0]..end[0] {
            for j in start[1]..end[1] {
                for k in start[2]..end[2] {
                    expected.push(shape.flat_index(&[i, j, k]));
                }
            }
        }

        let runs = contiguous_runs(&dims, &start, &end);
        let mut covered = Vec::new();
        let mut local = 0;
        for run in &runs {
            prop_assert_eq!(run.local_offset, local);
            covered.extend(run.flat_start..run.flat_start + run.len);
            local += run.len;
        }
        prop_assert_eq!(covered, expected);
    }

    /// The common refinement keeps every boundary of both tilings
    #[test]
    fn test_common_refinement_keeps_boundaries(
        left in prop::collection::vec(1usize..6, 1..6),
        split in prop::collection::vec(1usize..6, 1..6),
    ) {
        let total: usize = left.iter().sum();
        // Second tiling of the same length
        let mut right = Vec::new();
        let mut acc = 0;
        for extent in split.iter().cycle() {
            let extent = (*extent).min(total - acc);
            right.push(extent);
            acc += extent;
            if acc == total {
                break;
            }
        }

        let refined = common_refinement(&left, &right);
        prop_assert_eq!(refined.iter().sum::<usize>(), total);
        prop_assert!(refined.iter().all(|&e| e > 0));

        let boundaries: Vec<usize> = refined
            .iter()
            .scan(0, |acc, &e| { *acc += e; Some(*acc) })
            .collect();
        for tiling in [&left, &right] {
            let mut acc = 0;
            for &e in tiling.iter() {
                acc += e;
                prop_assert!(boundaries.contains(&acc));
            }
        }
    }
}
