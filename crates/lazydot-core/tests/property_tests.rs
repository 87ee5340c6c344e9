//! Property-based tests for chunkings and empirical distributions

use lazydot_core::{
    ChunkIndex, ChunkSize, Chunking, EmpiricalDistribution, Shape, ShapeMismatchError,
    DEFAULT_AUTO_CHUNK_BYTES,
};
use proptest::prelude::*;

fn chunk_size() -> impl Strategy<Value = ChunkSize> {
    prop_oneof![
        (1usize..20).prop_map(ChunkSize::Fixed),
        Just(ChunkSize::Full),
        Just(ChunkSize::Auto),
    ]
}

proptest! {
    /// Resolved extents are positive and sum to the axis length
    #[test]
    fn test_resolved_extents_sum_to_shape(
        dims in prop::collection::vec(1usize..50, 1..4),
        sizes in prop::collection::vec(chunk_size(), 3),
        limit in 8usize..4096,
    ) {
        let shape = Shape::new(dims.clone()).unwrap();
        let sizes = &sizes[..dims.len()];
        let chunking = Chunking::resolve(&shape, sizes, limit).unwrap();

        for (axis, &dim) in dims.iter().enumerate() {
            let extents = chunking.extents(axis);
            prop_assert!(extents.iter().all(|&e| e > 0));
            prop_assert_eq!(extents.iter().sum::<usize>(), dim);
            // Only the last chunk of a regular axis may be smaller
            if extents.len() > 1 {
                prop_assert!(extents[..extents.len() - 1].iter().all(|&e| e == extents[0]));
            }
            if sizes[axis] == ChunkSize::Full {
                prop_assert_eq!(extents, &[dim][..]);
            }
        }
    }

    /// Auto sizes respect the byte budget whenever fixed axes leave room
    #[test]
    fn test_auto_chunks_fit_budget(
        rows in 1usize..2000,
        cols in 1usize..2000,
        limit_elements in 1usize..10_000,
    ) {
        let shape = Shape::new(vec![rows, cols]).unwrap();
        let chunking = Chunking::resolve(&shape, &[ChunkSize::Auto, ChunkSize::Auto], limit_elements * 8).unwrap();
        prop_assert!(chunking.max_chunk_elements() <= limit_elements.max(1));
    }

    /// Explicit extents are accepted exactly when they tile the axis
    #[test]
    fn test_explicit_extents_validation(
        dim in 1usize..40,
        extents in prop::collection::vec(0usize..10, 1..8),
    ) {
        let shape = Shape::new(vec![dim]).unwrap();
        let result = Chunking::new(&shape, vec![extents.clone()]);
        let valid = extents.iter().all(|&e| e > 0) && extents.iter().sum::<usize>() == dim;

        match result {
            Ok(chunking) => {
                prop_assert!(valid);
                prop_assert_eq!(chunking.extents(0), &extents[..]);
            }
            Err(ShapeMismatchError::ZeroExtent { .. }) => prop_assert!(extents.contains(&0)),
            Err(ShapeMismatchError::ExtentSum { .. }) => prop_assert!(!valid),
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }

    /// Chunks tile the array: every element lies in exactly one chunk
    #[test]
    fn test_chunks_cover_every_element(
        dims in prop::collection::vec(1usize..9, 2),
        chunk in prop::collection::vec(1usize..5, 2),
    ) {
        let shape = Shape::new(dims.clone()).unwrap();
        let chunking = Chunking::regular(&shape, &chunk).unwrap();

        let mut hits = vec![0usize; shape.size()];
        let mut visited = 0;
        for (linear, index) in chunking.iter().enumerate() {
            prop_assert_eq!(index.to_linear(&chunking.num_chunks()), linear);
            prop_assert_eq!(ChunkIndex::from_linear(linear, &chunking.num_chunks()), index.clone());

            let (start, end) = chunking.chunk_bounds(&index);
            for i in start[0]..end[0] {
                for j in start[1]..end[1] {
                    hits[shape.flat_index(&[i, j])] += 1;
                    prop_assert_eq!(chunking.locate(0, i), index.coords[0]);
                    prop_assert_eq!(chunking.locate(1, j), index.coords[1]);
                }
            }
            visited += 1;
        }

        prop_assert_eq!(visited, chunking.total_chunks());
        prop_assert!(hits.iter().all(|&h| h == 1));
    }

    /// Flat and multi-dimensional indices convert both ways
    #[test]
    fn test_flat_index_unravel(
        dims in prop::collection::vec(1usize..8, 1..4),
        position in any::<usize>(),
    ) {
        let shape = Shape::new(dims).unwrap();
        let flat = position % shape.size();
        prop_assert_eq!(shape.flat_index(&shape.unravel(flat)), flat);
    }

    /// The ECDF is a non-decreasing step function ending at one
    #[test]
    fn test_ecdf_monotone(
        sample in prop::collection::vec(-1000.0f64..1000.0, 1..200),
    ) {
        let ecdf = EmpiricalDistribution::new(&sample).unwrap();

        prop_assert_eq!(ecdf.sample_len(), sample.len());
        prop_assert!(ecdf.x().windows(2).all(|w| w[0] < w[1]));
        prop_assert!(ecdf.y().windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(ecdf.y().last().copied(), Some(1.0));

        for &value in &sample {
            let below_or_equal = sample.iter().filter(|&&v| v <= value).count();
            let expected = below_or_equal as f64 / sample.len() as f64;
            prop_assert!((ecdf.eval(value) - expected).abs() < 1e-12);
        }
        prop_assert_eq!(ecdf.eval(f64::NEG_INFINITY), 0.0);
        prop_assert_eq!(ecdf.eval(f64::INFINITY), 1.0);
    }
}

#[test]
fn test_default_budget_is_128_mib() {
    assert_eq!(DEFAULT_AUTO_CHUNK_BYTES, 128 * 1024 * 1024);
}
