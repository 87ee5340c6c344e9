//! # lazydot
//!
//! Benchmark of a large chunked matrix product, `D = (A · B) · C`, evaluated
//! lazily chunk by chunk with bounded memory.
//!
//! This is the **meta crate**: it re-exports [`core`] and [`exec`] and hosts the
//! benchmark driver behind the `lazydot` binary.
//!
//! ## Quick Start
//!
//! ```
//! use lazydot::prelude::*;
//!
//! let mut builder = GraphBuilder::new(7);
//! let a = builder.random("A", Chunking::regular(&Shape::new(vec![4, 4])?, &[2, 2])?);
//! let b = builder.random("B", Chunking::regular(&Shape::new(vec![4, 4])?, &[2, 2])?);
//! let ab = builder.matmul(&a, &b)?;
//! let graph = builder.into_graph();
//!
//! let output = Executor::new(ExecConfig::default()).execute(&graph, ab.tasks())?;
//! assert_eq!(ab.assemble(&output)?.shape(), &[4, 4]);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Running the benchmark
//!
//! The `lazydot` binary takes no arguments. The full-size run multiplies a
//! `(1e6, 1e3)` matrix by a `(1e3, 1e6)` one; set `LAZYDOT_SCALE` to shrink
//! every dimension (see [`BenchmarkConfig::from_env`]). It writes
//! [`artifacts::ECDF_FILE`], [`artifacts::RESOURCES_FILE`] and
//! [`artifacts::RESOURCES_CHART_FILE`] to `LAZYDOT_OUT_DIR`.

#![deny(warnings)]

pub use lazydot_core as core;
pub use lazydot_exec as exec;

pub mod artifacts;
pub mod benchmark;

pub use artifacts::{write_artifacts, ArtifactPaths};
pub use benchmark::{build_graphs, run_benchmark, BenchmarkConfig, BenchmarkGraphs, BenchmarkReport};

pub mod prelude {
    //! Prelude module for convenient imports

    // Shapes and chunking
    pub use crate::core::{ChunkIndex, ChunkSize, Chunking, EmpiricalDistribution, Shape};

    // Graph construction and execution
    pub use crate::exec::{
        ChunkedArray, ExecConfig, ExecutionObserver, Executor, GraphBuilder, ProgressReporter,
        ResourceSampler, TaskGraph, TaskProfiler,
    };

    // Benchmark driver
    pub use crate::benchmark::{run_benchmark, BenchmarkConfig};
}
