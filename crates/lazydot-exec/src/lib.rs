//! # lazydot-exec
//!
//! Deferred chunked arrays and their parallel execution.
//!
//! Array expressions are recorded by a [`GraphBuilder`] as a [`TaskGraph`] of
//! chunk-level tasks, then materialized by an [`Executor`] that keeps only the
//! blocks still needed by pending tasks alive.
//!
//! # Modules
//!
//! - [`task_graph`]: tasks, dependencies, orderings and estimates
//! - [`overlap`]: copy plans for reshape, rechunk and slice
//! - [`builder`]: [`GraphBuilder`] and [`ChunkedArray`]
//! - [`kernels`]: per-task computations behind the [`TaskRunner`] trait
//! - [`executor`]: the worker pool and its scheduler
//! - [`events`]: the [`ExecutionObserver`] trait
//! - [`progress`]: text progress bar observer
//! - [`profiling`]: per-operation timing observer
//! - [`sampler`]: background CPU and memory sampling
//! - [`tracing_support`]: subscriber setup for binaries
//!
//! # Example
//!
//! ```
//! use lazydot_core::{Chunking, Shape};
//! use lazydot_exec::{ExecConfig, Executor, GraphBuilder};
//!
//! let mut builder = GraphBuilder::new(42);
//! let a = builder.random("A", Chunking::regular(&Shape::new(vec![8, 8])?, &[4, 4])?);
//! let b = builder.random("B", Chunking::regular(&Shape::new(vec![8, 2])?, &[4, 2])?);
//! let ab = builder.matmul(&a, &b)?;
//! let graph = builder.into_graph();
//!
//! let output = Executor::new(ExecConfig::default()).execute(&graph, ab.tasks())?;
//! assert_eq!(output.chunks.len(), ab.num_chunks());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(warnings)]

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod kernels;
pub mod overlap;
pub mod profiling;
pub mod progress;
pub mod sampler;
pub mod task_graph;
pub mod tracing_support;

pub use builder::{ChunkedArray, GraphBuilder};
pub use config::ExecConfig;
pub use error::{ExecError, KernelError, SamplerError, TaskExecutionError};
pub use events::{ExecutionObserver, TaskEvent, TaskOutcome};
pub use executor::{ExecutionOutput, ExecutionStats, Executor};
pub use kernels::{Block, ChunkKernels, TaskRunner};
pub use profiling::{OperationStats, ProfileSummary, TaskProfiler};
pub use progress::{ProgressConfig, ProgressReporter};
pub use sampler::{
    ProcProbe, ProcessUsage, ResourceProbe, ResourceSample, ResourceSampler, ResourceSeries,
    SamplerHandle, SamplerStallWarning,
};
pub use task_graph::{OpKind, Task, TaskGraph, TaskId, TaskKind};
