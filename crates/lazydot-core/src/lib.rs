//! # lazydot-core
//!
//! Foundational types for the lazydot chunked execution engine.
//!
//! This crate provides:
//! - [`Shape`]: validated global array shapes with row-major linearization
//! - [`Chunking`]: per-axis chunk boundaries, including `auto` sizing
//! - [`ChunkIndex`]: chunk addresses and deterministic chunk iteration
//! - [`EmpiricalDistribution`]: the ECDF summary of a realized sample
//! - Build-time error types ([`ShapeMismatchError`], [`StatsError`])
//!
//! Nothing in this crate computes chunk data; materialization belongs to
//! `lazydot-exec`.

#![deny(warnings)]

pub mod chunking;
pub mod ecdf;
pub mod error;
pub mod shape;

pub use chunking::{
    regular_extents, ChunkIndex, ChunkIterator, ChunkSize, Chunking, DEFAULT_AUTO_CHUNK_BYTES,
};
pub use ecdf::EmpiricalDistribution;
pub use error::{ShapeMismatchError, StatsError};
pub use shape::{row_major_strides, Shape};
