//! Error types for graph execution
//!
//! Kernels report a [`KernelError`]; the executor attaches the failing task's
//! identity and surfaces the first one as a [`TaskExecutionError`] inside
//! [`ExecError`].

use std::io;

use lazydot_core::{ChunkIndex, ShapeMismatchError};
use thiserror::Error;

use crate::task_graph::{OpKind, Task, TaskId};

/// Failure of a single chunk computation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("numeric overflow: {count} non-finite value(s) in result")]
    NonFinite { count: usize },

    #[error("expected {expected} input block(s), got {actual}")]
    InputCount { expected: usize, actual: usize },

    #[error("input block {input} has shape {actual:?}, expected {expected:?}")]
    InputShape {
        input: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("input {input} was released before its last consumer ran")]
    MissingInput { input: TaskId },

    #[error("block layout error: {0}")]
    Layout(String),

    #[error("task panicked: {0}")]
    Panic(String),

    #[error("{0}")]
    Other(String),
}

/// A task failure with the identity of the failing task
#[derive(Error, Debug, Clone, PartialEq)]
#[error("task {task} ({op} of {array} chunk {address}) failed: {source}")]
pub struct TaskExecutionError {
    pub task: TaskId,
    pub op: OpKind,
    pub array: String,
    pub address: ChunkIndex,
    #[source]
    pub source: KernelError,
}

impl TaskExecutionError {
    /// Attach a task's identity to a kernel failure
    pub fn new(task: &Task, source: KernelError) -> Self {
        Self {
            task: task.id,
            op: task.op(),
            array: task.array.to_string(),
            address: task.address.clone(),
            source,
        }
    }
}

/// Errors from building or executing task graphs
#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Task(#[from] TaskExecutionError),

    #[error("target task {task} is not in the graph ({len} tasks)")]
    UnknownTarget { task: TaskId, len: usize },

    #[error("task {task} depends on task {input}, which is not an earlier task")]
    InvalidDependency { task: TaskId, input: TaskId },

    #[error("chunk of task {task} is missing from the execution output")]
    MissingChunk { task: TaskId },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    Shape(#[from] ShapeMismatchError),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Errors from starting the resource sampler
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("sampling interval must be positive")]
    ZeroInterval,

    #[error("failed to spawn sampler thread: {0}")]
    Spawn(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_graph::TaskKind;

    #[test]
    fn test_task_error_names_the_task() {
        let mut task = Task::new(
            TaskKind::MultiplyAccumulate,
            "matmul(A, B)",
            ChunkIndex::new(vec![3, 1]),
            vec![],
            vec![2, 2],
        );
        task.id = 17;

        let err = TaskExecutionError::new(&task, KernelError::NonFinite { count: 2 });
        let msg = err.to_string();

        assert!(msg.contains("task 17"));
        assert!(msg.contains("multiply-accumulate"));
        assert!(msg.contains("matmul(A, B)"));
        assert!(msg.contains("(3, 1)"));
        assert!(msg.contains("numeric overflow"));
    }

    #[test]
    fn test_exec_error_is_transparent_for_tasks() {
        let task = Task::new(
            TaskKind::Generate { seed: 0 },
            "A",
            ChunkIndex::new(vec![0]),
            vec![],
            vec![4],
        );
        let inner = TaskExecutionError::new(&task, KernelError::Other("boom".to_string()));
        let err: ExecError = inner.clone().into();

        assert_eq!(err.to_string(), inner.to_string());
    }
}
