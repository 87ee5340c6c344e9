//! Execution observers
//!
//! Observers are passed explicitly to
//! [`Executor::execute_observed`](crate::Executor::execute_observed). They are
//! called from worker threads, never while the scheduler lock is held, and must
//! not block for long.

use std::time::Duration;

use crate::executor::ExecutionStats;
use crate::task_graph::Task;

/// Outcome of one dispatched task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The block was produced and handed to its consumers
    Completed,
    /// The kernel failed
    Failed,
    /// The block was produced after the run had already failed
    Discarded,
}

/// Notification sent after a task finished running
#[derive(Debug, Clone, Copy)]
pub struct TaskEvent<'a> {
    pub task: &'a Task,
    pub outcome: TaskOutcome,
    /// Index of the worker that ran the task
    pub worker: usize,
    /// Time spent in the kernel
    pub duration: Duration,
    /// Tasks completed so far, including this one
    pub completed: usize,
    /// Tasks in the executed subgraph
    pub total: usize,
}

/// Receives execution progress
pub trait ExecutionObserver: Send + Sync {
    /// Called once before any task is dispatched
    fn on_start(&self, _total_tasks: usize) {}

    /// Called after every dispatched task, on the worker that ran it
    fn on_task_completed(&self, _event: &TaskEvent<'_>) {}

    /// Called once after all workers stopped
    fn on_finish(&self, _stats: &ExecutionStats, _succeeded: bool) {}
}
