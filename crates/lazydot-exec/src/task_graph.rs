//! Chunk-level task graphs
//!
//! A [`TaskGraph`] is an explicit, inspectable value describing a deferred array
//! expression. Every task produces one chunk of one array and depends only on
//! tasks that were added before it, so the graph is acyclic by construction.
//!
//! # Features
//!
//! - Tagged task kinds: `Generate`, `Reshape`, `MultiplyAccumulate`
//! - Deterministic topological order (Kahn's algorithm)
//! - Ancestor selection and depth-first priorities for a set of targets
//! - Memory and compute estimates
//!
//! # Example
//!
//! ```
//! use lazydot_core::ChunkIndex;
//! use lazydot_exec::task_graph::{Task, TaskGraph, TaskKind};
//!
//! let mut graph = TaskGraph::new();
//! let a = graph.add_task(Task::new(TaskKind::Generate { seed: 1 }, "A", ChunkIndex::new(vec![0, 0]), vec![], vec![2, 2]))?;
//! let b = graph.add_task(Task::new(TaskKind::Generate { seed: 2 }, "B", ChunkIndex::new(vec![0, 0]), vec![], vec![2, 2]))?;
//! let ab = graph.add_task(Task::new(TaskKind::MultiplyAccumulate, "AB", ChunkIndex::new(vec![0, 0]), vec![a, b], vec![2, 2]))?;
//!
//! assert_eq!(graph.topological_order(), vec![a, b, ab]);
//! # Ok::<(), lazydot_exec::ExecError>(())
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use lazydot_core::ChunkIndex;
use serde::Serialize;

use crate::error::ExecError;
use crate::overlap::CopyPlan;

/// Task identifier, the task's position in its graph
pub type TaskId = usize;

const ELEMENT_BYTES: usize = std::mem::size_of::<f64>();

/// Operation kind of a task, without parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OpKind {
    /// Fill a chunk with independent random values
    Generate,
    /// Assemble a chunk from pieces of other chunks
    Reshape,
    /// Sum of block products over the contracted axis
    MultiplyAccumulate,
}

impl OpKind {
    /// Short lowercase name used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Generate => "generate",
            OpKind::Reshape => "reshape",
            OpKind::MultiplyAccumulate => "multiply-accumulate",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation performed by a task, with its raw parameters
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Uniform `[0, 1)` values from a generator seeded with `seed`
    Generate { seed: u64 },
    /// Copy pieces of the input blocks into the output block
    Reshape { plan: CopyPlan },
    /// Inputs are `(left_k, right_k)` pairs; output is `sum_k left_k · right_k`
    MultiplyAccumulate,
}

impl TaskKind {
    /// Operation kind without parameters
    pub fn op(&self) -> OpKind {
        match self {
            TaskKind::Generate { .. } => OpKind::Generate,
            TaskKind::Reshape { .. } => OpKind::Reshape,
            TaskKind::MultiplyAccumulate => OpKind::MultiplyAccumulate,
        }
    }
}

/// One chunk-level unit of work
#[derive(Debug, Clone)]
pub struct Task {
    /// Task ID (assigned by the graph)
    pub id: TaskId,
    /// Operation and parameters
    pub kind: TaskKind,
    /// Name of the array this task produces a chunk of
    pub array: Arc<str>,
    /// Address of the produced chunk
    pub address: ChunkIndex,
    /// Input task IDs (dependencies)
    pub inputs: Vec<TaskId>,
    /// Shape of the produced block
    pub shape: Vec<usize>,
    /// Estimated computation cost (flops or copied elements)
    pub compute_cost: u64,
}

impl Task {
    /// Create a task; the id is assigned when it is added to a graph
    pub fn new(
        kind: TaskKind,
        array: impl Into<Arc<str>>,
        address: ChunkIndex,
        inputs: Vec<TaskId>,
        shape: Vec<usize>,
    ) -> Self {
        let elements: usize = shape.iter().product();
        Self {
            id: 0,
            kind,
            array: array.into(),
            address,
            inputs,
            shape,
            compute_cost: elements as u64,
        }
    }

    /// Set computation cost
    pub fn with_compute_cost(mut self, cost: u64) -> Self {
        self.compute_cost = cost;
        self
    }

    /// Operation kind
    pub fn op(&self) -> OpKind {
        self.kind.op()
    }

    /// Number of elements in the produced block
    pub fn elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the produced block in bytes
    pub fn memory_bytes(&self) -> usize {
        self.elements() * ELEMENT_BYTES
    }
}

/// Directed acyclic graph of chunk tasks
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    /// task id -> ids of tasks consuming it, one entry per input edge
    dependents: Vec<Vec<TaskId>>,
}

impl TaskGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task whose inputs are already in the graph
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::InvalidDependency`] if an input id does not refer to an
    /// earlier task. This is what keeps the graph acyclic.
    pub fn add_task(&mut self, task: Task) -> Result<TaskId, ExecError> {
        let id = self.tasks.len();
        if let Some(&input) = task.inputs.iter().find(|&&input| input >= id) {
            return Err(ExecError::InvalidDependency { task: id, input });
        }
        Ok(self.push_task(task))
    }

    /// Add a task built by this crate, whose inputs are known to precede it
    pub(crate) fn push_task(&mut self, mut task: Task) -> TaskId {
        let id = self.tasks.len();
        debug_assert!(task.inputs.iter().all(|&input| input < id));
        task.id = id;

        for &input in &task.inputs {
            self.dependents[input].push(id);
        }

        self.tasks.push(task);
        self.dependents.push(Vec::new());
        id
    }

    /// Get a task by ID
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All tasks in id order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks consuming the output of `id`, one entry per edge
    pub fn dependents(&self, id: TaskId) -> &[TaskId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks with no inputs
    pub fn roots(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.inputs.is_empty()).collect()
    }

    /// Tasks nothing depends on
    pub fn sinks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| self.dependents[t.id].is_empty())
            .collect()
    }

    /// Deterministic topological order (Kahn's algorithm, lowest id first)
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: Vec<usize> = self.tasks.iter().map(|t| t.inputs.len()).collect();

        let mut queue: VecDeque<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.inputs.is_empty())
            .map(|t| t.id)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);

            let mut new_ready = Vec::new();
            for &dep in &self.dependents[id] {
                in_degree[dep] -= 1;
                if in_degree[dep] == 0 {
                    new_ready.push(dep);
                }
            }
            new_ready.sort_unstable();
            queue.extend(new_ready);
        }

        debug_assert_eq!(order.len(), self.tasks.len());
        order
    }

    /// Depth-first post-order priorities for computing `targets`
    ///
    /// Returns one entry per task: its position in a post-order walk from the
    /// targets (inputs before consumers, targets in the given order), or `None` if
    /// the task is not an ancestor of any target. Following this order finishes
    /// one target's inputs before starting the next target's.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::UnknownTarget`] if a target id is not in the graph.
    pub fn priority_order(&self, targets: &[TaskId]) -> Result<Vec<Option<usize>>, ExecError> {
        let mut priority = vec![None; self.tasks.len()];
        let mut visited = vec![false; self.tasks.len()];
        let mut next = 0;

        for &target in targets {
            if target >= self.tasks.len() {
                return Err(ExecError::UnknownTarget {
                    task: target,
                    len: self.tasks.len(),
                });
            }
            if visited[target] {
                continue;
            }
            visited[target] = true;

            let mut stack: Vec<(TaskId, usize)> = vec![(target, 0)];
            while let Some(top) = stack.last_mut() {
                let id = top.0;
                let inputs = &self.tasks[id].inputs;
                if top.1 < inputs.len() {
                    let child = inputs[top.1];
                    top.1 += 1;
                    if !visited[child] {
                        visited[child] = true;
                        stack.push((child, 0));
                    }
                } else {
                    priority[id] = Some(next);
                    next += 1;
                    stack.pop();
                }
            }
        }

        Ok(priority)
    }

    /// Estimate total memory of all blocks
    pub fn total_memory(&self) -> usize {
        self.tasks.iter().map(Task::memory_bytes).sum()
    }

    /// Estimate total computation cost
    pub fn total_compute_cost(&self) -> u64 {
        self.tasks.iter().map(|t| t.compute_cost).sum()
    }

    /// Largest number of inputs of any task
    pub fn max_fan_in(&self) -> usize {
        self.tasks.iter().map(|t| t.inputs.len()).max().unwrap_or(0)
    }

    /// Number of tasks per operation kind
    pub fn op_counts(&self) -> BTreeMap<OpKind, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.op()).or_insert(0) += 1;
        }
        counts
    }
}
