//! Chunk-parallel graph executor
//!
//! The [`Executor`] materializes the targets of a [`TaskGraph`] on a pool of
//! scoped worker threads. Only the ancestors of the targets run.
//!
//! # Scheduling
//!
//! - Ready tasks are dispatched lowest depth-first priority first (see
//!   [`TaskGraph::priority_order`]), which finishes one output chunk's inputs
//!   before starting the next and keeps the live set small.
//! - A produced block stays alive only while a dependent that has not run yet
//!   still needs it. Target blocks are moved to the output.
//! - The first task failure cancels every task that has not been dispatched.
//!   Tasks already running finish and their blocks are discarded.
//!
//! All scheduler state sits behind one [`parking_lot::Mutex`]; the lock is
//! released while kernels and observers run.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::ExecConfig;
use crate::error::{ExecError, KernelError, TaskExecutionError};
use crate::events::{ExecutionObserver, TaskEvent, TaskOutcome};
use crate::kernels::{Block, ChunkKernels, TaskRunner};
use crate::task_graph::{Task, TaskGraph, TaskId};
use crate::tracing_support::{record_bytes, record_metric};

/// Summary of one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    /// Tasks in the executed subgraph
    pub tasks_total: usize,
    /// Tasks whose block was produced and delivered
    pub tasks_completed: usize,
    /// Tasks never dispatched because the run failed
    pub tasks_cancelled: usize,
    pub workers: usize,
    /// Tasks completed per worker
    pub tasks_per_worker: Vec<usize>,
    /// Most intermediate blocks alive at once
    pub peak_live_chunks: usize,
    /// Most intermediate bytes alive at once
    pub peak_live_bytes: usize,
    pub elapsed: Duration,
}

/// Materialized target blocks and run statistics
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub chunks: HashMap<TaskId, Arc<Block>>,
    pub stats: ExecutionStats,
}

impl ExecutionOutput {
    /// Block of a target task
    pub fn chunk(&self, task: TaskId) -> Option<&Arc<Block>> {
        self.chunks.get(&task)
    }
}

/// Runs task graphs on a worker pool
pub struct Executor {
    config: ExecConfig,
    runner: Arc<dyn TaskRunner>,
}

impl Executor {
    /// Create an executor with the default chunk kernels
    pub fn new(config: ExecConfig) -> Self {
        let runner = Arc::new(ChunkKernels::new(config.check_finite));
        Self { config, runner }
    }

    /// Create an executor with a custom task runner
    pub fn with_runner(config: ExecConfig, runner: Arc<dyn TaskRunner>) -> Self {
        Self { config, runner }
    }

    /// Get configuration
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Materialize the blocks of `targets`
    pub fn execute(
        &self,
        graph: &TaskGraph,
        targets: &[TaskId],
    ) -> Result<ExecutionOutput, ExecError> {
        self.execute_observed(graph, targets, &[])
    }

    /// Materialize the blocks of `targets`, reporting progress to `observers`
    ///
    /// # Errors
    ///
    /// - [`ExecError::UnknownTarget`] if a target is not in the graph
    /// - [`ExecError::Task`] with the first task failure
    /// - [`ExecError::Spawn`] if no worker thread could be started
    pub fn execute_observed(
        &self,
        graph: &TaskGraph,
        targets: &[TaskId],
        observers: &[&dyn ExecutionObserver],
    ) -> Result<ExecutionOutput, ExecError> {
        let started = Instant::now();
        let priority = graph.priority_order(targets)?;

        let mut is_target = vec![false; graph.len()];
        for &target in targets {
            is_target[target] = true;
        }

        let mut state = SchedulerState {
            pending: vec![0; graph.len()],
            remaining_uses: vec![0; graph.len()],
            ..SchedulerState::default()
        };

        let mut total = 0;
        for task in graph.tasks() {
            let Some(rank) = priority[task.id] else {
                continue;
            };
            total += 1;
            state.pending[task.id] = task.inputs.len();
            for &input in &task.inputs {
                state.remaining_uses[input] += 1;
            }
            if task.inputs.is_empty() {
                state.ready.push(Reverse((rank, task.id)));
            }
        }

        let workers = self.config.resolved_workers().min(total).max(1);
        state.tasks_per_worker = vec![0; workers];

        tracing::info!(
            tasks = total,
            targets = targets.len(),
            workers,
            "execution started"
        );
        for observer in observers {
            observer.on_start(total);
        }

        let shared = Shared {
            state: Mutex::new(state),
            wakeup: Condvar::new(),
            graph,
            priority: &priority,
            is_target: &is_target,
            total,
            runner: self.runner.as_ref(),
            observers,
        };

        let mut spawned = 0;
        let mut spawn_error = None;
        if total > 0 {
            thread::scope(|scope| {
                for worker in 0..workers {
                    let shared = &shared;
                    let result = thread::Builder::new()
                        .name(format!("{}-{}", self.config.thread_name, worker))
                        .spawn_scoped(scope, move || shared.work(worker));
                    match result {
                        Ok(_) => spawned += 1,
                        Err(e) => {
                            tracing::warn!(worker, error = %e, "failed to spawn worker");
                            spawn_error = Some(e);
                            break;
                        }
                    }
                }
                // Scoped threads are joined when the scope ends
            });
        }

        let state = shared.state.into_inner();
        let stats = ExecutionStats {
            tasks_total: total,
            tasks_completed: state.completed,
            tasks_cancelled: total - state.dispatched,
            workers: spawned,
            tasks_per_worker: state.tasks_per_worker,
            peak_live_chunks: state.peak_live_chunks,
            peak_live_bytes: state.peak_live_bytes,
            elapsed: started.elapsed(),
        };

        if spawned == 0 {
            if let Some(e) = spawn_error {
                for observer in observers {
                    observer.on_finish(&stats, false);
                }
                return Err(ExecError::Spawn(e));
            }
        }

        if let Some(failure) = state.failure {
            tracing::error!(
                task = failure.task,
                op = %failure.op,
                array = %failure.array,
                completed = stats.tasks_completed,
                cancelled = stats.tasks_cancelled,
                error = %failure.source,
                "execution failed"
            );
            for observer in observers {
                observer.on_finish(&stats, false);
            }
            return Err(ExecError::Task(failure));
        }

        for &target in targets {
            if !state.outputs.contains_key(&target) {
                return Err(ExecError::MissingChunk { task: target });
            }
        }

        tracing::info!(
            tasks = stats.tasks_completed,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            peak_live_chunks = stats.peak_live_chunks,
            peak_live_bytes = stats.peak_live_bytes,
            "execution finished"
        );
        record_metric("peak_live_chunks", stats.peak_live_chunks as f64);
        record_bytes("peak_live", stats.peak_live_bytes);
        record_bytes(
            "targets",
            state.outputs.values().map(|block| block_bytes(block)).sum(),
        );
        for observer in observers {
            observer.on_finish(&stats, true);
        }

        Ok(ExecutionOutput {
            chunks: state.outputs,
            stats,
        })
    }
}

#[derive(Default)]
struct SchedulerState {
    ready: BinaryHeap<Reverse<(usize, TaskId)>>,
    /// Inputs not yet produced, per task
    pending: Vec<usize>,
    /// Consumers not yet run, per task (one per input edge)
    remaining_uses: Vec<usize>,
    /// Live intermediate blocks
    results: HashMap<TaskId, Arc<Block>>,
    outputs: HashMap<TaskId, Arc<Block>>,
    in_flight: usize,
    dispatched: usize,
    completed: usize,
    failure: Option<TaskExecutionError>,
    tasks_per_worker: Vec<usize>,
    live_bytes: usize,
    peak_live_chunks: usize,
    peak_live_bytes: usize,
}

impl SchedulerState {
    fn complete(&mut self, task: &Task, block: Block, worker: usize, shared: &Shared<'_>) {
        self.completed += 1;
        self.tasks_per_worker[worker] += 1;

        for &input in &task.inputs {
            self.remaining_uses[input] -= 1;
            if self.remaining_uses[input] == 0 {
                if let Some(released) = self.results.remove(&input) {
                    self.live_bytes -= block_bytes(&released);
                }
            }
        }

        let block = Arc::new(block);
        if shared.is_target[task.id] {
            self.outputs.insert(task.id, Arc::clone(&block));
        }
        if self.remaining_uses[task.id] > 0 {
            self.live_bytes += block_bytes(&block);
            self.results.insert(task.id, block);
            self.peak_live_chunks = self.peak_live_chunks.max(self.results.len());
            self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
        }

        for &dependent in shared.graph.dependents(task.id) {
            let Some(rank) = shared.priority[dependent] else {
                continue;
            };
            self.pending[dependent] -= 1;
            if self.pending[dependent] == 0 {
                self.ready.push(Reverse((rank, dependent)));
            }
        }
    }

    fn fail(&mut self, task: &Task, error: KernelError) {
        if self.failure.is_some() {
            return;
        }
        tracing::debug!(
            task = task.id,
            cancelled = self.ready.len(),
            "cancelling pending tasks"
        );
        self.ready.clear();
        self.failure = Some(TaskExecutionError::new(task, error));
    }
}

struct Shared<'a> {
    state: Mutex<SchedulerState>,
    wakeup: Condvar,
    graph: &'a TaskGraph,
    priority: &'a [Option<usize>],
    is_target: &'a [bool],
    total: usize,
    runner: &'a dyn TaskRunner,
    observers: &'a [&'a dyn ExecutionObserver],
}

type Dispatch<'g> = (&'g Task, Result<Vec<Arc<Block>>, KernelError>);

impl<'a> Shared<'a> {
    fn work(&self, worker: usize) {
        while let Some((task, inputs)) = self.next_task() {
            let started = Instant::now();
            let result = inputs.and_then(|blocks| {
                let refs: Vec<&Block> = blocks.iter().map(Arc::as_ref).collect();
                run_guarded(self.runner, task, &refs)
            });
            let duration = started.elapsed();

            let mut state = self.state.lock();
            state.in_flight -= 1;
            let outcome = match result {
                Ok(block) if state.failure.is_none() => {
                    state.complete(task, block, worker, self);
                    TaskOutcome::Completed
                }
                Ok(_) => TaskOutcome::Discarded,
                Err(error) => {
                    state.fail(task, error);
                    TaskOutcome::Failed
                }
            };
            let completed = state.completed;
            drop(state);
            self.wakeup.notify_all();

            tracing::debug!(
                task = task.id,
                op = %task.op(),
                array = %task.array,
                chunk = %task.address,
                worker,
                duration_us = duration.as_micros() as u64,
                ?outcome,
                "task finished"
            );

            let event = TaskEvent {
                task,
                outcome,
                worker,
                duration,
                completed,
                total: self.total,
            };
            for observer in self.observers {
                observer.on_task_completed(&event);
            }
        }
    }

    /// Block until a task is ready, or return `None` when no more will become ready
    fn next_task(&self) -> Option<Dispatch<'a>> {
        let mut state = self.state.lock();
        loop {
            if state.failure.is_some() || state.completed == self.total {
                return None;
            }

            if let Some(Reverse((_, id))) = state.ready.pop() {
                let task = &self.graph.tasks()[id];
                let inputs: Result<Vec<Arc<Block>>, KernelError> = task
                    .inputs
                    .iter()
                    .map(|input| {
                        state
                            .results
                            .get(input)
                            .cloned()
                            .ok_or(KernelError::MissingInput { input: *input })
                    })
                    .collect();
                state.in_flight += 1;
                state.dispatched += 1;
                return Some((task, inputs));
            }

            if state.in_flight == 0 {
                return None;
            }
            self.wakeup.wait(&mut state);
        }
    }
}

fn run_guarded(runner: &dyn TaskRunner, task: &Task, inputs: &[&Block]) -> Result<Block, KernelError> {
    panic::catch_unwind(AssertUnwindSafe(|| runner.run(task, inputs))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Err(KernelError::Panic(message))
    })
}

fn block_bytes(block: &Block) -> usize {
    block.len() * std::mem::size_of::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_graph::TaskKind;
    use lazydot_core::ChunkIndex;

    fn generate(graph: &mut TaskGraph, seed: u64) -> TaskId {
        graph
            .add_task(Task::new(
                TaskKind::Generate { seed },
                "A",
                ChunkIndex::new(vec![0, 0]),
                vec![],
                vec![2, 2],
            ))
            .unwrap()
    }

    fn multiply(graph: &mut TaskGraph, inputs: Vec<TaskId>) -> TaskId {
        graph
            .add_task(Task::new(
                TaskKind::MultiplyAccumulate,
                "AB",
                ChunkIndex::new(vec![0, 0]),
                inputs,
                vec![2, 2],
            ))
            .unwrap()
    }

    #[test]
    fn test_executes_only_ancestors() {
        let mut graph = TaskGraph::new();
        let a = generate(&mut graph, 1);
        let b = generate(&mut graph, 2);
        let unused = generate(&mut graph, 3);
        let ab = multiply(&mut graph, vec![a, b]);

        let executor = Executor::new(ExecConfig::new().num_workers(2));
        let output = executor.execute(&graph, &[ab]).unwrap();

        assert_eq!(output.stats.tasks_total, 3);
        assert_eq!(output.stats.tasks_completed, 3);
        assert_eq!(output.chunks.len(), 1);
        assert!(output.chunk(ab).is_some());
        assert!(output.chunk(unused).is_none());
    }

    #[test]
    fn test_finished_run_records_metrics() {
        let mut graph = TaskGraph::new();
        let a = generate(&mut graph, 1);
        let b = generate(&mut graph, 2);
        let ab = multiply(&mut graph, vec![a, b]);

        let mut output = None;
        let logged = crate::tracing_support::capture_events(|| {
            let executor = Executor::new(ExecConfig::new().num_workers(1));
            output = Some(executor.execute(&graph, &[ab]).unwrap());
        });
        let stats = output.unwrap().stats;

        let peak = logged
            .lines()
            .find(|line| line.contains("metric_recorded") && line.contains("peak_live_chunks"))
            .unwrap();
        assert!(peak.contains(&format!("value={:?}", stats.peak_live_chunks as f64)));
        assert!(logged
            .lines()
            .any(|line| line.contains("bytes_processed")
                && line.contains("targets")
                && line.contains("bytes=32")));
        assert!(logged.lines().any(|line| line.contains("bytes_processed")
            && line.contains("peak_live")
            && line.contains(&format!("bytes={}", stats.peak_live_bytes))));
    }

    #[test]
    fn test_empty_targets() {
        let graph = TaskGraph::new();
        let output = Executor::new(ExecConfig::default()).execute(&graph, &[]).unwrap();

        assert!(output.chunks.is_empty());
        assert_eq!(output.stats.tasks_total, 0);
    }

    #[test]
    fn test_unknown_target() {
        let graph = TaskGraph::new();
        let result = Executor::new(ExecConfig::default()).execute(&graph, &[0]);
        assert!(matches!(result, Err(ExecError::UnknownTarget { .. })));
    }

    #[test]
    fn test_target_that_is_also_an_input() {
        let mut graph = TaskGraph::new();
        let a = generate(&mut graph, 1);
        let aa = multiply(&mut graph, vec![a, a]);

        let output = Executor::new(ExecConfig::new().num_workers(1))
            .execute(&graph, &[a, aa])
            .unwrap();

        let block_a = output.chunk(a).unwrap();
        let expected = block_a
            .view()
            .into_dimensionality::<scirs2_core::ndarray_ext::Ix2>()
            .unwrap()
            .dot(
                &block_a
                    .view()
                    .into_dimensionality::<scirs2_core::ndarray_ext::Ix2>()
                    .unwrap(),
            );
        assert_eq!(**output.chunk(aa).unwrap(), expected.into_dyn());
    }

    #[test]
    fn test_panic_becomes_task_error() {
        struct Panicking;
        impl TaskRunner for Panicking {
            fn run(&self, _task: &Task, _inputs: &[&Block]) -> Result<Block, KernelError> {
                panic!("kernel exploded");
            }
        }

        let mut graph = TaskGraph::new();
        let a = generate(&mut graph, 1);

        let executor = Executor::with_runner(ExecConfig::new().num_workers(1), Arc::new(Panicking));
        match executor.execute(&graph, &[a]) {
            Err(ExecError::Task(err)) => {
                assert_eq!(err.task, a);
                assert_eq!(err.source, KernelError::Panic("kernel exploded".to_string()));
            }
            other => panic!("expected task error, got {:?}", other.map(|o| o.stats)),
        }
    }

    #[test]
    fn test_run_guarded_passes_results_through() {
        let kernels = ChunkKernels::default();
        let task = Task::new(
            TaskKind::Generate { seed: 9 },
            "A",
            ChunkIndex::new(vec![0]),
            vec![],
            vec![3],
        );
        let block = run_guarded(&kernels, &task, &[]).unwrap();
        assert_eq!(block.len(), 3);
    }
}
