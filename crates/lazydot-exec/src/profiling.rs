//! Per-operation task profiling
//!
//! [`TaskProfiler`] is an [`ExecutionObserver`] that aggregates kernel timings
//! by [`OpKind`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use lazydot_exec::profiling::TaskProfiler;
//! use lazydot_exec::task_graph::OpKind;
//!
//! let profiler = TaskProfiler::new();
//! profiler.record(OpKind::Generate, Duration::from_millis(4), 800);
//! profiler.record(OpKind::Generate, Duration::from_millis(2), 800);
//!
//! let stats = profiler.operation_stats(OpKind::Generate).unwrap();
//! assert_eq!(stats.call_count, 2);
//! assert_eq!(stats.avg_time, Duration::from_millis(3));
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::{ExecutionObserver, TaskEvent, TaskOutcome};
use crate::executor::ExecutionStats;
use crate::task_graph::OpKind;

/// Performance statistics for one operation kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    /// Number of tasks run
    pub call_count: usize,
    /// Total time spent in kernels
    pub total_time: Duration,
    /// Minimum time for a single task
    pub min_time: Duration,
    /// Maximum time for a single task
    pub max_time: Duration,
    /// Average time per task
    pub avg_time: Duration,
    /// Total bytes of produced blocks
    pub bytes_written: u64,
}

impl OperationStats {
    fn new() -> Self {
        Self {
            call_count: 0,
            total_time: Duration::ZERO,
            min_time: Duration::MAX,
            max_time: Duration::ZERO,
            avg_time: Duration::ZERO,
            bytes_written: 0,
        }
    }

    fn update(&mut self, duration: Duration, bytes_written: u64) {
        self.call_count += 1;
        self.total_time += duration;
        self.min_time = self.min_time.min(duration);
        self.max_time = self.max_time.max(duration);
        self.avg_time = self.total_time / self.call_count as u32;
        self.bytes_written += bytes_written;
    }
}

struct ProfilerState {
    stats: BTreeMap<OpKind, OperationStats>,
    start_time: Instant,
}

/// Thread-safe profiler fed by execution events
pub struct TaskProfiler {
    state: Mutex<ProfilerState>,
}

impl TaskProfiler {
    /// Create a new profiler
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProfilerState {
                stats: BTreeMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    /// Record one task run
    pub fn record(&self, op: OpKind, duration: Duration, bytes_written: u64) {
        self.state
            .lock()
            .stats
            .entry(op)
            .or_insert_with(OperationStats::new)
            .update(duration, bytes_written);
    }

    /// Get statistics for a specific operation kind
    pub fn operation_stats(&self, op: OpKind) -> Option<OperationStats> {
        self.state.lock().stats.get(&op).cloned()
    }

    /// Get all statistics
    pub fn all_stats(&self) -> BTreeMap<OpKind, OperationStats> {
        self.state.lock().stats.clone()
    }

    /// Get operation kind with most time
    pub fn slowest_operation(&self) -> Option<(OpKind, OperationStats)> {
        self.state
            .lock()
            .stats
            .iter()
            .max_by_key(|(_, stats)| stats.total_time)
            .map(|(&op, stats)| (op, stats.clone()))
    }

    /// Reset all statistics
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.stats.clear();
        state.start_time = Instant::now();
    }

    /// Generate a summary report
    pub fn summary(&self) -> ProfileSummary {
        let state = self.state.lock();
        ProfileSummary {
            total_operations: state.stats.values().map(|s| s.call_count).sum(),
            total_time: state.stats.values().map(|s| s.total_time).sum(),
            total_bytes_written: state.stats.values().map(|s| s.bytes_written).sum(),
            num_operation_types: state.stats.len(),
            elapsed_time: state.start_time.elapsed(),
        }
    }
}

impl Default for TaskProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionObserver for TaskProfiler {
    fn on_task_completed(&self, event: &TaskEvent<'_>) {
        if event.outcome == TaskOutcome::Completed {
            self.record(
                event.task.op(),
                event.duration,
                event.task.memory_bytes() as u64,
            );
        }
    }

    fn on_finish(&self, _stats: &ExecutionStats, _succeeded: bool) {
        for (op, stats) in self.all_stats() {
            tracing::info!(
                op = %op,
                calls = stats.call_count,
                total_ms = stats.total_time.as_millis() as u64,
                avg_us = stats.avg_time.as_micros() as u64,
                max_us = stats.max_time.as_micros() as u64,
                "operation profile"
            );
        }
    }
}

/// Summary of all profiling data
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    /// Total number of tasks
    pub total_operations: usize,
    /// Total kernel time across all tasks
    pub total_time: Duration,
    /// Total bytes of produced blocks
    pub total_bytes_written: u64,
    /// Number of different operation kinds
    pub num_operation_types: usize,
    /// Total elapsed time since profiler creation
    pub elapsed_time: Duration,
}

impl ProfileSummary {
    /// Get average tasks per second
    pub fn ops_per_second(&self) -> f64 {
        let elapsed_secs = self.elapsed_time.as_secs_f64();
        if elapsed_secs > 0.0 {
            self.total_operations as f64 / elapsed_secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiler_creation() {
        let profiler = TaskProfiler::new();
        assert!(profiler.all_stats().is_empty());
        assert!(profiler.slowest_operation().is_none());
    }

    #[test]
    fn test_multiple_operations() {
        let profiler = TaskProfiler::new();

        for _ in 0..5 {
            profiler.record(OpKind::Generate, Duration::from_millis(1), 8);
        }
        for _ in 0..3 {
            profiler.record(OpKind::MultiplyAccumulate, Duration::from_millis(5), 16);
        }

        let generate = profiler.operation_stats(OpKind::Generate).unwrap();
        assert_eq!(generate.call_count, 5);
        assert_eq!(generate.bytes_written, 40);

        let (slowest, stats) = profiler.slowest_operation().unwrap();
        assert_eq!(slowest, OpKind::MultiplyAccumulate);
        assert_eq!(stats.min_time, Duration::from_millis(5));
        assert_eq!(stats.max_time, Duration::from_millis(5));

        let summary = profiler.summary();
        assert_eq!(summary.total_operations, 8);
        assert_eq!(summary.num_operation_types, 2);
        assert_eq!(summary.total_bytes_written, 88);
        assert_eq!(summary.total_time, Duration::from_millis(20));
    }

    #[test]
    fn test_reset() {
        let profiler = TaskProfiler::new();
        profiler.record(OpKind::Reshape, Duration::from_millis(1), 0);
        profiler.reset();

        assert!(profiler.operation_stats(OpKind::Reshape).is_none());
        assert_eq!(profiler.summary().total_operations, 0);
    }
}
