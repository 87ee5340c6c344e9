//! Executor configuration

use std::thread;

/// Configuration for [`Executor`](crate::Executor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Number of worker threads; `0` uses the available hardware parallelism
    pub num_workers: usize,
    /// Reject blocks containing NaN or infinity as numeric overflow
    pub check_finite: bool,
    /// Prefix of worker thread names
    pub thread_name: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            check_finite: true,
            thread_name: "lazydot-worker".to_string(),
        }
    }
}

impl ExecConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of worker threads
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Enable or disable the non-finite result check
    pub fn check_finite(mut self, enabled: bool) -> Self {
        self.check_finite = enabled;
        self
    }

    /// Set the worker thread name prefix
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Worker count after resolving `0` to the hardware parallelism
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
