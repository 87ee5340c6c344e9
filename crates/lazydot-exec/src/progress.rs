//! Text progress bar
//!
//! [`ProgressReporter`] is an [`ExecutionObserver`] that counts completed tasks
//! and redraws a bar on its sink, at most once per `min_interval`:
//!
//! ```text
//! [##########          ]  50% 10/20 tasks 1.2s
//! ```
//!
//! Counters are atomics. Drawing takes the sink with `try_lock`, so a worker that
//! finds another worker drawing skips the redraw instead of waiting.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::events::{ExecutionObserver, TaskEvent, TaskOutcome};
use crate::executor::ExecutionStats;

/// Progress bar settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressConfig {
    /// Number of cells in the bar
    pub width: usize,
    /// Minimum time between redraws
    pub min_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            width: 40,
            min_interval: Duration::from_millis(100),
        }
    }
}

impl ProgressConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bar width
    pub fn width(mut self, width: usize) -> Self {
        self.width = width.max(1);
        self
    }

    /// Set minimum redraw interval
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

/// Observer drawing a progress bar
pub struct ProgressReporter {
    config: ProgressConfig,
    completed: AtomicUsize,
    total: AtomicUsize,
    running: AtomicBool,
    origin: Instant,
    /// Nanoseconds since `origin` at `on_start`
    started_at: AtomicU64,
    /// Nanoseconds since `origin` at the last redraw
    last_draw: AtomicU64,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl ProgressReporter {
    /// Draw to standard error
    pub fn stderr(config: ProgressConfig) -> Self {
        Self::with_sink(config, Box::new(io::stderr()))
    }

    /// Draw to an arbitrary sink
    pub fn with_sink(config: ProgressConfig, sink: Box<dyn Write + Send>) -> Self {
        Self {
            config,
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            origin: Instant::now(),
            started_at: AtomicU64::new(0),
            last_draw: AtomicU64::new(0),
            sink: Mutex::new(sink),
        }
    }

    /// `(completed, total)` as currently counted
    pub fn snapshot(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }

    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn elapsed(&self, now: u64) -> Duration {
        Duration::from_nanos(now.saturating_sub(self.started_at.load(Ordering::Acquire)))
    }

    fn draw(&self, now: u64) {
        let Some(mut sink) = self.sink.try_lock() else {
            return;
        };
        let (completed, total) = self.snapshot();
        let line = render_line(completed, total, self.elapsed(now), self.config.width);
        // A broken sink must not fail the computation
        let _ = write!(sink, "\r{}", line).and_then(|_| sink.flush());
    }
}

impl ExecutionObserver for ProgressReporter {
    fn on_start(&self, total_tasks: usize) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                total_tasks,
                "progress reporter restarted while a run is still in progress"
            );
        }
        let now = self.now_nanos();
        self.completed.store(0, Ordering::Release);
        self.total.store(total_tasks, Ordering::Release);
        self.started_at.store(now, Ordering::Release);
        self.last_draw.store(now, Ordering::Release);
        self.draw(now);
    }

    fn on_task_completed(&self, event: &TaskEvent<'_>) {
        if event.outcome != TaskOutcome::Completed {
            return;
        }
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.total.load(Ordering::Acquire).max(event.total);

        let now = self.now_nanos();
        let last = self.last_draw.load(Ordering::Acquire);
        let due = now.saturating_sub(last) >= self.config.min_interval.as_nanos() as u64;
        if (due || completed == total)
            && self
                .last_draw
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.draw(now);
        }
    }

    fn on_finish(&self, _stats: &ExecutionStats, _succeeded: bool) {
        self.running.store(false, Ordering::Release);
        // Waits for a concurrent redraw so the final line is always written
        let now = self.now_nanos();
        let (completed, total) = self.snapshot();
        let line = render_line(completed, total, self.elapsed(now), self.config.width);
        let mut sink = self.sink.lock();
        let _ = writeln!(sink, "\r{}", line).and_then(|_| sink.flush());
    }
}

/// Render one progress line
///
/// ```
/// use std::time::Duration;
/// use lazydot_exec::progress::render_line;
///
/// let line = render_line(10, 20, Duration::from_millis(1200), 20);
/// assert_eq!(line, "[##########          ]  50% 10/20 tasks 1.2s");
/// ```
pub fn render_line(completed: usize, total: usize, elapsed: Duration, width: usize) -> String {
    let fraction = if total == 0 {
        1.0
    } else {
        (completed as f64 / total as f64).min(1.0)
    };
    let filled = ((fraction * width as f64).floor() as usize).min(width);

    let mut line = String::with_capacity(width + 32);
    line.push('[');
    line.push_str(&"#".repeat(filled));
    line.push_str(&" ".repeat(width - filled));
    let _ = write!(
        line,
        "] {:>3}% {}/{} tasks {:.1}s",
        (fraction * 100.0).floor() as u32,
        completed,
        total,
        elapsed.as_secs_f64()
    );
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn test_render_line() {
        assert_eq!(
            render_line(0, 4, Duration::ZERO, 4),
            "[    ]   0% 0/4 tasks 0.0s"
        );
        assert_eq!(
            render_line(4, 4, Duration::from_secs(3), 4),
            "[####] 100% 4/4 tasks 3.0s"
        );
        assert_eq!(
            render_line(0, 0, Duration::ZERO, 2),
            "[##] 100% 0/0 tasks 0.0s"
        );
    }

    #[test]
    fn test_final_line_written_on_finish() {
        let buffer = SharedBuffer::default();
        let reporter = ProgressReporter::with_sink(
            ProgressConfig::new().width(10).min_interval(Duration::from_secs(3600)),
            Box::new(buffer.clone()),
        );

        reporter.on_start(2);
        reporter.on_finish(&ExecutionStats::default(), true);

        let output = buffer.contents();
        assert!(output.contains("0/2 tasks"));
        assert!(output.ends_with('\n'));
        assert_eq!(reporter.snapshot(), (0, 2));
    }

    #[test]
    fn test_only_completed_tasks_advance() {
        use crate::task_graph::{Task, TaskKind};
        use lazydot_core::ChunkIndex;

        let buffer = SharedBuffer::default();
        let reporter = ProgressReporter::with_sink(
            ProgressConfig::new().width(4).min_interval(Duration::from_secs(3600)),
            Box::new(buffer.clone()),
        );
        let task = Task::new(
            TaskKind::Generate { seed: 0 },
            "A",
            ChunkIndex::new(vec![0]),
            vec![],
            vec![2],
        );
        let event = |outcome| TaskEvent {
            task: &task,
            outcome,
            worker: 0,
            duration: Duration::ZERO,
            completed: 1,
            total: 4,
        };

        reporter.on_start(4);
        reporter.on_task_completed(&event(TaskOutcome::Completed));
        reporter.on_task_completed(&event(TaskOutcome::Failed));
        reporter.on_task_completed(&event(TaskOutcome::Discarded));
        reporter.on_finish(&ExecutionStats::default(), false);

        assert_eq!(reporter.snapshot(), (1, 4));
        assert!(buffer.contents().contains(" 25% 1/4 tasks"));
    }

    #[test]
    fn test_restart_resets_counters() {
        let reporter = ProgressReporter::with_sink(ProgressConfig::default(), Box::new(io::sink()));

        reporter.on_start(5);
        reporter.completed.store(3, Ordering::Release);
        reporter.on_start(7);

        assert_eq!(reporter.snapshot(), (0, 7));
    }
}
