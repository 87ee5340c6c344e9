//! Background resource sampling
//!
//! [`ResourceSampler::start`] spawns a named thread that reads process CPU time
//! and resident memory at every multiple of the interval, independently of task
//! boundaries. [`SamplerHandle::stop`] wakes the thread, takes a final sample and
//! returns the series. Dropping the handle also stops and joins the thread.
//!
//! Ticks are scheduled on the wall clock. A tick that is late by more than one
//! interval skips the missed ticks instead of catching up, and the skip is
//! recorded as a [`SamplerStallWarning`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use lazydot_exec::sampler::ResourceSampler;
//!
//! let handle = ResourceSampler::start(Duration::from_secs(1))?;
//! // ... run the computation ...
//! let series = handle.stop();
//! println!("{}", series.render_text(60));
//! # Ok::<(), lazydot_exec::SamplerError>(())
//! ```

use std::fmt::Write as _;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SamplerError;

/// Process CPU time and resident memory at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessUsage {
    /// User plus system CPU time consumed so far
    pub cpu_time: Duration,
    pub resident_bytes: u64,
}

/// Source of process usage readings
pub trait ResourceProbe: Send {
    /// Current usage, or `None` if it cannot be read
    fn read(&mut self) -> Option<ProcessUsage>;
}

/// Reads `/proc/self/stat` and `/proc/self/status` (Linux only)
#[derive(Debug, Clone, Copy)]
pub struct ProcProbe {
    /// Kernel clock ticks per second used by `utime` and `stime`
    pub clock_ticks_per_sec: u64,
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self {
            clock_ticks_per_sec: 100,
        }
    }
}

impl ResourceProbe for ProcProbe {
    fn read(&mut self) -> Option<ProcessUsage> {
        #[cfg(target_os = "linux")]
        {
            let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
            let status = std::fs::read_to_string("/proc/self/status").ok()?;
            let ticks = parse_cpu_ticks(&stat)?;
            let resident_kb = parse_resident_kb(&status)?;

            Some(ProcessUsage {
                cpu_time: Duration::from_secs_f64(
                    ticks as f64 / self.clock_ticks_per_sec.max(1) as f64,
                ),
                resident_bytes: resident_kb * 1024,
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

/// `utime + stime` from the contents of `/proc/<pid>/stat`
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    // The command name may contain spaces; fields after it start at field 3 (state)
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// `VmRSS` from the contents of `/proc/<pid>/status`, in kB
fn parse_resident_kb(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// One point of the resource series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Seconds since sampling started
    pub elapsed_secs: f64,
    /// CPU time over wall time since the previous sample, in percent of one core
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// Ticks skipped because the sampler fell behind
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("resource sampler stalled: skipped {missed} tick(s) before {elapsed_secs:.3}s")]
pub struct SamplerStallWarning {
    pub missed: u64,
    pub elapsed_secs: f64,
}

/// Ordered samples of one sampling session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSeries {
    pub interval_secs: f64,
    pub samples: Vec<ResourceSample>,
    pub warnings: Vec<SamplerStallWarning>,
}

impl ResourceSeries {
    fn new(interval: Duration) -> Self {
        Self {
            interval_secs: interval.as_secs_f64(),
            samples: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest resident memory seen
    pub fn peak_memory_bytes(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_bytes).max().unwrap_or(0)
    }

    /// Mean CPU percentage over all samples
    pub fn mean_cpu_percent(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_percent).sum::<f64>() / self.samples.len() as f64
    }

    /// Two aligned rows of bars (CPU percent and memory) over `width` columns
    ///
    /// Samples are bucketed by elapsed time; each column shows the largest value
    /// in its bucket relative to the series maximum.
    pub fn render_text(&self, width: usize) -> String {
        const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

        let width = width.max(1);
        let mut out = String::new();
        let span = self
            .samples
            .last()
            .map(|s| s.elapsed_secs)
            .unwrap_or(0.0)
            .max(f64::EPSILON);

        let rows: [(&str, Vec<f64>, String); 2] = [
            (
                "cpu %",
                self.samples.iter().map(|s| s.cpu_percent).collect(),
                "%".to_string(),
            ),
            (
                "mem MiB",
                self.samples
                    .iter()
                    .map(|s| s.memory_bytes as f64 / (1024.0 * 1024.0))
                    .collect(),
                "MiB".to_string(),
            ),
        ];

        for (label, values, unit) in rows.iter() {
            let mut columns = vec![None::<f64>; width];
            for (sample, &value) in self.samples.iter().zip(values) {
                let column = ((sample.elapsed_secs / span) * (width - 1) as f64).round() as usize;
                let slot = &mut columns[column.min(width - 1)];
                *slot = Some(slot.map_or(value, |v: f64| v.max(value)));
            }

            let max = values.iter().copied().fold(0.0_f64, f64::max);
            let bars: String = columns
                .iter()
                .map(|column| match column {
                    None => ' ',
                    Some(_) if max <= 0.0 => LEVELS[1],
                    Some(v) => {
                        let level = ((v / max) * (LEVELS.len() - 1) as f64).round() as usize;
                        LEVELS[level.clamp(1, LEVELS.len() - 1)]
                    }
                })
                .collect();

            let _ = writeln!(out, "{:<8}|{}| max {:.1} {}", label, bars, max, unit);
        }

        let _ = writeln!(
            out,
            "{:<8} 0s .. {:.0}s, {} samples, {} stall warning(s)",
            "",
            span,
            self.samples.len(),
            self.warnings.len()
        );
        out
    }
}

/// Starts background resource sampling
pub struct ResourceSampler;

impl ResourceSampler {
    /// Sample the current process with [`ProcProbe`]
    pub fn start(interval: Duration) -> Result<SamplerHandle, SamplerError> {
        Self::start_with_probe(interval, ProcProbe::default())
    }

    /// Sample with a custom probe
    pub fn start_with_probe<P>(interval: Duration, probe: P) -> Result<SamplerHandle, SamplerError>
    where
        P: ResourceProbe + 'static,
    {
        if interval.is_zero() {
            return Err(SamplerError::ZeroInterval);
        }

        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });

        let thread_signal = Arc::clone(&signal);
        let thread = thread::Builder::new()
            .name("lazydot-sampler".to_string())
            .spawn(move || sample_loop(probe, interval, &thread_signal))
            .map_err(SamplerError::Spawn)?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "resource sampler started");

        Ok(SamplerHandle {
            signal,
            thread: Some(thread),
            interval,
        })
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.stopped.lock() = true;
        self.wakeup.notify_all();
    }
}

/// Running sampler; stops its thread when stopped or dropped
pub struct SamplerHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<ResourceSeries>>,
    interval: Duration,
}

impl SamplerHandle {
    /// Stop sampling and return the series, including a final sample
    pub fn stop(mut self) -> ResourceSeries {
        self.signal.raise();
        let series = match self.thread.take().map(JoinHandle::join) {
            Some(Ok(series)) => series,
            _ => {
                tracing::warn!("resource sampler thread panicked; series lost");
                ResourceSeries::new(self.interval)
            }
        };
        tracing::debug!(
            samples = series.len(),
            warnings = series.warnings.len(),
            "resource sampler stopped"
        );
        series
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.signal.raise();
            let _ = thread.join();
        }
    }
}

struct Reading {
    at: Instant,
    usage: Option<ProcessUsage>,
}

fn sample_loop<P: ResourceProbe>(mut probe: P, interval: Duration, signal: &StopSignal) -> ResourceSeries {
    let origin = Instant::now();
    let mut series = ResourceSeries::new(interval);
    let mut previous = Reading {
        at: origin,
        usage: probe.read(),
    };
    let mut tick: u64 = 1;

    loop {
        let deadline = origin + tick_offset(interval, tick);

        let stop = {
            let mut stopped = signal.stopped.lock();
            while !*stopped {
                if signal.wakeup.wait_until(&mut stopped, deadline).timed_out() {
                    break;
                }
            }
            *stopped
        };

        let now = Instant::now();
        let usage = probe.read();
        if let Some(sample) = to_sample(&previous, usage, now, origin) {
            series.samples.push(sample);
        }
        previous = Reading { at: now, usage };

        if stop {
            break;
        }

        let elapsed_ticks = (now.duration_since(origin).as_nanos() / interval.as_nanos()) as u64;
        let next = elapsed_ticks.max(tick) + 1;
        if next > tick + 1 {
            let warning = SamplerStallWarning {
                missed: next - tick - 1,
                elapsed_secs: now.duration_since(origin).as_secs_f64(),
            };
            tracing::warn!(missed = warning.missed, elapsed_secs = warning.elapsed_secs, "{}", warning);
            series.warnings.push(warning);
        }
        tick = next;
    }

    series
}

fn tick_offset(interval: Duration, tick: u64) -> Duration {
    interval.saturating_mul(u32::try_from(tick).unwrap_or(u32::MAX))
}

fn to_sample(
    previous: &Reading,
    usage: Option<ProcessUsage>,
    now: Instant,
    origin: Instant,
) -> Option<ResourceSample> {
    let usage = usage?;
    let wall = now.duration_since(previous.at).as_secs_f64();
    let cpu_percent = match previous.usage {
        Some(before) if wall > 0.0 => {
            usage.cpu_time.saturating_sub(before.cpu_time).as_secs_f64() / wall * 100.0
        }
        _ => 0.0,
    };

    Some(ResourceSample {
        elapsed_secs: now.duration_since(origin).as_secs_f64(),
        cpu_percent,
        memory_bytes: usage.resident_bytes,
    })
}
