//! Structured logging setup
//!
//! The library crates only emit `tracing` events; binaries install a subscriber
//! once at startup with [`init_tracing`].
//!
//! # Example
//!
//! ```no_run
//! use lazydot_exec::tracing_support::{init_tracing, TracingConfig, TracingFormat};
//!
//! init_tracing(TracingConfig {
//!     format: TracingFormat::Compact,
//!     filter: "lazydot_exec=debug,info".to_string(),
//!     ..TracingConfig::default()
//! })?;
//! # Ok::<(), lazydot_exec::tracing_support::TracingInitError>(())
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `RUST_LOG=lazydot_exec=debug`)
//! - `LAZYDOT_LOG_FORMAT`: `pretty`, `json` or `compact` (default: `pretty`)

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "lazydot=info,lazydot_exec=info,lazydot_core=info,warn";

/// Errors from installing the subscriber
#[derive(Error, Debug)]
pub enum TracingInitError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Pretty-printed human-readable format
    Pretty,
    /// JSON format for structured logging
    Json,
    /// Compact format (single line per event)
    Compact,
}

impl TracingFormat {
    /// Parse from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => TracingFormat::Json,
            "compact" => TracingFormat::Compact,
            _ => TracingFormat::Pretty,
        }
    }
}

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Output format
    pub format: TracingFormat,
    /// Filter directive (e.g., "lazydot_exec=debug,info")
    pub filter: String,
    /// Enable ANSI colors
    pub with_ansi: bool,
    /// Show target module paths
    pub with_target: bool,
    /// Show thread names (worker and sampler threads are named)
    pub with_thread_names: bool,
    /// Show file locations and line numbers
    pub with_file: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        let format = std::env::var("LAZYDOT_LOG_FORMAT")
            .map(|s| TracingFormat::parse(&s))
            .unwrap_or(TracingFormat::Pretty);

        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());

        Self {
            format,
            filter,
            with_ansi: true,
            with_target: true,
            with_thread_names: true,
            with_file: false,
        }
    }
}

/// Install a global subscriber with the given configuration
///
/// Call once at application startup; a second call fails with
/// [`TracingInitError::Install`].
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingInitError> {
    let filter = EnvFilter::try_new(&config.filter)?;

    match config.format {
        TracingFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_names(config.with_thread_names)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_filter(filter);

            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
        TracingFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(config.with_target)
                .with_thread_names(config.with_thread_names)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_filter(filter);

            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
        TracingFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_names(config.with_thread_names)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_filter(filter);

            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
    }

    Ok(())
}

/// Record a named metric value as an info event
pub fn record_metric(name: &str, value: f64) {
    tracing::info!(metric = name, value = value, "metric_recorded");
}

/// Record a byte count as a debug event, with the MiB equivalent
pub fn record_bytes(operation: &str, bytes: usize) {
    tracing::debug!(
        operation = operation,
        bytes = bytes,
        mb = bytes as f64 / 1024.0 / 1024.0,
        "bytes_processed"
    );
}

/// Run `f` under a thread-local subscriber and return everything it logged
#[cfg(test)]
pub(crate) fn capture_events<F: FnOnce()>(f: F) -> String {
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Captured::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_format_parse() {
        assert_eq!(TracingFormat::parse("json"), TracingFormat::Json);
        assert_eq!(TracingFormat::parse("PRETTY"), TracingFormat::Pretty);
        assert_eq!(TracingFormat::parse("compact"), TracingFormat::Compact);
        assert_eq!(TracingFormat::parse("unknown"), TracingFormat::Pretty);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = TracingConfig {
            filter: "lazydot=notalevel".to_string(),
            ..TracingConfig::default()
        };
        assert!(matches!(
            init_tracing(config),
            Err(TracingInitError::Filter(_))
        ));
    }

    #[test]
    fn test_record_helpers() {
        let logged = capture_events(|| {
            record_metric("peak_live_chunks", 42.0);
            record_bytes("peak_live", 3 * 1024 * 1024);
        });

        let metric = logged
            .lines()
            .find(|line| line.contains("metric_recorded"))
            .unwrap();
        assert!(metric.contains("INFO"));
        assert!(metric.contains("peak_live_chunks"));
        assert!(metric.contains("value=42"));

        let bytes = logged
            .lines()
            .find(|line| line.contains("bytes_processed"))
            .unwrap();
        assert!(bytes.contains("DEBUG"));
        assert!(bytes.contains("bytes=3145728"));
        assert!(bytes.contains("mb=3"));
    }
}
