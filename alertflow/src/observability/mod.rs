//! Logging setup and timing helpers.

use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. With `json` set,
/// events are written as one JSON object per line. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

/// Measures the wall time of a stage or node attempt.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts timing `name`.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Milliseconds since the timer started.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The timed span's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the elapsed milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        let elapsed = self.elapsed_ms();
        tracing::trace!(span = %self.name, elapsed_ms = elapsed, "Span finished");
        elapsed
    }
}
