//! Event sink trait and implementations.

use super::Signal;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Trait for sinks that receive lifecycle signals.
///
/// The engines only depend on this capability; the backend (log lines,
/// metrics, a queue) is chosen by whoever constructs the engine.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits a signal.
    async fn emit(&self, signal: &Signal);

    /// Emits a signal without awaiting.
    ///
    /// This method must never panic. Delivery problems are logged and
    /// suppressed.
    fn try_emit(&self, signal: &Signal);
}

/// A no-op event sink that discards all signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _signal: &Signal) {}

    fn try_emit(&self, _signal: &Signal) {}
}

/// An event sink that logs signals using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_signal(&self, signal: &Signal) {
        let tags = &signal.tags;
        let stage = tags.stage.as_deref().or(tags.node_id.as_deref()).unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event = %signal.event,
                trace_id = %tags.trace_id,
                run_id = %tags.run_id,
                stage,
                attempt = tags.attempt,
                source = %tags.source,
                environment = %tags.environment,
                incident_id = tags.incident_id.as_deref(),
                alert_fingerprint = tags.alert_fingerprint.as_deref(),
                data = ?signal.data,
                "Signal: {}", signal.event
            );
        } else {
            info!(
                event = %signal.event,
                trace_id = %tags.trace_id,
                run_id = %tags.run_id,
                stage,
                attempt = tags.attempt,
                source = %tags.source,
                environment = %tags.environment,
                incident_id = tags.incident_id.as_deref(),
                alert_fingerprint = tags.alert_fingerprint.as_deref(),
                data = ?signal.data,
                "Signal: {}", signal.event
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, signal: &Signal) {
        self.log_signal(signal);
    }

    fn try_emit(&self, signal: &Signal) {
        self.log_signal(signal);
    }
}

/// A collecting event sink for tests and in-process inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    signals: RwLock<Vec<Signal>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected signals.
    #[must_use]
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.read().clone()
    }

    /// Returns the collected event names in order.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.signals.read().iter().map(|s| s.event.clone()).collect()
    }

    /// Returns the number of collected signals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.read().len()
    }

    /// Returns true if no signals have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.read().is_empty()
    }

    /// Clears all collected signals.
    pub fn clear(&self) {
        self.signals.write().clear();
    }

    /// Returns signals with exactly this event name.
    #[must_use]
    pub fn signals_named(&self, event: &str) -> Vec<Signal> {
        self.signals
            .read()
            .iter()
            .filter(|s| s.event == event)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, signal: &Signal) {
        self.signals.write().push(signal.clone());
    }

    fn try_emit(&self, signal: &Signal) {
        self.signals.write().push(signal.clone());
    }
}
