//! Monitoring signal emission.
//!
//! Engines receive an [`EventSink`] at construction time and emit through a
//! [`SignalEmitter`]. There is no ambient global sink.

mod channel;
mod signal;
mod sink;

pub use channel::{BackpressureMetrics, ChannelEventSink};
pub use signal::{names, Signal, SignalTags};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Thin wrapper the engines emit through.
///
/// Emission is awaited so signals reach the sink in the order the engine
/// produced them.
#[derive(Clone)]
pub struct SignalEmitter {
    sink: Arc<dyn EventSink>,
}

impl SignalEmitter {
    /// Creates an emitter over a sink.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }

    /// Emits `event` with `tags` and no extra data.
    pub async fn emit(&self, event: &str, tags: &SignalTags) {
        self.sink.emit(&Signal::new(event, tags.clone())).await;
    }

    /// Emits a fully built signal.
    pub async fn emit_signal(&self, signal: Signal) {
        self.sink.emit(&signal).await;
    }
}

impl std::fmt::Debug for SignalEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalEmitter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emitter_forwards_to_sink() {
        let sink = Arc::new(CollectingEventSink::new());
        let emitter = SignalEmitter::new(sink.clone());
        let tags = SignalTags::new("t", "r", "grafana", "prod");

        emitter.emit(names::PIPELINE_STARTED, &tags).await;
        emitter
            .emit_signal(Signal::new(names::STAGE_FAILED, tags.for_stage("check", 1))
                .with("retryable", serde_json::json!(false)))
            .await;

        let signals = sink.signals();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[1].tags.stage.as_deref(), Some("check"));
        assert_eq!(signals[1].get("retryable"), Some(&serde_json::json!(false)));
    }

    #[tokio::test]
    async fn test_noop_emitter() {
        SignalEmitter::noop()
            .emit(names::PIPELINE_COMPLETED, &SignalTags::default())
            .await;
    }
}
