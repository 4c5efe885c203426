//! Channel-backed event sink with backpressure accounting.

use super::{EventSink, Signal};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Counters for signals forwarded or dropped by a [`ChannelEventSink`].
#[derive(Debug, Default)]
pub struct BackpressureMetrics {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl BackpressureMetrics {
    /// Records a forwarded signal.
    pub fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dropped signal.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of forwarded signals.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Returns the number of dropped signals.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the drop rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn drop_rate(&self) -> f64 {
        let emitted = self.emitted();
        let dropped = self.dropped();
        let total = emitted + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }
}

/// Forwards signals into a bounded tokio channel.
///
/// `emit` waits for capacity; `try_emit` drops the signal when the channel
/// is full or closed and counts the drop.
#[derive(Debug)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<Signal>,
    capacity: usize,
    metrics: BackpressureMetrics,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver the consumer drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Signal>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                capacity,
                metrics: BackpressureMetrics::default(),
            },
            rx,
        )
    }

    /// Returns the number of queued signals.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &BackpressureMetrics {
        &self.metrics
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, signal: &Signal) {
        if self.tx.send(signal.clone()).await.is_ok() {
            self.metrics.record_emit();
        } else {
            self.metrics.record_drop();
        }
    }

    fn try_emit(&self, signal: &Signal) {
        match self.tx.try_send(signal.clone()) {
            Ok(()) => self.metrics.record_emit(),
            Err(_) => {
                self.metrics.record_drop();
                warn!(
                    event = %signal.event,
                    run_id = %signal.tags.run_id,
                    queue_size = self.queue_size(),
                    dropped_total = self.metrics.dropped(),
                    "Signal dropped due to backpressure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{names, SignalTags};

    fn signal(event: &str) -> Signal {
        Signal::new(event, SignalTags::new("t", "r", "grafana", "prod"))
    }

    #[tokio::test]
    async fn test_forwards_in_order() {
        let (sink, mut rx) = ChannelEventSink::new(8);
        sink.emit(&signal(names::PIPELINE_STARTED)).await;
        sink.try_emit(&signal(names::STAGE_STARTED));

        assert_eq!(rx.recv().await.unwrap().event, names::PIPELINE_STARTED);
        assert_eq!(rx.recv().await.unwrap().event, names::STAGE_STARTED);
        assert_eq!(sink.metrics().emitted(), 2);
    }

    #[tokio::test]
    async fn test_try_emit_drops_when_full() {
        let (sink, _rx) = ChannelEventSink::new(1);
        sink.try_emit(&signal("a"));
        sink.try_emit(&signal("b"));

        assert_eq!(sink.queue_size(), 1);
        assert_eq!(sink.metrics().emitted(), 1);
        assert_eq!(sink.metrics().dropped(), 1);
        assert!((sink.metrics().drop_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped() {
        let (sink, rx) = ChannelEventSink::new(4);
        drop(rx);
        sink.emit(&signal("a")).await;
        assert_eq!(sink.metrics().dropped(), 1);
    }
}
