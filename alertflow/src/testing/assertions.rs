//! Assertions over persisted runs and emitted signals.

use crate::core::{ExecutionStatus, PipelineRun, RunStatus, StageExecution, StageName};
use crate::events::CollectingEventSink;

/// Asserts that the run ended in `expected`.
pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "Expected run {} to be {expected}, got {} (error: {:?})",
        run.run_id, run.status, run.error
    );
}

/// Asserts the attempt numbers recorded for `stage`, in order.
pub fn assert_attempts(rows: &[StageExecution], stage: StageName, expected: &[u32]) {
    let attempts: Vec<u32> = rows
        .iter()
        .filter(|r| r.stage == stage)
        .map(|r| r.attempt)
        .collect();
    assert_eq!(
        attempts, expected,
        "Unexpected attempts for stage {stage}"
    );
}

/// Asserts the statuses recorded for `stage`, in attempt order.
pub fn assert_stage_statuses(rows: &[StageExecution], stage: StageName, expected: &[ExecutionStatus]) {
    let statuses: Vec<ExecutionStatus> = rows
        .iter()
        .filter(|r| r.stage == stage)
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses, expected,
        "Unexpected statuses for stage {stage}"
    );
}

/// Asserts that `sink` saw signals named `expected` as an ordered subsequence.
pub fn assert_signal_order(sink: &CollectingEventSink, expected: &[&str]) {
    let seen = sink.event_names();
    let mut cursor = seen.iter();
    for name in expected {
        assert!(
            cursor.any(|s| s == name),
            "Signal '{name}' missing or out of order in {seen:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{names, EventSink, Signal, SignalTags};

    #[tokio::test]
    async fn test_signal_order_subsequence() {
        let sink = CollectingEventSink::new();
        let tags = SignalTags::new("t", "r", "grafana", "prod");
        for name in [names::PIPELINE_STARTED, names::STAGE_STARTED, names::PIPELINE_COMPLETED] {
            sink.emit(&Signal::new(name, tags.clone())).await;
        }
        assert_signal_order(&sink, &[names::PIPELINE_STARTED, names::PIPELINE_COMPLETED]);
    }

    #[tokio::test]
    #[should_panic(expected = "out of order")]
    async fn test_signal_order_rejects_reordering() {
        let sink = CollectingEventSink::new();
        let tags = SignalTags::new("t", "r", "grafana", "prod");
        for name in [names::PIPELINE_COMPLETED, names::PIPELINE_STARTED] {
            sink.emit(&Signal::new(name, tags.clone())).await;
        }
        assert_signal_order(&sink, &[names::PIPELINE_STARTED, names::PIPELINE_COMPLETED]);
    }
}
