//! Durable run and execution records.
//!
//! These are plain data records. The orchestrator mutates them through the
//! small set of methods below and hands them to a [`crate::store::RunStore`].

use super::{ChainStatus, ExecutionStatus, RunStatus, StageName};
use crate::errors::{AlertflowError, ErrorInfo};
use crate::utils::{duration_ms_between, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One execution of the fixed four-stage pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Correlation id; may span several runs.
    pub trace_id: String,
    /// Current state machine value.
    pub status: RunStatus,
    /// Where the event came from (e.g. `grafana`).
    pub source: String,
    /// Deployment environment tag.
    pub environment: String,
    /// Raw inbound payload.
    pub payload: serde_json::Value,
    /// Fingerprint of `{source, payload}` or the one reported by ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_fingerprint: Option<String>,
    /// Link to the external incident record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_ref: Option<String>,
    /// Error rolled up from the failing stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Whether a degraded analysis was substituted.
    #[serde(default)]
    pub intelligence_fallback_used: bool,
    /// Last stage that reached a usable outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_stage: Option<StageName>,
    /// The failed run this run resumed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<Uuid>,
    /// First run of a resume lineage; unset on runs that were never resumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_run_id: Option<Uuid>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Time the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Wall-clock duration in milliseconds, set with `completed_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Highest progress rank the run has reached.
    #[serde(default)]
    pub progress_rank: u8,
}

impl PipelineRun {
    /// Creates a new pending run.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        source: impl Into<String>,
        environment: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            run_id: crate::utils::generate_uuid(),
            trace_id: trace_id.into(),
            status: RunStatus::Pending,
            source: source.into(),
            environment: environment.into(),
            payload,
            alert_fingerprint: None,
            incident_ref: None,
            error: None,
            intelligence_fallback_used: false,
            last_completed_stage: None,
            resumed_from: None,
            origin_run_id: None,
            created_at: now_utc(),
            completed_at: None,
            duration_ms: None,
            progress_rank: 0,
        }
    }

    /// Run id that stage idempotency keys are derived from.
    ///
    /// Every run in a resume lineage shares the origin's keys, so side
    /// effects already recorded by an earlier run are not repeated.
    #[must_use]
    pub fn idempotency_scope(&self) -> Uuid {
        self.origin_run_id.unwrap_or(self.run_id)
    }

    /// Moves the run to `next`, enforcing the state machine.
    ///
    /// A progress state must rank above every progress state reached so
    /// far, even after passing through `RETRYING` or `SKIPPED`. Reaching a
    /// terminal status stamps `completed_at` and `duration_ms`.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), AlertflowError> {
        if self.status == next && next == RunStatus::Retrying {
            return Ok(());
        }
        let regresses = next.progress().is_some_and(|rank| rank <= self.progress_rank);
        if regresses || !self.status.can_transition_to(next) {
            return Err(AlertflowError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if let Some(rank) = next.progress() {
            self.progress_rank = rank;
        }
        if next.is_terminal() {
            let now = now_utc();
            self.completed_at = Some(now);
            self.duration_ms = Some(duration_ms_between(self.created_at, now));
        }
        Ok(())
    }

    /// Marks `stage` as completed and moves to its status.
    pub fn complete_stage(&mut self, stage: StageName) -> Result<(), AlertflowError> {
        self.transition(stage.completed_status())?;
        self.last_completed_stage = Some(stage);
        Ok(())
    }

    /// Fails the run with the given error.
    pub fn fail(&mut self, error: ErrorInfo) -> Result<(), AlertflowError> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Returns true if the run reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One attempt of one stage within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    /// Row id.
    pub id: Uuid,
    /// Owning run.
    pub run_id: Uuid,
    /// Which stage.
    pub stage: StageName,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Deterministic key derived from `(run_id, stage)`.
    pub idempotency_key: String,
    /// Reference to what fed this stage.
    pub input_ref: String,
    /// Stage DTO, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Classified failure, when the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Outcome.
    pub status: ExecutionStatus,
    /// Start time.
    pub started_at: Timestamp,
    /// End time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl StageExecution {
    /// Creates a running execution row.
    #[must_use]
    pub fn start(
        run_id: Uuid,
        stage: StageName,
        attempt: u32,
        idempotency_key: impl Into<String>,
        input_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            run_id,
            stage,
            attempt,
            idempotency_key: idempotency_key.into(),
            input_ref: input_ref.into(),
            output: None,
            error: None,
            status: ExecutionStatus::Running,
            started_at: now_utc(),
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Finalizes the row with `status`.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        output: Option<serde_json::Value>,
        error: Option<ErrorInfo>,
    ) {
        let now = now_utc();
        self.status = status;
        self.output = output;
        self.error = error;
        self.finished_at = Some(now);
        self.duration_ms = Some(duration_ms_between(self.started_at, now));
    }

    /// Copies a usable row from an earlier run into `run_id`.
    ///
    /// The output is cloned untouched.
    #[must_use]
    pub fn carried_into(&self, run_id: Uuid, idempotency_key: impl Into<String>) -> Self {
        let now = now_utc();
        Self {
            id: crate::utils::generate_uuid(),
            run_id,
            stage: self.stage,
            attempt: 1,
            idempotency_key: idempotency_key.into(),
            input_ref: self.output_ref(),
            output: self.output.clone(),
            error: None,
            status: ExecutionStatus::Carried,
            started_at: now,
            finished_at: Some(now),
            duration_ms: Some(0.0),
        }
    }

    /// Opaque reference to this row's output.
    #[must_use]
    pub fn output_ref(&self) -> String {
        format!("{}/{}/{}", self.run_id, self.stage, self.attempt)
    }
}

/// One execution of a definition-based node chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRun {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Correlation id.
    pub trace_id: String,
    /// Definition name.
    pub definition_name: String,
    /// Definition version.
    pub definition_version: u32,
    /// Current status.
    pub status: ChainStatus,
    /// Where the event came from.
    pub source: String,
    /// Deployment environment tag.
    pub environment: String,
    /// Incident linked by an ingest node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Node that stopped the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
    /// Error rolled up from the failing node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Terminal time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl ChainRun {
    /// Creates a pending chain run.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        definition_name: impl Into<String>,
        definition_version: u32,
        source: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            run_id: crate::utils::generate_uuid(),
            trace_id: trace_id.into(),
            definition_name: definition_name.into(),
            definition_version,
            status: ChainStatus::Pending,
            source: source.into(),
            environment: environment.into(),
            incident_id: None,
            failed_node: None,
            error: None,
            created_at: now_utc(),
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Moves to `status`, stamping completion on terminal statuses.
    pub fn set_status(&mut self, status: ChainStatus) -> Result<(), AlertflowError> {
        if self.status.is_terminal() {
            return Err(AlertflowError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        if status.is_terminal() {
            let now = now_utc();
            self.completed_at = Some(now);
            self.duration_ms = Some(duration_ms_between(self.created_at, now));
        }
        Ok(())
    }
}

/// One attempt of one node within a chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Row id.
    pub id: Uuid,
    /// Owning chain run.
    pub run_id: Uuid,
    /// Node id within the definition.
    pub node_id: String,
    /// Node type (handler key).
    pub node_type: String,
    /// Whether a failure stops the chain.
    pub required: bool,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Deterministic key derived from `(run_id, node_id)`.
    pub idempotency_key: String,
    /// Handler output, kept even on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Classified failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Outcome.
    pub status: ExecutionStatus,
    /// Start time.
    pub started_at: Timestamp,
    /// End time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl NodeExecution {
    /// Creates a running node execution row.
    #[must_use]
    pub fn start(
        run_id: Uuid,
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        required: bool,
        attempt: u32,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            run_id,
            node_id: node_id.into(),
            node_type: node_type.into(),
            required,
            attempt,
            idempotency_key: idempotency_key.into(),
            output: None,
            error: None,
            status: ExecutionStatus::Running,
            started_at: now_utc(),
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Finalizes the row.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        output: Option<serde_json::Value>,
        error: Option<ErrorInfo>,
    ) {
        let now = now_utc();
        self.status = status;
        self.output = output;
        self.error = error;
        self.finished_at = Some(now);
        self.duration_ms = Some(duration_ms_between(self.started_at, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> PipelineRun {
        PipelineRun::new("trace-1", "grafana", "staging", json!({"name": "HighCPU"}))
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = run();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.completed_at.is_none());
        assert!(!run.intelligence_fallback_used);
    }

    #[test]
    fn test_complete_stages_in_order() {
        let mut run = run();
        for stage in StageName::ALL {
            run.complete_stage(stage).unwrap();
        }
        assert_eq!(run.status, RunStatus::Notified);
        assert_eq!(run.last_completed_stage, Some(StageName::Notify));
        assert!(run.completed_at.is_some());
        assert!(run.duration_ms.is_some());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut run = run();
        run.fail(ErrorInfo::validation("bad payload")).unwrap();
        let completed_at = run.completed_at;

        assert!(run.transition(RunStatus::Ingested).is_err());
        assert!(run.fail(ErrorInfo::transient("again")).is_err());
        assert_eq!(run.completed_at, completed_at);
    }

    #[test]
    fn test_progress_never_moves_backward_through_retrying() {
        let mut run = run();
        for stage in [StageName::Ingest, StageName::Check, StageName::Analyze] {
            run.complete_stage(stage).unwrap();
        }
        run.transition(RunStatus::Retrying).unwrap();

        let err = run.transition(RunStatus::Ingested).unwrap_err();
        assert!(matches!(err, AlertflowError::InvalidTransition { .. }));
        assert_eq!(run.status, RunStatus::Retrying);
        assert!(run.transition(RunStatus::Analyzed).is_err());
        run.transition(RunStatus::Notified).unwrap();
    }

    #[test]
    fn test_progress_never_moves_backward_through_skipped() {
        let mut run = run();
        run.complete_stage(StageName::Ingest).unwrap();
        run.complete_stage(StageName::Check).unwrap();
        run.transition(RunStatus::Skipped).unwrap();

        assert!(run.transition(RunStatus::Checked).is_err());
        run.complete_stage(StageName::Notify).unwrap();
        assert_eq!(run.progress_rank, 4);
    }

    #[test]
    fn test_repeated_retrying_is_allowed() {
        let mut run = run();
        run.transition(RunStatus::Retrying).unwrap();
        run.transition(RunStatus::Retrying).unwrap();
        run.complete_stage(StageName::Ingest).unwrap();
        assert_eq!(run.status, RunStatus::Ingested);
    }

    #[test]
    fn test_stage_execution_lifecycle() {
        let run = run();
        let mut exec = StageExecution::start(run.run_id, StageName::Check, 2, "idem:x", "payload");
        assert_eq!(exec.status, ExecutionStatus::Running);

        exec.finish(ExecutionStatus::Succeeded, Some(json!({"checks_run": 1})), None);
        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert!(exec.finished_at.is_some());
        assert_eq!(exec.output_ref(), format!("{}/check/2", run.run_id));
    }

    #[test]
    fn test_carried_row_keeps_output() {
        let original = run();
        let mut exec = StageExecution::start(original.run_id, StageName::Ingest, 1, "k", "payload");
        exec.finish(ExecutionStatus::Succeeded, Some(json!({"incident_id": "INC-1"})), None);

        let resumed = run();
        let carried = exec.carried_into(resumed.run_id, "k2");
        assert_eq!(carried.status, ExecutionStatus::Carried);
        assert_eq!(carried.run_id, resumed.run_id);
        assert_eq!(carried.output, exec.output);
        assert_eq!(carried.input_ref, exec.output_ref());
    }

    #[test]
    fn test_chain_run_terminal() {
        let mut chain = ChainRun::new("t", "default", 1, "cli", "dev");
        chain.set_status(ChainStatus::Running).unwrap();
        chain.set_status(ChainStatus::Completed).unwrap();
        assert!(chain.completed_at.is_some());
        assert!(chain.set_status(ChainStatus::Failed).is_err());
    }
}
