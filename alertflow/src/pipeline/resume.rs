//! Resume controller for failed fixed-stage runs.

use super::orchestrator::{run_tags, Orchestrator, StageOutputs};
use super::idempotency_key;
use crate::core::{ExecutionStatus, PipelineRun, RunStatus, StageExecution, StageName};
use crate::errors::{AlertflowError, NotResumableError};
use crate::events::{names, Signal};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

/// Terminal outcome of one stage in a failed run's history.
enum Settled<'a> {
    Usable(&'a StageExecution),
    Skipped(&'a StageExecution),
}

/// Finds, for each stage in order, the row that settled it. Stops at the
/// first stage that never reached a usable or skipped outcome.
fn settled_prefix(rows: &[StageExecution]) -> Vec<Settled<'_>> {
    let mut settled = Vec::new();
    for stage in StageName::ALL {
        let mut stage_rows: Vec<&StageExecution> = rows.iter().filter(|r| r.stage == stage).collect();
        stage_rows.sort_by_key(|r| r.attempt);

        if let Some(row) = stage_rows.iter().rev().copied().find(|r| r.status.is_usable()) {
            settled.push(Settled::Usable(row));
        } else if let Some(row) = stage_rows.iter().copied().find(|r| r.status == ExecutionStatus::Skipped) {
            settled.push(Settled::Skipped(row));
        } else {
            break;
        }
    }
    settled
}

impl Orchestrator {
    /// Continues a failed run from its first unsettled stage.
    ///
    /// The failed run stays `FAILED`. A new run is created on the same
    /// trace with `resumed_from` set; settled stages are carried into it
    /// with their outputs untouched and only the remaining stages execute.
    ///
    /// Stage idempotency keys come from the lineage's first run, so a
    /// notify stage that delivered to some channels before failing does not
    /// deliver to them again.
    #[instrument(skip(self))]
    pub async fn resume_pipeline(&self, run_id: Uuid) -> Result<PipelineRun, AlertflowError> {
        let original = self
            .store()
            .load_run(run_id)
            .await?
            .ok_or_else(|| AlertflowError::not_found("run", run_id.to_string()))?;

        if original.status != RunStatus::Failed {
            return Err(NotResumableError::new(
                run_id.to_string(),
                format!("status is {}, only FAILED runs can be resumed", original.status),
            )
            .into());
        }

        let rows = self.store().list_stage_executions(run_id).await?;
        let settled = settled_prefix(&rows);
        let start = settled.len();
        if start == StageName::ALL.len() {
            return Err(NotResumableError::new(
                run_id.to_string(),
                "every stage already settled",
            )
            .into());
        }
        for entry in &settled {
            if let Settled::Usable(row) = entry {
                if row.output.is_none() {
                    return Err(NotResumableError::new(
                        run_id.to_string(),
                        format!("output of stage {} cannot be located", row.stage),
                    )
                    .into());
                }
            }
        }

        let mut run = self.registry().create_resumed_run(&original).await?;
        let outputs = match self.carry_settled(&mut run, &original, settled).await {
            Ok(outputs) => outputs,
            Err(err) => {
                self.abandon_run(&mut run, &err).await;
                return Err(err);
            }
        };

        let resume_at = StageName::ALL[start];
        tracing::info!(
            run_id = %run.run_id,
            resumed_from = %original.run_id,
            stage = %resume_at,
            "Resuming pipeline run"
        );
        self.emitter()
            .emit_signal(
                Signal::new(names::PIPELINE_RESUMED, run_tags(&run))
                    .with("resumed_from", json!(original.run_id.to_string()))
                    .with("stage", json!(resume_at.as_str())),
            )
            .await;

        self.drive(run, outputs, start).await
    }

    /// Records settled stages of `original` against `run` and replays their
    /// progress.
    async fn carry_settled(
        &self,
        run: &mut PipelineRun,
        original: &PipelineRun,
        settled: Vec<Settled<'_>>,
    ) -> Result<StageOutputs, AlertflowError> {
        let mut outputs = StageOutputs::default();

        for entry in settled {
            match entry {
                Settled::Usable(row) => {
                    let carried = row.carried_into(
                        run.run_id,
                        idempotency_key(run.idempotency_scope(), row.stage.as_str()),
                    );
                    self.store().record_stage_execution(&carried).await?;
                    if let Some(output) = carried.output.clone() {
                        outputs.insert(row.stage, output, carried.output_ref());
                    }
                    if row.stage == StageName::Analyze && original.intelligence_fallback_used {
                        run.intelligence_fallback_used = true;
                    }
                    run.complete_stage(row.stage)?;
                }
                Settled::Skipped(row) => {
                    let mut skipped = StageExecution::start(
                        run.run_id,
                        row.stage,
                        1,
                        idempotency_key(run.idempotency_scope(), row.stage.as_str()),
                        row.input_ref.clone(),
                    );
                    skipped.finish(ExecutionStatus::Skipped, None, None);
                    self.store().record_stage_execution(&skipped).await?;
                    run.transition(RunStatus::Skipped)?;
                }
            }
        }
        self.store().save_run(run).await?;
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorInfo;
    use crate::events::{CollectingEventSink, SignalEmitter};
    use crate::stages::{StageResult, StageSet};
    use crate::store::{InMemoryRunStore, RunStore};
    use crate::testing::{fixtures, ScriptedStage};
    use std::sync::Arc;

    fn orchestrator(stages: StageSet) -> (Orchestrator, Arc<InMemoryRunStore>) {
        let store = Arc::new(InMemoryRunStore::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            stages,
            SignalEmitter::new(Arc::new(CollectingEventSink::new())),
        );
        (orchestrator, store)
    }

    #[tokio::test]
    async fn test_only_failed_runs_resume() {
        let (orchestrator, _) = orchestrator(fixtures::happy_stages());
        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();

        let err = orchestrator.resume_pipeline(run.run_id).await.unwrap_err();
        assert!(matches!(err, AlertflowError::NotResumable(_)));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let (orchestrator, _) = orchestrator(fixtures::happy_stages());
        let err = orchestrator.resume_pipeline(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AlertflowError::NotFound { kind: "run", .. }));
    }

    #[tokio::test]
    async fn test_missing_output_is_not_resumable() {
        let (orchestrator, store) = orchestrator(fixtures::happy_stages());
        let mut run = PipelineRun::new("t", "grafana", "prod", json!({}));
        store.insert_run(&run).await.unwrap();

        let mut ingest = StageExecution::start(run.run_id, StageName::Ingest, 1, "k", "payload");
        ingest.finish(ExecutionStatus::Succeeded, None, None);
        store.record_stage_execution(&ingest).await.unwrap();
        run.complete_stage(StageName::Ingest).unwrap();
        run.fail(ErrorInfo::transient("check exhausted")).unwrap();
        store.save_run(&run).await.unwrap();

        let err = orchestrator.resume_pipeline(run.run_id).await.unwrap_err();
        match err {
            AlertflowError::NotResumable(e) => assert!(e.reason.contains("ingest")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ingest_failure_resumes_from_start() {
        let ingest = Arc::new(
            ScriptedStage::new(StageName::Ingest)
                .then(StageResult::fail(ErrorInfo::validation("bad payload")))
                .then(StageResult::ok(fixtures::ingest_output())),
        );
        let (orchestrator, store) = orchestrator(fixtures::happy_stages().with(ingest.clone()));

        let failed = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);

        let resumed = orchestrator.resume_pipeline(failed.run_id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Notified);
        assert_eq!(ingest.calls(), 2);
        let rows = store.list_stage_executions(resumed.run_id).await.unwrap();
        assert!(rows.iter().all(|r| r.status == ExecutionStatus::Succeeded));
    }
}
