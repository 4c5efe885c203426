//! Fixed-stage orchestrator.
//!
//! Drives ingest, check, analyze and notify strictly in order. Every attempt
//! is persisted as its own [`StageExecution`] row before the next decision
//! is taken.

use super::registry::RunRegistry;
use super::retry::RetryDecision;
use super::idempotency_key;
use crate::config::OrchestratorConfig;
use crate::core::{
    AnalyzeOutput, ExecutionStatus, PipelineRun, RunRequest, RunStatus, StageExecution, StageName,
};
use crate::errors::{AlertflowError, ErrorInfo};
use crate::events::{names, Signal, SignalEmitter, SignalTags};
use crate::observability::SpanTimer;
use crate::stages::{StageContext, StageResult, StageSet};
use crate::store::RunStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Stage outputs and their references accumulated while a run advances.
#[derive(Debug, Clone, Default)]
pub(crate) struct StageOutputs {
    pub(crate) values: BTreeMap<StageName, serde_json::Value>,
    pub(crate) refs: BTreeMap<StageName, String>,
}

impl StageOutputs {
    pub(crate) fn insert(&mut self, stage: StageName, value: serde_json::Value, output_ref: String) {
        self.values.insert(stage, value);
        self.refs.insert(stage, output_ref);
    }

    fn input_ref(&self, run: &PipelineRun) -> String {
        self.refs
            .values()
            .next_back()
            .cloned()
            .unwrap_or_else(|| format!("{}/payload", run.run_id))
    }
}

enum StageOutcome {
    Succeeded {
        output: serde_json::Value,
        output_ref: String,
    },
    Failed {
        error: ErrorInfo,
        attempt: u32,
    },
}

/// Runs the fixed four-stage pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    registry: RunRegistry,
    stages: StageSet,
    emitter: SignalEmitter,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.stages)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, stages: StageSet, emitter: SignalEmitter) -> Self {
        Self {
            registry: RunRegistry::new(store.clone()),
            store,
            stages,
            emitter,
            config: OrchestratorConfig::default(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the store runs are persisted to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub(crate) fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub(crate) fn emitter(&self) -> &SignalEmitter {
        &self.emitter
    }

    /// Runs an event through every stage and returns the terminal run.
    ///
    /// A stage failure yields `Ok` with a `FAILED` run; `Err` means the run
    /// could not be created or persisted.
    #[instrument(skip(self, request), fields(source = %request.source, trace_id = ?request.trace_id))]
    pub async fn run_pipeline(&self, request: RunRequest) -> Result<PipelineRun, AlertflowError> {
        let run = self
            .registry
            .create_run(&request, &self.config.environment)
            .await?;

        tracing::info!(run_id = %run.run_id, trace_id = %run.trace_id, "Pipeline run started");
        self.emitter
            .emit(names::PIPELINE_STARTED, &run_tags(&run))
            .await;

        self.drive(run, StageOutputs::default(), 0).await
    }

    /// Advances `run` from `StageName::ALL[start]` to a terminal status.
    ///
    /// If a store or transition error interrupts the run, a best-effort
    /// `FAILED` save is attempted before the error is returned so the
    /// persisted run does not stay in flight.
    pub(crate) async fn drive(
        &self,
        mut run: PipelineRun,
        outputs: StageOutputs,
        start: usize,
    ) -> Result<PipelineRun, AlertflowError> {
        match self.advance(&mut run, outputs, start).await {
            Ok(()) => Ok(run),
            Err(err) => {
                self.abandon_run(&mut run, &err).await;
                Err(err)
            }
        }
    }

    async fn advance(
        &self,
        run: &mut PipelineRun,
        mut outputs: StageOutputs,
        start: usize,
    ) -> Result<(), AlertflowError> {
        for stage in StageName::ALL.into_iter().skip(start) {
            if !self.config.is_stage_enabled(stage) {
                if stage == StageName::Ingest {
                    tracing::warn!(run_id = %run.run_id, "Ingest cannot be disabled, running it");
                } else {
                    self.skip_stage(run, stage, &outputs).await?;
                    continue;
                }
            }

            match self.execute_stage(run, stage, &outputs).await? {
                StageOutcome::Succeeded { output, output_ref } => {
                    if stage == StageName::Ingest {
                        absorb_ingest_output(run, &output);
                    }
                    outputs.insert(stage, output, output_ref);
                    run.complete_stage(stage)?;
                    self.store.save_run(run).await?;
                }
                StageOutcome::Failed { error, attempt }
                    if stage == StageName::Analyze && self.config.intelligence_fallback_enabled =>
                {
                    self.apply_fallback(run, &mut outputs, error, attempt).await?;
                }
                StageOutcome::Failed { error, .. } => {
                    return self.fail_run(run, stage, error).await;
                }
            }
        }

        if run.status != RunStatus::Notified {
            run.transition(RunStatus::Notified)?;
        }
        self.store.save_run(run).await?;

        tracing::info!(
            run_id = %run.run_id,
            duration_ms = run.duration_ms,
            fallback = run.intelligence_fallback_used,
            "Pipeline run completed"
        );
        self.emitter
            .emit_signal(
                Signal::new(names::PIPELINE_COMPLETED, run_tags(run))
                    .with("intelligence_fallback_used", json!(run.intelligence_fallback_used)),
            )
            .await;
        Ok(())
    }

    /// Persists `run` as failed after `cause` interrupted it.
    pub(crate) async fn abandon_run(&self, run: &mut PipelineRun, cause: &AlertflowError) {
        if !run.is_terminal() {
            let error = cause.to_error_info().with_code("RUN_INTERRUPTED");
            if let Err(err) = run.fail(error) {
                tracing::error!(run_id = %run.run_id, error = %err, "Could not fail interrupted run");
                return;
            }
        }
        match self.store.save_run(run).await {
            Ok(()) => {
                tracing::warn!(
                    run_id = %run.run_id,
                    status = %run.status,
                    error = %cause,
                    "Interrupted run persisted"
                );
                self.emitter
                    .emit_signal(
                        Signal::new(names::PIPELINE_FAILED, run_tags(run))
                            .with("error", json!(cause.to_string())),
                    )
                    .await;
            }
            Err(err) => {
                tracing::error!(
                    run_id = %run.run_id,
                    error = %err,
                    cause = %cause,
                    "Interrupted run could not be persisted, stored status is stale"
                );
            }
        }
    }

    async fn skip_stage(
        &self,
        run: &mut PipelineRun,
        stage: StageName,
        outputs: &StageOutputs,
    ) -> Result<(), AlertflowError> {
        let mut row = StageExecution::start(
            run.run_id,
            stage,
            1,
            idempotency_key(run.idempotency_scope(), stage.as_str()),
            outputs.input_ref(run),
        );
        row.finish(ExecutionStatus::Skipped, None, None);
        self.store.record_stage_execution(&row).await?;

        run.transition(RunStatus::Skipped)?;
        self.store.save_run(run).await?;

        tracing::info!(run_id = %run.run_id, stage = %stage, "Stage disabled, skipping");
        self.emitter
            .emit(names::STAGE_SKIPPED, &run_tags(run).for_stage(stage.as_str(), 1))
            .await;
        Ok(())
    }

    /// Runs every attempt of one stage.
    async fn execute_stage(
        &self,
        run: &mut PipelineRun,
        stage: StageName,
        outputs: &StageOutputs,
    ) -> Result<StageOutcome, AlertflowError> {
        let policy = self.config.retry_policy_for(stage);
        let key = idempotency_key(run.idempotency_scope(), stage.as_str());
        let input_ref = outputs.input_ref(run);

        let mut attempt = 1;
        loop {
            let tags = run_tags(run).for_stage(stage.as_str(), attempt);
            let ctx = StageContext {
                run_id: run.run_id,
                trace_id: run.trace_id.clone(),
                stage,
                attempt,
                idempotency_key: key.clone(),
                source: run.source.clone(),
                environment: run.environment.clone(),
                payload: run.payload.clone(),
                incident_id: run.incident_ref.clone(),
                alert_fingerprint: run.alert_fingerprint.clone(),
                prior_outputs: outputs.values.clone(),
            };

            let mut row = StageExecution::start(run.run_id, stage, attempt, key.clone(), input_ref.clone());
            self.store.record_stage_execution(&row).await?;
            self.emitter.emit(names::STAGE_STARTED, &tags).await;

            let timer = SpanTimer::start(stage.as_str());
            let result = self.invoke(stage, &ctx).await;
            let elapsed_ms = timer.finish();

            if result.success {
                row.finish(ExecutionStatus::Succeeded, Some(result.output.clone()), None);
                self.store.record_stage_execution(&row).await?;
                tracing::debug!(run_id = %run.run_id, stage = %stage, attempt, elapsed_ms, "Stage succeeded");
                self.emitter.emit(names::STAGE_SUCCEEDED, &tags).await;
                return Ok(StageOutcome::Succeeded {
                    output: result.output,
                    output_ref: row.output_ref(),
                });
            }

            let error = result.error_or_default();
            let partial = (!result.output.is_null()).then_some(result.output);
            row.finish(ExecutionStatus::Failed, partial, Some(error.clone()));
            self.store.record_stage_execution(&row).await?;
            tracing::warn!(
                run_id = %run.run_id,
                stage = %stage,
                attempt,
                retryable = result.retryable,
                elapsed_ms,
                error = %error,
                "Stage failed"
            );
            self.emitter
                .emit_signal(
                    Signal::new(names::STAGE_FAILED, tags.clone())
                        .with("retryable", json!(result.retryable))
                        .with("error", json!(error.message)),
                )
                .await;

            let decision = if result.retryable {
                policy.decide(&error, attempt)
            } else {
                RetryDecision::NotRetryable
            };
            let RetryDecision::Retry(delay) = decision else {
                return Ok(StageOutcome::Failed { error, attempt });
            };

            run.transition(RunStatus::Retrying)?;
            self.store.save_run(run).await?;
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::debug!(run_id = %run.run_id, stage = %stage, attempt, delay_ms, "Retrying stage");
            self.emitter
                .emit_signal(Signal::new(names::STAGE_RETRYING, tags).with("delay_ms", json!(delay_ms)))
                .await;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Runs the executor on its own task and waits up to the stage timeout.
    ///
    /// On timeout the attempt is recorded as failed but the task is left to
    /// finish; executors are never pre-empted mid-flight.
    async fn invoke(&self, stage: StageName, ctx: &StageContext) -> StageResult {
        let Some(executor) = self.stages.get(stage).cloned() else {
            return StageResult::fail(
                ErrorInfo::permanent(format!("no executor registered for stage '{stage}'"))
                    .with_code("UNKNOWN_STAGE_EXECUTOR"),
            );
        };
        let timeout = self.config.timeout_for(stage);
        let owned = ctx.clone();
        let task = tokio::spawn(async move { executor.execute(&owned).await });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => StageResult::fail(
                ErrorInfo::permanent(format!("executor for stage '{stage}' aborted: {err}"))
                    .with_code("EXECUTOR_PANICKED"),
            ),
            Err(_) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    stage = %stage,
                    attempt = ctx.attempt,
                    "Stage timed out, executor left running"
                );
                StageResult::fail(ErrorInfo::timeout(
                    &format!("stage {stage}"),
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    async fn apply_fallback(
        &self,
        run: &mut PipelineRun,
        outputs: &mut StageOutputs,
        error: ErrorInfo,
        attempt: u32,
    ) -> Result<(), AlertflowError> {
        let stage = StageName::Analyze;
        let output = serde_json::to_value(AnalyzeOutput::fallback(&error.message))?;

        let mut row = StageExecution::start(
            run.run_id,
            stage,
            attempt + 1,
            idempotency_key(run.idempotency_scope(), stage.as_str()),
            outputs.input_ref(run),
        );
        row.finish(ExecutionStatus::Fallback, Some(output.clone()), Some(error.clone()));
        self.store.record_stage_execution(&row).await?;

        run.intelligence_fallback_used = true;
        run.complete_stage(stage)?;
        self.store.save_run(run).await?;
        outputs.insert(stage, output, row.output_ref());

        tracing::warn!(run_id = %run.run_id, error = %error, "Analysis unavailable, using fallback");
        self.emitter
            .emit_signal(
                Signal::new(names::STAGE_FALLBACK, run_tags(run).for_stage(stage.as_str(), attempt))
                    .with("error", json!(error.message)),
            )
            .await;
        Ok(())
    }

    async fn fail_run(
        &self,
        run: &mut PipelineRun,
        stage: StageName,
        error: ErrorInfo,
    ) -> Result<(), AlertflowError> {
        run.fail(error.clone())?;
        self.store.save_run(run).await?;

        tracing::error!(run_id = %run.run_id, stage = %stage, error = %error, "Pipeline run failed");
        self.emitter
            .emit_signal(
                Signal::new(names::PIPELINE_FAILED, run_tags(run))
                    .with("stage", json!(stage.as_str()))
                    .with("error", json!(error.message)),
            )
            .await;
        Ok(())
    }
}

/// Run-level signal tags.
pub(crate) fn run_tags(run: &PipelineRun) -> SignalTags {
    SignalTags::new(
        run.trace_id.clone(),
        run.run_id.to_string(),
        run.source.clone(),
        run.environment.clone(),
    )
    .with_incident(run.incident_ref.clone())
    .with_fingerprint(run.alert_fingerprint.clone())
}

fn absorb_ingest_output(run: &mut PipelineRun, output: &serde_json::Value) {
    if let Some(incident) = output.get("incident_id").and_then(serde_json::Value::as_str) {
        run.incident_ref = Some(incident.to_string());
    }
    if let Some(fingerprint) = output.get("alert_fingerprint").and_then(serde_json::Value::as_str) {
        run.alert_fingerprint = Some(fingerprint.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::events::CollectingEventSink;
    use crate::pipeline::JitterStrategy;
    use crate::store::InMemoryRunStore;
    use crate::testing::{fixtures, ScriptedStage};
    use pretty_assertions::assert_eq;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    fn orchestrator(stages: StageSet) -> (Orchestrator, Arc<InMemoryRunStore>, Arc<CollectingEventSink>) {
        let store = Arc::new(InMemoryRunStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = Orchestrator::new(store.clone(), stages, SignalEmitter::new(sink.clone()))
            .with_config(config());
        (orchestrator, store, sink)
    }

    #[tokio::test]
    async fn test_ingest_output_links_incident() {
        let (orchestrator, _, sink) = orchestrator(fixtures::happy_stages());
        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();

        assert_eq!(run.status, RunStatus::Notified);
        assert_eq!(run.incident_ref.as_deref(), Some(fixtures::INCIDENT_ID));
        assert_eq!(run.alert_fingerprint.as_deref(), Some(fixtures::ALERT_FINGERPRINT));
        assert_eq!(run.last_completed_stage, Some(StageName::Notify));

        let notify_started = sink
            .signals_named(names::STAGE_STARTED)
            .into_iter()
            .find(|s| s.tags.stage.as_deref() == Some("notify"))
            .unwrap();
        assert_eq!(notify_started.tags.incident_id.as_deref(), Some(fixtures::INCIDENT_ID));
        assert_eq!(notify_started.tags.attempt, Some(1));
    }

    #[tokio::test]
    async fn test_prior_outputs_reach_later_stages() {
        let notify = Arc::new(ScriptedStage::succeeding(StageName::Notify, fixtures::notify_output()));
        let stages = fixtures::happy_stages().with(notify.clone());
        let (orchestrator, _, _) = orchestrator(stages);
        orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();

        let ctx = &notify.contexts()[0];
        assert_eq!(
            ctx.prior_outputs.keys().copied().collect::<Vec<_>>(),
            vec![StageName::Ingest, StageName::Check, StageName::Analyze]
        );
        assert_eq!(ctx.incident_id.as_deref(), Some(fixtures::INCIDENT_ID));
    }

    #[tokio::test]
    async fn test_disabled_stage_is_skipped() {
        let check = Arc::new(ScriptedStage::succeeding(StageName::Check, fixtures::check_output()));
        let stages = fixtures::happy_stages().with(check.clone());
        let (orchestrator, store, sink) = orchestrator(stages);
        let orchestrator =
            orchestrator.with_config(config().with_stage_disabled(StageName::Check));

        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();

        assert_eq!(run.status, RunStatus::Notified);
        assert_eq!(check.calls(), 0);
        let rows = store.list_stage_executions(run.run_id).await.unwrap();
        let check_row = rows.iter().find(|r| r.stage == StageName::Check).unwrap();
        assert_eq!(check_row.status, ExecutionStatus::Skipped);
        assert_eq!(sink.signals_named(names::STAGE_SKIPPED).len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_notify_still_completes() {
        let (orchestrator, _, _) = orchestrator(fixtures::happy_stages());
        let orchestrator =
            orchestrator.with_config(config().with_stage_disabled(StageName::Notify));

        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Notified);
        assert_eq!(run.last_completed_stage, Some(StageName::Analyze));
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_ingest_cannot_be_disabled() {
        let ingest = Arc::new(ScriptedStage::succeeding(StageName::Ingest, fixtures::ingest_output()));
        let stages = fixtures::happy_stages().with(ingest.clone());
        let (orchestrator, _, _) = orchestrator(stages);
        let orchestrator =
            orchestrator.with_config(config().with_stage_disabled(StageName::Ingest));

        orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();
        assert_eq!(ingest.calls(), 1);
    }

    #[tokio::test]
    async fn test_ingest_failure_is_fatal_even_with_fallback() {
        let stages = fixtures::happy_stages().with(Arc::new(ScriptedStage::failing(
            StageName::Ingest,
            ErrorInfo::validation("unparsable payload"),
        )));
        let (orchestrator, store, sink) = orchestrator(stages);

        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().map(|e| e.kind), Some(ErrorKind::Validation));
        assert_eq!(store.list_stage_executions(run.run_id).await.unwrap().len(), 1);
        assert_eq!(
            sink.event_names(),
            vec![
                names::PIPELINE_STARTED,
                names::STAGE_STARTED,
                names::STAGE_FAILED,
                names::PIPELINE_FAILED,
            ]
        );
    }

    #[tokio::test]
    async fn test_analyze_failure_without_fallback_fails_run() {
        let stages = fixtures::happy_stages().with(Arc::new(ScriptedStage::failing(
            StageName::Analyze,
            ErrorInfo::permanent("unknown provider"),
        )));
        let (orchestrator, _, _) = orchestrator(stages);
        let orchestrator = orchestrator.with_config(config().with_intelligence_fallback(false));

        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(!run.intelligence_fallback_used);
        assert_eq!(run.last_completed_stage, Some(StageName::Check));
    }

    #[tokio::test]
    async fn test_missing_executor_is_permanent() {
        let stages = StageSet::new().with(Arc::new(ScriptedStage::succeeding(
            StageName::Ingest,
            fixtures::ingest_output(),
        )));
        let (orchestrator, _, _) = orchestrator(stages);

        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let error = run.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Permanent);
        assert_eq!(error.code.as_deref(), Some("UNKNOWN_STAGE_EXECUTOR"));
    }

    #[tokio::test]
    async fn test_retrying_status_is_persisted_between_attempts() {
        let check = Arc::new(
            ScriptedStage::new(StageName::Check)
                .then(StageResult::fail(ErrorInfo::transient("503")))
                .then(StageResult::ok(fixtures::check_output())),
        );
        let stages = fixtures::happy_stages().with(check.clone());
        let (orchestrator, _, sink) = orchestrator(stages);

        let run = orchestrator.run_pipeline(fixtures::alert_request()).await.unwrap();

        assert_eq!(run.status, RunStatus::Notified);
        let retrying = sink.signals_named(names::STAGE_RETRYING);
        assert_eq!(retrying.len(), 1);
        assert_eq!(retrying[0].tags.attempt, Some(1));
        assert_eq!(retrying[0].get("delay_ms"), Some(&json!(1)));
        let failed = sink.signals_named(names::STAGE_FAILED);
        assert_eq!(failed[0].get("retryable"), Some(&json!(true)));
        assert_eq!(check.contexts()[1].attempt, 2);
        assert_eq!(check.contexts()[0].idempotency_key, check.contexts()[1].idempotency_key);
    }
}
