//! Definition-based chain engine.

use super::{HandlerRegistry, NodeContext, NodeResult, NodeSpec, PipelineDefinition};
use crate::config::ChainConfig;
use crate::core::{ChainRun, ChainStatus, ExecutionStatus, NodeExecution, RunRequest};
use crate::errors::{AlertflowError, ErrorInfo};
use crate::events::{names, Signal, SignalEmitter, SignalTags};
use crate::observability::SpanTimer;
use crate::pipeline::{idempotency_key, RetryDecision};
use crate::store::RunStore;
use crate::utils::generate_trace_id;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Final state of one chain execution.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// The persisted run record.
    pub run: ChainRun,
    /// Output of every executed node, keyed by node id.
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl ChainOutcome {
    /// Returns true if the chain completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.run.status == ChainStatus::Completed
    }
}

/// Walks a validated node chain, one node at a time.
///
/// Node failures are recorded on the run, not returned as `Err`. Resume is
/// not supported for chain runs.
#[derive(Clone)]
pub struct ChainEngine {
    store: Arc<dyn RunStore>,
    handlers: Arc<HandlerRegistry>,
    emitter: SignalEmitter,
    config: ChainConfig,
}

impl std::fmt::Debug for ChainEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEngine")
            .field("handlers", &self.handlers.node_types())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChainEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        handlers: Arc<HandlerRegistry>,
        emitter: SignalEmitter,
    ) -> Self {
        Self {
            store,
            handlers,
            emitter,
            config: ChainConfig::default(),
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Loads the named definition (latest active version unless `version`
    /// is given) and executes it.
    pub async fn execute_named(
        &self,
        name: &str,
        version: Option<u32>,
        request: RunRequest,
    ) -> Result<ChainOutcome, AlertflowError> {
        let definition = self
            .store
            .load_definition(name, version)
            .await?
            .ok_or_else(|| match version {
                Some(v) => AlertflowError::not_found("definition", format!("{name}@{v}")),
                None => AlertflowError::not_found("definition", name),
            })?;
        self.execute_definition(&definition, request).await
    }

    /// Validates and executes `definition`.
    #[instrument(
        skip(self, definition, request),
        fields(definition = %definition.name, version = definition.version, source = %request.source)
    )]
    pub async fn execute_definition(
        &self,
        definition: &PipelineDefinition,
        request: RunRequest,
    ) -> Result<ChainOutcome, AlertflowError> {
        if !definition.is_active {
            return Err(AlertflowError::Permanent(format!(
                "definition '{}' version {} is inactive",
                definition.name, definition.version
            )));
        }
        let chain = definition.validate()?;

        let trace_id = request.trace_id.unwrap_or_else(generate_trace_id);
        let environment = request
            .environment
            .unwrap_or_else(|| self.config.environment.clone());

        let mut run = ChainRun::new(
            trace_id.clone(),
            definition.name.clone(),
            definition.version,
            request.source.clone(),
            environment.clone(),
        );
        run.set_status(ChainStatus::Running)?;
        self.store.save_chain_run(&run).await?;

        let mut ctx = NodeContext::new(
            run.run_id,
            trace_id.clone(),
            request.source.clone(),
            environment.clone(),
            request.payload,
        );
        let base_tags = SignalTags::new(trace_id, run.run_id.to_string(), request.source, environment);

        tracing::info!(run_id = %run.run_id, nodes = chain.len(), "Chain run started");
        self.emitter
            .emit_signal(
                Signal::new(names::PIPELINE_STARTED, base_tags.clone())
                    .with("definition", json!(definition.name))
                    .with("version", json!(definition.version)),
            )
            .await;

        for node in chain {
            let outcome = self.run_node(node, &mut ctx, &base_tags).await?;
            run.incident_id.clone_from(&ctx.incident_id);

            let Err(error) = outcome else { continue };
            let tags = run_tags(&base_tags, &ctx);

            if !node.required {
                tracing::warn!(
                    run_id = %run.run_id,
                    node_id = %node.id,
                    error = %error,
                    "Optional node failed, continuing"
                );
                self.emitter
                    .emit_signal(
                        Signal::new(
                            names::NODE_SKIPPED_OPTIONAL,
                            tags.for_node(&node.id, &node.node_type, ctx.attempt),
                        )
                        .with("error", json!(error.message)),
                    )
                    .await;
                continue;
            }

            run.failed_node = Some(node.id.clone());
            run.error = Some(error.clone());
            run.set_status(ChainStatus::Failed)?;
            self.store.save_chain_run(&run).await?;

            tracing::error!(run_id = %run.run_id, node_id = %node.id, error = %error, "Chain run failed");
            self.emitter
                .emit_signal(
                    Signal::new(names::PIPELINE_FAILED, tags)
                        .with("node_id", json!(node.id))
                        .with("error", json!(error.message)),
                )
                .await;

            return Ok(ChainOutcome {
                run,
                outputs: ctx.previous_outputs,
            });
        }

        run.set_status(ChainStatus::Completed)?;
        self.store.save_chain_run(&run).await?;

        tracing::info!(run_id = %run.run_id, duration_ms = run.duration_ms, "Chain run completed");
        self.emitter
            .emit(names::PIPELINE_COMPLETED, &run_tags(&base_tags, &ctx))
            .await;

        Ok(ChainOutcome {
            run,
            outputs: ctx.previous_outputs,
        })
    }

    /// Runs one node to success or to its final failure.
    async fn run_node(
        &self,
        node: &NodeSpec,
        ctx: &mut NodeContext,
        base_tags: &SignalTags,
    ) -> Result<Result<(), ErrorInfo>, AlertflowError> {
        let policy = self.config.retry_policy(
            node.config_u64("max_retries")
                .map(|v| u32::try_from(v).unwrap_or(u32::MAX)),
        );
        let timeout_ms = node
            .config_u64("timeout_ms")
            .unwrap_or(self.config.node_timeout_ms);
        let key = idempotency_key(ctx.run_id, &node.id);

        let mut attempt = 1;
        loop {
            ctx.node_id.clone_from(&node.id);
            ctx.attempt = attempt;
            ctx.idempotency_key.clone_from(&key);
            let tags = run_tags(base_tags, ctx).for_node(&node.id, &node.node_type, attempt);

            let mut execution = NodeExecution::start(
                ctx.run_id,
                node.id.clone(),
                node.node_type.clone(),
                node.required,
                attempt,
                key.clone(),
            );
            self.store.record_node_execution(&execution).await?;
            self.emitter.emit(names::STAGE_STARTED, &tags).await;

            let timer = SpanTimer::start(node.id.as_str());
            let result = self.invoke(node, ctx, timeout_ms).await;
            let elapsed_ms = timer.finish();
            ctx.record_output(&node.id, result.output.clone());

            if result.success {
                execution.finish(ExecutionStatus::Succeeded, Some(result.output), None);
                self.store.record_node_execution(&execution).await?;
                tracing::debug!(node_id = %node.id, attempt, elapsed_ms, "Node succeeded");
                self.emitter.emit(names::STAGE_SUCCEEDED, &tags).await;
                return Ok(Ok(()));
            }

            let error = result.error_or_default();
            let output = (!result.output.is_null()).then_some(result.output);
            execution.finish(ExecutionStatus::Failed, output, Some(error.clone()));
            self.store.record_node_execution(&execution).await?;
            self.emitter
                .emit_signal(
                    Signal::new(names::STAGE_FAILED, tags.clone())
                        .with("retryable", json!(error.is_retryable()))
                        .with("error", json!(error.message)),
                )
                .await;

            match policy.decide(&error, attempt) {
                RetryDecision::Retry(delay) => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    tracing::debug!(
                        node_id = %node.id,
                        attempt,
                        delay_ms,
                        error = %error,
                        "Retrying node after error"
                    );
                    self.emitter
                        .emit_signal(
                            Signal::new(names::STAGE_RETRYING, tags).with("delay_ms", json!(delay_ms)),
                        )
                        .await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::Exhausted | RetryDecision::NotRetryable => return Ok(Err(error)),
            }
        }
    }

    /// Runs the handler on its own task; a timeout detaches it instead of
    /// cancelling it.
    async fn invoke(&self, node: &NodeSpec, ctx: &NodeContext, timeout_ms: u64) -> NodeResult {
        let handler = match self.handlers.resolve(&node.node_type) {
            Ok(handler) => handler,
            Err(err) => {
                return NodeResult::fail(err.to_error_info().with_code("UNKNOWN_NODE_TYPE"));
            }
        };
        let config = node.config.clone();
        let owned = ctx.clone();
        let task = tokio::spawn(async move { handler.handle(&config, &owned).await });

        match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => NodeResult::fail(
                ErrorInfo::permanent(format!("handler for node '{}' aborted: {err}", node.id))
                    .with_code("HANDLER_PANICKED"),
            ),
            Err(_) => {
                tracing::warn!(node_id = %node.id, attempt = ctx.attempt, "Node timed out, handler left running");
                NodeResult::fail(ErrorInfo::timeout(&format!("node {}", node.id), timeout_ms))
            }
        }
    }
}

fn run_tags(base: &SignalTags, ctx: &NodeContext) -> SignalTags {
    let fingerprint = ctx
        .previous_outputs
        .values()
        .find_map(|o| o.get("alert_fingerprint").and_then(serde_json::Value::as_str))
        .map(str::to_string);
    base.clone()
        .with_incident(ctx.incident_id.clone())
        .with_fingerprint(fingerprint)
}
