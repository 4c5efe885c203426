//! Scripted executors and handlers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{NodeContext, NodeHandler, NodeResult};
use crate::core::{Delivery, NotifyOutput, StageName};
use crate::errors::ErrorInfo;
use crate::pipeline::{scoped_key, IdempotencyStore};
use crate::stages::{StageContext, StageExecutor, StageResult};

/// A stage executor that replays a script of results.
///
/// Each call pops the next scripted result; once one remains it is
/// returned for every further call. Every context it receives is recorded.
#[derive(Debug)]
pub struct ScriptedStage {
    stage: StageName,
    script: Mutex<VecDeque<StageResult>>,
    contexts: Mutex<Vec<StageContext>>,
    completions: Mutex<usize>,
    delay: Option<Duration>,
}

impl ScriptedStage {
    /// Creates a stage with an empty script (succeeds with `null`).
    #[must_use]
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            script: Mutex::new(VecDeque::new()),
            contexts: Mutex::new(Vec::new()),
            completions: Mutex::new(0),
            delay: None,
        }
    }

    /// Creates a stage that always succeeds with `output`.
    #[must_use]
    pub fn succeeding(stage: StageName, output: serde_json::Value) -> Self {
        Self::new(stage).then(StageResult::ok(output))
    }

    /// Creates a stage that always fails with `error`.
    #[must_use]
    pub fn failing(stage: StageName, error: ErrorInfo) -> Self {
        Self::new(stage).then(StageResult::fail(error))
    }

    /// Appends a result to the script.
    #[must_use]
    pub fn then(self, result: StageResult) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns the number of calls that ran to the end, including ones the
    /// caller stopped waiting for.
    #[must_use]
    pub fn completions(&self) -> usize {
        *self.completions.lock()
    }

    /// Returns the contexts received, in call order.
    #[must_use]
    pub fn contexts(&self) -> Vec<StageContext> {
        self.contexts.lock().clone()
    }

    fn next_result(&self) -> StageResult {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| StageResult::ok(serde_json::Value::Null))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| StageResult::ok(serde_json::Value::Null))
        }
    }
}

#[async_trait]
impl StageExecutor for ScriptedStage {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        self.contexts.lock().push(ctx.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.completions.lock() += 1;
        self.next_result()
    }
}

/// A node handler that replays a script of results.
#[derive(Debug, Default)]
pub struct ScriptedNode {
    script: Mutex<VecDeque<NodeResult>>,
    contexts: Mutex<Vec<NodeContext>>,
    completions: Mutex<usize>,
    delay: Option<Duration>,
}

impl ScriptedNode {
    /// Creates a handler with an empty script (succeeds with `null`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that always succeeds with `output`.
    #[must_use]
    pub fn succeeding(output: serde_json::Value) -> Self {
        Self::new().then(NodeResult::ok(output))
    }

    /// Creates a handler that always fails with `error`.
    #[must_use]
    pub fn failing(error: ErrorInfo) -> Self {
        Self::new().then(NodeResult::fail(error))
    }

    /// Creates a handler that always fails with `error` and diagnostic output.
    #[must_use]
    pub fn failing_with_output(error: ErrorInfo, output: serde_json::Value) -> Self {
        Self::new().then(NodeResult::fail_with_output(error, output))
    }

    /// Appends a result to the script.
    #[must_use]
    pub fn then(self, result: NodeResult) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns the number of calls that ran to the end, including ones the
    /// caller stopped waiting for.
    #[must_use]
    pub fn completions(&self) -> usize {
        *self.completions.lock()
    }

    /// Returns the contexts received, in call order.
    #[must_use]
    pub fn contexts(&self) -> Vec<NodeContext> {
        self.contexts.lock().clone()
    }

    fn next_result(&self) -> NodeResult {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| NodeResult::ok(serde_json::Value::Null))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| NodeResult::ok(serde_json::Value::Null))
        }
    }
}

#[async_trait]
impl NodeHandler for ScriptedNode {
    async fn handle(&self, _config: &serde_json::Value, ctx: &NodeContext) -> NodeResult {
        self.contexts.lock().push(ctx.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.completions.lock() += 1;
        self.next_result()
    }
}

/// A notify executor that de-duplicates deliveries through an
/// [`IdempotencyStore`] and records every delivery that actually happened.
pub struct RecordingNotifier {
    channels: Vec<String>,
    failing: HashSet<String>,
    idempotency: Arc<dyn IdempotencyStore>,
    delivered: Mutex<Vec<(String, String)>>,
    lost_acks: Mutex<u32>,
}

impl RecordingNotifier {
    /// Creates a notifier for `channels`.
    #[must_use]
    pub fn new(channels: &[&str], idempotency: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            channels: channels.iter().map(|c| (*c).to_string()).collect(),
            failing: HashSet::new(),
            idempotency,
            delivered: Mutex::new(Vec::new()),
            lost_acks: Mutex::new(0),
        }
    }

    /// Reports the first `calls` executions as failed after delivering.
    #[must_use]
    pub fn with_lost_acks(self, calls: u32) -> Self {
        *self.lost_acks.lock() = calls;
        self
    }

    /// Makes deliveries to `channel` fail.
    #[must_use]
    pub fn with_failing_channel(mut self, channel: &str) -> Self {
        self.failing.insert(channel.to_string());
        self
    }

    /// Returns `(idempotency_key, channel)` for every real delivery.
    #[must_use]
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().clone()
    }

    /// Returns the number of real deliveries to `channel`.
    #[must_use]
    pub fn deliveries_to(&self, channel: &str) -> usize {
        self.delivered.lock().iter().filter(|(_, c)| c == channel).count()
    }
}

impl std::fmt::Debug for RecordingNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingNotifier")
            .field("channels", &self.channels)
            .field("failing", &self.failing)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StageExecutor for RecordingNotifier {
    fn stage(&self) -> StageName {
        StageName::Notify
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let mut deliveries = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let key = scoped_key(&ctx.idempotency_key, channel);
            if !self.idempotency.claim(&key).await {
                deliveries.push(Delivery::duplicate(channel.as_str()));
                continue;
            }
            if self.failing.contains(channel) {
                self.idempotency.release(&key).await;
                deliveries.push(Delivery::failed(channel.as_str(), "transport unavailable"));
                continue;
            }
            self.delivered
                .lock()
                .push((ctx.idempotency_key.clone(), channel.clone()));
            self.idempotency
                .record(&key, serde_json::json!({"channel": channel}))
                .await;
            deliveries.push(Delivery::delivered(channel.as_str()));
        }

        {
            let mut lost = self.lost_acks.lock();
            if *lost > 0 {
                *lost -= 1;
                return StageResult::fail(ErrorInfo::permanent("delivery acknowledgement lost"));
            }
        }

        let output = NotifyOutput::from_deliveries(deliveries);
        if output.all_failed() {
            let value = serde_json::to_value(&output).unwrap_or_default();
            return StageResult::fail_with_output(
                ErrorInfo::transient("all notification channels failed"),
                value,
            );
        }
        StageResult::ok_dto(&output)
    }
}
