//! Lifecycle signals and their mandatory correlation tags.

use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signal names emitted by the engines.
pub mod names {
    /// A fixed-stage or chain run started.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A run reached terminal success.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A run reached terminal failure.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A failed run was resumed into a new run.
    pub const PIPELINE_RESUMED: &str = "pipeline.resumed";
    /// A stage attempt started.
    pub const STAGE_STARTED: &str = "pipeline.stage.started";
    /// A stage attempt succeeded.
    pub const STAGE_SUCCEEDED: &str = "pipeline.stage.succeeded";
    /// A stage attempt failed; carries `retryable`.
    pub const STAGE_FAILED: &str = "pipeline.stage.failed";
    /// A stage is about to be retried; carries `delay_ms`.
    pub const STAGE_RETRYING: &str = "pipeline.stage.retrying";
    /// A stage was disabled by configuration.
    pub const STAGE_SKIPPED: &str = "pipeline.stage.skipped";
    /// A degraded analysis was substituted.
    pub const STAGE_FALLBACK: &str = "pipeline.stage.fallback";
    /// An optional chain node failed and the chain continued.
    pub const NODE_SKIPPED_OPTIONAL: &str = "pipeline.node.skipped_optional";
}

/// Correlation tags carried by every signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTags {
    /// Correlation id.
    pub trace_id: String,
    /// Run id.
    pub run_id: String,
    /// Incident id, once ingest linked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Fixed stage name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Chain node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Chain node type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    /// Event source.
    pub source: String,
    /// Alert fingerprint, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_fingerprint: Option<String>,
    /// Environment tag.
    pub environment: String,
    /// Attempt number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl SignalTags {
    /// Creates run-level tags.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        run_id: impl Into<String>,
        source: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            run_id: run_id.into(),
            source: source.into(),
            environment: environment.into(),
            ..Default::default()
        }
    }

    /// Sets the incident id.
    #[must_use]
    pub fn with_incident(mut self, incident_id: Option<String>) -> Self {
        self.incident_id = incident_id;
        self
    }

    /// Sets the alert fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.alert_fingerprint = fingerprint;
        self
    }

    /// Scopes the tags to a stage attempt.
    #[must_use]
    pub fn for_stage(&self, stage: &str, attempt: u32) -> Self {
        Self {
            stage: Some(stage.to_string()),
            attempt: Some(attempt),
            ..self.clone()
        }
    }

    /// Scopes the tags to a node attempt.
    #[must_use]
    pub fn for_node(&self, node_id: &str, node_type: &str, attempt: u32) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            node_type: Some(node_type.to_string()),
            attempt: Some(attempt),
            ..self.clone()
        }
    }

    /// Flattens the tags into string attributes for metrics backends.
    #[must_use]
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert("trace_id".to_string(), self.trace_id.clone());
        attrs.insert("run_id".to_string(), self.run_id.clone());
        attrs.insert("source".to_string(), self.source.clone());
        attrs.insert("environment".to_string(), self.environment.clone());

        if let Some(ref v) = self.incident_id {
            attrs.insert("incident_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.stage {
            attrs.insert("stage".to_string(), v.clone());
        }
        if let Some(ref v) = self.node_id {
            attrs.insert("node_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.node_type {
            attrs.insert("node_type".to_string(), v.clone());
        }
        if let Some(ref v) = self.alert_fingerprint {
            attrs.insert("alert_fingerprint".to_string(), v.clone());
        }
        if let Some(v) = self.attempt {
            attrs.insert("attempt".to_string(), v.to_string());
        }
        attrs
    }
}

/// One structured lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Event name (see [`names`]).
    pub event: String,
    /// Correlation tags.
    pub tags: SignalTags,
    /// Event-specific fields (`retryable`, `delay_ms`, `error`, ...).
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// ISO 8601 emission time.
    pub timestamp: String,
}

impl Signal {
    /// Creates a signal with no extra data.
    #[must_use]
    pub fn new(event: impl Into<String>, tags: SignalTags) -> Self {
        Self {
            event: event.into(),
            tags,
            data: serde_json::Map::new(),
            timestamp: iso_timestamp(),
        }
    }

    /// Adds a data field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Reads a data field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}
