//! Inbound run request shared by both engines and the task queue.

use serde::{Deserialize, Serialize};

/// What a caller hands to an engine to start a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Raw inbound payload.
    pub payload: serde_json::Value,
    /// Where the event came from (e.g. `grafana`, `cli`).
    pub source: String,
    /// Correlation id to reuse; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Environment tag; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl RunRequest {
    /// Creates a request with a fresh trace and the default environment.
    #[must_use]
    pub fn new(payload: serde_json::Value, source: impl Into<String>) -> Self {
        Self {
            payload,
            source: source.into(),
            trace_id: None,
            environment: None,
        }
    }

    /// Links the run to an existing trace.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Sets the environment tag.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }
}
