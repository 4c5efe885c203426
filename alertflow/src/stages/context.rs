//! Input context handed to a stage executor.

use crate::core::StageName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything a stage attempt may read: the payload, run metadata and the
/// outputs of the stages before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageContext {
    /// Run id.
    pub run_id: Uuid,
    /// Correlation id.
    pub trace_id: String,
    /// Stage being executed.
    pub stage: StageName,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Key for de-duplicating side effects across attempts.
    pub idempotency_key: String,
    /// Event source.
    pub source: String,
    /// Environment tag.
    pub environment: String,
    /// Raw inbound payload.
    pub payload: serde_json::Value,
    /// Incident linked by ingest, once known.
    pub incident_id: Option<String>,
    /// Alert fingerprint, once known.
    pub alert_fingerprint: Option<String>,
    /// Outputs of earlier stages that produced one.
    pub prior_outputs: BTreeMap<StageName, serde_json::Value>,
}

impl StageContext {
    /// Returns the raw output of an earlier stage.
    #[must_use]
    pub fn output(&self, stage: StageName) -> Option<&serde_json::Value> {
        self.prior_outputs.get(&stage)
    }

    /// Deserializes the output of an earlier stage into a DTO.
    #[must_use]
    pub fn output_as<T: DeserializeOwned>(&self, stage: StageName) -> Option<T> {
        self.output(stage)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}
