//! Execution state threaded through one chain run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Transient state of a chain run.
///
/// Created once per execution. Each node reads earlier entries of
/// `previous_outputs` and the engine appends the node's own output after it
/// finishes, whether it succeeded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeContext {
    /// Chain run id.
    pub run_id: Uuid,
    /// Correlation id.
    pub trace_id: String,
    /// Event source.
    pub source: String,
    /// Environment tag.
    pub environment: String,
    /// Raw inbound payload.
    pub payload: serde_json::Value,
    /// Incident linked by an ingest node, once known.
    pub incident_id: Option<String>,
    /// Node id to output, one entry per executed node.
    pub previous_outputs: BTreeMap<String, serde_json::Value>,
    /// Node currently executing.
    pub node_id: String,
    /// Attempt of the current node.
    pub attempt: u32,
    /// Idempotency key of the current node.
    pub idempotency_key: String,
}

impl NodeContext {
    /// Creates the context for a new chain run.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        trace_id: impl Into<String>,
        source: impl Into<String>,
        environment: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            run_id,
            trace_id: trace_id.into(),
            source: source.into(),
            environment: environment.into(),
            payload,
            incident_id: None,
            previous_outputs: BTreeMap::new(),
            node_id: String::new(),
            attempt: 0,
            idempotency_key: String::new(),
        }
    }

    /// Returns the output recorded for `node_id`.
    #[must_use]
    pub fn output(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.previous_outputs.get(node_id)
    }

    /// Records the output of `node_id`, replacing an earlier attempt's output.
    pub fn record_output(&mut self, node_id: &str, output: serde_json::Value) {
        if self.incident_id.is_none() {
            self.incident_id = output
                .get("incident_id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
        }
        self.previous_outputs.insert(node_id.to_string(), output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_output_links_incident() {
        let mut ctx = NodeContext::new(Uuid::new_v4(), "t", "cli", "dev", json!({}));
        assert!(ctx.incident_id.is_none());

        ctx.record_output("ingest", json!({"incident_id": "INC-7"}));
        ctx.record_output("later", json!({"incident_id": "INC-8"}));

        assert_eq!(ctx.incident_id.as_deref(), Some("INC-7"));
        assert_eq!(ctx.output("ingest"), Some(&json!({"incident_id": "INC-7"})));
    }

    #[test]
    fn test_record_output_keys_are_unique() {
        let mut ctx = NodeContext::new(Uuid::new_v4(), "t", "cli", "dev", json!({}));
        ctx.record_output("a", json!(1));
        ctx.record_output("a", json!(2));

        assert_eq!(ctx.previous_outputs.len(), 1);
        assert_eq!(ctx.output("a"), Some(&json!(2)));
    }
}
