//! Canned alert payloads and stage outputs.

use std::sync::Arc;

use serde_json::json;

use crate::core::{
    AnalyzeOutput, CheckOutput, CheckResult, Delivery, IngestOutput, NotifyOutput, Recommendation,
    RunRequest, StageName,
};
use crate::stages::StageSet;

use super::ScriptedStage;

/// Incident id produced by [`ingest_output`].
pub const INCIDENT_ID: &str = "INC-4711";

/// Fingerprint produced by [`ingest_output`].
pub const ALERT_FINGERPRINT: &str = "9b1f0c2d7e4a";

/// Source used by [`alert_request`].
pub const ALERT_SOURCE: &str = "grafana";

/// A critical CPU alert payload.
#[must_use]
pub fn alert_payload() -> serde_json::Value {
    json!({"name": "HighCPU", "severity": "critical"})
}

/// A request for [`alert_payload`] with no caller-supplied trace.
#[must_use]
pub fn alert_request() -> RunRequest {
    RunRequest::new(alert_payload(), ALERT_SOURCE)
}

/// Ingest output linking the alert to [`INCIDENT_ID`].
#[must_use]
pub fn ingest_output() -> serde_json::Value {
    to_value(&IngestOutput {
        incident_id: INCIDENT_ID.to_string(),
        alert_fingerprint: ALERT_FINGERPRINT.to_string(),
        severity: "critical".to_string(),
        source: ALERT_SOURCE.to_string(),
    })
}

/// Check output with one passing and one failing check.
#[must_use]
pub fn check_output() -> serde_json::Value {
    to_value(&CheckOutput::from_results(vec![
        CheckResult {
            name: "cpu".to_string(),
            passed: false,
            message: Some("load 97%".to_string()),
        },
        CheckResult {
            name: "disk".to_string(),
            passed: true,
            message: None,
        },
    ]))
}

/// Analysis with a single recommendation.
#[must_use]
pub fn analyze_output() -> serde_json::Value {
    to_value(&AnalyzeOutput {
        recommendations: vec![Recommendation {
            title: "Scale out web tier".to_string(),
            detail: "CPU saturation on 3 of 4 nodes".to_string(),
        }],
        summary: "Sustained CPU saturation".to_string(),
        confidence: 0.82,
        fallback: false,
    })
}

/// Notify output delivered to slack.
#[must_use]
pub fn notify_output() -> serde_json::Value {
    to_value(&NotifyOutput::from_deliveries(vec![Delivery::delivered("slack")]))
}

/// Returns a canned output for `stage`.
#[must_use]
pub fn output_for(stage: StageName) -> serde_json::Value {
    match stage {
        StageName::Ingest => ingest_output(),
        StageName::Check => check_output(),
        StageName::Analyze => analyze_output(),
        StageName::Notify => notify_output(),
    }
}

/// A stage set where every stage succeeds with its canned output.
#[must_use]
pub fn happy_stages() -> StageSet {
    StageName::ALL.into_iter().fold(StageSet::new(), |set, stage| {
        set.with(Arc::new(ScriptedStage::succeeding(stage, output_for(stage))))
    })
}

fn to_value<T: serde::Serialize>(dto: &T) -> serde_json::Value {
    serde_json::to_value(dto).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_stages_cover_every_stage() {
        assert!(happy_stages().missing().is_empty());
    }

    #[test]
    fn test_ingest_output_carries_linkage() {
        let output = ingest_output();
        assert_eq!(output["incident_id"], INCIDENT_ID);
        assert_eq!(output["alert_fingerprint"], ALERT_FINGERPRINT);
    }
}
