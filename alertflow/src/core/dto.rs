//! Normalized stage output shapes.
//!
//! Executors may return any JSON, but the orchestrator reads these fields
//! (incident linkage, fingerprint, fallback analysis) when they are present.

use serde::{Deserialize, Serialize};

/// Output of the ingest stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutput {
    /// Incident created or linked for this event.
    pub incident_id: String,
    /// Deduplication fingerprint of the alert.
    pub alert_fingerprint: String,
    /// Normalized severity.
    pub severity: String,
    /// Alert source.
    pub source: String,
}

/// Result of one diagnostic check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name (e.g. `cpu`).
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Optional message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Output of the check stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckOutput {
    /// Number of checks executed.
    pub checks_run: u32,
    /// Number that passed.
    pub checks_passed: u32,
    /// Number that failed.
    pub checks_failed: u32,
    /// Per-check results.
    #[serde(default)]
    pub results: Vec<CheckResult>,
}

impl CheckOutput {
    /// Builds the counters from a list of results.
    #[must_use]
    pub fn from_results(results: Vec<CheckResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let total = results.len();
        Self {
            checks_run: u32::try_from(total).unwrap_or(u32::MAX),
            checks_passed: u32::try_from(passed).unwrap_or(u32::MAX),
            checks_failed: u32::try_from(total - passed).unwrap_or(u32::MAX),
            results,
        }
    }
}

/// A single recommendation from an intelligence provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Short title.
    pub title: String,
    /// Longer explanation.
    #[serde(default)]
    pub detail: String,
}

/// Output of the analyze stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeOutput {
    /// Recommendations, possibly empty.
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    /// Summary text.
    pub summary: String,
    /// Provider confidence in `[0, 1]`.
    pub confidence: f64,
    /// True when synthesized by the orchestrator instead of a provider.
    #[serde(default)]
    pub fallback: bool,
}

impl AnalyzeOutput {
    /// Synthesizes the degraded analysis used when intelligence is unavailable.
    #[must_use]
    pub fn fallback(reason: &str) -> Self {
        Self {
            recommendations: Vec::new(),
            summary: format!("Automated analysis unavailable: {reason}"),
            confidence: 0.0,
            fallback: true,
        }
    }
}

/// Delivery outcome for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Channel name (e.g. `slack`).
    pub channel: String,
    /// Whether delivery succeeded.
    pub success: bool,
    /// True if suppressed because the idempotency key was already delivered.
    #[serde(default)]
    pub duplicate: bool,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Delivery {
    /// A successful delivery.
    #[must_use]
    pub fn delivered(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            success: true,
            duplicate: false,
            error: None,
        }
    }

    /// A delivery suppressed as a duplicate; counts as success.
    #[must_use]
    pub fn duplicate(channel: impl Into<String>) -> Self {
        Self {
            duplicate: true,
            ..Self::delivered(channel)
        }
    }

    /// A failed delivery.
    #[must_use]
    pub fn failed(channel: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            success: false,
            duplicate: false,
            error: Some(error.into()),
        }
    }
}

/// Output of the notify stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyOutput {
    /// Number of channels attempted.
    pub channels_attempted: u32,
    /// Number that succeeded.
    pub channels_succeeded: u32,
    /// Number that failed.
    pub channels_failed: u32,
    /// Per-channel outcomes.
    #[serde(default)]
    pub deliveries: Vec<Delivery>,
}

impl NotifyOutput {
    /// Builds the counters from per-channel deliveries.
    #[must_use]
    pub fn from_deliveries(deliveries: Vec<Delivery>) -> Self {
        let succeeded = deliveries.iter().filter(|d| d.success).count();
        let total = deliveries.len();
        Self {
            channels_attempted: u32::try_from(total).unwrap_or(u32::MAX),
            channels_succeeded: u32::try_from(succeeded).unwrap_or(u32::MAX),
            channels_failed: u32::try_from(total - succeeded).unwrap_or(u32::MAX),
            deliveries,
        }
    }

    /// Some channels failed while others succeeded.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.channels_failed > 0 && self.channels_succeeded > 0
    }

    /// Every attempted channel failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.channels_attempted > 0 && self.channels_succeeded == 0
    }
}
