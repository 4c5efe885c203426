//! Result type returned by stage executors.

use crate::errors::ErrorInfo;
use serde::{Deserialize, Serialize};

/// Outcome of one stage attempt.
///
/// `retryable` always mirrors the reported error's classification; the
/// orchestrator never re-interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Stage DTO (or partial output on failure).
    pub output: serde_json::Value,
    /// Classified failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Whether the failure may be retried.
    #[serde(default)]
    pub retryable: bool,
}

impl StageResult {
    /// A successful result with a JSON output.
    #[must_use]
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            retryable: false,
        }
    }

    /// A successful result from a typed DTO.
    ///
    /// A DTO that cannot be serialized becomes a validation failure.
    #[must_use]
    pub fn ok_dto<T: Serialize>(dto: &T) -> Self {
        match serde_json::to_value(dto) {
            Ok(output) => Self::ok(output),
            Err(err) => Self::fail(ErrorInfo::validation(format!(
                "stage output is not serializable: {err}"
            ))),
        }
    }

    /// A failed result.
    #[must_use]
    pub fn fail(error: ErrorInfo) -> Self {
        Self::fail_with_output(error, serde_json::Value::Null)
    }

    /// A failed result that still carries partial output.
    #[must_use]
    pub fn fail_with_output(error: ErrorInfo, output: serde_json::Value) -> Self {
        Self {
            success: false,
            output,
            retryable: error.is_retryable(),
            error: Some(error),
        }
    }

    /// Returns the error, synthesizing one if a failure came without it.
    #[must_use]
    pub fn error_or_default(&self) -> ErrorInfo {
        self.error
            .clone()
            .unwrap_or_else(|| ErrorInfo::permanent("stage reported failure without an error"))
    }
}
