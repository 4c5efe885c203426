//! Error types for the alertflow orchestration core.
//!
//! Two layers live here. [`ErrorInfo`] is the classification a stage or node
//! reports about its own failure; the orchestrator only applies retry and
//! fallback policy on top of it. [`AlertflowError`] is what the public
//! operations return when the orchestration itself cannot proceed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Failure taxonomy shared by stages, nodes and the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed payload or definition. Never retried.
    Validation,
    /// Timeouts, upstream 5xx, connection resets. Retryable.
    Transient,
    /// Unknown driver or provider, disabled feature. Never retried.
    Permanent,
}

impl ErrorKind {
    /// Returns true if errors of this kind may be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// A classified error reported by a stage executor or node handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Taxonomy bucket.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
    /// Optional machine readable code (e.g. `TIMEOUT`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Additional diagnostic details.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: HashMap::new(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates a transient (retryable) error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    /// Creates the transient error recorded when a stage or node times out.
    #[must_use]
    pub fn timeout(target: &str, timeout_ms: u64) -> Self {
        Self::transient(format!("{target} timed out after {timeout_ms}ms")).with_code("TIMEOUT")
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Adds a single detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Returns true if the error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(ref code) => write!(f, "{} error [{}]: {}", self.kind, code, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

/// The main error type for alertflow operations.
#[derive(Debug, Error)]
pub enum AlertflowError {
    /// Malformed input to an orchestration operation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A pipeline definition failed validation.
    #[error("{0}")]
    Definition(#[from] DefinitionValidationError),

    /// A run cannot be resumed.
    #[error("{0}")]
    NotResumable(#[from] NotResumableError),

    /// A record was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind (run, definition, ...).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The durable store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A disabled feature or unknown driver was requested explicitly.
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// A run status transition violated the state machine.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AlertflowError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Maps the error onto the failure taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Definition(_) | Self::Serialization(_) => {
                ErrorKind::Validation
            }
            Self::Store(err) if err.is_transient() => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    /// Converts to the classified form recorded on runs.
    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

impl From<serde_json::Error> for AlertflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when a pipeline definition is structurally invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid pipeline definition [{code}]: {message}")]
pub struct DefinitionValidationError {
    /// Stable error code (e.g. `DEF-004-CYCLE`).
    pub code: &'static str,
    /// The error message.
    pub message: String,
    /// Node ids involved in the error.
    pub nodes: Vec<String>,
}

impl DefinitionValidationError {
    /// Creates a new definition validation error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            nodes: Vec::new(),
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Returns the fix hint for this error, if one is known.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&'static str> {
        DefinitionSuggestions::get(self.code)
    }
}

/// Provides fix hints for definition validation codes.
pub struct DefinitionSuggestions;

impl DefinitionSuggestions {
    /// Empty definition.
    pub const EMPTY: &'static str = "DEF-001-EMPTY";
    /// Two nodes share an id.
    pub const DUPLICATE_ID: &'static str = "DEF-002-DUPLICATE_ID";
    /// A `next` points at a missing node.
    pub const UNRESOLVED_NEXT: &'static str = "DEF-003-UNRESOLVED_NEXT";
    /// The chain loops back on itself.
    pub const CYCLE: &'static str = "DEF-004-CYCLE";
    /// A node cannot be reached from the entry node.
    pub const UNREACHABLE: &'static str = "DEF-005-UNREACHABLE";
    /// Two nodes point at the same `next`.
    pub const SHARED_TARGET: &'static str = "DEF-006-SHARED_TARGET";

    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            Self::EMPTY => Some("Add at least one node to the definition."),
            Self::DUPLICATE_ID => Some("Give every node a unique id."),
            Self::UNRESOLVED_NEXT => Some(
                "Check `next` for typos; it must name a node declared in the same definition.",
            ),
            Self::CYCLE => Some(
                "Definitions are linear chains. Remove the `next` that points back to an earlier node.",
            ),
            Self::UNREACHABLE => Some(
                "Every node must be reachable from the first node through `next` links.",
            ),
            Self::SHARED_TARGET => Some(
                "Fan-in is not supported; each node may be the `next` of at most one node.",
            ),
            _ => None,
        }
    }
}

/// Error raised when a run cannot be resumed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Run {run_id} is not resumable: {reason}")]
pub struct NotResumableError {
    /// The run that was asked to resume.
    pub run_id: String,
    /// Why it cannot be resumed.
    pub reason: String,
}

impl NotResumableError {
    /// Creates a new not-resumable error.
    #[must_use]
    pub fn new(run_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a durable run store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A constraint on record contents was violated.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// The trace is bound to an in-flight run for a different event.
    #[error("Trace conflict: {0}")]
    TraceConflict(String),

    /// The backend is temporarily unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::Permanent.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }

    #[test]
    fn test_error_info_builders() {
        let info = ErrorInfo::permanent("unknown provider 'gpt-x'")
            .with_code("UNKNOWN_PROVIDER")
            .with_detail("provider", serde_json::json!("gpt-x"));

        assert_eq!(info.kind, ErrorKind::Permanent);
        assert_eq!(info.code.as_deref(), Some("UNKNOWN_PROVIDER"));
        assert_eq!(info.details["provider"], "gpt-x");
        assert!(!info.is_retryable());
        assert_eq!(
            info.to_string(),
            "permanent error [UNKNOWN_PROVIDER]: unknown provider 'gpt-x'"
        );
    }

    #[test]
    fn test_timeout_is_transient() {
        let info = ErrorInfo::timeout("stage check", 250);
        assert!(info.is_retryable());
        assert_eq!(info.code.as_deref(), Some("TIMEOUT"));
        assert!(info.message.contains("250ms"));
    }

    #[test]
    fn test_error_info_serialization() {
        let info = ErrorInfo::transient("upstream 503");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "transient", "message": "upstream 503"}));
    }

    #[test]
    fn test_alertflow_error_kind() {
        assert_eq!(
            AlertflowError::Validation("bad".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AlertflowError::Store(StoreError::Unavailable("db down".into())).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            AlertflowError::Store(StoreError::Duplicate("run".into())).kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            AlertflowError::not_found("run", "abc").to_string(),
            "run not found: abc"
        );
    }

    #[test]
    fn test_definition_error_hint() {
        let err = DefinitionValidationError::new(DefinitionSuggestions::CYCLE, "a -> b -> a")
            .with_nodes(vec!["a".into(), "b".into()]);

        assert!(err.to_string().contains("DEF-004-CYCLE"));
        assert!(err.fix_hint().is_some());
        assert!(DefinitionSuggestions::get("UNKNOWN").is_none());
    }

    #[test]
    fn test_not_resumable_display() {
        let err = NotResumableError::new("run-1", "status is notified");
        assert_eq!(err.to_string(), "Run run-1 is not resumable: status is notified");
    }
}
