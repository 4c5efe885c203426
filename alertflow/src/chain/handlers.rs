//! Node handler contract, the string-keyed handler registry and the
//! built-in transform handler.

use super::NodeContext;
use crate::errors::{AlertflowError, ErrorInfo};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

/// Outcome of one node attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Handler output. Kept in `previous_outputs` even on failure.
    pub output: serde_json::Value,
    /// Classified failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl NodeResult {
    /// A successful result.
    #[must_use]
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// A failed result with no output.
    #[must_use]
    pub fn fail(error: ErrorInfo) -> Self {
        Self::fail_with_output(error, serde_json::Value::Null)
    }

    /// A failed result that carries diagnostic output.
    #[must_use]
    pub fn fail_with_output(error: ErrorInfo, output: serde_json::Value) -> Self {
        Self {
            success: false,
            output,
            error: Some(error),
        }
    }

    /// Returns the error, synthesizing one if a failure came without it.
    #[must_use]
    pub fn error_or_default(&self) -> ErrorInfo {
        self.error
            .clone()
            .unwrap_or_else(|| ErrorInfo::permanent("node reported failure without an error"))
    }
}

/// Trait for node-type handlers.
///
/// Handlers classify their own failures. Partial failures (some channels or
/// signals failed) belong in the output of a successful result.
#[async_trait]
pub trait NodeHandler: Send + Sync + Debug {
    /// Handles one node attempt.
    async fn handle(&self, config: &serde_json::Value, ctx: &NodeContext) -> NodeResult;
}

/// Registry of node handlers keyed by node type.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn NodeHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `transform` handler.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(TransformHandler::NODE_TYPE, Arc::new(TransformHandler));
        registry
    }

    /// Registers a handler, replacing any previous one for `node_type`.
    pub fn register(&self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.write().insert(node_type.into(), handler);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) -> Self {
        self.register(node_type, handler);
        self
    }

    /// Resolves the handler for `node_type`.
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeHandler>, AlertflowError> {
        self.handlers.read().get(node_type).cloned().ok_or_else(|| {
            AlertflowError::Permanent(format!("no handler registered for node type '{node_type}'"))
        })
    }

    /// Returns true if `node_type` has a handler.
    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.read().contains_key(node_type)
    }

    /// Lists registered node types.
    #[must_use]
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

static PATH_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^.\[\]]+)|\[(\d+)\]").unwrap_or_else(|_| unreachable!())
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<Segment>, ErrorInfo> {
    let mut segments = Vec::new();
    let mut consumed = 0;
    for caps in PATH_SEGMENT.captures_iter(path) {
        let Some(whole) = caps.get(0) else { continue };
        let gap = &path[consumed..whole.start()];
        if !(gap.is_empty() || gap == ".") {
            return Err(ErrorInfo::validation(format!("malformed path '{path}'")));
        }
        consumed = whole.end();
        if let Some(key) = caps.get(1) {
            segments.push(Segment::Key(key.as_str().to_string()));
        } else if let Some(index) = caps.get(2) {
            let index = index
                .as_str()
                .parse()
                .map_err(|_| ErrorInfo::validation(format!("bad index in path '{path}'")))?;
            segments.push(Segment::Index(index));
        }
    }
    if consumed != path.len() || segments.is_empty() {
        return Err(ErrorInfo::validation(format!("malformed path '{path}'")));
    }
    Ok(segments)
}

fn extract<'a>(value: &'a serde_json::Value, segments: &[Segment]) -> Option<&'a serde_json::Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        Segment::Key(key) => current.get(key.as_str()),
        Segment::Index(index) => current.get(*index),
    })
}

#[derive(Debug, Deserialize)]
struct TransformConfig {
    source: String,
    path: String,
    #[serde(rename = "as")]
    alias: Option<String>,
}

/// Derives data from an earlier node's output.
///
/// Config: `{"source": "<node id>", "path": "a.b[0].c", "as": "<key>"}`.
/// Without `as` the extracted value is the output; with it the output is
/// `{"<key>": value}`. A missing source node or path is a validation failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformHandler;

impl TransformHandler {
    /// Registry key of the built-in handler.
    pub const NODE_TYPE: &'static str = "transform";
}

#[async_trait]
impl NodeHandler for TransformHandler {
    async fn handle(&self, config: &serde_json::Value, ctx: &NodeContext) -> NodeResult {
        let config: TransformConfig = match serde_json::from_value(config.clone()) {
            Ok(config) => config,
            Err(err) => {
                return NodeResult::fail(ErrorInfo::validation(format!(
                    "invalid transform config: {err}"
                )))
            }
        };

        let Some(source) = ctx.output(&config.source) else {
            return NodeResult::fail(
                ErrorInfo::validation(format!("source node '{}' has no output", config.source))
                    .with_code("MISSING_SOURCE"),
            );
        };

        let segments = match parse_path(&config.path) {
            Ok(segments) => segments,
            Err(err) => return NodeResult::fail(err),
        };

        let Some(value) = extract(source, &segments) else {
            return NodeResult::fail(
                ErrorInfo::validation(format!(
                    "path '{}' not found in output of '{}'",
                    config.path, config.source
                ))
                .with_code("MISSING_PATH"),
            );
        };

        match config.alias {
            Some(alias) => {
                let mut output = serde_json::Map::new();
                output.insert(alias, value.clone());
                NodeResult::ok(serde_json::Value::Object(output))
            }
            None => NodeResult::ok(value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx_with(node: &str, output: serde_json::Value) -> NodeContext {
        let mut ctx = NodeContext::new(Uuid::new_v4(), "t", "cli", "dev", json!({}));
        ctx.record_output(node, output);
        ctx
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("a.b[0].c").unwrap(),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(0),
                Segment::Key("c".into()),
            ]
        );
        assert_eq!(parse_path("[2]").unwrap(), vec![Segment::Index(2)]);
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
    }

    #[tokio::test]
    async fn test_transform_extracts_path() {
        let ctx = ctx_with("ctx", json!({"signals": [{"name": "cpu", "value": 97}]}));
        let result = TransformHandler
            .handle(&json!({"source": "ctx", "path": "signals[0].value"}), &ctx)
            .await;

        assert!(result.success);
        assert_eq!(result.output, json!(97));
    }

    #[tokio::test]
    async fn test_transform_alias() {
        let ctx = ctx_with("ctx", json!({"host": {"name": "web-1"}}));
        let result = TransformHandler
            .handle(&json!({"source": "ctx", "path": "host.name", "as": "hostname"}), &ctx)
            .await;

        assert_eq!(result.output, json!({"hostname": "web-1"}));
    }

    #[tokio::test]
    async fn test_transform_missing_source_is_validation() {
        let ctx = ctx_with("ctx", json!({}));
        let result = TransformHandler
            .handle(&json!({"source": "nope", "path": "a"}), &ctx)
            .await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        assert_eq!(error.code.as_deref(), Some("MISSING_SOURCE"));
    }

    #[tokio::test]
    async fn test_transform_missing_path_is_validation() {
        let ctx = ctx_with("ctx", json!({"a": [1]}));
        let result = TransformHandler
            .handle(&json!({"source": "ctx", "path": "a[3]"}), &ctx)
            .await;

        assert_eq!(result.error.unwrap().code.as_deref(), Some("MISSING_PATH"));
    }

    #[tokio::test]
    async fn test_transform_bad_config() {
        let ctx = ctx_with("ctx", json!({}));
        let result = TransformHandler.handle(&json!({"path": "a"}), &ctx).await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::Validation);
    }

    #[test]
    fn test_registry_unknown_type_is_permanent() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.contains("transform"));
        assert_eq!(registry.node_types(), vec!["transform".to_string()]);

        let err = registry.resolve("quantum").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }
}
