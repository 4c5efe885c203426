//! Stored node-chain definitions and their validation.

use crate::errors::{AlertflowError, DefinitionSuggestions, DefinitionValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

fn default_required() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

/// One node of a chain definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id within the definition.
    pub id: String,
    /// Handler key (`ingest`, `context`, `intelligence`, `notify`, `transform`, ...).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Handler-specific configuration. `max_retries` and `timeout_ms` are
    /// also read by the engine.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Id of the node that runs after this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Whether a failure stops the chain.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl NodeSpec {
    /// Creates a required node with empty config.
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: serde_json::Value::Null,
            next: None,
            required: true,
        }
    }

    /// Sets the handler config.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Sets the next node.
    #[must_use]
    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Marks the node as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Reads an unsigned integer from the node config.
    #[must_use]
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(serde_json::Value::as_u64)
    }
}

/// A named, versioned node chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Definition name.
    pub name: String,
    /// Version number.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Nodes in stored order; the first one is the entry point.
    pub nodes: Vec<NodeSpec>,
    /// Inactive definitions are kept for history but never executed.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl PipelineDefinition {
    /// Creates an empty active definition.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            nodes: Vec::new(),
            is_active: true,
        }
    }

    /// Parses a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self, AlertflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    /// Marks the definition inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Returns the node with `id`.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Validates the definition and returns its nodes in execution order.
    ///
    /// Accepts exactly the definitions whose `next` links form one linked
    /// list starting at the first stored node and covering every node.
    pub fn validate(&self) -> Result<Vec<&NodeSpec>, DefinitionValidationError> {
        let Some(entry) = self.nodes.first() else {
            return Err(DefinitionValidationError::new(
                DefinitionSuggestions::EMPTY,
                format!("definition '{}' has no nodes", self.name),
            ));
        };

        let mut by_id: HashMap<&str, &NodeSpec> = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if by_id.insert(node.id.as_str(), node).is_some() {
                return Err(DefinitionValidationError::new(
                    DefinitionSuggestions::DUPLICATE_ID,
                    format!("node id '{}' is declared more than once", node.id),
                )
                .with_nodes(vec![node.id.clone()]));
            }
        }

        let mut targeted_by: HashMap<&str, &str> = HashMap::new();
        for node in &self.nodes {
            let Some(next) = node.next.as_deref() else {
                continue;
            };
            if !by_id.contains_key(next) {
                return Err(DefinitionValidationError::new(
                    DefinitionSuggestions::UNRESOLVED_NEXT,
                    format!("node '{}' points to unknown node '{next}'", node.id),
                )
                .with_nodes(vec![node.id.clone(), next.to_string()]));
            }
            if let Some(previous) = targeted_by.insert(next, node.id.as_str()) {
                return Err(DefinitionValidationError::new(
                    DefinitionSuggestions::SHARED_TARGET,
                    format!("nodes '{previous}' and '{}' both point to '{next}'", node.id),
                )
                .with_nodes(vec![previous.to_string(), node.id.clone(), next.to_string()]));
            }
        }

        if let Some(source) = targeted_by.get(entry.id.as_str()) {
            return Err(DefinitionValidationError::new(
                DefinitionSuggestions::CYCLE,
                format!("node '{source}' points back to entry node '{}'", entry.id),
            )
            .with_nodes(vec![(*source).to_string(), entry.id.clone()]));
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut current = Some(entry);
        while let Some(node) = current {
            if !visited.insert(node.id.as_str()) {
                return Err(DefinitionValidationError::new(
                    DefinitionSuggestions::CYCLE,
                    format!("chain revisits node '{}'", node.id),
                )
                .with_nodes(order.iter().map(|n: &&NodeSpec| n.id.clone()).collect()));
            }
            order.push(node);
            current = node.next.as_deref().and_then(|id| by_id.get(id).copied());
        }

        if order.len() != self.nodes.len() {
            let unreachable: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| !visited.contains(n.id.as_str()))
                .map(|n| n.id.clone())
                .collect();
            return Err(DefinitionValidationError::new(
                DefinitionSuggestions::UNREACHABLE,
                format!(
                    "nodes not reachable from entry '{}': {}",
                    entry.id,
                    unreachable.join(", ")
                ),
            )
            .with_nodes(unreachable));
        }

        Ok(order)
    }
}
