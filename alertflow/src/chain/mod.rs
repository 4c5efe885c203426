//! Definition-based node chains.
//!
//! A [`PipelineDefinition`] is a stored, versioned linked list of typed
//! nodes. The [`ChainEngine`] validates it, then walks it from the first
//! node, handing each node's handler a [`NodeContext`] that carries every
//! earlier node's output.

mod context;
mod definition;
mod engine;
mod handlers;

pub use context::NodeContext;
pub use definition::{NodeSpec, PipelineDefinition};
pub use engine::{ChainEngine, ChainOutcome};
pub use handlers::{HandlerRegistry, NodeHandler, NodeResult, TransformHandler};
