//! # Alertflow
//!
//! Pipeline orchestration for monitoring events.
//!
//! An inbound alert or scheduled check becomes a tracked run that moves
//! through a fixed sequence of stages, with:
//!
//! - **Run registry**: trace/run identity, fingerprints and persistence
//! - **Fixed-stage orchestration**: ingest, check, analyze and notify with
//!   per-stage retry, timeouts and an intelligence fallback
//! - **Resume**: continue a failed run from its first unsettled stage
//! - **Definition chains**: linear node chains loaded from stored definitions
//! - **Monitoring signals**: lifecycle events delivered to a pluggable sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use alertflow::prelude::*;
//!
//! let store = Arc::new(InMemoryRunStore::new());
//! let stages = StageSet::new()
//!     .with(Arc::new(IngestExecutor::new()))
//!     .with(Arc::new(CheckExecutor::new()))
//!     .with(Arc::new(AnalyzeExecutor::new()))
//!     .with(Arc::new(NotifyExecutor::new()));
//! let orchestrator = Orchestrator::new(store, stages, SignalEmitter::new(Arc::new(LoggingEventSink::default())));
//!
//! let run = orchestrator
//!     .run_pipeline(RunRequest::new(json!({"name": "HighCPU"}), "grafana"))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod chain;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::chain::{
        ChainEngine, ChainOutcome, HandlerRegistry, NodeContext, NodeHandler, NodeResult,
        NodeSpec, PipelineDefinition,
    };
    pub use crate::config::{ChainConfig, OrchestratorConfig, StageSettings};
    pub use crate::core::{
        ChainRun, ChainStatus, ExecutionStatus, NodeExecution, PipelineRun, RunRequest,
        RunStatus, StageExecution, StageName,
    };
    pub use crate::errors::{AlertflowError, ErrorInfo, ErrorKind, StoreError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, Signal, SignalEmitter,
    };
    pub use crate::pipeline::{
        IdempotencyStore, InMemoryIdempotencyStore, Orchestrator, RetryPolicy, TaskQueue,
    };
    pub use crate::stages::{StageContext, StageExecutor, StageResult, StageSet};
    pub use crate::store::{InMemoryRunStore, RunStore};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
