//! Durable record store.
//!
//! The engines depend only on [`RunStore`]. [`InMemoryRunStore`] backs tests
//! and single-process deployments; a relational implementation lives outside
//! this crate.

mod memory;

pub use memory::InMemoryRunStore;

use crate::chain::PipelineDefinition;
use crate::core::{ChainRun, NodeExecution, PipelineRun, RunStatus, StageExecution};
use crate::errors::StoreError;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for runs, execution rows and chain definitions.
///
/// Implementations must enforce uniqueness of `run_id` on insert and of
/// `(run_id, stage, attempt)` / `(run_id, node_id, attempt)` on execution
/// rows. Rows are upserted by their `id`, so recording a row a second time
/// finalizes it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts a new run. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Inserts a new run unless its trace is already bound to a non-terminal
    /// run with a different `alert_fingerprint`, failing with
    /// [`StoreError::TraceConflict`] in that case.
    ///
    /// The check and the insert must be atomic against other inserts on the
    /// same trace. A relational store should lock the trace (an advisory
    /// lock or `SELECT ... FOR UPDATE` on a trace row) inside the insert
    /// transaction; a plain read followed by a write is not enough.
    async fn insert_run_on_trace(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Persists the current state of an existing run.
    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Loads a run by id.
    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError>;

    /// Returns runs currently in `status`, oldest first.
    async fn find_by_status(&self, status: RunStatus) -> Result<Vec<PipelineRun>, StoreError>;

    /// Returns every run sharing `trace_id`, oldest first.
    async fn find_by_trace(&self, trace_id: &str) -> Result<Vec<PipelineRun>, StoreError>;

    /// Inserts or finalizes a stage execution row.
    async fn record_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError>;

    /// Returns a run's stage rows ordered by stage, then attempt.
    async fn list_stage_executions(&self, run_id: Uuid) -> Result<Vec<StageExecution>, StoreError>;

    /// Stores a definition version, replacing the same `(name, version)`.
    async fn save_definition(&self, definition: &PipelineDefinition) -> Result<(), StoreError>;

    /// Loads a definition. Without `version`, returns the highest active one.
    async fn load_definition(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> Result<Option<PipelineDefinition>, StoreError>;

    /// Inserts or updates a chain run.
    async fn save_chain_run(&self, run: &ChainRun) -> Result<(), StoreError>;

    /// Loads a chain run by id.
    async fn load_chain_run(&self, run_id: Uuid) -> Result<Option<ChainRun>, StoreError>;

    /// Inserts or finalizes a node execution row.
    async fn record_node_execution(&self, execution: &NodeExecution) -> Result<(), StoreError>;

    /// Returns a chain run's node rows in execution order.
    async fn list_node_executions(&self, run_id: Uuid) -> Result<Vec<NodeExecution>, StoreError>;
}
