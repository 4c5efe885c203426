//! In-memory [`RunStore`].

use super::RunStore;
use crate::chain::PipelineDefinition;
use crate::core::{ChainRun, NodeExecution, PipelineRun, RunStatus, StageExecution};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Thread-safe in-memory store.
///
/// Rows are scoped per run, so each run's executions live under their own
/// map entry and writes to different runs never contend. Trace-bound
/// inserts serialize on a per-trace entry.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: DashMap<Uuid, PipelineRun>,
    trace_locks: DashMap<String, ()>,
    stage_executions: DashMap<Uuid, Vec<StageExecution>>,
    definitions: RwLock<HashMap<String, BTreeMap<u32, PipelineDefinition>>>,
    chain_runs: DashMap<Uuid, ChainRun>,
    node_executions: DashMap<Uuid, Vec<NodeExecution>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pipeline runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Returns the number of chain runs.
    #[must_use]
    pub fn chain_run_count(&self) -> usize {
        self.chain_runs.len()
    }

    fn insert_new(&self, run: &PipelineRun) -> Result<(), StoreError> {
        match self.runs.entry(run.run_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::Duplicate(format!("run {}", run.run_id)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.insert_new(run)
    }

    async fn insert_run_on_trace(&self, run: &PipelineRun) -> Result<(), StoreError> {
        // Held until the insert lands so two inserts on one trace cannot both pass the check.
        let _trace = self.trace_locks.entry(run.trace_id.clone()).or_default();
        let conflict = self
            .runs
            .iter()
            .find(|r| {
                r.trace_id == run.trace_id
                    && !r.is_terminal()
                    && r.alert_fingerprint != run.alert_fingerprint
            })
            .map(|r| r.run_id);
        if let Some(bound) = conflict {
            return Err(StoreError::TraceConflict(format!(
                "trace {} is bound to in-flight run {bound} with a different source/payload",
                run.trace_id
            )));
        }
        self.insert_new(run)
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let mut stored = self
            .runs
            .get_mut(&run.run_id)
            .ok_or_else(|| StoreError::Constraint(format!("run {} was never inserted", run.run_id)))?;
        if stored.is_terminal() && stored.status != run.status {
            return Err(StoreError::Constraint(format!(
                "run {} is terminal ({})",
                run.run_id, stored.status
            )));
        }
        *stored = run.clone();
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }

    async fn find_by_status(&self, status: RunStatus) -> Result<Vec<PipelineRun>, StoreError> {
        let mut runs: Vec<PipelineRun> = self
            .runs
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.clone())
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn find_by_trace(&self, trace_id: &str) -> Result<Vec<PipelineRun>, StoreError> {
        let mut runs: Vec<PipelineRun> = self
            .runs
            .iter()
            .filter(|r| r.trace_id == trace_id)
            .map(|r| r.clone())
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn record_stage_execution(&self, execution: &StageExecution) -> Result<(), StoreError> {
        if !self.runs.contains_key(&execution.run_id) {
            return Err(StoreError::Constraint(format!(
                "stage row for unknown run {}",
                execution.run_id
            )));
        }
        let mut rows = self.stage_executions.entry(execution.run_id).or_default();

        if let Some(existing) = rows.iter_mut().find(|r| r.id == execution.id) {
            *existing = execution.clone();
            return Ok(());
        }

        let same_stage = rows.iter().filter(|r| r.stage == execution.stage);
        let mut highest = 0;
        for row in same_stage {
            if row.attempt == execution.attempt {
                return Err(StoreError::Duplicate(format!(
                    "stage row ({}, {}, {})",
                    execution.run_id, execution.stage, execution.attempt
                )));
            }
            highest = highest.max(row.attempt);
        }
        if execution.attempt <= highest {
            return Err(StoreError::Constraint(format!(
                "attempt {} of {} is not above {highest}",
                execution.attempt, execution.stage
            )));
        }

        rows.push(execution.clone());
        Ok(())
    }

    async fn list_stage_executions(&self, run_id: Uuid) -> Result<Vec<StageExecution>, StoreError> {
        let mut rows = self
            .stage_executions
            .get(&run_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        rows.sort_by_key(|r| (r.stage, r.attempt));
        Ok(rows)
    }

    async fn save_definition(&self, definition: &PipelineDefinition) -> Result<(), StoreError> {
        self.definitions
            .write()
            .entry(definition.name.clone())
            .or_default()
            .insert(definition.version, definition.clone());
        Ok(())
    }

    async fn load_definition(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> Result<Option<PipelineDefinition>, StoreError> {
        let definitions = self.definitions.read();
        let Some(versions) = definitions.get(name) else {
            return Ok(None);
        };
        let found = match version {
            Some(version) => versions.get(&version),
            None => versions.values().rev().find(|d| d.is_active),
        };
        Ok(found.cloned())
    }

    async fn save_chain_run(&self, run: &ChainRun) -> Result<(), StoreError> {
        self.chain_runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_chain_run(&self, run_id: Uuid) -> Result<Option<ChainRun>, StoreError> {
        Ok(self.chain_runs.get(&run_id).map(|r| r.clone()))
    }

    async fn record_node_execution(&self, execution: &NodeExecution) -> Result<(), StoreError> {
        let mut rows = self.node_executions.entry(execution.run_id).or_default();

        if let Some(existing) = rows.iter_mut().find(|r| r.id == execution.id) {
            *existing = execution.clone();
            return Ok(());
        }
        if rows
            .iter()
            .any(|r| r.node_id == execution.node_id && r.attempt >= execution.attempt)
        {
            return Err(StoreError::Duplicate(format!(
                "node row ({}, {}, {})",
                execution.run_id, execution.node_id, execution.attempt
            )));
        }

        rows.push(execution.clone());
        Ok(())
    }

    async fn list_node_executions(&self, run_id: Uuid) -> Result<Vec<NodeExecution>, StoreError> {
        Ok(self
            .node_executions
            .get(&run_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NodeSpec;
    use crate::core::{ExecutionStatus, StageName};
    use crate::errors::ErrorInfo;
    use serde_json::json;

    fn run(trace: &str) -> PipelineRun {
        PipelineRun::new(trace, "grafana", "prod", json!({"name": "HighCPU"}))
    }

    #[tokio::test]
    async fn test_insert_is_unique() {
        let store = InMemoryRunStore::new();
        let run = run("t");
        store.insert_run(&run).await.unwrap();

        let err = store.insert_run(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.run_count(), 1);
    }

    fn fingerprinted(trace: &str, fingerprint: &str) -> PipelineRun {
        let mut run = run(trace);
        run.alert_fingerprint = Some(fingerprint.to_string());
        run
    }

    #[tokio::test]
    async fn test_trace_insert_rejects_other_event_while_in_flight() {
        let store = InMemoryRunStore::new();
        let mut first = fingerprinted("t", "aaa");
        let mut second = fingerprinted("t", "aaa");
        store.insert_run_on_trace(&first).await.unwrap();
        store.insert_run_on_trace(&second).await.unwrap();

        let err = store.insert_run_on_trace(&fingerprinted("t", "bbb")).await.unwrap_err();
        assert!(matches!(err, StoreError::TraceConflict(_)));
        store.insert_run_on_trace(&fingerprinted("u", "bbb")).await.unwrap();

        first.fail(ErrorInfo::permanent("boom")).unwrap();
        store.save_run(&first).await.unwrap();
        second.fail(ErrorInfo::permanent("boom")).unwrap();
        store.save_run(&second).await.unwrap();
        store.insert_run_on_trace(&fingerprinted("t", "bbb")).await.unwrap();
        assert_eq!(store.run_count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_trace_inserts_admit_one_event() {
        let store = std::sync::Arc::new(InMemoryRunStore::new());
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_run_on_trace(&fingerprinted("contested", &format!("fp-{i}")))
                        .await
                })
            })
            .collect();

        let mut admitted = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => admitted += 1,
                Err(StoreError::TraceConflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(store.find_by_trace("contested").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_query() {
        let store = InMemoryRunStore::new();
        let mut first = run("shared");
        let second = run("shared");
        store.insert_run(&first).await.unwrap();
        store.insert_run(&second).await.unwrap();
        store.insert_run(&run("other")).await.unwrap();

        first.fail(ErrorInfo::permanent("boom")).unwrap();
        store.save_run(&first).await.unwrap();

        assert_eq!(store.find_by_trace("shared").await.unwrap().len(), 2);
        let failed = store.find_by_status(RunStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].run_id, first.run_id);
        assert_eq!(
            store.load_run(first.run_id).await.unwrap().unwrap().status,
            RunStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_terminal_run_cannot_be_rewritten() {
        let store = InMemoryRunStore::new();
        let mut run = run("t");
        store.insert_run(&run).await.unwrap();
        run.fail(ErrorInfo::permanent("boom")).unwrap();
        store.save_run(&run).await.unwrap();

        let mut tampered = run.clone();
        tampered.status = RunStatus::Notified;
        assert!(store.save_run(&tampered).await.is_err());
    }

    #[tokio::test]
    async fn test_stage_rows_unique_and_monotonic() {
        let store = InMemoryRunStore::new();
        let run = run("t");
        store.insert_run(&run).await.unwrap();

        let mut first = StageExecution::start(run.run_id, StageName::Check, 1, "k", "payload");
        store.record_stage_execution(&first).await.unwrap();
        first.finish(ExecutionStatus::Failed, None, Some(ErrorInfo::transient("503")));
        store.record_stage_execution(&first).await.unwrap();

        let clash = StageExecution::start(run.run_id, StageName::Check, 1, "k", "payload");
        assert!(matches!(
            store.record_stage_execution(&clash).await,
            Err(StoreError::Duplicate(_))
        ));

        let second = StageExecution::start(run.run_id, StageName::Check, 2, "k", "payload");
        store.record_stage_execution(&second).await.unwrap();

        let ingest = StageExecution::start(run.run_id, StageName::Ingest, 1, "k0", "payload");
        store.record_stage_execution(&ingest).await.unwrap();

        let rows = store.list_stage_executions(run.run_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].stage, StageName::Ingest);
        assert_eq!(rows[1].status, ExecutionStatus::Failed);
        assert_eq!(rows[2].attempt, 2);
    }

    #[tokio::test]
    async fn test_stage_row_for_unknown_run() {
        let store = InMemoryRunStore::new();
        let row = StageExecution::start(Uuid::new_v4(), StageName::Ingest, 1, "k", "payload");
        assert!(store.record_stage_execution(&row).await.is_err());
    }

    #[tokio::test]
    async fn test_definition_versions() {
        let store = InMemoryRunStore::new();
        let v1 = PipelineDefinition::new("default", 1).with_node(NodeSpec::new("a", "ingest"));
        let v2 = PipelineDefinition::new("default", 2).with_node(NodeSpec::new("a", "context"));
        let v3 = PipelineDefinition::new("default", 3)
            .with_node(NodeSpec::new("a", "notify"))
            .inactive();
        for def in [&v1, &v2, &v3] {
            store.save_definition(def).await.unwrap();
        }

        assert_eq!(store.load_definition("default", None).await.unwrap(), Some(v2));
        assert_eq!(store.load_definition("default", Some(3)).await.unwrap(), Some(v3));
        assert!(store.load_definition("missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_node_rows() {
        let store = InMemoryRunStore::new();
        let chain = ChainRun::new("t", "default", 1, "cli", "dev");
        store.save_chain_run(&chain).await.unwrap();

        let a = NodeExecution::start(chain.run_id, "a", "context", true, 1, "k");
        store.record_node_execution(&a).await.unwrap();
        let a_again = NodeExecution::start(chain.run_id, "a", "context", true, 1, "k");
        assert!(store.record_node_execution(&a_again).await.is_err());
        let b = NodeExecution::start(chain.run_id, "b", "notify", true, 1, "k2");
        store.record_node_execution(&b).await.unwrap();

        let rows = store.list_node_executions(chain.run_id).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.node_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(store.chain_run_count(), 1);
        assert!(store.load_chain_run(chain.run_id).await.unwrap().is_some());
    }
}
