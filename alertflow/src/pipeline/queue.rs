//! Task-queue port for asynchronous pipeline execution.

use super::Orchestrator;
use crate::core::{PipelineRun, RunRequest};
use crate::errors::AlertflowError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

enum HandleState {
    Ready(Result<PipelineRun, AlertflowError>),
    Spawned(JoinHandle<Result<PipelineRun, AlertflowError>>),
}

/// Handle to a submitted run.
pub struct TaskHandle {
    task_id: Uuid,
    state: HandleState,
}

impl TaskHandle {
    fn ready(result: Result<PipelineRun, AlertflowError>) -> Self {
        Self {
            task_id: crate::utils::generate_uuid(),
            state: HandleState::Ready(result),
        }
    }

    fn spawned(handle: JoinHandle<Result<PipelineRun, AlertflowError>>) -> Self {
        Self {
            task_id: crate::utils::generate_uuid(),
            state: HandleState::Spawned(handle),
        }
    }

    /// Returns the task id.
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Returns true once the run reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Ready(_) => true,
            HandleState::Spawned(handle) => handle.is_finished(),
        }
    }

    /// Waits for the run to finish.
    pub async fn wait(self) -> Result<PipelineRun, AlertflowError> {
        match self.state {
            HandleState::Ready(result) => result,
            HandleState::Spawned(handle) => handle.await.map_err(|err| {
                AlertflowError::Internal(format!("task {} did not complete: {err}", self.task_id))
            })?,
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Port for queueing a pipeline run.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submits a run and returns a handle to its outcome.
    async fn submit(&self, request: RunRequest) -> TaskHandle;
}

/// Runs the pipeline in the caller's task before returning.
#[derive(Debug, Clone)]
pub struct InlineTaskQueue {
    orchestrator: Arc<Orchestrator>,
}

impl InlineTaskQueue {
    /// Creates an inline queue.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl TaskQueue for InlineTaskQueue {
    async fn submit(&self, request: RunRequest) -> TaskHandle {
        TaskHandle::ready(self.orchestrator.run_pipeline(request).await)
    }
}

/// Spawns each run on the tokio runtime, bounding how many run at once.
#[derive(Debug, Clone)]
pub struct TokioTaskQueue {
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
}

impl TokioTaskQueue {
    /// Creates a queue running at most `max_concurrent` pipelines.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Returns the number of free execution slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn submit(&self, request: RunRequest) -> TaskHandle {
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();
        TaskHandle::spawned(tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| AlertflowError::Internal("task queue closed".to_string()))?;
            orchestrator.run_pipeline(request).await
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::events::SignalEmitter;
    use crate::store::{InMemoryRunStore, RunStore};
    use crate::testing::fixtures;

    fn orchestrator() -> (Arc<Orchestrator>, Arc<InMemoryRunStore>) {
        let store = Arc::new(InMemoryRunStore::new());
        let orchestrator = Orchestrator::new(store.clone(), fixtures::happy_stages(), SignalEmitter::noop());
        (Arc::new(orchestrator), store)
    }

    #[tokio::test]
    async fn test_inline_queue_completes_before_returning() {
        let (orchestrator, _) = orchestrator();
        let queue = InlineTaskQueue::new(orchestrator);

        let handle = queue.submit(fixtures::alert_request()).await;
        assert!(handle.is_finished());
        assert_eq!(handle.wait().await.unwrap().status, RunStatus::Notified);
    }

    #[tokio::test]
    async fn test_tokio_queue_runs_concurrently_and_independently() {
        let (orchestrator, store) = orchestrator();
        let queue = TokioTaskQueue::new(orchestrator, 2);

        let mut handles = Vec::new();
        for _ in 0..5 {
            handles.push(queue.submit(fixtures::alert_request()).await);
        }
        let runs: Vec<PipelineRun> = futures::future::join_all(handles.into_iter().map(TaskHandle::wait))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert!(runs.iter().all(|r| r.status == RunStatus::Notified));
        assert_eq!(store.run_count(), 5);
        for run in &runs {
            assert_eq!(store.list_stage_executions(run.run_id).await.unwrap().len(), 4);
        }
        assert_eq!(queue.available_slots(), 2);
    }
}
