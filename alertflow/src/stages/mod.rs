//! Stage executor contract.
//!
//! Each fixed stage (ingest, check, analyze, notify) is implemented outside
//! this crate and plugged in through [`StageExecutor`].

mod context;
mod result;

pub use context::StageContext;
pub use result::StageResult;

use crate::core::StageName;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Trait for fixed-stage executors.
///
/// Executors classify their own failures (see [`crate::errors::ErrorKind`]).
/// A partially successful notify (some channels delivered) is a success.
#[async_trait]
pub trait StageExecutor: Send + Sync + Debug {
    /// The stage this executor implements.
    fn stage(&self) -> StageName;

    /// Executes one attempt.
    async fn execute(&self, ctx: &StageContext) -> StageResult;
}

/// A simple function-based executor.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> StageResult + Send + Sync,
{
    stage: StageName,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> StageResult + Send + Sync,
{
    /// Creates a new function-based executor.
    pub fn new(stage: StageName, func: F) -> Self {
        Self { stage, func }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> StageResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("stage", &self.stage).finish()
    }
}

#[async_trait]
impl<F> StageExecutor for FnStage<F>
where
    F: Fn(&StageContext) -> StageResult + Send + Sync,
{
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        (self.func)(ctx)
    }
}

/// The executors wired into an orchestrator, one per stage.
#[derive(Debug, Clone, Default)]
pub struct StageSet {
    executors: HashMap<StageName, Arc<dyn StageExecutor>>,
}

impl StageSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under the stage it reports.
    #[must_use]
    pub fn with(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Registers an executor, replacing any previous one for that stage.
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(executor.stage(), executor);
    }

    /// Returns the executor for `stage`.
    #[must_use]
    pub fn get(&self, stage: StageName) -> Option<&Arc<dyn StageExecutor>> {
        self.executors.get(&stage)
    }

    /// Returns stages that have no executor.
    #[must_use]
    pub fn missing(&self) -> Vec<StageName> {
        StageName::ALL
            .into_iter()
            .filter(|s| !self.executors.contains_key(s))
            .collect()
    }
}
