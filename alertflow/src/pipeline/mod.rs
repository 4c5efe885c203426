//! Fixed-stage pipeline execution.
//!
//! This module provides:
//! - The run registry (trace/run ids, fingerprints)
//! - The fixed-stage orchestrator and its resume controller
//! - Retry/backoff policy shared with the chain engine
//! - Idempotency keys and the de-duplication store
//! - The task-queue port for asynchronous submission

mod idempotency;
mod orchestrator;
mod queue;
mod registry;
mod resume;
mod retry;


pub use idempotency::{
    idempotency_key, scoped_key, CachedResult, IdempotencyStore, InMemoryIdempotencyStore,
};
pub use orchestrator::Orchestrator;
pub use queue::{InlineTaskQueue, TaskHandle, TaskQueue, TokioTaskQueue};
pub use registry::{alert_fingerprint, RunRegistry};
pub use retry::{JitterStrategy, RetryDecision, RetryPolicy};
