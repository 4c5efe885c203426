//! Testing utilities for alertflow pipelines.
//!
//! This module provides:
//! - Scripted stage executors and node handlers
//! - A notifier that de-duplicates through an idempotency store
//! - Canned alert payloads and stage outputs
//! - Assertions over persisted rows and emitted signals

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_attempts, assert_run_status, assert_signal_order, assert_stage_statuses};
pub use mocks::{RecordingNotifier, ScriptedNode, ScriptedStage};
