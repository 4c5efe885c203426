//! Core domain model types for alertflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Run status state machine and stage enums
//! - Durable run and execution records
//! - Normalized stage output DTOs
//! - The inbound run request

mod dto;
mod records;
mod request;
mod status;

pub use dto::{
    AnalyzeOutput, CheckOutput, CheckResult, Delivery, IngestOutput, NotifyOutput, Recommendation,
};
pub use records::{ChainRun, NodeExecution, PipelineRun, StageExecution};
pub use request::RunRequest;
pub use status::{ChainStatus, ExecutionStatus, RunStatus, StageName};
