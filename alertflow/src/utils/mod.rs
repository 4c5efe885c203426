//! Utility functions for UUID generation and timestamp handling.

mod timestamps;
mod uuid_utils;

pub use timestamps::{duration_ms_between, iso_timestamp, now_utc, Timestamp};
pub use uuid_utils::{generate_trace_id, generate_uuid, generate_uuid_v7};
