//! UUID generation helpers.

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new UUID v7 (time-ordered).
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

/// Generates a fresh correlation id.
///
/// Trace ids are time-ordered so related runs sort together in stores.
#[must_use]
pub fn generate_trace_id() -> String {
    generate_uuid_v7().to_string()
}
