//! Timestamp helpers.

use chrono::{DateTime, Utc};

/// Timestamp type used on every record.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an ISO 8601 string with microseconds.
///
/// # Examples
///
/// ```
/// use alertflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Milliseconds elapsed between two timestamps, never negative.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn duration_ms_between(start: Timestamp, end: Timestamp) -> f64 {
    let micros = (end - start).num_microseconds().unwrap_or(i64::MAX).max(0);
    micros as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_duration_between() {
        let start = now_utc();
        let end = start + Duration::milliseconds(1500);
        assert!((duration_ms_between(start, end) - 1500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duration_never_negative() {
        let start = now_utc();
        let end = start - Duration::seconds(3);
        assert_eq!(duration_ms_between(start, end), 0.0);
    }
}
