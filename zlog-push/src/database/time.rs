//! Timestamp helpers for the database layer.
//!
//! Log rows carry `created_at` as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::Utc;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
