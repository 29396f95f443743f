//! Single clock source for the store and its callers.
//!
//! Every `created_at`/`updated_at` field in domain code goes through here
//! instead of calling `chrono::Utc::now()` directly, so timestamp
//! generation stays centralized.

/// Current time in Unix milliseconds (UTC).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
