use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, the timestamp unit used by every
/// serialized record.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
