//! UUID helpers.
//!
//! Entity ids are UUIDv7: the embedded Unix timestamp makes them sort
//! chronologically, which keeps `ORDER BY id` and `ORDER BY created_at`
//! consistent and helps log correlation.

use uuid::Uuid;

/// Generate a new time-ordered UUIDv7.
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

/// Extract the millisecond Unix timestamp embedded in a UUIDv7.
///
/// Returns `None` for non-v7 UUIDs.
pub fn extract_timestamp_ms(id: &Uuid) -> Option<u64> {
    if !is_v7(id) {
        return None;
    }
    let bytes = id.as_bytes();
    let mut ts: u64 = 0;
    for b in &bytes[..6] {
        ts = (ts << 8) | u64::from(*b);
    }
    Some(ts)
}
