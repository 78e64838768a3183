//! Wall-clock helpers.
//!
//! Route timestamps are Unix seconds. They cross replica boundaries, so a
//! monotonic `Instant` is not usable for them.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
