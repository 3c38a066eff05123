//! Wall-clock helpers.
//!
//! Wall-clock time is only used for bookkeeping (created/updated/read/expires
//! times, sweep staleness). It never decides a replication conflict; see
//! [`ChangeStamp`](crate::ChangeStamp) for that.

use chrono::Utc;
use std::time::Duration;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Time elapsed since `millis`, saturating at zero for times in the future.
#[must_use]
pub fn elapsed_since(millis: u64) -> Duration {
    Duration::from_millis(now_millis().saturating_sub(millis))
}
