mod build;
mod hook;
mod project;

pub use build::*;
pub use hook::*;
pub use project::*;

use chrono::{DateTime, TimeZone, Utc};

/// Timestamps are stored as milliseconds so builds created within the same
/// second still order correctly.
pub(crate) fn timestamp_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
