//! Identity and time-coordinate types.
//!
//! A job is correlated across snapshots only by its [`FullJobId`]: the
//! numeric job id, optionally suffixed with a task index (`"12345"` vs
//! `"12345.3"`). Positions on the timeline are [`Offset`]s, milliseconds
//! since the timeline's fixed baseline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Elapsed milliseconds since the timeline's baseline timestamp.
///
/// Signed because a sampled start or submission time may precede the
/// baseline; such offsets are clamped before they reach the event log.
pub type Offset = i64;

/// Compute the offset of `time` relative to `baseline`.
///
/// Negative when `time` precedes `baseline`.
pub fn offset_between(baseline: DateTime<Utc>, time: DateTime<Utc>) -> Offset {
    time.signed_duration_since(baseline).num_milliseconds()
}

/// Stable identity of a job across time.
///
/// Rendered as `<jobId>` or `<jobId>.<task>`. Ordering is lexicographic on
/// the rendered form, which is what diff reports sort by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FullJobId(String);

impl FullJobId {
    /// Build the full id from a numeric job id and an optional task index.
    ///
    /// An empty task string is treated as absent.
    pub fn new(job_id: u64, task: Option<&str>) -> Self {
        match task {
            Some(t) if !t.is_empty() => Self(format!("{job_id}.{t}")),
            _ => Self(job_id.to_string()),
        }
    }

    /// Return the rendered identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the numeric job id prefix, if the identifier has one.
    pub fn job_number(&self) -> Option<u64> {
        self.0.split('.').next().and_then(|n| n.parse().ok())
    }
}

impl core::fmt::Display for FullJobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FullJobId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for FullJobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
