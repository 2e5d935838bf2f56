//! Error types for the `gridline-timeline` crate.

use gridline_state::StateError;
use gridline_types::Offset;

use crate::config::ConfigError;

/// Errors returned by timeline ingestion.
///
/// Per-event inconsistencies never surface here; they are logged and the
/// event is skipped.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    /// The snapshot cannot be modelled (an unmapped node).
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The snapshot was sampled before the latest one already added.
    #[error("snapshot at offset {offset} precedes the latest snapshot at offset {last}")]
    OutOfOrder {
        /// Offset of the rejected snapshot.
        offset: Offset,
        /// Offset of the latest snapshot added.
        last: Offset,
    },

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
