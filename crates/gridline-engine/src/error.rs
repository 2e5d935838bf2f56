//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure `main` can propagate with `?`.

use std::path::PathBuf;

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: gridline_timeline::ConfigError,
    },

    /// A snapshot could not be added to the timeline.
    #[error("timeline error: {source}")]
    Timeline {
        /// The underlying timeline error.
        #[from]
        source: gridline_timeline::TimelineError,
    },

    /// The snapshot directory or a snapshot file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A snapshot file is not a valid snapshot document.
    #[error("failed to parse snapshot {}: {source}", path.display())]
    Snapshot {
        /// Path of the file.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The playback task did not finish cleanly.
    #[error("playback error: {message}")]
    Playback {
        /// Description of the failure.
        message: String,
    },
}
