//! Enumeration types shared across the workspace.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The lifecycle transition a job event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEventKind {
    /// The job entered the pending queue.
    Sub,
    /// The job left the queue and began running on a node.
    Start,
    /// The job finished and released its slots.
    End,
}

impl JobEventKind {
    /// Upper-case tag used in logs and dedup keys.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Sub => "SUB",
            Self::Start => "START",
            Self::End => "END",
        }
    }
}

impl core::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Playback controller state.
///
/// Lives here rather than in the playback crate because it is part of the
/// frame published to the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayState {
    /// Paused and waiting. The initial state.
    Paused,
    /// Reconstructing state at a requested position.
    Buffering,
    /// Buffered and ready to begin playing.
    Ready,
    /// Advancing with wall-clock time.
    Playing,
    /// Terminal state; the playback loop exits.
    End,
}

impl core::fmt::Display for PlayState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Paused => "PAUSED",
            Self::Buffering => "BUFFERING",
            Self::Ready => "READY",
            Self::Playing => "PLAYING",
            Self::End => "END",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_serializes_as_tag() {
        let json = serde_json::to_string(&JobEventKind::Start).unwrap();
        assert_eq!(json, "\"START\"");
        assert_eq!(JobEventKind::End.to_string(), "END");
    }

    #[test]
    fn play_state_display() {
        assert_eq!(PlayState::Buffering.to_string(), "BUFFERING");
    }
}
