//! File-based snapshot ingestion.
//!
//! Each poll is one JSON document in the snapshot directory. Files are
//! parsed, ordered by sampling time, and added to the timeline in order.

use std::path::{Path, PathBuf};

use gridline_timeline::Timeline;
use gridline_types::Snapshot;
use tracing::{debug, info};

use crate::error::EngineError;

/// Totals for one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Snapshots added.
    pub snapshots: usize,
    /// Lifecycle events kept after dedup.
    pub events: usize,
    /// Events skipped as inconsistent.
    pub inconsistencies: usize,
}

/// Read every `*.json` snapshot in `dir`, earliest sampling time first.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the directory or a file cannot be read,
/// or [`EngineError::Snapshot`] if a file is not a snapshot document.
pub fn load_snapshots(dir: &Path) -> Result<Vec<Snapshot>, EngineError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| EngineError::Io { path, source }
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut snapshots = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = std::fs::read_to_string(&path).map_err(io_err(&path))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .map_err(|source| EngineError::Snapshot {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), sampling_time = %snapshot.sampling_time(), "Read snapshot");
        snapshots.push(snapshot);
    }
    snapshots.sort_by_key(Snapshot::sampling_time);
    Ok(snapshots)
}

/// Add `snapshots` to `timeline` in order.
///
/// # Errors
///
/// Returns [`EngineError::Timeline`] on the first snapshot the timeline
/// rejects, such as one with a node missing from the topology.
pub fn ingest(timeline: &Timeline, snapshots: Vec<Snapshot>) -> Result<IngestReport, EngineError> {
    let mut report = IngestReport::default();
    for snapshot in snapshots {
        let summary = timeline.add_snapshot(snapshot)?;
        report.snapshots = report.snapshots.saturating_add(1);
        report.events = report
            .events
            .saturating_add(summary.derived.saturating_sub(summary.duplicates));
        report.inconsistencies = report.inconsistencies.saturating_add(summary.inconsistencies);
    }
    info!(
        snapshots = report.snapshots,
        events = report.events,
        inconsistencies = report.inconsistencies,
        retained = timeline.num_snapshots(),
        "Snapshot ingestion complete"
    );
    Ok(report)
}
