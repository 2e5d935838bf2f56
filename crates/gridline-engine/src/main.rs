//! Engine binary for Gridline.
//!
//! Loads a directory of polled snapshots into a timeline and replays it
//! with a playback controller from the first retained offset to the last.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`--config PATH`, default `gridline.yaml`;
//!    `--speed X` overrides `playback.initial_speed`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the node topology
//! 4. Read and ingest every `*.json` snapshot, earliest first
//! 5. Log the aggregate series
//! 6. Play from the first offset until the last offset is reached
//! 7. Log the final frame

mod error;
mod ingest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gridline_playback::{PlaybackController, PlaybackHandle, log_playback_end, run_playback};
use gridline_timeline::{GridlineConfig, LoggingConfig, Timeline};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Config file read when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "gridline.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, ingestion, or playback fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let args = CliArgs::parse(std::env::args().skip(1));
    let config_path = args.config;
    let (mut config, from_file) = load_config(&config_path)?;
    if let Some(speed) = args.speed {
        config.playback.initial_speed = speed;
    }

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("gridline-engine starting");
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    // 3. Build the node topology.
    let topology = Arc::new(config.topology.build());
    info!(
        nodes = topology.len(),
        slots = topology.total_slots(),
        "Node topology built"
    );

    // 4. Ingest snapshots.
    let timeline = Arc::new(Timeline::new(config.timeline.clone(), topology));
    let snapshots = ingest::load_snapshots(&config.ingest.snapshot_dir)?;
    info!(
        dir = %config.ingest.snapshot_dir.display(),
        count = snapshots.len(),
        "Snapshots read"
    );
    let report = ingest::ingest(&timeline, snapshots)?;
    if report.snapshots == 0 {
        warn!("No snapshots to replay");
        return Ok(());
    }

    // 5. Log the aggregate series.
    log_series(&timeline);
    timeline.log_event_map();

    // 6. Play from the first offset to the last.
    let first_offset = timeline.get_first_offset();
    let last_offset = timeline.get_last_offset();
    let mut controller = PlaybackController::new(Arc::clone(&timeline), config.playback.initial_speed);
    controller.buffer_at_position(first_offset);
    controller.play();
    info!(
        first_offset,
        last_offset,
        speed = controller.speed(),
        "Starting playback"
    );

    let handle = Arc::new(PlaybackHandle::new());
    let (frames_tx, mut frames_rx) = watch::channel(controller.frame());
    let playback = {
        let handle = Arc::clone(&handle);
        let playback_config = config.playback.clone();
        tokio::spawn(async move {
            run_playback(&mut controller, &handle, &playback_config, &frames_tx).await
        })
    };

    while frames_rx.changed().await.is_ok() {
        let position = frames_rx.borrow_and_update().position;
        if position >= last_offset {
            info!(position, "Reached the last offset");
            handle.end();
            break;
        }
    }

    // 7. Log the result.
    let result = playback.await.map_err(|e| EngineError::Playback {
        message: e.to_string(),
    })?;
    log_playback_end(&result);
    Ok(())
}

/// Command-line options. Both take `--flag VALUE` or `--flag=VALUE`.
#[derive(Debug, Clone)]
struct CliArgs {
    /// `--config`: the YAML file to load.
    config: PathBuf,
    /// `--speed`: replay speed multiplier. Ignored unless it parses.
    speed: Option<f64>,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> Self {
        let mut parsed = Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            speed: None,
        };
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_owned(), Some(value.to_owned())),
                None => (arg, None),
            };
            let value = match flag.as_str() {
                "--config" | "--speed" => inline.or_else(|| args.next()),
                _ => continue,
            };
            let Some(value) = value else {
                continue;
            };
            if flag == "--config" {
                parsed.config = PathBuf::from(value);
            } else {
                parsed.speed = value.parse().ok();
            }
        }
        parsed
    }
}

/// Load configuration from `path`, or defaults if the file does not exist.
///
/// The flag tells whether the file was read.
fn load_config(path: &Path) -> Result<(GridlineConfig, bool), EngineError> {
    if path.exists() {
        Ok((GridlineConfig::from_file(path)?, true))
    } else {
        Ok((GridlineConfig::default(), false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_series(timeline: &Timeline) {
    let running = timeline.get_num_running_jobs_map();
    let queued = timeline.get_num_queued_jobs_map();
    info!(
        running_points = running.len(),
        queued_points = queued.len(),
        peak_running = running.values().max().copied().unwrap_or(0),
        peak_queued = queued.values().max().copied().unwrap_or(0),
        length_ms = timeline.get_length(),
        live_offset = timeline.get_live_offset(),
        "Timeline series"
    );
    for (offset, count) in &running {
        debug!(offset, count, "Running jobs");
    }
    for (offset, count) in &queued {
        debug!(offset, count, "Queued jobs");
    }
}
