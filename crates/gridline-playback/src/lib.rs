//! Playback of a Gridline timeline.
//!
//! A [`PlaybackController`] rebuilds the cluster at any retained offset and
//! then moves forward with wall-clock time, applying the timeline's events
//! to a state it owns. [`run_playback`] drives a controller on a fixed tick,
//! takes requests through a shared [`PlaybackHandle`], and publishes an
//! immutable [`PlaybackFrame`] after every tick.
//!
//! # Modules
//!
//! - [`controller`] -- The PAUSED / BUFFERING / READY / PLAYING / END state machine
//! - [`frame`] -- Owned per-tick views for the rendering layer
//! - [`handle`] -- Command queue shared with the tick loop
//! - [`runner`] -- The async tick loop

pub mod controller;
pub mod frame;
pub mod handle;
pub mod runner;

pub use controller::{Advance, PlaybackController, Transition};
pub use frame::{NodeFrame, OwnerUsage, PlaybackFrame, QueuedJobFrame};
pub use handle::{PlaybackCommand, PlaybackHandle};
pub use runner::{PlaybackResult, log_playback_end, run_playback};
