//! Shared command handle for a running playback loop.
//!
//! A [`PlaybackHandle`] is wrapped in [`Arc`](std::sync::Arc) and shared
//! between the playback runner and whatever drives it. Requests are queued
//! and picked up at the top of the next tick. The end request lives in an
//! atomic so the runner can check it without taking the queue lock.

use std::sync::atomic::{AtomicBool, Ordering};

use gridline_types::Offset;
use tokio::sync::{Mutex, Notify};

/// A request for the playback controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackCommand {
    /// Go dead and buffer at the given position.
    Seek(Offset),
    /// Start or resume playing.
    Play,
    /// Pause.
    Pause,
    /// Go dead and change the speed multiplier.
    SetSpeed(f64),
    /// Jump to the live offset and play.
    GoLive,
}

/// Command queue shared with a playback runner.
#[derive(Debug, Default)]
pub struct PlaybackHandle {
    /// Requests not yet picked up.
    commands: Mutex<Vec<PlaybackCommand>>,

    /// Wakes the runner out of its tick sleep.
    wake: Notify,

    /// Set once [`end`](Self::end) has been called.
    end_requested: AtomicBool,
}

impl PlaybackHandle {
    /// An empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, command: PlaybackCommand) {
        self.commands.lock().await.push(command);
        self.wake.notify_one();
    }

    /// Queue a seek to `position`.
    pub async fn seek(&self, position: Offset) {
        self.push(PlaybackCommand::Seek(position)).await;
    }

    /// Queue a play request.
    pub async fn play(&self) {
        self.push(PlaybackCommand::Play).await;
    }

    /// Queue a pause request.
    pub async fn pause(&self) {
        self.push(PlaybackCommand::Pause).await;
    }

    /// Queue a speed change.
    pub async fn set_speed(&self, speed: f64) {
        self.push(PlaybackCommand::SetSpeed(speed)).await;
    }

    /// Queue a jump to the live edge.
    pub async fn go_live(&self) {
        self.push(PlaybackCommand::GoLive).await;
    }

    /// Request termination. Observed at the top of the next tick.
    pub fn end(&self) {
        self.end_requested.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Whether termination has been requested.
    pub fn is_end_requested(&self) -> bool {
        self.end_requested.load(Ordering::Acquire)
    }

    /// Take every queued request, oldest first.
    pub async fn drain(&self) -> Vec<PlaybackCommand> {
        std::mem::take(&mut *self.commands.lock().await)
    }

    /// Resolve on the next request or end.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}
