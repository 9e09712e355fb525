//! Playback status shared between the controller and the UI
//!
//! Each logical group of fields has its own lock so a UI poll reading the
//! track title never waits behind the controller updating retry counters.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::events::{PlayerEvent, PlayerEventSender};
use super::queue::QueueLevel;
use crate::playlist::StreamDescriptor;

/// Shown while the stream has not announced a title yet
pub const WAITING_FOR_TRACK: &str = "Waiting for track info...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
    Reconnecting,
    Error,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "IDLE"),
            PlaybackState::Buffering => write!(f, "BUFFERING"),
            PlaybackState::Playing => write!(f, "LIVE"),
            PlaybackState::Paused => write!(f, "PAUSED"),
            PlaybackState::Reconnecting => write!(f, "RECONNECTING"),
            PlaybackState::Error => write!(f, "ERROR"),
        }
    }
}

/// Retry progress for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryInfo {
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Running total of time spent paused
#[derive(Debug, Clone, Default)]
pub struct PauseAccounting {
    total_paused: Duration,
    paused_at: Option<Instant>,
}

impl PauseAccounting {
    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Close the current pause and return the new total
    pub fn resume(&mut self, now: Instant) -> Duration {
        if let Some(paused_at) = self.paused_at.take() {
            self.total_paused += now.saturating_duration_since(paused_at);
        }
        self.total_paused
    }

    /// How far behind the live edge playback is
    pub fn delay(&self, now: Instant) -> Duration {
        let current = self
            .paused_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        self.total_paused + current
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
struct StreamGroup {
    descriptor: StreamDescriptor,
    session_start: Option<Instant>,
}

#[derive(Debug, Default)]
struct RetryGroup {
    retry: RetryInfo,
    last_error: String,
}

/// Thread-safe status facade
pub struct PlaybackStatus {
    state: RwLock<PlaybackState>,
    stream: RwLock<StreamGroup>,
    retry: RwLock<RetryGroup>,
    track: RwLock<String>,
    queue: RwLock<Option<QueueLevel>>,
    events: PlayerEventSender,
}

impl std::fmt::Debug for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackStatus")
            .field("state", &*self.state.read())
            .field("track", &*self.track.read())
            .field("retry", &self.retry.read().retry)
            .finish_non_exhaustive()
    }
}

impl PlaybackStatus {
    pub fn new(events: PlayerEventSender) -> Self {
        Self {
            state: RwLock::new(PlaybackState::Idle),
            stream: RwLock::new(StreamGroup::default()),
            retry: RwLock::new(RetryGroup::default()),
            track: RwLock::new(String::new()),
            queue: RwLock::new(None),
            events,
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    // ============ Playback State ============

    pub fn state(&self) -> PlaybackState {
        *self.state.read()
    }

    pub fn set_state(&self, new: PlaybackState) {
        let old = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new)
        };
        if old != new {
            tracing::info!("Playback state: {} -> {}", old, new);
            self.emit(PlayerEvent::StateChanged { old, new });
        }
    }

    // ============ Stream Metadata ============

    pub fn stream_descriptor(&self) -> StreamDescriptor {
        self.stream.read().descriptor.clone()
    }

    pub fn set_stream_descriptor(&self, descriptor: StreamDescriptor) {
        self.stream.write().descriptor = descriptor.clone();
        self.emit(PlayerEvent::StreamInfo { descriptor });
    }

    /// Correct the guessed sample rate once the decoder knows better
    pub fn set_sample_rate(&self, sample_rate_hz: u32) {
        let descriptor = {
            let mut stream = self.stream.write();
            if stream.descriptor.sample_rate_hz == sample_rate_hz {
                return;
            }
            stream.descriptor.sample_rate_hz = sample_rate_hz;
            stream.descriptor.clone()
        };
        self.emit(PlayerEvent::StreamInfo { descriptor });
    }

    pub fn start_session(&self) {
        self.stream.write().session_start = Some(Instant::now());
    }

    /// Forget the session and the descriptor
    pub fn clear_session(&self) {
        *self.stream.write() = StreamGroup::default();
    }

    /// Time since the current stream started playing
    pub fn session_duration(&self) -> Duration {
        self.stream
            .read()
            .session_start
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    // ============ Retry / Error Info ============

    pub fn retry_info(&self) -> RetryInfo {
        self.retry.read().retry
    }

    pub fn set_retry_info(&self, attempt: u32, max_attempts: u32) {
        self.retry.write().retry = RetryInfo {
            attempt,
            max_attempts,
        };
        if attempt > 0 {
            self.emit(PlayerEvent::Retrying {
                attempt,
                max_attempts,
            });
        }
    }

    pub fn last_error(&self) -> String {
        self.retry.read().last_error.clone()
    }

    pub fn set_last_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.retry.write().last_error = message.clone();
        if !message.is_empty() {
            self.emit(PlayerEvent::Error { message });
        }
    }

    // ============ Track ============

    pub fn current_track(&self) -> String {
        let track = self.track.read();
        if track.is_empty() {
            WAITING_FOR_TRACK.to_string()
        } else {
            track.clone()
        }
    }

    pub fn set_current_track(&self, title: impl Into<String>) {
        let title = title.into();
        {
            let mut track = self.track.write();
            if *track == title {
                return;
            }
            track.clone_from(&title);
        }
        if !title.is_empty() {
            tracing::info!("Now playing: {}", title);
        }
        self.emit(PlayerEvent::TrackChanged { title });
    }

    /// Set a title from outside the stream, unless the stream already sent one
    pub fn set_initial_track(&self, title: impl Into<String>) {
        let title = title.into();
        {
            let mut track = self.track.write();
            if !track.is_empty() || title.is_empty() {
                return;
            }
            track.clone_from(&title);
        }
        self.emit(PlayerEvent::TrackChanged { title });
    }

    // ============ Buffer ============

    pub fn set_queue_level(&self, level: Option<QueueLevel>) {
        *self.queue.write() = level;
    }

    pub fn queue_level(&self) -> Option<QueueLevel> {
        self.queue.read().clone()
    }

    /// Queue fill as a percentage, 0 without an active queue
    pub fn buffer_health(&self) -> u8 {
        self.queue.read().as_ref().map(QueueLevel::health).unwrap_or(0)
    }
}
