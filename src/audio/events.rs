//! Player communication types
//!
//! - `OutputCommand` - Commands sent from the player to the audio output thread
//! - `PlayerEvent` - Notifications sent from the player to the UI
//!
//! ## Architecture
//! ```text
//! Player --[OutputCommand]--> Output Thread (rodio Sink)
//! UI     <--[PlayerEvent]---- Player
//! UI     <--[Status]--------- Player (non-blocking reads)
//! ```

use super::source::QueueSource;
use super::status::PlaybackState;
use crate::playlist::StreamDescriptor;

// ============ Commands (Player -> Output Thread) ============

/// Commands sent to the output thread
///
/// All commands are fire-and-forget; the sender never waits on the device.
pub enum OutputCommand {
    /// Replace whatever is playing with a new source
    Start { source: QueueSource },
    /// Stop and drop the current source
    Clear,
    /// Pause or resume the sink
    SetPaused { paused: bool },
    /// Linear amplitude, 0.0 is silence
    SetVolume { amplitude: f32 },
    /// Close the device and end the thread
    Shutdown,
}

impl std::fmt::Debug for OutputCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start { source } => f
                .debug_struct("Start")
                .field("sample_rate", &rodio::Source::sample_rate(source))
                .finish_non_exhaustive(),
            Self::Clear => write!(f, "Clear"),
            Self::SetPaused { paused } => {
                f.debug_struct("SetPaused").field("paused", paused).finish()
            }
            Self::SetVolume { amplitude } => f
                .debug_struct("SetVolume")
                .field("amplitude", amplitude)
                .finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

// ============ Events (Player -> UI) ============

/// Events emitted by the player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged {
        old: PlaybackState,
        new: PlaybackState,
    },
    /// New ICY title, or a title set by the caller
    TrackChanged { title: String },
    /// Stream format details changed
    StreamInfo { descriptor: StreamDescriptor },
    /// A retry or rotation attempt is about to start
    Retrying { attempt: u32, max_attempts: u32 },
    /// Short human-readable failure
    Error { message: String },
}

// ============ Channel Types ============

/// Sender for output commands (held by `OutputHandle`)
pub type OutputCommandSender = tokio::sync::mpsc::UnboundedSender<OutputCommand>;

/// Receiver for output commands (held by the output thread)
pub type OutputCommandReceiver = tokio::sync::mpsc::UnboundedReceiver<OutputCommand>;

/// Sender for player events (held by the status facade)
pub type PlayerEventSender = tokio::sync::mpsc::UnboundedSender<PlayerEvent>;

/// Receiver for player events (held by the UI)
pub type PlayerEventReceiver = tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>;

/// Create a new output command channel
pub fn output_command_channel() -> (OutputCommandSender, OutputCommandReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Create a new player event channel
pub fn player_event_channel() -> (PlayerEventSender, PlayerEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
