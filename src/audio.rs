//! Audio playback engine
//!
//! - `Player`: retrying, rotating playback of a `Station`
//! - `streaming` / `icy`: HTTP stream and inline metadata framing
//! - `decoder` / `queue` / `source`: decode into a bounded frame queue, drain it from the sink
//! - `thread` / `handle` / `output`: rodio sink owned by a dedicated thread
//! - `status` / `events`: thread-safe status queries and change notifications

pub mod config;
pub mod decoder;
pub mod events;
mod fade;
mod handle;
pub mod icy;
pub mod output;
mod player;
pub mod queue;
pub mod retry;
pub mod source;
pub mod status;
pub mod streaming;
mod thread;
pub mod volume;

pub use config::EngineConfig;
pub use decoder::{DecoderFactory, StreamDecoder, SymphoniaDecoderFactory};
pub use events::{PlayerEvent, PlayerEventReceiver, PlayerEventSender, player_event_channel};
pub use fade::{DEFAULT_FADE_IN, FadeIn};
pub use handle::OutputHandle;
pub use output::{AudioDevice, AudioOutput, list_output_devices};
pub use player::{Player, PlayerBuilder};
pub use status::{PlaybackState, RetryInfo, WAITING_FOR_TRACK};
pub use thread::{OutputThreadHandle, spawn_output_thread};
pub use volume::{DEFAULT_VOLUME, Volume, to_gain};
