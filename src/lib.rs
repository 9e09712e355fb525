//! airwave - resilient internet radio playback
//!
//! Plays Icecast/SHOUTcast stations with retries, mirror rotation after a
//! dropped stream, inline track titles and a non-blocking audio path.

pub mod audio;
pub mod error;
pub mod playlist;
pub mod settings;
pub mod station;

pub use audio::{PlaybackState, Player, PlayerBuilder, PlayerEvent};
pub use error::PlayerError;
pub use station::{Playlist, Station};
