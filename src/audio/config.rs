//! Engine tunables
//!
//! Runtime view of the playback settings. `Settings::engine_config`
//! builds one from the persisted file; tests build them directly.

use std::time::Duration;

use super::fade::DEFAULT_FADE_IN;
use super::queue::FRAME_QUEUE_CAPACITY;
use super::volume::DEFAULT_VOLUME;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("airwave/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_PAUSE: Duration = Duration::from_secs(5);
pub const DEFAULT_PLAYLIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retries per stream URL after the first try, and rotation cycles
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Longest wait for a single network read before the attempt fails
    pub read_timeout: Duration,
    pub playlist_timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest wait for response headers
    pub response_timeout: Duration,
    pub fade_in: Duration,
    /// Paused time after which resuming forces a reconnect
    pub max_pause: Duration,
    /// Frame queue capacity
    pub queue_capacity: usize,
    /// Give up immediately when the network looks down
    pub short_circuit_network_down: bool,
    pub user_agent: String,
    pub proxy_url: Option<String>,
    /// Volume applied before the first `set_volume`
    pub initial_volume: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
            playlist_timeout: DEFAULT_PLAYLIST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            fade_in: DEFAULT_FADE_IN,
            max_pause: DEFAULT_MAX_PAUSE,
            queue_capacity: FRAME_QUEUE_CAPACITY,
            short_circuit_network_down: true,
            user_agent: USER_AGENT.to_string(),
            proxy_url: None,
            initial_volume: DEFAULT_VOLUME,
        }
    }
}
