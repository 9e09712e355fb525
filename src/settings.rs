//! Settings persistence
//!
//! Saved as JSON in the platform config directory. Every field has a
//! default, so older or hand-edited files load with whatever they omit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PAUSE, DEFAULT_READ_TIMEOUT, DEFAULT_RETRY_DELAY, USER_AGENT,
};
use crate::audio::queue::FRAME_QUEUE_CAPACITY;
use crate::audio::volume::DEFAULT_VOLUME;
use crate::audio::{DEFAULT_FADE_IN, EngineConfig};

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Volume in percent (0 to 100)
    pub volume: u8,
    pub muted: bool,
    pub playback: PlaybackSettings,
    pub network: NetworkSettings,
    pub system: SystemSettings,
}

/// Retry and buffering knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Retries per stream URL, and rotation cycles after a drop
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// A read that stalls this long fails the attempt
    pub read_timeout_ms: u64,
    pub fade_in_ms: u64,
    /// Paused longer than this in total and resume reconnects instead
    pub max_pause_ms: u64,
    /// Decoded frames buffered ahead of the sink
    pub queue_capacity: usize,
    pub short_circuit_network_down: bool,
}

/// Proxy type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    #[default]
    None,
    /// Take the proxy from `HTTP_PROXY` / `HTTPS_PROXY`
    System,
    Http,
    Https,
    Socks5,
}

/// Network settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub user_agent: String,
    pub proxy_type: ProxyType,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
}

/// System settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    /// Output device name; `None` is the system default
    pub audio_output_device: Option<String>,
}

impl NetworkSettings {
    /// Build the proxy URL
    /// Returns None if the proxy is disabled or incomplete
    pub fn proxy_url(&self) -> Option<String> {
        let scheme = match self.proxy_type {
            ProxyType::None => return None,
            ProxyType::System => {
                return std::env::var("HTTP_PROXY")
                    .or_else(|_| std::env::var("http_proxy"))
                    .or_else(|_| std::env::var("HTTPS_PROXY"))
                    .or_else(|_| std::env::var("https_proxy"))
                    .ok();
            }
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5",
        };

        if self.proxy_host.is_empty() || self.proxy_port == 0 {
            return None;
        }

        let auth = match (&self.proxy_username, &self.proxy_password) {
            (Some(user), Some(pass)) if !user.is_empty() => format!("{}:{}@", user, pass),
            (Some(user), None) if !user.is_empty() => format!("{}@", user),
            _ => String::new(),
        };

        Some(format!(
            "{}://{}{}:{}",
            scheme, auth, self.proxy_host, self.proxy_port
        ))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            muted: false,
            playback: PlaybackSettings::default(),
            network: NetworkSettings::default(),
            system: SystemSettings::default(),
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            fade_in_ms: DEFAULT_FADE_IN.as_millis() as u64,
            max_pause_ms: DEFAULT_MAX_PAUSE.as_millis() as u64,
            queue_capacity: FRAME_QUEUE_CAPACITY,
            short_circuit_network_down: true,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            proxy_type: ProxyType::None,
            proxy_host: String::new(),
            proxy_port: 0,
            proxy_username: None,
            proxy_password: None,
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "airwave", "airwave")
}

impl Settings {
    /// Get the settings file path
    pub fn file_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Where the debug log goes
    pub fn debug_log_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.cache_dir().join("debug.log"))
    }

    /// Load settings from file, or return defaults if not found
    pub fn load() -> Self {
        Self::file_path()
            .and_then(|path| Self::load_from_file(&path).ok())
            .unwrap_or_default()
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Save settings to the default file
    pub fn save(&self) -> Result<(), SettingsError> {
        match Self::file_path() {
            Some(path) => self.save_to_file(&path),
            None => Err(SettingsError::Io(
                "Could not determine config directory".to_string(),
            )),
        }
    }

    /// Save settings to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))?;
        Ok(())
    }

    /// Engine tunables from these settings
    pub fn engine_config(&self) -> EngineConfig {
        let playback = &self.playback;
        let user_agent = if self.network.user_agent.trim().is_empty() {
            USER_AGENT.to_string()
        } else {
            self.network.user_agent.clone()
        };

        EngineConfig {
            max_attempts: playback.max_attempts,
            retry_delay: Duration::from_millis(playback.retry_delay_ms),
            read_timeout: Duration::from_millis(playback.read_timeout_ms.max(1)),
            fade_in: Duration::from_millis(playback.fade_in_ms),
            max_pause: Duration::from_millis(playback.max_pause_ms),
            queue_capacity: playback.queue_capacity.max(1),
            short_circuit_network_down: playback.short_circuit_network_down,
            user_agent,
            proxy_url: self.network.proxy_url(),
            initial_volume: self.volume.min(100),
            ..EngineConfig::default()
        }
    }
}

/// Errors that can occur with settings
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
}
