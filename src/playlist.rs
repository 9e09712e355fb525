//! Playlist resolution
//!
//! A station endpoint is usually a small playlist document (`.pls` or
//! `.m3u`) listing one or more mirror stream URLs. The resolver turns one
//! endpoint into the stream URLs the player actually connects to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::PlayerError;

/// Bitrates recognised in playlist file names, highest first
const KNOWN_BITRATES: [u32; 7] = [320, 256, 192, 130, 128, 64, 32];

// ============ Stream Descriptor ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Highest,
    #[default]
    High,
    Medium,
    Low,
}

impl Quality {
    pub fn from_bitrate(kbps: u32) -> Self {
        match kbps {
            256.. => Quality::Highest,
            128.. => Quality::High,
            64.. => Quality::Medium,
            _ => Quality::Low,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Highest => write!(f, "highest"),
            Quality::High => write!(f, "high"),
            Quality::Medium => write!(f, "medium"),
            Quality::Low => write!(f, "low"),
        }
    }
}

/// What the player believes it is playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub format: String,
    pub quality: Quality,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
}

impl Default for StreamDescriptor {
    fn default() -> Self {
        Self {
            format: "MP3".to_string(),
            quality: Quality::High,
            bitrate_kbps: 128,
            sample_rate_hz: 44_100,
        }
    }
}

impl StreamDescriptor {
    /// Guess format and bitrate from a playlist URL
    ///
    /// Follows the common naming convention `name<bitrate>.pls`, with
    /// `aac`/`aacp` marking AAC streams. `130` is a legacy id for 128 kbps.
    pub fn from_playlist_url(url: &str) -> Self {
        let mut descriptor = Self::default();
        let lower = url.to_lowercase();

        if lower.contains("aac") {
            descriptor.format = "AAC".to_string();
        }

        for bitrate in KNOWN_BITRATES {
            if lower.contains(&format!("{bitrate}.pls")) || lower.contains(&format!("{bitrate}.")) {
                descriptor.bitrate_kbps = if bitrate == 130 { 128 } else { bitrate };
                break;
            }
        }

        descriptor.quality = Quality::from_bitrate(descriptor.bitrate_kbps);
        descriptor
    }
}

// ============ Resolver ============

/// Turns one ranked endpoint into the stream URLs it stands for
#[async_trait]
pub trait PlaylistResolver: Send + Sync {
    async fn resolve(&self, endpoint: &str) -> Result<Vec<String>, PlayerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Pls,
    M3u,
    /// Not a playlist, the URL is the stream itself
    Direct,
}

impl PlaylistKind {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".pls") {
            PlaylistKind::Pls
        } else if path.ends_with(".m3u") || path.ends_with(".m3u8") {
            PlaylistKind::M3u
        } else {
            PlaylistKind::Direct
        }
    }
}

/// Fetches PLS and M3U documents over HTTP
#[derive(Debug, Clone)]
pub struct HttpPlaylistResolver {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPlaylistResolver {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self, url: &str) -> Result<String, PlayerError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(PlayerError::from_request)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PlayerError::Playlist(format!(
                "playlist returned status {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .text()
            .await
            .map_err(|e| PlayerError::Playlist(format!("failed to read playlist: {e}")))
    }
}

#[async_trait]
impl PlaylistResolver for HttpPlaylistResolver {
    async fn resolve(&self, endpoint: &str) -> Result<Vec<String>, PlayerError> {
        let kind = PlaylistKind::from_url(endpoint);
        let urls = match kind {
            PlaylistKind::Direct => return Ok(vec![endpoint.to_string()]),
            PlaylistKind::Pls => parse_pls(&self.fetch(endpoint).await?),
            PlaylistKind::M3u => parse_m3u(&self.fetch(endpoint).await?),
        };

        if urls.is_empty() {
            return Err(PlayerError::Playlist(
                "no valid stream URL found in playlist".to_string(),
            ));
        }

        tracing::debug!("Resolved {} to {} stream URL(s)", endpoint, urls.len());
        Ok(urls)
    }
}

/// Extract the `FileN=` entries of a PLS document
pub fn parse_pls(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("File"))
        .filter_map(|line| line.split_once('='))
        .map(|(_, url)| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

/// Extract the entries of an M3U/M3U8 document
pub fn parse_m3u(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
