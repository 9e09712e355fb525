//! Playback error taxonomy
//!
//! Every failure an attempt can produce is a `PlayerError`. The retry
//! controller classifies on the variant, so the variant matters more
//! than the message.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// HTTP status codes that will not change on retry
const NON_RETRYABLE_STATUS: [u16; 4] = [401, 403, 404, 410];

#[derive(Debug, Error)]
pub enum PlayerError {
    /// Station has no endpoints at all
    #[error("no playlists available for station: {0}")]
    NoPlaylists(String),

    /// Playlist document could not be fetched or parsed
    #[error("{0}")]
    Playlist(String),

    /// Transport level failure (connect, TLS, reset)
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// DNS or routing failure that suggests there is no connectivity
    #[error("network unreachable: {0}")]
    NetworkDown(String),

    #[error("stream returned status {code}: {reason}")]
    NonRetryableStatus { code: u16, reason: String },

    #[error("stream returned status {code}: {reason}")]
    HttpStatus { code: u16, reason: String },

    #[error("read timeout: no data received for {0:?}")]
    ReadTimeout(Duration),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The attempt reached playback and then died
    #[error("{0}")]
    MidStreamDrop(String),

    #[error("audio output error: {0}")]
    Output(String),

    /// Every endpoint and retry path failed
    #[error("{0}")]
    Exhausted(String),

    #[error("playback cancelled")]
    Cancelled,
}

impl PlayerError {
    /// Build the status error for a non-200 response
    pub fn from_status(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if NON_RETRYABLE_STATUS.contains(&code) {
            Self::NonRetryableStatus { code, reason }
        } else {
            Self::HttpStatus { code, reason }
        }
    }

    /// Classify a failed request
    pub fn from_request(err: reqwest::Error) -> Self {
        if is_network_down(&err) {
            Self::NetworkDown(error_chain(&err))
        } else {
            Self::ConnectionFailed(error_chain(&err))
        }
    }

    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Self::NonRetryableStatus { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_network_down(&self) -> bool {
        matches!(self, Self::NetworkDown(_))
    }
}

/// Walk the source chain looking for signs of a dead network
pub(crate) fn is_network_down(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::NetworkUnreachable
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkDown
            ) {
                return true;
            }
        }
        let message = e.to_string();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return true;
        }
        current = e.source();
    }
    false
}

/// reqwest's top-level message hides the interesting part in the sources
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        message.push_str(": ");
        message.push_str(&e.to_string());
        current = e.source();
    }
    message
}
