//! Station model consumed by the player
//!
//! Catalog lookups live elsewhere; the player only needs an id, a title
//! and the station's playlists in preference order.

use serde::{Deserialize, Serialize};

use crate::playlist::StreamDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub url: String,
    /// Audio format, e.g. `mp3` or `aac`
    pub format: String,
    /// Quality label, e.g. `highest` or `high`
    pub quality: String,
}

impl Playlist {
    /// Build a playlist entry, guessing format and quality from the URL
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let descriptor = StreamDescriptor::from_playlist_url(&url);
        Self {
            format: descriptor.format.to_lowercase(),
            quality: descriptor.quality.to_string(),
            url,
        }
    }

    fn is_mp3(&self) -> bool {
        self.format.eq_ignore_ascii_case("mp3")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    /// Playlists are already in the order they should be tried
    #[serde(default)]
    pub preranked: bool,
}

impl Station {
    pub fn new(id: impl Into<String>, title: impl Into<String>, playlists: Vec<Playlist>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            playlists,
            preranked: false,
        }
    }

    /// Station whose endpoints are given in the order they should be tried
    pub fn from_stream_urls<I, S>(id: impl Into<String>, title: impl Into<String>, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let playlists = urls.into_iter().map(Playlist::from_url).collect();
        Self {
            preranked: true,
            ..Self::new(id, title, playlists)
        }
    }

    /// Playlist URLs in preference order
    ///
    /// Highest-quality MP3 first, then the remaining MP3 playlists, then
    /// everything else. Order within each group is kept. A preranked
    /// station keeps its own order.
    pub fn ranked_playlist_urls(&self) -> Vec<String> {
        if self.preranked {
            return self.playlists.iter().map(|p| p.url.clone()).collect();
        }

        let best_mp3 = self
            .playlists
            .iter()
            .filter(|p| p.is_mp3() && p.quality.eq_ignore_ascii_case("highest"));
        let other_mp3 = self
            .playlists
            .iter()
            .filter(|p| p.is_mp3() && !p.quality.eq_ignore_ascii_case("highest"));
        let others = self.playlists.iter().filter(|p| !p.is_mp3());

        best_mp3
            .chain(other_mp3)
            .chain(others)
            .map(|p| p.url.clone())
            .collect()
    }
}
