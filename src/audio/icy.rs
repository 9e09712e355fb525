//! ICY inline metadata framing
//!
//! Shoutcast/Icecast servers that receive `Icy-MetaData: 1` interleave the
//! audio bytes with metadata blocks every `icy-metaint` bytes:
//!
//! ```text
//! [metaint audio bytes][len byte][len * 16 metadata bytes][metaint audio bytes]...
//! ```
//!
//! `IcyDemuxer` undoes that framing for arbitrarily split network reads.

use bytes::BytesMut;
use reqwest::header::HeaderMap;

/// Largest metadata block that is parsed; longer ones are skipped
pub const ICY_METADATA_MAX_LEN: usize = 4080;

const STREAM_TITLE_PREFIX: &str = "StreamTitle='";
const STREAM_TITLE_SUFFIX: &str = "';";

/// Headers parsed from an ICY stream response
#[derive(Debug, Clone, Default)]
pub struct IcyHeaders {
    pub metaint: usize,
    pub station_name: Option<String>,
    pub content_type: Option<String>,
    pub bitrate: Option<u32>,
}

impl IcyHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        };

        Self {
            metaint: text("icy-metaint")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0),
            station_name: text("icy-name").filter(|s| !s.is_empty()),
            content_type: text("content-type"),
            bitrate: text("icy-br").and_then(|v| v.parse::<u32>().ok()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Inside an audio run
    Audio { remaining: usize },
    /// Next byte is the metadata length
    Length,
    /// Inside a metadata block
    Metadata { remaining: usize, discard: bool },
}

/// Splits an ICY byte stream into audio bytes and track titles
#[derive(Debug)]
pub struct IcyDemuxer {
    metaint: usize,
    max_metadata_len: usize,
    state: FrameState,
    metadata: Vec<u8>,
}

impl IcyDemuxer {
    /// `metaint == 0` disables framing and passes everything through
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            max_metadata_len: ICY_METADATA_MAX_LEN,
            state: FrameState::Audio { remaining: metaint },
            metadata: Vec::new(),
        }
    }

    #[cfg(test)]
    fn with_metadata_limit(mut self, limit: usize) -> Self {
        self.max_metadata_len = limit;
        self
    }

    /// Feed one network read
    ///
    /// Audio bytes are appended to `audio`. Returns the last track title
    /// completed within this read, if any.
    pub fn push(&mut self, mut input: &[u8], audio: &mut BytesMut) -> Option<String> {
        if self.metaint == 0 {
            audio.extend_from_slice(input);
            return None;
        }

        let mut title = None;
        while !input.is_empty() {
            match self.state {
                FrameState::Audio { remaining } => {
                    let n = remaining.min(input.len());
                    audio.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    self.state = if remaining == n {
                        FrameState::Length
                    } else {
                        FrameState::Audio {
                            remaining: remaining - n,
                        }
                    };
                }
                FrameState::Length => {
                    let len = input[0] as usize * 16;
                    input = &input[1..];
                    self.metadata.clear();
                    self.state = if len == 0 {
                        FrameState::Audio {
                            remaining: self.metaint,
                        }
                    } else {
                        let discard = len > self.max_metadata_len;
                        if discard {
                            tracing::warn!(len, "Skipping oversized ICY metadata block");
                        }
                        FrameState::Metadata {
                            remaining: len,
                            discard,
                        }
                    };
                }
                FrameState::Metadata { remaining, discard } => {
                    let n = remaining.min(input.len());
                    if !discard {
                        self.metadata.extend_from_slice(&input[..n]);
                    }
                    input = &input[n..];

                    if remaining == n {
                        if !discard {
                            if let Some(found) = extract_stream_title(&self.metadata) {
                                title = Some(found);
                            }
                        }
                        self.state = FrameState::Audio {
                            remaining: self.metaint,
                        };
                    } else {
                        self.state = FrameState::Metadata {
                            remaining: remaining - n,
                            discard,
                        };
                    }
                }
            }
        }
        title
    }
}

/// Extract the `StreamTitle='...';` value from a metadata block
pub fn extract_stream_title(metadata: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(metadata);
    let start = text.find(STREAM_TITLE_PREFIX)? + STREAM_TITLE_PREFIX.len();
    let rest = &text[start..];
    let end = rest.find(STREAM_TITLE_SUFFIX)?;
    if end == 0 {
        return None;
    }
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a metadata block (length byte + padded payload)
    fn meta_block(payload: &str) -> Vec<u8> {
        let blocks = payload.len().div_ceil(16);
        let mut out = vec![blocks as u8];
        out.extend_from_slice(payload.as_bytes());
        out.resize(1 + blocks * 16, 0);
        out
    }

    #[test]
    fn test_extract_stream_title() {
        assert_eq!(
            extract_stream_title(b"StreamTitle='Artist - Song';StreamUrl='';"),
            Some("Artist - Song".to_string())
        );
        assert_eq!(
            extract_stream_title(b"StreamTitle='It's Alright';\0\0"),
            Some("It's Alright".to_string())
        );
        assert_eq!(extract_stream_title(b"StreamTitle='';"), None);
        assert_eq!(extract_stream_title(b"StreamUrl='x';"), None);
        assert_eq!(extract_stream_title(b"StreamTitle='unterminated"), None);
    }

    #[test]
    fn test_passthrough_without_metaint() {
        let mut demuxer = IcyDemuxer::new(0);
        let mut audio = BytesMut::new();
        assert_eq!(demuxer.push(b"StreamTitle='x';", &mut audio), None);
        assert_eq!(&audio[..], b"StreamTitle='x';");
    }

    #[test]
    fn test_title_at_metaint_offset() {
        let mut stream = vec![0xAA; 8];
        stream.extend(meta_block("StreamTitle='X - Y';"));
        stream.extend(vec![0xBB; 8]);

        let mut demuxer = IcyDemuxer::new(8);
        let mut audio = BytesMut::new();
        let title = demuxer.push(&stream, &mut audio);

        assert_eq!(title.as_deref(), Some("X - Y"));
        let mut expected = vec![0xAA; 8];
        expected.extend(vec![0xBB; 8]);
        assert_eq!(&audio[..], &expected[..]);
    }

    #[test]
    fn test_split_reads() {
        let mut stream = vec![1u8; 5];
        stream.extend(meta_block("StreamTitle='Split';"));
        stream.extend(vec![2u8; 5]);

        let mut demuxer = IcyDemuxer::new(5);
        let mut audio = BytesMut::new();
        let mut titles = Vec::new();
        for byte in &stream {
            if let Some(title) = demuxer.push(std::slice::from_ref(byte), &mut audio) {
                titles.push(title);
            }
        }

        assert_eq!(titles, vec!["Split".to_string()]);
        assert_eq!(audio.len(), 10);
        assert!(audio[..5].iter().all(|b| *b == 1));
        assert!(audio[5..].iter().all(|b| *b == 2));
    }

    #[test]
    fn test_zero_length_block() {
        let mut stream = vec![7u8; 4];
        stream.push(0);
        stream.extend(vec![8u8; 4]);
        stream.push(0);

        let mut demuxer = IcyDemuxer::new(4);
        let mut audio = BytesMut::new();
        assert_eq!(demuxer.push(&stream, &mut audio), None);
        assert_eq!(audio.len(), 8);
    }

    #[test]
    fn test_oversized_block_is_skipped() {
        let mut stream = vec![3u8; 4];
        stream.extend(meta_block("StreamTitle='Too Long For The Limit';"));
        stream.extend(vec![4u8; 4]);

        let mut demuxer = IcyDemuxer::new(4).with_metadata_limit(16);
        let mut audio = BytesMut::new();
        assert_eq!(demuxer.push(&stream, &mut audio), None);
        assert_eq!(audio.len(), 8);
        assert!(audio[4..].iter().all(|b| *b == 4));
    }

    #[test]
    fn test_latest_title_wins() {
        let mut stream = vec![0u8; 2];
        stream.extend(meta_block("StreamTitle='First';"));
        stream.extend(vec![0u8; 2]);
        stream.extend(meta_block("StreamTitle='Second';"));

        let mut demuxer = IcyDemuxer::new(2);
        let mut audio = BytesMut::new();
        assert_eq!(demuxer.push(&stream, &mut audio).as_deref(), Some("Second"));
    }

    #[test]
    fn test_parse_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("icy-metaint", "16000".parse().unwrap());
        headers.insert("icy-name", "Groove Salad".parse().unwrap());
        headers.insert("icy-br", "128".parse().unwrap());

        let parsed = IcyHeaders::from_headers(&headers);
        assert_eq!(parsed.metaint, 16000);
        assert_eq!(parsed.station_name.as_deref(), Some("Groove Salad"));
        assert_eq!(parsed.bitrate, Some(128));

        let mut headers = HeaderMap::new();
        headers.insert("icy-metaint", "bogus".parse().unwrap());
        assert_eq!(IcyHeaders::from_headers(&headers).metaint, 0);
    }
}
