//! Network side of a playback attempt
//!
//! - `open_stream`: HTTP GET with ICY opt-in and status classification
//! - `stream_pipe`: bounded byte pipe from the async reader to the blocking decoder
//! - `StreamEnd`: close-once completion latch shared by the attempt's tasks
//! - `pump_stream`: read loop with per-read timeout and ICY demuxing

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::EngineConfig;
use super::icy::{IcyDemuxer, IcyHeaders};
use crate::error::PlayerError;

// ============ Constants ============

/// Chunks buffered between the network task and the decoder
pub const PIPE_CAPACITY: usize = 64;

/// Initial capacity of the demuxed audio scratch buffer
const NETWORK_READ_SIZE: usize = 4096;

// ============ Connection ============

/// Build the HTTP client shared by stream and playlist requests
pub fn build_http_client(config: &EngineConfig) -> Result<reqwest::Client, PlayerError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout)
        .no_gzip();

    if let Some(proxy_url) = &config.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| PlayerError::ConnectionFailed(format!("invalid proxy {proxy_url}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| PlayerError::ConnectionFailed(e.to_string()))
}

/// Send the stream request and check the response status
///
/// Non-200 responses become `NonRetryableStatus` or `HttpStatus`.
pub async fn open_stream(
    client: &reqwest::Client,
    url: &str,
    response_timeout: Duration,
    token: &CancellationToken,
) -> Result<(reqwest::Response, IcyHeaders), PlayerError> {
    let request = client.get(url).header("Icy-MetaData", "1").send();

    let response = tokio::select! {
        _ = token.cancelled() => return Err(PlayerError::Cancelled),
        result = tokio::time::timeout(response_timeout, request) => match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(PlayerError::from_request(e)),
            Err(_) => {
                return Err(PlayerError::ConnectionFailed(format!(
                    "no response within {:?}",
                    response_timeout
                )));
            }
        },
    };

    let status = response.status();
    if status != StatusCode::OK {
        return Err(PlayerError::from_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown"),
        ));
    }

    let headers = IcyHeaders::from_headers(response.headers());
    tracing::debug!(
        url,
        metaint = headers.metaint,
        station = headers.station_name.as_deref().unwrap_or(""),
        bitrate = headers.bitrate.unwrap_or(0),
        "Stream connected"
    );
    Ok((response, headers))
}

// ============ Byte Pipe ============

/// Create a bounded pipe carrying audio bytes to the decoder
pub fn stream_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            chunk: Bytes::new(),
            position: 0,
        },
    )
}

/// Async end of the pipe; dropping it signals end of stream
pub struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl PipeWriter {
    /// Returns `false` once the reader is gone
    pub async fn send(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    /// Hand an error to the reader and close the pipe
    ///
    /// Never waits: if the pipe is full the reader is busy and will see the
    /// cancellation instead.
    pub fn fail(self, err: io::Error) {
        let _ = self.tx.try_send(Err(err));
    }
}

/// Blocking end of the pipe, read by the decoder
pub struct PipeReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    chunk: Bytes,
    position: u64,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.chunk.has_remaining() {
                let n = buf.len().min(self.chunk.remaining());
                self.chunk.copy_to_slice(&mut buf[..n]);
                self.position += n as u64;
                return Ok(n);
            }

            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
    }
}

/// Live streams only support position queries
impl Seek for PipeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            SeekFrom::Start(offset) if offset == self.position => Ok(offset),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "live stream is not seekable",
            )),
        }
    }
}

// ============ Completion Latch ============

/// Why an attempt's stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Input ran out cleanly
    Finished,
    /// Network or decoder failure
    Failed(String),
}

impl EndReason {
    /// Error reported for a stream that ended while playing
    pub fn into_error(self) -> PlayerError {
        match self {
            EndReason::Finished => {
                PlayerError::MidStreamDrop("stream ended unexpectedly".to_string())
            }
            EndReason::Failed(message) => {
                PlayerError::MidStreamDrop(format!("stream error: {message}"))
            }
        }
    }
}

/// Close-once latch: the first reason wins, later closes are ignored
#[derive(Debug, Clone, Default)]
pub struct StreamEnd {
    reason: Arc<OnceLock<EndReason>>,
    signal: CancellationToken,
}

impl StreamEnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call closed the latch
    pub fn finish(&self) -> bool {
        self.close(EndReason::Finished)
    }

    /// Returns `true` if this call closed the latch
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.close(EndReason::Failed(message.into()))
    }

    fn close(&self, reason: EndReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.signal.cancel();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn reason(&self) -> Option<EndReason> {
        self.reason.get().cloned()
    }

    /// Wait until some task closes the latch
    pub async fn wait(&self) -> EndReason {
        self.signal.cancelled().await;
        self.reason().unwrap_or(EndReason::Finished)
    }
}

// ============ Network Read Loop ============

/// Everything the read loop needs besides the byte stream
#[derive(Clone)]
pub struct PumpContext {
    pub token: CancellationToken,
    pub end: StreamEnd,
    pub read_timeout: Duration,
}

/// Move bytes from the network into the pipe until the stream ends
///
/// Each read is bounded by `read_timeout`, which catches connections that
/// stay open but stop delivering data. Titles found in the metadata are
/// handed to `on_title`.
pub async fn pump_stream<S, E, F>(
    stream: S,
    writer: PipeWriter,
    mut demuxer: IcyDemuxer,
    ctx: PumpContext,
    mut on_title: F,
) where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    F: FnMut(String),
{
    let mut stream = std::pin::pin!(stream);
    let mut audio = BytesMut::with_capacity(NETWORK_READ_SIZE);
    let mut received: u64 = 0;

    loop {
        let next = tokio::select! {
            _ = ctx.token.cancelled() => {
                tracing::debug!("Network reader cancelled after {} bytes", received);
                return;
            }
            next = tokio::time::timeout(ctx.read_timeout, stream.next()) => next,
        };

        let chunk = match next {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                if ctx.token.is_cancelled() {
                    return;
                }
                let message = format!("network read failed: {e}");
                tracing::warn!("{}", message);
                writer.fail(io::Error::new(io::ErrorKind::ConnectionAborted, message.clone()));
                ctx.end.fail(message);
                return;
            }
            Ok(None) => {
                // Dropping the writer lets the decoder drain and see EOF
                tracing::debug!("Network stream EOF after {} bytes", received);
                return;
            }
            Err(_) => {
                let message = PlayerError::ReadTimeout(ctx.read_timeout).to_string();
                tracing::warn!("{}", message);
                writer.fail(io::Error::new(io::ErrorKind::TimedOut, message.clone()));
                ctx.end.fail(message);
                return;
            }
        };

        received += chunk.len() as u64;
        if let Some(title) = demuxer.push(&chunk, &mut audio) {
            on_title(title);
        }

        if audio.is_empty() {
            continue;
        }

        let bytes = audio.split().freeze();
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            sent = writer.send(bytes) => {
                if !sent {
                    tracing::debug!("Decoder closed the pipe");
                    return;
                }
            }
        }
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn context(read_timeout: Duration) -> PumpContext {
        PumpContext {
            token: CancellationToken::new(),
            end: StreamEnd::new(),
            read_timeout,
        }
    }

    fn read_all(mut reader: PipeReader) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_latch_first_reason_wins() {
        let end = StreamEnd::new();
        assert!(!end.is_closed());
        assert!(end.fail("boom"));
        assert!(!end.finish());
        assert!(end.is_closed());
        assert_eq!(end.reason(), Some(EndReason::Failed("boom".to_string())));
    }

    #[tokio::test]
    async fn test_latch_wakes_waiter_once() {
        let end = StreamEnd::new();
        let waiter = {
            let end = end.clone();
            tokio::spawn(async move { end.wait().await })
        };
        end.finish();
        end.fail("late");
        assert_eq!(waiter.await.unwrap(), EndReason::Finished);
    }

    #[test]
    fn test_end_reason_messages() {
        assert_eq!(
            EndReason::Finished.into_error().to_string(),
            "stream ended unexpectedly"
        );
        assert_eq!(
            EndReason::Failed("reset".into()).into_error().to_string(),
            "stream error: reset"
        );
    }

    #[tokio::test]
    async fn test_pipe_reader_sees_bytes_then_eof() {
        let (writer, reader) = stream_pipe(4);
        let handle = tokio::task::spawn_blocking(move || read_all(reader));

        assert!(writer.send(Bytes::from_static(b"hello ")).await);
        assert!(writer.send(Bytes::from_static(b"world")).await);
        drop(writer);

        assert_eq!(handle.await.unwrap().unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_pipe_reader_sees_error() {
        let (writer, reader) = stream_pipe(4);
        writer.fail(io::Error::new(io::ErrorKind::TimedOut, "stalled"));
        let result = tokio::task::spawn_blocking(move || read_all(reader))
            .await
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_pipe_reader_seek_is_query_only() {
        let (_writer, mut reader) = stream_pipe(1);
        assert_eq!(reader.seek(SeekFrom::Current(0)).unwrap(), 0);
        assert_eq!(reader.seek(SeekFrom::Start(0)).unwrap(), 0);
        assert!(reader.seek(SeekFrom::Start(100)).is_err());
        assert!(reader.seek(SeekFrom::End(0)).is_err());
    }

    #[tokio::test]
    async fn test_pump_demuxes_and_publishes_title() {
        let mut body = vec![0x11u8; 4];
        body.push(2);
        let mut meta = b"StreamTitle='X - Y';".to_vec();
        meta.resize(32, 0);
        body.extend(meta);
        body.extend(vec![0x22u8; 4]);

        let chunks: Vec<Result<Bytes, io::Error>> =
            body.chunks(7).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        let (writer, reader) = stream_pipe(16);
        let ctx = context(Duration::from_secs(5));

        let mut titles = Vec::new();
        pump_stream(stream::iter(chunks), writer, IcyDemuxer::new(4), ctx.clone(), |t| {
            titles.push(t)
        })
        .await;

        assert_eq!(titles, vec!["X - Y".to_string()]);
        let audio = tokio::task::spawn_blocking(move || read_all(reader))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audio, [vec![0x11u8; 4], vec![0x22u8; 4]].concat());
        assert!(!ctx.end.is_closed());
    }

    #[tokio::test]
    async fn test_pump_read_timeout_fails_latch() {
        let (writer, _reader) = stream_pipe(4);
        let ctx = context(Duration::from_millis(50));
        let silent = stream::pending::<Result<Bytes, io::Error>>();

        pump_stream(silent, writer, IcyDemuxer::new(0), ctx.clone(), |_| {}).await;

        match ctx.end.reason() {
            Some(EndReason::Failed(message)) => assert!(message.starts_with("read timeout")),
            other => panic!("unexpected end reason: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pump_transport_error_fails_latch() {
        let (writer, _reader) = stream_pipe(4);
        let ctx = context(Duration::from_secs(5));
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
        ];

        pump_stream(stream::iter(chunks), writer, IcyDemuxer::new(0), ctx.clone(), |_| {}).await;

        assert!(matches!(ctx.end.reason(), Some(EndReason::Failed(m)) if m.contains("reset by peer")));
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancel() {
        let (writer, _reader) = stream_pipe(4);
        let ctx = context(Duration::from_secs(30));
        ctx.token.cancel();
        let silent = stream::pending::<Result<Bytes, io::Error>>();

        pump_stream(silent, writer, IcyDemuxer::new(0), ctx.clone(), |_| {}).await;
        assert!(!ctx.end.is_closed());
    }
}
