//! Decoding the audio byte stream into stereo frames
//!
//! `DecoderFactory` is the seam between the attempt and the codec. The
//! default factory runs symphonia through rodio's decoder; tests plug in a
//! raw PCM decoder so no encoded fixtures are needed.

use rodio::Source;
use rodio::decoder::DecoderBuilder;
use tokio_util::sync::CancellationToken;

use super::queue::{AudioFrame, FrameProducer};
use super::streaming::{PipeReader, StreamEnd};
use crate::error::PlayerError;
use crate::playlist::StreamDescriptor;

/// A decoder producing stereo frames at a fixed sample rate
pub trait StreamDecoder: Send {
    fn sample_rate(&self) -> u32;

    /// Next frame, or `None` at end of input
    fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// Opens a decoder on top of an attempt's byte pipe
///
/// `open` blocks while the decoder probes the stream, so it is always
/// called from the blocking pool.
pub trait DecoderFactory: Send + Sync {
    fn open(
        &self,
        reader: PipeReader,
        descriptor: &StreamDescriptor,
    ) -> Result<Box<dyn StreamDecoder>, PlayerError>;
}

/// Symphonia-backed decoder for MP3 and AAC streams
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoderFactory;

impl DecoderFactory for SymphoniaDecoderFactory {
    fn open(
        &self,
        reader: PipeReader,
        descriptor: &StreamDescriptor,
    ) -> Result<Box<dyn StreamDecoder>, PlayerError> {
        let (extension, mime_type) = format_hint(&descriptor.format);
        let decoder = DecoderBuilder::new()
            .with_data(reader)
            .with_seekable(false)
            .with_hint(extension)
            .with_mime_type(mime_type)
            .build()
            .map_err(|e| PlayerError::DecodeFailed(e.to_string()))?;

        tracing::debug!(
            "Decoder opened: {} Hz, {} channel(s)",
            decoder.sample_rate(),
            decoder.channels()
        );
        Ok(Box::new(SourceDecoder::new(decoder)))
    }
}

/// Probe hint for a stream format name
fn format_hint(format: &str) -> (&'static str, &'static str) {
    if format.eq_ignore_ascii_case("aac") {
        ("aac", "audio/aac")
    } else {
        ("mp3", "audio/mpeg")
    }
}

/// Adapts any interleaved rodio source to stereo frames
pub struct SourceDecoder<S> {
    source: S,
}

impl<S> SourceDecoder<S>
where
    S: Source<Item = f32> + Send,
{
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S> StreamDecoder for SourceDecoder<S>
where
    S: Source<Item = f32> + Send,
{
    fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    fn next_frame(&mut self) -> Option<AudioFrame> {
        // Channel count can change between spans, so read it per frame
        let channels = self.source.channels();
        let left = self.source.next()?;
        if channels < 2 {
            return Some([left, left]);
        }

        let right = self.source.next()?;
        for _ in 2..channels {
            self.source.next()?;
        }
        Some([left, right])
    }
}

/// Decode loop run on the blocking pool for one attempt
///
/// Pushes every frame into the queue, waiting when it is full. Reaching the
/// end of input without being cancelled closes the stream-end latch.
pub fn decode_and_buffer(
    mut decoder: Box<dyn StreamDecoder>,
    mut producer: FrameProducer,
    token: CancellationToken,
    end: StreamEnd,
) {
    let mut frames: u64 = 0;

    while !token.is_cancelled() {
        let Some(frame) = decoder.next_frame() else {
            break;
        };
        if !producer.push_blocking(frame, &token) {
            break;
        }
        frames += 1;
    }

    if token.is_cancelled() {
        tracing::debug!("Decode loop cancelled after {} frames", frames);
        return;
    }

    tracing::debug!("Decoder reached end of input after {} frames", frames);
    end.finish();
}
