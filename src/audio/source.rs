//! Sink adapter - feeds the audio sink from the frame queue
//!
//! Runs inside the sink's real-time callback, so it never blocks: an empty
//! queue or a cancelled attempt produces silence instead of waiting.

use std::time::Duration;

use rodio::Source;
use tokio_util::sync::CancellationToken;

use super::fade::FadeIn;
use super::queue::{AudioFrame, FrameConsumer};

const SILENCE: AudioFrame = [0.0, 0.0];

/// Endless stereo source pulling frames from a `FrameConsumer`
pub struct QueueSource {
    consumer: FrameConsumer,
    fade: FadeIn,
    sample_rate: u32,
    /// Cancelled when the owning attempt ends
    token: CancellationToken,
    /// Frame currently being emitted
    frame: AudioFrame,
    /// Next channel of `frame` to emit
    channel: usize,
    underruns: u64,
}

impl QueueSource {
    pub fn new(
        consumer: FrameConsumer,
        sample_rate: u32,
        fade: FadeIn,
        token: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            fade,
            sample_rate,
            token,
            frame: SILENCE,
            channel: 0,
            underruns: 0,
        }
    }

    /// Number of frames that were replaced by silence
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    fn next_frame(&mut self) -> AudioFrame {
        if self.token.is_cancelled() {
            return SILENCE;
        }

        match self.consumer.try_pop() {
            Some(frame) => self.fade.apply(frame),
            None => {
                self.underruns += 1;
                SILENCE
            }
        }
    }
}

impl Iterator for QueueSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.channel == 0 {
            self.frame = self.next_frame();
        }
        let sample = self.frame[self.channel];
        self.channel = (self.channel + 1) % 2;
        Some(sample)
    }
}

impl Source for QueueSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
