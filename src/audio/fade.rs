//! Fade-in ramp - splice into a live stream without a pop
//!
//! A pure per-frame gain ramp. It knows nothing about the queue or the
//! sink; the sink adapter feeds it every real frame it outputs.

use std::time::Duration;

use super::queue::AudioFrame;

/// Default fade-in length for a new connection
pub const DEFAULT_FADE_IN: Duration = Duration::from_millis(50);

/// Linear gain ramp over the first frames of a connection
#[derive(Debug, Clone)]
pub struct FadeIn {
    /// Frames already faded
    position: u32,
    /// Frames in the whole ramp
    total: u32,
}

impl FadeIn {
    /// Create a ramp covering `duration` at `sample_rate`
    pub fn new(sample_rate: u32, duration: Duration) -> Self {
        let total = (sample_rate as u64 * duration.as_millis() as u64 / 1000) as u32;
        Self { position: 0, total }
    }

    /// A ramp that is already finished
    pub fn disabled() -> Self {
        Self {
            position: 0,
            total: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.total
    }

    /// Scale one frame and advance the ramp
    pub fn apply(&mut self, frame: AudioFrame) -> AudioFrame {
        if self.is_done() {
            return frame;
        }

        let scale = self.position as f32 / self.total as f32;
        self.position += 1;
        [frame[0] * scale, frame[1] * scale]
    }
}
