//! Bounded frame queue between the decoder and the audio sink
//!
//! A single-producer single-consumer ring buffer. The decoder side blocks
//! when the ring is full; the sink side never blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use rtrb::{PushError, RingBuffer};
use tokio_util::sync::CancellationToken;

/// One stereo sample, left then right
pub type AudioFrame = [f32; 2];

/// Default queue capacity in frames
pub const FRAME_QUEUE_CAPACITY: usize = 8192;

/// How long the producer sleeps while the ring is full
const PUSH_BACKOFF: Duration = Duration::from_millis(2);

/// Create a new frame queue with the given capacity
pub fn frame_queue(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let capacity = capacity.max(1);
    let (producer, consumer) = RingBuffer::new(capacity);
    let level = QueueLevel {
        queued: Arc::new(AtomicUsize::new(0)),
        capacity,
    };

    (
        FrameProducer {
            inner: producer,
            level: level.clone(),
        },
        FrameConsumer {
            inner: consumer,
            level,
        },
    )
}

/// Read-only view of how full a queue is
#[derive(Debug, Clone)]
pub struct QueueLevel {
    queued: Arc<AtomicUsize>,
    capacity: usize,
}

impl QueueLevel {
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Fill level as an integer percentage
    pub fn health(&self) -> u8 {
        (self.queued().min(self.capacity) * 100 / self.capacity) as u8
    }
}

/// Decoder side of the queue
pub struct FrameProducer {
    inner: rtrb::Producer<AudioFrame>,
    level: QueueLevel,
}

impl FrameProducer {
    /// Push a frame, waiting while the queue is full
    ///
    /// Returns `false` if `token` was cancelled before the frame fit.
    pub fn push_blocking(&mut self, frame: AudioFrame, token: &CancellationToken) -> bool {
        let mut frame = frame;
        loop {
            // Count before the frame becomes visible so the consumer never
            // decrements below zero.
            self.level.queued.fetch_add(1, Ordering::AcqRel);
            match self.inner.push(frame) {
                Ok(()) => return true,
                Err(PushError::Full(rejected)) => {
                    self.level.queued.fetch_sub(1, Ordering::AcqRel);
                    if token.is_cancelled() {
                        return false;
                    }
                    frame = rejected;
                    thread::sleep(PUSH_BACKOFF);
                }
            }
        }
    }

    pub fn level(&self) -> QueueLevel {
        self.level.clone()
    }
}

/// Sink side of the queue
pub struct FrameConsumer {
    inner: rtrb::Consumer<AudioFrame>,
    level: QueueLevel,
}

impl FrameConsumer {
    /// Take the oldest frame without blocking
    pub fn try_pop(&mut self) -> Option<AudioFrame> {
        let frame = self.inner.pop().ok()?;
        self.level.queued.fetch_sub(1, Ordering::AcqRel);
        Some(frame)
    }

    pub fn level(&self) -> QueueLevel {
        self.level.clone()
    }
}
