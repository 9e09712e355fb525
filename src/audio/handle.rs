//! Non-blocking control of the audio output thread
//!
//! `OutputHandle` implements `AudioOutput` by sending commands to the
//! output thread and returning immediately.

use super::events::{OutputCommand, OutputCommandSender};
use super::output::AudioOutput;
use super::source::QueueSource;
use super::volume::Volume;

/// Handle for controlling the output thread
#[derive(Clone)]
pub struct OutputHandle {
    command_tx: OutputCommandSender,
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle")
            .field("closed", &self.command_tx.is_closed())
            .finish()
    }
}

impl OutputHandle {
    pub fn new(command_tx: OutputCommandSender) -> Self {
        Self { command_tx }
    }

    /// Ask the output thread to release the device and exit
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(OutputCommand::Shutdown);
    }

    fn send(&self, command: OutputCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::warn!("Audio output thread is gone, command dropped");
        }
    }
}

impl AudioOutput for OutputHandle {
    fn start(&self, source: QueueSource) {
        self.send(OutputCommand::Start { source });
    }

    fn clear(&self) {
        self.send(OutputCommand::Clear);
    }

    fn set_paused(&self, paused: bool) {
        self.send(OutputCommand::SetPaused { paused });
    }

    fn set_volume(&self, volume: Volume) {
        self.send(OutputCommand::SetVolume {
            amplitude: volume.amplitude(),
        });
    }
}
