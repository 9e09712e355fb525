//! Audio output thread
//!
//! rodio's `OutputStream` must live on the thread that created it, so the
//! sink is owned by a dedicated thread that processes `OutputCommand`s.
//! The thread only ever touches the sink; decoding happens elsewhere.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rodio::mixer::Mixer;
use rodio::{OutputStream, Sink};

use super::events::{OutputCommand, OutputCommandReceiver, output_command_channel};
use super::handle::OutputHandle;
use super::output::open_output_stream;
use super::source::QueueSource;
use crate::error::PlayerError;

pub struct OutputThreadHandle {
    handle: OutputHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl OutputThreadHandle {
    /// A cloneable handle implementing `AudioOutput`
    pub fn output(&self) -> OutputHandle {
        self.handle.clone()
    }

    /// Shut the thread down and wait for it to release the device
    pub fn join(mut self, timeout: Duration) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            self.handle.shutdown();

            let start = std::time::Instant::now();
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    return Ok(());
                }
                if start.elapsed() > timeout {
                    return Err("Audio output thread did not exit in time".to_string());
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        Ok(())
    }
}

impl Drop for OutputThreadHandle {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Spawn the output thread and wait until the device is open
///
/// Blocks while the device opens; call it from a blocking context.
pub fn spawn_output_thread(device_name: Option<&str>) -> Result<OutputThreadHandle, PlayerError> {
    let (command_tx, command_rx) = output_command_channel();
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), PlayerError>>(1);
    let device_name_owned = device_name.map(|s| s.to_string());

    let thread_handle = thread::Builder::new()
        .name("audio-output".to_string())
        .spawn(move || match open_output_stream(device_name_owned.as_deref()) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                output_thread_main(stream, command_rx);
            }
            Err(e) => {
                tracing::error!("Failed to open audio output: {}", e);
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| PlayerError::Output(format!("failed to spawn audio thread: {}", e)))?;

    ready_rx
        .recv()
        .map_err(|_| PlayerError::Output("audio thread exited during startup".to_string()))??;

    Ok(OutputThreadHandle {
        handle: OutputHandle::new(command_tx),
        thread_handle: Some(thread_handle),
    })
}

/// What the output thread remembers between commands
struct OutputState {
    sink: Option<Sink>,
    amplitude: f32,
}

/// Main loop for the output thread
///
/// Blocks on `command_rx.blocking_recv()` until shutdown or until every
/// handle is dropped.
fn output_thread_main(stream: OutputStream, mut command_rx: OutputCommandReceiver) {
    tracing::info!("Audio output thread started");

    let mixer = stream.mixer().clone();
    let mut state = OutputState {
        sink: None,
        amplitude: 1.0,
    };

    while let Some(cmd) = command_rx.blocking_recv() {
        match cmd {
            OutputCommand::Start { source } => handle_start(&mixer, &mut state, source),
            OutputCommand::Clear => handle_clear(&mut state),
            OutputCommand::SetPaused { paused } => handle_set_paused(&state, paused),
            OutputCommand::SetVolume { amplitude } => handle_set_volume(&mut state, amplitude),
            OutputCommand::Shutdown => break,
        }
    }

    handle_clear(&mut state);
    drop(stream);
    tracing::info!("Audio output thread stopped");
}

fn handle_start(mixer: &Mixer, state: &mut OutputState, source: QueueSource) {
    if let Some(old) = state.sink.take() {
        old.stop();
    }

    let sink = Sink::connect_new(mixer);
    sink.set_volume(state.amplitude);
    sink.append(source);
    sink.play();
    state.sink = Some(sink);
    tracing::debug!("Output sink started");
}

fn handle_clear(state: &mut OutputState) {
    if let Some(sink) = state.sink.take() {
        sink.stop();
        tracing::debug!("Output sink cleared");
    }
}

fn handle_set_paused(state: &OutputState, paused: bool) {
    let Some(sink) = &state.sink else {
        return;
    };
    if paused {
        sink.pause();
    } else {
        sink.play();
    }
}

fn handle_set_volume(state: &mut OutputState, amplitude: f32) {
    state.amplitude = amplitude;
    if let Some(sink) = &state.sink {
        sink.set_volume(amplitude);
    }
}
