//! Audio output seam and device helpers
//!
//! The player only talks to `AudioOutput`. The real implementation is an
//! `OutputHandle` driving a rodio sink on a dedicated thread; tests use a
//! recording stand-in.

use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamBuilder};

use super::source::QueueSource;
use super::volume::Volume;
use crate::error::PlayerError;

/// Where decoded audio ends up
///
/// Every method must return promptly; none may wait on the device.
pub trait AudioOutput: Send + Sync {
    /// Replace the current source and start playing it unpaused
    fn start(&self, source: QueueSource);

    /// Stop and drop the current source
    fn clear(&self);

    fn set_paused(&self, paused: bool);

    fn set_volume(&self, volume: Volume);
}

/// Output device info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
}

/// Open the default output, or a named device
pub fn open_output_stream(device_name: Option<&str>) -> Result<OutputStream, PlayerError> {
    match device_name {
        Some(name) => open_named_device(name),
        None => OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlayerError::Output(format!("failed to open default output: {}", e))),
    }
}

fn open_named_device(device_name: &str) -> Result<OutputStream, PlayerError> {
    let host = rodio::cpal::default_host();

    let device = host
        .output_devices()
        .map_err(|e| PlayerError::Output(format!("failed to enumerate devices: {}", e)))?
        .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        .ok_or_else(|| PlayerError::Output(format!("device not found: {}", device_name)))?;

    let config = device
        .default_output_config()
        .map_err(|e| PlayerError::Output(format!("failed to get device config: {}", e)))?;

    OutputStreamBuilder::from_device(device)
        .map_err(|e| PlayerError::Output(format!("failed to create stream builder: {}", e)))?
        .with_sample_rate(config.sample_rate().0)
        .open_stream()
        .map_err(|e| PlayerError::Output(format!("failed to open stream: {}", e)))
}

/// Output devices that report a usable default config
pub fn list_output_devices() -> Vec<AudioDevice> {
    let host = rodio::cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                if device.default_output_config().is_ok() {
                    devices.push(AudioDevice { name });
                }
            }
        }
    }

    devices
}
