//! Perceptual volume curve
//!
//! User volume is a 0-100 percentage. The sink wants a linear amplitude.
//! In between sits a gain value in base-2 log units, so equal steps of the
//! slider sound roughly equally loud.

/// Gain at the quiet end of the slider
pub const MIN_GAIN: f32 = -10.0;

/// Shape of the percent to gain curve
pub const VOLUME_CURVE_EXPONENT: f32 = 0.5;

/// Volume used when nothing has been configured
pub const DEFAULT_VOLUME: u8 = 70;

/// Map a volume percentage to a gain value in `[MIN_GAIN, 0]`
pub fn to_gain(percent: f32) -> f32 {
    if percent <= 0.0 {
        return MIN_GAIN;
    }
    if percent >= 100.0 {
        return 0.0;
    }
    let normalized = percent / 100.0;
    (1.0 - normalized.powf(VOLUME_CURVE_EXPONENT)) * MIN_GAIN
}

/// Convert gain to the linear amplitude multiplier the sink applies
pub fn gain_to_amplitude(gain: f32) -> f32 {
    2f32.powf(gain)
}

pub fn clamp_volume(percent: i32) -> u8 {
    percent.clamp(0, 100) as u8
}

/// A resolved volume setting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume {
    percent: u8,
    gain: f32,
    muted: bool,
}

impl Volume {
    pub fn from_percent(percent: i32) -> Self {
        let percent = clamp_volume(percent);
        Self {
            percent,
            gain: to_gain(percent as f32),
            muted: percent == 0,
        }
    }

    /// Silence output while remembering the percentage
    pub fn muted(self) -> Self {
        Self {
            muted: true,
            ..self
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Linear amplitude for the sink, zero while muted
    pub fn amplitude(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            gain_to_amplitude(self.gain)
        }
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::from_percent(DEFAULT_VOLUME as i32)
    }
}
