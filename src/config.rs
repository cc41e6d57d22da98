//! Engine configuration
//!
//! Only the emulator and the buffer length are configurable; the output format
//! is fixed at 44.1 kHz, 16-bit stereo with two alternating buffers.

use crate::device::StreamFormat;
use crate::opl::EmulatorKind;
use crate::{OplError, Result, BITS_PER_SAMPLE, BUFFER_COUNT, CHANNELS, DEFAULT_BUFFER_FRAMES, SAMPLE_RATE};
use serde::{Deserialize, Serialize};

/// Buffer lengths must be a multiple of this many frames.
pub const BUFFER_FRAME_GRANULARITY: usize = 256;
/// Largest accepted buffer length in frames.
pub const MAX_BUFFER_FRAMES: usize = 65_536;

/// Settings chosen once when the engine starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// FM emulator configuration
    pub emulator: EmulatorKind,
    /// Frames per stream buffer
    pub buffer_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            emulator: EmulatorKind::default(),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

impl EngineConfig {
    /// Default settings with the given emulator.
    pub fn with_emulator(emulator: EmulatorKind) -> Self {
        EngineConfig {
            emulator,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration.
    ///
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| OplError::Config(format!("Invalid engine configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| OplError::Config(e.to_string()))
    }

    /// Check the buffer geometry.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_frames == 0
            || self.buffer_frames % BUFFER_FRAME_GRANULARITY != 0
            || self.buffer_frames > MAX_BUFFER_FRAMES
        {
            return Err(OplError::Config(format!(
                "buffer_frames must be a non-zero multiple of {} up to {}, got {}",
                BUFFER_FRAME_GRANULARITY, MAX_BUFFER_FRAMES, self.buffer_frames
            )));
        }
        Ok(())
    }

    /// Stream format handed to the sound device
    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            bits_per_sample: BITS_PER_SAMPLE,
            buffer_frames: self.buffer_frames,
            buffer_count: BUFFER_COUNT,
        }
    }
}
