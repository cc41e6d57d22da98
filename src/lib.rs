//! OPL2/OPL3 chiptune streaming engine
//!
//! Decodes AdLib register streams (IMF, RAW, DRO) and renders them through a
//! software FM synthesizer into two alternating fixed-size PCM buffers. The
//! host application calls [`Engine::tick`] once per frame; the engine refills
//! whichever buffer the sound device has just finished playing.
//!
//! # Features
//! - Five selectable FM emulator configurations (OPL2, OPL3, dual OPL2)
//! - Double-buffered streaming with loop counting and a two-buffer fade-out
//! - Per-song volume, subsong selection, seeking and position tracking
//! - Pluggable decoders and sound devices
//!
//! # Crate feature flags
//! - `imf`, `raw`, `dro` (default): Built-in song decoders
//! - `streaming` (opt-in): Real-time output through `rodio` plus the demo host
//! - `export-wav` (opt-in): Offline rendering to WAV through `hound`
//!
//! # Quick start
//! ```no_run
//! use opl_stream::{Engine, EngineConfig, VirtualDevice};
//!
//! let mut engine = Engine::new(EngineConfig::default(), VirtualDevice::new()).unwrap();
//! let data = std::fs::read("song.imf").unwrap();
//! let id = engine.load_song("song.imf", &data).unwrap();
//! engine.play(id, 0).unwrap();
//! loop {
//!     // once per host frame
//!     engine.tick();
//!     # break;
//! }
//! ```

#![warn(missing_docs)]

pub mod config; // Engine configuration
pub mod decoder; // Song decoders and data provider
pub mod device; // Sound device layer
pub mod engine; // Playback session controller
#[cfg(feature = "export-wav")]
pub mod export; // Offline rendering
pub mod opl; // FM synthesis backends
pub mod song; // Decoder adapter
pub mod streaming; // Double-buffer scheduler

use std::fmt;

/// Output sample rate in Hz. Fixed for the lifetime of the process.
pub const SAMPLE_RATE: u32 = 44_100;
/// Output channel count (interleaved stereo).
pub const CHANNELS: u16 = 2;
/// Output sample width.
pub const BITS_PER_SAMPLE: u16 = 16;
/// Number of alternating stream buffers.
pub const BUFFER_COUNT: usize = 2;
/// Default buffer length in sample-frames.
pub const DEFAULT_BUFFER_FRAMES: usize = 4096;

/// 1-based identifier of a loaded song. Zero is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SongId(pub u32);

impl SongId {
    /// Raw numeric value as exposed to the host.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error types for engine operations
#[derive(thiserror::Error, Debug)]
pub enum OplError {
    /// Song identifier is zero, out of range or deleted
    #[error("Invalid music ID: {0}")]
    InvalidSongId(u32),

    /// Decoding a song failed; nothing was registered
    #[error("Error loading music: {name}\n{reason}")]
    Load {
        /// File name the song was loaded under
        name: String,
        /// Human readable cause
        reason: String,
    },

    /// An external data entry with this name is already registered
    #[error("An external data entry already exists for '{0}'")]
    DataEntryExists(String),

    /// Operation is not allowed on the song that is currently playing
    #[error("Music {0} is currently playing")]
    SongPlaying(SongId),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error writing an exported audio file
    #[error("Export error: {0}")]
    Export(String),

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for OplError {
    /// Converts a String into `OplError::Other`.
    ///
    /// Prefer the specific variants where the failure has a category.
    fn from(msg: String) -> Self {
        OplError::Other(msg)
    }
}

impl From<&str> for OplError {
    fn from(msg: &str) -> Self {
        OplError::Other(msg.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, OplError>;

/// Playback state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No song selected.
    #[default]
    Stopped,
    /// A song is selected and streaming.
    Playing,
    /// A song is selected, device output halted, state preserved.
    Paused,
}

// Public API exports
pub use config::EngineConfig;
pub use decoder::{DataProvider, DecodeError, DecoderPlugin, DecoderRegistry, SongDecoder};
#[cfg(feature = "streaming")]
pub use device::RodioDevice;
pub use device::{DeviceEvent, SoundDevice, SoundInstance, StreamFormat, VirtualDevice};
pub use engine::Engine;
pub use opl::{EmulatorKind, FmEmulator, OplBackend, SilentOpl};
pub use song::{SeekMode, Song};
pub use streaming::{FillOutcome, StreamScheduler};
