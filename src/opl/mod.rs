//! FM synthesis backends
//!
//! Decoders drive a backend through register writes; the stream scheduler
//! pulls interleaved stereo PCM out of it. The backend is chosen once when the
//! engine is created and stays fixed for the lifetime of the process.

pub mod chip;
pub mod emulator;
pub mod operator;
pub mod tables;

pub use chip::OplChip;
pub use emulator::FmEmulator;

use crate::{OplError, Result};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Common interface for OPL synthesis backends
///
/// This trait allows the emulator configurations to be used interchangeably
/// behind a single owned `Box<dyn OplBackend>`.
///
/// # Example
///
/// ```
/// use opl_stream::{EmulatorKind, OplBackend};
///
/// let mut opl = EmulatorKind::Silverman.create(44_100);
/// opl.write(0x20, 0x01); // modulator: MULT = 1
/// opl.write(0x40, 0x10); // modulator level
/// opl.write(0x23, 0x01); // carrier: MULT = 1
/// opl.write(0x60, 0xF0); // attack rate
/// opl.write(0xA0, 0x44); // F-number low (0x244 = 440 Hz)
/// opl.write(0xB0, 0x32); // key on, block 4, F-number high
///
/// let mut frames = [0i16; 2 * 64];
/// opl.render(&mut frames);
/// ```
pub trait OplBackend: Send {
    /// Write a register of the currently selected chip or register bank.
    fn write(&mut self, reg: u8, value: u8);

    /// Select the chip (dual OPL2) or register bank (OPL3) for later writes.
    ///
    /// Backends with a single chip ignore selections other than 0.
    fn set_chip(&mut self, _chip: usize) {}

    /// Currently selected chip or register bank.
    fn chip(&self) -> usize {
        0
    }

    /// Render interleaved stereo frames; `out.len() / 2` frames are produced.
    fn render(&mut self, out: &mut [i16]);

    /// Reset every chip to its power-on state.
    fn reset(&mut self);

    /// Short human readable backend name.
    fn name(&self) -> &'static str;
}

/// Emulator configuration selected at engine initialisation.
///
/// The discriminants are the integer tags hosts have always passed to
/// initialise the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EmulatorKind {
    /// OPL3 core at the native chip rate, linearly interpolated
    #[default]
    Nuked = 1,
    /// OPL3 core rendered directly at the output rate
    DosBox = 2,
    /// OPL2 core rendered directly at the output rate
    Silverman = 3,
    /// OPL2 core at the native chip rate, sample-and-hold
    Satoh = 4,
    /// Two OPL2 cores, one per stereo side
    Dual = 5,
}

impl EmulatorKind {
    /// All configurations in tag order.
    pub const ALL: [EmulatorKind; 5] = [
        EmulatorKind::Nuked,
        EmulatorKind::DosBox,
        EmulatorKind::Silverman,
        EmulatorKind::Satoh,
        EmulatorKind::Dual,
    ];

    /// Look up a configuration by its integer tag (1..=5).
    pub fn from_tag(tag: i32) -> Result<Self> {
        Self::from_i32(tag).ok_or_else(|| OplError::Config(format!("Invalid emulator type value: {tag}")))
    }

    /// Integer tag of this configuration.
    pub fn tag(self) -> i32 {
        self as i32
    }

    /// Lowercase configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            EmulatorKind::Nuked => "nuked",
            EmulatorKind::DosBox => "dosbox",
            EmulatorKind::Silverman => "silverman",
            EmulatorKind::Satoh => "satoh",
            EmulatorKind::Dual => "dual",
        }
    }

    /// Build the backend for this configuration.
    pub fn create(self, sample_rate: u32) -> Box<dyn OplBackend> {
        Box::new(FmEmulator::new(self, sample_rate))
    }
}

impl fmt::Display for EmulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmulatorKind {
    type Err = OplError;

    fn from_str(value: &str) -> Result<Self> {
        let lower = value.to_ascii_lowercase();
        if let Some(kind) = Self::ALL.iter().find(|kind| kind.as_str() == lower) {
            return Ok(*kind);
        }
        match lower.parse::<i32>() {
            Ok(tag) => Self::from_tag(tag),
            Err(_) => Err(OplError::Config(format!("Unknown emulator: {value}"))),
        }
    }
}

/// Backend that accepts writes and renders silence.
///
/// Used to measure song lengths without disturbing the audible chip.
#[derive(Debug, Clone, Default)]
pub struct SilentOpl {
    chip: usize,
    writes: usize,
}

impl SilentOpl {
    /// Create a silent backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of register writes received since creation or reset.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl OplBackend for SilentOpl {
    fn write(&mut self, _reg: u8, _value: u8) {
        self.writes += 1;
    }

    fn set_chip(&mut self, chip: usize) {
        self.chip = chip;
    }

    fn chip(&self) -> usize {
        self.chip
    }

    fn render(&mut self, out: &mut [i16]) {
        out.fill(0);
    }

    fn reset(&mut self) {
        self.chip = 0;
        self.writes = 0;
    }

    fn name(&self) -> &'static str {
        "silent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_tag() {
        assert_eq!(EmulatorKind::from_tag(1).unwrap(), EmulatorKind::Nuked);
        assert_eq!(EmulatorKind::from_tag(5).unwrap(), EmulatorKind::Dual);
        assert!(EmulatorKind::from_tag(0).is_err());
        assert!(EmulatorKind::from_tag(6).is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("DOSBox".parse::<EmulatorKind>().unwrap(), EmulatorKind::DosBox);
        assert_eq!("4".parse::<EmulatorKind>().unwrap(), EmulatorKind::Satoh);
        assert!("adlib-gold".parse::<EmulatorKind>().is_err());
    }

    #[test]
    fn test_tags_round_trip() {
        for kind in EmulatorKind::ALL {
            assert_eq!(EmulatorKind::from_tag(kind.tag()).unwrap(), kind);
        }
    }

    #[test]
    fn test_silent_opl_renders_zeros() {
        let mut opl = SilentOpl::new();
        opl.write(0xB0, 0x20);
        let mut out = [7i16; 16];
        opl.render(&mut out);
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(opl.write_count(), 1);
    }
}
