//! Sound device layer
//!
//! The engine talks to the platform audio API through [`SoundDevice`]. A
//! device holds two committed buffer slots and plays them back to back in a
//! loop as the *music* instance. A second *clock* instance loops over one
//! buffer length; its completed-loop count tells the engine when the device
//! has finished a buffer and the next one must be filled.

#[cfg(feature = "streaming")]
pub mod rodio_device;
pub mod virtual_device;

#[cfg(feature = "streaming")]
pub use rodio_device::RodioDevice;
pub use virtual_device::{DeviceEvent, VirtualDevice};

use crate::Result;
use std::fmt;
use std::num::NonZeroU32;

/// Handle of a playing device instance. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundInstance(NonZeroU32);

impl SoundInstance {
    /// Wrap a raw handle; `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(SoundInstance)
    }

    /// Raw numeric handle
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SoundInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed stream layout negotiated when the device is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Frames per buffer slot
    pub buffer_frames: usize,
    /// Number of buffer slots played in a loop
    pub buffer_count: usize,
}

impl StreamFormat {
    /// Samples (not frames) per buffer slot
    pub fn buffer_samples(&self) -> usize {
        self.buffer_frames * self.channels as usize
    }
}

/// Platform audio API used by the engine
///
/// Implementations play the committed slots in order, looping forever, until
/// the music instance is stopped. The engine only ever writes a slot the
/// device is not currently playing.
pub trait SoundDevice {
    /// Allocate the buffer slots and acquire the output.
    fn open(&mut self, format: StreamFormat) -> Result<()>;

    /// Stop every instance and release the output. Idempotent.
    fn close(&mut self);

    /// Upload interleaved samples into buffer slot `slot`.
    fn commit(&mut self, slot: usize, samples: &[i16]);

    /// Start looping playback of the slots at `volume` (0..=100).
    fn play_music(&mut self, volume: u8) -> Result<SoundInstance>;

    /// Start the silent one-buffer clock loop.
    fn play_clock(&mut self) -> Result<SoundInstance>;

    /// Stop an instance; unknown handles are ignored.
    fn stop_instance(&mut self, instance: SoundInstance);

    /// Whether the instance is still playing
    fn is_playing(&self, instance: SoundInstance) -> bool;

    /// Completed loops of the instance since it started
    fn loop_count(&self, instance: SoundInstance) -> u64;

    /// Change the playback volume (0..=100) of an instance.
    fn set_volume(&mut self, instance: SoundInstance, volume: u8);
}
