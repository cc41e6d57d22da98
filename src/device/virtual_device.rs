//! Deterministic in-process sound device
//!
//! Time only moves when the caller advances it, which makes the engine's
//! tick-driven refill cycle reproducible in tests and offline tools.

use super::{SoundDevice, SoundInstance, StreamFormat};
use crate::{OplError, Result, BUFFER_COUNT};

/// Calls observed by a [`VirtualDevice`], in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device opened
    Open,
    /// Device closed
    Close,
    /// Buffer slot uploaded
    Commit {
        /// Slot index
        slot: usize,
    },
    /// Music instance started
    StartMusic {
        /// New instance
        instance: SoundInstance,
        /// Initial volume
        volume: u8,
    },
    /// Clock instance started
    StartClock {
        /// New instance
        instance: SoundInstance,
    },
    /// Instance stopped by the engine
    Stop {
        /// Stopped instance
        instance: SoundInstance,
    },
    /// Volume changed
    Volume {
        /// Target instance
        instance: SoundInstance,
        /// New volume
        volume: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstanceKind {
    Music,
    Clock,
}

#[derive(Debug, Clone)]
struct VirtualInstance {
    handle: SoundInstance,
    kind: InstanceKind,
    elapsed_frames: u64,
    playing: bool,
    volume: u8,
}

/// Sound device driven by an explicit clock
#[derive(Debug, Clone, Default)]
pub struct VirtualDevice {
    format: Option<StreamFormat>,
    slots: Vec<Vec<i16>>,
    instances: Vec<VirtualInstance>,
    next_handle: u32,
    events: Vec<DeviceEvent>,
    fail_open: bool,
}

impl VirtualDevice {
    /// Create a closed device
    pub fn new() -> Self {
        Self::default()
    }

    /// Device whose `open` fails, for exercising startup errors.
    pub fn failing() -> Self {
        VirtualDevice {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Format the device was opened with
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Advance playback time by `frames` for every playing instance.
    pub fn advance(&mut self, frames: u64) {
        for instance in self.instances.iter_mut().filter(|i| i.playing) {
            instance.elapsed_frames += frames;
        }
    }

    /// Advance playback time by `buffers` buffer lengths.
    pub fn advance_buffers(&mut self, buffers: u64) {
        let frames = self.format.map_or(0, |f| f.buffer_frames as u64);
        self.advance(buffers * frames);
    }

    /// Simulate the platform stopping every instance behind the engine's back.
    pub fn interrupt(&mut self) {
        for instance in &mut self.instances {
            instance.playing = false;
        }
    }

    /// Samples committed to `slot`
    pub fn slot(&self, slot: usize) -> &[i16] {
        self.slots.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    /// Observed calls
    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    /// Forget the observed calls.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Number of commits observed
    pub fn commit_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Commit { .. }))
            .count()
    }

    /// Current volume of an instance
    pub fn instance_volume(&self, instance: SoundInstance) -> Option<u8> {
        self.find(instance).map(|i| i.volume)
    }

    fn find(&self, handle: SoundInstance) -> Option<&VirtualInstance> {
        self.instances.iter().find(|i| i.handle == handle)
    }

    fn start(&mut self, kind: InstanceKind, volume: u8) -> Result<SoundInstance> {
        if self.format.is_none() {
            return Err(OplError::AudioDevice("device is not open".into()));
        }
        self.next_handle += 1;
        let handle = SoundInstance::new(self.next_handle)
            .ok_or_else(|| OplError::AudioDevice("instance handles exhausted".into()))?;
        self.instances.push(VirtualInstance {
            handle,
            kind,
            elapsed_frames: 0,
            playing: true,
            volume,
        });
        Ok(handle)
    }
}

impl SoundDevice for VirtualDevice {
    fn open(&mut self, format: StreamFormat) -> Result<()> {
        if self.fail_open {
            return Err(OplError::AudioDevice("no output available".into()));
        }
        self.format = Some(format);
        self.slots = vec![vec![0; format.buffer_samples()]; format.buffer_count.max(BUFFER_COUNT)];
        self.events.push(DeviceEvent::Open);
        Ok(())
    }

    fn close(&mut self) {
        if self.format.take().is_some() {
            self.instances.clear();
            self.slots.clear();
            self.events.push(DeviceEvent::Close);
        }
    }

    fn commit(&mut self, slot: usize, samples: &[i16]) {
        if let Some(target) = self.slots.get_mut(slot) {
            target.clear();
            target.extend_from_slice(samples);
            self.events.push(DeviceEvent::Commit { slot });
        }
    }

    fn play_music(&mut self, volume: u8) -> Result<SoundInstance> {
        let instance = self.start(InstanceKind::Music, volume)?;
        self.events.push(DeviceEvent::StartMusic { instance, volume });
        Ok(instance)
    }

    fn play_clock(&mut self) -> Result<SoundInstance> {
        let instance = self.start(InstanceKind::Clock, 0)?;
        self.events.push(DeviceEvent::StartClock { instance });
        Ok(instance)
    }

    fn stop_instance(&mut self, instance: SoundInstance) {
        if let Some(index) = self.instances.iter().position(|i| i.handle == instance) {
            self.instances.remove(index);
            self.events.push(DeviceEvent::Stop { instance });
        }
    }

    fn is_playing(&self, instance: SoundInstance) -> bool {
        self.find(instance).is_some_and(|i| i.playing)
    }

    fn loop_count(&self, instance: SoundInstance) -> u64 {
        let Some(format) = self.format else {
            return 0;
        };
        let Some(instance) = self.find(instance) else {
            return 0;
        };
        let loop_frames = match instance.kind {
            InstanceKind::Music => format.buffer_frames * format.buffer_count,
            InstanceKind::Clock => format.buffer_frames,
        } as u64;
        instance.elapsed_frames / loop_frames.max(1)
    }

    fn set_volume(&mut self, instance: SoundInstance, volume: u8) {
        if let Some(target) = self.instances.iter_mut().find(|i| i.handle == instance) {
            target.volume = volume;
            self.events.push(DeviceEvent::Volume { instance, volume });
        }
    }
}
