//! Sound device backed by rodio
//!
//! The two buffer slots live behind a shared mutex. A [`rodio::Source`] plays
//! them back to back, copying one whole slot at a time to keep lock traffic
//! low, and counts every slot boundary it crosses. That count drives the
//! clock instance.

use super::{SoundDevice, SoundInstance, StreamFormat};
use crate::{OplError, Result, BUFFER_COUNT};
use parking_lot::Mutex;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type SharedSlots = Arc<Mutex<Vec<Vec<i16>>>>;

/// Source that loops over the committed slots
struct SlotSource {
    slots: SharedSlots,
    slot: usize,
    /// Local copy of the slot being played
    current: Vec<i16>,
    pos: usize,
    crossings: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    channels: u16,
    sample_rate: u32,
}

impl SlotSource {
    fn new(slots: SharedSlots, format: StreamFormat, crossings: Arc<AtomicU64>, stopped: Arc<AtomicBool>) -> Self {
        let current = slots.lock().first().cloned().unwrap_or_default();
        SlotSource {
            slots,
            slot: 0,
            current,
            pos: 0,
            crossings,
            stopped,
            channels: format.channels,
            sample_rate: format.sample_rate,
        }
    }

    fn advance_slot(&mut self) {
        let slots = self.slots.lock();
        let count = slots.len().max(1);
        self.slot = (self.slot + 1) % count;
        self.current.clear();
        if let Some(next) = slots.get(self.slot) {
            self.current.extend_from_slice(next);
        }
        drop(slots);
        self.pos = 0;
        self.crossings.fetch_add(1, Ordering::Release);
    }
}

impl Iterator for SlotSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.stopped.load(Ordering::Relaxed) {
            return None;
        }
        if self.pos >= self.current.len() {
            self.advance_slot();
            if self.current.is_empty() {
                return Some(0);
            }
        }
        let sample = self.current[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for SlotSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.current.len().saturating_sub(self.pos).max(1))
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

struct MusicInstance {
    handle: SoundInstance,
    sink: Sink,
    crossings: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
}

impl MusicInstance {
    fn is_playing(&self) -> bool {
        !self.stopped.load(Ordering::Relaxed) && !self.sink.empty()
    }
}

/// Audio output through the default rodio device
pub struct RodioDevice {
    stream: Option<(OutputStream, OutputStreamHandle)>,
    format: Option<StreamFormat>,
    slots: SharedSlots,
    music: Option<MusicInstance>,
    clock: Option<SoundInstance>,
    next_handle: u32,
}

impl RodioDevice {
    /// Create a closed device; the output is acquired by `open`.
    pub fn new() -> Self {
        RodioDevice {
            stream: None,
            format: None,
            slots: Arc::new(Mutex::new(Vec::new())),
            music: None,
            clock: None,
            next_handle: 0,
        }
    }

    fn next_instance(&mut self) -> Result<SoundInstance> {
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        SoundInstance::new(self.next_handle).ok_or_else(|| OplError::AudioDevice("invalid instance handle".into()))
    }
}

impl Default for RodioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundDevice for RodioDevice {
    fn open(&mut self, format: StreamFormat) -> Result<()> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| OplError::AudioDevice(format!("Failed to create audio stream: {}", e)))?;
        *self.slots.lock() = vec![vec![0; format.buffer_samples()]; format.buffer_count.max(BUFFER_COUNT)];
        self.stream = Some((stream, handle));
        self.format = Some(format);
        info!(
            "Audio device opened: {} Hz, {} channels, {} frames x {} buffers",
            format.sample_rate, format.channels, format.buffer_frames, format.buffer_count
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Some(music) = self.music.take() {
            music.stopped.store(true, Ordering::Relaxed);
            music.sink.stop();
        }
        self.clock = None;
        if self.stream.take().is_some() {
            debug!("Audio device closed");
        }
        self.format = None;
    }

    fn commit(&mut self, slot: usize, samples: &[i16]) {
        let mut slots = self.slots.lock();
        if let Some(target) = slots.get_mut(slot) {
            target.clear();
            target.extend_from_slice(samples);
        }
    }

    fn play_music(&mut self, volume: u8) -> Result<SoundInstance> {
        let (Some(format), Some((_, handle))) = (self.format, self.stream.as_ref()) else {
            return Err(OplError::AudioDevice("device is not open".into()));
        };
        let sink = Sink::try_new(handle)
            .map_err(|e| OplError::AudioDevice(format!("Failed to create audio sink: {}", e)))?;
        let crossings = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        sink.set_volume(volume as f32 / 100.0);
        sink.append(SlotSource::new(
            Arc::clone(&self.slots),
            format,
            Arc::clone(&crossings),
            Arc::clone(&stopped),
        ));

        if let Some(old) = self.music.take() {
            old.stopped.store(true, Ordering::Relaxed);
            old.sink.stop();
        }
        let handle = self.next_instance()?;
        self.music = Some(MusicInstance {
            handle,
            sink,
            crossings,
            stopped,
        });
        Ok(handle)
    }

    fn play_clock(&mut self) -> Result<SoundInstance> {
        if self.music.is_none() {
            return Err(OplError::AudioDevice("clock needs a playing music instance".into()));
        }
        let handle = self.next_instance()?;
        self.clock = Some(handle);
        Ok(handle)
    }

    fn stop_instance(&mut self, instance: SoundInstance) {
        if self.clock == Some(instance) {
            self.clock = None;
        }
        if self.music.as_ref().is_some_and(|m| m.handle == instance) {
            if let Some(music) = self.music.take() {
                music.stopped.store(true, Ordering::Relaxed);
                music.sink.stop();
            }
        }
    }

    fn is_playing(&self, instance: SoundInstance) -> bool {
        let Some(music) = &self.music else {
            return false;
        };
        (music.handle == instance || self.clock == Some(instance)) && music.is_playing()
    }

    fn loop_count(&self, instance: SoundInstance) -> u64 {
        let Some(music) = &self.music else {
            return 0;
        };
        let crossings = music.crossings.load(Ordering::Acquire);
        if self.clock == Some(instance) {
            crossings
        } else if music.handle == instance {
            crossings / BUFFER_COUNT as u64
        } else {
            0
        }
    }

    fn set_volume(&mut self, instance: SoundInstance, volume: u8) {
        if let Some(music) = self.music.as_ref().filter(|m| m.handle == instance) {
            music.sink.set_volume(volume as f32 / 100.0);
        }
    }
}

impl Drop for RodioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
            buffer_frames: 4,
            buffer_count: 2,
        }
    }

    #[test]
    fn test_slot_source_counts_crossings() {
        let slots: SharedSlots = Arc::new(Mutex::new(vec![vec![1; 8], vec![2; 8]]));
        let crossings = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let mut source = SlotSource::new(slots, format(), Arc::clone(&crossings), Arc::clone(&stopped));

        let first: Vec<i16> = source.by_ref().take(8).collect();
        assert_eq!(first, vec![1; 8]);
        assert_eq!(crossings.load(Ordering::Acquire), 0);

        let second: Vec<i16> = source.by_ref().take(8).collect();
        assert_eq!(second, vec![2; 8]);
        assert_eq!(crossings.load(Ordering::Acquire), 1);

        stopped.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }

    #[test]
    fn test_slot_source_sees_recommitted_slot() {
        let slots: SharedSlots = Arc::new(Mutex::new(vec![vec![1; 8], vec![2; 8]]));
        let crossings = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let mut source = SlotSource::new(Arc::clone(&slots), format(), crossings, stopped);

        // play slot 0, enter slot 1, then refill slot 0
        let _: Vec<i16> = source.by_ref().take(9).collect();
        slots.lock()[0] = vec![3; 8];
        let rest: Vec<i16> = source.by_ref().take(15).collect();
        assert_eq!(&rest[..7], &[2; 7]);
        assert_eq!(&rest[7..], &[3; 8]);
    }

    #[test]
    fn test_closed_device_refuses_playback() {
        let mut device = RodioDevice::new();
        assert!(device.play_music(100).is_err());
        assert!(device.play_clock().is_err());
    }
}
