//! Buffer fill loop with loop counting and the fade-out countdown

use crate::opl::OplBackend;
use crate::song::Song;
use crate::BUFFER_COUNT;
use tracing::{debug, warn};

/// Consecutive decoder ticks without audio after which playback fades out.
pub const MAX_IDLE_TICKS: u32 = 65_536;

/// Buffers played after the end of the song before playback stops.
///
/// The device is always one buffer ahead, so the buffer already queued must
/// still play out.
const FADE_BUFFERS: u8 = 2;

/// Result of one [`StreamScheduler::fill_next_buffer`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Buffer `slot` was filled and must be handed to the device.
    Committed(usize),
    /// The fade-out has completed; playback must stop.
    Finished,
}

/// Streaming buffer scheduler
#[derive(Debug, Clone)]
pub struct StreamScheduler {
    buffers: [Vec<i16>; BUFFER_COUNT],
    buffer_frames: usize,
    sample_rate: u32,
    active: usize,
    frames_pending: usize,
    buffers_until_stop: u8,
    loop_setting: u32,
    loop_count: u32,
    fills: u64,
    frames_since_rewind: u64,
}

impl StreamScheduler {
    /// Create a scheduler with two zeroed buffers of `buffer_frames`
    /// interleaved stereo frames each.
    pub fn new(buffer_frames: usize, sample_rate: u32) -> Self {
        StreamScheduler {
            buffers: std::array::from_fn(|_| vec![0; buffer_frames * 2]),
            buffer_frames,
            sample_rate,
            active: 0,
            frames_pending: 0,
            buffers_until_stop: 0,
            loop_setting: 0,
            loop_count: 0,
            fills: 0,
            frames_since_rewind: 0,
        }
    }

    /// Fill the next buffer from `song`, synthesizing through `opl`.
    ///
    /// The buffer is zeroed first, so any early exit leaves trailing silence.
    pub fn fill_next_buffer(&mut self, song: &mut Song, opl: &mut dyn OplBackend) -> FillOutcome {
        let slot = self.active;
        let mut buffer = std::mem::take(&mut self.buffers[slot]);
        buffer.fill(0);
        self.fills += 1;

        if self.buffers_until_stop > 0 {
            self.buffers_until_stop -= 1;
            if self.buffers_until_stop == 0 {
                self.buffers[slot] = buffer;
                debug!("fade-out complete for {}", song.name());
                return FillOutcome::Finished;
            }
        } else {
            self.render_into(&mut buffer, song, opl);
        }

        self.buffers[slot] = buffer;
        self.active = (slot + 1) % BUFFER_COUNT;
        FillOutcome::Committed(slot)
    }

    fn render_into(&mut self, buffer: &mut [i16], song: &mut Song, opl: &mut dyn OplBackend) {
        let mut index = 0;
        let mut idle_ticks = 0u32;

        while index < self.buffer_frames {
            if self.frames_pending == 0 {
                if song.update(opl) {
                    let refresh = song.refresh_rate();
                    if refresh > 0.0 {
                        self.frames_pending = (self.sample_rate as f64 / refresh as f64) as usize;
                    }
                    if self.frames_pending == 0 {
                        idle_ticks += 1;
                        if idle_ticks >= MAX_IDLE_TICKS {
                            warn!("{} produced no audio for {} ticks", song.name(), idle_ticks);
                            self.start_fade();
                            break;
                        }
                        continue;
                    }
                } else {
                    self.loop_count += 1;
                    if self.frames_since_rewind == 0 {
                        warn!("{} ended without producing audio", song.name());
                        self.start_fade();
                        break;
                    }
                    if self.loop_setting != 0 && self.loop_count >= self.loop_setting {
                        debug!("{} finished after {} passes", song.name(), self.loop_count);
                        self.start_fade();
                        break;
                    }
                    song.rewind(opl);
                    self.frames_since_rewind = 0;
                    continue;
                }
            }

            let frames = self.frames_pending.min(self.buffer_frames - index);
            opl.render(&mut buffer[index * 2..(index + frames) * 2]);
            self.frames_pending -= frames;
            self.frames_since_rewind += frames as u64;
            index += frames;
            idle_ticks = 0;
        }
    }

    fn start_fade(&mut self) {
        self.loop_count = 0;
        self.buffers_until_stop = FADE_BUFFERS;
    }

    /// Return to the stopped state: counters, loop setting and the active
    /// buffer index are cleared.
    pub fn reset(&mut self) {
        self.active = 0;
        self.frames_pending = 0;
        self.buffers_until_stop = 0;
        self.loop_setting = 0;
        self.loop_count = 0;
        self.frames_since_rewind = 0;
    }

    /// Make buffer 0 the next one to fill (used when re-priming on resume).
    pub fn restart_cycle(&mut self) {
        self.active = 0;
    }

    /// Drop the remainder of the current tick after the song was rewound
    /// outside the fill loop.
    pub fn discard_pending(&mut self) {
        self.frames_pending = 0;
        self.frames_since_rewind = 0;
    }

    /// Set how many passes to play (0 = forever); resets the loop count.
    pub fn set_loop_setting(&mut self, loops: u32) {
        self.loop_setting = loops;
        self.loop_count = 0;
    }

    /// Passes to play, 0 meaning forever
    pub fn loop_setting(&self) -> u32 {
        self.loop_setting
    }

    /// Times the song has ended since the loop setting was last changed
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Remaining fade-out buffers; nonzero while stopping
    pub fn buffers_until_stop(&self) -> u8 {
        self.buffers_until_stop
    }

    /// Frames still owed to the current decoder tick
    pub fn frames_pending(&self) -> usize {
        self.frames_pending
    }

    /// Index of the buffer the next fill writes to
    pub fn active_buffer(&self) -> usize {
        self.active
    }

    /// Buffer length in frames
    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved samples of buffer `slot`
    pub fn buffer(&self, slot: usize) -> &[i16] {
        &self.buffers[slot % BUFFER_COUNT]
    }

    /// Total fill calls since creation
    pub fn fill_count(&self) -> u64 {
        self.fills
    }
}
