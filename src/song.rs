//! Loaded song: a decoder plus per-song playback settings
//!
//! [`Song`] tracks the elapsed song time from the decoder's own ticks, so the
//! position is independent of audio buffer boundaries. Seeks are deferred:
//! they are recorded and applied by the next [`Song::rewind`].

use crate::decoder::SongDecoder;
use crate::opl::OplBackend;
use num_derive::FromPrimitive;
use std::collections::HashMap;

/// How a seek target is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive)]
pub enum SeekMode {
    /// Seconds from the start of the song
    #[default]
    Absolute = 0,
    /// Seconds relative to the current position
    Relative = 1,
}

/// One loaded music asset
pub struct Song {
    name: String,
    decoder: Box<dyn SongDecoder>,
    volume: u8,
    subsong: usize,
    position: f64,
    pending_seek: Option<f64>,
    lengths: HashMap<usize, f64>,
}

impl std::fmt::Debug for Song {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Song")
            .field("name", &self.name)
            .field("format", &self.decoder.format_name())
            .field("volume", &self.volume)
            .field("subsong", &self.subsong)
            .field("position", &self.position)
            .field("pending_seek", &self.pending_seek)
            .finish()
    }
}

impl Song {
    /// Wrap a freshly created decoder.
    ///
    /// The song starts at full volume on the decoder's current subsong.
    pub fn new(name: impl Into<String>, decoder: Box<dyn SongDecoder>) -> Self {
        let subsong = decoder.current_subsong();
        Song {
            name: name.into(),
            decoder,
            volume: 100,
            subsong,
            position: 0.0,
            pending_seek: None,
            lengths: HashMap::new(),
        }
    }

    /// Name the song was loaded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advance the decoder by one tick.
    ///
    /// Returns `false` at the end of the song. The position only advances
    /// for ticks that succeed.
    pub fn update(&mut self, opl: &mut dyn OplBackend) -> bool {
        let playing = self.decoder.update(opl);
        if playing {
            let refresh = self.decoder.refresh_rate();
            if refresh > 0.0 {
                self.position += 1.0 / refresh as f64;
            }
        }
        playing
    }

    /// Ticks per second of the current decoder interval
    pub fn refresh_rate(&self) -> f32 {
        self.decoder.refresh_rate()
    }

    /// Restart the selected subsong and apply any pending seek.
    ///
    /// The seek is fast-forwarded on `opl` so the chip holds the register
    /// state of the target position.
    pub fn rewind(&mut self, opl: &mut dyn OplBackend) {
        self.decoder.rewind(Some(self.subsong), opl);
        self.position = 0.0;

        let Some(target) = self.pending_seek.take() else {
            return;
        };
        while self.position < target {
            let before = self.position;
            if !self.update(opl) {
                // ran off the end: start over
                self.decoder.rewind(Some(self.subsong), opl);
                self.position = 0.0;
                break;
            }
            if self.position <= before {
                break;
            }
        }
    }

    /// Request a seek, applied by the next [`rewind`](Self::rewind).
    ///
    /// Targets outside `[0, length)` restart the song from the beginning.
    /// Measuring the length may rewind the decoder, so the caller must rewind
    /// afterwards if this song is audible.
    pub fn seek(&mut self, seconds: f64, mode: SeekMode) {
        let target = match mode {
            SeekMode::Absolute => seconds,
            SeekMode::Relative => self.position + seconds,
        };
        let length = self.length_seconds();
        self.pending_seek = Some(if target.is_finite() && target >= 0.0 && target < length {
            target
        } else {
            0.0
        });
    }

    /// Seek target waiting for the next rewind
    pub fn pending_seek(&self) -> Option<f64> {
        self.pending_seek
    }

    /// Select a subsong, clamped to the valid range.
    ///
    /// Clears any pending seek; the new subsong starts from zero on the next
    /// rewind.
    pub fn set_subsong(&mut self, index: usize) {
        self.subsong = index.min(self.subsong_count().saturating_sub(1));
        self.pending_seek = None;
    }

    /// Selected subsong; this is the song's own selection, not the decoder's
    /// live counter.
    pub fn subsong(&self) -> usize {
        self.subsong
    }

    /// Number of subsongs
    pub fn subsong_count(&self) -> usize {
        self.decoder.subsong_count().max(1)
    }

    /// Length of the selected subsong in seconds.
    ///
    /// Measured once per subsong, which rewinds the decoder; do not call on
    /// an audible song without rewinding it afterwards.
    pub fn length_seconds(&mut self) -> f64 {
        if let Some(length) = self.lengths.get(&self.subsong) {
            return *length;
        }
        let length = self.decoder.song_length_ms(Some(self.subsong)) / 1000.0;
        self.lengths.insert(self.subsong, length);
        length
    }

    /// Start `subsong` as a sound effect layered over the music.
    pub fn play_sound_effect(&mut self, subsong: usize, opl: &mut dyn OplBackend) -> bool {
        self.decoder.start_sound_effect(subsong, opl)
    }

    /// Elapsed song time in seconds, as of the last decoded tick
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Song volume (0..=100)
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Set the song volume, clamped to 0..=100.
    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, 100) as u8;
    }

    /// Format-specific speed value
    pub fn speed(&self) -> u32 {
        self.decoder.speed()
    }

    /// Format name
    pub fn format_name(&self) -> &str {
        self.decoder.format_name()
    }

    /// Title from the file metadata
    pub fn title(&self) -> &str {
        self.decoder.title()
    }

    /// Author from the file metadata
    pub fn author(&self) -> &str {
        self.decoder.author()
    }

    /// Description from the file metadata
    pub fn description(&self) -> &str {
        self.decoder.description()
    }
}
