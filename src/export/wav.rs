//! WAV file export

use crate::opl::OplBackend;
use crate::song::Song;
use crate::streaming::{FillOutcome, StreamScheduler};
use crate::{OplError, Result, BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE};
use std::path::Path;
use tracing::info;

/// Render one pass of `song` to a 16-bit stereo WAV file
///
/// Rendering stops when the song ends or after `max_seconds`, whichever
/// comes first. The silent fade-out buffers are not written. The song is
/// rewound afterwards.
///
/// Returns the number of frames written.
///
/// # Examples
///
/// ```no_run
/// use opl_stream::{export::render_to_wav, DataProvider, DecoderRegistry, EmulatorKind, Song};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut provider = DataProvider::new();
/// provider.add("song.imf", &std::fs::read("song.imf")?);
/// let decoder = DecoderRegistry::builtin().create("song.imf", &provider)?;
/// let mut song = Song::new("song.imf", decoder);
/// let mut opl = EmulatorKind::Nuked.create(44_100);
/// render_to_wav(&mut song, opl.as_mut(), 4096, "song.wav".as_ref(), 300.0)?;
/// # Ok(())
/// # }
/// ```
pub fn render_to_wav(
    song: &mut Song,
    backend: &mut dyn OplBackend,
    buffer_frames: usize,
    path: &Path,
    max_seconds: f64,
) -> Result<u64> {
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| OplError::Export(format!("Failed to create WAV file: {}", e)))?;

    let mut scheduler = StreamScheduler::new(buffer_frames, SAMPLE_RATE);
    scheduler.set_loop_setting(1);
    backend.reset();
    song.rewind(backend);

    let max_frames = (max_seconds.max(0.0) * SAMPLE_RATE as f64) as u64;
    let mut written = 0u64;
    while written < max_frames {
        let fading = scheduler.buffers_until_stop() > 0;
        let slot = match scheduler.fill_next_buffer(song, backend) {
            FillOutcome::Committed(slot) => slot,
            FillOutcome::Finished => break,
        };
        if fading {
            continue;
        }
        let frames = (max_frames - written).min(buffer_frames as u64) as usize;
        for &sample in &scheduler.buffer(slot)[..frames * CHANNELS as usize] {
            writer
                .write_sample(sample)
                .map_err(|e| OplError::Export(format!("Failed to write sample: {}", e)))?;
        }
        written += frames as u64;
    }

    writer
        .finalize()
        .map_err(|e| OplError::Export(format!("Failed to finalize WAV file: {}", e)))?;
    song.rewind(backend);

    info!(
        "Exported {} to {} ({:.1} s)",
        song.name(),
        path.display(),
        written as f64 / SAMPLE_RATE as f64
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SongDecoder;
    use crate::opl::SilentOpl;

    struct Ticks(u32, u32);

    impl SongDecoder for Ticks {
        fn update(&mut self, _opl: &mut dyn OplBackend) -> bool {
            if self.1 == 0 {
                return false;
            }
            self.1 -= 1;
            true
        }

        fn rewind(&mut self, _subsong: Option<usize>, _opl: &mut dyn OplBackend) {
            self.1 = self.0;
        }

        fn refresh_rate(&self) -> f32 {
            100.0
        }

        fn format_name(&self) -> &str {
            "ticks"
        }
    }

    #[test]
    fn test_render_stops_at_song_end() {
        // 50 ticks of 441 frames
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut song = Song::new("t", Box::new(Ticks(50, 50)));
        let frames = render_to_wav(&mut song, &mut SilentOpl::new(), 1024, &path, 60.0).unwrap();

        // the last buffer holds the end of the song plus silence
        assert_eq!(frames, 22 * 1024);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.duration() as u64, frames);
    }

    #[test]
    fn test_render_respects_time_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        let mut song = Song::new("t", Box::new(Ticks(1000, 1000)));
        let frames = render_to_wav(&mut song, &mut SilentOpl::new(), 1024, &path, 0.5).unwrap();
        assert_eq!(frames, 22_050);
    }
}
