//! Playback session controller
//!
//! [`Engine`] owns everything one playback session needs: the FM backend,
//! the song list, the data provider, the stream scheduler and the sound
//! device. It is driven by the host calling [`Engine::tick`] once per frame.
//!
//! Song identifiers are 1-based and never reused: deleting a song leaves an
//! empty slot behind.

use crate::config::EngineConfig;
use crate::decoder::{DataProvider, DecoderRegistry};
use crate::device::{SoundDevice, SoundInstance};
use crate::opl::{EmulatorKind, OplBackend};
use crate::song::{SeekMode, Song};
use crate::streaming::{FillOutcome, StreamScheduler};
use crate::{OplError, PlaybackState, Result, SongId, BUFFER_COUNT, SAMPLE_RATE};
use std::path::Path;
use tracing::{debug, info, warn};

/// Streaming OPL playback engine
pub struct Engine<D: SoundDevice> {
    config: EngineConfig,
    device: D,
    device_open: bool,
    opl: Box<dyn OplBackend>,
    registry: DecoderRegistry,
    provider: DataProvider,
    songs: Vec<Option<Song>>,
    current: Option<SongId>,
    scheduler: StreamScheduler,
    state: PlaybackState,
    system_volume: u8,
    music_instance: Option<SoundInstance>,
    clock_instance: Option<SoundInstance>,
    last_clock_loops: u64,
}

fn lookup(songs: &[Option<Song>], id: SongId) -> Result<&Song> {
    (id.0 as usize)
        .checked_sub(1)
        .and_then(|index| songs.get(index))
        .and_then(Option::as_ref)
        .ok_or(OplError::InvalidSongId(id.0))
}

fn lookup_mut(songs: &mut [Option<Song>], id: SongId) -> Result<&mut Song> {
    (id.0 as usize)
        .checked_sub(1)
        .and_then(|index| songs.get_mut(index))
        .and_then(Option::as_mut)
        .ok_or(OplError::InvalidSongId(id.0))
}

impl<D: SoundDevice> Engine<D> {
    /// Open `device` and create the configured emulator.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the device cannot be opened.
    pub fn new(config: EngineConfig, mut device: D) -> Result<Self> {
        config.validate()?;
        device.open(config.stream_format())?;
        let opl = config.emulator.create(SAMPLE_RATE);
        info!(
            "OPL engine ready: {} emulator, {} frames x {} buffers at {} Hz",
            opl.name(),
            config.buffer_frames,
            BUFFER_COUNT,
            SAMPLE_RATE
        );

        Ok(Engine {
            config,
            device,
            device_open: true,
            opl,
            registry: DecoderRegistry::builtin(),
            provider: DataProvider::new(),
            songs: Vec::new(),
            current: None,
            scheduler: StreamScheduler::new(config.buffer_frames, SAMPLE_RATE),
            state: PlaybackState::Stopped,
            system_volume: 100,
            music_instance: None,
            clock_instance: None,
            last_clock_loops: 0,
        })
    }

    /// Configuration the engine was created with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decoder plugin table, for registering additional formats.
    pub fn registry_mut(&mut self) -> &mut DecoderRegistry {
        &mut self.registry
    }

    /// Registered external data
    pub fn data_provider(&self) -> &DataProvider {
        &self.provider
    }
}

impl<D: SoundDevice> Engine<D> {
    /// Decode `data` as the file `filename` and register it as a new song.
    ///
    /// The file is visible to the decoder (and to its auxiliary lookups)
    /// only for the duration of this call.
    ///
    /// # Errors
    ///
    /// [`OplError::Load`] if the name collides with an external data entry
    /// or no decoder accepts the data. Nothing is registered in that case.
    pub fn load_song(&mut self, filename: &str, data: &[u8]) -> Result<SongId> {
        if !self.provider.add(filename, data) {
            warn!("Cannot load {}: name already registered", filename);
            return Err(OplError::Load {
                name: filename.to_string(),
                reason: "A data entry already exists for this file name.".into(),
            });
        }
        let created = self.registry.create(filename, &self.provider);
        self.provider.remove(filename);

        let decoder = created.map_err(|err| {
            warn!("Failed to load {}: {}", filename, err);
            OplError::Load {
                name: filename.to_string(),
                reason: err.to_string(),
            }
        })?;

        let id = u32::try_from(self.songs.len() + 1)
            .map(SongId)
            .map_err(|_| OplError::Other("song table is full".into()))?;
        let song = Song::new(filename, decoder);
        info!("Loaded {} as music {} ({})", filename, id, song.format_name());
        self.songs.push(Some(song));
        Ok(id)
    }

    /// Read a file and load it under its path.
    pub fn load_song_from_file(&mut self, path: impl AsRef<Path>) -> Result<SongId> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        self.load_song(&path.to_string_lossy(), &data)
    }

    /// Load a song from memory; `filetype` is the extension used to pick
    /// the decoder (the song is named `memblock.<filetype>`).
    pub fn load_song_from_memory(&mut self, data: &[u8], filetype: &str) -> Result<SongId> {
        let name = format!("memblock.{}", filetype.trim_start_matches('.'));
        self.load_song(&name, data)
    }

    /// Delete a song, stopping playback first if it is the current song.
    pub fn delete_song(&mut self, id: SongId) -> Result<()> {
        lookup(&self.songs, id)?;
        if self.current == Some(id) {
            self.stop();
        }
        self.songs[id.0 as usize - 1] = None;
        debug!("Deleted music {}", id);
        Ok(())
    }

    /// Stop playback and delete every song.
    ///
    /// The slots stay allocated so identifiers handed out earlier are never
    /// reused.
    pub fn delete_all_songs(&mut self) {
        self.stop();
        self.songs.iter_mut().for_each(|song| *song = None);
    }

    /// Whether `id` refers to a loaded song
    pub fn song_exists(&self, id: SongId) -> bool {
        lookup(&self.songs, id).is_ok()
    }

    /// Number of loaded songs
    pub fn song_count(&self) -> usize {
        self.songs.iter().flatten().count()
    }
}

impl<D: SoundDevice> Engine<D> {
    /// Register an auxiliary file some formats load by name.
    pub fn add_external_data(&mut self, entry: &str, data: &[u8]) -> Result<()> {
        if !self.provider.add(entry, data) {
            return Err(OplError::DataEntryExists(entry.to_string()));
        }
        debug!("Registered external data '{}' ({} bytes)", entry, data.len());
        Ok(())
    }

    /// Register a file as external data under `entry`, or under its path.
    pub fn add_external_data_from_file(&mut self, path: impl AsRef<Path>, entry: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let name = match entry {
            Some(entry) => entry.to_string(),
            None => path.to_string_lossy().into_owned(),
        };
        self.add_external_data(&name, &data)
    }

    /// Unregister an external data entry. Returns whether it existed.
    pub fn remove_external_data(&mut self, entry: &str) -> bool {
        self.provider.remove(entry)
    }

    /// Unregister every external data entry.
    pub fn clear_external_data(&mut self) {
        self.provider.clear();
    }
}

impl<D: SoundDevice> Engine<D> {
    /// Start playing a song from its beginning (or its pending seek).
    ///
    /// `loops` is the number of passes to play; 0 loops forever.
    ///
    /// # Errors
    ///
    /// An invalid id is rejected before the current song is touched. Device
    /// failures stop playback and are returned.
    pub fn play(&mut self, id: SongId, loops: u32) -> Result<()> {
        lookup(&self.songs, id)?;
        self.stop();
        self.opl.reset();

        let song = lookup_mut(&mut self.songs, id)?;
        song.rewind(self.opl.as_mut());
        info!("Playing {} (loops: {})", song.name(), loops);

        self.current = Some(id);
        self.scheduler.discard_pending();
        self.scheduler.set_loop_setting(loops);
        self.state = PlaybackState::Playing;
        self.prime_and_start()
    }

    /// Play `subsong` of a song as a sound effect.
    ///
    /// On the current song the decoder layers the effect over the music. Any
    /// other song is switched to and played once from `subsong`.
    pub fn play_sound(&mut self, id: SongId, subsong: usize) -> Result<()> {
        lookup(&self.songs, id)?;
        if self.current == Some(id) {
            let song = lookup_mut(&mut self.songs, id)?;
            if !song.play_sound_effect(subsong, self.opl.as_mut()) {
                debug!("{} has no sound effects", song.name());
            }
            return Ok(());
        }
        self.set_subsong(id, subsong)?;
        self.play(id, 1)
    }

    /// Halt device output, keeping the song and scheduler state.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.state = PlaybackState::Paused;
        self.stop_instances();
        debug!("Playback paused");
    }

    /// Continue after [`pause`](Self::pause), re-priming both buffers.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != PlaybackState::Paused {
            return Ok(());
        }
        self.state = PlaybackState::Playing;
        self.scheduler.restart_cycle();
        debug!("Playback resumed");
        self.prime_and_start()
    }

    /// Stop playback and rewind the current song. Idempotent.
    pub fn stop(&mut self) {
        if let Some(id) = self.current.take() {
            if let Ok(song) = lookup_mut(&mut self.songs, id) {
                song.rewind(self.opl.as_mut());
                info!("Stopped {}", song.name());
            }
        }
        self.stop_instances();
        self.last_clock_loops = 0;
        self.scheduler.reset();
        self.state = PlaybackState::Stopped;
    }

    /// Per-frame update: refill a buffer once the device has finished one.
    pub fn tick(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let (Some(music), Some(clock)) = (self.music_instance, self.clock_instance) else {
            return;
        };

        if !self.device.is_playing(music) || !self.device.is_playing(clock) {
            warn!("Sound device stopped playback unexpectedly; restarting");
            self.pause();
            if let Err(err) = self.resume() {
                warn!("Failed to restart playback: {}", err);
            }
            return;
        }

        let loops = self.device.loop_count(clock);
        if loops != self.last_clock_loops {
            self.last_clock_loops = loops;
            self.fill_next_buffer();
        }
    }

    /// Current transport state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Whether a song is streaming
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Whether playback is paused
    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    /// Song selected for playback, if any
    pub fn current_song(&self) -> Option<SongId> {
        self.current
    }

    /// Device instance playing the music, if any
    pub fn sound_instance(&self) -> Option<SoundInstance> {
        self.music_instance
    }

    fn prime_and_start(&mut self) -> Result<()> {
        for _ in 0..BUFFER_COUNT {
            if !self.fill_next_buffer() {
                return Ok(());
            }
        }

        if let Err(err) = self.start_instances() {
            warn!("Failed to start playback: {}", err);
            self.stop();
            return Err(err);
        }
        Ok(())
    }

    fn start_instances(&mut self) -> Result<()> {
        let volume = self.play_volume();
        self.music_instance = Some(self.device.play_music(volume)?);
        let clock = self.device.play_clock()?;
        self.clock_instance = Some(clock);
        self.last_clock_loops = self.device.loop_count(clock);
        Ok(())
    }

    /// Fill and commit one buffer. Returns `false` once playback has stopped.
    fn fill_next_buffer(&mut self) -> bool {
        let Some(id) = self.current else {
            return false;
        };
        let Ok(song) = lookup_mut(&mut self.songs, id) else {
            return false;
        };
        match self.scheduler.fill_next_buffer(song, self.opl.as_mut()) {
            FillOutcome::Committed(slot) => {
                self.device.commit(slot, self.scheduler.buffer(slot));
                true
            }
            FillOutcome::Finished => {
                self.stop();
                false
            }
        }
    }

    fn stop_instances(&mut self) {
        if let Some(music) = self.music_instance.take() {
            self.device.stop_instance(music);
        }
        if let Some(clock) = self.clock_instance.take() {
            self.device.stop_instance(clock);
        }
    }
}

impl<D: SoundDevice> Engine<D> {
    /// Change the number of passes of the current session; resets the
    /// loop count.
    pub fn set_loop_setting(&mut self, loops: u32) {
        self.scheduler.set_loop_setting(loops);
    }

    /// Passes to play, 0 meaning forever
    pub fn loop_setting(&self) -> u32 {
        self.scheduler.loop_setting()
    }

    /// Completed passes since playback or the loop setting last changed
    pub fn loop_count(&self) -> u32 {
        self.scheduler.loop_count()
    }
}

impl<D: SoundDevice> Engine<D> {
    /// Seek a song. The current song jumps immediately; others start from
    /// the new position on their next play.
    pub fn seek(&mut self, id: SongId, seconds: f64, mode: SeekMode) -> Result<()> {
        let is_current = self.current == Some(id);
        let song = lookup_mut(&mut self.songs, id)?;
        song.seek(seconds, mode);
        if is_current {
            song.rewind(self.opl.as_mut());
            self.scheduler.discard_pending();
        }
        Ok(())
    }

    /// Select a subsong; the current song restarts on it immediately.
    pub fn set_subsong(&mut self, id: SongId, subsong: usize) -> Result<()> {
        let is_current = self.current == Some(id);
        let song = lookup_mut(&mut self.songs, id)?;
        song.set_subsong(subsong);
        if is_current {
            song.rewind(self.opl.as_mut());
            self.scheduler.discard_pending();
        }
        Ok(())
    }

    /// Selected subsong
    pub fn subsong(&self, id: SongId) -> Result<usize> {
        Ok(lookup(&self.songs, id)?.subsong())
    }

    /// Number of subsongs
    pub fn subsong_count(&self, id: SongId) -> Result<usize> {
        Ok(lookup(&self.songs, id)?.subsong_count())
    }

    /// Set a song's volume (clamped to 0..=100).
    pub fn set_volume(&mut self, id: SongId, volume: i32) -> Result<()> {
        lookup_mut(&mut self.songs, id)?.set_volume(volume);
        if self.current == Some(id) {
            self.apply_volume();
        }
        Ok(())
    }

    /// A song's volume
    pub fn volume(&self, id: SongId) -> Result<u8> {
        Ok(lookup(&self.songs, id)?.volume())
    }

    /// Playback position in seconds.
    ///
    /// For the current song the part of the last decoder tick that has not
    /// been rendered yet is subtracted.
    pub fn position(&self, id: SongId) -> Result<f64> {
        let song = lookup(&self.songs, id)?;
        if self.current != Some(id) {
            return Ok(song.position());
        }
        let pending = self.scheduler.frames_pending() as f64 / self.scheduler.sample_rate() as f64;
        Ok((song.position() - pending).max(0.0))
    }

    /// Length of the selected subsong in seconds.
    ///
    /// # Errors
    ///
    /// [`OplError::SongPlaying`] for the current song, since measuring
    /// disturbs the decoder.
    pub fn duration(&mut self, id: SongId) -> Result<f64> {
        let is_current = self.current == Some(id);
        let song = lookup_mut(&mut self.songs, id)?;
        if is_current {
            return Err(OplError::SongPlaying(id));
        }
        Ok(song.length_seconds())
    }

    /// Format-specific speed value
    pub fn rate(&self, id: SongId) -> Result<u32> {
        Ok(lookup(&self.songs, id)?.speed())
    }

    /// Title from the file metadata
    pub fn title(&self, id: SongId) -> Result<&str> {
        Ok(lookup(&self.songs, id)?.title())
    }

    /// Author from the file metadata
    pub fn author(&self, id: SongId) -> Result<&str> {
        Ok(lookup(&self.songs, id)?.author())
    }

    /// Description from the file metadata
    pub fn description(&self, id: SongId) -> Result<&str> {
        Ok(lookup(&self.songs, id)?.description())
    }

    /// Name of the song format
    pub fn format_name(&self, id: SongId) -> Result<&str> {
        Ok(lookup(&self.songs, id)?.format_name())
    }
}

impl<D: SoundDevice> Engine<D> {
    /// Set the master volume (clamped to 0..=100).
    pub fn set_system_volume(&mut self, volume: i32) {
        self.system_volume = volume.clamp(0, 100) as u8;
        self.apply_volume();
    }

    /// Master volume
    pub fn system_volume(&self) -> u8 {
        self.system_volume
    }

    /// Volume handed to the device: master volume scaled by the song volume.
    /// Zero without a current song.
    pub fn play_volume(&self) -> u8 {
        let Some(song) = self.current.and_then(|id| lookup(&self.songs, id).ok()) else {
            return 0;
        };
        (self.system_volume as u32 * song.volume() as u32 / 100) as u8
    }

    fn apply_volume(&mut self) {
        if let Some(music) = self.music_instance {
            let volume = self.play_volume();
            self.device.set_volume(music, volume);
        }
    }

    /// Write a register of the active backend directly.
    pub fn write_register(&mut self, reg: u8, value: u8) {
        self.opl.write(reg, value);
    }

    /// Configured emulator
    pub fn emulator(&self) -> EmulatorKind {
        self.config.emulator
    }

    /// Name of the active synthesis backend
    pub fn backend_name(&self) -> &'static str {
        self.opl.name()
    }

    /// Read-only view of the stream scheduler
    pub fn scheduler(&self) -> &StreamScheduler {
        &self.scheduler
    }

    /// Sound device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the sound device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Render a song to a WAV file on a private emulator.
    ///
    /// The song plays once, stopping early after `max_seconds`. Returns the
    /// number of frames written.
    #[cfg(feature = "export-wav")]
    pub fn export_wav(&mut self, id: SongId, path: impl AsRef<Path>, max_seconds: f64) -> Result<u64> {
        if self.current == Some(id) {
            return Err(OplError::SongPlaying(id));
        }
        let song = lookup_mut(&mut self.songs, id)?;
        let mut backend = self.config.emulator.create(SAMPLE_RATE);
        crate::export::render_to_wav(
            song,
            backend.as_mut(),
            self.config.buffer_frames,
            path.as_ref(),
            max_seconds,
        )
    }

    /// Stop playback, delete every song and external data entry and close
    /// the device. Idempotent.
    pub fn shutdown(&mut self) {
        self.delete_all_songs();
        self.provider.clear();
        if self.device_open {
            self.device.close();
            self.device_open = false;
            info!("OPL engine shut down");
        }
    }
}

impl<D: SoundDevice> Drop for Engine<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeError, DecoderPlugin, SongDecoder};
    use crate::device::{DeviceEvent, VirtualDevice};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// `BEEP` + tick count (u16 LE); 50 Hz, keys a note on the first tick.
    struct Beeper {
        ticks: u32,
        left: u32,
    }

    impl SongDecoder for Beeper {
        fn update(&mut self, opl: &mut dyn OplBackend) -> bool {
            if self.left == 0 {
                return false;
            }
            if self.left == self.ticks {
                opl.write(0xB0, 0x31);
            }
            self.left -= 1;
            true
        }

        fn rewind(&mut self, _subsong: Option<usize>, _opl: &mut dyn OplBackend) {
            self.left = self.ticks;
        }

        fn refresh_rate(&self) -> f32 {
            50.0
        }

        fn subsong_count(&self) -> usize {
            4
        }

        fn format_name(&self) -> &str {
            "beeper"
        }
    }

    fn load_beeper(
        data: &[u8],
        _filename: &str,
        _provider: &DataProvider,
    ) -> std::result::Result<Box<dyn SongDecoder>, DecodeError> {
        match data {
            [b'B', b'E', b'E', b'P', lo, hi, ..] => {
                let ticks = u16::from_le_bytes([*lo, *hi]) as u32;
                Ok(Box::new(Beeper { ticks, left: ticks }))
            }
            _ => Err(DecodeError::UnsupportedFormat),
        }
    }

    const BEEPER: DecoderPlugin = DecoderPlugin {
        name: "beeper",
        extensions: &[".beep"],
        load: load_beeper,
    };

    static JINGLE_EFFECTS: AtomicUsize = AtomicUsize::new(0);

    /// Endless song with three effect subsongs; counts effect starts.
    struct Jingle {
        left: u32,
    }

    impl SongDecoder for Jingle {
        fn update(&mut self, _opl: &mut dyn OplBackend) -> bool {
            self.left = self.left.saturating_sub(1);
            self.left > 0
        }

        fn rewind(&mut self, _subsong: Option<usize>, _opl: &mut dyn OplBackend) {
            self.left = 10_000;
        }

        fn refresh_rate(&self) -> f32 {
            50.0
        }

        fn subsong_count(&self) -> usize {
            3
        }

        fn start_sound_effect(&mut self, subsong: usize, _opl: &mut dyn OplBackend) -> bool {
            JINGLE_EFFECTS.fetch_add(1, Ordering::SeqCst);
            subsong < 3
        }

        fn format_name(&self) -> &str {
            "jingle"
        }
    }

    fn load_jingle(
        data: &[u8],
        _filename: &str,
        _provider: &DataProvider,
    ) -> std::result::Result<Box<dyn SongDecoder>, DecodeError> {
        if data.starts_with(b"JINGLE") {
            Ok(Box::new(Jingle { left: 10_000 }))
        } else {
            Err(DecodeError::UnsupportedFormat)
        }
    }

    const JINGLE: DecoderPlugin = DecoderPlugin {
        name: "jingle",
        extensions: &[".jingle"],
        load: load_jingle,
    };

    fn beep(ticks: u16) -> Vec<u8> {
        let mut data = b"BEEP".to_vec();
        data.extend_from_slice(&ticks.to_le_bytes());
        data
    }

    fn engine() -> Engine<VirtualDevice> {
        let config = EngineConfig {
            emulator: EmulatorKind::Silverman,
            buffer_frames: 1024,
        };
        let mut engine = Engine::new(config, VirtualDevice::new()).unwrap();
        engine.registry_mut().register(BEEPER);
        engine
    }

    #[test]
    fn test_ids_are_one_based_and_not_reused() {
        let mut engine = engine();
        let a = engine.load_song("a.beep", &beep(10)).unwrap();
        let b = engine.load_song("b.beep", &beep(10)).unwrap();
        assert_eq!((a.get(), b.get()), (1, 2));

        engine.delete_song(a).unwrap();
        let c = engine.load_song("c.beep", &beep(10)).unwrap();
        assert_eq!(c.get(), 3);
        assert_eq!(engine.song_count(), 2);
        assert!(!engine.song_exists(a));
        assert!(!engine.song_exists(SongId(0)));
    }

    #[test]
    fn test_load_failure_rolls_back() {
        let mut engine = engine();
        let err = engine.load_song("junk.beep", b"nothing").unwrap_err();
        assert!(matches!(err, OplError::Load { .. }));
        assert!(err.to_string().contains("Failed to determine music file type."));
        assert!(engine.data_provider().is_empty());
        assert_eq!(engine.song_count(), 0);
    }

    #[test]
    fn test_load_name_collides_with_external_data() {
        let mut engine = engine();
        engine.add_external_data("a.beep", b"aux").unwrap();
        assert!(matches!(
            engine.load_song("a.beep", &beep(10)),
            Err(OplError::Load { .. })
        ));
        assert!(matches!(
            engine.add_external_data("a.beep", b"again"),
            Err(OplError::DataEntryExists(_))
        ));
        assert!(engine.remove_external_data("a.beep"));
        assert!(engine.load_song("a.beep", &beep(10)).is_ok());
    }

    #[test]
    fn test_memory_load_name() {
        let mut engine = engine();
        let id = engine.load_song_from_memory(&beep(10), "beep").unwrap();
        assert_eq!(engine.format_name(id).unwrap(), "beeper");
    }

    #[test]
    fn test_play_primes_before_starting() {
        let mut engine = engine();
        let id = engine.load_song("a.beep", &beep(100)).unwrap();
        engine.device_mut().clear_events();
        engine.play(id, 0).unwrap();

        let events = engine.device().events();
        assert_eq!(events[0], DeviceEvent::Commit { slot: 0 });
        assert_eq!(events[1], DeviceEvent::Commit { slot: 1 });
        assert!(matches!(events[2], DeviceEvent::StartMusic { volume: 100, .. }));
        assert!(matches!(events[3], DeviceEvent::StartClock { .. }));
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.current_song(), Some(id));
    }

    #[test]
    fn test_invalid_play_keeps_current_song() {
        let mut engine = engine();
        let id = engine.load_song("a.beep", &beep(100)).unwrap();
        engine.play(id, 0).unwrap();
        assert!(matches!(engine.play(SongId(9), 0), Err(OplError::InvalidSongId(9))));
        assert!(engine.is_playing());
        assert_eq!(engine.current_song(), Some(id));
    }

    #[test]
    fn test_tick_fills_once_per_clock_loop() {
        let mut engine = engine();
        let id = engine.load_song("a.beep", &beep(1000)).unwrap();
        engine.play(id, 0).unwrap();
        let primed = engine.device().commit_count();

        engine.tick();
        assert_eq!(engine.device().commit_count(), primed);

        engine.device_mut().advance_buffers(1);
        engine.tick();
        engine.tick();
        assert_eq!(engine.device().commit_count(), primed + 1);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut engine = engine();
        let id = engine.load_song("a.beep", &beep(1000)).unwrap();
        engine.pause();
        assert_eq!(engine.state(), PlaybackState::Stopped);

        engine.play(id, 0).unwrap();
        engine.pause();
        assert!(engine.is_paused());
        assert_eq!(engine.sound_instance(), None);
        assert_eq!(engine.current_song(), Some(id));

        engine.resume().unwrap();
        assert!(engine.is_playing());
        assert!(engine.sound_instance().is_some());
        assert_eq!(engine.scheduler().active_buffer(), 0);
    }

    #[test]
    fn test_effective_volume() {
        let mut engine = engine();
        let id = engine.load_song("a.beep", &beep(1000)).unwrap();
        assert_eq!(engine.play_volume(), 0);
        engine.play(id, 0).unwrap();
        engine.set_system_volume(50);
        engine.set_volume(id, 55).unwrap();
        assert_eq!(engine.play_volume(), 27);

        let music = engine.sound_instance().unwrap();
        assert_eq!(engine.device().instance_volume(music), Some(27));
    }

    #[test]
    fn test_duration_refused_for_current_song() {
        let mut engine = engine();
        let id = engine.load_song("a.beep", &beep(100)).unwrap();
        assert!((engine.duration(id).unwrap() - 2.0).abs() < 1e-9);
        engine.play(id, 0).unwrap();
        assert!(matches!(engine.duration(id), Err(OplError::SongPlaying(_))));
    }

    #[test]
    fn test_play_sound_switches_to_other_song() {
        let mut engine = engine();
        let music = engine.load_song("a.beep", &beep(1000)).unwrap();
        let effects = engine.load_song("b.beep", &beep(10)).unwrap();
        engine.play(music, 0).unwrap();

        engine.play_sound(effects, 2).unwrap();
        assert_eq!(engine.current_song(), Some(effects));
        assert_eq!(engine.subsong(effects).unwrap(), 2);
        assert_eq!(engine.loop_setting(), 1);

        // same song: layered, nothing restarts
        engine.play_sound(effects, 1).unwrap();
        assert_eq!(engine.current_song(), Some(effects));
        assert_eq!(engine.subsong(effects).unwrap(), 2);
    }

    #[test]
    fn test_play_sound_on_current_song_layers_effect() {
        let mut engine = engine();
        engine.registry_mut().register(JINGLE);
        let id = engine.load_song("theme.jingle", b"JINGLE").unwrap();
        engine.play(id, 0).unwrap();
        let fills = engine.scheduler().fill_count();
        let commits = engine.device().commit_count();
        let music = engine.sound_instance();

        engine.play_sound(id, 1).unwrap();
        assert_eq!(JINGLE_EFFECTS.load(Ordering::SeqCst), 1);
        assert_eq!(engine.scheduler().fill_count(), fills);
        assert_eq!(engine.device().commit_count(), commits);
        assert_eq!(engine.sound_instance(), music);
        assert_eq!(engine.subsong(id).unwrap(), 0);
        assert!(engine.is_playing());
    }

    #[test]
    fn test_ids_not_reused_after_delete_all() {
        let mut engine = engine();
        let old = engine.load_song("a.beep", &beep(10)).unwrap();
        engine.delete_all_songs();
        let new = engine.load_song("b.beep", &beep(10)).unwrap();
        assert_ne!(old, new);
        assert!(!engine.song_exists(old));
        assert!(matches!(engine.volume(old), Err(OplError::InvalidSongId(1))));

        engine.shutdown();
        let after_shutdown = engine.load_song("c.beep", &beep(10)).unwrap();
        assert_eq!(after_shutdown.get(), 3);
        assert!(!engine.song_exists(new));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut engine = engine();
        let id = engine.load_song("a.beep", &beep(100)).unwrap();
        engine.add_external_data("aux.bin", b"x").unwrap();
        engine.play(id, 0).unwrap();

        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.song_count(), 0);
        assert!(engine.data_provider().is_empty());
        let closes = engine
            .device()
            .events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Close))
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_open_failure_is_fatal() {
        assert!(matches!(
            Engine::new(EngineConfig::default(), VirtualDevice::failing()),
            Err(OplError::AudioDevice(_))
        ));
    }
}
