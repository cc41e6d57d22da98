//! Song decoders
//!
//! A decoder interprets one music file as a stream of timed OPL register
//! writes. Each call to [`SongDecoder::update`] performs one tick worth of
//! writes and reports the tick rate for the next interval through
//! [`SongDecoder::refresh_rate`].
//!
//! Decoders are created by a [`DecoderRegistry`] from bytes held in a
//! [`DataProvider`].

#[cfg(feature = "dro")]
pub mod dro;
#[cfg(feature = "imf")]
pub mod imf;
pub mod provider;
#[cfg(feature = "raw")]
pub mod raw;

pub use provider::DataProvider;

use crate::opl::{OplBackend, SilentOpl};
use tracing::debug;

/// Upper bound used when measuring song lengths (10 minutes).
pub const MAX_MEASURED_LENGTH_MS: f64 = 600_000.0;

/// Decoder failures, reported only while creating a decoder.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No decoder recognised the file
    #[error("Failed to determine music file type.")]
    UnsupportedFormat,

    /// The file (or an auxiliary file it references) is not registered
    #[error("File not found: {0}")]
    MissingFile(String),

    /// The format was recognised but the data is unusable
    #[error("Malformed {format} data: {reason}")]
    Malformed {
        /// Format name
        format: &'static str,
        /// Human readable cause
        reason: String,
    },
}

/// One decoded song: a timed stream of register writes
///
/// Decoders never own the synthesizer; it is lent to every call that writes
/// registers so the same decoder can be measured on a [`SilentOpl`] and played
/// on the audible backend.
pub trait SongDecoder: Send {
    /// Perform one tick of register writes.
    ///
    /// Returns `false` once the song has reached its end in this pass.
    fn update(&mut self, opl: &mut dyn OplBackend) -> bool;

    /// Restart at `subsong` (or the current subsong) and reinitialise `opl`.
    fn rewind(&mut self, subsong: Option<usize>, opl: &mut dyn OplBackend);

    /// Ticks per second for the interval following the last update.
    fn refresh_rate(&self) -> f32;

    /// Number of subsongs in the file
    fn subsong_count(&self) -> usize {
        1
    }

    /// Subsong the decoder is currently playing
    fn current_subsong(&self) -> usize {
        0
    }

    /// Format-specific speed value
    fn speed(&self) -> u32 {
        0
    }

    /// Human readable format name
    fn format_name(&self) -> &str;

    /// Song title, empty if unknown
    fn title(&self) -> &str {
        ""
    }

    /// Song author, empty if unknown
    fn author(&self) -> &str {
        ""
    }

    /// Free-form description, empty if unknown
    fn description(&self) -> &str {
        ""
    }

    /// Start `subsong` as a sound effect on top of the music.
    ///
    /// Returns `false` if the format cannot layer subsongs.
    fn start_sound_effect(&mut self, _subsong: usize, _opl: &mut dyn OplBackend) -> bool {
        false
    }

    /// Length of `subsong` in milliseconds.
    ///
    /// The default plays the song on a silent chip until it ends or
    /// [`MAX_MEASURED_LENGTH_MS`] is reached, then rewinds. This disturbs the
    /// decoder position, so it must not run while the song is audible.
    fn song_length_ms(&mut self, subsong: Option<usize>) -> f64 {
        let mut opl = SilentOpl::new();
        self.rewind(subsong, &mut opl);
        let mut length = 0.0;
        while length < MAX_MEASURED_LENGTH_MS && self.update(&mut opl) {
            let refresh = self.refresh_rate();
            if refresh <= 0.0 {
                break;
            }
            length += 1000.0 / refresh as f64;
        }
        self.rewind(subsong, &mut opl);
        length
    }
}

/// Loader entry point of a decoder plugin
pub type LoadFn = fn(&[u8], &str, &DataProvider) -> Result<Box<dyn SongDecoder>, DecodeError>;

/// One entry of the decoder plugin table
#[derive(Debug, Clone, Copy)]
pub struct DecoderPlugin {
    /// Format name used in logs
    pub name: &'static str,
    /// Lowercase file extensions including the dot
    pub extensions: &'static [&'static str],
    /// Loader; returns [`DecodeError::UnsupportedFormat`] if the data is not
    /// in this format
    pub load: LoadFn,
}

impl DecoderPlugin {
    fn matches_extension(&self, filename: &str) -> bool {
        let lower = filename.to_ascii_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext))
    }
}

/// Plugin table used to create decoders
#[derive(Debug, Clone, Default)]
pub struct DecoderRegistry {
    plugins: Vec<DecoderPlugin>,
}

impl DecoderRegistry {
    /// Registry without any decoders
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every decoder compiled into the crate
    pub fn builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "imf")]
        registry.register(imf::PLUGIN);
        #[cfg(feature = "raw")]
        registry.register(raw::PLUGIN);
        #[cfg(feature = "dro")]
        registry.register(dro::PLUGIN);
        registry
    }

    /// Add a plugin after the existing ones.
    pub fn register(&mut self, plugin: DecoderPlugin) {
        self.plugins.push(plugin);
    }

    /// Registered plugins in probing order
    pub fn plugins(&self) -> &[DecoderPlugin] {
        &self.plugins
    }

    /// Create a decoder for the entry `filename` of `provider`.
    ///
    /// Plugins claiming the file extension are tried first, then the rest.
    /// The first error other than [`DecodeError::UnsupportedFormat`] is
    /// reported if no plugin accepts the data.
    pub fn create(
        &self,
        filename: &str,
        provider: &DataProvider,
    ) -> Result<Box<dyn SongDecoder>, DecodeError> {
        let data = provider
            .open(filename)
            .ok_or_else(|| DecodeError::MissingFile(filename.to_string()))?;

        let (preferred, others): (Vec<&DecoderPlugin>, Vec<&DecoderPlugin>) = self
            .plugins
            .iter()
            .partition(|plugin| plugin.matches_extension(filename));

        let mut first_error = None;
        for plugin in preferred.into_iter().chain(others) {
            match (plugin.load)(&data, filename, provider) {
                Ok(decoder) => {
                    debug!("{} decoded by {}", filename, plugin.name);
                    return Ok(decoder);
                }
                Err(DecodeError::UnsupportedFormat) => {}
                Err(err) => {
                    debug!("{} rejected by {}: {}", filename, plugin.name, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        Err(first_error.unwrap_or(DecodeError::UnsupportedFormat))
    }
}

/// Read a NUL-terminated string, returning it and the remaining input.
///
/// A missing terminator consumes the rest of the input.
pub(crate) fn c_string(input: &[u8]) -> (String, &[u8]) {
    match input.iter().position(|&b| b == 0) {
        Some(end) => (
            String::from_utf8_lossy(&input[..end]).into_owned(),
            &input[end + 1..],
        ),
        None => (
            String::from_utf8_lossy(input).into_owned(),
            &input[input.len()..],
        ),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        ticks: usize,
        left: usize,
    }

    impl SongDecoder for Fixed {
        fn update(&mut self, _opl: &mut dyn OplBackend) -> bool {
            if self.left == 0 {
                return false;
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

        fn format_name(&self) -> &str {
            "fixed"
        }
    }

    fn load_fixed(data: &[u8], _name: &str, _provider: &DataProvider) -> Result<Box<dyn SongDecoder>, DecodeError> {
        match data {
            [b'F', ticks, ..] => Ok(Box::new(Fixed {
                ticks: *ticks as usize,
                left: *ticks as usize,
            })),
            [b'X', ..] => Err(DecodeError::Malformed {
                format: "fixed",
                reason: "bad".into(),
            }),
            _ => Err(DecodeError::UnsupportedFormat),
        }
    }

    const FIXED: DecoderPlugin = DecoderPlugin {
        name: "fixed",
        extensions: &[".fix"],
        load: load_fixed,
    };

    #[test]
    fn test_default_song_length() {
        let mut decoder = Fixed { ticks: 100, left: 0 };
        // 100 ticks at 50 Hz
        assert_eq!(decoder.song_length_ms(None), 2000.0);
        // measurement leaves the decoder rewound
        assert_eq!(decoder.left, 100);
    }

    #[test]
    fn test_registry_missing_file() {
        let registry = DecoderRegistry::empty();
        let provider = DataProvider::new();
        assert_eq!(
            registry.create("nope.fix", &provider).err(),
            Some(DecodeError::MissingFile("nope.fix".into()))
        );
    }

    #[test]
    fn test_registry_probes_content() {
        let mut registry = DecoderRegistry::empty();
        registry.register(FIXED);
        let mut provider = DataProvider::new();
        provider.add("song.bin", &[b'F', 3]);
        provider.add("other.bin", &[0, 0]);
        provider.add("broken.fix", &[b'X']);

        let decoder = registry.create("song.bin", &provider).unwrap();
        assert_eq!(decoder.format_name(), "fixed");
        assert_eq!(
            registry.create("other.bin", &provider).err(),
            Some(DecodeError::UnsupportedFormat)
        );
        assert!(matches!(
            registry.create("broken.fix", &provider).err(),
            Some(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_c_string() {
        let (s, rest) = c_string(b"abc\0def");
        assert_eq!(s, "abc");
        assert_eq!(rest, b"def");
        let (s, rest) = c_string(b"tail");
        assert_eq!(s, "tail");
        assert!(rest.is_empty());
    }
}
