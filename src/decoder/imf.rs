//! id Software Music Format (IMF/WLF)
//!
//! Format details:
//! - Optional header: `ADLIB` + version byte 1, track and game names
//!   (NUL-terminated), one reserved byte, then a 32-bit data length
//! - Without header: a 16-bit data length; zero means the whole file is
//!   music data (type-0 files)
//! - Music data: 4-byte records `register, value, delay (u16 LE)`
//! - Optional footer after the data: `0x1A` followed by title, author and
//!   remarks as NUL-terminated strings, or free text

use super::{c_string, DataProvider, DecodeError, DecoderPlugin, SongDecoder};
use crate::opl::OplBackend;
use nom::bytes::complete::tag;
use nom::combinator::verify;
use nom::multi::count;
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::sequence::tuple;
use nom::IResult;

/// Default tick clock of IMF files in Hz
pub const IMF_RATE: f32 = 560.0;
/// Tick clock of Wolfenstein 3D (`.wlf`) files in Hz
pub const WLF_RATE: f32 = 700.0;

/// Plugin table entry
pub const PLUGIN: DecoderPlugin = DecoderPlugin {
    name: "IMF",
    extensions: &[".imf", ".wlf"],
    load,
};

const FORMAT: &str = "IMF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImfRecord {
    reg: u8,
    value: u8,
    delay: u16,
}

fn record(input: &[u8]) -> IResult<&[u8], ImfRecord> {
    let (input, (reg, value, delay)) = tuple((le_u8, le_u8, le_u16))(input)?;
    Ok((input, ImfRecord { reg, value, delay }))
}

fn adlib_header(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, _) = tag(&b"ADLIB"[..])(input)?;
    verify(le_u8, |version: &u8| *version == 1)(input)
}

fn malformed(reason: &str) -> DecodeError {
    DecodeError::Malformed {
        format: FORMAT,
        reason: reason.to_string(),
    }
}

/// IMF/WLF decoder
#[derive(Debug, Clone)]
pub struct ImfDecoder {
    records: Vec<ImfRecord>,
    rate: f32,
    pos: usize,
    timer: f32,
    song_end: bool,
    title: String,
    author: String,
    remarks: String,
}

impl ImfDecoder {
    /// Parse `data`; `filename` decides whether headerless data is accepted
    /// and which tick clock applies.
    pub fn parse(data: &[u8], filename: &str) -> Result<Self, DecodeError> {
        let lower = filename.to_ascii_lowercase();
        let is_wlf = lower.ends_with(".wlf");
        let by_extension = is_wlf || lower.ends_with(".imf");

        let mut track_name = String::new();
        let mut game_name = String::new();
        let (body, has_header) = match adlib_header(data) {
            Ok((rest, _)) => {
                let (track, rest) = c_string(rest);
                let (game, rest) = c_string(rest);
                track_name = track;
                game_name = game;
                (rest.get(1..).unwrap_or_default(), true)
            }
            Err(_) if by_extension => (data, false),
            Err(_) => return Err(DecodeError::UnsupportedFormat),
        };

        let length_field: IResult<&[u8], u32> = if has_header {
            le_u32(body)
        } else {
            le_u16(body).map(|(rest, length)| (rest, length as u32))
        };
        let (after_length, length) = length_field.map_err(|_| malformed("file too short"))?;

        let (music, wanted) = if length == 0 {
            (body, body.len() / 4)
        } else {
            (after_length, length as usize / 4)
        };
        let record_count = wanted.min(music.len() / 4);
        if record_count == 0 {
            return Err(malformed("no music data"));
        }

        let (footer, records) = count(record, record_count)(music)
            .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| malformed("truncated music data"))?;

        let mut author = String::new();
        let mut remarks = String::new();
        if length != 0 && !footer.is_empty() {
            if footer[0] == 0x1A {
                let (title, rest) = c_string(&footer[1..]);
                let (by, rest) = c_string(rest);
                let (notes, _) = c_string(rest);
                if !title.is_empty() {
                    track_name = title;
                }
                author = by;
                remarks = notes;
            } else {
                remarks = String::from_utf8_lossy(footer)
                    .trim_end_matches('\0')
                    .to_string();
            }
        }

        let mut title = track_name;
        if !title.is_empty() && !game_name.is_empty() {
            title.push_str(" - ");
        }
        title.push_str(&game_name);

        let rate = if is_wlf { WLF_RATE } else { IMF_RATE };
        Ok(ImfDecoder {
            records,
            rate,
            pos: 0,
            timer: rate,
            song_end: false,
            title,
            author,
            remarks,
        })
    }

    /// Number of register write records
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

fn load(data: &[u8], filename: &str, _provider: &DataProvider) -> Result<Box<dyn SongDecoder>, DecodeError> {
    Ok(Box::new(ImfDecoder::parse(data, filename)?))
}

impl SongDecoder for ImfDecoder {
    fn update(&mut self, opl: &mut dyn OplBackend) -> bool {
        let mut delay = 0;
        while delay == 0 && self.pos < self.records.len() {
            let record = self.records[self.pos];
            opl.write(record.reg, record.value);
            delay = record.delay;
            self.pos += 1;
        }

        if self.pos >= self.records.len() {
            self.pos = 0;
            self.song_end = true;
        } else {
            self.timer = self.rate / delay as f32;
        }
        !self.song_end
    }

    fn rewind(&mut self, _subsong: Option<usize>, opl: &mut dyn OplBackend) {
        self.pos = 0;
        self.timer = self.rate;
        self.song_end = false;
        opl.reset();
        opl.write(0x01, 0x20);
    }

    fn refresh_rate(&self) -> f32 {
        self.timer
    }

    fn speed(&self) -> u32 {
        self.rate as u32
    }

    fn format_name(&self) -> &str {
        "IMF File Format"
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn author(&self) -> &str {
        &self.author
    }

    fn description(&self) -> &str {
        &self.remarks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::RecordingOpl;
    use approx::assert_relative_eq;

    fn type1(records: &[(u8, u8, u16)], footer: &[u8]) -> Vec<u8> {
        let mut data = ((records.len() * 4) as u16).to_le_bytes().to_vec();
        for &(reg, value, delay) in records {
            data.extend_from_slice(&[reg, value]);
            data.extend_from_slice(&delay.to_le_bytes());
        }
        data.extend_from_slice(footer);
        data
    }

    #[test]
    fn test_update_groups_until_delay() {
        let data = type1(&[(0x20, 0x01, 0), (0xB0, 0x31, 10), (0xB0, 0x11, 0)], &[]);
        let mut decoder = ImfDecoder::parse(&data, "song.imf").unwrap();
        let mut opl = RecordingOpl::default();
        decoder.rewind(None, &mut opl);
        opl.writes.clear();

        assert!(decoder.update(&mut opl));
        assert_eq!(opl.writes, vec![(0, 0x20, 0x01), (0, 0xB0, 0x31)]);
        assert_relative_eq!(decoder.refresh_rate(), 56.0);

        assert!(!decoder.update(&mut opl));
        assert_eq!(opl.writes.len(), 3);
        // stays ended until rewound
        assert!(!decoder.update(&mut opl));
    }

    #[test]
    fn test_rewind_inits_chip() {
        let data = type1(&[(0xB0, 0x31, 1)], &[]);
        let mut decoder = ImfDecoder::parse(&data, "song.imf").unwrap();
        let mut opl = RecordingOpl::default();
        decoder.rewind(None, &mut opl);
        assert_eq!(opl.resets, 1);
        assert_eq!(opl.writes, vec![(0, 0x01, 0x20)]);
    }

    #[test]
    fn test_type0_uses_whole_file() {
        // first word zero: whole file is records
        let data = [0u8, 0, 0, 0, 0xB0, 0x31, 4, 0, 0xB0, 0x11, 0, 0];
        let decoder = ImfDecoder::parse(&data, "song.imf").unwrap();
        assert_eq!(decoder.record_count(), 3);
    }

    #[test]
    fn test_footer_tags() {
        let data = type1(&[(0xB0, 0x31, 1)], b"\x1aTheme\0Bobby\0Level 1\0");
        let decoder = ImfDecoder::parse(&data, "song.imf").unwrap();
        assert_eq!(decoder.title(), "Theme");
        assert_eq!(decoder.author(), "Bobby");
        assert_eq!(decoder.description(), "Level 1");
    }

    #[test]
    fn test_wlf_rate() {
        let data = type1(&[(0xB0, 0x31, 1)], &[]);
        let decoder = ImfDecoder::parse(&data, "SONG.WLF").unwrap();
        assert_relative_eq!(decoder.refresh_rate(), WLF_RATE);
    }

    #[test]
    fn test_requires_extension_or_header() {
        let data = type1(&[(0xB0, 0x31, 1)], &[]);
        assert_eq!(
            ImfDecoder::parse(&data, "song.bin").err(),
            Some(DecodeError::UnsupportedFormat)
        );

        let mut with_header = b"ADLIB\x01Track\0Game\0\0".to_vec();
        with_header.extend_from_slice(&4u32.to_le_bytes());
        with_header.extend_from_slice(&[0xB0, 0x31, 1, 0]);
        let decoder = ImfDecoder::parse(&with_header, "song.bin").unwrap();
        assert_eq!(decoder.title(), "Track - Game");
        assert_eq!(decoder.record_count(), 1);
    }

    #[test]
    fn test_empty_data_rejected() {
        assert!(matches!(
            ImfDecoder::parse(&[0, 0], "song.imf"),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
