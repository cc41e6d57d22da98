//! Rdos RAW OPL capture (`RAWADATA`)
//!
//! Format details:
//! - Header: `RAWADATA` + initial clock divisor (u16 LE)
//! - Body: 2-byte records `value, command`
//!   - command 0: wait `value` ticks
//!   - command 2, value 0: the next record holds a new clock divisor
//!   - command 2, value n: select chip `n - 1`
//!   - `0xFF 0xFF`: end of song
//!   - anything else: write `value` to register `command`
//! - Optional tags after the end marker: `0x1A` title, `0x1B` author,
//!   `0x1C` description (NUL-terminated)

use super::{c_string, DataProvider, DecodeError, DecoderPlugin, SongDecoder};
use crate::opl::OplBackend;
use nom::bytes::complete::tag;
use nom::number::complete::{le_u16, le_u8};
use nom::sequence::{preceded, tuple};
use nom::IResult;

/// Programmable interval timer clock the divisor applies to
pub const PIT_CLOCK: f32 = 1_193_180.0;

/// Plugin table entry
pub const PLUGIN: DecoderPlugin = DecoderPlugin {
    name: "RAW",
    extensions: &[".raw"],
    load,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawRecord {
    param: u8,
    command: u8,
}

const END_MARKER: RawRecord = RawRecord {
    param: 0xFF,
    command: 0xFF,
};

fn header(input: &[u8]) -> IResult<&[u8], u16> {
    preceded(tag(&b"RAWADATA"[..]), le_u16)(input)
}

fn record(input: &[u8]) -> IResult<&[u8], RawRecord> {
    let (input, (param, command)) = tuple((le_u8, le_u8))(input)?;
    Ok((input, RawRecord { param, command }))
}

/// RAW capture decoder
#[derive(Debug, Clone)]
pub struct RawDecoder {
    records: Vec<RawRecord>,
    clock: u16,
    speed: u16,
    pos: usize,
    delay: u8,
    song_end: bool,
    title: String,
    author: String,
    description: String,
}

impl RawDecoder {
    /// Parse a RAW capture.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let (mut input, clock) = header(data).map_err(|_| DecodeError::UnsupportedFormat)?;

        let mut records = Vec::with_capacity(input.len() / 2);
        let mut tags = None;
        while let Ok((rest, rec)) = record(input) {
            records.push(rec);
            input = rest;
            if rec == END_MARKER && input.first() == Some(&0x1A) {
                tags = Some(&input[1..]);
                break;
            }
        }
        if records.is_empty() {
            return Err(DecodeError::Malformed {
                format: "RAW",
                reason: "no music data".to_string(),
            });
        }

        let mut decoder = RawDecoder {
            records,
            clock,
            speed: clock,
            pos: 0,
            delay: 0,
            song_end: false,
            title: String::new(),
            author: String::new(),
            description: String::new(),
        };
        if let Some(tags) = tags {
            decoder.read_tags(tags);
        }
        Ok(decoder)
    }

    fn read_tags(&mut self, input: &[u8]) {
        let (title, mut rest) = c_string(input);
        self.title = title;
        if rest.first() == Some(&0x1B) {
            let (author, tail) = c_string(&rest[1..]);
            self.author = author;
            rest = tail;
        }
        if rest.first() == Some(&0x1C) {
            let (description, _) = c_string(&rest[1..]);
            self.description = description;
        }
    }

    fn restart(&mut self, opl: &mut dyn OplBackend) {
        self.pos = 0;
        self.delay = 0;
        self.speed = self.clock;
        self.song_end = false;
        opl.reset();
        opl.write(0x01, 0x20);
    }
}

fn load(data: &[u8], _filename: &str, _provider: &DataProvider) -> Result<Box<dyn SongDecoder>, DecodeError> {
    Ok(Box::new(RawDecoder::parse(data)?))
}

impl SongDecoder for RawDecoder {
    fn update(&mut self, opl: &mut dyn OplBackend) -> bool {
        if self.pos >= self.records.len() {
            return false;
        }
        if self.delay > 0 {
            self.delay -= 1;
            return !self.song_end;
        }

        loop {
            let Some(&rec) = self.records.get(self.pos) else {
                return false;
            };
            match rec.command {
                0 => self.delay = rec.param.wrapping_sub(1),
                2 if rec.param == 0 => {
                    self.pos += 1;
                    let Some(next) = self.records.get(self.pos) else {
                        return false;
                    };
                    self.speed = next.param as u16 | ((next.command as u16) << 8);
                }
                2 => opl.set_chip(rec.param as usize - 1),
                0xFF if rec.param == 0xFF => {
                    self.restart(opl);
                    self.song_end = true;
                    return false;
                }
                reg => opl.write(reg, rec.param),
            }
            self.pos += 1;
            if rec.command == 0 {
                return !self.song_end;
            }
        }
    }

    fn rewind(&mut self, _subsong: Option<usize>, opl: &mut dyn OplBackend) {
        self.restart(opl);
    }

    fn refresh_rate(&self) -> f32 {
        let divisor = if self.speed == 0 { 0xFFFF } else { self.speed };
        PIT_CLOCK / divisor as f32
    }

    fn speed(&self) -> u32 {
        self.speed as u32
    }

    fn format_name(&self) -> &str {
        "Raw AdLib Capture"
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn author(&self) -> &str {
        &self.author
    }

    fn description(&self) -> &str {
        &self.description
    }
}
