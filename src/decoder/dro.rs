//! DOSBox raw OPL capture, version 2.0 (`DBRAWOPL`)
//!
//! Format details:
//! - Header: `DBRAWOPL`, version (u16 major = 2, u16 minor = 0), length in
//!   byte pairs (u32), length in milliseconds (u32), hardware type, format
//!   (0 = interleaved), compression (0 = none), short and long delay codes,
//!   codemap length and the codemap itself
//! - Body: `index, value` pairs. The delay codes wait `value + 1` ms or
//!   `(value + 1) << 8` ms; any other index is looked up in the codemap, with
//!   bit 7 selecting the second chip or register bank.

use super::{DataProvider, DecodeError, DecoderPlugin, SongDecoder};
use crate::opl::OplBackend;
use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::IResult;

/// Plugin table entry
pub const PLUGIN: DecoderPlugin = DecoderPlugin {
    name: "DRO",
    extensions: &[".dro"],
    load,
};

/// Hardware the capture was recorded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroHardware {
    /// Single OPL2
    Opl2,
    /// Two OPL2 chips
    DualOpl2,
    /// OPL3
    Opl3,
}

#[derive(Debug, Clone)]
struct DroHeader {
    pairs: u32,
    length_ms: u32,
    hardware: u8,
    format: u8,
    compression: u8,
    short_delay: u8,
    long_delay: u8,
    codemap: Vec<u8>,
}

fn header(input: &[u8]) -> IResult<&[u8], DroHeader> {
    let (input, _) = tag(&b"DBRAWOPL"[..])(input)?;
    let (input, _major) = nom::combinator::verify(le_u16, |v: &u16| *v == 2)(input)?;
    let (input, _minor) = le_u16(input)?;
    let (input, pairs) = le_u32(input)?;
    let (input, length_ms) = le_u32(input)?;
    let (input, hardware) = le_u8(input)?;
    let (input, format) = le_u8(input)?;
    let (input, compression) = le_u8(input)?;
    let (input, short_delay) = le_u8(input)?;
    let (input, long_delay) = le_u8(input)?;
    let (input, codemap_len) = le_u8(input)?;
    let (input, codemap) = take(codemap_len)(input)?;
    Ok((
        input,
        DroHeader {
            pairs,
            length_ms,
            hardware,
            format,
            compression,
            short_delay,
            long_delay,
            codemap: codemap.to_vec(),
        },
    ))
}

fn malformed(reason: &str) -> DecodeError {
    DecodeError::Malformed {
        format: "DRO",
        reason: reason.to_string(),
    }
}

/// DRO v2 decoder
#[derive(Debug, Clone)]
pub struct DroDecoder {
    data: Vec<u8>,
    codemap: Vec<u8>,
    short_delay: u8,
    long_delay: u8,
    hardware: DroHardware,
    length_ms: u32,
    pos: usize,
    delay_ms: u32,
}

impl DroDecoder {
    /// Parse a DRO v2 capture.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if !data.starts_with(b"DBRAWOPL") {
            return Err(DecodeError::UnsupportedFormat);
        }
        let (body, header) = header(data).map_err(|_| malformed("unsupported version or truncated header"))?;
        if header.format != 0 {
            return Err(malformed("interleaved format required"));
        }
        if header.compression != 0 {
            return Err(malformed("compressed captures are not supported"));
        }

        let wanted = (header.pairs as usize).saturating_mul(2);
        let available = body.len() & !1;
        let data = body[..wanted.min(available)].to_vec();
        if data.is_empty() {
            return Err(malformed("no music data"));
        }

        let hardware = match header.hardware {
            1 => DroHardware::DualOpl2,
            2 => DroHardware::Opl3,
            _ => DroHardware::Opl2,
        };
        Ok(DroDecoder {
            data,
            codemap: header.codemap,
            short_delay: header.short_delay,
            long_delay: header.long_delay,
            hardware,
            length_ms: header.length_ms,
            pos: 0,
            delay_ms: 0,
        })
    }

    /// Hardware the capture was recorded from
    pub fn hardware(&self) -> DroHardware {
        self.hardware
    }

    /// Song length stored in the header, in milliseconds
    pub fn header_length_ms(&self) -> u32 {
        self.length_ms
    }
}

fn load(data: &[u8], _filename: &str, _provider: &DataProvider) -> Result<Box<dyn SongDecoder>, DecodeError> {
    Ok(Box::new(DroDecoder::parse(data)?))
}

impl SongDecoder for DroDecoder {
    fn update(&mut self, opl: &mut dyn OplBackend) -> bool {
        while self.pos + 1 < self.data.len() {
            let index = self.data[self.pos];
            let value = self.data[self.pos + 1];
            self.pos += 2;

            if index == self.short_delay {
                self.delay_ms = value as u32 + 1;
                return true;
            }
            if index == self.long_delay {
                self.delay_ms = (value as u32 + 1) << 8;
                return true;
            }

            opl.set_chip(usize::from(index & 0x80 != 0));
            // corrupt capture: stop rather than guess
            let Some(&reg) = self.codemap.get((index & 0x7F) as usize) else {
                return false;
            };
            opl.write(reg, value);
        }
        false
    }

    fn rewind(&mut self, _subsong: Option<usize>, opl: &mut dyn OplBackend) {
        self.pos = 0;
        self.delay_ms = 0;
        opl.reset();
    }

    fn refresh_rate(&self) -> f32 {
        if self.delay_ms > 0 {
            1000.0 / self.delay_ms as f32
        } else {
            1000.0
        }
    }

    fn format_name(&self) -> &str {
        "DOSBox Raw OPL v2.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::RecordingOpl;
    use approx::assert_relative_eq;

    const SHORT: u8 = 0x70;
    const LONG: u8 = 0x71;

    fn capture(hardware: u8, codemap: &[u8], body: &[u8]) -> Vec<u8> {
        let mut data = b"DBRAWOPL".to_vec();
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&((body.len() / 2) as u32).to_le_bytes());
        data.extend_from_slice(&1234u32.to_le_bytes());
        data.extend_from_slice(&[hardware, 0, 0, SHORT, LONG, codemap.len() as u8]);
        data.extend_from_slice(codemap);
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_header() {
        let data = capture(2, &[0x20, 0xB0], &[0, 1, SHORT, 9]);
        let decoder = DroDecoder::parse(&data).unwrap();
        assert_eq!(decoder.hardware(), DroHardware::Opl3);
        assert_eq!(decoder.header_length_ms(), 1234);
    }

    #[test]
    fn test_codemap_and_delays() {
        let body = [0x00, 0x01, 0x81, 0x31, SHORT, 9, 0x01, 0x11, LONG, 0];
        let data = capture(1, &[0x20, 0xB0], &body);
        let mut decoder = DroDecoder::parse(&data).unwrap();
        let mut opl = RecordingOpl::default();
        decoder.rewind(None, &mut opl);

        assert!(decoder.update(&mut opl));
        assert_eq!(opl.writes, vec![(0, 0x20, 0x01), (1, 0xB0, 0x31)]);
        assert_relative_eq!(decoder.refresh_rate(), 100.0);

        assert!(decoder.update(&mut opl));
        assert_eq!(opl.writes[2], (0, 0xB0, 0x11));
        assert_relative_eq!(decoder.refresh_rate(), 1000.0 / 256.0);

        assert!(!decoder.update(&mut opl));
    }

    #[test]
    fn test_bad_codemap_index_ends_song() {
        let data = capture(0, &[0x20], &[0x05, 0x01, SHORT, 0]);
        let mut decoder = DroDecoder::parse(&data).unwrap();
        let mut opl = RecordingOpl::default();
        decoder.rewind(None, &mut opl);
        assert!(!decoder.update(&mut opl));
        assert!(opl.writes.is_empty());
    }

    #[test]
    fn test_rejects_version_one() {
        let mut data = capture(0, &[0x20], &[0, 1]);
        data[8] = 1;
        assert!(matches!(DroDecoder::parse(&data), Err(DecodeError::Malformed { .. })));
        assert_eq!(
            DroDecoder::parse(b"RAWADATA").err(),
            Some(DecodeError::UnsupportedFormat)
        );
    }
}
