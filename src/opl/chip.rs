//! Register-level model of one OPL2 or OPL3 chip
//!
//! Each register bank holds nine two-operator channels. An OPL3 chip has two
//! banks; the second only becomes audible with the OPL3 enable bit set, and
//! OPL3 mode also unlocks the stereo enable bits and waveforms 4-7.

use super::operator::{ChannelPitch, LfoState, Operator};
use super::tables::{
    CHANNELS_PER_BANK, CHANNEL_GAIN, CHANNEL_MODULATOR, FEEDBACK_DEPTH, MODULATION_DEPTH,
    OPERATORS_PER_BANK, SLOT_TO_OPERATOR, TREMOLO_DEPTH_DB, TREMOLO_HZ, VIBRATO_DEPTH_CENTS,
    VIBRATO_HZ,
};
use std::f64::consts::TAU;

#[derive(Debug, Clone)]
struct Channel {
    pitch: ChannelPitch,
    key: bool,
    feedback: u8,
    additive: bool,
    left: bool,
    right: bool,
    history: [f64; 2],
}

impl Default for Channel {
    fn default() -> Self {
        Channel {
            pitch: ChannelPitch::default(),
            key: false,
            feedback: 0,
            additive: false,
            left: true,
            right: true,
            history: [0.0; 2],
        }
    }
}

/// One emulated chip with one (OPL2) or two (OPL3) register banks
#[derive(Debug, Clone)]
pub struct OplChip {
    banks: usize,
    sample_rate: f64,
    opl3: bool,
    waveform_select: bool,
    deep_tremolo: bool,
    deep_vibrato: bool,
    operators: Vec<Operator>,
    channels: Vec<Channel>,
    tremolo_phase: f64,
    vibrato_phase: f64,
}

impl OplChip {
    /// Create a chip with `banks` register banks (1 = OPL2, 2 = OPL3) that
    /// produces samples at `sample_rate` Hz.
    pub fn new(banks: usize, sample_rate: f64) -> Self {
        let banks = banks.clamp(1, 2);
        OplChip {
            banks,
            sample_rate,
            opl3: false,
            waveform_select: false,
            deep_tremolo: false,
            deep_vibrato: false,
            operators: vec![Operator::new(); OPERATORS_PER_BANK * banks],
            channels: vec![Channel::default(); CHANNELS_PER_BANK * banks],
            tremolo_phase: 0.0,
            vibrato_phase: 0.0,
        }
    }

    /// Number of register banks
    pub fn banks(&self) -> usize {
        self.banks
    }

    /// Whether the OPL3 enable bit is set
    pub fn is_opl3(&self) -> bool {
        self.opl3
    }

    /// Return to the power-on state.
    pub fn reset(&mut self) {
        *self = OplChip::new(self.banks, self.sample_rate);
    }

    fn waveform_mask(&self) -> u8 {
        if self.opl3 {
            0x07
        } else if self.waveform_select {
            0x03
        } else {
            0x00
        }
    }

    /// Write `value` to register `reg` of register bank `bank`.
    ///
    /// Writes to a bank the chip does not have are dropped.
    pub fn write(&mut self, bank: usize, reg: u8, value: u8) {
        if bank >= self.banks {
            return;
        }
        match reg {
            0x01 if bank == 0 => self.waveform_select = value & 0x20 != 0,
            0x05 if bank == 1 => self.opl3 = value & 0x01 != 0,
            0x20..=0x35 | 0x40..=0x55 | 0x60..=0x75 | 0x80..=0x95 | 0xE0..=0xF5 => {
                let Some(index) = SLOT_TO_OPERATOR[(reg & 0x1F) as usize] else {
                    return;
                };
                let op = &mut self.operators[bank * OPERATORS_PER_BANK + index];
                match reg & 0xE0 {
                    0x20 => op.set_characteristics(value),
                    0x40 => op.set_levels(value),
                    0x60 => op.set_attack_decay(value),
                    0x80 => op.set_sustain_release(value),
                    _ => op.set_waveform(value & 0x07),
                }
            }
            0xA0..=0xA8 => {
                let channel = &mut self.channels[bank * CHANNELS_PER_BANK + (reg - 0xA0) as usize];
                channel.pitch.fnum = (channel.pitch.fnum & 0x300) | value as u16;
            }
            0xB0..=0xB8 => {
                let index = bank * CHANNELS_PER_BANK + (reg - 0xB0) as usize;
                let channel = &mut self.channels[index];
                channel.pitch.fnum = (channel.pitch.fnum & 0xFF) | (((value & 0x03) as u16) << 8);
                channel.pitch.block = (value >> 2) & 0x07;
                let key = value & 0x20 != 0;
                let was = std::mem::replace(&mut channel.key, key);
                if key != was {
                    self.set_key(index, key);
                }
            }
            0xBD if bank == 0 => {
                self.deep_tremolo = value & 0x80 != 0;
                self.deep_vibrato = value & 0x40 != 0;
            }
            0xC0..=0xC8 => {
                let channel = &mut self.channels[bank * CHANNELS_PER_BANK + (reg - 0xC0) as usize];
                channel.feedback = (value >> 1) & 0x07;
                channel.additive = value & 0x01 != 0;
                channel.left = value & 0x10 != 0;
                channel.right = value & 0x20 != 0;
            }
            _ => {}
        }
    }

    fn operator_pair(channel: usize) -> (usize, usize) {
        let bank = channel / CHANNELS_PER_BANK;
        let modulator = bank * OPERATORS_PER_BANK + CHANNEL_MODULATOR[channel % CHANNELS_PER_BANK];
        (modulator, modulator + 3)
    }

    fn set_key(&mut self, channel: usize, on: bool) {
        let (modulator, carrier) = Self::operator_pair(channel);
        for index in [modulator, carrier] {
            if on {
                self.operators[index].key_on();
            } else {
                self.operators[index].key_off();
            }
        }
    }

    fn advance_lfo(&mut self) -> LfoState {
        self.tremolo_phase = (self.tremolo_phase + TREMOLO_HZ / self.sample_rate).fract();
        self.vibrato_phase = (self.vibrato_phase + VIBRATO_HZ / self.sample_rate).fract();
        let tremolo_depth = TREMOLO_DEPTH_DB[self.deep_tremolo as usize];
        let vibrato_cents = VIBRATO_DEPTH_CENTS[self.deep_vibrato as usize];
        LfoState {
            tremolo_db: tremolo_depth * 0.5 * (1.0 - (TAU * self.tremolo_phase).cos()),
            vibrato_factor: (vibrato_cents * (TAU * self.vibrato_phase).sin() / 1200.0).exp2(),
        }
    }

    /// Produce one stereo sample pair, nominally within [-1, 1].
    pub fn sample(&mut self) -> (f64, f64) {
        let lfo = self.advance_lfo();
        let mask = self.waveform_mask();
        let audible_channels = if self.opl3 {
            self.channels.len()
        } else {
            CHANNELS_PER_BANK.min(self.channels.len())
        };

        let (mut left, mut right) = (0.0, 0.0);
        for index in 0..audible_channels {
            let (modulator, carrier) = Self::operator_pair(index);
            let channel = &mut self.channels[index];
            let pitch = channel.pitch;

            let feedback = if channel.feedback > 0 {
                (channel.history[0] + channel.history[1]) * 0.5 * FEEDBACK_DEPTH[channel.feedback as usize]
            } else {
                0.0
            };
            let m = self.operators[modulator].next_sample(&pitch, &lfo, feedback, mask, self.sample_rate);
            channel.history = [channel.history[1], m];

            let out = if channel.additive {
                m + self.operators[carrier].next_sample(&pitch, &lfo, 0.0, mask, self.sample_rate)
            } else {
                self.operators[carrier].next_sample(&pitch, &lfo, m * MODULATION_DEPTH, mask, self.sample_rate)
            } * CHANNEL_GAIN;

            // OPL2 mode ignores the stereo enable bits
            if !self.opl3 || channel.left {
                left += out;
            }
            if !self.opl3 || channel.right {
                right += out;
            }
        }
        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_tone(chip: &mut OplChip, bank: usize) {
        chip.write(bank, 0x20, 0x21);
        chip.write(bank, 0x40, 0x3F); // modulator silent
        chip.write(bank, 0x60, 0xF0);
        chip.write(bank, 0x80, 0x05);
        chip.write(bank, 0x23, 0x21);
        chip.write(bank, 0x43, 0x00);
        chip.write(bank, 0x63, 0xF0);
        chip.write(bank, 0x83, 0x05);
        chip.write(bank, 0xC0, 0x30);
        chip.write(bank, 0xA0, 0x44);
        chip.write(bank, 0xB0, 0x32);
    }

    fn peak(chip: &mut OplChip, samples: usize) -> (f64, f64) {
        let (mut l, mut r) = (0.0f64, 0.0f64);
        for _ in 0..samples {
            let (a, b) = chip.sample();
            l = l.max(a.abs());
            r = r.max(b.abs());
        }
        (l, r)
    }

    #[test]
    fn test_reset_chip_is_silent() {
        let mut chip = OplChip::new(1, 44_100.0);
        assert_eq!(peak(&mut chip, 1000), (0.0, 0.0));
    }

    #[test]
    fn test_key_on_produces_sound() {
        let mut chip = OplChip::new(1, 44_100.0);
        program_tone(&mut chip, 0);
        let (l, r) = peak(&mut chip, 2000);
        assert!(l > 0.1);
        assert_eq!(l, r);
    }

    #[test]
    fn test_second_bank_needs_opl3_mode() {
        let mut chip = OplChip::new(2, 44_100.0);
        program_tone(&mut chip, 1);
        assert_eq!(peak(&mut chip, 500), (0.0, 0.0));

        chip.write(1, 0x05, 0x01);
        assert!(chip.is_opl3());
        let (l, r) = peak(&mut chip, 2000);
        assert!(l > 0.1 && r > 0.1);
    }

    #[test]
    fn test_opl3_stereo_enables() {
        let mut chip = OplChip::new(2, 44_100.0);
        chip.write(1, 0x05, 0x01);
        program_tone(&mut chip, 0);
        chip.write(0, 0xC0, 0x10); // left only
        let (l, r) = peak(&mut chip, 2000);
        assert!(l > 0.1);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_writes_to_missing_bank_ignored() {
        let mut chip = OplChip::new(1, 44_100.0);
        program_tone(&mut chip, 1);
        assert_eq!(peak(&mut chip, 500), (0.0, 0.0));
    }

    #[test]
    fn test_reset_silences() {
        let mut chip = OplChip::new(1, 44_100.0);
        program_tone(&mut chip, 0);
        peak(&mut chip, 100);
        chip.reset();
        assert_eq!(peak(&mut chip, 500), (0.0, 0.0));
    }
}
