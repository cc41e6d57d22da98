//! FM operator: phase generator, waveform and ADSR envelope

use super::tables::{
    db_to_gain, waveform, ATTACK_MS_BASE, DECAY_MS_BASE, ENV_MAX_DB, KSL_ROM, KSL_SCALE,
    MULTIPLIERS,
};
use bitflags::bitflags;

bitflags! {
    /// Operator characteristic register (0x20-0x35) flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OperatorFlags: u8 {
        /// Tremolo (amplitude modulation)
        const TREMOLO = 0x80;
        /// Vibrato (frequency modulation)
        const VIBRATO = 0x40;
        /// Sustain while key is held (EG type)
        const SUSTAIN = 0x20;
        /// Key scale rate
        const KSR = 0x10;
    }
}

/// Envelope generator stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    /// Fully attenuated, key off
    #[default]
    Off,
    /// Rising towards 0 dB
    Attack,
    /// Falling towards the sustain level
    Decay,
    /// Holding the sustain level while the key is down
    Sustain,
    /// Falling towards silence
    Release,
}

/// Pitch information shared by both operators of a channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelPitch {
    /// 10-bit F-number
    pub fnum: u16,
    /// Octave block (0..=7)
    pub block: u8,
}

impl ChannelPitch {
    /// Base frequency in Hz before the operator multiplier.
    pub fn frequency(&self) -> f64 {
        self.fnum as f64 * super::tables::NATIVE_RATE / f64::from(1u32 << (20 - self.block as u32))
    }

    /// Key code used for rate scaling.
    fn key_code(&self) -> u8 {
        (self.block << 1) | ((self.fnum >> 9) & 1) as u8
    }
}

/// Per-sample modulation inputs computed once for the whole chip.
#[derive(Debug, Clone, Copy, Default)]
pub struct LfoState {
    /// Tremolo attenuation in dB for operators with AM enabled
    pub tremolo_db: f64,
    /// Frequency factor for operators with vibrato enabled
    pub vibrato_factor: f64,
}

/// One FM operator
#[derive(Debug, Clone, Default)]
pub struct Operator {
    flags: OperatorFlags,
    multiplier: u8,
    ksl: u8,
    total_level: u8,
    attack: u8,
    decay: u8,
    sustain_level: u8,
    release: u8,
    waveform: u8,
    phase: f64,
    stage: EnvelopeStage,
    attenuation: f64,
}

impl Operator {
    /// Create an operator in its power-on state
    pub fn new() -> Self {
        Operator {
            attenuation: ENV_MAX_DB,
            ..Default::default()
        }
    }

    /// Write the characteristic register (0x20 range).
    pub fn set_characteristics(&mut self, value: u8) {
        self.flags = OperatorFlags::from_bits_truncate(value);
        self.multiplier = value & 0x0F;
    }

    /// Write the level register (0x40 range).
    pub fn set_levels(&mut self, value: u8) {
        self.ksl = value >> 6;
        self.total_level = value & 0x3F;
    }

    /// Write the attack/decay register (0x60 range).
    pub fn set_attack_decay(&mut self, value: u8) {
        self.attack = value >> 4;
        self.decay = value & 0x0F;
    }

    /// Write the sustain/release register (0x80 range).
    pub fn set_sustain_release(&mut self, value: u8) {
        self.sustain_level = value >> 4;
        self.release = value & 0x0F;
    }

    /// Write the waveform register (0xE0 range); the chip masks the value.
    pub fn set_waveform(&mut self, shape: u8) {
        self.waveform = shape;
    }

    /// Current envelope stage
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Current envelope attenuation in dB
    pub fn attenuation(&self) -> f64 {
        self.attenuation
    }

    /// Start the attack phase and restart the oscillator.
    pub fn key_on(&mut self) {
        self.phase = 0.0;
        self.stage = EnvelopeStage::Attack;
    }

    /// Enter the release phase.
    pub fn key_off(&mut self) {
        if self.stage != EnvelopeStage::Off {
            self.stage = EnvelopeStage::Release;
        }
    }

    fn effective_rate(&self, rate: u8, pitch: &ChannelPitch) -> u8 {
        if rate == 0 {
            return 0;
        }
        let key_code = pitch.key_code();
        let offset = if self.flags.contains(OperatorFlags::KSR) {
            key_code
        } else {
            key_code >> 2
        };
        (rate * 4 + offset).min(63)
    }

    /// dB change per sample for a full-range ramp lasting `base_ms` at rate 4.
    fn ramp_step(base_ms: f64, effective_rate: u8, sample_rate: f64) -> f64 {
        if effective_rate == 0 {
            return 0.0;
        }
        let ms = base_ms / ((effective_rate as f64 - 4.0) / 4.0).exp2();
        ENV_MAX_DB / (ms * 0.001 * sample_rate).max(1.0)
    }

    fn advance_envelope(&mut self, pitch: &ChannelPitch, sample_rate: f64) {
        let sustain_db = if self.sustain_level == 15 {
            93.0
        } else {
            self.sustain_level as f64 * 3.0
        };
        match self.stage {
            EnvelopeStage::Off => self.attenuation = ENV_MAX_DB,
            EnvelopeStage::Attack => {
                let rate = self.effective_rate(self.attack, pitch);
                if rate >= 60 {
                    self.attenuation = 0.0;
                } else {
                    self.attenuation -= Self::ramp_step(ATTACK_MS_BASE, rate, sample_rate);
                }
                if self.attenuation <= 0.0 {
                    self.attenuation = 0.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                let rate = self.effective_rate(self.decay, pitch);
                self.attenuation += Self::ramp_step(DECAY_MS_BASE, rate, sample_rate);
                if self.attenuation >= sustain_db {
                    self.attenuation = sustain_db;
                    self.stage = if self.flags.contains(OperatorFlags::SUSTAIN) {
                        EnvelopeStage::Sustain
                    } else {
                        EnvelopeStage::Release
                    };
                }
            }
            EnvelopeStage::Sustain => {}
            EnvelopeStage::Release => {
                let rate = self.effective_rate(self.release, pitch);
                self.attenuation += Self::ramp_step(DECAY_MS_BASE, rate, sample_rate);
                if self.attenuation >= ENV_MAX_DB {
                    self.attenuation = ENV_MAX_DB;
                    self.stage = EnvelopeStage::Off;
                }
            }
        }
    }

    fn key_scale_db(&self, pitch: &ChannelPitch) -> f64 {
        if self.ksl == 0 {
            return 0.0;
        }
        let base = KSL_ROM[(pitch.fnum >> 6) as usize & 0x0F] - 6.0 * (7 - pitch.block) as f64;
        base.max(0.0) * KSL_SCALE[self.ksl as usize]
    }

    /// Produce one output sample in [-1, 1].
    ///
    /// `modulation` is the phase offset in cycles contributed by the modulator
    /// or by feedback.
    pub fn next_sample(
        &mut self,
        pitch: &ChannelPitch,
        lfo: &LfoState,
        modulation: f64,
        waveform_mask: u8,
        sample_rate: f64,
    ) -> f64 {
        self.advance_envelope(pitch, sample_rate);

        let mut freq = pitch.frequency() * MULTIPLIERS[self.multiplier as usize];
        if self.flags.contains(OperatorFlags::VIBRATO) {
            freq *= lfo.vibrato_factor;
        }

        let mut db = self.attenuation + self.total_level as f64 * 0.75 + self.key_scale_db(pitch);
        if self.flags.contains(OperatorFlags::TREMOLO) {
            db += lfo.tremolo_db;
        }

        let out = waveform(self.waveform & waveform_mask, self.phase + modulation) * db_to_gain(db);
        self.phase = (self.phase + freq / sample_rate).rem_euclid(1.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 44_100.0;

    fn pitch() -> ChannelPitch {
        ChannelPitch {
            fnum: 0x244,
            block: 4,
        }
    }

    fn loud_operator() -> Operator {
        let mut op = Operator::new();
        op.set_characteristics(0x21); // sustain, MULT=1
        op.set_levels(0x00);
        op.set_attack_decay(0xF0);
        op.set_sustain_release(0x05);
        op
    }

    #[test]
    fn test_pitch_frequency() {
        // F-number 0x244 at block 4 is concert A
        let f = pitch().frequency();
        assert!((f - 440.0).abs() < 0.5, "frequency {f}");
    }

    #[test]
    fn test_silent_until_key_on() {
        let mut op = loud_operator();
        let lfo = LfoState {
            tremolo_db: 0.0,
            vibrato_factor: 1.0,
        };
        for _ in 0..100 {
            assert_eq!(op.next_sample(&pitch(), &lfo, 0.0, 3, RATE), 0.0);
        }
    }

    #[test]
    fn test_instant_attack_then_sustain() {
        let mut op = loud_operator();
        let lfo = LfoState {
            tremolo_db: 0.0,
            vibrato_factor: 1.0,
        };
        op.key_on();
        let mut peak: f64 = 0.0;
        for _ in 0..200 {
            peak = peak.max(op.next_sample(&pitch(), &lfo, 0.0, 3, RATE).abs());
        }
        assert!(peak > 0.9, "peak {peak}");
        assert_eq!(op.stage(), EnvelopeStage::Sustain);
    }

    #[test]
    fn test_release_reaches_off() {
        let mut op = loud_operator();
        op.set_sustain_release(0x0F); // fastest release
        let lfo = LfoState {
            tremolo_db: 0.0,
            vibrato_factor: 1.0,
        };
        op.key_on();
        for _ in 0..10 {
            op.next_sample(&pitch(), &lfo, 0.0, 3, RATE);
        }
        op.key_off();
        for _ in 0..(RATE as usize) {
            op.next_sample(&pitch(), &lfo, 0.0, 3, RATE);
        }
        assert_eq!(op.stage(), EnvelopeStage::Off);
    }
}
