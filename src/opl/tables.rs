//! Constant tables for the FM core

/// Native OPL sample rate (14.31818 MHz / 288).
pub const NATIVE_RATE: f64 = 49_716.0;

/// Channels per register bank.
pub const CHANNELS_PER_BANK: usize = 9;

/// Operators per register bank.
pub const OPERATORS_PER_BANK: usize = 18;

/// Envelope floor in dB; anything at or below is silent.
pub const ENV_MAX_DB: f64 = 96.0;

/// Frequency multiplier per MULT register value.
pub const MULTIPLIERS: [f64; 16] = [
    0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 10.0, 12.0, 12.0, 15.0, 15.0,
];

/// Key scale level attenuation by the top four F-number bits, in dB at block 7.
pub const KSL_ROM: [f64; 16] = [
    0.0, 18.0, 24.0, 27.75, 30.0, 32.25, 33.75, 35.25, 36.0, 37.5, 38.25, 39.0, 39.75, 40.5, 41.25,
    42.0,
];

/// Scale applied to [`KSL_ROM`] per KSL register value (0, 3, 1.5, 6 dB/octave).
pub const KSL_SCALE: [f64; 4] = [0.0, 0.5, 0.25, 1.0];

/// Operator index for each register slot offset (0x00..=0x15); `None` for gaps.
pub const SLOT_TO_OPERATOR: [Option<usize>; 22] = [
    Some(0),
    Some(1),
    Some(2),
    Some(3),
    Some(4),
    Some(5),
    None,
    None,
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
    Some(11),
    None,
    None,
    Some(12),
    Some(13),
    Some(14),
    Some(15),
    Some(16),
    Some(17),
];

/// Modulator operator index of each channel; the carrier sits three operators later.
pub const CHANNEL_MODULATOR: [usize; CHANNELS_PER_BANK] = [0, 1, 2, 6, 7, 8, 12, 13, 14];

/// Feedback modulation depth in waveform cycles, per FB register value.
pub const FEEDBACK_DEPTH: [f64; 8] = [0.0, 1.0 / 32.0, 1.0 / 16.0, 1.0 / 8.0, 0.25, 0.5, 1.0, 2.0];

/// Carrier phase modulation depth in cycles for a full-scale modulator.
pub const MODULATION_DEPTH: f64 = 1.0;

/// Full attack time in milliseconds at effective rate 4; halves every four rate steps.
pub const ATTACK_MS_BASE: f64 = 2826.24;

/// Full 96 dB decay time in milliseconds at effective rate 4.
pub const DECAY_MS_BASE: f64 = 39_280.64;

/// Tremolo LFO frequency in Hz.
pub const TREMOLO_HZ: f64 = 3.7;

/// Vibrato LFO frequency in Hz.
pub const VIBRATO_HZ: f64 = 6.1;

/// Tremolo depth in dB (shallow, deep).
pub const TREMOLO_DEPTH_DB: [f64; 2] = [1.0, 4.8];

/// Vibrato depth in cents (shallow, deep).
pub const VIBRATO_DEPTH_CENTS: [f64; 2] = [7.0, 14.0];

/// Output gain applied per channel before conversion to 16-bit.
pub const CHANNEL_GAIN: f64 = 0.2;

/// Evaluate waveform `shape` (0..=7) at `phase` cycles.
///
/// Shapes 0..=3 exist on OPL2; 4..=7 need OPL3 mode.
pub fn waveform(shape: u8, phase: f64) -> f64 {
    use std::f64::consts::TAU;

    let p = phase.rem_euclid(1.0);
    let sine = (TAU * p).sin();
    match shape & 0x07 {
        0 => sine,
        1 => {
            if p < 0.5 {
                sine
            } else {
                0.0
            }
        }
        2 => sine.abs(),
        3 => {
            if p.rem_euclid(0.5) < 0.25 {
                sine.abs()
            } else {
                0.0
            }
        }
        4 => {
            if p < 0.5 {
                (2.0 * TAU * p).sin()
            } else {
                0.0
            }
        }
        5 => {
            if p < 0.5 {
                (2.0 * TAU * p).sin().abs()
            } else {
                0.0
            }
        }
        6 => {
            if p < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        _ => {
            // derived square: logarithmic ramp in each half
            let x = if p < 0.5 { p * 2.0 } else { (1.0 - p) * 2.0 };
            let v = (-x * 8.0).exp2();
            if p < 0.5 {
                v
            } else {
                -v
            }
        }
    }
}

/// Convert an attenuation in dB into linear gain.
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    if db >= ENV_MAX_DB {
        0.0
    } else {
        10f64.powf(-db / 20.0)
    }
}
