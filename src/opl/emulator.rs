//! The five emulator configurations built on [`OplChip`]

use super::chip::OplChip;
use super::tables::NATIVE_RATE;
use super::{EmulatorKind, OplBackend};

/// How the chips are wired to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// One OPL2 chip, mono on both sides
    Opl2,
    /// One OPL3 chip with two register banks
    Opl3,
    /// Two OPL2 chips, chip 0 on the left and chip 1 on the right
    DualOpl2,
}

/// Rate conversion from the native chip rate to the output rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interpolation {
    Hold,
    Linear,
}

#[derive(Debug, Clone)]
struct RateConverter {
    mode: Interpolation,
    step: f64,
    pos: f64,
    prev: (f64, f64),
    curr: (f64, f64),
}

impl RateConverter {
    fn new(mode: Interpolation, output_rate: u32) -> Self {
        RateConverter {
            mode,
            step: NATIVE_RATE / output_rate.max(1) as f64,
            pos: 0.0,
            prev: (0.0, 0.0),
            curr: (0.0, 0.0),
        }
    }

    fn reset(&mut self) {
        self.pos = 0.0;
        self.prev = (0.0, 0.0);
        self.curr = (0.0, 0.0);
    }

    fn next(&mut self, mut source: impl FnMut() -> (f64, f64)) -> (f64, f64) {
        self.pos += self.step;
        while self.pos >= 1.0 {
            self.prev = self.curr;
            self.curr = source();
            self.pos -= 1.0;
        }
        match self.mode {
            Interpolation::Hold => self.curr,
            Interpolation::Linear => (
                self.prev.0 + (self.curr.0 - self.prev.0) * self.pos,
                self.prev.1 + (self.curr.1 - self.prev.1) * self.pos,
            ),
        }
    }
}

/// Software FM synthesizer configured as one of the [`EmulatorKind`]s
#[derive(Debug, Clone)]
pub struct FmEmulator {
    kind: EmulatorKind,
    layout: Layout,
    chips: Vec<OplChip>,
    converter: Option<RateConverter>,
    current_chip: usize,
    second_chip_used: bool,
}

impl FmEmulator {
    /// Build the configuration `kind` rendering at `sample_rate` Hz.
    pub fn new(kind: EmulatorKind, sample_rate: u32) -> Self {
        let (layout, interpolation) = match kind {
            EmulatorKind::Nuked => (Layout::Opl3, Some(Interpolation::Linear)),
            EmulatorKind::DosBox => (Layout::Opl3, None),
            EmulatorKind::Silverman => (Layout::Opl2, None),
            EmulatorKind::Satoh => (Layout::Opl2, Some(Interpolation::Hold)),
            EmulatorKind::Dual => (Layout::DualOpl2, None),
        };
        let chip_rate = match interpolation {
            Some(_) => NATIVE_RATE,
            None => sample_rate as f64,
        };
        let chips = match layout {
            Layout::Opl2 => vec![OplChip::new(1, chip_rate)],
            Layout::Opl3 => vec![OplChip::new(2, chip_rate)],
            Layout::DualOpl2 => vec![OplChip::new(1, chip_rate), OplChip::new(1, chip_rate)],
        };

        FmEmulator {
            kind,
            layout,
            chips,
            converter: interpolation.map(|mode| RateConverter::new(mode, sample_rate)),
            current_chip: 0,
            second_chip_used: false,
        }
    }

    /// Configuration this emulator was built as
    pub fn kind(&self) -> EmulatorKind {
        self.kind
    }

    fn chip_frame(layout: Layout, chips: &mut [OplChip], second_chip_used: bool) -> (f64, f64) {
        match layout {
            Layout::Opl2 | Layout::Opl3 => chips[0].sample(),
            Layout::DualOpl2 => {
                let (left, _) = chips[0].sample();
                let (right, _) = chips[1].sample();
                if second_chip_used {
                    (left, right)
                } else {
                    (left, left)
                }
            }
        }
    }

    fn to_i16(value: f64) -> i16 {
        (value * 32767.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

impl OplBackend for FmEmulator {
    fn write(&mut self, reg: u8, value: u8) {
        match self.layout {
            Layout::Opl2 => {
                if self.current_chip == 0 {
                    self.chips[0].write(0, reg, value);
                }
            }
            Layout::Opl3 => self.chips[0].write(self.current_chip, reg, value),
            Layout::DualOpl2 => {
                if self.current_chip == 1 {
                    self.second_chip_used = true;
                }
                self.chips[self.current_chip].write(0, reg, value);
            }
        }
    }

    fn set_chip(&mut self, chip: usize) {
        self.current_chip = chip.min(1);
    }

    fn chip(&self) -> usize {
        self.current_chip
    }

    fn render(&mut self, out: &mut [i16]) {
        let FmEmulator {
            layout,
            chips,
            converter,
            second_chip_used,
            ..
        } = self;
        for frame in out.chunks_exact_mut(2) {
            let (left, right) = match converter {
                Some(converter) => converter.next(|| Self::chip_frame(*layout, chips, *second_chip_used)),
                None => Self::chip_frame(*layout, chips, *second_chip_used),
            };
            frame[0] = Self::to_i16(left);
            frame[1] = Self::to_i16(right);
        }
    }

    fn reset(&mut self) {
        for chip in &mut self.chips {
            chip.reset();
        }
        if let Some(converter) = &mut self.converter {
            converter.reset();
        }
        self.current_chip = 0;
        self.second_chip_used = false;
    }

    fn name(&self) -> &'static str {
        match self.kind {
            EmulatorKind::Nuked => "Nuked OPL3",
            EmulatorKind::DosBox => "DOSBox OPL3",
            EmulatorKind::Silverman => "Silverman OPL2",
            EmulatorKind::Satoh => "Satoh OPL2",
            EmulatorKind::Dual => "Dual OPL2",
        }
    }
}
