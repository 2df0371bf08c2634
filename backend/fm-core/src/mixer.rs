//! Output stages: how channel outputs are summed, clipped and quantized into output lines

use crate::family::FamilyTraits;
use crate::tables;
use bincode::{Decode, Encode};
use fm_config::{ChipConfig, ChipFamily};

pub const MAX_OUTPUTS: usize = 4;

const I16_MIN: i32 = i16::MIN as i32;
const I16_MAX: i32 = i16::MAX as i32;

/// One generated sample across all output lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    lines: [i32; MAX_OUTPUTS],
    count: usize,
}

impl OutputFrame {
    /// Output lines the family actually drives.
    #[must_use]
    pub fn lines(&self) -> &[i32] {
        &self.lines[..self.count]
    }

    #[must_use]
    pub fn line(&self, index: usize) -> i32 {
        self.lines().get(index).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum OutputStage {
    /// Plain sum through a floating-point DAC (YM3012/YM3014 style)
    FloatingDac { rshift: u32 },
    /// 16-bit saturating adder
    Clamp16 { rshift: u32 },
    /// OPN2 time-multiplexed 9-bit DAC, optionally with the YM2612 crossover distortion
    MultiplexedDac { ladder: bool },
    /// OPLL time-multiplexed 9-bit DAC, mono
    OpllMux,
}

impl OutputStage {
    pub fn new(traits: &FamilyTraits, config: &ChipConfig) -> Self {
        use fm_config::OpnaOutputStage;

        match traits.family {
            ChipFamily::Opm | ChipFamily::Opn => Self::FloatingDac { rshift: 0 },
            ChipFamily::Opl | ChipFamily::Opl2 => Self::FloatingDac { rshift: 1 },
            ChipFamily::Opna => match config.opna_output {
                OpnaOutputStage::Ym2608 => Self::Clamp16 { rshift: 1 },
                OpnaOutputStage::Ym2612 => Self::MultiplexedDac { ladder: true },
                OpnaOutputStage::Ym3438 => Self::MultiplexedDac { ladder: false },
            },
            ChipFamily::Opll => Self::OpllMux,
            ChipFamily::Opl3 | ChipFamily::Opq | ChipFamily::Opz => Self::Clamp16 { rshift: 0 },
        }
    }

    pub fn is_multiplexed_dac(self) -> bool {
        matches!(self, Self::MultiplexedDac { .. })
    }

    /// Shift and clip limit applied to each channel's output.
    pub fn channel_shift(self) -> (u32, i32) {
        match self {
            Self::FloatingDac { rshift } | Self::Clamp16 { rshift } => (rshift, 32767),
            Self::MultiplexedDac { .. } | Self::OpllMux => (5, 256),
        }
    }
}

/// Accumulates channel outputs for one sample.
#[derive(Debug, Clone)]
pub struct Mixer {
    stage: OutputStage,
    outputs: usize,
    lines: [i32; MAX_OUTPUTS],
}

impl Mixer {
    pub fn new(stage: OutputStage, outputs: usize) -> Self {
        Self { stage, outputs: outputs.min(MAX_OUTPUTS), lines: [0; MAX_OUTPUTS] }
    }

    /// Add one channel's output to every line it is routed to.
    pub fn add_channel(&mut self, value: i32, routing: [bool; MAX_OUTPUTS]) {
        if self.outputs == 1 {
            self.lines[0] += value;
            return;
        }

        for (line, &routed) in self.lines[..self.outputs].iter_mut().zip(&routing) {
            *line += match self.stage {
                OutputStage::MultiplexedDac { ladder: true } => apply_ladder(value, routed),
                _ => i32::from(routed) * value,
            };
        }
    }

    pub fn finish(self) -> OutputFrame {
        let mut lines = self.lines;
        for line in &mut lines[..self.outputs] {
            *line = match self.stage {
                OutputStage::FloatingDac { .. } => tables::roundtrip_fp(*line),
                OutputStage::Clamp16 { .. } => (*line).clamp(I16_MIN, I16_MAX),
                OutputStage::MultiplexedDac { .. } => *line * 128 / 6,
                OutputStage::OpllMux => *line * 128 / 9,
            };
        }
        OutputFrame { lines, count: self.outputs }
    }
}

// If channel is not muted through panning, add +4 to non-negative samples and -3 to negative
// If muted, output a constant +4 for non-negative samples and -4 for negative
// See https://gendev.spritesmind.net/forum/viewtopic.php?p=32605#p32605
fn apply_ladder(sample: i32, pan_enabled: bool) -> i32 {
    let pan_enabled = i32::from(pan_enabled);
    let adjustment = if sample >= 0 { 4 } else { -(4 - pan_enabled) };
    sample * pan_enabled + adjustment
}

/// Signed 9-bit DAC sample from the unsigned 8-bit $2A value and the low bit from $2C.
pub fn dac_sample_to_signed(sample: u16) -> i32 {
    i32::from(sample & 0x1FF) - 0x100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family;
    use test_log::test;

    #[test]
    fn ladder_effect() {
        // Zero; output +4
        assert_eq!(4, apply_ladder(0, false));
        assert_eq!(4, apply_ladder(0, true));

        // Positive; output +4 when muted, add +4 when enabled
        assert_eq!(4, apply_ladder(6, false));
        assert_eq!(10, apply_ladder(6, true));

        // Negative; output -4 when muted, add -3 when enabled
        assert_eq!(-4, apply_ladder(-6, false));
        assert_eq!(-9, apply_ladder(-6, true));
    }

    #[test]
    fn stage_selection() {
        let config = ChipConfig::default();
        assert_eq!(OutputStage::new(&family::OPM, &config), OutputStage::FloatingDac { rshift: 0 });
        assert_eq!(
            OutputStage::new(&family::OPL2, &config),
            OutputStage::FloatingDac { rshift: 1 }
        );
        assert_eq!(OutputStage::new(&family::OPNA, &config), OutputStage::Clamp16 { rshift: 1 });
        assert_eq!(OutputStage::new(&family::OPL3, &config), OutputStage::Clamp16 { rshift: 0 });

        let ym3438 = ChipConfig { opna_output: fm_config::OpnaOutputStage::Ym3438, ..config };
        let stage = OutputStage::new(&family::OPNA, &ym3438);
        assert_eq!(stage, OutputStage::MultiplexedDac { ladder: false });
        assert_eq!(stage.channel_shift(), (5, 256));
    }

    #[test]
    fn routing_and_quantization() {
        let mut mixer = Mixer::new(OutputStage::FloatingDac { rshift: 0 }, 2);
        mixer.add_channel(0x1234, [true, false, false, false]);
        mixer.add_channel(-5, [true, true, false, false]);
        let frame = mixer.finish();
        assert_eq!(frame.lines(), &[tables::roundtrip_fp(0x1234 - 5), -5]);

        // Mono families ignore routing
        let mut mixer = Mixer::new(OutputStage::OpllMux, 1);
        mixer.add_channel(9, [false; 4]);
        mixer.add_channel(9, [false; 4]);
        assert_eq!(mixer.finish().lines(), &[18 * 128 / 9]);

        let mut mixer = Mixer::new(OutputStage::Clamp16 { rshift: 0 }, 4);
        mixer.add_channel(30_000, [true, true, false, true]);
        mixer.add_channel(30_000, [true, false, false, false]);
        let frame = mixer.finish();
        assert_eq!(frame.lines(), &[32767, 30_000, 0, 30_000]);
        assert_eq!(frame.line(7), 0);
    }

    #[test]
    fn dac_conversion() {
        assert_eq!(dac_sample_to_signed(0x80 << 1), 0);
        assert_eq!(dac_sample_to_signed(0xFF << 1 | 1), 0xFF);
        assert_eq!(dac_sample_to_signed(0), -0x100);
    }
}
