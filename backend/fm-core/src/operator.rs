//! FM operators: phase accumulator, cached register state, envelope, and waveform lookup

use crate::envelope::{EnvelopeGenerator, EnvelopeState, KeyOnSource, SILENT_ATTENUATION};
use crate::registers::FamilyRegisters;
use crate::tables::{self, WAVEFORM_LENGTH, WAVEFORM_SIGN_BIT};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum PhaseStep {
    Static(u32),
    /// Depends on the LFO; recomputed every sample
    Dynamic,
}

impl Default for PhaseStep {
    fn default() -> Self {
        Self::Static(0)
    }
}

/// Operator parameters derived from the registers once per sample, before clocking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct OperatorCache {
    pub waveform: u8,
    pub phase_step: PhaseStep,
    /// 10-bit total level plus key scale level, in envelope units
    pub total_level: u32,
    pub block_freq: u32,
    pub detune: i32,
    pub multiple: u32,
    pub eg_sustain: u32,
    /// Effective 0-63 rate for each envelope state
    pub eg_rate: [u8; EnvelopeState::COUNT],
}

impl OperatorCache {
    #[inline]
    pub fn rate(&self, state: EnvelopeState) -> u8 {
        self.eg_rate[state as usize]
    }
}

/// Sustain level in envelope units; level 15 maps to the maximum.
#[inline]
pub fn sustain_attenuation(sustain_level: u32) -> u32 {
    (sustain_level | ((sustain_level + 1) & 0x10)) << 5
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct PhaseGenerator {
    counter: u32,
}

impl PhaseGenerator {
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    #[inline]
    pub fn advance(&mut self, step: u32) {
        self.counter = self.counter.wrapping_add(step);
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Top bits of the accumulator, used as the waveform index.
    #[inline]
    pub fn output(&self) -> u32 {
        self.counter >> 10
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct FmOperator {
    opoffs: u16,
    choffs: u16,
    phase: PhaseGenerator,
    envelope: EnvelopeGenerator,
    cache: OperatorCache,
}

impl FmOperator {
    pub fn new(opoffs: u16) -> Self {
        Self {
            opoffs,
            choffs: 0,
            phase: PhaseGenerator::default(),
            envelope: EnvelopeGenerator::new(),
            cache: OperatorCache::default(),
        }
    }

    pub fn reset(&mut self) {
        self.phase.reset();
        self.envelope = EnvelopeGenerator::new();
        self.cache = OperatorCache::default();
    }

    pub fn opoffs(&self) -> u16 {
        self.opoffs
    }

    pub fn set_choffs(&mut self, choffs: u16) {
        self.choffs = choffs;
    }

    pub fn envelope(&self) -> &EnvelopeGenerator {
        &self.envelope
    }

    pub fn cache(&self) -> &OperatorCache {
        &self.cache
    }

    pub fn phase_counter(&self) -> u32 {
        self.phase.counter()
    }

    #[inline]
    pub fn phase(&self) -> u32 {
        self.phase.output()
    }

    pub fn keyonoff(&mut self, on: bool, source: KeyOnSource) {
        self.envelope.set_key(on, source);
    }

    /// Refresh cached register state and apply pending key changes.
    pub fn prepare<R: FamilyRegisters>(&mut self, regs: &R) {
        self.cache = regs.cache_operator_data(self.choffs, self.opoffs);
        self.envelope.clock_keystate(
            &self.cache,
            regs.op_ssg_eg_mode(self.opoffs),
            R::TRAITS.has_eg_depress,
            &mut self.phase,
        );
    }

    pub fn clock<R: FamilyRegisters>(&mut self, regs: &R, env_counter: u32, lfo_raw_pm: i32) {
        let ssg = regs.op_ssg_eg_mode(self.opoffs);
        match ssg {
            Some(mode) => self.envelope.clock_ssg_eg(mode, &self.cache, &mut self.phase),
            None => self.envelope.clear_ssg_inversion(),
        }

        if env_counter & 3 == 0 {
            self.envelope.clock(
                env_counter >> 2,
                &self.cache,
                ssg,
                R::TRAITS.has_eg_depress,
                &mut self.phase,
            );
        }

        let step = match self.cache.phase_step {
            PhaseStep::Static(step) => step,
            PhaseStep::Dynamic => {
                regs.compute_phase_step(self.choffs, self.opoffs, &self.cache, lfo_raw_pm)
            }
        };
        self.phase.advance(step);
    }

    fn attenuation<R: FamilyRegisters>(&self, regs: &R, am_offset: u32) -> u32 {
        let am = regs.op_lfo_am_enable(self.opoffs).then_some(am_offset);
        self.envelope.effective_attenuation(&self.cache, am)
    }

    /// Signed 14-bit output for the given waveform index (phase plus modulation).
    pub fn compute_volume<R: FamilyRegisters>(&self, regs: &R, phase: u32, am_offset: u32) -> i32 {
        if self.envelope.attenuation() > SILENT_ATTENUATION {
            return 0;
        }

        let sine = tables::waveform(self.cache.waveform)[phase as usize & (WAVEFORM_LENGTH - 1)];
        let attenuation =
            u32::from(sine & !WAVEFORM_SIGN_BIT) + (self.attenuation(regs, am_offset) << 2);
        let volume = tables::attenuation_to_volume(attenuation) as i32;
        if sine & WAVEFORM_SIGN_BIT != 0 { -volume } else { volume }
    }

    /// OPM noise output, replacing the waveform with the noise LFSR state.
    pub fn compute_noise_volume<R: FamilyRegisters>(&self, regs: &R, am_offset: u32) -> i32 {
        let attenuation = self.attenuation(regs, am_offset);
        let volume = ((attenuation ^ 0x3FF) << 1) as i32;
        if regs.noise_state() & 1 != 0 { -volume } else { volume }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn sustain_levels() {
        assert_eq!(sustain_attenuation(0), 0);
        assert_eq!(sustain_attenuation(1), 32);
        assert_eq!(sustain_attenuation(14), 14 * 32);
        // Level 15 is the full 10-bit range
        assert_eq!(sustain_attenuation(15), 0x3E0);
    }

    #[test]
    fn phase_wraps() {
        let mut phase = PhaseGenerator::default();
        phase.advance(u32::MAX);
        phase.advance(2);
        assert_eq!(phase.counter(), 1);

        phase.advance(0x400 * 5 - 1);
        assert_eq!(phase.output(), 5);
    }
}
