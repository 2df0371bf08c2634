//! OPM (YM2151) register decoding
//!
//! System registers live at 0x01-0x1B. Channel registers at 0x20-0x3F have the channel in bits
//! 0-2; operator registers at 0x40-0xFF add the operator slot in bits 3-4 (M1, M2, C1, C2).

use crate::family::{self, FamilyTraits};
use crate::lfo::OpmLfo;
use crate::operator::{self, OperatorCache, PhaseStep};
use crate::registers::{
    AuxStorage, FamilyRegisters, KeyOnEvent, OperatorList, RegisterFile, TimerControl, eg_rates,
};
use crate::tables;
use bincode::{Decode, Encode};
use fm_config::ChipConfig;

const KEY_ON: u16 = 0x08;
const LFO_DEPTH: u16 = 0x19;

// Coarse detune in 1/64 semitone units: 0, 600, 781, and 950 cents
const DETUNE2_DELTAS: [i32; 4] = [0, 384, 500, 608];

#[derive(Debug, Clone, Encode, Decode)]
pub struct OpmRegisters {
    regs: RegisterFile<0x100>,
    aux: AuxStorage,
    lfo: OpmLfo,
}

impl OpmRegisters {
    pub fn lfo_rate(&self) -> u32 {
        self.regs.field(0x18, 0, 8)
    }

    pub fn lfo_waveform(&self) -> u32 {
        self.regs.field(0x1B, 0, 2)
    }

    pub fn lfo_am_depth(&self) -> u32 {
        self.regs.field(LFO_DEPTH, 0, 7)
    }

    pub fn lfo_pm_depth(&self) -> u32 {
        u32::from(self.aux.pm_depth)
    }

    pub fn lfo_reset(&self) -> bool {
        self.regs.bit(0x01, 1)
    }

    pub fn noise_frequency(&self) -> u32 {
        self.regs.field(0x0F, 0, 5)
    }

    pub fn ch_lfo_pm_sens(&self, choffs: u16) -> u32 {
        self.regs.field(0x38 + choffs, 4, 3)
    }

    pub fn ch_lfo_am_sens(&self, choffs: u16) -> u32 {
        self.regs.field(0x38 + choffs, 0, 2)
    }

    pub fn op_detune(&self, opoffs: u16) -> u32 {
        self.regs.field(0x40 + opoffs, 4, 3)
    }

    pub fn op_multiple(&self, opoffs: u16) -> u32 {
        self.regs.field(0x40 + opoffs, 0, 4)
    }

    pub fn op_total_level(&self, opoffs: u16) -> u32 {
        self.regs.field(0x60 + opoffs, 0, 7)
    }

    pub fn op_ksr(&self, opoffs: u16) -> u32 {
        self.regs.field(0x80 + opoffs, 6, 2)
    }

    pub fn op_attack_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x80 + opoffs, 0, 5)
    }

    pub fn op_decay_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0xA0 + opoffs, 0, 5)
    }

    pub fn op_detune2(&self, opoffs: u16) -> u32 {
        self.regs.field(0xC0 + opoffs, 6, 2)
    }

    pub fn op_sustain_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0xC0 + opoffs, 0, 5)
    }

    pub fn op_sustain_level(&self, opoffs: u16) -> u32 {
        self.regs.field(0xE0 + opoffs, 4, 4)
    }

    pub fn op_release_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0xE0 + opoffs, 0, 4)
    }
}

impl FamilyRegisters for OpmRegisters {
    const TRAITS: &'static FamilyTraits = &family::OPM;
    const MODE_REGISTER: Option<u16> = Some(0x14);

    fn new(_config: &ChipConfig) -> Self {
        let mut regs =
            Self { regs: RegisterFile::new(), aux: AuxStorage::default(), lfo: OpmLfo::new() };
        regs.reset();
        regs
    }

    fn reset(&mut self) {
        self.regs.clear();
        self.aux = AuxStorage::default();
        self.lfo = OpmLfo::new();

        // Both outputs enabled on every channel
        for choffs in 0..8 {
            self.regs.set(0x20 + choffs, 0xC0);
        }
    }

    fn raw(&self, index: u16) -> u8 {
        self.regs.get(index)
    }

    fn write(&mut self, index: u16, data: u8) -> Option<KeyOnEvent> {
        match index {
            // Bit 7 selects between AM depth and PM depth
            LFO_DEPTH if data & 0x80 != 0 => self.aux.pm_depth = data & 0x7F,
            _ => self.regs.set(index, data),
        }

        (index == KEY_ON).then(|| KeyOnEvent::Channel {
            channel: usize::from(data & 0x07),
            opmask: (data >> 3) & 0x0F,
        })
    }

    fn channel_offset(chnum: usize) -> u16 {
        chnum as u16
    }

    fn operator_offset(opnum: usize) -> u16 {
        opnum as u16
    }

    fn operator_list(&self, chnum: usize) -> OperatorList {
        let ch = chnum as u8;
        [Some(ch), Some(ch + 16), Some(ch + 8), Some(ch + 24)]
    }

    fn clock_noise_and_lfo(&mut self) -> i32 {
        self.lfo.clock_noise(self.noise_frequency());
        self.lfo.clock(
            self.lfo_rate(),
            self.lfo_reset(),
            self.lfo_waveform(),
            self.lfo_am_depth(),
            self.lfo_pm_depth(),
        )
    }

    fn lfo_am_offset(&self, choffs: u16) -> u32 {
        match self.ch_lfo_am_sens(choffs) {
            0 => 0,
            sensitivity => self.lfo.am() << (sensitivity - 1),
        }
    }

    fn noise_state(&self) -> u32 {
        self.lfo.noise_state()
    }

    fn noise_enable(&self) -> bool {
        self.regs.bit(0x0F, 7)
    }

    fn timer_a_value(&self) -> u16 {
        self.regs.word((0x10, 0, 8), (0x11, 0, 2)) as u16
    }

    fn timer_b_value(&self) -> u8 {
        self.regs.get(0x12)
    }

    fn timer_control(&self) -> TimerControl {
        TimerControl {
            load_a: self.regs.bit(0x14, 0),
            load_b: self.regs.bit(0x14, 1),
            enable_a: self.regs.bit(0x14, 2),
            enable_b: self.regs.bit(0x14, 3),
            reset_a: self.regs.bit(0x14, 4),
            reset_b: self.regs.bit(0x14, 5),
        }
    }

    fn csm(&self) -> bool {
        self.regs.bit(0x14, 7)
    }

    fn ch_feedback(&self, choffs: u16) -> u32 {
        self.regs.field(0x20 + choffs, 3, 3)
    }

    fn ch_algorithm(&self, choffs: u16) -> u32 {
        self.regs.field(0x20 + choffs, 0, 3)
    }

    fn ch_block_freq(&self, choffs: u16) -> u32 {
        self.regs.word((0x28 + choffs, 0, 7), (0x30 + choffs, 2, 6))
    }

    fn ch_outputs(&self, choffs: u16) -> [bool; 4] {
        [self.regs.bit(0x20 + choffs, 6), self.regs.bit(0x20 + choffs, 7), false, false]
    }

    fn op_lfo_am_enable(&self, opoffs: u16) -> bool {
        self.regs.bit(0xA0 + opoffs, 7)
    }

    fn cache_operator_data(&self, choffs: u16, opoffs: u16) -> OperatorCache {
        let block_freq = self.ch_block_freq(choffs);

        // Block and the top 2 key code bits
        let keycode = (block_freq >> 8) & 0x1F;

        let mut cache = OperatorCache {
            waveform: 0,
            block_freq,
            detune: tables::detune_adjustment(self.op_detune(opoffs), keycode),
            multiple: (self.op_multiple(opoffs) * 2).max(1),
            total_level: self.op_total_level(opoffs) << 3,
            eg_sustain: operator::sustain_attenuation(self.op_sustain_level(opoffs)),
            ..OperatorCache::default()
        };

        cache.phase_step = if self.lfo_pm_depth() == 0 || self.ch_lfo_pm_sens(choffs) == 0 {
            PhaseStep::Static(self.compute_phase_step(choffs, opoffs, &cache, 0))
        } else {
            PhaseStep::Dynamic
        };

        let ksr = keycode >> (self.op_ksr(opoffs) ^ 3);
        cache.eg_rate = eg_rates(
            0,
            self.op_attack_rate(opoffs) * 2,
            self.op_decay_rate(opoffs) * 2,
            self.op_sustain_rate(opoffs) * 2,
            self.op_release_rate(opoffs) * 4 + 2,
            ksr,
        );

        cache
    }

    fn compute_phase_step(
        &self,
        choffs: u16,
        opoffs: u16,
        cache: &OperatorCache,
        lfo_raw_pm: i32,
    ) -> u32 {
        let mut delta = DETUNE2_DELTAS[self.op_detune2(opoffs) as usize];

        // Sensitivities 1-7 scale the +/-200 cent raw PM to 5, 10, 20, 50, 100, 400, 700 cents
        match self.ch_lfo_pm_sens(choffs) {
            0 => {}
            sensitivity @ 1..=5 => delta += lfo_raw_pm >> (6 - sensitivity),
            sensitivity => delta += lfo_raw_pm << (sensitivity - 5),
        }

        let phase_step = tables::opm_key_code_to_phase_step(cache.block_freq, delta)
            .wrapping_add_signed(cache.detune);
        phase_step.wrapping_mul(cache.multiple) >> 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeState;
    use test_log::test;

    fn registers() -> OpmRegisters {
        OpmRegisters::new(&ChipConfig::default())
    }

    #[test]
    fn reset_enables_both_outputs() {
        let regs = registers();
        for choffs in 0..8 {
            assert_eq!(regs.ch_outputs(choffs), [true, true, false, false]);
        }
    }

    #[test]
    fn lfo_depth_shares_an_address() {
        let mut regs = registers();
        regs.write(0x19, 0x25);
        regs.write(0x19, 0x80 | 0x5A);

        assert_eq!(regs.lfo_am_depth(), 0x25);
        assert_eq!(regs.lfo_pm_depth(), 0x5A);
        assert_eq!(regs.raw(0x19), 0x25);
    }

    #[test]
    fn key_on_register() {
        let mut regs = registers();
        assert_eq!(regs.write(0x20, 0xFF), None);
        assert_eq!(
            regs.write(0x08, 0b0101_1101),
            Some(KeyOnEvent::Channel { channel: 5, opmask: 0b1011 })
        );
    }

    #[test]
    fn field_round_trip() {
        let mut regs = registers();
        regs.write(0x40 + 9, 0x7F);
        regs.write(0x60 + 9, 0xFF);
        regs.write(0xC0 + 9, 0xDF);
        regs.write(0x28 + 1, 0xFF);
        regs.write(0x30 + 1, 0xFC);

        assert_eq!(regs.op_detune(9), 7);
        assert_eq!(regs.op_multiple(9), 15);
        assert_eq!(regs.op_total_level(9), 0x7F);
        assert_eq!(regs.op_detune2(9), 3);
        assert_eq!(regs.op_sustain_rate(9), 0x1F);
        assert_eq!(regs.ch_block_freq(1), 0x1FFF);
    }

    #[test]
    fn cached_rates_and_levels() {
        let mut regs = registers();
        // Block 4, key code 10
        regs.write(0x28, 0x4A);
        regs.write(0x40, 0x01);
        regs.write(0x60, 0x10);
        regs.write(0x80, 0xDF);
        regs.write(0xE0, 0xF7);

        let cache = regs.cache_operator_data(0, 0);
        let keycode = 0x4A >> 2;
        assert_eq!(cache.total_level, 0x80);
        assert_eq!(cache.multiple, 2);
        assert_eq!(cache.eg_sustain, 0x3E0);
        assert_eq!(cache.rate(EnvelopeState::Attack), (62 + keycode).min(63) as u8);
        assert_eq!(cache.rate(EnvelopeState::Release), (7 * 4 + 2 + keycode) as u8);
        assert_eq!(cache.rate(EnvelopeState::Decay), 0);
        assert!(matches!(cache.phase_step, PhaseStep::Static(step) if step > 0));
    }

    #[test]
    fn pm_makes_phase_step_dynamic() {
        let mut regs = registers();
        regs.write(0x38, 0x70);
        assert!(matches!(regs.cache_operator_data(0, 0).phase_step, PhaseStep::Static(_)));

        regs.write(0x19, 0xFF);
        assert_eq!(regs.cache_operator_data(0, 0).phase_step, PhaseStep::Dynamic);
    }
}
