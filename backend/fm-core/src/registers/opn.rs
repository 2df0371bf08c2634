//! OPN (YM2203) and OPNA (YM2608 / YM2612 / YM3438) register decoding
//!
//! Channel registers keep the channel in address bits 0-1 and operator registers add the
//! operator slot in bits 2-3. OPNA mirrors everything from 0x30 up into a second bank at 0x100+
//! for channels 4-6.

use crate::envelope::SsgEgMode;
use crate::family::{self, FamilyTraits};
use crate::lfo::{self, OpnLfo};
use crate::operator::{self, OperatorCache, PhaseStep};
use crate::registers::{
    AuxStorage, FamilyRegisters, KeyOnEvent, OperatorList, RegisterFile, TimerControl, eg_rates,
};
use crate::tables;
use bincode::{Decode, Encode};
use fm_common::num::GetBit;
use fm_config::ChipConfig;

const KEY_ON: u16 = 0x28;
const MODE: u16 = 0x27;
const DAC_DATA: u16 = 0x2A;
const DAC_ENABLE: u16 = 0x2B;
const DAC_TEST: u16 = 0x2C;

#[derive(Debug, Clone, Encode, Decode)]
pub struct OpnRegisters<const OPNA: bool> {
    regs: RegisterFile<0x200>,
    aux: AuxStorage,
    lfo: OpnLfo,
}

impl<const OPNA: bool> OpnRegisters<OPNA> {
    pub fn lfo_enable(&self) -> bool {
        OPNA && self.regs.bit(0x22, 3)
    }

    pub fn lfo_rate(&self) -> u32 {
        self.regs.field(0x22, 0, 3)
    }

    /// Channel 3 special mode bits; 1 is multi-frequency, 2 is CSM.
    pub fn ch3_mode(&self) -> u32 {
        self.regs.field(MODE, 6, 2)
    }

    pub fn multi_freq(&self) -> bool {
        self.ch3_mode() != 0
    }

    /// One of the three extra channel 3 frequencies, latched the same way as the main ones.
    pub fn multi_block_freq(&self, num: u16) -> u32 {
        self.regs.word((0xAC + num, 0, 6), (0xA8 + num, 0, 8))
    }

    pub fn ch_lfo_pm_sens(&self, choffs: u16) -> u32 {
        if OPNA { self.regs.field(0xB4 + choffs, 0, 3) } else { 0 }
    }

    pub fn ch_lfo_am_sens(&self, choffs: u16) -> u32 {
        if OPNA { self.regs.field(0xB4 + choffs, 4, 2) } else { 0 }
    }

    pub fn op_detune(&self, opoffs: u16) -> u32 {
        self.regs.field(0x30 + opoffs, 4, 3)
    }

    pub fn op_multiple(&self, opoffs: u16) -> u32 {
        self.regs.field(0x30 + opoffs, 0, 4)
    }

    pub fn op_total_level(&self, opoffs: u16) -> u32 {
        self.regs.field(0x40 + opoffs, 0, 7)
    }

    pub fn op_ksr(&self, opoffs: u16) -> u32 {
        self.regs.field(0x50 + opoffs, 6, 2)
    }

    pub fn op_attack_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x50 + opoffs, 0, 5)
    }

    pub fn op_decay_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x60 + opoffs, 0, 5)
    }

    pub fn op_sustain_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x70 + opoffs, 0, 5)
    }

    pub fn op_sustain_level(&self, opoffs: u16) -> u32 {
        self.regs.field(0x80 + opoffs, 4, 4)
    }

    pub fn op_release_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x80 + opoffs, 0, 4)
    }

    pub fn op_ssg_eg(&self, opoffs: u16) -> u32 {
        self.regs.field(0x90 + opoffs, 0, 4)
    }

    pub fn aux(&self) -> &AuxStorage {
        &self.aux
    }

    fn write_frequency(&mut self, index: u16, data: u8) {
        let bank = usize::from(OPNA && index.bit(8));
        let latch = usize::from(index.bit(3));

        if index.bit(2) {
            // Upper half only sets the latch; the latch persists across low writes
            self.aux.fnum_latch[bank][latch] = data & 0x3F;
        } else {
            self.regs.set(index, data);
            self.regs.set(index | 4, self.aux.fnum_latch[bank][latch]);
        }
    }

    // Channel 3 operators can each take one of the multi-frequency words
    fn operator_block_freq(&self, choffs: u16, opoffs: u16) -> u32 {
        if self.multi_freq() && choffs == 2 {
            match opoffs {
                2 => return self.multi_block_freq(1),
                10 => return self.multi_block_freq(2),
                6 => return self.multi_block_freq(0),
                _ => {}
            }
        }
        self.ch_block_freq(choffs)
    }
}

impl<const OPNA: bool> FamilyRegisters for OpnRegisters<OPNA> {
    const TRAITS: &'static FamilyTraits = if OPNA { &family::OPNA } else { &family::OPN };
    const MODE_REGISTER: Option<u16> = Some(MODE);

    fn new(_config: &ChipConfig) -> Self {
        let mut regs =
            Self { regs: RegisterFile::new(), aux: AuxStorage::default(), lfo: OpnLfo::new() };
        regs.reset();
        regs
    }

    fn reset(&mut self) {
        self.regs.clear();
        self.aux = AuxStorage::default();
        self.lfo = OpnLfo::new();

        if OPNA {
            // Both pans enabled on every channel
            for choffs in [0x00, 0x01, 0x02, 0x100, 0x101, 0x102] {
                self.regs.set(0xB4 + choffs, 0xC0);
            }
        }
    }

    fn raw(&self, index: u16) -> u8 {
        self.regs.get(index)
    }

    fn write(&mut self, index: u16, data: u8) -> Option<KeyOnEvent> {
        // Frequency registers are written as latched pairs; the 4th slot of each group is unused
        if index & 0xF0 == 0xA0 {
            if index & 3 != 3 {
                self.write_frequency(index, data);
            } else {
                self.regs.set(index, data);
            }
            return None;
        }

        self.regs.set(index, data);

        match index {
            KEY_ON => {
                let channel = usize::from(data & 3);
                if channel == 3 {
                    return None;
                }
                let channel = if OPNA { channel + 3 * usize::from(data.bit(2)) } else { channel };
                Some(KeyOnEvent::Channel { channel, opmask: data >> 4 })
            }
            DAC_DATA => {
                self.aux.dac_sample = (u16::from(data) << 1) | (self.aux.dac_sample & 1);
                None
            }
            DAC_ENABLE if OPNA => {
                log::trace!("DAC enabled: {}", data.bit(7));
                None
            }
            DAC_TEST => {
                self.aux.dac_sample = (self.aux.dac_sample & !1) | u16::from(data.bit(3));
                None
            }
            _ => None,
        }
    }

    fn channel_offset(chnum: usize) -> u16 {
        (chnum % 3 + 0x100 * (chnum / 3)) as u16
    }

    fn operator_offset(opnum: usize) -> u16 {
        let slot = opnum % 12;
        (slot + slot / 3 + 0x100 * (opnum / 12)) as u16
    }

    fn operator_list(&self, chnum: usize) -> OperatorList {
        let base = (chnum % 3 + 12 * (chnum / 3)) as u8;
        [Some(base), Some(base + 6), Some(base + 3), Some(base + 9)]
    }

    fn clock_noise_and_lfo(&mut self) -> i32 {
        if !OPNA {
            return 0;
        }
        self.lfo.clock(self.lfo_enable(), self.lfo_rate())
    }

    fn lfo_am_offset(&self, choffs: u16) -> u32 {
        lfo::opn_amplitude_modulation(self.lfo.am(), self.ch_lfo_am_sens(choffs))
    }

    fn timer_a_value(&self) -> u16 {
        self.regs.word((0x24, 0, 8), (0x25, 0, 2)) as u16
    }

    fn timer_b_value(&self) -> u8 {
        self.regs.get(0x26)
    }

    fn timer_control(&self) -> TimerControl {
        TimerControl {
            load_a: self.regs.bit(MODE, 0),
            load_b: self.regs.bit(MODE, 1),
            enable_a: self.regs.bit(MODE, 2),
            enable_b: self.regs.bit(MODE, 3),
            reset_a: self.regs.bit(MODE, 4),
            reset_b: self.regs.bit(MODE, 5),
        }
    }

    fn csm(&self) -> bool {
        self.ch3_mode() == 2
    }

    fn ch_feedback(&self, choffs: u16) -> u32 {
        self.regs.field(0xB0 + choffs, 3, 3)
    }

    fn ch_algorithm(&self, choffs: u16) -> u32 {
        self.regs.field(0xB0 + choffs, 0, 3)
    }

    fn ch_block_freq(&self, choffs: u16) -> u32 {
        self.regs.word((0xA4 + choffs, 0, 6), (0xA0 + choffs, 0, 8))
    }

    fn ch_outputs(&self, choffs: u16) -> [bool; 4] {
        if OPNA {
            [self.regs.bit(0xB4 + choffs, 7), self.regs.bit(0xB4 + choffs, 6), false, false]
        } else {
            [true, false, false, false]
        }
    }

    fn op_ssg_eg_mode(&self, opoffs: u16) -> Option<SsgEgMode> {
        let ssg = self.op_ssg_eg(opoffs);
        ssg.bit(3).then_some(SsgEgMode(ssg as u8 & 7))
    }

    fn op_lfo_am_enable(&self, opoffs: u16) -> bool {
        OPNA && self.regs.bit(0x60 + opoffs, 7)
    }

    fn cache_operator_data(&self, choffs: u16, opoffs: u16) -> OperatorCache {
        let block_freq = self.operator_block_freq(choffs, opoffs);

        // Top 4 bits plus a fifth derived from F-number bits 8-10:
        //   (F11 & (F10 | F9 | F8)) | (!F11 & F10 & F9 & F8)
        let low_bit = 0xFE80_u32.field(block_freq.field(7, 4) as u8, 1);
        let keycode = (block_freq.field(10, 4) << 1) | low_bit;

        let mut cache = OperatorCache {
            waveform: 0,
            block_freq,
            detune: tables::detune_adjustment(self.op_detune(opoffs), keycode),
            multiple: (self.op_multiple(opoffs) * 2).max(1),
            total_level: self.op_total_level(opoffs) << 3,
            eg_sustain: operator::sustain_attenuation(self.op_sustain_level(opoffs)),
            ..OperatorCache::default()
        };

        cache.phase_step = if !self.lfo_enable() || self.ch_lfo_pm_sens(choffs) == 0 {
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
        _opoffs: u16,
        cache: &OperatorCache,
        lfo_raw_pm: i32,
    ) -> u32 {
        let fnum = lfo::opn_frequency_modulation(
            cache.block_freq.field(0, 11),
            self.ch_lfo_pm_sens(choffs),
            lfo_raw_pm,
        );

        let block = cache.block_freq.field(11, 3);
        let phase_step = ((fnum << block) >> 2).wrapping_add_signed(cache.detune) & 0x1FFFF;
        (phase_step * cache.multiple) >> 1
    }

    fn dac(&self) -> Option<u16> {
        (OPNA && self.regs.bit(DAC_ENABLE, 7)).then_some(self.aux.dac_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    type Opna = OpnRegisters<true>;
    type Opn = OpnRegisters<false>;

    #[test]
    fn frequency_latch_commits_on_low_write() {
        let mut regs = Opna::new(&ChipConfig::default());
        regs.write(0xA4, 0x22);
        assert_eq!(regs.ch_block_freq(0), 0);

        regs.write(0xA0, 0x69);
        assert_eq!(regs.ch_block_freq(0), 0x2269);

        // Latch persists and applies to later low writes, including other channels
        regs.write(0xA1, 0x01);
        assert_eq!(regs.ch_block_freq(1), 0x2201);

        // Second bank has its own latch
        regs.write(0x1A4, 0x3F);
        regs.write(0x1A0, 0xFF);
        assert_eq!(regs.ch_block_freq(0x100), 0x3FFF);
        regs.write(0xA2, 0x00);
        assert_eq!(regs.ch_block_freq(2), 0x2200);
        assert_eq!(regs.aux().fnum_latch, [[0x22, 0], [0x3F, 0]]);
    }

    #[test]
    fn multi_frequency_latch_is_separate() {
        let mut regs = Opna::new(&ChipConfig::default());
        regs.write(0xA4, 0x11);
        regs.write(0xAD, 0x2A);
        regs.write(0xA9, 0x55);
        regs.write(0xA2, 0x33);

        assert_eq!(regs.multi_block_freq(1), 0x2A55);
        assert_eq!(regs.ch_block_freq(2), 0x1133);

        // Multi mode off: every channel 3 operator follows the channel frequency
        assert_eq!(regs.cache_operator_data(2, 2).block_freq, 0x1133);

        regs.write(0x27, 0x40);
        assert_eq!(regs.cache_operator_data(2, 2).block_freq, 0x2A55);
        assert_eq!(regs.cache_operator_data(2, 14).block_freq, 0x1133);
    }

    #[test]
    fn key_on_channels() {
        let mut opn = Opn::new(&ChipConfig::default());
        assert_eq!(opn.write(0x28, 0xF1), Some(KeyOnEvent::Channel { channel: 1, opmask: 0xF }));
        assert_eq!(opn.write(0x28, 0xF3), None);
        assert_eq!(opn.write(0x28, 0xF5), Some(KeyOnEvent::Channel { channel: 1, opmask: 0xF }));

        let mut opna = Opna::new(&ChipConfig::default());
        assert_eq!(opna.write(0x28, 0x36), Some(KeyOnEvent::Channel { channel: 5, opmask: 3 }));
    }

    #[test]
    fn operator_offsets() {
        let offsets: Vec<_> = (0..24).map(Opna::operator_offset).collect();
        assert_eq!(&offsets[..12], &[0, 1, 2, 4, 5, 6, 8, 9, 10, 12, 13, 14]);
        assert_eq!(offsets[12], 0x100);
        assert_eq!(offsets[23], 0x10E);

        // Algorithm order is S1, S2, S3, S4 = register slots 0, 8, 4, 12
        let regs = Opna::new(&ChipConfig::default());
        let slots: Vec<_> = regs
            .operator_list(4)
            .into_iter()
            .flatten()
            .map(|opnum| Opna::operator_offset(opnum.into()))
            .collect();
        assert_eq!(slots, [0x101, 0x109, 0x105, 0x10D]);
    }

    #[test]
    fn keycode_and_rates() {
        let mut regs = Opn::new(&ChipConfig::default());
        // Block 7, F-number 0x7FF
        regs.write(0xA4, 0x3F);
        regs.write(0xA0, 0xFF);
        regs.write(0x50, 0xC0 | 0x1F);

        let cache = regs.cache_operator_data(0, 0);
        assert_eq!(cache.rate(crate::envelope::EnvelopeState::Attack), 63);

        // KS 0 divides the 5-bit key code by 8
        regs.write(0x50, 0x0A);
        let cache = regs.cache_operator_data(0, 0);
        assert_eq!(cache.rate(crate::envelope::EnvelopeState::Attack), 20 + (31 >> 3));
    }

    #[test]
    fn ssg_eg_decode() {
        let mut regs = Opn::new(&ChipConfig::default());
        regs.write(0x94, 0x05);
        assert_eq!(regs.op_ssg_eg_mode(4), None);
        regs.write(0x94, 0x0D);
        assert_eq!(regs.op_ssg_eg_mode(4), Some(SsgEgMode(5)));
    }

    #[test]
    fn pans_and_dac() {
        let mut regs = Opna::new(&ChipConfig::default());
        assert_eq!(regs.ch_outputs(0x101), [true, true, false, false]);
        regs.write(0x1B5, 0x80);
        assert_eq!(regs.ch_outputs(0x101), [true, false, false, false]);

        regs.write(0x2A, 0xC0);
        assert_eq!(regs.dac(), None);
        regs.write(0x2B, 0x80);
        assert_eq!(regs.dac(), Some(0x180));
        regs.write(0x2C, 0x08);
        assert_eq!(regs.dac(), Some(0x181));

        let opn = Opn::new(&ChipConfig::default());
        assert_eq!(opn.ch_outputs(2), [true, false, false, false]);
    }

    #[test]
    fn phase_step_from_fnum() {
        let mut regs = Opn::new(&ChipConfig::default());
        // Block 4, F-number 0x400, multiple 1, no detune
        regs.write(0xA4, 0x24);
        regs.write(0xA0, 0x00);
        regs.write(0x30, 0x01);

        let cache = regs.cache_operator_data(0, 0);
        assert_eq!(cache.phase_step, PhaseStep::Static((0x800 << 4) >> 2));

        // Multiple 0 halves it
        regs.write(0x30, 0x00);
        let cache = regs.cache_operator_data(0, 0);
        assert_eq!(cache.phase_step, PhaseStep::Static(((0x800 << 4) >> 2) >> 1));
    }
}
