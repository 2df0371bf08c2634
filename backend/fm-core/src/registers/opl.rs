//! OPL (YM3526), OPL2 (YM3812) and OPL3 (YMF262) register decoding
//!
//! Operator registers are laid out in groups of 6 with 2 unused slots between groups, so
//! operator N lives at `N + 2 * (N / 6)`. OPL3 duplicates the whole map at 0x100+ and adds the
//! 4-op connection register at 0x104 and the NEW flag at 0x105.

use crate::family::{self, FamilyTraits};
use crate::lfo::OplLfo;
use crate::operator::{self, OperatorCache, PhaseStep};
use crate::registers::{
    FamilyRegisters, KeyOnEvent, OperatorList, RegisterFile, TimerControl, eg_rates,
};
use crate::tables;
use bincode::{Decode, Encode};
use fm_common::num::GetBit;
use fm_config::ChipConfig;

const MODE: u16 = 0x04;
const RHYTHM: u16 = 0xBD;
const FOUR_OP_ENABLE: u16 = 0x104;
const NEW_FLAG: u16 = 0x105;

#[derive(Debug, Clone, Encode, Decode)]
pub struct OplRegisters<const REVISION: u8> {
    regs: RegisterFile<0x200>,
    lfo: OplLfo,
}

impl<const REVISION: u8> OplRegisters<REVISION> {
    const IS_OPL2_PLUS: bool = REVISION >= 2;
    const IS_OPL3: bool = REVISION >= 3;

    pub fn waveform_enable(&self) -> bool {
        if REVISION == 2 { self.regs.bit(0x01, 5) } else { Self::IS_OPL3 }
    }

    /// OPL3 extensions (extra waveforms, 4 outputs) are only active with the NEW flag set.
    pub fn new_flag(&self) -> bool {
        Self::IS_OPL3 && self.regs.bit(NEW_FLAG, 0)
    }

    pub fn note_select(&self) -> u32 {
        self.regs.field(0x08, 6, 1)
    }

    pub fn lfo_am_depth(&self) -> bool {
        self.regs.bit(RHYTHM, 7)
    }

    pub fn lfo_pm_depth(&self) -> bool {
        self.regs.bit(RHYTHM, 6)
    }

    pub fn four_op_enable(&self) -> u8 {
        if Self::IS_OPL3 { self.regs.get(FOUR_OP_ENABLE) & 0x3F } else { 0 }
    }

    pub fn op_lfo_pm_enable(&self, opoffs: u16) -> bool {
        self.regs.bit(0x20 + opoffs, 6)
    }

    pub fn op_eg_sustain(&self, opoffs: u16) -> bool {
        self.regs.bit(0x20 + opoffs, 5)
    }

    pub fn op_ksr(&self, opoffs: u16) -> u32 {
        self.regs.field(0x20 + opoffs, 4, 1)
    }

    pub fn op_multiple(&self, opoffs: u16) -> u32 {
        self.regs.field(0x20 + opoffs, 0, 4)
    }

    /// Key scale level shift; the register bits are stored swapped relative to the shift order.
    pub fn op_ksl(&self, opoffs: u16) -> u32 {
        let raw = self.regs.field(0x40 + opoffs, 6, 2);
        (raw >> 1) | ((raw & 1) << 1)
    }

    pub fn op_total_level(&self, opoffs: u16) -> u32 {
        self.regs.field(0x40 + opoffs, 0, 6)
    }

    pub fn op_attack_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x60 + opoffs, 4, 4)
    }

    pub fn op_decay_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x60 + opoffs, 0, 4)
    }

    pub fn op_sustain_level(&self, opoffs: u16) -> u32 {
        self.regs.field(0x80 + opoffs, 4, 4)
    }

    pub fn op_release_rate(&self, opoffs: u16) -> u32 {
        self.regs.field(0x80 + opoffs, 0, 4)
    }

    pub fn op_waveform(&self, opoffs: u16) -> u8 {
        if !Self::IS_OPL2_PLUS || !self.waveform_enable() {
            return 0;
        }
        let bits = if self.new_flag() { 3 } else { 2 };
        self.regs.field(0xE0 + opoffs, 0, bits) as u8
    }

    fn two_op(base: u8) -> OperatorList {
        [Some(base), Some(base + 3), None, None]
    }

    fn four_op(base: u8) -> OperatorList {
        [Some(base), Some(base + 3), Some(base + 6), Some(base + 9)]
    }
}

impl<const REVISION: u8> FamilyRegisters for OplRegisters<REVISION> {
    const TRAITS: &'static FamilyTraits = match REVISION {
        1 => &family::OPL,
        2 => &family::OPL2,
        _ => &family::OPL3,
    };
    const MODE_REGISTER: Option<u16> = Some(MODE);

    fn new(_config: &ChipConfig) -> Self {
        let mut regs = Self { regs: RegisterFile::new(), lfo: OplLfo::new() };
        regs.reset();
        regs
    }

    fn reset(&mut self) {
        self.regs.clear();
        self.lfo = OplLfo::new();

        if Self::IS_OPL3 {
            // Left and right outputs enabled on every channel
            for chnum in 0..18 {
                self.regs.set(0xC0 + Self::channel_offset(chnum), 0x30);
            }
        }
    }

    fn raw(&self, index: u16) -> u8 {
        self.regs.get(index)
    }

    fn remap_address(&self, address: u16) -> u16 {
        // Without the NEW flag, the upper bank only exposes the NEW flag register itself
        if Self::IS_OPL3 && address.bit(8) && address != NEW_FLAG && !self.new_flag() {
            address & 0xFF
        } else {
            address
        }
    }

    fn write(&mut self, index: u16, data: u8) -> Option<KeyOnEvent> {
        // IRQ reset writes leave the rest of the mode register alone
        if index == MODE && data.bit(7) {
            self.regs.set(MODE, self.regs.get(MODE) | 0x80);
        } else {
            self.regs.set(index, data);
        }

        if index == RHYTHM {
            let opmask = if data.bit(5) { data & 0x1F } else { 0 };
            return Some(KeyOnEvent::Rhythm { opmask });
        }

        let channel = usize::from(index & 0x0F);
        if index & 0xF0 == 0xB0 && channel < 9 {
            let bank = if Self::IS_OPL3 { usize::from(index.bit(8)) } else { 0 };
            let channel = channel + 9 * bank;
            let opmask = if data.bit(5) { 0xF } else { 0 };
            return Some(KeyOnEvent::Channel { channel, opmask });
        }

        None
    }

    fn channel_offset(chnum: usize) -> u16 {
        (chnum % 9 + 0x100 * (chnum / 9)) as u16
    }

    fn operator_offset(opnum: usize) -> u16 {
        let slot = opnum % 18;
        (slot + 2 * (slot / 6) + 0x100 * (opnum / 18)) as u16
    }

    fn operator_list(&self, chnum: usize) -> OperatorList {
        let bank = chnum / 9;
        let local = chnum % 9;
        let base = ((local / 3) * 6 + local % 3 + 18 * bank) as u8;

        // Channels 0-2 of each bank can pair with channels 3-5 as 4-op channels
        let four_op = self.four_op_enable();
        let pair_bit = (local % 3 + 3 * bank) as u8;
        match local {
            0..=2 if four_op.bit(pair_bit) => Self::four_op(base),
            3..=5 if four_op.bit(pair_bit) => [None; 4],
            _ => Self::two_op(base),
        }
    }

    fn clock_noise_and_lfo(&mut self) -> i32 {
        self.lfo.clock(self.lfo_am_depth(), self.lfo_pm_depth())
    }

    fn lfo_am_offset(&self, _choffs: u16) -> u32 {
        self.lfo.am()
    }

    fn noise_state(&self) -> u32 {
        self.lfo.noise_state()
    }

    fn rhythm_enable(&self) -> bool {
        self.regs.bit(RHYTHM, 5)
    }

    fn status_mask(&self) -> u8 {
        self.regs.get(MODE) & 0x78
    }

    fn irq_reset(&self) -> bool {
        self.regs.bit(MODE, 7)
    }

    fn timer_a_value(&self) -> u16 {
        // Timer A ticks 4x slower than timer B's base
        u16::from(self.regs.get(0x02)) * 4
    }

    fn timer_b_value(&self) -> u8 {
        self.regs.get(0x03)
    }

    fn timer_control(&self) -> TimerControl {
        TimerControl {
            load_a: self.regs.bit(MODE, 0),
            load_b: self.regs.bit(MODE, 1),
            enable_a: true,
            enable_b: true,
            reset_a: self.regs.bit(MODE, 7) || self.regs.bit(MODE, 6),
            reset_b: self.regs.bit(MODE, 7) || self.regs.bit(MODE, 5),
        }
    }

    fn csm(&self) -> bool {
        !Self::IS_OPL3 && self.regs.bit(0x08, 7)
    }

    fn ch_feedback(&self, choffs: u16) -> u32 {
        self.regs.field(0xC0 + choffs, 1, 3)
    }

    fn ch_algorithm(&self, choffs: u16) -> u32 {
        let connection = self.regs.field(0xC0 + choffs, 0, 1);
        if Self::IS_OPL3 {
            8 | (self.regs.field(0xC3 + choffs, 0, 1) << 1) | connection
        } else {
            connection
        }
    }

    fn ch_block_freq(&self, choffs: u16) -> u32 {
        self.regs.word((0xB0 + choffs, 0, 5), (0xA0 + choffs, 0, 8))
    }

    fn ch_outputs(&self, choffs: u16) -> [bool; 4] {
        if self.new_flag() {
            let c0 = self.regs.get(0xC0 + choffs);
            [c0.bit(4), c0.bit(5), c0.bit(6), c0.bit(7)]
        } else if Self::IS_OPL3 {
            [true, true, false, false]
        } else {
            [true, false, false, false]
        }
    }

    fn op_lfo_am_enable(&self, opoffs: u16) -> bool {
        self.regs.bit(0x20 + opoffs, 7)
    }

    fn cache_operator_data(&self, choffs: u16, opoffs: u16) -> OperatorCache {
        let block_freq = self.ch_block_freq(choffs);
        let block = block_freq.field(10, 3);

        // Top 3 bits plus one F-number bit picked by note select
        let keycode = (block << 1) | block_freq.field(9 - self.note_select() as u8, 1);

        let mut cache = OperatorCache {
            waveform: self.op_waveform(opoffs),
            block_freq,
            detune: 0,
            multiple: tables::opl_multiple(self.op_multiple(opoffs)),
            eg_sustain: operator::sustain_attenuation(self.op_sustain_level(opoffs)),
            ..OperatorCache::default()
        };

        cache.phase_step = if self.op_lfo_pm_enable(opoffs) {
            PhaseStep::Dynamic
        } else {
            PhaseStep::Static(self.compute_phase_step(choffs, opoffs, &cache, 0))
        };

        cache.total_level = self.op_total_level(opoffs) << 3;
        let ksl = self.op_ksl(opoffs);
        if ksl != 0 {
            cache.total_level += tables::opl_key_scale_atten(block, block_freq.field(6, 4)) << ksl;
        }

        let ksr = keycode >> (2 * (self.op_ksr(opoffs) ^ 1));
        let release = self.op_release_rate(opoffs) * 4;
        let sustain = if self.op_eg_sustain(opoffs) { 0 } else { release };
        cache.eg_rate = eg_rates(
            0x3F,
            self.op_attack_rate(opoffs) * 4,
            self.op_decay_rate(opoffs) * 4,
            sustain,
            release,
            ksr,
        );

        cache
    }

    fn compute_phase_step(
        &self,
        _choffs: u16,
        _opoffs: u16,
        cache: &OperatorCache,
        lfo_raw_pm: i32,
    ) -> u32 {
        // 12-bit F-number with PM scaled by its top 3 bits
        let fnum = (cache.block_freq.field(0, 10) << 2) as i32;
        let adjustment = (lfo_raw_pm * cache.block_freq.field(7, 3) as i32) >> 1;
        let fnum = (fnum + adjustment) as u32 & 0xFFF;

        let block = cache.block_freq.field(10, 3);
        let phase_step = (fnum << block) >> 2;
        (phase_step * cache.multiple) >> 1
    }
}
