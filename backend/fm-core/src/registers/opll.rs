//! OPLL (YM2413) register decoding
//!
//! Each channel picks an instrument: the user patch at 0x00-0x07 or one of 15 ROM patches. In
//! rhythm mode channels 7-9 switch to the fixed rhythm patches. Patches are 8 bytes with the
//! modulator in even bytes and the carrier in odd bytes, except bytes 2 and 3.

use crate::family::{self, FamilyTraits};
use crate::lfo::OplLfo;
use crate::operator::{self, OperatorCache, PhaseStep};
use crate::registers::{
    FamilyRegisters, KeyOnEvent, OperatorList, RegisterFile, TimerControl, eg_rates,
};
use crate::tables;
use bincode::{Decode, Encode};
use fm_common::num::GetBit;
use fm_config::{ChipConfig, OpllPatchSet};

const RHYTHM: u16 = 0x0E;

// First rhythm channel
const RHYTHM_BASE_CHANNEL: u16 = 6;

type Patch = [u8; 8];

// YM2413 instrument ROM, instruments 1-15
const YM2413_PATCHES: &[Patch; 15] = &[
    // Violin
    [0x71, 0x61, 0x1E, 0x17, 0xD0, 0x78, 0x00, 0x17],
    // Guitar
    [0x13, 0x41, 0x1A, 0x0D, 0xD8, 0xF7, 0x23, 0x13],
    // Piano
    [0x13, 0x01, 0x99, 0x00, 0xF2, 0xC4, 0x11, 0x23],
    // Flute
    [0x31, 0x61, 0x0E, 0x07, 0xA8, 0x64, 0x70, 0x27],
    // Clarinet
    [0x32, 0x21, 0x1E, 0x06, 0xE0, 0x76, 0x00, 0x28],
    // Oboe
    [0x31, 0x22, 0x16, 0x05, 0xE0, 0x71, 0x00, 0x18],
    // Trumpet
    [0x21, 0x61, 0x1D, 0x07, 0x82, 0x81, 0x10, 0x07],
    // Organ
    [0x23, 0x21, 0x2D, 0x14, 0xA2, 0x72, 0x00, 0x07],
    // Horn
    [0x61, 0x61, 0x1B, 0x06, 0x64, 0x65, 0x10, 0x17],
    // Synthesizer
    [0x41, 0x61, 0x0B, 0x18, 0x85, 0xF7, 0x71, 0x07],
    // Harpsichord
    [0x13, 0x01, 0x83, 0x11, 0xFA, 0xE4, 0x10, 0x04],
    // Vibraphone
    [0x17, 0xC1, 0x24, 0x07, 0xF8, 0xF8, 0x22, 0x12],
    // Synth bass
    [0x61, 0x50, 0x0C, 0x05, 0xC2, 0xF5, 0x20, 0x42],
    // Acoustic bass
    [0x01, 0x01, 0x55, 0x03, 0xC9, 0x95, 0x03, 0x02],
    // Electric guitar
    [0x61, 0x41, 0x89, 0x03, 0xF1, 0xE4, 0x40, 0x13],
];

// VRC7 instrument ROM per https://www.nesdev.org/wiki/VRC7_audio#Internal_patch_set
const VRC7_PATCHES: &[Patch; 15] = &[
    [0x03, 0x21, 0x05, 0x06, 0xE8, 0x81, 0x42, 0x27],
    [0x13, 0x41, 0x14, 0x0D, 0xD8, 0xF6, 0x23, 0x12],
    [0x11, 0x11, 0x08, 0x08, 0xFA, 0xB2, 0x20, 0x12],
    [0x31, 0x61, 0x0C, 0x07, 0xA8, 0x64, 0x61, 0x27],
    [0x32, 0x21, 0x1E, 0x06, 0xE1, 0x76, 0x01, 0x28],
    [0x02, 0x01, 0x06, 0x00, 0xA3, 0xE2, 0xF4, 0xF4],
    [0x21, 0x61, 0x1D, 0x07, 0x82, 0x81, 0x11, 0x07],
    [0x23, 0x21, 0x22, 0x17, 0xA2, 0x72, 0x01, 0x17],
    [0x35, 0x11, 0x25, 0x00, 0x40, 0x73, 0x72, 0x01],
    [0xB5, 0x01, 0x0F, 0x0F, 0xA8, 0xA5, 0x51, 0x02],
    [0x17, 0xC1, 0x24, 0x07, 0xF8, 0xF8, 0x22, 0x12],
    [0x71, 0x23, 0x11, 0x06, 0x65, 0x74, 0x18, 0x16],
    [0x01, 0x02, 0xD3, 0x05, 0xC9, 0x95, 0x03, 0x02],
    [0x61, 0x63, 0x0C, 0x00, 0x94, 0xC0, 0x33, 0xF6],
    [0x21, 0x72, 0x0D, 0x00, 0xC1, 0xD5, 0x56, 0x06],
];

// Bass drum, snare drum / hi-hat, tom-tom / top cymbal
const RHYTHM_PATCHES: &[Patch; 3] = &[
    [0x01, 0x01, 0x18, 0x0F, 0xDF, 0xF8, 0x6A, 0x6D],
    [0x01, 0x01, 0x00, 0x00, 0xC8, 0xD8, 0xA7, 0x68],
    [0x05, 0x01, 0x00, 0x00, 0xF8, 0xAA, 0x59, 0x55],
];

#[derive(Debug, Clone, Encode, Decode)]
pub struct OpllRegisters {
    regs: RegisterFile<0x40>,
    lfo: OplLfo,
    patch_set: OpllPatchSet,
}

impl OpllRegisters {
    fn rom(&self) -> &'static [Patch; 15] {
        match self.patch_set {
            OpllPatchSet::Ym2413 => YM2413_PATCHES,
            OpllPatchSet::Vrc7 => VRC7_PATCHES,
        }
    }

    pub fn patch_set(&self) -> OpllPatchSet {
        self.patch_set
    }

    pub fn rhythm_instruments(&self) -> u8 {
        self.regs.get(RHYTHM) & 0x1F
    }

    pub fn ch_instrument(&self, choffs: u16) -> u32 {
        self.regs.field(0x30 + choffs, 4, 4)
    }

    /// Whether the channel's sustain bit slows the release.
    pub fn ch_sustain(&self, choffs: u16) -> bool {
        self.regs.bit(0x20 + choffs, 5)
    }

    /// Byte `offset` of the patch the channel currently plays.
    pub fn instrument_byte(&self, choffs: u16, offset: usize) -> u8 {
        if self.rhythm_enable() && choffs >= RHYTHM_BASE_CHANNEL {
            return RHYTHM_PATCHES[usize::from(choffs - RHYTHM_BASE_CHANNEL) % 3][offset];
        }

        match self.ch_instrument(choffs) {
            0 => self.regs.get(offset as u16),
            instrument => self.rom()[instrument as usize - 1][offset],
        }
    }

    // Modulator reads the even byte of a pair and the carrier the odd one
    fn op_byte(&self, opoffs: u16, offset: usize) -> u8 {
        self.instrument_byte(opoffs >> 1, offset + usize::from(opoffs & 1))
    }

    pub fn op_lfo_pm_enable(&self, opoffs: u16) -> bool {
        self.op_byte(opoffs, 0).bit(6)
    }

    pub fn op_eg_sustain(&self, opoffs: u16) -> bool {
        self.op_byte(opoffs, 0).bit(5)
    }

    pub fn op_ksr(&self, opoffs: u16) -> u32 {
        u32::from(self.op_byte(opoffs, 0).bit(4))
    }

    pub fn op_multiple(&self, opoffs: u16) -> u32 {
        u32::from(self.op_byte(opoffs, 0) & 0x0F)
    }

    pub fn op_ksl(&self, opoffs: u16) -> u32 {
        u32::from(self.op_byte(opoffs, 2) >> 6)
    }

    pub fn op_waveform(&self, opoffs: u16) -> u8 {
        let rectify_bit = 3 + (opoffs & 1) as u8;
        u8::from(self.instrument_byte(opoffs >> 1, 3).bit(rectify_bit))
    }

    pub fn op_attack_rate(&self, opoffs: u16) -> u32 {
        u32::from(self.op_byte(opoffs, 4) >> 4)
    }

    pub fn op_decay_rate(&self, opoffs: u16) -> u32 {
        u32::from(self.op_byte(opoffs, 4) & 0x0F)
    }

    pub fn op_sustain_level(&self, opoffs: u16) -> u32 {
        u32::from(self.op_byte(opoffs, 6) >> 4)
    }

    pub fn op_release_rate(&self, opoffs: u16) -> u32 {
        u32::from(self.op_byte(opoffs, 6) & 0x0F)
    }

    /// Carriers take the low volume nibble; rhythm modulators on channels 8-9 take the high one.
    pub fn op_volume(&self, opoffs: u16) -> u32 {
        let shift = if opoffs & 1 == 0 { 4 } else { 0 };
        self.regs.field(0x30 + (opoffs >> 1), shift, 4)
    }
}

impl FamilyRegisters for OpllRegisters {
    const TRAITS: &'static FamilyTraits = &family::OPLL;
    const MODE_REGISTER: Option<u16> = None;

    fn new(config: &ChipConfig) -> Self {
        Self { regs: RegisterFile::new(), lfo: OplLfo::new(), patch_set: config.opll_patches }
    }

    fn reset(&mut self) {
        self.regs.clear();
        self.lfo = OplLfo::new();
    }

    fn raw(&self, index: u16) -> u8 {
        self.regs.get(index)
    }

    fn write(&mut self, index: u16, data: u8) -> Option<KeyOnEvent> {
        self.regs.set(index, data);

        if index == RHYTHM {
            let opmask = if data.bit(5) { data & 0x1F } else { 0 };
            return Some(KeyOnEvent::Rhythm { opmask });
        }

        let channel = usize::from(index & 0x0F);
        (index & 0xF0 == 0x20 && channel < 9).then(|| KeyOnEvent::Channel {
            channel,
            opmask: if data.bit(4) { 3 } else { 0 },
        })
    }

    fn channel_offset(chnum: usize) -> u16 {
        chnum as u16
    }

    fn operator_offset(opnum: usize) -> u16 {
        opnum as u16
    }

    fn operator_list(&self, chnum: usize) -> OperatorList {
        let base = (chnum * 2) as u8;
        [Some(base), Some(base + 1), None, None]
    }

    fn clock_noise_and_lfo(&mut self) -> i32 {
        self.lfo.clock(true, true)
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

    fn timer_a_value(&self) -> u16 {
        0
    }

    fn timer_b_value(&self) -> u8 {
        0
    }

    fn timer_control(&self) -> TimerControl {
        TimerControl::default()
    }

    fn csm(&self) -> bool {
        false
    }

    fn ch_feedback(&self, choffs: u16) -> u32 {
        u32::from(self.instrument_byte(choffs, 3) & 0x07)
    }

    fn ch_algorithm(&self, _choffs: u16) -> u32 {
        0
    }

    fn ch_block_freq(&self, choffs: u16) -> u32 {
        self.regs.word((0x20 + choffs, 0, 4), (0x10 + choffs, 0, 8))
    }

    fn ch_outputs(&self, _choffs: u16) -> [bool; 4] {
        [true, false, false, false]
    }

    fn op_lfo_am_enable(&self, opoffs: u16) -> bool {
        self.op_byte(opoffs, 0).bit(7)
    }

    fn cache_operator_data(&self, choffs: u16, opoffs: u16) -> OperatorCache {
        let block_freq = self.ch_block_freq(choffs);

        // Block plus the F-number MSB
        let keycode = block_freq.field(8, 4);

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

        let uses_volume = opoffs & 1 == 1 || (self.rhythm_enable() && choffs > RHYTHM_BASE_CHANNEL);
        let level = if uses_volume {
            self.op_volume(opoffs) * 4
        } else {
            u32::from(self.instrument_byte(choffs, 2) & 0x3F)
        };
        cache.total_level = level << 3;

        let ksl = self.op_ksl(opoffs);
        if ksl != 0 {
            let atten = tables::opl_key_scale_atten(block_freq.field(9, 3), block_freq.field(5, 4));
            cache.total_level += atten << ksl;
        }

        let ksr = keycode >> (2 * (self.op_ksr(opoffs) ^ 1));
        let release = self.op_release_rate(opoffs) * 4;
        let (sustain, release) = match (self.op_eg_sustain(opoffs), self.ch_sustain(choffs)) {
            (true, true) => (0, 5 * 4),
            (true, false) => (0, release),
            (false, true) => (release, 5 * 4),
            (false, false) => (release, 7 * 4),
        };
        cache.eg_rate = eg_rates(
            12 * 4,
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
        let fnum = (cache.block_freq.field(0, 9) << 3) as i32;
        let adjustment = (lfo_raw_pm * cache.block_freq.field(6, 3) as i32) >> 1;
        let fnum = (fnum + adjustment) as u32 & 0xFFF;

        let block = cache.block_freq.field(9, 3);
        let phase_step = (fnum << block) >> 2;
        (phase_step * cache.multiple) >> 1
    }
}
