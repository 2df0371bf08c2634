//! Register files and the per-family decoding that sits on top of them

pub mod opl;
pub mod opll;
pub mod opm;
pub mod opn;

use crate::envelope::SsgEgMode;
use crate::family::FamilyTraits;
use crate::operator::OperatorCache;
use bincode::{Decode, Encode};
use fm_common::num::GetBit;
use fm_config::ChipConfig;

pub use opl::OplRegisters;
pub use opll::OpllRegisters;
pub use opm::OpmRegisters;
pub use opn::OpnRegisters;

/// Operator indices assigned to one channel, in algorithm order.
pub type OperatorList = [Option<u8>; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOnEvent {
    Channel { channel: usize, opmask: u8 },
    /// Rhythm key bits: bass drum, snare, tom, top cymbal, hi-hat (bits 4 to 0)
    Rhythm { opmask: u8 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerControl {
    pub load_a: bool,
    pub load_b: bool,
    pub enable_a: bool,
    pub enable_b: bool,
    pub reset_a: bool,
    pub reset_b: bool,
}

/// Raw register storage. Every write lands here, including writes to unused addresses.
#[derive(Debug, Clone, Encode, Decode)]
pub struct RegisterFile<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> RegisterFile<N> {
    pub fn new() -> Self {
        Self { data: [0; N] }
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    #[inline]
    pub fn get(&self, index: u16) -> u8 {
        self.data[index as usize % N]
    }

    #[inline]
    pub fn set(&mut self, index: u16, value: u8) {
        self.data[index as usize % N] = value;
    }

    /// Extract `count` bits starting at `start` from the register at `index`.
    #[inline]
    pub fn field(&self, index: u16, start: u8, count: u8) -> u32 {
        u32::from(self.get(index)).field(start, count)
    }

    #[inline]
    pub fn bit(&self, index: u16, bit: u8) -> bool {
        self.get(index).bit(bit)
    }

    /// Concatenate a field from a high register above a field from a low register.
    #[inline]
    pub fn word(&self, hi: (u16, u8, u8), lo: (u16, u8, u8)) -> u32 {
        let (lo_index, lo_start, lo_count) = lo;
        (self.field(hi.0, hi.1, hi.2) << lo_count) | self.field(lo_index, lo_start, lo_count)
    }
}

impl<const N: usize> Default for RegisterFile<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// State that some families keep outside the addressable register space: the OPN frequency
/// latches, the OPM PM depth that shares an address with AM depth, and the OPN2 DAC sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct AuxStorage {
    /// Indexed by bank, then [channel frequency latch, CH3 multi-frequency latch]
    pub fnum_latch: [[u8; 2]; 2],
    pub pm_depth: u8,
    /// 9-bit OPN2 DAC sample
    pub dac_sample: u16,
}

/// Family-specific register decoding, LFO and noise state, and operator parameter derivation.
pub trait FamilyRegisters {
    const TRAITS: &'static FamilyTraits;

    /// Register whose writes also control the timers, if any.
    const MODE_REGISTER: Option<u16>;

    fn new(config: &ChipConfig) -> Self;

    /// Restore power-on register contents and LFO/noise state.
    fn reset(&mut self);

    fn raw(&self, index: u16) -> u8;

    /// Map an incoming address before it is decoded.
    fn remap_address(&self, address: u16) -> u16 {
        address
    }

    /// Store a write and report any resulting key-on change.
    fn write(&mut self, index: u16, data: u8) -> Option<KeyOnEvent>;

    fn channel_offset(chnum: usize) -> u16;

    fn operator_offset(opnum: usize) -> u16;

    fn operator_list(&self, chnum: usize) -> OperatorList;

    /// Advance noise and LFO by one sample, returning the raw LFO PM value.
    fn clock_noise_and_lfo(&mut self) -> i32;

    fn lfo_am_offset(&self, choffs: u16) -> u32;

    fn noise_state(&self) -> u32 {
        0
    }

    fn noise_enable(&self) -> bool {
        false
    }

    fn rhythm_enable(&self) -> bool {
        false
    }

    /// Status bits masked from reads and IRQs by the chip itself.
    fn status_mask(&self) -> u8 {
        0
    }

    /// Whether the last mode register write was an IRQ reset.
    fn irq_reset(&self) -> bool {
        false
    }

    fn timer_a_value(&self) -> u16;

    fn timer_b_value(&self) -> u8;

    fn timer_control(&self) -> TimerControl;

    fn csm(&self) -> bool;

    fn ch_feedback(&self, choffs: u16) -> u32;

    fn ch_algorithm(&self, choffs: u16) -> u32;

    fn ch_block_freq(&self, choffs: u16) -> u32;

    /// Output routing per line.
    fn ch_outputs(&self, choffs: u16) -> [bool; 4];

    fn op_ssg_eg_mode(&self, _opoffs: u16) -> Option<SsgEgMode> {
        None
    }

    fn op_lfo_am_enable(&self, opoffs: u16) -> bool;

    fn cache_operator_data(&self, choffs: u16, opoffs: u16) -> OperatorCache;

    fn compute_phase_step(
        &self,
        choffs: u16,
        opoffs: u16,
        cache: &OperatorCache,
        lfo_raw_pm: i32,
    ) -> u32;

    /// Latest OPN2 DAC sample and whether the DAC replaces channel 6.
    fn dac(&self) -> Option<u16> {
        None
    }
}

/// Standard 4-step envelope rates, each raw rate already scaled to 0-63.
pub(crate) fn eg_rates(
    depress: u32,
    attack: u32,
    decay: u32,
    sustain: u32,
    release: u32,
    ksr: u32,
) -> [u8; 6] {
    use crate::tables::effective_rate;
    [
        effective_rate(depress, ksr),
        effective_rate(attack, ksr),
        effective_rate(decay, ksr),
        effective_rate(sustain, ksr),
        effective_rate(release, ksr),
        0,
    ]
}
