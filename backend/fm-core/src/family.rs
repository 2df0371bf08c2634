//! Static per-family parameters, resolved once when a chip is constructed

use crate::UnsupportedFamilyError;
use fm_common::num::GetBit;
use fm_config::ChipFamily;

/// How a channel's block/frequency word is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFreqLayout {
    /// OPM: 3-bit block, 4-bit key code, 6-bit key fraction
    KeyCode,
    /// 3-bit block above an F-number of the given width
    FNumber { fnum_bits: u8 },
}

/// A block/frequency word split into its two halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFreq {
    pub block: u8,
    /// F-number, or the key code and key fraction for OPM
    pub freq: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBits {
    pub timer_a: u8,
    pub timer_b: u8,
    pub busy: u8,
    pub irq: u8,
    /// Bits that always read back as 1
    pub always_set: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyTraits {
    pub family: ChipFamily,
    pub outputs: usize,
    pub channels: usize,
    pub operators: usize,
    pub waveforms: usize,
    /// Size of the register address space; addresses are masked to this
    pub registers: usize,
    pub default_prescale: u32,
    /// Envelope generator ticks once every this many samples
    pub eg_clock_divider: u32,
    pub block_freq_bits: u8,
    pub block_freq_layout: BlockFreqLayout,
    /// Samples that the busy flag stays set after a write
    pub busy_ticks: u8,
    pub status: StatusBits,
    /// Channels that key on in CSM mode when timer A overflows
    pub csm_trigger_mask: u32,
    /// Address that reads back a chip ID rather than the status register
    pub chip_id: Option<(u16, u8)>,
    pub has_lfo: bool,
    pub has_noise: bool,
    pub has_ssg_eg: bool,
    pub has_rhythm: bool,
    pub has_instruments: bool,
    pub has_timers: bool,
    pub has_csm: bool,
    /// Operators are reassigned to channels at runtime (OPL3 4-op mode)
    pub dynamic_op_count: bool,
    /// Key-on first damps the envelope down before starting the attack (OPLL)
    pub has_eg_depress: bool,
    /// 2-op channels modulate the carrier with the previous sample's modulator output
    pub modulator_delay: bool,
    /// Writes to 0x2D-0x2F select the clock prescaler
    pub prescale_select: bool,
}

const OPN_STATUS: StatusBits =
    StatusBits { timer_a: 0x01, timer_b: 0x02, busy: 0x80, irq: 0, always_set: 0 };

const OPL_STATUS: StatusBits =
    StatusBits { timer_a: 0x40, timer_b: 0x20, busy: 0, irq: 0x80, always_set: 0x06 };

pub const OPM: FamilyTraits = FamilyTraits {
    family: ChipFamily::Opm,
    outputs: 2,
    channels: 8,
    operators: 32,
    waveforms: 1,
    registers: 0x100,
    default_prescale: 2,
    eg_clock_divider: 3,
    block_freq_bits: 13,
    block_freq_layout: BlockFreqLayout::KeyCode,
    busy_ticks: 1,
    status: OPN_STATUS,
    csm_trigger_mask: 0xFF,
    chip_id: None,
    has_lfo: true,
    has_noise: true,
    has_ssg_eg: false,
    has_rhythm: false,
    has_instruments: false,
    has_timers: true,
    has_csm: true,
    dynamic_op_count: false,
    has_eg_depress: false,
    modulator_delay: false,
    prescale_select: false,
};

pub const OPN: FamilyTraits = FamilyTraits {
    family: ChipFamily::Opn,
    channels: 3,
    operators: 12,
    registers: 0x100,
    default_prescale: 6,
    block_freq_bits: 14,
    block_freq_layout: BlockFreqLayout::FNumber { fnum_bits: 11 },
    busy_ticks: 3,
    csm_trigger_mask: 1 << 2,
    outputs: 1,
    has_lfo: false,
    has_noise: false,
    has_ssg_eg: true,
    prescale_select: true,
    ..OPM
};

pub const OPNA: FamilyTraits = FamilyTraits {
    family: ChipFamily::Opna,
    outputs: 2,
    channels: 6,
    operators: 24,
    registers: 0x200,
    busy_ticks: 2,
    chip_id: Some((0xFF, 0x01)),
    has_lfo: true,
    ..OPN
};

pub const OPL: FamilyTraits = FamilyTraits {
    family: ChipFamily::Opl,
    outputs: 1,
    channels: 9,
    operators: 18,
    waveforms: 1,
    registers: 0x100,
    default_prescale: 4,
    eg_clock_divider: 1,
    block_freq_bits: 13,
    block_freq_layout: BlockFreqLayout::FNumber { fnum_bits: 10 },
    busy_ticks: 0,
    status: OPL_STATUS,
    csm_trigger_mask: 0x1FF,
    chip_id: None,
    has_lfo: true,
    has_noise: false,
    has_ssg_eg: false,
    has_rhythm: true,
    has_instruments: false,
    has_timers: true,
    has_csm: true,
    dynamic_op_count: false,
    has_eg_depress: false,
    modulator_delay: true,
    prescale_select: false,
};

pub const OPL2: FamilyTraits = FamilyTraits { family: ChipFamily::Opl2, waveforms: 4, ..OPL };

pub const OPL3: FamilyTraits = FamilyTraits {
    family: ChipFamily::Opl3,
    outputs: 4,
    channels: 18,
    operators: 36,
    waveforms: 8,
    registers: 0x200,
    default_prescale: 8,
    status: StatusBits { always_set: 0, ..OPL_STATUS },
    csm_trigger_mask: 0,
    has_csm: false,
    dynamic_op_count: true,
    modulator_delay: false,
    ..OPL
};

pub const OPLL: FamilyTraits = FamilyTraits {
    family: ChipFamily::Opll,
    waveforms: 2,
    registers: 0x40,
    block_freq_bits: 12,
    block_freq_layout: BlockFreqLayout::FNumber { fnum_bits: 9 },
    status: StatusBits { timer_a: 0, timer_b: 0, busy: 0, irq: 0, always_set: 0 },
    csm_trigger_mask: 0,
    has_instruments: true,
    has_timers: false,
    has_csm: false,
    has_eg_depress: true,
    ..OPL
};

impl FamilyTraits {
    /// Look up the traits for a family.
    ///
    /// # Errors
    ///
    /// Returns an error for families that are recognized but not emulated.
    pub fn for_family(family: ChipFamily) -> Result<&'static Self, UnsupportedFamilyError> {
        match family {
            ChipFamily::Opm => Ok(&OPM),
            ChipFamily::Opn => Ok(&OPN),
            ChipFamily::Opna => Ok(&OPNA),
            ChipFamily::Opl => Ok(&OPL),
            ChipFamily::Opl2 => Ok(&OPL2),
            ChipFamily::Opll => Ok(&OPLL),
            ChipFamily::Opl3 => Ok(&OPL3),
            ChipFamily::Opq | ChipFamily::Opz => Err(UnsupportedFamilyError { family }),
        }
    }

    /// Output sample rate for the given input clock.
    #[must_use]
    pub fn sample_rate(&self, clock: u32, prescale: u32) -> u32 {
        clock / (prescale * self.operators as u32)
    }

    #[must_use]
    pub fn split_block_freq(&self, block_freq: u16) -> BlockFreq {
        let freq_bits = match self.block_freq_layout {
            BlockFreqLayout::KeyCode => 10,
            BlockFreqLayout::FNumber { fnum_bits } => fnum_bits,
        };
        BlockFreq {
            block: block_freq.field(freq_bits, 3) as u8,
            freq: block_freq.field(0, freq_bits),
        }
    }
}
