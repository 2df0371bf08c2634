use bincode::{Decode, Encode};
use fm_proc_macros::{ConfigDisplay, EnumAll, EnumDisplay, EnumFromStr};

/// Yamaha FM chip families. `Opq` and `Opz` are recognized but not emulated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(fm_proc_macros::CustomValueEnum))]
pub enum ChipFamily {
    /// YM2151
    #[default]
    Opm,
    /// YM2203
    Opn,
    /// YM2608 / YM2610 / YM2612 / YM3438
    Opna,
    /// YM3526
    Opl,
    /// YM3812
    Opl2,
    /// YM2413
    Opll,
    /// YMF262
    Opl3,
    /// YM3806
    Opq,
    /// YM2414
    Opz,
}

impl ChipFamily {
    /// Typical input clock for the family's most common part, in Hz.
    #[must_use]
    pub const fn default_clock(self) -> u32 {
        match self {
            Self::Opm | Self::Opl | Self::Opl2 | Self::Opll | Self::Opq | Self::Opz => 3_579_545,
            Self::Opn => 4_000_000,
            Self::Opna => 7_987_200,
            Self::Opl3 => 14_318_180,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(fm_proc_macros::CustomValueEnum))]
pub enum BusyFlagBehavior {
    /// Busy bit reads as 1 for a short period after every write
    #[default]
    Emulated,
    /// Busy bit always reads as 0
    AlwaysZero,
}

/// Output stage used by OPNA-family parts; the YM2612 and YM3438 are OPN2 variants that share
/// the OPNA register layout and differ from the YM2608 only in how channels reach the DAC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(fm_proc_macros::CustomValueEnum))]
pub enum OpnaOutputStage {
    /// 16-bit adder through an external DAC
    #[default]
    Ym2608,
    /// Time-multiplexed 9-bit DAC with the ladder effect
    Ym2612,
    /// Time-multiplexed 9-bit DAC without the ladder effect
    Ym3438,
}

impl OpnaOutputStage {
    #[must_use]
    pub fn is_opn2(self) -> bool {
        matches!(self, Self::Ym2612 | Self::Ym3438)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(fm_proc_macros::CustomValueEnum))]
pub enum OpllPatchSet {
    #[default]
    Ym2413,
    Vrc7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, ConfigDisplay)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChipConfig {
    pub family: ChipFamily,
    /// Input clock in Hz; defaults to the family's typical clock if not set
    #[cfg_display(debug_fmt)]
    pub clock: Option<u32>,
    pub busy_behavior: BusyFlagBehavior,
    pub opna_output: OpnaOutputStage,
    pub opll_patches: OpllPatchSet,
}

impl ChipConfig {
    #[must_use]
    pub fn new(family: ChipFamily) -> Self {
        Self { family, ..Self::default() }
    }

    #[must_use]
    pub fn effective_clock(&self) -> u32 {
        self.clock.unwrap_or_else(|| self.family.default_clock())
    }
}
