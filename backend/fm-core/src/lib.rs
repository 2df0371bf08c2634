//! Bit-exact Yamaha FM synthesis cores: OPM, OPN, OPNA, OPL, OPL2, OPLL, and OPL3.
//!
//! A [`Chip`] is driven by register writes and produces one [`OutputFrame`] per call to
//! [`Chip::generate`], at the rate reported by [`Chip::sample_rate`].

pub mod channel;
pub mod engine;
pub mod envelope;
pub mod family;
pub mod lfo;
pub mod mixer;
pub mod operator;
pub mod registers;
pub mod tables;
pub mod timer;

use crate::engine::FmEngine;
use crate::family::FamilyTraits;
use crate::registers::{OplRegisters, OpllRegisters, OpmRegisters, OpnRegisters};
use bincode::{Decode, Encode};
use fm_config::{ChipConfig, ChipFamily};
use fm_proc_macros::MatchEachVariantMacro;
use thiserror::Error;

pub use mixer::OutputFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unsupported FM chip family: {family}")]
pub struct UnsupportedFamilyError {
    pub family: ChipFamily,
}

#[derive(Debug, Clone, Encode, Decode, MatchEachVariantMacro)]
enum ChipEngine {
    Opm(FmEngine<OpmRegisters>),
    Opn(FmEngine<OpnRegisters<false>>),
    Opna(FmEngine<OpnRegisters<true>>),
    Opl(FmEngine<OplRegisters<1>>),
    Opl2(FmEngine<OplRegisters<2>>),
    Opll(FmEngine<OpllRegisters>),
    Opl3(FmEngine<OplRegisters<3>>),
}

/// One emulated FM chip.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Chip {
    engine: ChipEngine,
    family: ChipFamily,
}

impl Chip {
    /// Create a chip with default options for the family.
    ///
    /// # Errors
    ///
    /// Returns an error if the family is recognized but not emulated (OPQ and OPZ).
    pub fn new(family: ChipFamily, clock: u32) -> Result<Self, UnsupportedFamilyError> {
        Self::from_config(&ChipConfig { clock: Some(clock), ..ChipConfig::new(family) })
    }

    /// # Errors
    ///
    /// Returns an error if the configured family is recognized but not emulated.
    pub fn from_config(config: &ChipConfig) -> Result<Self, UnsupportedFamilyError> {
        let family = config.family;
        let engine = match family {
            ChipFamily::Opm => ChipEngine::Opm(FmEngine::new(config)),
            ChipFamily::Opn => ChipEngine::Opn(FmEngine::new(config)),
            ChipFamily::Opna => ChipEngine::Opna(FmEngine::new(config)),
            ChipFamily::Opl => ChipEngine::Opl(FmEngine::new(config)),
            ChipFamily::Opl2 => ChipEngine::Opl2(FmEngine::new(config)),
            ChipFamily::Opll => ChipEngine::Opll(FmEngine::new(config)),
            ChipFamily::Opl3 => ChipEngine::Opl3(FmEngine::new(config)),
            ChipFamily::Opq | ChipFamily::Opz => return Err(UnsupportedFamilyError { family }),
        };

        let chip = Self { engine, family };
        log::debug!(
            "Created {family} chip with clock {} Hz, sample rate {} Hz",
            config.effective_clock(),
            chip.sample_rate()
        );
        log::debug!("Chip config:\n{config}");

        Ok(chip)
    }

    pub fn write(&mut self, address: u16, data: u8) {
        match_each_variant!(&mut self.engine, engine => engine.write(address, data));
    }

    #[must_use]
    pub fn read(&self, address: u16) -> u8 {
        match_each_variant!(&self.engine, engine => engine.read(address))
    }

    /// Advance the chip by one output sample.
    pub fn generate(&mut self) -> OutputFrame {
        match_each_variant!(&mut self.engine, engine => engine.generate())
    }

    #[must_use]
    pub fn status(&self) -> u8 {
        match_each_variant!(&self.engine, engine => engine.status())
    }

    #[must_use]
    pub fn irq(&self) -> bool {
        match_each_variant!(&self.engine, engine => engine.irq())
    }

    pub fn set_irq_mask(&mut self, mask: u8) {
        match_each_variant!(&mut self.engine, engine => engine.set_irq_mask(mask));
    }

    /// Set and clear status bits on behalf of a collaborator sharing the status register.
    pub fn set_reset_status(&mut self, set: u8, reset: u8) {
        match_each_variant!(&mut self.engine, engine => engine.set_reset_status(set, reset));
    }

    pub fn reset(&mut self) {
        log::debug!("Resetting {} chip", self.family);
        match_each_variant!(&mut self.engine, engine => engine.reset());
    }

    #[must_use]
    pub fn family(&self) -> ChipFamily {
        self.family
    }

    #[must_use]
    pub fn traits(&self) -> &'static FamilyTraits {
        match_each_variant!(&self.engine, engine => engine.traits())
    }

    /// Output sample rate in Hz, which follows the OPN prescaler.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        match_each_variant!(&self.engine, engine => engine.sample_rate())
    }

    /// Raw register contents, as last written.
    #[must_use]
    pub fn register(&self, address: u16) -> u8 {
        match_each_variant!(&self.engine, engine => engine.register(address))
    }

    /// Apply runtime-adjustable options. The family and clock stay as constructed.
    pub fn reload_config(&mut self, config: &ChipConfig) {
        if config.family != self.family {
            log::warn!(
                "Ignoring family change from {} to {} on config reload",
                self.family,
                config.family
            );
        }
        match_each_variant!(&mut self.engine, engine => engine.reload_config(config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn construct_supported_families() {
        for family in ChipFamily::ALL {
            let result = Chip::new(family, family.default_clock());
            match family {
                ChipFamily::Opq | ChipFamily::Opz => {
                    assert_eq!(result.err(), Some(UnsupportedFamilyError { family }));
                }
                _ => {
                    let chip = result.unwrap();
                    assert_eq!(chip.family(), family);
                    assert_eq!(chip.traits().family, family);
                }
            }
        }
    }

    #[test]
    fn error_message_names_family() {
        let err = Chip::new(ChipFamily::Opz, 3_579_545).unwrap_err();
        assert_eq!(err.to_string(), "unsupported FM chip family: Opz");
    }

    #[test]
    fn frame_width_matches_outputs() {
        for (family, outputs) in [
            (ChipFamily::Opm, 2),
            (ChipFamily::Opn, 1),
            (ChipFamily::Opna, 2),
            (ChipFamily::Opl, 1),
            (ChipFamily::Opll, 1),
            (ChipFamily::Opl3, 4),
        ] {
            let mut chip = Chip::new(family, family.default_clock()).unwrap();
            assert_eq!(chip.generate().lines().len(), outputs, "{family}");
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let mut chip = Chip::new(ChipFamily::Opm, 3_579_545).unwrap();
        chip.write(0x20, 0xC7);
        chip.write(0x28, 0x4A);
        chip.write(0x08, 0x78);
        for _ in 0..16 {
            chip.generate();
        }

        let bytes = bincode::encode_to_vec(&chip, bincode::config::standard()).unwrap();
        let (mut restored, _): (Chip, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();

        for _ in 0..64 {
            assert_eq!(chip.generate(), restored.generate());
        }
    }
}
