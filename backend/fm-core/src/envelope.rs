//! Envelope generator shared by every family, including SSG-EG and the OPLL damp phase

use crate::operator::{OperatorCache, PhaseGenerator};
use crate::tables;
use bincode::{Decode, Encode};
use fm_common::num::GetBit;
use std::cmp;

// Attenuation is 10 bits
pub const ATTENUATION_MASK: u16 = 0x03FF;
pub const MAX_ATTENUATION: u16 = ATTENUATION_MASK;

// Operators attenuated beyond this output nothing
pub const SILENT_ATTENUATION: u16 = 0x380;

const SSG_ATTENUATION_THRESHOLD: u16 = 0x200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub enum EnvelopeState {
    Depress,
    Attack,
    Decay,
    Sustain,
    Release,
    /// Release finished at maximum attenuation
    Off,
}

impl EnvelopeState {
    pub const COUNT: usize = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum KeyOnSource {
    Normal = 0,
    Rhythm = 1,
    Csm = 2,
}

impl KeyOnSource {
    fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// SSG-EG mode bits, present only when SSG-EG is enabled for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsgEgMode(pub u8);

impl SsgEgMode {
    fn hold(self) -> bool {
        self.0.bit(0)
    }

    fn alternate(self) -> bool {
        self.0.bit(1)
    }

    fn attack(self) -> bool {
        self.0.bit(2)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct EnvelopeGenerator {
    state: EnvelopeState,
    attenuation: u16,
    ssg_inverted: bool,
    key_state: bool,
    keyon_live: u8,
}

impl EnvelopeGenerator {
    pub fn new() -> Self {
        Self {
            state: EnvelopeState::Release,
            attenuation: MAX_ATTENUATION,
            ssg_inverted: false,
            key_state: false,
            keyon_live: 0,
        }
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// Raw 10-bit attenuation, before SSG inversion, total level, and AM.
    pub fn attenuation(&self) -> u16 {
        self.attenuation
    }

    pub fn key_state(&self) -> bool {
        self.key_state
    }

    pub fn set_key(&mut self, on: bool, source: KeyOnSource) {
        self.keyon_live = (self.keyon_live & !source.mask()) | (u8::from(on) << source as u8);
    }

    /// Apply the combined live key state from all sources, starting an attack or release on a
    /// change. CSM key-ons only last until the next call.
    pub fn clock_keystate(
        &mut self,
        cache: &OperatorCache,
        ssg: Option<SsgEgMode>,
        has_depress: bool,
        phase: &mut PhaseGenerator,
    ) {
        let key_state = self.keyon_live != 0;
        self.keyon_live &= !KeyOnSource::Csm.mask();

        if key_state == self.key_state {
            return;
        }
        self.key_state = key_state;

        if key_state {
            if has_depress && self.attenuation < SSG_ATTENUATION_THRESHOLD {
                self.state = EnvelopeState::Depress;
            } else {
                self.start_attack(cache, ssg, false, phase);
            }
        } else {
            self.start_release();
        }
    }

    fn start_attack(
        &mut self,
        cache: &OperatorCache,
        ssg: Option<SsgEgMode>,
        restart: bool,
        phase: &mut PhaseGenerator,
    ) {
        if self.state == EnvelopeState::Attack {
            return;
        }
        self.state = EnvelopeState::Attack;

        // SSG-EG restarts keep the phase and the inversion
        if !restart {
            self.ssg_inverted = ssg.is_some_and(SsgEgMode::attack);
            phase.reset();
        }

        // Rates of 62 and 63 jump straight to zero attenuation
        if cache.rate(EnvelopeState::Attack) >= 62 {
            self.attenuation = 0;
        }

        log::trace!("Envelope attack start, restart={restart}: {self:?}");
    }

    fn start_release(&mut self) {
        if self.state >= EnvelopeState::Release {
            return;
        }
        self.state = EnvelopeState::Release;

        // Keying off while inverted commits the inversion to the stored attenuation
        if self.ssg_inverted {
            self.attenuation =
                SSG_ATTENUATION_THRESHOLD.wrapping_sub(self.attenuation) & ATTENUATION_MASK;
            self.ssg_inverted = false;
        }
    }

    pub fn clear_ssg_inversion(&mut self) {
        self.ssg_inverted = false;
    }

    /// Per-sample SSG-EG processing. Only acts once attenuation reaches 0x200.
    pub fn clock_ssg_eg(
        &mut self,
        mode: SsgEgMode,
        cache: &OperatorCache,
        phase: &mut PhaseGenerator,
    ) {
        if self.attenuation < SSG_ATTENUATION_THRESHOLD {
            return;
        }

        if mode.hold() {
            // Hold at the level matching the final inversion state
            self.ssg_inverted = mode.attack() ^ mode.alternate();
            if self.state != EnvelopeState::Attack {
                self.attenuation =
                    if self.ssg_inverted { SSG_ATTENUATION_THRESHOLD } else { MAX_ATTENUATION };
            }
        } else {
            self.ssg_inverted ^= mode.alternate();

            if matches!(self.state, EnvelopeState::Decay | EnvelopeState::Sustain) {
                self.start_attack(cache, Some(mode), true, phase);
            }

            if !mode.alternate() {
                phase.reset();
            }
        }

        if self.state >= EnvelopeState::Release {
            self.attenuation = MAX_ATTENUATION;
        }
    }

    /// Envelope tick. `env_counter` is the global envelope counter with the divider bits removed.
    pub fn clock(
        &mut self,
        env_counter: u32,
        cache: &OperatorCache,
        ssg: Option<SsgEgMode>,
        has_depress: bool,
        phase: &mut PhaseGenerator,
    ) {
        if self.state == EnvelopeState::Attack && self.attenuation == 0 {
            self.state = EnvelopeState::Decay;
        }

        if self.state == EnvelopeState::Decay && u32::from(self.attenuation) >= cache.eg_sustain {
            self.state = EnvelopeState::Sustain;
        }

        let rate = cache.rate(self.state);
        let rate_shift = u32::from(rate >> 2);
        let env_counter = env_counter << rate_shift;

        // Rates below 44 only update on some ticks
        if env_counter & 0x7FF != 0 {
            return;
        }

        let relevant_bits = (env_counter >> cmp::max(11, rate_shift)) & 7;
        let increment = tables::attenuation_increment(rate, relevant_bits);

        if self.state == EnvelopeState::Attack {
            if rate < 62 {
                // Exponential approach to zero; the complement is negative, so this subtracts
                let attenuation = i32::from(self.attenuation);
                let delta = (!attenuation * increment as i32) >> 4;
                self.attenuation = (attenuation + delta) as u16 & ATTENUATION_MASK;
            }
        } else {
            let increment = increment as u16;
            if ssg.is_none() {
                self.attenuation += increment;
            } else if self.attenuation < SSG_ATTENUATION_THRESHOLD {
                // SSG-EG decays 4x as fast
                self.attenuation += 4 * increment;
            }

            if self.attenuation > MAX_ATTENUATION {
                self.attenuation = MAX_ATTENUATION;
            }

            if has_depress
                && self.state == EnvelopeState::Depress
                && self.attenuation >= SSG_ATTENUATION_THRESHOLD
            {
                self.start_attack(cache, ssg, false, phase);
            }

            if self.state == EnvelopeState::Release && self.attenuation == MAX_ATTENUATION {
                self.state = EnvelopeState::Off;
            }
        }
    }

    /// Final attenuation after SSG inversion, total level, and optional AM, clamped to 10 bits.
    pub fn effective_attenuation(&self, cache: &OperatorCache, am_offset: Option<u32>) -> u32 {
        let mut attenuation = self.attenuation;
        if self.ssg_inverted {
            attenuation = SSG_ATTENUATION_THRESHOLD.wrapping_sub(attenuation) & ATTENUATION_MASK;
        }

        let attenuation =
            u32::from(attenuation) + am_offset.unwrap_or(0) + cache.total_level;
        cmp::min(attenuation, MAX_ATTENUATION.into())
    }
}

impl Default for EnvelopeGenerator {
    fn default() -> Self {
        Self::new()
    }
}
