//! Low frequency oscillators and noise generators for each family

use bincode::{Decode, Encode};
use fm_common::num::GetBit;

/// OPM LFO with four waveforms plus the 17-bit noise generator that shares its clock.
#[derive(Debug, Clone, Encode, Decode)]
pub struct OpmLfo {
    counter: u32,
    am: u32,
    noise_lfsr: u32,
    noise_counter: u32,
    noise_state: u32,
    // Noise samples latched one LFO step ahead, used as the fourth waveform
    noise_waveform: [u8; 256],
}

impl OpmLfo {
    pub fn new() -> Self {
        Self {
            counter: 0,
            am: 0,
            noise_lfsr: 1,
            noise_counter: 0,
            noise_state: 0,
            noise_waveform: [0; 256],
        }
    }

    pub fn am(&self) -> u32 {
        self.am
    }

    pub fn noise_state(&self) -> u32 {
        self.noise_state
    }

    /// Noise runs at twice the sample rate; the LFSR shifts continuously and is sampled each
    /// time the counter passes the frequency setting.
    pub fn clock_noise(&mut self, frequency: u32) {
        for _ in 0..2 {
            let feedback = u32::from(self.noise_lfsr.bit(17) ^ self.noise_lfsr.bit(14)) ^ 1;
            self.noise_lfsr = (self.noise_lfsr << 1) | feedback;

            let counter = self.noise_counter;
            self.noise_counter += 1;
            if counter >= frequency {
                self.noise_counter = 0;
                self.noise_state = (self.noise_lfsr >> 17) & 1;
            }
        }
    }

    /// Advance the LFO and return the raw PM value after depth scaling.
    pub fn clock(
        &mut self,
        rate: u32,
        reset: bool,
        waveform: u32,
        am_depth: u32,
        pm_depth: u32,
    ) -> i32 {
        // Rate is a 4.4 floating-point step with an implied leading 1
        self.counter = self.counter.wrapping_add((0x10 | rate.field(0, 4)) << rate.field(4, 4));
        if reset {
            self.counter = 0;
        }

        let index = self.counter.field(22, 8) as u8;

        let noise = self.noise_lfsr.field(17, 8) as u8;
        self.noise_waveform[index.wrapping_add(1) as usize] = noise;

        let (am, pm) = self.waveform_sample(waveform, index);
        self.am = (u32::from(am) * am_depth) >> 7;
        (i32::from(pm) * pm_depth as i32) >> 7
    }

    fn waveform_sample(&self, waveform: u32, index: u8) -> (u8, i8) {
        match waveform {
            // Sawtooth
            0 => (index ^ 0xFF, index as i8),
            // Square
            1 => {
                let am = if index.bit(7) { 0 } else { 0xFF };
                (am, (am ^ 0x80) as i8)
            }
            // Triangle
            2 => {
                let am = if index.bit(7) { index << 1 } else { (index ^ 0xFF) << 1 };
                let pm = if index.bit(6) { am } else { !am };
                (am, pm as i8)
            }
            _ => {
                let noise = self.noise_waveform[index as usize];
                (noise, noise as i8)
            }
        }
    }
}

impl Default for OpmLfo {
    fn default() -> Self {
        Self::new()
    }
}

// Samples per LFO step for each frequency setting
const OPN_LFO_DIVIDERS: [u8; 8] = [
    108, // 3.85 Hz
    77,  // 5.40 Hz
    71,  // 5.86 Hz
    67,  // 6.21 Hz
    62,  // 6.71 Hz
    44,  // 9.46 Hz
    8,   // 52.02 Hz
    5,   // 83.23 Hz
];

// LFO counter is 7 bits
const OPN_LFO_COUNTER_MASK: u8 = 0x7F;

// Adapted from http://gendev.spritesmind.net/forum/viewtopic.php?f=24&t=386&start=480
// Values are for the highest bit of F-number
const FM_INCREMENT_TABLE: &[[u16; 8]; 8] = &[
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 4, 4, 4, 4],
    [0, 0, 0, 4, 4, 4, 8, 8],
    [0, 0, 4, 4, 8, 8, 12, 12],
    [0, 0, 4, 8, 8, 8, 12, 16],
    [0, 0, 8, 12, 16, 16, 20, 24],
    [0, 0, 16, 24, 32, 32, 40, 48],
    [0, 0, 32, 48, 64, 64, 80, 96],
];

/// OPNA LFO: a 7-bit counter stepped by a frequency divider.
#[derive(Debug, Clone, Encode, Decode)]
pub struct OpnLfo {
    enabled: bool,
    counter: u8,
    divider: u8,
    frequency: u8,
}

impl OpnLfo {
    pub fn new() -> Self {
        Self { enabled: false, counter: 0, divider: 0, frequency: OPN_LFO_DIVIDERS[0] }
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// A disabled LFO holds its counter at 0.
    pub fn clock(&mut self, enabled: bool, frequency: u32) -> i32 {
        self.enabled = enabled;
        if !enabled {
            self.counter = 0;
        }
        self.frequency = OPN_LFO_DIVIDERS[frequency as usize & 7];

        self.divider += 1;
        if self.divider >= self.frequency {
            self.divider = 0;

            if self.enabled {
                self.counter = (self.counter + 1) & OPN_LFO_COUNTER_MASK;
            }
        }

        self.pm()
    }

    /// Signed PM index, -7 to 7; the counter's bit 5 reflects and bit 6 negates.
    pub fn pm(&self) -> i32 {
        let magnitude = if self.counter.bit(5) {
            (0x1F - (self.counter & 0x1F)) >> 2
        } else {
            (self.counter & 0x1F) >> 2
        };

        if self.counter.bit(6) { -i32::from(magnitude) } else { i32::from(magnitude) }
    }

    /// AM attenuation in envelope units, 0 to 0x7E before sensitivity.
    pub fn am(&self) -> u32 {
        let attenuation =
            if self.counter.bit(6) { self.counter & 0x3F } else { 0x3F - self.counter };
        u32::from(attenuation) << 1
    }
}

impl Default for OpnLfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply OPN vibrato to an 11-bit F-number, returning a 12-bit value (left shifted 1 from the
/// input F-number).
pub fn opn_frequency_modulation(fnum: u32, pm_sensitivity: u32, lfo_raw_pm: i32) -> u32 {
    let shifted = fnum << 1;
    if pm_sensitivity == 0 || lfo_raw_pm == 0 {
        return shifted;
    }

    // Only the highest 7 bits of F-number contribute
    let raw_increment =
        FM_INCREMENT_TABLE[pm_sensitivity as usize & 7][lfo_raw_pm.unsigned_abs() as usize & 7];
    let increment: u32 =
        (4..11).map(|i| ((fnum >> i) & 1) * u32::from(raw_increment >> (10 - i))).sum();

    if lfo_raw_pm < 0 {
        shifted.wrapping_sub(increment) & 0xFFF
    } else {
        shifted.wrapping_add(increment) & 0xFFF
    }
}

/// Scale OPN LFO AM by sensitivity 0-3.
pub fn opn_amplitude_modulation(am: u32, am_sensitivity: u32) -> u32 {
    match am_sensitivity {
        0 => 0,
        1 => am >> 3,
        2 => am >> 1,
        _ => am,
    }
}

// One AM LFO period: 210 steps of 64 samples
const OPL_AM_PERIOD: u16 = 210 * 64;

// PM as a 1.3 fraction of the top F-number bits for each eighth of the period
const OPL_PM_SCALE: [i8; 8] = [8, 4, 0, -4, -8, -4, 0, 4];

/// Fixed-rate AM and PM LFOs plus the 23-bit rhythm noise generator (OPL and OPLL).
#[derive(Debug, Clone, Encode, Decode)]
pub struct OplLfo {
    am_counter: u16,
    pm_counter: u16,
    am: u32,
    noise_lfsr: u32,
}

impl OplLfo {
    pub fn new() -> Self {
        Self { am_counter: 0, pm_counter: 0, am: 0, noise_lfsr: 1 }
    }

    pub fn am(&self) -> u32 {
        self.am
    }

    pub fn noise_state(&self) -> u32 {
        (self.noise_lfsr >> 23) & 1
    }

    /// Deep AM is 4.8dB instead of 1dB; deep PM is 14 cents instead of 7.
    pub fn clock(&mut self, deep_am: bool, deep_pm: bool) -> i32 {
        let lfsr = self.noise_lfsr;
        let feedback = lfsr.bit(23) ^ lfsr.bit(9) ^ lfsr.bit(8) ^ lfsr.bit(1);
        self.noise_lfsr = (lfsr << 1) | u32::from(feedback);

        let am_counter = self.am_counter;
        self.am_counter += 1;
        if am_counter >= OPL_AM_PERIOD - 1 {
            self.am_counter = 0;
        }

        // Triangle over the period, low 8 bits fractional
        let shift = if deep_am { 7 } else { 9 };
        let triangle = if am_counter < OPL_AM_PERIOD / 2 {
            am_counter
        } else {
            OPL_AM_PERIOD + 63 - am_counter
        };
        self.am = u32::from(triangle) >> shift;

        let pm_counter = self.pm_counter;
        self.pm_counter = self.pm_counter.wrapping_add(1);
        let pm = i32::from(OPL_PM_SCALE[pm_counter.field(10, 3) as usize]);
        if deep_pm { pm } else { pm >> 1 }
    }
}

impl Default for OplLfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn opn_lfo_dividers() {
        for (freq, divider) in OPN_LFO_DIVIDERS.into_iter().enumerate() {
            let mut lfo = OpnLfo::new();

            for i in 0..4 {
                for tick in 0..divider - 1 {
                    lfo.clock(true, freq as u32);
                    assert_eq!(
                        i,
                        lfo.counter(),
                        "LFO counter should be {i} after {} ticks with divider {divider}",
                        tick + 1
                    );
                }

                lfo.clock(true, freq as u32);
                assert_eq!(
                    i + 1,
                    lfo.counter(),
                    "LFO counter should be {} after {divider} ticks (frequency {freq})",
                    i + 1
                );
            }
        }
    }

    #[test]
    fn disabled_opn_lfo_holds_max_am() {
        let mut lfo = OpnLfo::new();
        for _ in 0..1000 {
            assert_eq!(lfo.clock(false, 7), 0);
        }
        assert_eq!(lfo.am(), 0x7E);
        assert_eq!(opn_amplitude_modulation(lfo.am(), 1), 0x7E >> 3);
    }

    #[test]
    fn opn_pm_shape() {
        let mut lfo = OpnLfo::new();
        let mut values = Vec::new();
        for _ in 0..128 * 5 {
            values.push(lfo.clock(true, 7));
        }

        assert_eq!(values.iter().copied().max(), Some(7));
        assert_eq!(values.iter().copied().min(), Some(-7));
    }

    #[test]
    fn opn_vibrato() {
        // No sensitivity or no PM leaves the shifted F-number alone
        assert_eq!(opn_frequency_modulation(0x400, 0, 7), 0x800);
        assert_eq!(opn_frequency_modulation(0x400, 7, 0), 0x800);

        // Top F-number bit with maximum depth adds the full table value
        assert_eq!(opn_frequency_modulation(0x400, 7, 7), 0x800 + 96);
        assert_eq!(opn_frequency_modulation(0x400, 7, -7), 0x800 - 96);

        // Low 4 bits never contribute
        assert_eq!(opn_frequency_modulation(0x00F, 7, 7), 0x01E);
    }

    #[test]
    fn opl_am_triangle() {
        let mut lfo = OplLfo::new();
        let mut peak = 0;
        for _ in 0..u32::from(OPL_AM_PERIOD) {
            lfo.clock(true, true);
            peak = peak.max(lfo.am());
        }
        assert_eq!(peak, (105 * 64 + 63) >> 7);

        // The period repeats exactly
        let first: Vec<_> = (0..100).map(|_| { lfo.clock(false, false); lfo.am() }).collect();
        for _ in 100..u32::from(OPL_AM_PERIOD) {
            lfo.clock(false, false);
        }
        let second: Vec<_> = (0..100).map(|_| { lfo.clock(false, false); lfo.am() }).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn opl_pm_steps() {
        let mut lfo = OplLfo::new();
        assert_eq!(lfo.clock(true, true), 8);
        assert_eq!(lfo.clock(true, false), 4);
        for _ in 2..3 * 1024 {
            lfo.clock(true, true);
        }
        assert_eq!(lfo.clock(true, true), -4);
    }

    #[test]
    fn opm_lfo_reset_holds_counter() {
        let mut lfo = OpmLfo::new();
        for _ in 0..100 {
            lfo.clock(0xFF, true, 0, 0x7F, 0x7F);
        }
        // Sawtooth at index 0: full AM, zero PM
        assert_eq!(lfo.am(), (0xFF * 0x7F) >> 7);
        assert_eq!(lfo.clock(0xFF, true, 0, 0x7F, 0x7F), 0);
    }

    #[test]
    fn opm_noise_toggles() {
        let mut lfo = OpmLfo::new();
        let mut seen = [false; 2];
        for _ in 0..1000 {
            lfo.clock_noise(0);
            seen[lfo.noise_state() as usize] = true;
        }
        assert_eq!(seen, [true, true]);
    }
}
